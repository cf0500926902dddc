use anyhow::Result;

use {
    warren_config::{Severity, ValidationResult},
    warren_engine::{EngineBuilder, Error},
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn dump(builder: &EngineBuilder) -> Result<()> {
    let snapshot = builder.load_snapshot()?;
    print!("{}", snapshot.dump()?);
    Ok(())
}

pub fn validate(builder: &EngineBuilder, verbose: bool) -> Result<()> {
    let snapshot = match builder.load_snapshot() {
        Ok(s) => s,
        Err(Error::Invalid { errors, report }) => {
            eprintln!("{report}");
            eprintln!("{errors} error(s)");
            std::process::exit(1);
        },
        Err(e) => return Err(e.into()),
    };
    report(&snapshot.validation, verbose);
    Ok(())
}

fn report(result: &ValidationResult, verbose: bool) {
    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }
    if shown > 0 {
        eprintln!();
    }

    let warnings = result.count(Severity::Warning);
    if warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{warnings} warning(s)");
    }
}
