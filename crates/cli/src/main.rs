mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    warren_engine::{Engine, EngineBuilder, LogCapture, TaskRegistry, control},
};

#[derive(Parser)]
#[command(name = "warren", about = "Warren, a chat-ops robot", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory holding conf/ (defaults to the working directory).
    #[arg(long, global = true, env = "GOPHER_CONFIGDIR")]
    config_dir: Option<PathBuf>,

    /// Working directory for tasks, file back-ends and the control socket.
    #[arg(long, global = true, env = "GOPHER_HOME")]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the robot (default when no subcommand is provided).
    Run,
    /// Ask a running robot to shut down.
    Quit,
    /// Ask a running robot to reload its configuration.
    Reload,
    /// Print the merged configuration as YAML.
    Dump,
    /// Check the configuration and report errors and warnings.
    Validate {
        /// Show informational diagnostics too.
        #[arg(long)]
        verbose: bool,
    },
}

impl Cli {
    fn root(&self) -> PathBuf {
        warren_config::resolve_config_dir(self.config_dir.as_deref())
    }

    fn home(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| self.root())
    }

    fn builder(&self) -> anyhow::Result<EngineBuilder> {
        let mut tasks = TaskRegistry::new();
        warren_plugins::register_all(&mut tasks)?;
        Ok(Engine::builder(self.root()).home(self.home()).tasks(tasks))
    }
}

/// Initialise tracing, attaching the capture layer behind `show log` when
/// the robot is running.
fn init_telemetry(cli: &Cli, capture: Option<LogCapture>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    let capture_layer = capture.as_ref().map(LogCapture::layer);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .with(capture_layer)
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .with(capture_layer)
            .init();
    }
}

async fn run(cli: &Cli, capture: LogCapture) -> anyhow::Result<()> {
    let engine = Arc::new(
        cli.builder()?
            .log_capture(capture)
            .control_socket(true)
            .build()
            .await
            .context("starting the robot")?,
    );
    let signals = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                engine.shutdown();
            }
        })
    };
    let result = engine.run().await;
    signals.abort();
    result?;
    info!("robot stopped");
    Ok(())
}

async fn remote(cli: &Cli, command: &str) -> anyhow::Result<()> {
    let home = cli.home();
    let reply = control::send_command(&home, command)
        .await
        .with_context(|| {
            format!(
                "no robot is listening on {}",
                control::socket_path(&home).display()
            )
        })?;
    print!("{reply}");
    if reply.starts_with("error:") {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let capture = matches!(cli.command, None | Some(Commands::Run)).then(LogCapture::default);
    init_telemetry(&cli, capture.clone());

    match &cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "warren starting");
            run(&cli, capture.unwrap_or_default()).await
        },
        Some(Commands::Quit) => remote(&cli, "quit").await,
        Some(Commands::Reload) => remote(&cli, "reload").await,
        Some(Commands::Dump) => config_commands::dump(&cli.builder()?),
        Some(Commands::Validate { verbose }) => {
            config_commands::validate(&cli.builder()?, *verbose)
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default() {
        let cli = Cli::try_parse_from(["warren", "--config-dir", "/etc/warren"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.root(), PathBuf::from("/etc/warren"));
    }

    #[test]
    fn home_defaults_to_the_config_dir() {
        let cli = Cli::try_parse_from(["warren", "--config-dir", "/srv/bot", "quit"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Quit)));
        assert_eq!(cli.home(), PathBuf::from("/srv/bot"));
        let cli = Cli::try_parse_from([
            "warren",
            "validate",
            "--verbose",
            "--home",
            "/var/lib/bot",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Validate { verbose: true })));
        assert_eq!(cli.home(), PathBuf::from("/var/lib/bot"));
    }
}
