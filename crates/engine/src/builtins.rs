//! Plugins compiled into every robot: help, info, administration, log
//! paging and job history.

use std::{collections::HashMap, io::Read, sync::Arc};

use {
    async_trait::async_trait,
    tracing::{error, info, warn},
    warren_common::TaskRetVal,
    warren_config::RobotConfig,
};

use crate::{
    pipeline::HISTORIES_KEY,
    robot::Robot,
    snapshot::Task,
    task::{TaskDef, TaskHandler},
};

/// Help longer than this goes by direct message.
const MAX_CHANNEL_HELP_LINES: usize = 12;
const HISTORY_PREVIEW_LINES: usize = 20;

const DEFAULT_HELP: &[&str] = &[
    "(bot), help <keyword> - get help for the commands matching <keyword>",
    "(bot), info - basic information about me, including my administrators",
];

pub(crate) fn defs() -> Vec<TaskDef> {
    vec![
        TaskDef::plugin("builtin-help", Arc::new(Help))
            .with_config(HELP_CONFIG)
            .builtin(),
        TaskDef::plugin("builtin-info", Arc::new(Info))
            .with_config(INFO_CONFIG)
            .builtin(),
        TaskDef::plugin("builtin-admin", Arc::new(Admin))
            .with_config(ADMIN_CONFIG)
            .builtin(),
        TaskDef::plugin("builtin-logging", Arc::new(Logging))
            .with_config(LOGGING_CONFIG)
            .builtin(),
        TaskDef::plugin("builtin-history", Arc::new(History))
            .with_config(HISTORY_CONFIG)
            .builtin(),
    ]
}

fn expand(line: &str, bot: &str) -> String {
    line.replace("(bot)", bot)
}

// ── Help ────────────────────────────────────────────────────────────────────

const HELP_CONFIG: &str = r#"
AllChannels: true
AllowDirect: true
CatchAll: true
Help:
- Keywords: ["help"]
  Helptext:
  - "(bot), help - list the commands available in this channel"
  - "(bot), help <keyword> - get help for the commands matching <keyword>"
CommandMatchers:
- Command: help
  Regex: '(?i:help(?:\s+([\w-]+))?)'
MessageMatchers:
- Command: intro
  Regex: '(?i:^\s*help\s*$)'
"#;

struct Help;

#[async_trait]
impl TaskHandler for Help {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        match command {
            "help" => help(r, args.first().map_or("", String::as_str)).await,
            "intro" => intro(r).await,
            "catchall" => {
                r.reply(&format!(
                    "Sorry, that didn't match any commands I know, or may refer to a command that's not available in this channel; try '{}, help <keyword>'",
                    r.bot_name()
                ))
                .await;
            },
            _ => {},
        }
        TaskRetVal::Normal
    }
}

/// Where a task answers, appended to keyword help lines.
fn venue(task: &Task, robot: &RobotConfig) -> String {
    let c = &task.config;
    if c.direct_only {
        return " (direct message only)".into();
    }
    if c.all_channels {
        return String::new();
    }
    let channels = if c.channels.is_empty() {
        &robot.default_channels
    } else {
        &c.channels
    };
    if channels.is_empty() {
        String::new()
    } else {
        format!(" (channels: {})", channels.join(", "))
    }
}

async fn help(r: &Robot, keyword: &str) {
    let snapshot = r.snapshot();
    let msg = r.message();
    let is_admin = snapshot.is_admin(msg);
    let connector = &r.shared().connector;
    let bot = r.bot_name();
    let mut lines = Vec::new();

    if keyword.is_empty() {
        for task in snapshot
            .tasks()
            .filter(|t| !t.builtin && t.visible(&snapshot.config, msg, is_admin, false))
        {
            for entry in &task.config.help {
                lines.extend(
                    entry
                        .helptext
                        .iter()
                        .map(|l| connector.format_help(&expand(l, bot))),
                );
            }
        }
        if lines.is_empty() {
            let mut default = connector.default_help();
            if default.is_empty() {
                default = DEFAULT_HELP.iter().map(|l| l.to_string()).collect();
            }
            let text: Vec<String> = default
                .iter()
                .map(|l| connector.format_help(&expand(l, bot)))
                .collect();
            r.say(&text.join("\n")).await;
            return;
        }
        lines.insert(0, "Command(s) available in this channel:".into());
    } else {
        for task in snapshot
            .tasks()
            .filter(|t| t.visible(&snapshot.config, msg, is_admin, true))
        {
            let venue = venue(task, &snapshot.config);
            for entry in task
                .config
                .help
                .iter()
                .filter(|e| e.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)))
            {
                lines.extend(
                    entry
                        .helptext
                        .iter()
                        .map(|l| connector.format_help(&format!("{}{venue}", expand(l, bot)))),
                );
            }
        }
        if lines.is_empty() {
            r.say(&format!("Sorry, I didn't find any commands matching '{keyword}'"))
                .await;
            return;
        }
        lines.insert(0, format!("Command(s) matching keyword: {keyword}"));
    }

    let text = lines.join("\n");
    if lines.len() > MAX_CHANNEL_HELP_LINES && !msg.direct {
        r.reply("(the help output was pretty long, so I sent you a private message)")
            .await;
        r.direct().say(&text).await;
    } else {
        r.say(&text).await;
    }
}

async fn intro(r: &Robot) {
    let cfg = &r.snapshot().config;
    let bot = r.bot_name();
    let mut text = format!(
        "Hi, I'm {bot}, a staff robot. I see you've asked for help.\n\n\
         I respond to commands that match specific patterns. For instance:\n\n\
         {bot}, help ping\n\n... would give you help on my ping command."
    );
    if let Some(alias) = cfg.alias.as_deref().filter(|a| !a.is_empty()) {
        text.push_str(&format!(
            "\n\nYou can also address me with my alias, like this:\n\n{alias}help ping"
        ));
    }
    text.push_str(
        "\n\nWhen I ask you a question, just type your reply. \"=\" means use the default value, and \"-\" cancels.",
    );
    match cfg.admin_contact.as_deref().filter(|c| !c.is_empty()) {
        Some(contact) => {
            text.push_str(&format!("\n\nFor anything else, please contact {contact}."))
        },
        None => text.push_str("\n\nFor anything else, please contact my administrators."),
    }
    if !r.message().direct {
        r.reply("I've sent you a private message introducing myself")
            .await;
    }
    r.direct().say(&text).await;
}

// ── Info ────────────────────────────────────────────────────────────────────

const INFO_CONFIG: &str = r#"
AllChannels: true
AllowDirect: true
Help:
- Keywords: ["info"]
  Helptext:
  - "(bot), info - basic information about me, including my administrators"
CommandMatchers:
- Command: info
  Regex: '(?i:info)'
"#;

struct Info;

#[async_trait]
impl TaskHandler for Info {
    async fn handle(&self, r: &Robot, command: &str, _args: &[String]) -> TaskRetVal {
        if command != "info" {
            return TaskRetVal::Normal;
        }
        let cfg = &r.snapshot().config;
        let mut lines = vec!["Here's some information about me:".to_string()];
        match cfg.alias.as_deref().filter(|a| !a.is_empty()) {
            Some(alias) => {
                lines.push(format!("My name is '{}', and my alias is '{alias}'", cfg.name))
            },
            None => lines.push(format!("My name is '{}'", cfg.name)),
        }
        lines.push(format!("I'm running warren version {}", env!("CARGO_PKG_VERSION")));
        lines.push(format!("I'm connected with the '{}' protocol", r.message().protocol));
        if cfg.admin_users.is_empty() {
            lines.push("I don't have any administrators configured".into());
        } else {
            lines.push(format!("My administrators are: {}", cfg.admin_users.join(", ")));
        }
        if let Some(contact) = cfg.admin_contact.as_deref().filter(|c| !c.is_empty()) {
            lines.push(format!("Administrator contact: {contact}"));
        }
        r.say(&lines.join("\n")).await;
        TaskRetVal::Normal
    }
}

// ── Admin ───────────────────────────────────────────────────────────────────

const ADMIN_CONFIG: &str = r#"
AllChannels: true
AllowDirect: true
RequireAdmin: true
Help:
- Keywords: ["reload", "admin"]
  Helptext:
  - "(bot), reload - re-read the configuration"
- Keywords: ["quit", "admin"]
  Helptext:
  - "(bot), quit - shut down once running pipelines finish"
- Keywords: ["abort", "admin"]
  Helptext:
  - "(bot), abort - shut down without waiting for running pipelines"
CommandMatchers:
- Command: reload
  Regex: '(?i:reload)'
- Command: quit
  Regex: '(?i:quit|exit)'
- Command: abort
  Regex: '(?i:abort)'
"#;

struct Admin;

#[async_trait]
impl TaskHandler for Admin {
    async fn handle(&self, r: &Robot, command: &str, _args: &[String]) -> TaskRetVal {
        match command {
            "reload" => match r.shared().reload() {
                Ok(report) => {
                    let warnings = report.count(warren_config::Severity::Warning);
                    if warnings > 0 {
                        r.reply(&format!(
                            "Configuration reloaded with {warnings} warning(s); check the log"
                        ))
                        .await;
                    } else {
                        r.reply("Configuration reloaded successfully").await;
                    }
                },
                Err(e) => {
                    error!(error = %e, "reload failed");
                    r.reply("Error encountered during reload; check the log")
                        .await;
                    return TaskRetVal::Fail;
                },
            },
            "quit" => {
                info!(user = %r.message().user, "shutdown requested");
                r.reply("Ok, I'm shutting down").await;
                r.shared().shutdown();
            },
            "abort" => {
                warn!(user = %r.message().user, "abort requested");
                r.reply("Ok, shutting down without waiting for running pipelines")
                    .await;
                r.shared().abort();
            },
            _ => {},
        }
        TaskRetVal::Normal
    }
}

// ── Logging ─────────────────────────────────────────────────────────────────

const LOGGING_CONFIG: &str = r#"
DirectOnly: true
RequireAdmin: true
Help:
- Keywords: ["log"]
  Helptext:
  - "(bot), show log (page <n>) - show recent log lines, page 0 being the newest"
  - "(bot), set log lines to <n> - lines per page of log output"
CommandMatchers:
- Command: showlog
  Regex: '(?i:show log(?: page (\d+))?)'
- Command: setlines
  Regex: '(?i:set log lines to (\d+))'
"#;

struct Logging;

#[async_trait]
impl TaskHandler for Logging {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        let Some(logs) = r.shared().logs.as_ref() else {
            if command == "showlog" || command == "setlines" {
                r.say("Log capture isn't enabled for this robot").await;
            }
            return TaskRetVal::Normal;
        };
        match command {
            "showlog" => {
                let page = args
                    .first()
                    .and_then(|p| p.parse::<usize>().ok())
                    .unwrap_or(0);
                let lines = logs.page(page);
                if lines.is_empty() {
                    r.say("That page of the log is empty").await;
                } else {
                    r.say(&lines.join("\n")).await;
                }
            },
            "setlines" => {
                let requested = args
                    .first()
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(0);
                let lines = logs.set_page_lines(requested);
                r.say(&format!("Lines per page of log output set to: {lines}"))
                    .await;
            },
            _ => {},
        }
        TaskRetVal::Normal
    }
}

// ── History ─────────────────────────────────────────────────────────────────

const HISTORY_CONFIG: &str = r#"
AllChannels: true
AllowDirect: true
RequireAdmin: true
Help:
- Keywords: ["history", "job"]
  Helptext:
  - "(bot), history <job> (<run>) - link to or show the log of a job run, the latest by default"
CommandMatchers:
- Command: history
  Regex: '(?i:history ([\w-]+)(?:\s+(\d+))?)'
"#;

struct History;

#[async_trait]
impl TaskHandler for History {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        if command != "history" {
            return TaskRetVal::Normal;
        }
        let Some(job) = args.first().filter(|j| !j.is_empty()) else {
            return TaskRetVal::Normal;
        };
        let index = match args.get(1).and_then(|i| i.parse::<u64>().ok()) {
            Some(i) => Some(i),
            None => latest_run(r, job).await,
        };
        let Some(index) = index else {
            r.say(&format!("I don't have any history for '{job}'")).await;
            return TaskRetVal::Normal;
        };
        let provider = &r.shared().history;
        if let Some(url) = provider.get_history_url(job, index) {
            r.say(&format!("Here's the log for {job} run {index}: {url}"))
                .await;
            return TaskRetVal::Normal;
        }
        let mut content = String::new();
        let read = provider
            .get_history(job, index)
            .map_err(|e| e.to_string())
            .and_then(|mut rd| rd.read_to_string(&mut content).map_err(|e| e.to_string()));
        if let Err(e) = read {
            warn!(job = %job, index, error = %e, "reading job history");
            r.say(&format!("I couldn't find the log for {job} run {index}"))
                .await;
            return TaskRetVal::Normal;
        }
        let preview: Vec<&str> = content.lines().take(HISTORY_PREVIEW_LINES).collect();
        if preview.is_empty() {
            r.say(&format!("The log for {job} run {index} is empty")).await;
        } else {
            r.say(&format!(
                "Here's the start of the log for {job} run {index}:\n{}",
                preview.join("\n")
            ))
            .await;
        }
        TaskRetVal::Normal
    }
}

async fn latest_run(r: &Robot, job: &str) -> Option<u64> {
    r.shared()
        .brain
        .checkout_datum::<HashMap<String, u64>>(HISTORIES_KEY, false)
        .await
        .ok()
        .and_then(|c| c.value)
        .and_then(|m| m.get(job).copied())
}
