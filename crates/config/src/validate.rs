//! Startup validation. Errors abort startup; warnings are logged.

use std::{
    collections::HashSet,
    path::PathBuf,
    str::FromStr,
    sync::LazyLock,
};

use {
    regex::Regex,
    serde_json::Value,
    warren_common::{LogLevel, MessageFormat},
};

use crate::schema::{InputMatcher, RobotConfig, TaskConfig, normalize_schedule};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "unknown-field", "unknown-name", "task-name", "regex", "schedule",
    /// "duplicate", "conflict" or "value"
    pub category: &'static str,
    /// Dotted path, e.g. "CommandMatchers[2].Regex"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn extend(&mut self, other: ValidationResult) {
        self.diagnostics.extend(other.diagnostics);
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Registered backend and task names a configuration may refer to.
#[derive(Debug, Clone, Default)]
pub struct KnownNames {
    pub brains: Vec<String>,
    pub histories: Vec<String>,
    pub protocols: Vec<String>,
    /// Compiled-in jobs; external jobs are added from the config itself.
    pub jobs: Vec<String>,
}

const ROBOT_KEYS: &[&str] = &[
    "Name",
    "Alias",
    "FullName",
    "Email",
    "AdminContact",
    "Protocol",
    "ProtocolConfig",
    "Brain",
    "BrainConfig",
    "HistoryProvider",
    "HistoryConfig",
    "AdminUsers",
    "DefaultAllowDirect",
    "DefaultChannels",
    "JoinChannels",
    "IgnoreUsers",
    "DefaultJobChannel",
    "DefaultElevator",
    "DefaultAuthorizer",
    "DefaultMessageFormat",
    "UserRoster",
    "LogLevel",
    "PromptTimeout",
    "SubscriptionTimeout",
    "ShortTermMemoryTTL",
    "DatumLockTimeout",
    "EditDebounce",
    "ShutdownGrace",
    "Elevation",
    "ExternalPlugins",
    "ExternalJobs",
    "ExternalTasks",
    "DisabledTasks",
    "ScheduledJobs",
];

const TASK_KEYS: &[&str] = &[
    "Description",
    "NameSpace",
    "Disabled",
    "Channels",
    "AllChannels",
    "AllowDirect",
    "DirectOnly",
    "DisallowDirect",
    "Users",
    "RequireAdmin",
    "AdminCommands",
    "Elevator",
    "ElevatedCommands",
    "ElevateImmediateCommands",
    "Authorizer",
    "AuthRequire",
    "AuthorizedCommands",
    "AuthorizeAllCommands",
    "CommandMatchers",
    "MessageMatchers",
    "ReplyMatchers",
    "Help",
    "CatchAll",
    "Parameters",
    "HistoryLogs",
    "Channel",
    "Config",
];

static TASK_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").ok());

/// Task names start with a letter and continue with letters, digits, `-`
/// or `_`. `bot` is reserved for the robot itself.
pub fn valid_task_name(name: &str) -> bool {
    name != "bot"
        && TASK_NAME_RE
            .as_ref()
            .is_some_and(|re| re.is_match(name))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(!ca.eq_ignore_ascii_case(&cb));
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

fn suggest<'a, S: AsRef<str>>(
    needle: &str,
    candidates: &'a [S],
    max_distance: usize,
) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let d = levenshtein(needle, candidate);
        if d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

fn did_you_mean<S: AsRef<str>>(needle: &str, candidates: &[S]) -> String {
    match suggest(needle, candidates, 3) {
        Some(s) => format!(" (did you mean \"{s}\"?)"),
        None => String::new(),
    }
}

fn check_unknown_keys(raw: &Value, known: &[&str], out: &mut ValidationResult) {
    let Some(map) = raw.as_object() else {
        return;
    };
    for key in map.keys() {
        if !known.contains(&key.as_str()) {
            out.push(
                Severity::Warning,
                "unknown-field",
                key.clone(),
                format!("unknown field{}", did_you_mean(key, known)),
            );
        }
    }
}

fn check_known(
    out: &mut ValidationResult,
    path: &str,
    what: &str,
    name: &str,
    registered: &[String],
) {
    if !registered.iter().any(|r| r == name) {
        out.push(
            Severity::Error,
            "unknown-name",
            path,
            format!("unknown {what} \"{name}\"{}", did_you_mean(name, registered)),
        );
    }
}

// ── Robot ───────────────────────────────────────────────────────────────────

/// Validate `robot.yaml`. `raw` is the parsed file before deserialization
/// and is used for unknown-field detection.
#[must_use]
pub fn validate_robot(
    cfg: &RobotConfig,
    raw: Option<&Value>,
    known: &KnownNames,
) -> ValidationResult {
    let mut out = ValidationResult::default();
    if let Some(raw) = raw {
        check_unknown_keys(raw, ROBOT_KEYS, &mut out);
    }

    if cfg.name.trim().is_empty() {
        out.push(
            Severity::Warning,
            "value",
            "Name",
            "robot has no name; it will only respond to its alias and direct messages",
        );
    }
    if let Some(alias) = &cfg.alias {
        let mut chars = alias.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if warren_routing::valid_alias(c) => {},
            _ => out.push(
                Severity::Error,
                "value",
                "Alias",
                format!("alias \"{alias}\" must be a single character from \"&!;:-%#@~<>/*+^$?\\[]{{}}\""),
            ),
        }
    }

    check_known(&mut out, "Protocol", "protocol", &cfg.protocol, &known.protocols);
    check_known(&mut out, "Brain", "brain", &cfg.brain, &known.brains);
    check_known(
        &mut out,
        "HistoryProvider",
        "history provider",
        &cfg.history_provider,
        &known.histories,
    );

    if let Some(level) = &cfg.log_level
        && let Err(e) = LogLevel::from_str(level)
    {
        out.push(Severity::Warning, "value", "LogLevel", e);
    }
    if let Some(format) = &cfg.default_message_format
        && let Err(e) = MessageFormat::from_str(format)
    {
        out.push(Severity::Error, "value", "DefaultMessageFormat", e);
    }
    if cfg.prompt_timeout == 0 {
        out.push(
            Severity::Error,
            "value",
            "PromptTimeout",
            "prompt timeout must be at least one second",
        );
    }
    if cfg.subscription_timeout == 0 {
        out.push(
            Severity::Warning,
            "value",
            "SubscriptionTimeout",
            "zero subscription timeout; subscriptions lapse immediately",
        );
    }
    if cfg.elevation.timeout == 0 {
        out.push(
            Severity::Warning,
            "value",
            "Elevation.Timeout",
            "zero elevation timeout; every elevated command will prompt",
        );
    }

    let mut roster = HashSet::new();
    for (i, user) in cfg.user_roster.iter().enumerate() {
        if user.user_name.is_empty() || user.user_id.is_empty() {
            out.push(
                Severity::Error,
                "value",
                format!("UserRoster[{i}]"),
                "roster entries need both UserName and UserID",
            );
        } else if !roster.insert(user.user_name.to_ascii_lowercase()) {
            out.push(
                Severity::Error,
                "duplicate",
                format!("UserRoster[{i}].UserName"),
                format!("duplicate roster user \"{}\"", user.user_name),
            );
        }
    }

    let mut task_names = HashSet::new();
    let groups = [
        ("ExternalPlugins", &cfg.external_plugins),
        ("ExternalJobs", &cfg.external_jobs),
        ("ExternalTasks", &cfg.external_tasks),
    ];
    for (key, tasks) in groups {
        for (i, task) in tasks.iter().enumerate() {
            let path = format!("{key}[{i}]");
            if !valid_task_name(&task.name) {
                out.push(
                    Severity::Error,
                    "task-name",
                    format!("{path}.Name"),
                    format!("invalid task name \"{}\"", task.name),
                );
            } else if !task_names.insert(task.name.clone()) {
                out.push(
                    Severity::Error,
                    "duplicate",
                    format!("{path}.Name"),
                    format!("duplicate task name \"{}\"", task.name),
                );
            }
            if task.path.is_empty() {
                out.push(
                    Severity::Error,
                    "value",
                    format!("{path}.Path"),
                    format!("external task \"{}\" has no Path", task.name),
                );
            }
        }
    }

    let mut jobs: Vec<String> = known.jobs.clone();
    jobs.extend(cfg.external_jobs.iter().map(|j| j.name.clone()));
    for (i, sched) in cfg.scheduled_jobs.iter().enumerate() {
        let path = format!("ScheduledJobs[{i}]");
        if !jobs.iter().any(|j| j == &sched.name) {
            out.push(
                Severity::Error,
                "unknown-name",
                format!("{path}.Name"),
                format!(
                    "scheduled job \"{}\" is not a known job{}",
                    sched.name,
                    did_you_mean(&sched.name, &jobs)
                ),
            );
        }
        if let Err(e) = cron::Schedule::from_str(&normalize_schedule(&sched.schedule)) {
            out.push(
                Severity::Error,
                "schedule",
                format!("{path}.Schedule"),
                format!("invalid schedule \"{}\": {e}", sched.schedule),
            );
        }
    }

    out
}

// ── Tasks ───────────────────────────────────────────────────────────────────

fn check_matchers(
    out: &mut ValidationResult,
    key: &str,
    matchers: &[InputMatcher],
    labelled: bool,
) {
    let mut seen = HashSet::new();
    for (i, m) in matchers.iter().enumerate() {
        let path = format!("{key}[{i}]");
        let id = if labelled {
            &m.label
        } else {
            &m.command
        };
        let field = if labelled {
            "Label"
        } else {
            "Command"
        };
        if id.is_empty() {
            out.push(
                Severity::Error,
                "value",
                format!("{path}.{field}"),
                format!("matcher has no {field}"),
            );
        } else if labelled && !seen.insert(id.clone()) {
            out.push(
                Severity::Error,
                "duplicate",
                format!("{path}.Label"),
                format!("duplicate reply label \"{id}\""),
            );
        }
        match Regex::new(&m.regex) {
            Ok(re) => {
                let groups = re.captures_len() - 1;
                if m.contexts.len() > groups {
                    out.push(
                        Severity::Warning,
                        "regex",
                        format!("{path}.Contexts"),
                        format!(
                            "{} contexts for {groups} capture groups",
                            m.contexts.len()
                        ),
                    );
                }
            },
            Err(e) => out.push(
                Severity::Error,
                "regex",
                format!("{path}.Regex"),
                e.to_string(),
            ),
        }
    }
}

/// Validate one task's merged configuration.
#[must_use]
pub fn validate_task(name: &str, cfg: &TaskConfig, raw: Option<&Value>) -> ValidationResult {
    let mut out = ValidationResult::default();
    if !valid_task_name(name) {
        out.push(
            Severity::Error,
            "task-name",
            "",
            format!("invalid task name \"{name}\""),
        );
    }
    if let Some(raw) = raw {
        check_unknown_keys(raw, TASK_KEYS, &mut out);
    }
    check_matchers(&mut out, "CommandMatchers", &cfg.command_matchers, false);
    check_matchers(&mut out, "MessageMatchers", &cfg.message_matchers, false);
    check_matchers(&mut out, "ReplyMatchers", &cfg.reply_matchers, true);

    if cfg.direct_only && (cfg.disallow_direct || cfg.allow_direct == Some(false)) {
        out.push(
            Severity::Error,
            "conflict",
            "DirectOnly",
            "DirectOnly conflicts with disallowing direct messages",
        );
    }
    let commands: HashSet<&str> = cfg
        .command_matchers
        .iter()
        .map(|m| m.command.as_str())
        .collect();
    for (key, list) in [
        ("AdminCommands", &cfg.admin_commands),
        ("ElevatedCommands", &cfg.elevated_commands),
        ("ElevateImmediateCommands", &cfg.elevate_immediate_commands),
        ("AuthorizedCommands", &cfg.authorized_commands),
    ] {
        for cmd in list {
            if !commands.contains(cmd.as_str()) {
                out.push(
                    Severity::Warning,
                    "unknown-name",
                    key,
                    format!("\"{cmd}\" does not name a command matcher"),
                );
            }
        }
    }
    for (i, h) in cfg.help.iter().enumerate() {
        if h.helptext.is_empty() {
            out.push(
                Severity::Warning,
                "value",
                format!("Help[{i}]"),
                "help entry has no Helptext",
            );
        }
    }

    for d in &mut out.diagnostics {
        d.path = if d.path.is_empty() {
            name.to_string()
        } else {
            format!("{name}.{}", d.path)
        };
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema::{ExternalTask, ScheduledJob},
        rstest::rstest,
        serde_json::json,
    };

    fn known() -> KnownNames {
        KnownNames {
            brains: vec!["mem".into(), "file".into()],
            histories: vec!["mem".into(), "file".into()],
            protocols: vec!["terminal".into(), "test".into()],
            jobs: vec!["pause-notifies".into()],
        }
    }

    fn robot() -> RobotConfig {
        RobotConfig {
            name: "bender".into(),
            alias: Some(";".into()),
            protocol: "test".into(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("ping", true)]
    #[case("lists", true)]
    #[case("fail-report", true)]
    #[case("echo_2", true)]
    #[case("bot", false)]
    #[case("2fast", false)]
    #[case("has space", false)]
    #[case("", false)]
    fn task_names(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(valid_task_name(name), ok);
    }

    #[test]
    fn clean_robot_has_no_diagnostics() {
        let res = validate_robot(&robot(), None, &known());
        assert!(res.diagnostics.is_empty(), "{:?}", res.diagnostics);
    }

    #[test]
    fn misspelled_key_suggests() {
        let raw = json!({"Name": "bender", "Protcol": "test"});
        let res = validate_robot(&robot(), Some(&raw), &known());
        let d = &res.diagnostics[0];
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("\"Protocol\""), "{}", d.message);
        assert!(!res.has_errors());
    }

    #[test]
    fn unknown_backends_are_errors() {
        let cfg = RobotConfig {
            brain: "redis".into(),
            history_provider: "fil".into(),
            ..robot()
        };
        let res = validate_robot(&cfg, None, &known());
        assert_eq!(res.count(Severity::Error), 2);
        assert!(res.diagnostics[1].message.contains("did you mean \"file\""));
    }

    #[test]
    fn bad_alias_and_duplicate_tasks() {
        let ext = |name: &str| ExternalTask {
            name: name.into(),
            path: "plugins/x.sh".into(),
            ..Default::default()
        };
        let cfg = RobotConfig {
            alias: Some("xy".into()),
            external_plugins: vec![ext("echo"), ext("echo")],
            external_jobs: vec![ext("bot")],
            ..robot()
        };
        let res = validate_robot(&cfg, None, &known());
        let cats: Vec<_> = res.diagnostics.iter().map(|d| d.category).collect();
        assert_eq!(cats, vec!["value", "duplicate", "task-name"]);
    }

    #[test]
    fn scheduled_jobs_checked() {
        let cfg = RobotConfig {
            scheduled_jobs: vec![
                ScheduledJob {
                    name: "pause-notifies".into(),
                    schedule: "*/5 * * * *".into(),
                    arguments: vec![],
                },
                ScheduledJob {
                    name: "backup".into(),
                    schedule: "every tuesday".into(),
                    arguments: vec![],
                },
            ],
            ..robot()
        };
        let res = validate_robot(&cfg, None, &known());
        let paths: Vec<_> = res.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["ScheduledJobs[1].Name", "ScheduledJobs[1].Schedule"]);
    }

    #[test]
    fn task_regex_and_label_errors() {
        let tc = TaskConfig {
            command_matchers: vec![InputMatcher {
                regex: "(?i:add (".into(),
                command: "add".into(),
                ..Default::default()
            }],
            reply_matchers: vec![
                InputMatcher {
                    regex: "[yY]".into(),
                    label: "YesNo".into(),
                    ..Default::default()
                },
                InputMatcher {
                    regex: "[nN]".into(),
                    label: "YesNo".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let res = validate_task("lists", &tc, None);
        let paths: Vec<_> = res.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["lists.CommandMatchers[0].Regex", "lists.ReplyMatchers[1].Label"]
        );
    }

    #[test]
    fn task_conflicts_and_unknown_commands() {
        let tc = TaskConfig {
            direct_only: true,
            disallow_direct: true,
            admin_commands: vec!["reload".into()],
            ..Default::default()
        };
        let res = validate_task("admin", &tc, Some(&json!({"Comands": []})));
        assert!(res.has_errors());
        assert_eq!(res.count(Severity::Warning), 2);
        assert!(res.diagnostics.iter().all(|d| d.path.starts_with("admin.")));
    }
}
