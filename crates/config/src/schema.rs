//! Configuration schema. Keys are PascalCase in every file format.

use std::time::Duration;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Top-level `robot.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RobotConfig {
    pub name: String,
    /// A single character that addresses the robot, e.g. `;ping`.
    pub alias: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub admin_contact: Option<String>,

    pub protocol: String,
    pub protocol_config: Value,
    pub brain: String,
    pub brain_config: Value,
    pub history_provider: String,
    pub history_config: Value,

    /// `protocol:userid`, or a bare user id on the primary protocol.
    pub admin_users: Vec<String>,
    pub default_allow_direct: bool,
    pub default_channels: Vec<String>,
    pub join_channels: Vec<String>,
    pub ignore_users: Vec<String>,
    pub default_job_channel: Option<String>,
    pub default_elevator: Option<String>,
    pub default_authorizer: Option<String>,
    pub default_message_format: Option<String>,
    pub user_roster: Vec<UserEntry>,
    pub log_level: Option<String>,

    /// Seconds a prompt waits for a reply.
    pub prompt_timeout: u64,
    /// Seconds a plugin keeps a conversation it subscribed to.
    pub subscription_timeout: u64,
    #[serde(rename = "ShortTermMemoryTTL")]
    pub short_term_memory_ttl: u64,
    pub datum_lock_timeout: u64,
    pub edit_debounce: u64,
    pub shutdown_grace: u64,
    pub elevation: Elevation,

    pub external_plugins: Vec<ExternalTask>,
    pub external_jobs: Vec<ExternalTask>,
    pub external_tasks: Vec<ExternalTask>,
    pub disabled_tasks: Vec<String>,
    pub scheduled_jobs: Vec<ScheduledJob>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            alias: None,
            full_name: None,
            email: None,
            admin_contact: None,
            protocol: "terminal".into(),
            protocol_config: Value::Null,
            brain: "mem".into(),
            brain_config: Value::Null,
            history_provider: "mem".into(),
            history_config: Value::Null,
            admin_users: Vec::new(),
            default_allow_direct: true,
            default_channels: Vec::new(),
            join_channels: Vec::new(),
            ignore_users: Vec::new(),
            default_job_channel: None,
            default_elevator: None,
            default_authorizer: None,
            default_message_format: None,
            user_roster: Vec::new(),
            log_level: None,
            prompt_timeout: 60,
            subscription_timeout: 14 * 24 * 60 * 60,
            short_term_memory_ttl: 7 * 60,
            datum_lock_timeout: 180,
            edit_debounce: 3,
            shutdown_grace: 10,
            elevation: Elevation::default(),
            external_plugins: Vec::new(),
            external_jobs: Vec::new(),
            external_tasks: Vec::new(),
            disabled_tasks: Vec::new(),
            scheduled_jobs: Vec::new(),
        }
    }
}

impl RobotConfig {
    pub fn alias_char(&self) -> Option<char> {
        self.alias.as_deref().and_then(|a| a.chars().next())
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout)
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_secs(self.subscription_timeout)
    }

    pub fn short_term_ttl(&self) -> Duration {
        Duration::from_secs(self.short_term_memory_ttl)
    }

    pub fn datum_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.datum_lock_timeout)
    }

    pub fn edit_debounce(&self) -> Duration {
        Duration::from_secs(self.edit_debounce)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    /// Whether (`protocol`, `user_id`) is listed in `AdminUsers`.
    pub fn is_admin(&self, protocol: &str, user_id: &str) -> bool {
        self.admin_users.iter().any(|entry| match entry.split_once(':') {
            Some((p, id)) => p.eq_ignore_ascii_case(protocol) && id == user_id,
            None => protocol.eq_ignore_ascii_case(&self.protocol) && entry == user_id,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserEntry {
    pub user_name: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

impl UserEntry {
    pub fn attribute(&self, attr: &str) -> Option<&str> {
        match attr.to_ascii_lowercase().as_str() {
            "name" | "username" => Some(self.user_name.as_str()),
            "id" | "userid" | "internalid" => Some(self.user_id.as_str()),
            "email" => self.email.as_deref(),
            "fullname" | "realname" => self.full_name.as_deref(),
            "firstname" => self.first_name.as_deref(),
            "lastname" => self.last_name.as_deref(),
            "phone" | "sms" => self.phone.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationMode {
    /// The window restarts on every elevated command.
    #[default]
    Idle,
    /// Fixed window from the first elevation.
    Absolute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Elevation {
    pub timeout: u64,
    pub mode: ElevationMode,
}

impl Default for Elevation {
    fn default() -> Self {
        Self {
            timeout: 7200,
            mode: ElevationMode::Idle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// A script-backed plugin, job or task declared in `robot.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExternalTask {
    pub name: String,
    pub path: String,
    pub description: String,
    pub privileged: bool,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScheduledJob {
    pub name: String,
    pub schedule: String,
    pub arguments: Vec<String>,
}

/// Accept classic 5-field crontab lines by prefixing a seconds field.
pub fn normalize_schedule(schedule: &str) -> String {
    let fields = schedule.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", schedule.trim())
    } else {
        schedule.trim().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InputMatcher {
    pub regex: String,
    pub command: String,
    /// Reply matchers are identified by a label rather than a command.
    pub label: String,
    /// Short-term context names for each capture group, so "it" can stand
    /// in for the last thing discussed.
    pub contexts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HelpEntry {
    pub keywords: Vec<String>,
    pub helptext: Vec<String>,
}

/// Per-task file, merged over the task's built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskConfig {
    pub description: String,
    pub name_space: Option<String>,
    pub disabled: bool,

    pub channels: Vec<String>,
    pub all_channels: bool,
    pub allow_direct: Option<bool>,
    pub direct_only: bool,
    pub disallow_direct: bool,
    pub users: Vec<String>,

    pub require_admin: bool,
    pub admin_commands: Vec<String>,
    pub elevator: Option<String>,
    pub elevated_commands: Vec<String>,
    pub elevate_immediate_commands: Vec<String>,
    pub authorizer: Option<String>,
    pub auth_require: Option<String>,
    pub authorized_commands: Vec<String>,
    pub authorize_all_commands: bool,

    pub command_matchers: Vec<InputMatcher>,
    pub message_matchers: Vec<InputMatcher>,
    pub reply_matchers: Vec<InputMatcher>,
    pub help: Vec<HelpEntry>,
    pub catch_all: bool,

    pub parameters: Vec<Parameter>,
    /// Job runs to keep history for.
    pub history_logs: u64,
    /// Where a job reports when it has no originating channel.
    pub channel: Option<String>,

    /// Free-form task configuration handed to `GetTaskConfig`.
    pub config: Value,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_tunables() {
        let cfg: RobotConfig = serde_yaml::from_str("Name: bender\nAlias: ';'\n").unwrap();
        assert_eq!(cfg.name, "bender");
        assert_eq!(cfg.alias_char(), Some(';'));
        assert_eq!(cfg.prompt_timeout, 60);
        assert_eq!(cfg.subscription_timeout(), Duration::from_secs(14 * 24 * 60 * 60));
        assert_eq!(cfg.short_term_memory_ttl, 420);
        assert_eq!(cfg.elevation.mode, ElevationMode::Idle);
        assert!(cfg.default_allow_direct);
        assert_eq!(cfg.brain, "mem");
    }

    #[test]
    fn admin_entries_with_and_without_protocol() {
        let cfg = RobotConfig {
            protocol: "test".into(),
            admin_users: vec!["u0001".into(), "slack:U42".into()],
            ..Default::default()
        };
        assert!(cfg.is_admin("test", "u0001"));
        assert!(!cfg.is_admin("slack", "u0001"));
        assert!(cfg.is_admin("slack", "U42"));
        assert!(!cfg.is_admin("test", "U42"));
    }

    #[test]
    fn task_config_parses_matchers() {
        let yaml = r#"
CommandMatchers:
- Command: add
  Regex: '(?i:add ([\w\d- ]+) to the ([\w-_]+) list)'
  Contexts: [ "item", "list" ]
Config:
  Scope: channel
HistoryLogs: 7
"#;
        let tc: TaskConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tc.command_matchers[0].command, "add");
        assert_eq!(tc.command_matchers[0].contexts, vec!["item", "list"]);
        assert_eq!(tc.config["Scope"], "channel");
        assert_eq!(tc.history_logs, 7);
    }

    #[test]
    fn five_field_schedules_gain_seconds() {
        assert_eq!(normalize_schedule("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_schedule("0 30 9 * * Mon"), "0 30 9 * * Mon");
    }

    #[test]
    fn roster_attribute_lookup() {
        let u = UserEntry {
            user_name: "alice".into(),
            user_id: "u0001".into(),
            email: Some("alice@example.com".into()),
            ..Default::default()
        };
        assert_eq!(u.attribute("email"), Some("alice@example.com"));
        assert_eq!(u.attribute("firstName"), None);
        assert_eq!(u.attribute("internalID"), Some("u0001"));
    }
}
