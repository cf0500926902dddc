//! The running configuration: robot settings plus every loaded task.
//!
//! A snapshot is immutable. Reload builds a new one and swaps it in;
//! pipelines already running keep the one they started with.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    regex::Regex,
    serde::Serialize,
    tracing::{debug, info, warn},
    warren_channels::gating,
    warren_common::Message,
    warren_config::{
        Diagnostic, KnownNames, Parameter, RobotConfig, Severity, TaskConfig, ValidationResult,
        find_robot_file, from_value, load_config_value, load_task_value, validate_robot,
        validate_task,
    },
    warren_routing::AddressMatcher,
};

use crate::{
    Error, Result, builtins, external,
    matcher::{Matcher, compile_replies, stock_reply},
    task::{TaskDef, TaskHandler, TaskKind, TaskRegistry},
};

/// A task with its merged configuration and compiled matchers.
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub privileged: bool,
    pub builtin: bool,
    pub disabled: bool,
    pub config: TaskConfig,
    pub handler: Arc<dyn TaskHandler>,
    /// Parameters declared with an external task in `robot.yaml`.
    extra_parameters: Vec<Parameter>,
    commands: Vec<Matcher>,
    ambients: Vec<Matcher>,
    replies: HashMap<String, Regex>,
}

impl Task {
    fn from_def(def: TaskDef, config: TaskConfig, disabled: bool, extra: Vec<Parameter>) -> Self {
        // Bad regexes were already reported by validation.
        let commands = config
            .command_matchers
            .iter()
            .filter_map(|m| Matcher::command(m).ok())
            .collect();
        let ambients = config
            .message_matchers
            .iter()
            .filter_map(|m| Matcher::ambient(m).ok())
            .collect();
        let replies = compile_replies(&config.reply_matchers).unwrap_or_default();
        Self {
            name: def.name,
            kind: def.kind,
            privileged: def.privileged,
            builtin: def.builtin,
            disabled,
            config,
            handler: def.handler,
            extra_parameters: extra,
            commands,
            ambients,
            replies,
        }
    }

    /// Prefix for long-term memory keys.
    pub fn namespace(&self) -> &str {
        self.config
            .name_space
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.config
            .parameters
            .iter()
            .chain(&self.extra_parameters)
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// The task's own reply matcher, else a stock one.
    pub fn reply_matcher(&self, label: &str) -> Option<Regex> {
        self.replies
            .get(label)
            .cloned()
            .or_else(|| stock_reply(label))
    }

    /// First command matcher covering `text`.
    pub fn match_command(&self, text: &str) -> Option<(&Matcher, Vec<String>)> {
        self.commands
            .iter()
            .find_map(|m| m.captures(text).map(|args| (m, args)))
    }

    /// Every ambient matcher that fires on `text`, in configured order.
    pub fn match_ambient(&self, text: &str) -> Vec<(&Matcher, Vec<String>)> {
        self.ambients
            .iter()
            .filter_map(|m| m.captures(text).map(|args| (m, args)))
            .collect()
    }

    pub fn find_command(&self, command: &str) -> Option<&Matcher> {
        self.commands.iter().find(|m| m.command == command)
    }

    /// Whether the task answers `msg`'s user in `msg`'s venue. The help
    /// system passes `help` to list tasks regardless of direct-message rules.
    pub fn visible(&self, robot: &RobotConfig, msg: &Message, is_admin: bool, help: bool) -> bool {
        let c = &self.config;
        if self.disabled {
            return false;
        }
        let allow_direct = (c.allow_direct.unwrap_or(robot.default_allow_direct)
            || c.direct_only)
            && !c.disallow_direct;
        if !help {
            if msg.direct && !allow_direct {
                return false;
            }
            if !msg.direct && c.direct_only {
                return false;
            }
        }
        if c.require_admin && !is_admin {
            return false;
        }
        if !c.users.is_empty() && !gating::matches_any(&msg.user, &c.users) {
            return false;
        }
        if msg.direct {
            return allow_direct || help;
        }
        if c.all_channels {
            return true;
        }
        let channels = if c.channels.is_empty() {
            &robot.default_channels
        } else {
            &c.channels
        };
        channels.is_empty() || channels.iter().any(|ch| ch == &msg.channel) || help
    }
}

pub struct Snapshot {
    pub config: RobotConfig,
    pub addressing: AddressMatcher,
    pub root: PathBuf,
    pub home: PathBuf,
    pub validation: ValidationResult,
    tasks: Vec<Arc<Task>>,
    by_name: HashMap<String, usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Dump<'a> {
    robot: &'a RobotConfig,
    tasks: Vec<DumpTask<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DumpTask<'a> {
    name: &'a str,
    kind: String,
    privileged: bool,
    disabled: bool,
    config: &'a TaskConfig,
}

impl Snapshot {
    /// Read and validate `conf/` under `root`. Any error-level diagnostic
    /// fails the load; warnings are kept in `validation`.
    pub fn load(
        root: &Path,
        home: &Path,
        natives: &TaskRegistry,
        known: &KnownNames,
    ) -> Result<Self> {
        let robot_path = find_robot_file(root).ok_or_else(|| warren_config::Error::NotFound {
            dir: root.join("conf"),
        })?;
        let raw = load_config_value(&robot_path)?;
        let config: RobotConfig = from_value(raw.clone(), &robot_path)?;
        let mut report = validate_robot(&config, Some(&raw), known);
        report.config_path = Some(robot_path);

        let mut defs = builtins::defs();
        defs.extend(natives.iter().cloned());
        let mut extra_params = HashMap::new();
        for (def, params) in external::defs(&config, root) {
            extra_params.insert(def.name.clone(), params);
            defs.push(def);
        }

        let mut tasks = Vec::with_capacity(defs.len());
        let mut by_name = HashMap::new();
        for def in defs {
            if by_name.contains_key(&def.name) {
                report.diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "duplicate",
                    path: def.name.clone(),
                    message: "task name is registered more than once".into(),
                });
                continue;
            }
            let (value, source) =
                load_task_value(root, def.kind.config_dir(), &def.name, &def.default_config)?;
            let task_config: TaskConfig = match from_value(value.clone(), &source) {
                Ok(tc) => tc,
                Err(e) => {
                    report.diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "value",
                        path: def.name.clone(),
                        message: e.to_string(),
                    });
                    continue;
                },
            };
            report.extend(validate_task(&def.name, &task_config, Some(&value)));
            let disabled = task_config.disabled || config.disabled_tasks.contains(&def.name);
            if disabled {
                debug!(task = %def.name, "task disabled");
            }
            let extra = extra_params.remove(&def.name).unwrap_or_default();
            by_name.insert(def.name.clone(), tasks.len());
            tasks.push(Arc::new(Task::from_def(def, task_config, disabled, extra)));
        }

        if report.has_errors() {
            return Err(invalid(&report));
        }
        for d in &report.diagnostics {
            warn!("{d}");
        }

        let mention = match &config.full_name {
            Some(full) if !full.is_empty() => Some(full.as_str()),
            _ => None,
        };
        let addressing = AddressMatcher::new(&config.name, mention, config.alias_char())?;
        info!(
            robot = %config.name,
            tasks = tasks.len(),
            warnings = report.count(Severity::Warning),
            "configuration loaded"
        );
        Ok(Self {
            config,
            addressing,
            root: root.to_path_buf(),
            home: home.to_path_buf(),
            validation: report,
            tasks,
            by_name,
        })
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.by_name.get(name).map(|&i| &self.tasks[i])
    }

    /// Builtins first, then native tasks in registration order, then
    /// external tasks in configuration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter().filter(|t| t.kind == TaskKind::Plugin)
    }

    pub fn is_admin(&self, msg: &Message) -> bool {
        self.config.is_admin(msg.protocol.as_str(), &msg.protocol_user)
    }

    /// Map a roster name to its protocol id.
    pub fn roster_id(&self, name: &str) -> Option<&str> {
        self.config
            .user_roster
            .iter()
            .find(|u| u.user_name == name)
            .map(|u| u.user_id.as_str())
    }

    /// The merged configuration as YAML.
    pub fn dump(&self) -> Result<String> {
        let dump = Dump {
            robot: &self.config,
            tasks: self
                .tasks
                .iter()
                .map(|t| DumpTask {
                    name: &t.name,
                    kind: t.kind.to_string(),
                    privileged: t.privileged,
                    disabled: t.disabled,
                    config: &t.config,
                })
                .collect(),
        };
        serde_yaml::to_string(&dump)
            .map_err(|e| Error::message(format!("dumping configuration: {e}")))
    }
}

pub(crate) fn invalid(report: &ValidationResult) -> Error {
    let lines: Vec<String> = report
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(ToString::to_string)
        .collect();
    Error::Invalid {
        errors: lines.len(),
        report: lines.join("\n"),
    }
}
