//! Script-backed plugins, jobs and tasks declared in `robot.yaml`.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use {
    async_trait::async_trait,
    tokio::process::Command,
    tracing::{debug, error, warn},
    warren_common::TaskRetVal,
    warren_config::{ExternalTask, Parameter, RobotConfig},
};

use crate::{
    robot::Robot,
    task::{TaskDef, TaskHandler, TaskKind},
};

/// Task definitions for every external task, with the parameters declared
/// alongside them.
pub(crate) fn defs(config: &RobotConfig, root: &Path) -> Vec<(TaskDef, Vec<Parameter>)> {
    let groups = [
        (TaskKind::Plugin, &config.external_plugins),
        (TaskKind::Job, &config.external_jobs),
        (TaskKind::Task, &config.external_tasks),
    ];
    groups
        .into_iter()
        .flat_map(|(kind, entries)| entries.iter().map(move |e| (kind, e)))
        .map(|(kind, entry)| (def(kind, entry, root), entry.parameters.clone()))
        .collect()
}

fn def(kind: TaskKind, entry: &ExternalTask, root: &Path) -> TaskDef {
    let handler = ExternalHandler {
        kind,
        path: resolve(root, &entry.path),
    };
    let mut def = TaskDef::new(entry.name.clone(), kind, Arc::new(handler));
    if !entry.description.is_empty() {
        let mut base = serde_json::Map::new();
        base.insert("Description".into(), entry.description.clone().into());
        def = def.with_config(serde_json::Value::Object(base).to_string());
    }
    if entry.privileged {
        def = def.privileged();
    }
    def
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Plugins get the command ahead of its arguments; jobs and tasks only get
/// their arguments.
fn argv(kind: TaskKind, command: &str, args: &[String]) -> Vec<String> {
    match kind {
        TaskKind::Plugin => std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect(),
        TaskKind::Job | TaskKind::Task => args.to_vec(),
    }
}

struct ExternalHandler {
    kind: TaskKind,
    path: PathBuf,
}

#[async_trait]
impl TaskHandler for ExternalHandler {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        let mut cmd = Command::new(&self.path);
        cmd.args(argv(self.kind, command, args))
            .current_dir(r.work_dir())
            .envs(r.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(
            task = %r.task_name(),
            path = %self.path.display(),
            command,
            "starting external task"
        );

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(
                    task = %r.task_name(),
                    path = %self.path.display(),
                    error = %e,
                    "starting external task"
                );
                return TaskRetVal::MechanismFail;
            },
        };
        let output = tokio::select! {
            out = child.wait_with_output() => out,
            () = r.shared().abort.cancelled() => {
                warn!(task = %r.task_name(), "external task killed by abort");
                return TaskRetVal::MechanismFail;
            },
        };
        let output = match output {
            Ok(o) => o,
            Err(e) => {
                error!(task = %r.task_name(), error = %e, "waiting for external task");
                return TaskRetVal::MechanismFail;
            },
        };

        let history = r.history();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            history.log(line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            history.log(&format!("(stderr) {line}"));
        }
        match output.status.code() {
            Some(code) => {
                let ret = TaskRetVal::from_exit_code(code);
                debug!(task = %r.task_name(), code, result = %ret, "external task exited");
                ret
            },
            None => {
                warn!(task = %r.task_name(), "external task killed by signal");
                TaskRetVal::MechanismFail
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, path: &str) -> ExternalTask {
        ExternalTask {
            name: name.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    #[test]
    fn defs_cover_every_kind_in_order() {
        let mut config = RobotConfig::default();
        config.external_plugins = vec![entry("weather", "plugins/weather.sh")];
        config.external_jobs = vec![ExternalTask {
            privileged: true,
            description: "nightly backup".into(),
            parameters: vec![Parameter {
                name: "TARGET".into(),
                value: "/srv".into(),
            }],
            ..entry("backup", "/opt/jobs/backup.sh")
        }];
        config.external_tasks = vec![entry("notify", "tasks/notify.sh")];

        let defs = defs(&config, Path::new("/etc/warren"));
        let summary: Vec<(&str, TaskKind, bool)> = defs
            .iter()
            .map(|(d, _)| (d.name.as_str(), d.kind, d.privileged))
            .collect();
        assert_eq!(summary, vec![
            ("weather", TaskKind::Plugin, false),
            ("backup", TaskKind::Job, true),
            ("notify", TaskKind::Task, false),
        ]);
        assert_eq!(defs[1].1[0].name, "TARGET");
        assert!(defs[1].0.default_config.contains("nightly backup"));
        assert!(defs[0].0.default_config.is_empty());
    }

    #[test]
    fn relative_paths_resolve_against_the_config_root() {
        assert_eq!(
            resolve(Path::new("/etc/warren"), "plugins/weather.sh"),
            PathBuf::from("/etc/warren/plugins/weather.sh")
        );
        assert_eq!(resolve(Path::new("/etc/warren"), "/bin/true"), PathBuf::from("/bin/true"));
    }

    #[test]
    fn plugins_receive_their_command() {
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(argv(TaskKind::Plugin, "echo", &args), vec!["echo", "a", "b"]);
        assert_eq!(argv(TaskKind::Job, "run", &args), vec!["a", "b"]);
    }
}
