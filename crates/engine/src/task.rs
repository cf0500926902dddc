//! Registration of native plugins, jobs and tasks.

use std::{fmt, sync::Arc};

use {async_trait::async_trait, warren_common::TaskRetVal};

use crate::{Error, Result, robot::Robot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Matched against chat messages.
    Plugin,
    /// Started explicitly; tracked in history.
    Job,
    /// Helper, only runnable from inside a pipeline.
    Task,
}

impl TaskKind {
    /// Directory under `conf/` holding overrides for this kind.
    pub fn config_dir(self) -> &'static str {
        match self {
            Self::Plugin => "plugins",
            Self::Job => "jobs",
            Self::Task => "tasks",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plugin => "plugin",
            Self::Job => "job",
            Self::Task => "task",
        })
    }
}

/// Code behind a task.
///
/// Plugins receive the matched command and its capture groups. Jobs and
/// tasks receive `run` and the arguments they were started with. Plugins
/// that want one-time setup also receive `init` once at startup.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal;
}

/// A native task as registered at startup.
#[derive(Clone)]
pub struct TaskDef {
    pub name: String,
    pub kind: TaskKind,
    pub privileged: bool,
    /// YAML merged under `conf/<kind>/<name>.yaml`.
    pub default_config: String,
    pub handler: Arc<dyn TaskHandler>,
    pub(crate) builtin: bool,
}

impl TaskDef {
    pub fn new(name: impl Into<String>, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            kind,
            privileged: false,
            default_config: String::new(),
            handler,
            builtin: false,
        }
    }

    pub fn plugin(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self::new(name, TaskKind::Plugin, handler)
    }

    pub fn job(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self::new(name, TaskKind::Job, handler)
    }

    pub fn task(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self::new(name, TaskKind::Task, handler)
    }

    #[must_use]
    pub fn with_config(mut self, yaml: impl Into<String>) -> Self {
        self.default_config = yaml.into();
        self
    }

    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    #[must_use]
    pub(crate) fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }
}

impl fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("privileged", &self.privileged)
            .finish_non_exhaustive()
    }
}

/// Native tasks in registration order. Written once before the engine
/// starts.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    defs: Vec<TaskDef>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: TaskDef) -> Result<()> {
        if !warren_config::valid_task_name(&def.name) {
            return Err(Error::InvalidTaskName { name: def.name });
        }
        if self.get(&def.name).is_some() {
            return Err(Error::DuplicateTask { name: def.name });
        }
        self.defs.push(def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TaskDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDef> {
        self.defs.iter()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.defs
            .iter()
            .filter(|d| d.kind == TaskKind::Job)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl TaskHandler for Nop {
        async fn handle(&self, _r: &Robot, _command: &str, _args: &[String]) -> TaskRetVal {
            TaskRetVal::Normal
        }
    }

    #[test]
    fn rejects_bad_and_duplicate_names() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskDef::plugin("ping", Arc::new(Nop))).unwrap();
        reg.register(TaskDef::job("backup", Arc::new(Nop)).privileged())
            .unwrap();
        assert!(matches!(
            reg.register(TaskDef::plugin("ping", Arc::new(Nop))),
            Err(Error::DuplicateTask { .. })
        ));
        assert!(matches!(
            reg.register(TaskDef::task("bot", Arc::new(Nop))),
            Err(Error::InvalidTaskName { .. })
        ));
        assert!(matches!(
            reg.register(TaskDef::task("9lives", Arc::new(Nop))),
            Err(Error::InvalidTaskName { .. })
        ));
        assert_eq!(reg.job_names(), vec!["backup"]);
        assert!(reg.get("backup").unwrap().privileged);
        assert_eq!(reg.len(), 2);
    }
}
