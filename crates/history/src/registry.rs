//! History provider registration table.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::Arc,
};

use serde_json::Value;

use crate::{
    Error, Result,
    file::{FileHistory, FileHistoryConfig},
    memory::MemHistory,
    provider::HistoryProvider,
};

/// Builds a provider from its `HistoryConfig` block; relative paths resolve
/// against the robot's home directory.
pub type HistoryConstructor = fn(Value, &Path) -> Result<Arc<dyn HistoryProvider>>;

pub struct HistoryRegistry {
    constructors: BTreeMap<String, HistoryConstructor>,
}

impl Default for HistoryRegistry {
    fn default() -> Self {
        let mut reg = Self {
            constructors: BTreeMap::new(),
        };
        reg.register("mem", build_mem);
        reg.register("file", build_file);
        reg
    }
}

impl HistoryRegistry {
    pub fn register(&mut self, name: &str, ctor: HistoryConstructor) {
        self.constructors.insert(name.to_string(), ctor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(
        &self,
        name: &str,
        config: Value,
        home: &Path,
    ) -> Result<Arc<dyn HistoryProvider>> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownProvider {
                name: name.to_string(),
            })?;
        ctor(config, home)
    }
}

fn build_mem(_config: Value, _home: &Path) -> Result<Arc<dyn HistoryProvider>> {
    Ok(Arc::new(MemHistory::new()))
}

fn build_file(config: Value, home: &Path) -> Result<Arc<dyn HistoryProvider>> {
    let mut config: FileHistoryConfig = if config.is_null() {
        FileHistoryConfig::default()
    } else {
        serde_json::from_value(config)?
    };
    if config.directory.as_os_str().is_empty() {
        config.directory = "history".into();
    }
    if config.directory.is_relative() {
        config.directory = home.join(&config.directory);
    }
    Ok(Arc::new(FileHistory::open(config)?))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, tempfile::TempDir};

    #[test]
    fn file_provider_resolves_relative_directory() {
        let tmp = TempDir::new().unwrap();
        let reg = HistoryRegistry::default();
        let h = reg
            .build(
                "file",
                json!({"Directory": "logs", "URLPrefix": "http://x/"}),
                tmp.path(),
            )
            .unwrap();
        h.new_history("job", 1, 1).unwrap().close();
        assert!(tmp.path().join("logs/job/run-1.log").exists());
        assert_eq!(h.get_history_url("job", 1).as_deref(), Some("http://x/job/run-1.log"));
    }

    #[test]
    fn unknown_provider() {
        let reg = HistoryRegistry::default();
        assert!(matches!(
            reg.build("s3", Value::Null, Path::new(".")).err().unwrap(),
            Error::UnknownProvider { .. }
        ));
    }
}
