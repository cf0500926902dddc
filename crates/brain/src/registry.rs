//! Brain back-end registration table.

use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use {serde::Deserialize, serde_json::Value};

use crate::{
    Error, Result,
    cached::{CachedBrain, DEFAULT_QUEUE_SIZE},
    store::SimpleBrain,
    store_file::FileBrain,
    store_memory::MemBrain,
};

pub type BrainFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn SimpleBrain>>> + Send>>;

/// Builds a back-end from its `BrainConfig` block and the robot's home
/// directory (relative paths resolve against it).
pub type BrainConstructor = fn(Value, PathBuf) -> BrainFuture;

pub struct BrainRegistry {
    constructors: BTreeMap<String, BrainConstructor>,
}

impl Default for BrainRegistry {
    fn default() -> Self {
        let mut reg = Self {
            constructors: BTreeMap::new(),
        };
        reg.register("mem", build_mem);
        reg.register("file", build_file);
        reg
    }
}

impl BrainRegistry {
    pub fn register(&mut self, name: &str, ctor: BrainConstructor) {
        self.constructors.insert(name.to_string(), ctor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub async fn build(
        &self,
        name: &str,
        config: Value,
        home: &Path,
    ) -> Result<Arc<dyn SimpleBrain>> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownBrain {
                name: name.to_string(),
            })?;
        ctor(config, home.to_path_buf()).await
    }
}

fn build_mem(_config: Value, _home: PathBuf) -> BrainFuture {
    Box::pin(async {
        let brain: Arc<dyn SimpleBrain> = Arc::new(MemBrain::new());
        Ok(brain)
    })
}

fn build_file(config: Value, home: PathBuf) -> BrainFuture {
    Box::pin(file_brain(config, home))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileBrainConfig {
    #[serde(default = "default_brain_dir")]
    brain_directory: PathBuf,
    /// Put a write-behind cache in front of the directory.
    #[serde(default)]
    write_behind: bool,
    #[serde(default = "default_queue_size")]
    queue_size: usize,
}

fn default_brain_dir() -> PathBuf {
    PathBuf::from("brain")
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

async fn file_brain(config: Value, home: PathBuf) -> Result<Arc<dyn SimpleBrain>> {
    let config: FileBrainConfig = if config.is_null() {
        serde_json::from_value(Value::Object(Default::default()))?
    } else {
        serde_json::from_value(config)?
    };
    let dir = if config.brain_directory.is_absolute() {
        config.brain_directory
    } else {
        home.join(config.brain_directory)
    };
    let file: Arc<dyn SimpleBrain> = Arc::new(FileBrain::open(dir).await?);
    if config.write_behind {
        Ok(Arc::new(CachedBrain::new(file, config.queue_size)))
    } else {
        Ok(file)
    }
}
