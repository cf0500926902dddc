//! In-memory brain. Contents vanish at exit.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{Result, store::SimpleBrain};

#[derive(Default)]
pub struct MemBrain {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemBrain {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimpleBrain for MemBrain {
    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.remove(key);
        Ok(())
    }
}
