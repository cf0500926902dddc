//! Storage contract implemented by brain back-ends.

use async_trait::async_trait;

use crate::Result;

/// A flat key/blob store.
///
/// Back-ends need not order or lock anything themselves: [`crate::Brain`]
/// serializes access per key. A back-end may acknowledge a `store` before the
/// data reaches its durable medium, but must not lose it afterwards under
/// normal operation.
#[async_trait]
pub trait SimpleBrain: Send + Sync {
    async fn store(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Every key, aggregated across pages if the back-end pages.
    async fn list(&self) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Flush anything still queued. Called once at robot shutdown.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
