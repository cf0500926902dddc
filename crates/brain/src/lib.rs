//! Long- and short-term memory for the robot.
//!
//! A [`SimpleBrain`] back-end stores opaque blobs by key. The [`Brain`] layer
//! on top validates keys, serializes values as JSON and enforces the
//! check-out / update lock discipline. [`ShortTermMemory`] is process-local
//! and never persisted.

pub mod cached;
pub mod error;
pub mod layer;
pub mod registry;
pub mod short_term;
pub mod store;
pub mod store_file;
pub mod store_memory;

pub use {
    error::{Error, Result},
    layer::{Brain, Checkout, valid_key},
    registry::BrainRegistry,
    short_term::{MemoryScope, ShortTermMemory},
    store::SimpleBrain,
};
