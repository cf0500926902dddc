//! Per-pipeline run logs.
//!
//! Every job run gets a [`HistoryLogger`] opened by the configured
//! [`HistoryProvider`] at a monotonically increasing index. Old runs past the
//! job's retention count are pruned when a new one opens.

pub mod error;
pub mod file;
pub mod memory;
pub mod provider;
pub mod registry;

pub use {
    error::{Error, Result},
    file::FileHistory,
    memory::MemHistory,
    provider::{HistoryLogger, HistoryProvider, NullLogger},
    registry::HistoryRegistry,
};
