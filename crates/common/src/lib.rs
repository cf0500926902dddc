//! Shared types, return codes, and error definitions used across all warren crates.
//!
//! Everything a task, connector, or brain back-end needs to speak to the
//! engine lives here so those crates never depend on the engine itself.

pub mod error;
pub mod level;
pub mod message;
pub mod retval;

pub use {
    error::{Error, FromMessage, Result},
    level::LogLevel,
    message::{ConnectorMessage, Message, MessageFormat, MessageKind, Opaque, Protocol},
    retval::{RetVal, TaskRetVal},
};
