//! The robot engine.
//!
//! An [`Engine`] owns the running configuration ([`Snapshot`]), the
//! connector, the brain and the history provider. Inbound messages are
//! matched against plugin commands and ambient patterns, and every match
//! starts a pipeline. Task code talks to the robot through [`Robot`].

mod builtins;
pub mod control;
mod dispatch;
pub mod elevation;
pub mod engine;
pub mod error;
pub mod exclusive;
mod external;
pub mod log_capture;
pub mod matcher;
pub mod pipeline;
pub mod prompt;
pub mod robot;
mod scheduler;
pub mod snapshot;
pub mod subscription;
pub mod task;

pub use {
    engine::{Engine, EngineBuilder},
    error::{Error, Result},
    log_capture::{LogCapture, LogCaptureLayer},
    robot::Robot,
    snapshot::{Snapshot, Task},
    task::{TaskDef, TaskHandler, TaskKind, TaskRegistry},
};
