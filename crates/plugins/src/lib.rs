//! Native plugins and tasks that ship with the robot.
//!
//! Each module exposes a `def()` returning the [`TaskDef`] with its default
//! configuration; [`register_all`] adds every one of them to a registry.

pub mod groups;
pub mod lists;
pub mod memory;
pub mod ping;
pub mod reports;

use warren_engine::{Result, TaskDef, TaskRegistry};

/// Everything in this crate, in registration order.
pub fn defs() -> Vec<TaskDef> {
    vec![
        ping::def(),
        lists::def(),
        memory::def(),
        groups::def(),
        reports::fail_report(),
        reports::update_report(),
    ]
}

pub fn register_all(registry: &mut TaskRegistry) -> Result<()> {
    for def in defs() {
        registry.register(def)?;
    }
    Ok(())
}
