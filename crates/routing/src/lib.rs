//! Decide whether an inbound message is addressed to the robot.
//!
//! Forms recognised, in order:
//! 1. Hidden: `/<name> <command>`
//! 2. Prefix: `<alias><command>`, `<name>, <command>`, `@<name> <command>`
//! 3. Suffix: `<command>, <name>`
//! 4. Bare name on its own

pub mod address;
pub mod error;

pub use {
    address::{AddressMatcher, Addressed, valid_alias},
    error::{Error, Result},
};
