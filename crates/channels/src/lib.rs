//! Chat protocol connectors.
//!
//! A [`Connector`] delivers inbound [`warren_common::ConnectorMessage`]s to a
//! [`ConnectorHandler`] and accepts outbound sends. Concrete connectors are
//! created by name through the [`ConnectorRegistry`].

pub mod connector;
pub mod error;
pub mod gating;
pub mod registry;
pub mod terminal;
pub mod test_connector;
pub mod users;

pub use {
    connector::{Connector, ConnectorHandler},
    error::{Error, Result},
    registry::{ConnectorConstructor, ConnectorRegistry},
    terminal::{TerminalConfig, TerminalConnector},
    test_connector::{TestConfig, TestConnector, TestMessage},
    users::ConnectorUser,
};
