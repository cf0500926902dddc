//! Connector registration table, keyed by `Protocol` name.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;

use crate::{
    Error, Result, connector::Connector, terminal::TerminalConnector,
    test_connector::TestConnector,
};

/// Builds a connector from its `ProtocolConfig` block.
pub type ConnectorConstructor = fn(Value) -> Result<Arc<dyn Connector>>;

pub struct ConnectorRegistry {
    constructors: BTreeMap<String, ConnectorConstructor>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        let mut reg = Self {
            constructors: BTreeMap::new(),
        };
        reg.register("terminal", build_terminal);
        reg.register("test", build_test);
        reg
    }
}

impl ConnectorRegistry {
    pub fn register(&mut self, protocol: &str, ctor: ConnectorConstructor) {
        self.constructors.insert(protocol.to_ascii_lowercase(), ctor);
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.constructors
            .contains_key(&protocol.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    pub fn build(&self, protocol: &str, config: Value) -> Result<Arc<dyn Connector>> {
        let ctor = self
            .constructors
            .get(&protocol.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownProtocol {
                name: protocol.to_string(),
            })?;
        ctor(config)
    }
}

fn build_terminal(config: Value) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(TerminalConnector::from_value(config)?))
}

fn build_test(config: Value) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(TestConnector::from_value(config)?))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, warren_common::Protocol};

    #[test]
    fn builds_registered_protocols() {
        let reg = ConnectorRegistry::default();
        assert_eq!(reg.names(), vec!["terminal", "test"]);
        let c = reg.build("Terminal", Value::Null).unwrap();
        assert_eq!(c.protocol(), Protocol::Terminal);
        assert!(matches!(
            reg.build("slack", Value::Null).err().unwrap(),
            Error::UnknownProtocol { .. }
        ));
    }

    #[test]
    fn bad_protocol_config() {
        let reg = ConnectorRegistry::default();
        assert!(reg.build("test", serde_json::json!({"Users": 5})).is_err());
    }
}
