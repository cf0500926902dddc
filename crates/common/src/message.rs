//! Inbound message types shared by connectors and the engine.

use std::{any::Any, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

/// Outgoing rendering hint for connectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageFormat {
    /// Pass text through untouched.
    Raw,
    /// Monospace / code block.
    Fixed,
    /// Connector-specific markup (mentions, formatting).
    #[default]
    Variable,
}

impl FromStr for MessageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "fixed" => Ok(Self::Fixed),
            "variable" => Ok(Self::Variable),
            other => Err(format!("unknown message format: {other}")),
        }
    }
}

/// Known protocols. Anything else keeps its configured name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Slack,
    Rocket,
    Terminal,
    Ssh,
    Test,
    Null,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Slack => "slack",
            Self::Rocket => "rocket",
            Self::Terminal => "terminal",
            Self::Ssh => "ssh",
            Self::Test => "test",
            Self::Null => "nullconn",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "slack" => Self::Slack,
            "rocket" => Self::Rocket,
            "terminal" => Self::Terminal,
            "ssh" => Self::Ssh,
            "test" => Self::Test,
            "nullconn" | "null" => Self::Null,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the message on the protocol side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    Normal,
    Edited,
    Deleted,
}

/// Protocol-native handle carried through the engine without inspection.
#[derive(Clone)]
pub struct Opaque(pub Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opaque(..)")
    }
}

/// A message as delivered by a connector. Never mutated after ingress.
#[derive(Debug, Clone, Default)]
pub struct ConnectorMessage {
    pub protocol: String,
    pub user_name: String,
    pub user_id: String,
    pub channel_name: String,
    pub channel_id: String,
    pub thread_id: String,
    pub message_id: String,
    pub threaded_message: bool,
    pub direct_message: bool,
    /// The connector is certain the message targets the robot.
    pub bot_message: bool,
    /// Invisible to other users.
    pub hidden_message: bool,
    /// Echo of something the robot itself sent.
    pub self_message: bool,
    pub kind: MessageKind,
    pub message_text: String,
    pub message_object: Option<Opaque>,
    pub client: Option<Opaque>,
}

/// Per-pipeline view of the triggering message.
#[derive(Debug, Clone)]
pub struct Message {
    pub user: String,
    pub protocol_user: String,
    pub channel: String,
    pub protocol_channel: String,
    pub thread_id: String,
    pub threaded: bool,
    pub direct: bool,
    pub hidden: bool,
    pub protocol: Protocol,
    pub format: MessageFormat,
    pub incoming: Option<Arc<ConnectorMessage>>,
}

impl Message {
    pub fn from_incoming(incoming: Arc<ConnectorMessage>) -> Self {
        Self {
            user: incoming.user_name.clone(),
            protocol_user: incoming.user_id.clone(),
            channel: incoming.channel_name.clone(),
            protocol_channel: incoming.channel_id.clone(),
            thread_id: incoming.thread_id.clone(),
            threaded: incoming.threaded_message,
            direct: incoming.direct_message,
            hidden: incoming.hidden_message,
            protocol: Protocol::from(incoming.protocol.as_str()),
            format: MessageFormat::default(),
            incoming: Some(incoming),
        }
    }

    /// A message with no inbound origin, used for scheduled and spawned jobs.
    pub fn synthetic(protocol: Protocol, channel: &str) -> Self {
        Self {
            user: String::new(),
            protocol_user: String::new(),
            channel: channel.to_string(),
            protocol_channel: String::new(),
            thread_id: String::new(),
            threaded: false,
            direct: false,
            hidden: false,
            protocol,
            format: MessageFormat::default(),
            incoming: None,
        }
    }
}
