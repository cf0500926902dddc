use std::collections::HashMap;

use {
    async_trait::async_trait,
    tokio_util::sync::CancellationToken,
    warren_common::{ConnectorMessage, MessageFormat, Protocol, RetVal},
};

/// The engine side of a connector: where inbound messages go.
#[async_trait]
pub trait ConnectorHandler: Send + Sync {
    /// Must return promptly; the connector's read loop waits on it.
    async fn incoming_message(&self, msg: ConnectorMessage);
}

/// A chat protocol adapter.
///
/// Send methods never panic. Failures come back as [`RetVal`]
/// (`FailedMessageSend`, `ChannelNotFound`, `UserNotFound`,
/// `FailedChannelJoin`) and the engine treats every send as best-effort.
/// `orig` is the message being answered, when there is one; connectors use
/// it for protocol-native threading and to honour `hidden_message`.
#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Blocks until `stop` is cancelled, delivering inbound traffic to
    /// `handler`.
    async fn run(&self, handler: std::sync::Arc<dyn ConnectorHandler>, stop: CancellationToken);

    /// Post to a channel. An empty `thread` posts at top level.
    async fn send_protocol_channel_thread_message(
        &self,
        channel: &str,
        thread: &str,
        msg: &str,
        format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal;

    /// Post in a channel, mentioning the user.
    async fn send_protocol_user_channel_thread_message(
        &self,
        user_id: &str,
        user_name: &str,
        channel: &str,
        thread: &str,
        msg: &str,
        format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal;

    /// Direct message. `user` is an id or a name.
    async fn send_protocol_user_message(
        &self,
        user: &str,
        msg: &str,
        format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal;

    async fn join_channel(&self, channel: &str) -> RetVal;

    /// Typing indicator.
    async fn message_heard(&self, _user: &str, _channel: &str) {}

    /// Operator-supplied name → protocol id map from the user roster.
    fn set_user_map(&self, map: HashMap<String, String>);

    /// `email`, `realName`/`fullName`, `firstName`, `lastName`, `phone`,
    /// `sms`, `internalID`. Errors are `UserNotFound` or `AttributeNotFound`.
    async fn get_protocol_user_attribute(&self, user: &str, attr: &str) -> Result<String, RetVal>;

    fn format_help(&self, line: &str) -> String {
        line.to_string()
    }

    /// Replaces the built-in two-line help when non-empty.
    fn default_help(&self) -> Vec<String> {
        Vec::new()
    }
}
