//! In-process connector for end-to-end tests.
//!
//! Tests push inbound traffic with [`TestConnector::send`], or build a
//! message with [`TestConnector::message`], adjust its flags and hand it to
//! [`TestConnector::inject`]. They read what the robot said with [`TestConnector::recv`]. A reply to a user in a channel
//! carries that user's name; a plain channel message has an empty user; a
//! direct message has an empty channel. Replies to hidden messages are
//! wrapped in parentheses.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    warren_common::{ConnectorMessage, MessageFormat, Protocol, RetVal},
};

use crate::{
    Result,
    connector::{Connector, ConnectorHandler},
    users::{ConnectorUser, lookup},
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestConfig {
    pub bot_name: String,
    pub bot_full_name: String,
    pub users: Vec<ConnectorUser>,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub user: String,
    pub channel: String,
    pub message: String,
}

impl TestMessage {
    pub fn new(user: &str, channel: &str, message: &str) -> Self {
        Self {
            user: user.to_string(),
            channel: channel.to_string(),
            message: message.to_string(),
        }
    }
}

pub struct TestConnector {
    config: TestConfig,
    user_map: RwLock<HashMap<String, String>>,
    inbound_tx: mpsc::UnboundedSender<ConnectorMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectorMessage>>>,
    outbound_tx: mpsc::UnboundedSender<TestMessage>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<TestMessage>>,
    next_id: AtomicU64,
}

impl TestConnector {
    pub fn new(config: TestConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            config,
            user_map: RwLock::new(HashMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_value(config: Value) -> Result<Self> {
        let config = if config.is_null() {
            TestConfig::default()
        } else {
            serde_json::from_value(config)?
        };
        Ok(Self::new(config))
    }

    /// Deliver `message` from `user` in `channel`; an empty channel is a DM.
    pub fn send(&self, user: &str, channel: &str, message: &str) {
        self.inject(self.message(user, channel, message));
    }

    /// The message [`send`](Self::send) would deliver.
    pub fn message(&self, user: &str, channel: &str, message: &str) -> ConnectorMessage {
        self.to_connector_message(TestMessage::new(user, channel, message))
    }

    pub fn inject(&self, message: ConnectorMessage) {
        if self.inbound_tx.send(message).is_err() {
            warn!("test connector inbound queue closed");
        }
    }

    /// Next thing the robot said, or `None` after `timeout`.
    pub async fn recv(&self, timeout: Duration) -> Option<TestMessage> {
        let mut rx = self.outbound_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Whatever is already queued, without waiting.
    pub async fn drain(&self) -> Vec<TestMessage> {
        let mut rx = self.outbound_rx.lock().await;
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn user_id(&self, name: &str) -> String {
        if let Some(u) = lookup(&self.config.users, name)
            && !u.internal_id.is_empty()
        {
            return u.internal_id.clone();
        }
        let map = self.user_map.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned().unwrap_or_else(|| name.to_string())
    }

    fn user_name(&self, user: &str) -> Option<String> {
        if let Some(u) = lookup(&self.config.users, user) {
            return Some(u.name.clone());
        }
        let map = self.user_map.read().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(user) {
            return Some(user.to_string());
        }
        map.iter()
            .find(|(_, id)| id.as_str() == user)
            .map(|(name, _)| name.clone())
    }

    fn known_channel(&self, channel: &str) -> bool {
        self.config.channels.is_empty() || self.config.channels.iter().any(|c| c == channel)
    }

    fn to_connector_message(&self, m: TestMessage) -> ConnectorMessage {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ConnectorMessage {
            protocol: Protocol::Test.as_str().to_string(),
            user_id: self.user_id(&m.user),
            user_name: m.user,
            channel_id: m.channel.clone(),
            direct_message: m.channel.is_empty(),
            channel_name: m.channel,
            message_id: id.to_string(),
            message_text: m.message,
            ..Default::default()
        }
    }

    fn emit(
        &self,
        user: &str,
        channel: &str,
        msg: &str,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        let message = if orig.is_some_and(|o| o.hidden_message) {
            format!("({msg})")
        } else {
            msg.to_string()
        };
        debug!(user, channel, message = %message, "test connector send");
        match self.outbound_tx.send(TestMessage {
            user: user.to_string(),
            channel: channel.to_string(),
            message,
        }) {
            Ok(()) => RetVal::Ok,
            Err(_) => RetVal::FailedMessageSend,
        }
    }
}

#[async_trait]
impl Connector for TestConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Test
    }

    async fn run(&self, handler: Arc<dyn ConnectorHandler>, stop: CancellationToken) {
        let Some(mut rx) = self.inbound_rx.lock().await.take() else {
            warn!("test connector already running");
            return;
        };
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(m) => handler.incoming_message(m).await,
                    None => break,
                },
            }
        }
        *self.inbound_rx.lock().await = Some(rx);
        debug!("test connector stopped");
    }

    async fn send_protocol_channel_thread_message(
        &self,
        channel: &str,
        _thread: &str,
        msg: &str,
        _format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        if !self.known_channel(channel) {
            return RetVal::ChannelNotFound;
        }
        self.emit("", channel, msg, orig)
    }

    async fn send_protocol_user_channel_thread_message(
        &self,
        user_id: &str,
        user_name: &str,
        channel: &str,
        _thread: &str,
        msg: &str,
        _format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        if !self.known_channel(channel) {
            return RetVal::ChannelNotFound;
        }
        let name = if user_name.is_empty() {
            match self.user_name(user_id) {
                Some(n) => n,
                None => return RetVal::UserNotFound,
            }
        } else {
            user_name.to_string()
        };
        self.emit(&name, channel, msg, orig)
    }

    async fn send_protocol_user_message(
        &self,
        user: &str,
        msg: &str,
        _format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        match self.user_name(user) {
            Some(name) => self.emit(&name, "", msg, orig),
            None => RetVal::UserNotFound,
        }
    }

    async fn join_channel(&self, channel: &str) -> RetVal {
        if self.known_channel(channel) {
            RetVal::Ok
        } else {
            RetVal::FailedChannelJoin
        }
    }

    fn set_user_map(&self, map: HashMap<String, String>) {
        *self.user_map.write().unwrap_or_else(|e| e.into_inner()) = map;
    }

    async fn get_protocol_user_attribute(
        &self,
        user: &str,
        attr: &str,
    ) -> std::result::Result<String, RetVal> {
        let u = lookup(&self.config.users, user).ok_or(RetVal::UserNotFound)?;
        u.attribute(attr)
            .map(str::to_string)
            .ok_or(RetVal::AttributeNotFound)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    struct Collect(mpsc::UnboundedSender<ConnectorMessage>);

    #[async_trait]
    impl ConnectorHandler for Collect {
        async fn incoming_message(&self, msg: ConnectorMessage) {
            let _ = self.0.send(msg);
        }
    }

    fn connector() -> Arc<TestConnector> {
        Arc::new(
            TestConnector::from_value(json!({
                "BotName": "bender",
                "Users": [
                    {"Name": "alice", "InternalID": "u0001", "Email": "alice@example.com"},
                    {"Name": "bob", "InternalID": "u0002"}
                ],
                "Channels": ["general", "random"]
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn inbound_messages_reach_handler() {
        let tc = connector();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let run = {
            let tc = Arc::clone(&tc);
            let stop = stop.clone();
            tokio::spawn(async move { tc.run(Arc::new(Collect(tx)), stop).await })
        };
        tc.send("alice", "general", "bender, ping");
        tc.send("bob", "", "ping");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.user_id, "u0001");
        assert_eq!(first.channel_name, "general");
        assert!(!first.direct_message);
        let second = rx.recv().await.unwrap();
        assert!(second.direct_message);
        assert_ne!(first.message_id, second.message_id);

        let mut echo = tc.message("bender", "general", "ping");
        echo.self_message = true;
        tc.inject(echo);
        let third = rx.recv().await.unwrap();
        assert!(third.self_message);
        assert_eq!(third.message_text, "ping");
        stop.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn sends_are_captured() {
        let tc = connector();
        let f = MessageFormat::Variable;
        assert_eq!(
            tc.send_protocol_user_channel_thread_message(
                "u0001", "", "general", "", "PONG", f, None
            )
            .await,
            RetVal::Ok
        );
        let hidden = ConnectorMessage {
            hidden_message: true,
            ..Default::default()
        };
        tc.send_protocol_channel_thread_message("general", "", "shh", f, Some(&hidden))
            .await;
        tc.send_protocol_user_message("bob", "psst", f, None).await;

        let got = tc.drain().await;
        assert_eq!(got, vec![
            TestMessage::new("alice", "general", "PONG"),
            TestMessage::new("", "general", "(shh)"),
            TestMessage::new("bob", "", "psst"),
        ]);
    }

    #[tokio::test]
    async fn unknown_targets() {
        let tc = connector();
        let f = MessageFormat::Variable;
        assert_eq!(
            tc.send_protocol_channel_thread_message("nowhere", "", "x", f, None).await,
            RetVal::ChannelNotFound
        );
        assert_eq!(
            tc.send_protocol_user_message("mallory", "x", f, None).await,
            RetVal::UserNotFound
        );
        assert!(tc.recv(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn attributes_and_roster() {
        let tc = connector();
        assert_eq!(
            tc.get_protocol_user_attribute("alice", "email").await.unwrap(),
            "alice@example.com"
        );
        assert_eq!(
            tc.get_protocol_user_attribute("bob", "email").await,
            Err(RetVal::AttributeNotFound)
        );
        assert_eq!(
            tc.get_protocol_user_attribute("carol", "email").await,
            Err(RetVal::UserNotFound)
        );
        tc.set_user_map(HashMap::from([("carol".to_string(), "u0003".to_string())]));
        assert_eq!(
            tc.send_protocol_user_message("u0003", "hi", MessageFormat::Raw, None).await,
            RetVal::Ok
        );
        assert_eq!(tc.drain().await[0].user, "carol");
    }
}
