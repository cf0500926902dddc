//! Interactive connector on stdin/stdout.
//!
//! Lines are sent as the current user in the current channel. `|c<name>`
//! switches channel (`|c` alone for a direct message), `|u<name>` switches
//! user, `|?` lists both.

use std::{
    collections::HashMap,
    io::Write,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
    tokio::io::{AsyncBufReadExt, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    warren_common::{ConnectorMessage, MessageFormat, Protocol, RetVal},
};

use crate::{
    Result,
    connector::{Connector, ConnectorHandler},
    users::{ConnectorUser, lookup},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TerminalConfig {
    pub start_channel: String,
    pub start_user: String,
    pub users: Vec<ConnectorUser>,
    pub channels: Vec<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            start_channel: "general".into(),
            start_user: "alice".into(),
            users: Vec::new(),
            channels: Vec::new(),
        }
    }
}

struct Session {
    user: String,
    channel: String,
}

pub struct TerminalConnector {
    config: TerminalConfig,
    session: Mutex<Session>,
    user_map: RwLock<HashMap<String, String>>,
    next_id: AtomicU64,
}

enum Input {
    Say(ConnectorMessage),
    Control(String),
}

impl TerminalConnector {
    pub fn new(config: TerminalConfig) -> Self {
        let session = Session {
            user: config.start_user.clone(),
            channel: config.start_channel.clone(),
        };
        Self {
            config,
            session: Mutex::new(session),
            user_map: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_value(config: Value) -> Result<Self> {
        let config = if config.is_null() {
            TerminalConfig::default()
        } else {
            serde_json::from_value(config)?
        };
        Ok(Self::new(config))
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

    fn parse_line(&self, line: &str) -> Input {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rest) = line.strip_prefix("|c") {
            session.channel = rest.trim().to_string();
            let shown = if session.channel.is_empty() {
                "(direct message)".to_string()
            } else {
                session.channel.clone()
            };
            return Input::Control(format!("Changed current channel to: {shown}"));
        }
        if let Some(rest) = line.strip_prefix("|u") {
            let user = rest.trim();
            if user.is_empty() {
                return Input::Control("Usage: |u<user>".into());
            }
            session.user = user.to_string();
            return Input::Control(format!("Changed current user to: {user}"));
        }
        if line.starts_with("|?") {
            let users: Vec<&str> = self.config.users.iter().map(|u| u.name.as_str()).collect();
            return Input::Control(format!(
                "Users: {}\nChannels: {}",
                users.join(", "),
                self.config.channels.join(", ")
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Input::Say(ConnectorMessage {
            protocol: Protocol::Terminal.as_str().to_string(),
            user_name: session.user.clone(),
            user_id: self.user_id(&session.user),
            channel_name: session.channel.clone(),
            channel_id: session.channel.clone(),
            direct_message: session.channel.is_empty(),
            message_id: id.to_string(),
            message_text: line.to_string(),
            ..Default::default()
        })
    }

    fn print(&self, venue: &str, msg: &str, orig: Option<&ConnectorMessage>) -> RetVal {
        let body = if orig.is_some_and(|o| o.hidden_message) {
            format!("({msg})")
        } else {
            msg.to_string()
        };
        let mut out = std::io::stdout().lock();
        match writeln!(out, "{venue}: {body}") {
            Ok(()) => RetVal::Ok,
            Err(_) => RetVal::FailedMessageSend,
        }
    }
}

#[async_trait]
impl Connector for TerminalConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Terminal
    }

    async fn run(&self, handler: Arc<dyn ConnectorHandler>, stop: CancellationToken) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("terminal connector reading stdin; |? for help");
        loop {
            let line = tokio::select! {
                () = stop.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => {},
                Ok(Some(line)) => match self.parse_line(line.trim()) {
                    Input::Say(msg) => handler.incoming_message(msg).await,
                    Input::Control(text) => {
                        self.print("terminal", &text, None);
                    },
                },
                Ok(None) => {
                    info!("terminal connector reached end of input");
                    stop.cancelled().await;
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "reading terminal input");
                    break;
                },
            }
        }
    }

    async fn send_protocol_channel_thread_message(
        &self,
        channel: &str,
        thread: &str,
        msg: &str,
        _format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        if thread.is_empty() {
            self.print(channel, msg, orig)
        } else {
            self.print(&format!("{channel}(thread:{thread})"), msg, orig)
        }
    }

    async fn send_protocol_user_channel_thread_message(
        &self,
        _user_id: &str,
        user_name: &str,
        channel: &str,
        _thread: &str,
        msg: &str,
        _format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        self.print(channel, &format!("@{user_name} {msg}"), orig)
    }

    async fn send_protocol_user_message(
        &self,
        user: &str,
        msg: &str,
        _format: MessageFormat,
        orig: Option<&ConnectorMessage>,
    ) -> RetVal {
        self.print(&format!("(dm:{user})"), msg, orig)
    }

    async fn join_channel(&self, _channel: &str) -> RetVal {
        RetVal::Ok
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

    fn format_help(&self, line: &str) -> String {
        format!("  {line}")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_lines_switch_session() {
        let tc = TerminalConnector::new(TerminalConfig::default());
        assert!(matches!(tc.parse_line("|crandom"), Input::Control(_)));
        assert!(matches!(tc.parse_line("|ubob"), Input::Control(_)));
        let Input::Say(msg) = tc.parse_line("ping") else {
            panic!("expected a message");
        };
        assert_eq!(msg.user_name, "bob");
        assert_eq!(msg.channel_name, "random");
        assert!(!msg.direct_message);

        tc.parse_line("|c");
        let Input::Say(dm) = tc.parse_line("ping") else {
            panic!("expected a message");
        };
        assert!(dm.direct_message);
    }
}
