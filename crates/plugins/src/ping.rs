//! `ping`: liveness checks and small talk.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::Deserialize,
    warren_common::{MessageFormat, TaskRetVal},
    warren_engine::{Robot, TaskDef, TaskHandler},
};

const RULES: &str = "0. A robot may not harm humanity, or, by inaction, allow humanity to come to harm.
1. A robot may not injure a human being or, through inaction, allow a human being to come to harm.
2. A robot must obey any orders given to it by human beings, except where such orders would conflict with the First Law.
3. A robot must protect its own existence as long as such protection does not conflict with the First or Second Law.";

const DEFAULT_CONFIG: &str = r#"
Help:
- Keywords: ["ping"]
  Helptext: ["(bot), ping - see if the robot is alive"]
- Keywords: ["echo"]
  Helptext: ["(bot), echo <text> - repeat what you said"]
- Keywords: ["rules"]
  Helptext: ["(bot), what are the rules? - be sure the robot knows how to conduct itself"]
- Keywords: ["whoami", "user", "identity", "handle", "username"]
  Helptext: ["(bot), whoami - find out what the robot knows about you"]
CommandMatchers:
- Command: ping
  Regex: '(?i:ping)'
- Command: echo
  Regex: '(?i:echo (.*))'
- Command: rules
  Regex: '(?i:(?:what are )?the rules\??)'
- Command: whoami
  Regex: '(?i:whoami|who am I\??)'
- Command: hello
  Regex: '(?i:(?:hi|hello|howdy)!?)'
- Command: thanks
  Regex: '(?i:thanks?(?: you)?!?)'
Config:
  Welcome:
  - "You're welcome!"
  - "Don't mention it"
  - "De nada"
  - "Sure thing"
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PingConfig {
    welcome: Vec<String>,
}

pub fn def() -> TaskDef {
    TaskDef::plugin("ping", Arc::new(Ping)).with_config(DEFAULT_CONFIG)
}

struct Ping;

#[async_trait]
impl TaskHandler for Ping {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        match command {
            "ping" => {
                r.fixed().reply("PONG").await;
            },
            "echo" => {
                let text = args.first().map(String::as_str).unwrap_or_default();
                r.say(&format!("Sure thing: {text}")).await;
            },
            "rules" => {
                r.say(RULES).await;
            },
            "hello" => {
                r.reply("Howdy. Try 'help' if you want usage information.")
                    .await;
            },
            "whoami" => {
                let m = r.message();
                let mut text = format!(
                    "You are '{}' user '{}/{}', speaking in channel '{}/{}'",
                    m.protocol, m.user, m.protocol_user, m.channel, m.protocol_channel
                );
                if let Ok(email) = r.get_sender_attribute("email").await {
                    text.push_str(&format!(", email address: {email}"));
                }
                r.message_format(MessageFormat::Variable).say(&text).await;
            },
            "thanks" => match r.get_task_config::<PingConfig>() {
                Ok(cfg) if !cfg.welcome.is_empty() => {
                    r.reply(&r.random_string(&cfg.welcome)).await;
                },
                _ => {
                    r.reply("I'm speechless. Please have somebody check my log file.")
                        .await;
                },
            },
            _ => {},
        }
        TaskRetVal::Normal
    }
}
