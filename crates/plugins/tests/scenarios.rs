//! Conversations with a full robot over the test connector.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::task::JoinHandle,
    warren_channels::{Connector, TestConnector, TestMessage},
    warren_common::TaskRetVal,
    warren_engine::{Engine, Result, Robot, TaskDef, TaskHandler, TaskRegistry},
};

const ROBOT: &str = r#"
Name: bender
Alias: ";"
Protocol: test
Brain: mem
HistoryProvider: mem
AdminUsers: ["u0001"]
DefaultChannels: ["general", "random"]
"#;

/// Only the helpdesk may ask `whoami`.
const PING_OVERRIDE: &str = r#"
Authorizer: groups
AuthRequire: helpdesk
AuthorizedCommands: ["whoami"]
"#;

const GROUPS_OVERRIDE: &str = r#"
Config:
  Groups:
    helpdesk: ["alice"]
"#;

const REPORTING_CONFIG: &str = r#"
CommandMatchers:
- Command: break
  Regex: 'break something'
- Command: fix
  Regex: 'fix something'
"#;

/// Fails on `break` so the fail task runs; `fix` adds a final task.
struct Reporting;

#[async_trait]
impl TaskHandler for Reporting {
    async fn handle(&self, r: &Robot, command: &str, _args: &[String]) -> TaskRetVal {
        match command {
            "break" => {
                r.fail_task("fail-report", &[]);
                TaskRetVal::Fail
            },
            "fix" => {
                r.final_task("update-report", &[]);
                TaskRetVal::Normal
            },
            _ => TaskRetVal::Normal,
        }
    }
}

struct Robotic {
    engine: Arc<Engine>,
    tc: Arc<TestConnector>,
    run: JoinHandle<Result<()>>,
    _dir: tempfile::TempDir,
}

impl Robotic {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("conf");
        std::fs::create_dir_all(conf.join("plugins")).unwrap();
        std::fs::write(conf.join("robot.yaml"), ROBOT).unwrap();
        std::fs::write(conf.join("plugins/ping.yaml"), PING_OVERRIDE).unwrap();
        std::fs::write(conf.join("plugins/groups.yaml"), GROUPS_OVERRIDE).unwrap();

        let tc = Arc::new(
            TestConnector::from_value(serde_json::json!({
                "BotName": "bender",
                "Users": [
                    {"Name": "alice", "InternalID": "u0001"},
                    {"Name": "bob", "InternalID": "u0002"},
                    {"Name": "carol", "InternalID": "u0003"},
                    {"Name": "david", "InternalID": "u0004"}
                ]
            }))
            .unwrap(),
        );
        let mut tasks = TaskRegistry::new();
        warren_plugins::register_all(&mut tasks).unwrap();
        tasks
            .register(
                TaskDef::plugin("reporting", Arc::new(Reporting)).with_config(REPORTING_CONFIG),
            )
            .unwrap();
        let engine = Arc::new(
            Engine::builder(dir.path())
                .tasks(tasks)
                .connector(Arc::clone(&tc) as Arc<dyn Connector>)
                .build()
                .await
                .unwrap(),
        );
        let run = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };
        Self {
            engine,
            tc,
            run,
            _dir: dir,
        }
    }

    fn send(&self, user: &str, channel: &str, text: &str) {
        self.tc.send(user, channel, text);
    }

    async fn next(&self, within: Duration) -> TestMessage {
        self.tc.recv(within).await.expect("the robot said nothing")
    }

    async fn expect(&self, user: &str, channel: &str, message: &str) {
        assert_eq!(
            self.next(Duration::from_secs(2)).await,
            TestMessage::new(user, channel, message)
        );
    }

    async fn stop(self) {
        self.engine.shutdown();
        self.run.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn ping_by_name_and_alias() {
    let r = Robotic::start().await;
    r.send("alice", "general", "bender, ping");
    r.expect("alice", "general", "PONG").await;
    r.send("alice", "general", ";ping");
    r.expect("alice", "general", "PONG").await;
    r.stop().await;
}

#[tokio::test]
async fn echo_captures_arguments_and_hides_replies() {
    let r = Robotic::start().await;
    r.send("bob", "general", "bender: echo hello world");
    r.expect("", "general", "Sure thing: hello world").await;
    r.send("bob", "general", "/bender: echo hello world");
    r.expect("", "general", "(Sure thing: hello world)").await;
    r.stop().await;
}

#[tokio::test]
async fn adding_to_a_new_list_asks_first() {
    let r = Robotic::start().await;
    r.send("alice", "general", ";add bananas to the grocery list");
    r.expect(
        "alice",
        "general",
        "I don't have a 'grocery' list, do you want to create it?",
    )
    .await;
    r.send("alice", "general", "yes");
    r.expect(
        "",
        "general",
        "Ok, I created a new grocery list and added bananas to it",
    )
    .await;

    // The list and item are now the conversation's context.
    r.send("alice", "general", ";add apples to the list");
    r.expect("", "general", "Ok, I added apples to the grocery list")
        .await;
    r.send("alice", "general", ";show the grocery list");
    r.expect(
        "",
        "general",
        "Here's what I have on the grocery list:\nbananas\napples",
    )
    .await;
    r.stop().await;
}

#[tokio::test]
async fn declining_the_prompt_adds_nothing() {
    let r = Robotic::start().await;
    r.send("bob", "random", ";add socks to the laundry list");
    r.expect(
        "bob",
        "random",
        "I don't have a 'laundry' list, do you want to create it?",
    )
    .await;
    r.send("bob", "random", "no");
    r.expect("", "random", "Item not added").await;
    r.send("bob", "random", ";list lists");
    r.expect("", "random", "I don't have any lists").await;
    r.stop().await;
}

#[tokio::test]
async fn list_created_while_waiting_is_detected() {
    let r = Robotic::start().await;
    r.send("alice", "general", ";add burgers to the meals list");
    r.expect(
        "alice",
        "general",
        "I don't have a 'meals' list, do you want to create it?",
    )
    .await;
    r.send("bob", "random", ";add burgers to the meals list");
    r.expect(
        "bob",
        "random",
        "I don't have a 'meals' list, do you want to create it?",
    )
    .await;
    r.send("bob", "random", "yes");
    r.expect(
        "",
        "random",
        "Ok, I created a new meals list and added burgers to it",
    )
    .await;
    r.send("alice", "general", "yes");
    r.expect(
        "",
        "general",
        "Somebody already created the meals list and added burgers to it",
    )
    .await;
    r.stop().await;
}

#[tokio::test]
async fn remember_waits_for_the_datum_lock() {
    let r = Robotic::start().await;
    r.send("carol", "random", ";remember slowly The Alamo");
    r.expect(
        "",
        "random",
        "Ok, I'll remember \"The Alamo\" ... but sloooowly",
    )
    .await;

    // carol holds the lock for a few seconds; alice queues behind her.
    r.send("alice", "random", ";remember Ferris Bueller");
    let first = r.next(Duration::from_secs(10)).await;
    assert_eq!(
        first,
        TestMessage::new("", "random", "Ok, I'll remember \"Ferris Bueller\"")
    );
    r.expect("", "random", "committed to memory").await;

    r.send("bob", "random", "recall, bender");
    r.expect(
        "",
        "random",
        "Here's what I remember:\n1: The Alamo\n2: Ferris Bueller",
    )
    .await;
    r.send("bob", "random", ";recall 2");
    r.expect("", "random", "Ferris Bueller").await;
    r.send("carol", "random", ";remember Ferris Bueller");
    r.expect("", "random", "That's already one of my fondest memories")
        .await;
    r.send("david", "random", ";forget 1");
    r.expect("", "random", "Ok, I'll forget \"The Alamo\"").await;
    r.stop().await;
}

#[tokio::test]
async fn short_term_facts_stay_with_the_user_and_channel() {
    let r = Robotic::start().await;
    r.send("david", "general", "bender, what is Ferris Bueller?");
    r.expect("david", "general", "Gosh, I have no idea what Ferris Bueller is")
        .await;
    r.send("david", "general", ";store Ferris Bueller is a Righteous Dude");
    r.expect(
        "",
        "general",
        "I'll remember \"Ferris Bueller\" is \"a Righteous Dude\" - but eventually I'll forget!",
    )
    .await;
    r.send("david", "general", "bender, what is Ferris Bueller?");
    r.expect("", "general", "Ferris Bueller is a Righteous Dude")
        .await;
    r.send("carol", "general", "bender, what is Ferris Bueller?");
    r.expect("carol", "general", "Gosh, I have no idea what Ferris Bueller is")
        .await;
    r.send("david", "random", "bender, what is Ferris Bueller?");
    r.expect("david", "random", "Gosh, I have no idea what Ferris Bueller is")
        .await;
    r.stop().await;
}

#[tokio::test]
async fn help_for_a_keyword_and_for_an_empty_channel() {
    let r = Robotic::start().await;
    r.send("alice", "general", ";help ping");
    let help = r.next(Duration::from_secs(2)).await;
    assert_eq!(help.channel, "general");
    assert!(help.message.starts_with("Command(s) matching keyword: ping"));
    assert!(
        help.message
            .contains("bender, ping - see if the robot is alive (channels: general, random)")
    );

    r.send("alice", "deserted", ";help");
    r.expect(
        "",
        "deserted",
        "bender, help <keyword> - get help for the commands matching <keyword>\n\
         bender, info - basic information about me, including my administrators",
    )
    .await;
    r.stop().await;
}

#[tokio::test]
async fn group_membership_authorizes_commands() {
    let r = Robotic::start().await;
    r.send("alice", "general", ";whoami");
    let answer = r.next(Duration::from_secs(2)).await;
    assert!(
        answer.message.contains("user 'alice/u0001', speaking in channel 'general/general'"),
        "{answer:?}"
    );
    r.send("bob", "general", ";whoami");
    r.expect("bob", "general", "Sorry, you're not authorized for that command")
        .await;
    r.send("bob", "general", ";show the helpdesk group");
    r.expect("", "general", "Here's who is in the helpdesk group:\nalice")
        .await;
    r.stop().await;
}

#[tokio::test]
async fn report_tasks_name_the_pipeline() {
    let r = Robotic::start().await;
    r.send("alice", "general", ";break something");
    let failed = r.next(Duration::from_secs(2)).await;
    assert!(failed.message.starts_with("Pipeline failed: "), "{failed:?}");
    r.send("alice", "general", ";fix something");
    let fixed = r.next(Duration::from_secs(2)).await;
    assert!(fixed.message.starts_with("Pipeline succeeded: "), "{fixed:?}");
    r.stop().await;
}
