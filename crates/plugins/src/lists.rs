//! `lists`: named lists of items kept in long-term memory.
//!
//! All lists live in a single datum, `listmap`, or `<channel>:listmap` when
//! the plugin is configured with `Scope: channel`. List names are lowercased;
//! items keep their case but compare case-insensitively. The plugin is
//! context aware: "add it to the list" uses the last item and list talked
//! about in the conversation.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::Deserialize,
    tracing::warn,
    warren_common::{RetVal, TaskRetVal},
    warren_engine::{Robot, TaskDef, TaskHandler},
};

const DATUM: &str = "listmap";

const DEFAULT_CONFIG: &str = r#"
Help:
- Keywords: ["list", "lists", "add"]
  Helptext: ["(bot), add <item> to the <type> list - add something to a list"]
- Keywords: ["list", "lists", "remove"]
  Helptext: ["(bot), remove <item> from the <type> list - remove something from a list"]
- Keywords: ["list", "lists", "empty"]
  Helptext: ["(bot), empty the <type> list - remove all items from a list"]
- Keywords: ["list", "lists", "delete"]
  Helptext: ["(bot), delete the <type> list - remove the list altogether"]
- Keywords: ["list", "lists"]
  Helptext: ["(bot), list lists - give a list of all the lists the robot knows about"]
- Keywords: ["list", "lists", "show", "view"]
  Helptext: ["(bot), show the <type> list - show the contents of a list"]
- Keywords: ["pick", "random", "lists", "list"]
  Helptext: ["(bot), pick a random item from the <type> list"]
CommandMatchers:
- Command: add
  Regex: '(?i:add ([\w .-]+?) to (?:the )?(?:([\w -]+?) )?list)'
  Contexts: ["item", "list"]
- Command: list
  Regex: '(?i:list lists)'
- Command: remove
  Regex: '(?i:remove ([\w .-]+?) from (?:the )?(?:([\w -]+?) )?list)'
  Contexts: ["item", "list"]
- Command: empty
  Regex: '(?i:empty (?:the )?(?:([\w -]+?) )?list)'
  Contexts: ["list"]
- Command: delete
  Regex: '(?i:delete (?:the )?(?:([\w -]+?) )?list)'
  Contexts: ["list"]
- Command: show
  Regex: '(?i:show (?:the )?(?:([\w -]+?) )?list)'
  Contexts: ["list"]
- Command: pick
  Regex: '(?i:pick (?:a )?random (?:item )?from (?:the )?(?:([\w -]+?) )?list)'
  Contexts: ["list"]
"#;

const LOAD_FAILED: &str = "I had a problem loading the lists, somebody should check my log file";
const SAVE_FAILED: &str = "Crud. I had a problem saving my lists - somebody better check the log";

type ListMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListsConfig {
    scope: String,
}

impl ListsConfig {
    fn per_channel(&self) -> bool {
        self.scope.eq_ignore_ascii_case("channel")
    }
}

pub fn def() -> TaskDef {
    TaskDef::plugin("lists", Arc::new(Lists)).with_config(DEFAULT_CONFIG)
}

fn contains(list: &[String], item: &str) -> bool {
    list.iter().any(|li| li.eq_ignore_ascii_case(item))
}

fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map(String::as_str).unwrap_or_default()
}

struct Lists;

#[async_trait]
impl TaskHandler for Lists {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        if command == "init" {
            return TaskRetVal::Normal;
        }
        let cfg = r.get_task_config::<ListsConfig>().unwrap_or_default();
        let key = if cfg.per_channel() {
            format!("{}:{DATUM}", r.message().channel)
        } else {
            DATUM.to_string()
        };
        let session = Session { r, key: &key, cfg: &cfg };
        match command {
            "list" => session.list().await,
            "show" => session.show(arg(args, 0)).await,
            "pick" => session.pick(arg(args, 0)).await,
            "add" => session.add(arg(args, 0), arg(args, 1)).await,
            "remove" => session.remove(arg(args, 0), arg(args, 1)).await,
            "empty" | "delete" => session.clear(arg(args, 0), command == "delete").await,
            other => {
                warn!(command = other, "lists: unknown command");
                TaskRetVal::Fail
            },
        }
    }
}

struct Session<'a> {
    r: &'a Robot,
    key: &'a str,
    cfg: &'a ListsConfig,
}

impl Session<'_> {
    /// Check out the list map, telling the user when that fails.
    async fn load(&self, rw: bool) -> Option<(String, ListMap)> {
        match self.r.checkout_datum::<ListMap>(self.key, rw).await {
            Ok(c) => Some((c.token, c.value.unwrap_or_default())),
            Err(ret) => {
                warn!(key = self.key, error = %ret, "lists: checkout failed");
                self.r.reply(LOAD_FAILED).await;
                None
            },
        }
    }

    async fn save(&self, token: &str, lists: &ListMap) -> bool {
        let ret = self.r.update_datum(self.key, token, lists).await;
        if ret != RetVal::Ok {
            warn!(key = self.key, error = %ret, "lists: update failed");
            self.r.reply(SAVE_FAILED).await;
            return false;
        }
        true
    }

    async fn list(&self) -> TaskRetVal {
        let Some((_, lists)) = self.load(false).await else {
            return TaskRetVal::MechanismFail;
        };
        let scope = if self.cfg.per_channel() {
            " for this channel"
        } else {
            ""
        };
        if lists.is_empty() {
            self.r.say(&format!("I don't have any lists{scope}")).await;
            return TaskRetVal::Normal;
        }
        let names: Vec<&str> = lists.keys().map(String::as_str).collect();
        let header = if self.cfg.per_channel() {
            "Here are the lists I have for this channel:"
        } else {
            "Here are the lists I know about:"
        };
        self.r
            .say(&format!("{header}\n{}", names.join("\n")))
            .await;
        TaskRetVal::Normal
    }

    async fn show(&self, name: &str) -> TaskRetVal {
        let Some((_, lists)) = self.load(false).await else {
            return TaskRetVal::MechanismFail;
        };
        let list_name = name.to_lowercase();
        match lists.get(&list_name) {
            None => self.r.say(&format!("I don't have a list named {name}")).await,
            Some(list) if list.is_empty() => self.r.say(&format!("The {name} list is empty")).await,
            Some(list) => {
                self.r
                    .say(&format!(
                        "Here's what I have on the {list_name} list:\n{}",
                        list.join("\n")
                    ))
                    .await
            },
        };
        TaskRetVal::Normal
    }

    async fn pick(&self, name: &str) -> TaskRetVal {
        let Some((_, lists)) = self.load(false).await else {
            return TaskRetVal::MechanismFail;
        };
        let list_name = name.to_lowercase();
        match lists.get(&list_name) {
            None => {
                self.r
                    .say(&format!("I don't have a list named {list_name}"))
                    .await;
            },
            Some(list) if list.is_empty() => {
                self.r
                    .say(&format!("The {list_name} list is empty"))
                    .await;
            },
            Some(list) => {
                let item = self.r.random_string(list);
                self.r.remember_context("item", &item);
                self.r.say(&format!("Here you go: {item}")).await;
            },
        }
        TaskRetVal::Normal
    }

    async fn add(&self, item: &str, name: &str) -> TaskRetVal {
        let Some((token, mut lists)) = self.load(true).await else {
            return TaskRetVal::MechanismFail;
        };
        let list_name = name.to_lowercase();
        if let Some(list) = lists.get_mut(&list_name) {
            if contains(list, item) {
                self.r.checkin_datum(self.key, &token);
                self.r
                    .say(&format!("{item} is already on the {name} list"))
                    .await;
                return TaskRetVal::Normal;
            }
            list.push(item.to_string());
            if self.save(&token, &lists).await {
                self.r
                    .say(&format!("Ok, I added {item} to the {name} list"))
                    .await;
            }
            return TaskRetVal::Normal;
        }

        // Don't hold the lock while waiting on a person.
        self.r.checkin_datum(self.key, &token);
        let answer = match self
            .r
            .prompt_for_reply(
                "YesNo",
                &format!("I don't have a '{name}' list, do you want to create it?"),
            )
            .await
        {
            Ok(answer) => answer,
            Err(ret) => {
                warn!(error = %ret, "lists: no usable answer to create prompt");
                self.r
                    .reply("Sorry, I didn't get an answer I understand")
                    .await;
                return TaskRetVal::Normal;
            },
        };
        if matches!(answer.to_lowercase().as_str(), "n" | "no") {
            self.r.say("Item not added").await;
            return TaskRetVal::Normal;
        }

        // The list may have been created while we were waiting.
        let Some((token, mut lists)) = self.load(true).await else {
            return TaskRetVal::MechanismFail;
        };
        match lists.get_mut(&list_name) {
            None => {
                lists.insert(list_name, vec![item.to_string()]);
                if self.save(&token, &lists).await {
                    self.r
                        .say(&format!(
                            "Ok, I created a new {name} list and added {item} to it"
                        ))
                        .await;
                }
            },
            Some(list) if contains(list, item) => {
                self.r.checkin_datum(self.key, &token);
                self.r
                    .say(&format!(
                        "Somebody already created the {name} list and added {item} to it"
                    ))
                    .await;
            },
            Some(list) => {
                list.push(item.to_string());
                if self.save(&token, &lists).await {
                    self.r
                        .say(&format!("Ok, I added {item} to the new {name} list"))
                        .await;
                }
            },
        }
        TaskRetVal::Normal
    }

    async fn remove(&self, item: &str, name: &str) -> TaskRetVal {
        let Some((token, mut lists)) = self.load(true).await else {
            return TaskRetVal::MechanismFail;
        };
        let list_name = name.to_lowercase();
        let Some(list) = lists.get_mut(&list_name) else {
            self.r.checkin_datum(self.key, &token);
            self.r.say(&format!("I don't have a list named {name}")).await;
            return TaskRetVal::Normal;
        };
        let Some(pos) = list.iter().position(|li| li.eq_ignore_ascii_case(item)) else {
            self.r.checkin_datum(self.key, &token);
            self.r
                .say(&format!("I didn't see {item} on the {list_name} list"))
                .await;
            return TaskRetVal::Normal;
        };
        list.swap_remove(pos);
        if self.save(&token, &lists).await {
            self.r
                .say(&format!("Ok, I removed {item} from the {list_name} list"))
                .await;
        }
        TaskRetVal::Normal
    }

    async fn clear(&self, name: &str, delete: bool) -> TaskRetVal {
        let Some((token, mut lists)) = self.load(true).await else {
            return TaskRetVal::MechanismFail;
        };
        let list_name = name.to_lowercase();
        if !lists.contains_key(&list_name) {
            self.r.checkin_datum(self.key, &token);
            self.r.say(&format!("I don't have a list named {name}")).await;
            return TaskRetVal::Normal;
        }
        let done = if delete {
            lists.remove(&list_name);
            "Deleted"
        } else {
            lists.insert(list_name, Vec::new());
            "Emptied"
        };
        if self.save(&token, &lists).await {
            self.r.say(done).await;
        }
        TaskRetVal::Normal
    }
}
