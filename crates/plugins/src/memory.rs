//! `memory`: proves the robot has a brain.
//!
//! `remember` / `recall` / `forget` keep a numbered list of things in the
//! `memories` datum; `store` / `what is` use short-term memory, which is
//! private to the user and channel and forgotten after a while.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::warn,
    warren_common::{RetVal, TaskRetVal},
    warren_engine::{Robot, TaskDef, TaskHandler},
};

const DATUM: &str = "memories";

/// How long `remember slowly` holds the datum lock before writing.
const SLOW_SECONDS: f64 = 4.0;

const DEFAULT_CONFIG: &str = r#"
Help:
- Keywords: ["remember", "memory"]
  Helptext: ["(bot), remember <anything> - prove the robot has a brain(tm)"]
- Keywords: ["recall", "memory"]
  Helptext: ["(bot), recall (#) - list what the robot remembers, or just one thing"]
- Keywords: ["forget", "memory"]
  Helptext: ["(bot), forget <#> - ask the robot to forget one of its remembered 'facts'"]
- Keywords: ["store", "memory"]
  Helptext: ["(bot), store <something> is <something else> - for the short term"]
- Keywords: ["what", "memory"]
  Helptext: ["(bot), what is <something>? - ask about something you stored"]
CommandMatchers:
- Command: remember
  Regex: '(?i:remember(?: (slowly))? ([-\w .,!?:/]+))'
  Contexts: ["", "item"]
- Command: recall
  Regex: '(?i:recall ?(\d+)?)'
- Command: forget
  Regex: '(?i:forget (\d{1,2}))'
- Command: store
  Regex: '(?i:store ([-\w .,!'']+?) is ([-\w .,!?'']+))'
- Command: what
  Regex: '(?i:what is ([-\w .,!'']+?)\??)'
"#;

pub fn def() -> TaskDef {
    TaskDef::plugin("memory", Arc::new(Memory)).with_config(DEFAULT_CONFIG)
}

fn fact_key(thing: &str) -> String {
    format!("fact:{}", thing.trim().to_lowercase())
}

/// 1-based index into `len` things.
fn index(arg: &str, len: usize) -> Option<usize> {
    match arg.parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Some(n - 1),
        _ => None,
    }
}

struct Memory;

#[async_trait]
impl TaskHandler for Memory {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or_default();
        match command {
            "init" => TaskRetVal::Normal,
            "remember" => remember(r, arg(0).eq_ignore_ascii_case("slowly"), arg(1)).await,
            "recall" => recall(r, arg(0)).await,
            "forget" => forget(r, arg(0)).await,
            "store" => {
                let (thing, value) = (arg(0).trim(), arg(1).trim());
                r.remember(&fact_key(thing), value, false);
                r.say(&format!(
                    "I'll remember \"{thing}\" is \"{value}\" - but eventually I'll forget!"
                ))
                .await;
                TaskRetVal::Normal
            },
            "what" => {
                let thing = arg(0).trim();
                let value = r.recall(&fact_key(thing), false);
                if value.is_empty() {
                    r.reply(&format!("Gosh, I have no idea what {thing} is"))
                        .await;
                } else {
                    r.say(&format!("{thing} is {value}")).await;
                }
                TaskRetVal::Normal
            },
            other => {
                warn!(command = other, "memory: unknown command");
                TaskRetVal::Fail
            },
        }
    }
}

async fn remember(r: &Robot, slowly: bool, thing: &str) -> TaskRetVal {
    let checkout = match r.checkout_datum::<Vec<String>>(DATUM, true).await {
        Ok(c) => c,
        Err(ret) => {
            warn!(error = %ret, "memory: checkout failed");
            r.say("Dang it, having problems with my memory").await;
            return TaskRetVal::MechanismFail;
        },
    };
    let mut memories = checkout.value.unwrap_or_default();
    if memories.iter().any(|m| m == thing) {
        r.checkin_datum(DATUM, &checkout.token);
        r.say("That's already one of my fondest memories").await;
        return TaskRetVal::Normal;
    }
    memories.push(thing.to_string());
    if slowly {
        r.say(&format!("Ok, I'll remember \"{thing}\" ... but sloooowly"))
            .await;
        r.pause(SLOW_SECONDS).await;
    } else {
        r.say(&format!("Ok, I'll remember \"{thing}\"")).await;
    }
    let ret = r.update_datum(DATUM, &checkout.token, &memories).await;
    if ret != RetVal::Ok {
        warn!(error = %ret, "memory: update failed");
        r.say("Dang it, having problems with my memory").await;
        return TaskRetVal::MechanismFail;
    }
    if !slowly {
        r.say("committed to memory").await;
    }
    TaskRetVal::Normal
}

async fn recall(r: &Robot, which: &str) -> TaskRetVal {
    let memories = match r.checkout_datum::<Vec<String>>(DATUM, false).await {
        Ok(c) => c.value.unwrap_or_default(),
        Err(ret) => {
            warn!(error = %ret, "memory: checkout failed");
            r.say("Dang it, having problems with my memory").await;
            return TaskRetVal::MechanismFail;
        },
    };
    if memories.is_empty() {
        r.say("Sorry - I don't remember anything!").await;
        return TaskRetVal::Normal;
    }
    if which.is_empty() {
        let listing: Vec<String> = memories
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}: {m}", i + 1))
            .collect();
        r.say(&format!("Here's what I remember:\n{}", listing.join("\n")))
            .await;
        return TaskRetVal::Normal;
    }
    match index(which, memories.len()) {
        Some(i) => r.say(&memories[i]).await,
        None => r.say("I don't remember that many things!").await,
    };
    TaskRetVal::Normal
}

async fn forget(r: &Robot, which: &str) -> TaskRetVal {
    let checkout = match r.checkout_datum::<Vec<String>>(DATUM, true).await {
        Ok(c) => c,
        Err(ret) => {
            warn!(error = %ret, "memory: checkout failed");
            r.say("Dang it, having problems with my memory").await;
            return TaskRetVal::MechanismFail;
        },
    };
    let mut memories = checkout.value.unwrap_or_default();
    let Some(i) = index(which, memories.len()) else {
        r.checkin_datum(DATUM, &checkout.token);
        r.say("Gosh, I guess I never remembered that in the first place!")
            .await;
        return TaskRetVal::Normal;
    };
    let thing = memories.remove(i);
    let ret = r.update_datum(DATUM, &checkout.token, &memories).await;
    if ret != RetVal::Ok {
        warn!(error = %ret, "memory: update failed");
        r.say("Dang it, having problems with my memory").await;
        return TaskRetVal::MechanismFail;
    }
    r.say(&format!("Ok, I'll forget \"{thing}\"")).await;
    TaskRetVal::Normal
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("1", 3, Some(0))]
    #[case("3", 3, Some(2))]
    #[case("4", 3, None)]
    #[case("0", 3, None)]
    #[case("x", 3, None)]
    fn indexes_are_one_based(#[case] arg: &str, #[case] len: usize, #[case] want: Option<usize>) {
        assert_eq!(index(arg, len), want);
    }

    #[test]
    fn fact_keys_ignore_case_and_padding() {
        assert_eq!(fact_key(" Ferris Bueller "), fact_key("ferris bueller"));
    }
}
