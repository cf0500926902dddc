//! `groups`: an authorizer backed by configured groups of users.
//!
//! A plugin opts in with `Authorizer: groups` and names the group in
//! `AuthRequire`. Members are listed by user name or protocol ID.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::Deserialize,
    tracing::{debug, warn},
    warren_common::TaskRetVal,
    warren_engine::{Robot, TaskDef, TaskHandler},
};

const DEFAULT_CONFIG: &str = r#"
Help:
- Keywords: ["group", "groups"]
  Helptext: ["(bot), list groups - list the groups used for authorization"]
- Keywords: ["group", "groups", "show"]
  Helptext: ["(bot), show the <group> group - show the members of a group"]
CommandMatchers:
- Command: list
  Regex: '(?i:list groups)'
- Command: show
  Regex: '(?i:show (?:the )?([\w-]+) group)'
  Contexts: ["group"]
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GroupsConfig {
    groups: BTreeMap<String, Vec<String>>,
}

impl GroupsConfig {
    fn group(&self, name: &str) -> Option<&Vec<String>> {
        self.groups
            .iter()
            .find(|(g, _)| g.eq_ignore_ascii_case(name))
            .map(|(_, members)| members)
    }

    fn is_member(&self, group: &str, user: &str, user_id: &str) -> bool {
        self.group(group).is_some_and(|members| {
            members
                .iter()
                .any(|m| m.eq_ignore_ascii_case(user) || m == user_id)
        })
    }
}

pub fn def() -> TaskDef {
    TaskDef::plugin("groups", Arc::new(Groups)).with_config(DEFAULT_CONFIG)
}

struct Groups;

#[async_trait]
impl TaskHandler for Groups {
    async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
        let cfg = match r.get_task_config::<GroupsConfig>() {
            Ok(cfg) => cfg,
            Err(ret) if command == "authorize" => {
                warn!(error = %ret, "groups: no groups configured");
                return TaskRetVal::ConfigurationError;
            },
            Err(_) => GroupsConfig::default(),
        };
        match command {
            "init" => TaskRetVal::Normal,
            "authorize" => authorize(r, &cfg, args),
            "list" => {
                if cfg.groups.is_empty() {
                    r.say("I don't have any groups").await;
                } else {
                    let names: Vec<&str> = cfg.groups.keys().map(String::as_str).collect();
                    r.say(&format!("Here are the groups I know about:\n{}", names.join("\n")))
                        .await;
                }
                TaskRetVal::Normal
            },
            "show" => {
                let name = args.first().map(String::as_str).unwrap_or_default();
                match cfg.group(name) {
                    None => r.say(&format!("I don't have a group named {name}")).await,
                    Some(members) if members.is_empty() => {
                        r.say(&format!("The {name} group is empty")).await
                    },
                    Some(members) => {
                        r.say(&format!(
                            "Here's who is in the {name} group:\n{}",
                            members.join("\n")
                        ))
                        .await
                    },
                };
                TaskRetVal::Normal
            },
            other => {
                warn!(command = other, "groups: unknown command");
                TaskRetVal::Fail
            },
        }
    }
}

/// `args` are the plugin being authorized, the required group, the command
/// and its arguments.
fn authorize(r: &Robot, cfg: &GroupsConfig, args: &[String]) -> TaskRetVal {
    let plugin = args.first().map(String::as_str).unwrap_or_default();
    let group = args.get(1).map(String::as_str).unwrap_or_default();
    if group.is_empty() {
        warn!(plugin, "groups: plugin sets no AuthRequire group");
        return TaskRetVal::ConfigurationError;
    }
    if cfg.group(group).is_none() {
        warn!(plugin, group, "groups: required group is not configured");
        return TaskRetVal::ConfigurationError;
    }
    let m = r.message();
    let member = cfg.is_member(group, &m.user, &m.protocol_user);
    debug!(plugin, group, user = %m.user, member, "groups: authorization check");
    if member {
        TaskRetVal::Success
    } else {
        TaskRetVal::Fail
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GroupsConfig {
        serde_json::from_value(serde_json::json!({
            "Groups": {"Helpdesk": ["alice", "u0003"], "empty": []}
        }))
        .unwrap()
    }

    #[test]
    fn members_match_by_name_or_id() {
        let cfg = config();
        assert!(cfg.is_member("helpdesk", "Alice", "u0001"));
        assert!(cfg.is_member("Helpdesk", "carol", "u0003"));
        assert!(!cfg.is_member("helpdesk", "bob", "u0002"));
        assert!(!cfg.is_member("empty", "alice", "u0001"));
        assert!(!cfg.is_member("admins", "alice", "u0001"));
    }
}
