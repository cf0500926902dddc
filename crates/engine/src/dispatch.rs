//! Turns inbound connector messages into pipelines.

use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    tracing::{debug, info, trace},
    warren_brain::MemoryScope,
    warren_channels::{ConnectorHandler, gating},
    warren_common::{ConnectorMessage, Message, MessageFormat, MessageKind},
};

use crate::{
    engine::Shared,
    pipeline::{self, Invocation},
    prompt::ReplyKey,
    robot::context_key,
    snapshot::{Snapshot, Task},
};

const MISSING_CONTEXT: &str = "Sorry, I don't remember which {label} we were talking about; please re-enter your command and be more specific";

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ignored(&'static str),
    PromptReply,
    Subscribed(String),
    Command(String),
    /// "it" was used but nothing was remembered for the context.
    MissingContext(String),
    Ambient(usize),
    CatchAll(usize),
    Unmatched,
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl ConnectorHandler for Dispatcher {
    async fn incoming_message(&self, msg: ConnectorMessage) {
        let outcome = dispatch(&self.shared, msg).await;
        trace!(outcome = ?outcome, "message dispatched");
    }
}

fn filtered(shared: &Shared, snapshot: &Snapshot, msg: &ConnectorMessage) -> Option<&'static str> {
    if shared.stopping() {
        return Some("shutting down");
    }
    if msg.self_message && !msg.hidden_message {
        return Some("own message");
    }
    match msg.kind {
        MessageKind::Deleted => return Some("deletion"),
        MessageKind::Edited
            if shared.recently_sent(
                &msg.user_id,
                &msg.channel_id,
                snapshot.config.edit_debounce(),
            ) =>
        {
            return Some("edit within debounce window");
        },
        _ => {},
    }
    let ignore = &snapshot.config.ignore_users;
    if gating::matches_any(&msg.user_name, ignore) || gating::matches_any(&msg.user_id, ignore) {
        return Some("ignored user");
    }
    None
}

pub(crate) async fn dispatch(shared: &Arc<Shared>, mut incoming: ConnectorMessage) -> Outcome {
    let snapshot = shared.snapshot();
    if let Some(reason) = filtered(shared, &snapshot, &incoming) {
        debug!(
            user = %incoming.user_name,
            channel = %incoming.channel_name,
            reason,
            "message dropped"
        );
        return Outcome::Ignored(reason);
    }

    let address = snapshot.addressing.resolve(&incoming.message_text);
    let addressed = address.addressed || incoming.direct_message || incoming.bot_message;
    if address.hidden {
        incoming.hidden_message = true;
    }
    let text = address.command;
    let incoming = Arc::new(incoming);

    // A pending prompt gets the message before anything else.
    let thread = if incoming.threaded_message {
        incoming.thread_id.as_str()
    } else {
        ""
    };
    let prompt_key = ReplyKey::new(&incoming.user_id, &incoming.channel_id, thread);
    if shared.prompts.is_waiting(&prompt_key) && shared.prompts.deliver(&prompt_key, &text) {
        debug!(
            user = %incoming.user_name,
            channel = %incoming.channel_name,
            "reply delivered to prompt"
        );
        return Outcome::PromptReply;
    }

    if address.bare {
        return Outcome::Ignored("bare name");
    }

    let message = Message::from_incoming(Arc::clone(&incoming));
    let is_admin = snapshot.is_admin(&message);
    let visible: Vec<&Arc<Task>> = snapshot
        .plugins()
        .filter(|t| t.visible(&snapshot.config, &message, is_admin, false))
        .collect();

    if addressed {
        for &task in &visible {
            let Some((matcher, mut args)) = task.match_command(&text) else {
                continue;
            };
            if let Err(label) =
                substitute_context(shared, &incoming, &matcher.contexts, &mut args)
            {
                let reply = MISSING_CONTEXT.replace("{label}", &label);
                notify(shared, &incoming, &reply).await;
                return Outcome::MissingContext(label);
            }
            info!(
                task = %task.name,
                command = %matcher.command,
                user = %incoming.user_name,
                channel = %incoming.channel_name,
                "command matched"
            );
            shared
                .connector
                .message_heard(&incoming.user_id, &incoming.channel_id)
                .await;
            let inv = Invocation::command(Arc::clone(task), &matcher.command, args);
            pipeline::spawn(shared, Arc::clone(&snapshot), inv, message, HashMap::new());
            return Outcome::Command(task.name.clone());
        }
    }

    // Subscribed conversations take whatever isn't a command.
    let sub_key = ReplyKey::new(&incoming.user_id, &incoming.channel_id, &incoming.thread_id);
    if let Some(name) = shared
        .subscriptions
        .subscriber(&sub_key, snapshot.config.subscription_timeout())
        && let Some(task) = snapshot.task(&name).filter(|t| !t.disabled)
    {
        debug!(task = %name, "message for subscribed conversation");
        let inv = Invocation::internal(Arc::clone(task), "subscribed", vec![text]);
        pipeline::spawn(shared, Arc::clone(&snapshot), inv, message, HashMap::new());
        return Outcome::Subscribed(name);
    }

    if !addressed {
        let mut fired = 0;
        for &task in &visible {
            for (matcher, args) in task.match_ambient(&text) {
                debug!(task = %task.name, command = %matcher.command, "ambient match");
                let inv = Invocation::command(Arc::clone(task), &matcher.command, args);
                if pipeline::spawn(
                    shared,
                    Arc::clone(&snapshot),
                    inv,
                    message.clone(),
                    HashMap::new(),
                ) {
                    fired += 1;
                }
            }
        }
        return if fired > 0 {
            Outcome::Ambient(fired)
        } else {
            Outcome::Unmatched
        };
    }

    // Addressed but nothing matched: operator catch-alls, else the builtin.
    let mut catchers: Vec<&Arc<Task>> = visible
        .iter()
        .copied()
        .filter(|t| t.config.catch_all && !t.builtin)
        .collect();
    if catchers.is_empty() {
        catchers = visible
            .iter()
            .copied()
            .filter(|t| t.config.catch_all && t.builtin)
            .collect();
    }
    let mut fired = 0;
    for task in catchers {
        let inv = Invocation::internal(Arc::clone(task), "catchall", vec![text.clone()]);
        if pipeline::spawn(shared, Arc::clone(&snapshot), inv, message.clone(), HashMap::new()) {
            fired += 1;
        }
    }
    info!(
        user = %incoming.user_name,
        channel = %incoming.channel_name,
        text = %text,
        "no command matched"
    );
    Outcome::CatchAll(fired)
}

/// "it" (or a missing optional group) in a context position stands for the
/// last value remembered for that context; anything else is remembered.
/// Returns the context label when nothing was remembered.
fn substitute_context(
    shared: &Shared,
    incoming: &ConnectorMessage,
    contexts: &[String],
    args: &mut [String],
) -> Result<(), String> {
    let memory = shared.brain.short_term();
    let scope = MemoryScope::user(&incoming.user_id, &incoming.channel_id);
    for (label, arg) in contexts.iter().zip(args.iter_mut()) {
        if label.is_empty() {
            continue;
        }
        let key = context_key(label);
        if arg.is_empty() || arg.eq_ignore_ascii_case("it") {
            match memory.recall(&scope, &key) {
                Some(v) if !v.is_empty() => *arg = v,
                _ => return Err(label.clone()),
            }
        } else {
            memory.remember(&scope, &key, arg);
        }
    }
    Ok(())
}

/// Answer the sender outside any pipeline.
async fn notify(shared: &Shared, incoming: &ConnectorMessage, text: &str) {
    let format = MessageFormat::default();
    if incoming.direct_message {
        shared
            .connector
            .send_protocol_user_message(&incoming.user_id, text, format, Some(incoming))
            .await;
        return;
    }
    let thread = if incoming.threaded_message {
        incoming.thread_id.as_str()
    } else {
        ""
    };
    shared
        .connector
        .send_protocol_user_channel_thread_message(
            &incoming.user_id,
            &incoming.user_name,
            &incoming.channel_id,
            thread,
            text,
            format,
            Some(incoming),
        )
        .await;
}
