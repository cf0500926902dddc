//! The per-task view of the robot.
//!
//! A [`Robot`] is handed to every task handler. It is cheap to clone and the
//! addressing modifiers ([`Robot::direct`], [`Robot::threaded`],
//! [`Robot::fixed`], [`Robot::message_format`]) return new views without
//! touching the original. Errors from the brain, connector or configuration
//! never reach the task as such; they come back as [`RetVal`].

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, LazyLock},
    time::Duration,
};

use {
    rand::{Rng, seq::IndexedRandom},
    regex::Regex,
    serde::{Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
    warren_brain::{Checkout, MemoryScope},
    warren_common::{LogLevel, Message, MessageFormat, RetVal},
    warren_history::HistoryLogger,
};

use crate::{
    engine::Shared,
    exclusive::Acquire,
    pipeline::{self, Invocation, PipelineState, Stage},
    prompt::ReplyKey,
    snapshot::{Snapshot, Task},
    task::TaskKind,
};

static PARAM_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

#[derive(Clone)]
pub struct Robot {
    shared: Arc<Shared>,
    pipe: Arc<PipelineState>,
    task: Arc<Task>,
    msg: Message,
}

impl Robot {
    pub(crate) fn new(shared: Arc<Shared>, pipe: Arc<PipelineState>, task: Arc<Task>) -> Self {
        let msg = pipe.message.clone();
        Self {
            shared,
            pipe,
            task,
            msg,
        }
    }

    pub fn message(&self) -> &Message {
        &self.msg
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipe.id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipe.name
    }

    pub fn bot_name(&self) -> &str {
        &self.pipe.snapshot.config.name
    }

    pub(crate) fn snapshot(&self) -> &Arc<Snapshot> {
        &self.pipe.snapshot
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn history(&self) -> &Arc<dyn HistoryLogger> {
        &self.pipe.history
    }

    pub(crate) fn work_dir(&self) -> &Path {
        &self.pipe.work_dir
    }

    // ── Addressing modifiers ────────────────────────────────────────────────

    /// Send by direct message to the originating user.
    #[must_use]
    pub fn direct(&self) -> Self {
        let mut r = self.clone();
        r.msg.direct = true;
        r.msg.channel.clear();
        r.msg.protocol_channel.clear();
        r
    }

    /// Reply in a thread, starting one on the triggering message if needed.
    #[must_use]
    pub fn threaded(&self) -> Self {
        let mut r = self.clone();
        if !r.msg.direct {
            r.msg.threaded = true;
            if r.msg.thread_id.is_empty()
                && let Some(incoming) = &r.msg.incoming
            {
                r.msg.thread_id = incoming.message_id.clone();
            }
        }
        r
    }

    #[must_use]
    pub fn fixed(&self) -> Self {
        self.message_format(MessageFormat::Fixed)
    }

    #[must_use]
    pub fn message_format(&self, format: MessageFormat) -> Self {
        let mut r = self.clone();
        r.msg.format = format;
        r
    }

    // ── Sending ─────────────────────────────────────────────────────────────

    fn channel_id(&self) -> &str {
        if self.msg.protocol_channel.is_empty() {
            &self.msg.channel
        } else {
            &self.msg.protocol_channel
        }
    }

    fn current_thread(&self) -> &str {
        if self.msg.threaded {
            &self.msg.thread_id
        } else {
            ""
        }
    }

    fn thread_or_start(&self) -> String {
        if !self.msg.thread_id.is_empty() {
            self.msg.thread_id.clone()
        } else {
            self.msg
                .incoming
                .as_ref()
                .map(|m| m.message_id.clone())
                .unwrap_or_default()
        }
    }

    /// Roster name to protocol id; anything else passes through.
    fn user_id_for(&self, user: &str) -> String {
        self.snapshot()
            .roster_id(user)
            .map_or_else(|| user.to_string(), str::to_string)
    }

    fn empty(&self, text: &str) -> bool {
        if text.is_empty() {
            warn!(task = %self.task.name, "refusing to send an empty message");
            return true;
        }
        false
    }

    fn sent(&self, ret: RetVal) -> RetVal {
        if ret.is_ok() {
            self.shared.note_sent(
                &self.pipe.message.protocol_user,
                &self.pipe.message.protocol_channel,
                self.snapshot().config.edit_debounce(),
            );
        } else {
            debug!(task = %self.task.name, result = %ret, "send failed");
        }
        ret
    }

    async fn to_channel(&self, channel: &str, thread: &str, text: &str) -> RetVal {
        if self.empty(text) {
            return RetVal::Failed;
        }
        let ret = self
            .shared
            .connector
            .send_protocol_channel_thread_message(
                channel,
                thread,
                text,
                self.msg.format,
                self.msg.incoming.as_deref(),
            )
            .await;
        self.sent(ret)
    }

    async fn to_user_in_channel(
        &self,
        user_id: &str,
        user_name: &str,
        channel: &str,
        thread: &str,
        text: &str,
    ) -> RetVal {
        if self.empty(text) {
            return RetVal::Failed;
        }
        let ret = self
            .shared
            .connector
            .send_protocol_user_channel_thread_message(
                user_id,
                user_name,
                channel,
                thread,
                text,
                self.msg.format,
                self.msg.incoming.as_deref(),
            )
            .await;
        self.sent(ret)
    }

    async fn to_user(&self, user: &str, text: &str) -> RetVal {
        if self.empty(text) {
            return RetVal::Failed;
        }
        let ret = self
            .shared
            .connector
            .send_protocol_user_message(user, text, self.msg.format, self.msg.incoming.as_deref())
            .await;
        self.sent(ret)
    }

    fn dm_target(&self) -> String {
        if self.msg.protocol_user.is_empty() {
            self.msg.user.clone()
        } else {
            self.msg.protocol_user.clone()
        }
    }

    /// Speak in the current venue.
    pub async fn say(&self, text: &str) -> RetVal {
        if self.msg.direct || self.channel_id().is_empty() {
            return self.to_user(&self.dm_target(), text).await;
        }
        self.to_channel(self.channel_id(), self.current_thread(), text)
            .await
    }

    pub async fn say_thread(&self, text: &str) -> RetVal {
        if self.msg.direct || self.channel_id().is_empty() {
            return self.to_user(&self.dm_target(), text).await;
        }
        self.to_channel(self.channel_id(), &self.thread_or_start(), text)
            .await
    }

    /// Answer the originating user, mentioning them in a channel.
    pub async fn reply(&self, text: &str) -> RetVal {
        if self.msg.direct || self.channel_id().is_empty() {
            return self.to_user(&self.dm_target(), text).await;
        }
        self.to_user_in_channel(
            &self.msg.protocol_user,
            &self.msg.user,
            self.channel_id(),
            self.current_thread(),
            text,
        )
        .await
    }

    pub async fn reply_thread(&self, text: &str) -> RetVal {
        if self.msg.direct || self.channel_id().is_empty() {
            return self.to_user(&self.dm_target(), text).await;
        }
        self.to_user_in_channel(
            &self.msg.protocol_user,
            &self.msg.user,
            self.channel_id(),
            &self.thread_or_start(),
            text,
        )
        .await
    }

    pub async fn send_channel_message(&self, channel: &str, text: &str) -> RetVal {
        self.to_channel(channel, "", text).await
    }

    pub async fn send_channel_thread_message(
        &self,
        channel: &str,
        thread: &str,
        text: &str,
    ) -> RetVal {
        self.to_channel(channel, thread, text).await
    }

    pub async fn send_user_message(&self, user: &str, text: &str) -> RetVal {
        self.to_user(&self.user_id_for(user), text).await
    }

    pub async fn send_user_channel_message(&self, user: &str, channel: &str, text: &str) -> RetVal {
        self.to_user_in_channel(&self.user_id_for(user), user, channel, "", text)
            .await
    }

    pub async fn send_user_channel_thread_message(
        &self,
        user: &str,
        channel: &str,
        thread: &str,
        text: &str,
    ) -> RetVal {
        self.to_user_in_channel(&self.user_id_for(user), user, channel, thread, text)
            .await
    }

    // ── Prompting ───────────────────────────────────────────────────────────

    /// Ask the originating user and wait for a reply matching the reply
    /// matcher `label`.
    pub async fn prompt_for_reply(&self, label: &str, prompt: &str) -> Result<String, RetVal> {
        let (user_id, user) = (self.msg.protocol_user.clone(), self.msg.user.clone());
        if self.msg.direct {
            return self.prompt(label, &user_id, &user, "", "", prompt).await;
        }
        let thread = self.current_thread().to_string();
        self.prompt(label, &user_id, &user, &self.channel_id().to_string(), &thread, prompt)
            .await
    }

    pub async fn prompt_thread_for_reply(
        &self,
        label: &str,
        prompt: &str,
    ) -> Result<String, RetVal> {
        if self.msg.direct {
            return self.prompt_for_reply(label, prompt).await;
        }
        let (user_id, user) = (self.msg.protocol_user.clone(), self.msg.user.clone());
        let thread = self.thread_or_start();
        self.prompt(label, &user_id, &user, &self.channel_id().to_string(), &thread, prompt)
            .await
    }

    /// Ask `user` by direct message.
    pub async fn prompt_user_for_reply(
        &self,
        label: &str,
        user: &str,
        prompt: &str,
    ) -> Result<String, RetVal> {
        let user_id = self.user_id_for(user);
        self.prompt(label, &user_id, user, "", "", prompt).await
    }

    pub async fn prompt_user_channel_for_reply(
        &self,
        label: &str,
        user: &str,
        channel: &str,
        prompt: &str,
    ) -> Result<String, RetVal> {
        let user_id = self.user_id_for(user);
        self.prompt(label, &user_id, user, channel, "", prompt).await
    }

    pub async fn prompt_user_channel_thread_for_reply(
        &self,
        label: &str,
        user: &str,
        channel: &str,
        thread: &str,
        prompt: &str,
    ) -> Result<String, RetVal> {
        let user_id = self.user_id_for(user);
        self.prompt(label, &user_id, user, channel, thread, prompt)
            .await
    }

    async fn prompt(
        &self,
        label: &str,
        user_id: &str,
        user: &str,
        channel: &str,
        thread: &str,
        prompt: &str,
    ) -> Result<String, RetVal> {
        let Some(regex) = self.task.reply_matcher(label) else {
            warn!(task = %self.task.name, label, "no reply matcher with that label");
            return Err(RetVal::MatcherNotFound);
        };
        if self.shared.stopping() {
            return Err(RetVal::Interrupted);
        }
        let Some(pending) = self
            .shared
            .prompts
            .register(ReplyKey::new(user_id, channel, thread))
        else {
            debug!(task = %self.task.name, user, channel, "prompt already pending");
            return Err(RetVal::RetryPrompt);
        };
        let sent = if channel.is_empty() {
            self.to_user(user_id, prompt).await
        } else {
            self.to_user_in_channel(user_id, user, channel, thread, prompt)
                .await
        };
        if !sent.is_ok() {
            return Err(sent);
        }
        pending
            .wait(&regex, self.snapshot().config.prompt_timeout())
            .await
    }

    // ── Long-term memory ────────────────────────────────────────────────────

    fn datum_key(&self, key: &str) -> String {
        format!("{}:{key}", self.task.namespace())
    }

    /// Fetch a datum; with `rw`, lock it for a later
    /// [`update_datum`](Self::update_datum) or [`checkin_datum`](Self::checkin_datum).
    pub async fn checkout_datum<T: DeserializeOwned>(
        &self,
        key: &str,
        rw: bool,
    ) -> Result<Checkout<T>, RetVal> {
        let key = self.datum_key(key);
        self.shared
            .brain
            .checkout_datum(&key, rw)
            .await
            .map_err(|e| {
                warn!(task = %self.task.name, key = %key, error = %e, "checkout failed");
                e.retval()
            })
    }

    pub async fn update_datum<T: Serialize + ?Sized>(
        &self,
        key: &str,
        token: &str,
        value: &T,
    ) -> RetVal {
        let key = self.datum_key(key);
        match self.shared.brain.update_datum(&key, token, value).await {
            Ok(()) => RetVal::Ok,
            Err(e) => {
                warn!(task = %self.task.name, key = %key, error = %e, "update failed");
                e.retval()
            },
        }
    }

    pub fn checkin_datum(&self, key: &str, token: &str) {
        self.shared.brain.checkin(&self.datum_key(key), token);
    }

    // ── Short-term memory ───────────────────────────────────────────────────

    fn scope(&self, shared: bool) -> MemoryScope {
        let channel = self.pipe.message.protocol_channel.as_str();
        if shared {
            MemoryScope::shared(channel)
        } else {
            MemoryScope::user(&self.pipe.message.protocol_user, channel)
        }
    }

    fn thread_scope(&self, shared: bool) -> MemoryScope {
        self.scope(shared).in_thread(&self.pipe.message.thread_id)
    }

    pub fn remember(&self, key: &str, value: &str, shared: bool) {
        self.shared
            .brain
            .short_term()
            .remember(&self.scope(shared), key, value);
    }

    pub fn remember_thread(&self, key: &str, value: &str, shared: bool) {
        self.shared
            .brain
            .short_term()
            .remember(&self.thread_scope(shared), key, value);
    }

    /// `""` when nothing is remembered.
    pub fn recall(&self, key: &str, shared: bool) -> String {
        self.shared
            .brain
            .short_term()
            .recall(&self.scope(shared), key)
            .unwrap_or_default()
    }

    pub fn recall_thread(&self, key: &str, shared: bool) -> String {
        self.shared
            .brain
            .short_term()
            .recall(&self.thread_scope(shared), key)
            .unwrap_or_default()
    }

    /// Remember what "it" refers to for `context`, e.g. the last list named.
    pub fn remember_context(&self, context: &str, value: &str) {
        self.remember(&context_key(context), value, false);
    }

    pub fn recall_context(&self, context: &str) -> String {
        self.recall(&context_key(context), false)
    }

    // ── Parameters and configuration ────────────────────────────────────────

    /// Pipeline parameter, then the task's configured parameter, then the
    /// process environment. `""` when unset.
    pub fn get_parameter(&self, name: &str) -> String {
        if let Some(v) = self.pipe.param(name) {
            return v;
        }
        if let Some(v) = self.task.parameter(name) {
            return v.to_string();
        }
        std::env::var(name).unwrap_or_default()
    }

    /// False for invalid names, and for `GOPHER_*` names outside a
    /// privileged pipeline.
    pub fn set_parameter(&self, name: &str, value: &str) -> bool {
        if !PARAM_NAME_RE.as_ref().is_some_and(|re| re.is_match(name)) {
            warn!(task = %self.task.name, name, "invalid parameter name");
            return false;
        }
        if name.starts_with("GOPHER_") && !self.pipe.privileged {
            warn!(
                task = %self.task.name,
                name,
                "unprivileged pipeline may not set GOPHER_ parameters"
            );
            return false;
        }
        self.pipe.set_param(name, value);
        true
    }

    /// Environment for child processes: task parameters overlaid with the
    /// pipeline's.
    pub(crate) fn environment(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .task
            .config
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        env.extend(self.pipe.params());
        env
    }

    /// Deserialize the task's `Config` block.
    pub fn get_task_config<T: DeserializeOwned>(&self) -> Result<T, RetVal> {
        let cfg = &self.task.config.config;
        if cfg.is_null() {
            return Err(RetVal::NoConfigFound);
        }
        serde_json::from_value(cfg.clone()).map_err(|e| {
            warn!(task = %self.task.name, error = %e, "task configuration does not fit");
            RetVal::ConfigUnmarshalError
        })
    }

    // ── Attributes ──────────────────────────────────────────────────────────

    pub fn get_bot_attribute(&self, attr: &str) -> Result<String, RetVal> {
        let cfg = &self.snapshot().config;
        let value = match attr.to_ascii_lowercase().as_str() {
            "name" => Some(cfg.name.clone()),
            "alias" => cfg.alias.clone(),
            "fullname" | "realname" => cfg.full_name.clone(),
            "email" => cfg.email.clone(),
            "contact" | "admincontact" => cfg.admin_contact.clone(),
            "protocol" => Some(self.msg.protocol.to_string()),
            _ => None,
        };
        value
            .filter(|v| !v.is_empty())
            .ok_or(RetVal::AttributeNotFound)
    }

    /// Connector first, then the configured roster.
    pub async fn get_user_attribute(&self, user: &str, attr: &str) -> Result<String, RetVal> {
        match self
            .shared
            .connector
            .get_protocol_user_attribute(user, attr)
            .await
        {
            Ok(v) if !v.is_empty() => return Ok(v),
            Ok(_) => {},
            Err(ret) => debug!(user, attr, result = %ret, "connector has no attribute"),
        }
        self.snapshot()
            .config
            .user_roster
            .iter()
            .find(|u| u.user_name == user || u.user_id == user)
            .and_then(|u| u.attribute(attr))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(RetVal::AttributeNotFound)
    }

    pub async fn get_sender_attribute(&self, attr: &str) -> Result<String, RetVal> {
        let user = if self.msg.protocol_user.is_empty() {
            self.msg.user.clone()
        } else {
            self.msg.protocol_user.clone()
        };
        match self.get_user_attribute(&user, attr).await {
            Err(RetVal::AttributeNotFound) if user != self.msg.user => {
                let name = self.msg.user.clone();
                self.get_user_attribute(&name, attr).await
            },
            other => other,
        }
    }

    // ── Authorization and elevation ─────────────────────────────────────────

    pub fn check_admin(&self) -> bool {
        self.snapshot().is_admin(&self.pipe.message)
    }

    /// Run the task's elevator. `immediate` ignores a remembered
    /// elevation.
    pub async fn elevate(&self, immediate: bool) -> bool {
        pipeline::elevate(&self.shared, &self.pipe, &self.task, immediate).await
    }

    // ── Pipeline extension ──────────────────────────────────────────────────

    fn lookup(&self, name: &str, kind: TaskKind) -> Result<Arc<Task>, RetVal> {
        let Some(task) = self.snapshot().task(name) else {
            warn!(task = %self.task.name, target = name, "no such task");
            return Err(RetVal::TaskNotFound);
        };
        if task.disabled {
            return Err(RetVal::TaskDisabled);
        }
        if task.kind != kind {
            warn!(
                task = %self.task.name,
                target = name,
                kind = %task.kind,
                expected = %kind,
                "wrong task type"
            );
            return Err(RetVal::InvalidTaskType);
        }
        if task.privileged && !self.pipe.privileged {
            warn!(
                task = %self.task.name,
                target = name,
                "privileged task in unprivileged pipeline"
            );
            return Err(RetVal::PrivilegeViolation);
        }
        Ok(Arc::clone(task))
    }

    /// Queues can only grow before the stage that drains them starts.
    fn extension_allowed(&self, drained_by: Stage) -> Result<(), RetVal> {
        if self.shared.stopping() {
            return Err(RetVal::RobotStopping);
        }
        if self.pipe.stage() >= drained_by {
            return Err(RetVal::InvalidStage);
        }
        Ok(())
    }

    fn command_invocation(&self, plugin: &str, command: &str) -> Result<Invocation, RetVal> {
        let task = self.lookup(plugin, TaskKind::Plugin)?;
        let (command, args) = match task.match_command(command) {
            Some((m, args)) => (m.command.clone(), args),
            None => return Err(RetVal::CommandNotMatched),
        };
        Ok(Invocation::command(task, &command, args))
    }

    fn queue(
        &self,
        drained_by: Stage,
        make: impl FnOnce() -> Result<Invocation, RetVal>,
        push: impl FnOnce(&PipelineState, Invocation),
    ) -> RetVal {
        if let Err(ret) = self.extension_allowed(drained_by) {
            return ret;
        }
        match make() {
            Ok(inv) => {
                push(self.pipe.as_ref(), inv);
                RetVal::Ok
            },
            Err(ret) => ret,
        }
    }

    /// Append a task to the primary queue.
    pub fn add_task(&self, name: &str, args: &[&str]) -> RetVal {
        self.queue(
            Stage::Primary,
            || Ok(Invocation::run(self.lookup(name, TaskKind::Task)?, owned(args))),
            PipelineState::push_primary,
        )
    }

    /// Append a job; it shares this pipeline's parameters.
    pub fn add_job(&self, name: &str, args: &[&str]) -> RetVal {
        self.queue(
            Stage::Primary,
            || Ok(Invocation::run(self.lookup(name, TaskKind::Job)?, owned(args))),
            PipelineState::push_primary,
        )
    }

    /// Append the plugin command that `command` matches.
    pub fn add_command(&self, plugin: &str, command: &str) -> RetVal {
        self.queue(
            Stage::Primary,
            || self.command_invocation(plugin, command),
            PipelineState::push_primary,
        )
    }

    pub fn final_task(&self, name: &str, args: &[&str]) -> RetVal {
        self.queue(
            Stage::Final,
            || Ok(Invocation::run(self.lookup(name, TaskKind::Task)?, owned(args))),
            PipelineState::push_final,
        )
    }

    pub fn fail_task(&self, name: &str, args: &[&str]) -> RetVal {
        self.queue(
            Stage::Fail,
            || Ok(Invocation::run(self.lookup(name, TaskKind::Task)?, owned(args))),
            PipelineState::push_fail,
        )
    }

    pub fn final_command(&self, plugin: &str, command: &str) -> RetVal {
        self.queue(
            Stage::Final,
            || self.command_invocation(plugin, command),
            PipelineState::push_final,
        )
    }

    pub fn fail_command(&self, plugin: &str, command: &str) -> RetVal {
        self.queue(
            Stage::Fail,
            || self.command_invocation(plugin, command),
            PipelineState::push_fail,
        )
    }

    /// Start `name` as an independent pipeline with a copy of this
    /// pipeline's parameters. Does not wait for it.
    pub fn spawn_job(&self, name: &str, args: &[&str]) -> RetVal {
        if self.shared.stopping() {
            return RetVal::RobotStopping;
        }
        let Some(job) = self.snapshot().task(name) else {
            return RetVal::TaskNotFound;
        };
        if job.disabled {
            return RetVal::TaskDisabled;
        }
        if job.kind != TaskKind::Job {
            return RetVal::InvalidTaskType;
        }
        let started = pipeline::spawn(
            &self.shared,
            Arc::clone(self.snapshot()),
            Invocation::run(Arc::clone(job), owned(args)),
            self.pipe.message.clone(),
            self.pipe.params(),
        );
        if started {
            RetVal::Ok
        } else {
            RetVal::RobotStopping
        }
    }

    // ── Concurrency ─────────────────────────────────────────────────────────

    /// Claim `tag` for this pipeline. With `queue` the pipeline waits its
    /// turn; otherwise it is aborted when the tag is taken. The tag is
    /// released when the pipeline ends.
    pub async fn exclusive(&self, tag: &str, queue: bool) -> bool {
        let tag = format!("{}:{tag}", self.task.namespace());
        match self
            .shared
            .exclusive
            .acquire(&tag, &self.pipe.id, queue, &self.shared.stop)
            .await
        {
            Acquire::Acquired => true,
            Acquire::Busy => {
                debug!(
                    task = %self.task.name,
                    tag = %tag,
                    "exclusive tag held elsewhere; aborting"
                );
                self.pipe.abort();
                false
            },
            Acquire::Stopped => {
                self.pipe.abort();
                false
            },
        }
    }

    fn conversation(&self) -> ReplyKey {
        let m = &self.pipe.message;
        ReplyKey::new(&m.protocol_user, &m.protocol_channel, &m.thread_id)
    }

    /// Route further messages in this conversation to this plugin as
    /// `subscribed`. False if already subscribed, or not called by a plugin.
    pub fn subscribe(&self) -> bool {
        if self.task.kind != TaskKind::Plugin {
            warn!(task = %self.task.name, "only plugins can subscribe");
            return false;
        }
        self.shared.subscriptions.subscribe(
            self.conversation(),
            &self.task.name,
            self.snapshot().config.subscription_timeout(),
        )
    }

    pub fn unsubscribe(&self) -> bool {
        self.shared
            .subscriptions
            .unsubscribe(&self.conversation(), &self.task.name);
        true
    }

    // ── Utility ─────────────────────────────────────────────────────────────

    /// Uniform in `0..n`; 0 when `n` is not positive.
    pub fn random_int(&self, n: i64) -> i64 {
        if n <= 0 {
            return 0;
        }
        rand::rng().random_range(0..n)
    }

    pub fn random_string(&self, choices: &[String]) -> String {
        choices.choose(&mut rand::rng()).cloned().unwrap_or_default()
    }

    pub async fn pause(&self, seconds: f64) {
        if seconds > 0.0 && seconds.is_finite() {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        level.emit(&self.task.name, message);
    }
}

pub(crate) fn context_key(context: &str) -> String {
    format!("context:{context}")
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
