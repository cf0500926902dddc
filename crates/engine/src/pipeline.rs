//! Pipeline runtime.
//!
//! A pipeline runs its primary queue in order until a task fails, then its
//! final queue newest-first, then (only after a failure) its fail queue
//! newest-first. Every task runs on its own tokio task so a panic in
//! handler code becomes `MechanismFail` instead of taking the robot down.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    tracing::{Instrument, debug, error, info, info_span, warn},
    warren_brain::Brain,
    warren_common::{Message, MessageFormat, TaskRetVal},
    warren_history::{HistoryLogger, NullLogger},
};

use crate::{
    engine::Shared,
    robot::Robot,
    snapshot::{Snapshot, Task},
    task::TaskKind,
};

/// Brain key mapping job name to its next run index.
pub const HISTORIES_KEY: &str = "bot:histories";

/// Stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Primary,
    Final,
    Fail,
}

/// One queued call of a task.
#[derive(Clone)]
pub struct Invocation {
    pub task: Arc<Task>,
    pub command: String,
    pub args: Vec<String>,
    /// Plugin commands pass admin, authorization and elevation checks first.
    pub gated: bool,
}

impl Invocation {
    pub fn run(task: Arc<Task>, args: Vec<String>) -> Self {
        Self {
            task,
            command: "run".into(),
            args,
            gated: false,
        }
    }

    pub fn command(task: Arc<Task>, command: &str, args: Vec<String>) -> Self {
        Self {
            task,
            command: command.to_string(),
            args,
            gated: true,
        }
    }

    pub fn internal(task: Arc<Task>, command: &str, args: Vec<String>) -> Self {
        Self {
            gated: false,
            ..Self::command(task, command, args)
        }
    }
}

pub struct PipelineState {
    pub id: String,
    pub name: String,
    pub message: Message,
    pub snapshot: Arc<Snapshot>,
    pub privileged: bool,
    pub work_dir: PathBuf,
    pub history: Arc<dyn HistoryLogger>,
    pub run_index: Option<u64>,
    stage: Mutex<Stage>,
    primary: Mutex<VecDeque<Invocation>>,
    finals: Mutex<Vec<Invocation>>,
    fails: Mutex<Vec<Invocation>>,
    params: Mutex<HashMap<String, String>>,
    aborted: AtomicBool,
}

impl PipelineState {
    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_stage(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
    }

    pub fn push_primary(&self, inv: Invocation) {
        self.primary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(inv);
    }

    pub fn push_final(&self, inv: Invocation) {
        self.finals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(inv);
    }

    pub fn push_fail(&self, inv: Invocation) {
        self.fails.lock().unwrap_or_else(|e| e.into_inner()).push(inv);
    }

    fn next_primary(&self) -> Option<Invocation> {
        self.primary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn next_final(&self) -> Option<Invocation> {
        self.finals.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn next_fail(&self) -> Option<Invocation> {
        self.fails.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn set_param(&self, name: &str, value: &str) {
        self.params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.to_string());
    }

    pub fn params(&self) -> HashMap<String, String> {
        self.params.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stop after the running task returns.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Start a pipeline in the background. False once shutdown has begun.
pub(crate) fn spawn(
    shared: &Arc<Shared>,
    snapshot: Arc<Snapshot>,
    start: Invocation,
    message: Message,
    inherited: HashMap<String, String>,
) -> bool {
    if shared.stopping() {
        debug!(task = %start.task.name, "not starting pipeline during shutdown");
        return false;
    }
    let shared_run = Arc::clone(shared);
    shared.tracker.spawn(async move {
        run(shared_run, snapshot, start, message, inherited).await;
    });
    true
}

/// Run a pipeline to completion and return its accumulated result.
pub(crate) async fn run(
    shared: Arc<Shared>,
    snapshot: Arc<Snapshot>,
    start: Invocation,
    mut message: Message,
    inherited: HashMap<String, String>,
) -> TaskRetVal {
    let id = uuid::Uuid::new_v4().to_string();
    let name = start.task.name.clone();
    if let Some(format) = snapshot
        .config
        .default_message_format
        .as_deref()
        .and_then(|f| f.parse::<MessageFormat>().ok())
    {
        message.format = format;
    }

    let mut params = inherited;
    params.insert("GOPHER_PIPE_NAME".into(), name.clone());
    params.insert("GOPHER_CALLER_ID".into(), id.clone());
    params.insert("GOPHER_USER".into(), message.user.clone());
    params.insert("GOPHER_CHANNEL".into(), message.channel.clone());
    params.insert("GOPHER_PROTOCOL".into(), message.protocol.to_string());
    params.insert("GOPHER_THREAD_ID".into(), message.thread_id.clone());

    let (history, run_index): (Arc<dyn HistoryLogger>, Option<u64>) =
        if start.task.kind == TaskKind::Job {
            let index = next_run_index(&shared.brain, &name).await;
            params.insert("GOPHER_JOB_NAME".into(), name.clone());
            params.insert("GOPHER_RUN_INDEX".into(), index.to_string());
            match shared
                .history
                .new_history(&name, index, start.task.config.history_logs)
            {
                Ok(log) => (log, Some(index)),
                Err(e) => {
                    warn!(job = %name, index, error = %e, "opening job history");
                    (Arc::new(NullLogger), Some(index))
                },
            }
        } else {
            (Arc::new(NullLogger), None)
        };

    let pipe = Arc::new(PipelineState {
        id: id.clone(),
        name: name.clone(),
        message,
        privileged: start.task.privileged,
        work_dir: snapshot.home.clone(),
        snapshot,
        history,
        run_index,
        stage: Mutex::new(Stage::Primary),
        primary: Mutex::new(VecDeque::from([start])),
        finals: Mutex::new(Vec::new()),
        fails: Mutex::new(Vec::new()),
        params: Mutex::new(params),
        aborted: AtomicBool::new(false),
    });

    let span = info_span!("pipeline", pipeline_id = %id, pipeline = %name);
    let ret = run_stages(&shared, &pipe).instrument(span).await;

    shared.exclusive.release_all(&pipe.id);
    pipe.history.close();
    pipe.history.finalize();
    ret
}

async fn run_stages(shared: &Arc<Shared>, pipe: &Arc<PipelineState>) -> TaskRetVal {
    let mut ret = TaskRetVal::Normal;
    while let Some(inv) = pipe.next_primary() {
        let r = run_invocation(shared, pipe, inv).await;
        ret = ret.worst(r);
        if !r.is_success() {
            break;
        }
        if pipe.is_aborted() {
            ret = ret.worst(TaskRetVal::PipelineAborted);
            break;
        }
    }
    let failed = !ret.is_success();

    pipe.set_stage(Stage::Final);
    while let Some(inv) = pipe.next_final() {
        run_invocation(shared, pipe, inv).await;
    }
    if failed {
        pipe.set_stage(Stage::Fail);
        while let Some(inv) = pipe.next_fail() {
            run_invocation(shared, pipe, inv).await;
        }
    }
    match ret {
        TaskRetVal::Normal | TaskRetVal::Success => debug!("pipeline finished"),
        TaskRetVal::MechanismFail | TaskRetVal::ConfigurationError => {
            error!(result = %ret, "pipeline failed")
        },
        _ => info!(result = %ret, "pipeline failed"),
    }
    ret
}

async fn run_invocation(
    shared: &Arc<Shared>,
    pipe: &Arc<PipelineState>,
    inv: Invocation,
) -> TaskRetVal {
    if inv.gated
        && let Some(denied) = gate(shared, pipe, &inv).await
    {
        return denied;
    }
    run_task(shared, pipe, inv).await
}

/// Run one task on its own tokio task.
pub(crate) async fn run_task(
    shared: &Arc<Shared>,
    pipe: &Arc<PipelineState>,
    inv: Invocation,
) -> TaskRetVal {
    let Invocation {
        task,
        command,
        args,
        ..
    } = inv;
    pipe.history
        .line(&format!("*** Starting {} {} {command} {}", task.kind, task.name, args.join(" ")));
    debug!(task = %task.name, command = %command, "running task");
    let command_name = command.clone();
    let robot = Robot::new(Arc::clone(shared), Arc::clone(pipe), Arc::clone(&task));
    let handler = Arc::clone(&task.handler);
    let joined = tokio::spawn(
        async move { handler.handle(&robot, &command, &args).await }.in_current_span(),
    )
    .await;
    let ret = match joined {
        Ok(ret) => ret,
        Err(e) if e.is_panic() => {
            let panic = panic_message(e.into_panic());
            error!(task = %task.name, command = %command_name, panic = %panic, "task panicked");
            pipe.history.log(&format!("task {} panicked: {panic}", task.name));
            TaskRetVal::MechanismFail
        },
        Err(e) => {
            error!(task = %task.name, error = %e, "task did not complete");
            TaskRetVal::MechanismFail
        },
    };
    match ret {
        TaskRetVal::MechanismFail | TaskRetVal::ConfigurationError => {
            error!(task = %task.name, result = %ret, "task failed")
        },
        r if !r.is_success() => info!(task = %task.name, result = %r, "task returned"),
        _ => {},
    }
    ret
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

// ── Access checks ───────────────────────────────────────────────────────────

const ADMIN_ONLY: &str = "Sorry, that command is only available to bot administrators";
const NOT_AUTHORIZED: &str = "Sorry, you're not authorized for that command";
const AUTH_BROKEN: &str = "Sorry, authorization failed; please ask an administrator to check the log";
const NOT_ELEVATED: &str = "Sorry, this command requires elevation";

/// Admin, authorization and elevation checks for a plugin command. Returns
/// the pipeline result when the command may not run.
async fn gate(
    shared: &Arc<Shared>,
    pipe: &Arc<PipelineState>,
    inv: &Invocation,
) -> Option<TaskRetVal> {
    let task = &inv.task;
    let cfg = &task.config;
    let robot = Robot::new(Arc::clone(shared), Arc::clone(pipe), Arc::clone(task));

    if cfg.admin_commands.contains(&inv.command) && !pipe.snapshot.is_admin(&pipe.message) {
        info!(
            task = %task.name,
            command = %inv.command,
            user = %pipe.message.user,
            "admin command refused"
        );
        robot.reply(ADMIN_ONLY).await;
        return Some(TaskRetVal::Fail);
    }

    if cfg.authorize_all_commands || cfg.authorized_commands.contains(&inv.command) {
        let result = authorize(shared, pipe, inv).await;
        match result {
            TaskRetVal::Success => {},
            TaskRetVal::Fail => {
                info!(
                    task = %task.name,
                    command = %inv.command,
                    user = %pipe.message.user,
                    "authorization refused"
                );
                robot.reply(NOT_AUTHORIZED).await;
                return Some(TaskRetVal::Fail);
            },
            other => {
                robot.reply(AUTH_BROKEN).await;
                return Some(other.worst(TaskRetVal::MechanismFail));
            },
        }
    }

    let immediate = cfg.elevate_immediate_commands.contains(&inv.command);
    if (immediate || cfg.elevated_commands.contains(&inv.command))
        && !elevate(shared, pipe, task, immediate).await
    {
        robot.reply(NOT_ELEVATED).await;
        return Some(TaskRetVal::Fail);
    }
    None
}

async fn authorize(
    shared: &Arc<Shared>,
    pipe: &Arc<PipelineState>,
    inv: &Invocation,
) -> TaskRetVal {
    let task = &inv.task;
    let Some(name) = task
        .config
        .authorizer
        .as_deref()
        .or(pipe.snapshot.config.default_authorizer.as_deref())
    else {
        error!(task = %task.name, "command requires authorization but no authorizer is configured");
        return TaskRetVal::ConfigurationError;
    };
    let Some(authorizer) = usable_plugin(&pipe.snapshot, name) else {
        error!(task = %task.name, authorizer = name, "authorizer is missing or disabled");
        return TaskRetVal::ConfigurationError;
    };
    let mut args = vec![
        task.name.clone(),
        task.config.auth_require.clone().unwrap_or_default(),
        inv.command.clone(),
    ];
    args.extend(inv.args.iter().cloned());
    let ret = run_task(shared, pipe, Invocation::internal(authorizer, "authorize", args)).await;
    debug!(task = %task.name, authorizer = name, result = %ret, "authorization");
    ret
}

/// Run the task's elevator unless the user is still elevated. `immediate`
/// skips the remembered elevation.
pub(crate) async fn elevate(
    shared: &Arc<Shared>,
    pipe: &Arc<PipelineState>,
    task: &Arc<Task>,
    immediate: bool,
) -> bool {
    let user = &pipe.message.protocol_user;
    let policy = &pipe.snapshot.config.elevation;
    let window = std::time::Duration::from_secs(policy.timeout);
    if !immediate && shared.elevations.check(user, window, policy.mode) {
        debug!(task = %task.name, user = %user, "elevation still valid");
        return true;
    }
    let Some(name) = task
        .config
        .elevator
        .as_deref()
        .or(pipe.snapshot.config.default_elevator.as_deref())
    else {
        error!(task = %task.name, "elevation required but no elevator is configured");
        return false;
    };
    let Some(elevator) = usable_plugin(&pipe.snapshot, name) else {
        error!(task = %task.name, elevator = name, "elevator is missing or disabled");
        return false;
    };
    let ret = run_task(
        shared,
        pipe,
        Invocation::internal(elevator, "elevate", vec![immediate.to_string()]),
    )
    .await;
    if ret == TaskRetVal::Success {
        shared.elevations.record(user);
        true
    } else {
        info!(task = %task.name, elevator = name, result = %ret, "elevation refused");
        false
    }
}

fn usable_plugin(snapshot: &Snapshot, name: &str) -> Option<Arc<Task>> {
    snapshot
        .task(name)
        .filter(|t| t.kind == TaskKind::Plugin && !t.disabled)
        .cloned()
}

/// Claim the next run index for `job`. Falls back to 0 if the brain is
/// unavailable.
async fn next_run_index(brain: &Brain, job: &str) -> u64 {
    let checkout = match brain
        .checkout_datum::<HashMap<String, u64>>(HISTORIES_KEY, true)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            warn!(job, error = %e, "reading job run indexes");
            return 0;
        },
    };
    let mut indexes = checkout.value.unwrap_or_default();
    let index = indexes.get(job).copied().unwrap_or(0) + 1;
    indexes.insert(job.to_string(), index);
    if let Err(e) = brain
        .update_datum(HISTORIES_KEY, &checkout.token, &indexes)
        .await
    {
        warn!(job, error = %e, "saving job run indexes");
    }
    index
}
