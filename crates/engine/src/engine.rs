//! The running robot: shared state, startup and shutdown.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    tokio::{sync::Notify, time::Instant},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, info, warn},
    warren_brain::{Brain, BrainRegistry},
    warren_channels::{Connector, ConnectorHandler, ConnectorRegistry},
    warren_common::Message,
    warren_config::{KnownNames, ValidationResult},
    warren_history::{HistoryProvider, HistoryRegistry},
};

use crate::{
    Result,
    dispatch::Dispatcher,
    elevation::ElevationCache,
    exclusive::ExclusiveTable,
    log_capture::LogCapture,
    pipeline::{self, Invocation},
    prompt::PromptTable,
    scheduler,
    snapshot::Snapshot,
    subscription::SubscriptionTable,
    task::TaskRegistry,
};

// ── Shared state ────────────────────────────────────────────────────────────

/// State every pipeline and the dispatcher hold a handle to.
pub(crate) struct Shared {
    snapshot: RwLock<Arc<Snapshot>>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) brain: Arc<Brain>,
    pub(crate) history: Arc<dyn HistoryProvider>,
    pub(crate) prompts: PromptTable,
    pub(crate) exclusive: ExclusiveTable,
    pub(crate) subscriptions: SubscriptionTable,
    pub(crate) elevations: ElevationCache,
    pub(crate) logs: Option<LogCapture>,
    /// Cancelled when shutdown begins.
    pub(crate) stop: CancellationToken,
    /// Cancelled when running pipelines should not be waited for.
    pub(crate) abort: CancellationToken,
    pub(crate) tracker: TaskTracker,
    /// Wakes the scheduler after a reload.
    pub(crate) reloaded: Notify,
    last_sent: Mutex<HashMap<(String, String), Instant>>,
    natives: TaskRegistry,
    known: KnownNames,
    root: PathBuf,
    home: PathBuf,
}

impl Shared {
    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Records a send and forgets sends older than `window`.
    pub(crate) fn note_sent(&self, user: &str, channel: &str, window: Duration) {
        let mut sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.retain(|_, at| at.elapsed() < window);
        sent.insert((user.to_string(), channel.to_string()), Instant::now());
    }

    #[cfg(test)]
    fn sent_entries(&self) -> usize {
        self.last_sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the robot spoke to `user` in `channel` within `window`.
    pub(crate) fn recently_sent(&self, user: &str, channel: &str, window: Duration) -> bool {
        self.last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(user.to_string(), channel.to_string()))
            .is_some_and(|at| at.elapsed() < window)
    }

    /// Re-read the configuration and swap it in. The running snapshot is
    /// kept when the new one does not validate.
    pub(crate) fn reload(&self) -> Result<ValidationResult> {
        let fresh = Snapshot::load(&self.root, &self.home, &self.natives, &self.known)?;
        self.connector.set_user_map(roster_map(&fresh));
        let report = fresh.validation.clone();
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);
        self.reloaded.notify_one();
        info!("configuration reloaded");
        Ok(report)
    }

    /// Stop accepting work. Running pipelines finish on their own; pending
    /// prompts and exclusive waits are interrupted.
    pub(crate) fn shutdown(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        info!("shutdown started");
        self.stop.cancel();
        self.prompts.clear();
        self.exclusive.clear();
    }

    pub(crate) fn abort(&self) {
        self.abort.cancel();
        self.shutdown();
    }
}

fn roster_map(snapshot: &Snapshot) -> HashMap<String, String> {
    snapshot
        .config
        .user_roster
        .iter()
        .filter(|u| !u.user_id.is_empty())
        .map(|u| (u.user_name.clone(), u.user_id.clone()))
        .collect()
}

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct EngineBuilder {
    root: PathBuf,
    home: Option<PathBuf>,
    tasks: TaskRegistry,
    connector: Option<Arc<dyn Connector>>,
    connectors: ConnectorRegistry,
    brains: BrainRegistry,
    histories: HistoryRegistry,
    logs: Option<LogCapture>,
    control_socket: bool,
}

impl EngineBuilder {
    /// `root` holds `conf/`. Home (working directory for tasks and
    /// relative back-end paths) defaults to it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: None,
            tasks: TaskRegistry::new(),
            connector: None,
            connectors: ConnectorRegistry::default(),
            brains: BrainRegistry::default(),
            histories: HistoryRegistry::default(),
            logs: None,
            control_socket: false,
        }
    }

    #[must_use]
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    #[must_use]
    pub fn tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = tasks;
        self
    }

    /// Use this connector instead of building one from `Protocol`.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = connectors;
        self
    }

    #[must_use]
    pub fn brains(mut self, brains: BrainRegistry) -> Self {
        self.brains = brains;
        self
    }

    #[must_use]
    pub fn histories(mut self, histories: HistoryRegistry) -> Self {
        self.histories = histories;
        self
    }

    #[must_use]
    pub fn log_capture(mut self, logs: LogCapture) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Listen on `<home>/.warren.sock` while running.
    #[must_use]
    pub fn control_socket(mut self, enabled: bool) -> Self {
        self.control_socket = enabled;
        self
    }

    fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| self.root.clone())
    }

    fn known_names(&self) -> KnownNames {
        let mut protocols = self.connectors.names();
        if let Some(c) = &self.connector {
            let name = c.protocol().as_str().to_ascii_lowercase();
            if !protocols.contains(&name) {
                protocols.push(name);
            }
        }
        KnownNames {
            brains: self.brains.names().map(str::to_string).collect(),
            histories: self.histories.names().map(str::to_string).collect(),
            protocols,
            jobs: self.tasks.job_names(),
        }
    }

    /// Load and validate the configuration without starting anything.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        Snapshot::load(&self.root, &self.home_dir(), &self.tasks, &self.known_names())
    }

    pub async fn build(self) -> Result<Engine> {
        let home = self.home_dir();
        let known = self.known_names();
        let snapshot = Snapshot::load(&self.root, &home, &self.tasks, &known)?;
        let cfg = &snapshot.config;

        let connector = match self.connector {
            Some(c) => c,
            None => self
                .connectors
                .build(&cfg.protocol, cfg.protocol_config.clone())?,
        };
        let backend = self
            .brains
            .build(&cfg.brain, cfg.brain_config.clone(), &home)
            .await?;
        let brain = Arc::new(Brain::with_timeouts(
            backend,
            cfg.datum_lock_timeout(),
            cfg.short_term_ttl(),
        ));
        let history = self
            .histories
            .build(&cfg.history_provider, cfg.history_config.clone(), &home)?;
        connector.set_user_map(roster_map(&snapshot));
        info!(
            robot = %cfg.name,
            protocol = %connector.protocol(),
            brain = %cfg.brain,
            history = %cfg.history_provider,
            "robot initialized"
        );

        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Arc::new(snapshot)),
            connector,
            brain,
            history,
            prompts: PromptTable::new(),
            exclusive: ExclusiveTable::new(),
            subscriptions: SubscriptionTable::new(),
            elevations: ElevationCache::new(),
            logs: self.logs,
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            tracker: TaskTracker::new(),
            reloaded: Notify::new(),
            last_sent: Mutex::new(HashMap::new()),
            natives: self.tasks,
            known,
            root: self.root,
            home,
        });
        Ok(Engine {
            shared,
            control_socket: self.control_socket,
        })
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine {
    shared: Arc<Shared>,
    control_socket: bool,
}

impl Engine {
    pub fn builder(root: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(root)
    }

    /// Run until shutdown, then wait for running pipelines up to the
    /// configured grace period.
    pub async fn run(&self) -> Result<()> {
        let shared = &self.shared;
        let snapshot = shared.snapshot();

        for channel in &snapshot.config.join_channels {
            let ret = shared.connector.join_channel(channel).await;
            if !ret.is_ok() {
                warn!(channel = %channel, result = %ret, "joining channel");
            }
        }
        self.init_plugins(&snapshot);

        let scheduler = tokio::spawn(scheduler::run(Arc::clone(shared)));
        #[cfg(unix)]
        let control = self.control_socket.then(|| {
            tokio::spawn(crate::control::serve(
                Arc::clone(shared),
                crate::control::socket_path(&shared.home),
            ))
        });
        #[cfg(not(unix))]
        if self.control_socket {
            warn!("control socket is only available on unix");
        }

        let handler: Arc<dyn ConnectorHandler> = Arc::new(Dispatcher::new(Arc::clone(shared)));
        info!(robot = %snapshot.config.name, "robot running");
        shared.connector.run(handler, shared.stop.clone()).await;
        // The connector may return on its own (e.g. end of input).
        shared.shutdown();

        shared.tracker.close();
        let grace = shared.snapshot().config.shutdown_grace();
        tokio::select! {
            () = shared.tracker.wait() => debug!("all pipelines finished"),
            () = shared.abort.cancelled() => {
                warn!(running = shared.tracker.len(), "not waiting for running pipelines");
            },
            () = tokio::time::sleep(grace) => {
                warn!(running = shared.tracker.len(), "shutdown grace period expired");
            },
        }

        let _ = scheduler.await;
        #[cfg(unix)]
        if let Some(control) = control {
            let _ = control.await;
        }
        if let Err(e) = shared.brain.shutdown().await {
            warn!(error = %e, "flushing brain");
        }
        info!("robot stopped");
        Ok(())
    }

    /// Plugins get `init` once at startup.
    fn init_plugins(&self, snapshot: &Arc<Snapshot>) {
        let protocol = self.shared.connector.protocol();
        for task in snapshot.plugins().filter(|t| !t.builtin && !t.disabled) {
            let inv = Invocation::internal(Arc::clone(task), "init", Vec::new());
            pipeline::spawn(
                &self.shared,
                Arc::clone(snapshot),
                inv,
                Message::synthetic(protocol.clone(), ""),
                HashMap::new(),
            );
        }
    }

    /// Begin a graceful shutdown.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Shut down without waiting for running pipelines.
    pub fn abort(&self) {
        self.shared.abort();
    }

    pub fn reload(&self) -> Result<ValidationResult> {
        self.shared.reload()
    }

    pub fn dump(&self) -> Result<String> {
        self.shared.snapshot().dump()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.snapshot()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.shared.connector)
    }

    pub fn brain(&self) -> Arc<Brain> {
        Arc::clone(&self.shared.brain)
    }

    pub fn history(&self) -> Arc<dyn HistoryProvider> {
        Arc::clone(&self.shared.history)
    }

    pub fn home(&self) -> &Path {
        &self.shared.home
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{TaskDef, TaskHandler, robot::Robot},
        async_trait::async_trait,
        std::time::Duration,
        tokio::sync::mpsc,
        warren_channels::{TestConnector, TestMessage},
        warren_common::TaskRetVal,
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

    const ECHO: &str = r#"
Help:
- Keywords: ["echo"]
  Helptext: ["(bot), echo <text> - say it back"]
CommandMatchers:
- Command: echo
  Regex: 'echo (.*)'
MessageMatchers:
- Command: cheer
  Regex: '(?i:\bhooray\b)'
"#;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn handle(&self, r: &Robot, command: &str, args: &[String]) -> TaskRetVal {
            match command {
                "echo" => {
                    r.say(&args[0]).await;
                },
                "cheer" => {
                    r.say("yay").await;
                },
                _ => {},
            }
            TaskRetVal::Normal
        }
    }

    struct Running {
        engine: Arc<Engine>,
        tc: Arc<TestConnector>,
        run: tokio::task::JoinHandle<Result<()>>,
        _dir: tempfile::TempDir,
    }

    async fn start() -> Running {
        start_with(false).await
    }

    async fn start_with(control: bool) -> Running {
        launch(control, Vec::new()).await
    }

    async fn launch(control: bool, extra: Vec<TaskDef>) -> Running {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("conf")).unwrap();
        std::fs::write(dir.path().join("conf/robot.yaml"), ROBOT).unwrap();
        let tc = Arc::new(
            TestConnector::from_value(serde_json::json!({
                "BotName": "bender",
                "Users": [
                    {"Name": "alice", "InternalID": "u0001"},
                    {"Name": "bob", "InternalID": "u0002"}
                ]
            }))
            .unwrap(),
        );
        let mut tasks = TaskRegistry::new();
        tasks
            .register(TaskDef::plugin("echo", Arc::new(Echo)).with_config(ECHO))
            .unwrap();
        for def in extra {
            tasks.register(def).unwrap();
        }
        let engine = Arc::new(
            Engine::builder(dir.path())
                .tasks(tasks)
                .connector(Arc::clone(&tc) as Arc<dyn Connector>)
                .control_socket(control)
                .build()
                .await
                .unwrap(),
        );
        let run = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };
        Running {
            engine,
            tc,
            run,
            _dir: dir,
        }
    }

    async fn expect(tc: &TestConnector, user: &str, channel: &str, message: &str) {
        let got = tc.recv(Duration::from_secs(2)).await.expect("no reply");
        assert_eq!(got, TestMessage::new(user, channel, message));
    }

    async fn quiet(tc: &TestConnector) {
        assert!(tc.recv(Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn commands_need_addressing_and_ambients_do_not() {
        let r = start().await;
        r.tc.send("alice", "general", "bender, echo hello");
        expect(&r.tc, "", "general", "hello").await;
        r.tc.send("bob", "random", ";echo there");
        expect(&r.tc, "", "random", "there").await;
        r.tc.send("bob", "random", "echo unaddressed");
        quiet(&r.tc).await;
        r.tc.send("bob", "general", "well hooray for that");
        expect(&r.tc, "", "general", "yay").await;
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unmatched_commands_reach_the_catch_all() {
        let r = start().await;
        r.tc.send("bob", "general", ";juggle");
        let got = r.tc.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.user, "bob");
        assert!(got.message.starts_with("Sorry, that didn't match any commands I know"));
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn admin_builtins_are_invisible_to_others() {
        let r = start().await;
        r.tc.send("bob", "general", ";reload");
        let got = r.tc.recv(Duration::from_secs(2)).await.unwrap();
        assert!(got.message.starts_with("Sorry, that didn't match"));
        r.tc.send("alice", "general", ";reload");
        expect(&r.tc, "alice", "general", "Configuration reloaded successfully").await;
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn keyword_help_lists_matching_commands() {
        let r = start().await;
        r.tc.send("alice", "general", ";help echo");
        let got = r.tc.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.channel, "general");
        assert!(
            got.message
                .contains("bender, echo <text> - say it back (channels: general, random)")
        );
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn quit_stops_the_robot() {
        let r = start().await;
        r.tc.send("alice", "general", ";quit");
        expect(&r.tc, "alice", "general", "Ok, I'm shutting down").await;
        tokio::time::timeout(Duration::from_secs(5), r.run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(r.engine.is_stopping());
    }

    #[tokio::test]
    async fn dump_includes_native_and_builtin_tasks() {
        let r = start().await;
        let yaml = r.engine.dump().unwrap();
        assert!(yaml.contains("Name: echo"));
        assert!(yaml.contains("Name: builtin-help"));
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn control_socket_dumps_and_quits() {
        let r = start_with(true).await;
        let home = r.engine.home().to_path_buf();
        let mut dump = Err(std::io::Error::other("not tried"));
        for _ in 0..50 {
            dump = crate::control::send_command(&home, "dump").await;
            if dump.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(dump.unwrap().contains("Name: bender"));
        let bye = crate::control::send_command(&home, "quit").await.unwrap();
        assert_eq!(bye, "ok: shutting down\n");
        tokio::time::timeout(Duration::from_secs(5), r.run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    // ── Pipeline behaviour ──────────────────────────────────────────────────

    const PIPE: &str = r#"
CommandMatchers:
- Command: finals
  Regex: 'finals'
- Command: fails
  Regex: 'fails'
- Command: clean
  Regex: 'clean'
- Command: requeue
  Regex: 'requeue'
- Command: escalate
  Regex: 'escalate'
- Command: linger
  Regex: 'linger'
- Command: explode
  Regex: 'explode'
- Command: spawn
  Regex: 'spawn'
- Command: hold
  Regex: 'hold'
"#;

    type Notes = mpsc::UnboundedSender<String>;

    fn jot(notes: &Notes, note: impl Into<String>) {
        let _ = notes.send(note.into());
    }

    /// Notes its first argument; a second argument of `fail` fails the task.
    struct Step(Notes);

    #[async_trait]
    impl TaskHandler for Step {
        async fn handle(&self, _r: &Robot, _command: &str, args: &[String]) -> TaskRetVal {
            jot(&self.0, args.first().cloned().unwrap_or_default());
            match args.get(1).map(String::as_str) {
                Some("fail") => TaskRetVal::Fail,
                _ => TaskRetVal::Normal,
            }
        }
    }

    /// Tries to grow every queue and notes what happened.
    struct Requeue(Notes);

    #[async_trait]
    impl TaskHandler for Requeue {
        async fn handle(&self, r: &Robot, _command: &str, _args: &[String]) -> TaskRetVal {
            let add = r.add_task("step", &["never"]);
            let fin = r.final_task("step", &["never"]);
            let fail = r.fail_task("requeue", &[]);
            jot(&self.0, format!("{add:?} {fin:?} {fail:?}"));
            TaskRetVal::Normal
        }
    }

    struct Child(Notes);

    #[async_trait]
    impl TaskHandler for Child {
        async fn handle(&self, r: &Robot, _command: &str, _args: &[String]) -> TaskRetVal {
            jot(&self.0, format!("child {}", r.get_parameter("COLOR")));
            r.set_parameter("COLOR", "blue");
            TaskRetVal::Normal
        }
    }

    struct Script(Notes);

    #[async_trait]
    impl TaskHandler for Script {
        async fn handle(&self, r: &Robot, command: &str, _args: &[String]) -> TaskRetVal {
            match command {
                "finals" => {
                    r.final_task("step", &["one"]);
                    r.final_task("step", &["two"]);
                    jot(&self.0, "primary");
                },
                "fails" => {
                    r.fail_task("step", &["a"]);
                    r.fail_task("step", &["b"]);
                    r.add_task("step", &["boom", "fail"]);
                },
                "clean" => {
                    r.fail_task("step", &["never"]);
                    r.final_task("step", &["done"]);
                },
                "requeue" => {
                    r.final_task("requeue", &[]);
                    return TaskRetVal::Fail;
                },
                "escalate" => {
                    jot(&self.0, format!("{:?}", r.add_task("vault", &[])));
                },
                "linger" => {
                    jot(&self.0, "lingering");
                    r.pause(0.3).await;
                    let add = r.add_task("step", &["never"]);
                    let fin = r.final_task("step", &["never"]);
                    let job = r.spawn_job("child", &[]);
                    jot(&self.0, format!("{add:?} {fin:?} {job:?}"));
                },
                "explode" => {
                    r.fail_task("step", &["cleanup"]);
                    r.final_task("step", &["final"]);
                    panic!("kaboom");
                },
                "spawn" => {
                    r.set_parameter("COLOR", "red");
                    r.spawn_job("child", &[]);
                    r.pause(0.3).await;
                    jot(&self.0, format!("parent {}", r.get_parameter("COLOR")));
                },
                "hold" => {
                    r.fail_task("step", &["aborted"]);
                    let held = r.exclusive("door", false).await;
                    jot(&self.0, format!("held {held}"));
                    if held {
                        r.pause(0.5).await;
                    }
                    r.add_task("step", &["after"]);
                },
                _ => {},
            }
            TaskRetVal::Normal
        }
    }

    async fn start_pipes() -> (Running, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let r = launch(false, vec![
            TaskDef::plugin("pipe", Arc::new(Script(tx.clone()))).with_config(PIPE),
            TaskDef::task("step", Arc::new(Step(tx.clone()))),
            TaskDef::task("requeue", Arc::new(Requeue(tx.clone()))),
            TaskDef::task("vault", Arc::new(Step(tx.clone()))).privileged(),
            TaskDef::job("child", Arc::new(Child(tx))),
        ])
        .await;
        (r, rx)
    }

    async fn note(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no note")
            .expect("notes closed")
    }

    async fn no_more_notes(rx: &mut mpsc::UnboundedReceiver<String>) {
        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(got, Ok(Some(_))), "unexpected note {got:?}");
    }

    async fn stop(r: Running) {
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn final_tasks_run_newest_first_after_success() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";finals");
        assert_eq!(note(&mut rx).await, "primary");
        assert_eq!(note(&mut rx).await, "two");
        assert_eq!(note(&mut rx).await, "one");
        no_more_notes(&mut rx).await;
        stop(r).await;
    }

    #[tokio::test]
    async fn fail_tasks_run_newest_first_only_after_failure() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";fails");
        assert_eq!(note(&mut rx).await, "boom");
        assert_eq!(note(&mut rx).await, "b");
        assert_eq!(note(&mut rx).await, "a");
        no_more_notes(&mut rx).await;

        r.tc.send("alice", "general", ";clean");
        assert_eq!(note(&mut rx).await, "done");
        no_more_notes(&mut rx).await;
        stop(r).await;
    }

    #[tokio::test]
    async fn queues_close_once_their_stage_starts() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";requeue");
        // Final stage: only the fail queue is still open.
        assert_eq!(note(&mut rx).await, "InvalidStage InvalidStage Ok");
        // Fail stage: everything is closed, so the pipeline ends.
        assert_eq!(note(&mut rx).await, "InvalidStage InvalidStage InvalidStage");
        no_more_notes(&mut rx).await;
        stop(r).await;
    }

    #[tokio::test]
    async fn unprivileged_pipelines_cannot_add_privileged_tasks() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("bob", "general", ";escalate");
        assert_eq!(note(&mut rx).await, "PrivilegeViolation");
        no_more_notes(&mut rx).await;
        stop(r).await;
    }

    #[tokio::test]
    async fn pipelines_stop_growing_during_shutdown() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";linger");
        assert_eq!(note(&mut rx).await, "lingering");
        r.engine.shutdown();
        assert_eq!(note(&mut rx).await, "RobotStopping RobotStopping RobotStopping");
        tokio::time::timeout(Duration::from_secs(5), r.run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn panicking_task_fails_the_pipeline() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";explode");
        assert_eq!(note(&mut rx).await, "final");
        assert_eq!(note(&mut rx).await, "cleanup");
        no_more_notes(&mut rx).await;
        // The robot is still answering.
        r.tc.send("alice", "general", ";finals");
        assert_eq!(note(&mut rx).await, "primary");
        stop(r).await;
    }

    #[tokio::test]
    async fn spawned_jobs_get_a_copy_of_the_parameters() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";spawn");
        assert_eq!(note(&mut rx).await, "child red");
        assert_eq!(note(&mut rx).await, "parent red");
        no_more_notes(&mut rx).await;
        stop(r).await;
    }

    #[tokio::test]
    async fn exclusive_without_queueing_aborts_the_second_pipeline() {
        let (r, mut rx) = start_pipes().await;
        r.tc.send("alice", "general", ";hold");
        assert_eq!(note(&mut rx).await, "held true");
        r.tc.send("bob", "general", ";hold");
        assert_eq!(note(&mut rx).await, "held false");
        assert_eq!(note(&mut rx).await, "aborted");
        assert_eq!(note(&mut rx).await, "after");
        no_more_notes(&mut rx).await;
        stop(r).await;
    }

    #[tokio::test]
    async fn own_messages_are_ignored_unless_hidden() {
        let r = start().await;
        let mut own = r.tc.message("alice", "general", "bender, echo hi");
        own.self_message = true;
        r.tc.inject(own.clone());
        quiet(&r.tc).await;

        own.hidden_message = true;
        r.tc.inject(own);
        let got = r.tc.recv(Duration::from_secs(2)).await.expect("no reply");
        assert!(got.message.contains("hi"));
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stale_send_records_are_dropped() {
        let r = start().await;
        let shared = &r.engine.shared;
        let window = Duration::from_millis(50);
        shared.note_sent("u0001", "general", window);
        assert!(shared.recently_sent("u0001", "general", window));
        tokio::time::sleep(Duration::from_millis(80)).await;
        shared.note_sent("u0002", "random", window);
        assert_eq!(shared.sent_entries(), 1);
        assert!(!shared.recently_sent("u0001", "general", window));
        r.engine.shutdown();
        r.run.await.unwrap().unwrap();
    }
}
