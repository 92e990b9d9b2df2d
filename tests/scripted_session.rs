//! End-to-end flows over scripted transports: pool checkout semantics and
//! mode navigation driven through the public API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use teleprompt::{
    Command, ConnectParams, EngineConfig, EngineError, Error, ExpectEngine, Mode, ModeRouter,
    ModeTree, PoolConfig, PooledSession, PoolError, Prompt, Result, SessionFactory, SessionPool,
    Transport, TransportError,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A transport that replays a script: each expected send releases its reply
/// chunks, reads past the script time out.
struct ScriptedTransport {
    script: Mutex<VecDeque<(String, Vec<String>)>>,
    pending: Mutex<VecDeque<String>>,
    active: bool,
}

impl ScriptedTransport {
    fn new(script: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(send, replies)| {
                        (
                            send.to_string(),
                            replies.into_iter().map(String::from).collect(),
                        )
                    })
                    .collect(),
            ),
            pending: Mutex::new(VecDeque::new()),
            active: true,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        let (expected, replies) = script
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected send: {text:?}"));
        assert_eq!(text, expected, "script out of order");
        self.pending.lock().unwrap().extend(replies);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        match self.pending.lock().unwrap().pop_front() {
            Some(chunk) => Ok(chunk),
            None => Err(TransportError::ReadTimeout(timeout).into()),
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// A connected-and-quiet transport for pool bookkeeping tests.
struct StubTransport {
    active: bool,
}

#[async_trait]
impl Transport for StubTransport {
    async fn connect(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    async fn send(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        Err(TransportError::ReadTimeout(timeout).into())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

struct StubFactory {
    params: ConnectParams,
}

impl StubFactory {
    fn new() -> Self {
        Self {
            params: ConnectParams::new("10.0.0.1", 22).username("admin"),
        }
    }
}

#[async_trait]
impl SessionFactory for StubFactory {
    fn session_type(&self) -> &str {
        "stub"
    }

    fn params(&self) -> &ConnectParams {
        &self.params
    }

    async fn create(&self) -> Result<PooledSession> {
        let engine = ExpectEngine::new(
            Box::new(StubTransport { active: true }),
            EngineConfig::default(),
        );
        Ok(PooledSession::new("stub", self.params.clone(), engine))
    }
}

/// A transport whose liveness flag can be flipped from the outside and
/// whose reconnect behavior is scripted per factory.
struct SwitchableTransport {
    active: Arc<AtomicBool>,
    connect_ok: bool,
    connect_delay: Duration,
}

#[async_trait]
impl Transport for SwitchableTransport {
    async fn connect(&mut self) -> Result<()> {
        tokio::time::sleep(self.connect_delay).await;
        if self.connect_ok {
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(TransportError::Disconnected.into())
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        Err(TransportError::ReadTimeout(timeout).into())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Factory handing out switchable transports; each created session's
/// liveness flag is kept so the test can kill it while it sits idle.
struct SwitchFactory {
    params: ConnectParams,
    connect_ok: bool,
    connect_delay: Duration,
    flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl SwitchFactory {
    fn new(connect_ok: bool, connect_delay: Duration) -> Self {
        Self {
            params: ConnectParams::new("10.0.0.1", 22).username("admin"),
            connect_ok,
            connect_delay,
            flags: Mutex::new(Vec::new()),
        }
    }

    fn kill_all(&self) {
        for flag in self.flags.lock().unwrap().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SessionFactory for SwitchFactory {
    fn session_type(&self) -> &str {
        "switch"
    }

    fn params(&self) -> &ConnectParams {
        &self.params
    }

    async fn create(&self) -> Result<PooledSession> {
        let flag = Arc::new(AtomicBool::new(true));
        self.flags.lock().unwrap().push(flag.clone());
        let engine = ExpectEngine::new(
            Box::new(SwitchableTransport {
                active: flag,
                connect_ok: self.connect_ok,
                connect_delay: self.connect_delay,
            }),
            EngineConfig::default(),
        );
        Ok(PooledSession::new("switch", self.params.clone(), engine))
    }
}

/// A factory whose connections always fail.
struct BrokenFactory {
    kind: &'static str,
    params: ConnectParams,
}

#[async_trait]
impl SessionFactory for BrokenFactory {
    fn session_type(&self) -> &str {
        self.kind
    }

    fn params(&self) -> &ConnectParams {
        &self.params
    }

    async fn create(&self) -> Result<PooledSession> {
        Err(TransportError::Disconnected.into())
    }
}

fn stub_factories() -> Vec<Arc<dyn SessionFactory>> {
    vec![Arc::new(StubFactory::new())]
}

fn cisco_tree() -> ModeTree {
    ModeTree::new([
        Mode::new("exec", r"\S+>").unwrap(),
        Mode::new("enable", r"\S+#")
            .unwrap()
            .with_parent("exec")
            .with_enter("enable")
            .with_exit("disable")
            .with_not_contains("(config)"),
        Mode::new("config", r"\S+\(config\)#")
            .unwrap()
            .with_parent("enable")
            .with_enter("configure terminal")
            .with_exit("end"),
    ])
    .unwrap()
}

#[tokio::test]
async fn pool_reuses_returned_session() {
    let pool = SessionPool::new(PoolConfig {
        max_size: 2,
        ..PoolConfig::default()
    });
    let factories = stub_factories();

    let first = pool.get_session(&factories).await.unwrap();
    let first_id = first.id();
    pool.return_session(first).await;

    let again = pool.get_session(&factories).await.unwrap();
    assert_eq!(again.id(), first_id);
    assert_eq!(pool.live_count().await, 1);
    pool.return_session(again).await;
}

#[tokio::test]
async fn pool_never_exceeds_capacity() {
    let pool = SessionPool::new(PoolConfig {
        max_size: 2,
        checkout_timeout: Duration::from_millis(100),
        ..PoolConfig::default()
    });
    let factories = stub_factories();

    let a = pool.get_session(&factories).await.unwrap();
    let b = pool.get_session(&factories).await.unwrap();
    assert_eq!(pool.live_count().await, 2);

    let err = pool.get_session(&factories).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Pool(PoolError::Exhausted { .. })
    ));
    // A failed checkout must not leak a capacity slot.
    assert_eq!(pool.live_count().await, 2);

    pool.return_session(a).await;
    pool.return_session(b).await;
    assert_eq!(pool.idle_count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_wakes_waiter_on_return() {
    init_logs();
    let pool = Arc::new(SessionPool::new(PoolConfig {
        max_size: 1,
        checkout_timeout: Duration::from_secs(5),
        ..PoolConfig::default()
    }));
    let factories = stub_factories();

    let session = pool.get_session(&factories).await.unwrap();
    let held_id = session.id();

    let waiter = {
        let pool = pool.clone();
        let factories = factories.clone();
        let started = Arc::new(AtomicBool::new(false));
        let started_flag = started.clone();
        let handle = tokio::spawn(async move {
            started_flag.store(true, Ordering::SeqCst);
            pool.get_session(&factories).await
        });
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle
    };

    // Give the waiter time to block on the full pool.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    pool.return_session(session).await;

    let reused = waiter.await.unwrap().unwrap();
    assert_eq!(reused.id(), held_id);
    assert_eq!(pool.live_count().await, 1);
    pool.return_session(reused).await;
}

#[tokio::test]
async fn pool_drops_dead_session_on_return() {
    let pool = SessionPool::new(PoolConfig::default());
    let factories = stub_factories();

    let mut session = pool.get_session(&factories).await.unwrap();
    session.engine().disconnect().await.unwrap();
    assert!(!session.is_active());

    pool.return_session(session).await;
    assert_eq!(pool.live_count().await, 0);
    assert_eq!(pool.idle_count().await, 0);
}

#[tokio::test]
async fn pool_skips_incompatible_idle_sessions() {
    let pool = SessionPool::new(PoolConfig {
        max_size: 4,
        ..PoolConfig::default()
    });
    let factories = stub_factories();

    let session = pool.get_session(&factories).await.unwrap();
    let first_id = session.id();
    pool.return_session(session).await;

    // Same transport kind, different credentials: must not be reused.
    let other = StubFactory {
        params: ConnectParams::new("10.0.0.1", 22).username("operator"),
    };
    let other_factories: Vec<Arc<dyn SessionFactory>> = vec![Arc::new(other)];

    let fresh = pool.get_session(&other_factories).await.unwrap();
    assert_ne!(fresh.id(), first_id);
    assert_eq!(pool.live_count().await, 2);
    pool.return_session(fresh).await;
}

#[tokio::test]
async fn pool_evicts_dead_idle_session_and_creates_fresh() {
    let pool = SessionPool::new(PoolConfig {
        max_size: 2,
        ..PoolConfig::default()
    });
    let factory = Arc::new(SwitchFactory::new(false, Duration::ZERO));
    let factories: Vec<Arc<dyn SessionFactory>> = vec![factory.clone()];

    let first = pool.get_session(&factories).await.unwrap();
    let first_id = first.id();
    pool.return_session(first).await;

    // The idle session dies; its reconnect fails, so checkout must evict
    // it and keep going with a freshly created one.
    factory.kill_all();
    let replacement = pool.get_session(&factories).await.unwrap();
    assert_ne!(replacement.id(), first_id);
    assert!(replacement.is_active());
    assert_eq!(pool.live_count().await, 1);
    pool.return_session(replacement).await;
}

#[tokio::test]
async fn pool_probes_long_idle_session_and_reconnects() {
    let pool = SessionPool::new(PoolConfig {
        idle_probe_threshold: Duration::ZERO,
        ..PoolConfig::default()
    });
    let factory = Arc::new(SwitchFactory::new(true, Duration::ZERO));
    let factories: Vec<Arc<dyn SessionFactory>> = vec![factory.clone()];

    let mut session = pool.get_session(&factories).await.unwrap();
    let id = session.id();
    // Give the engine a prompt so the idle probe actually talks to the
    // device (and fails, since this transport never answers).
    session.engine().set_prompt(Prompt::literal("sw# "));
    pool.return_session(session).await;

    let mut revived = pool.get_session(&factories).await.unwrap();
    // Same connection, but reconnected: prompt state is gone.
    assert_eq!(revived.id(), id);
    assert!(revived.engine().cached_prompt().is_none());
    assert!(revived.current_mode().is_none());
    pool.return_session(revived).await;
}

#[tokio::test]
async fn stale_chain_respects_checkout_deadline() {
    let pool = SessionPool::new(PoolConfig {
        checkout_timeout: Duration::from_millis(50),
        ..PoolConfig::default()
    });
    let factory = Arc::new(SwitchFactory::new(false, Duration::from_millis(200)));
    let factories: Vec<Arc<dyn SessionFactory>> = vec![factory.clone()];

    let session = pool.get_session(&factories).await.unwrap();
    pool.return_session(session).await;
    factory.kill_all();

    // The failed reconnect alone eats the whole deadline; checkout must
    // give up instead of spending more time creating a replacement.
    let err = pool.get_session(&factories).await.unwrap_err();
    assert!(matches!(err, Error::Pool(PoolError::Exhausted { .. })));
    assert_eq!(pool.live_count().await, 0);
}

#[tokio::test]
async fn pool_reports_every_failed_factory() {
    let pool = SessionPool::new(PoolConfig::default());
    let factories: Vec<Arc<dyn SessionFactory>> = vec![
        Arc::new(BrokenFactory {
            kind: "ssh",
            params: ConnectParams::new("10.0.0.1", 22),
        }),
        Arc::new(BrokenFactory {
            kind: "tcp",
            params: ConnectParams::new("10.0.0.1", 23),
        }),
    ];

    let err = pool.get_session(&factories).await.unwrap_err();
    match err {
        Error::Pool(PoolError::CreationFailed { attempted }) => {
            assert_eq!(attempted, vec!["ssh".to_string(), "tcp".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The reserved slot is released on failure.
    assert_eq!(pool.live_count().await, 0);
}

#[tokio::test]
async fn detect_and_climb_to_config() {
    init_logs();
    let tree = cisco_tree();
    let transport = ScriptedTransport::new(vec![
        ("\n", vec!["router>"]),
        ("enable\n", vec!["enable\r\nrouter#"]),
        ("configure terminal\n", vec!["configure terminal\r\nrouter(config)#"]),
    ]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    let router = ModeRouter::new(&tree);

    let current = router.detect(&mut engine).await.unwrap();
    assert_eq!(current, "exec");

    router.switch(&mut engine, "exec", "config").await.unwrap();

    let cached = engine.cached_prompt().unwrap().to_string();
    assert!(cached.contains("config"));
}

#[tokio::test]
async fn exact_prompt_probed_once_then_reused() {
    let tree = ModeTree::new([
        Mode::new("login", r"\S+>").unwrap(),
        Mode::new("shell", r"\S+#")
            .unwrap()
            .with_parent("login")
            .with_enter("enable")
            .with_exit("disable")
            .with_exact_prompt(),
    ])
    .unwrap();

    // One probe after the first entry; the second entry must rely on the
    // cached literal (the script would panic on an extra probe send).
    let transport = ScriptedTransport::new(vec![
        ("enable\n", vec!["enable\r\nswitch-01# "]),
        ("\n", vec!["switch-01# "]),
        ("disable\n", vec!["disable\r\nswitch-01> "]),
        ("enable\n", vec!["enable\r\nswitch-01# "]),
    ]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    engine.set_prompt(tree.get("login").unwrap().prompt.clone());
    let router = ModeRouter::new(&tree);

    router.switch(&mut engine, "login", "shell").await.unwrap();
    let exact = engine.exact_prompt("shell").cloned().unwrap();
    assert_eq!(exact, Prompt::literal("switch-01#"));

    router.switch(&mut engine, "shell", "login").await.unwrap();
    router.switch(&mut engine, "login", "shell").await.unwrap();
    assert_eq!(engine.cached_prompt(), Some(&exact));
}

#[tokio::test]
async fn descend_runs_exit_commands_in_order() {
    let tree = cisco_tree();
    let transport = ScriptedTransport::new(vec![
        ("end\n", vec!["end\r\nrouter#"]),
        ("disable\n", vec!["disable\r\nrouter>"]),
    ]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    engine.set_prompt(tree.get("config").unwrap().prompt.clone());

    let router = ModeRouter::new(&tree);
    router.switch(&mut engine, "config", "exec").await.unwrap();
}

#[tokio::test]
async fn command_runs_after_positioning() {
    let tree = cisco_tree();
    let transport = ScriptedTransport::new(vec![
        ("\n", vec!["router>"]),
        ("enable\n", vec!["enable\r\nrouter#"]),
        (
            "show running-config\n",
            vec!["show running-config\r\nhostname router\r\n", "router#"],
        ),
    ]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    let router = ModeRouter::new(&tree);

    let current = router.detect(&mut engine).await.unwrap();
    router.switch(&mut engine, &current, "enable").await.unwrap();

    let out = engine
        .send_command(&Command::new("show running-config"))
        .await
        .unwrap();
    assert_eq!(out.text, "hostname router\n");
}

#[tokio::test]
async fn detection_fails_on_unknown_prompt() {
    let tree = cisco_tree();
    let transport = ScriptedTransport::new(vec![("\n", vec![])]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    let router = ModeRouter::new(&tree);

    let err = router.detect(&mut engine).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Mode(teleprompt::ModeError::CannotDetermineMode { .. })
    ));
}

#[tokio::test]
async fn wedged_command_is_resent_after_reentry() {
    init_logs();
    let tree = cisco_tree();
    // First try stalls (no reply); recovery re-detects the mode and the
    // second try succeeds.
    let transport = ScriptedTransport::new(vec![
        ("show clock\n", vec![]),
        ("\n", vec!["router#"]),
        ("show clock\n", vec!["show clock\r\n12:00:00 UTC\r\n", "router#"]),
    ]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    engine.set_prompt(tree.get("enable").unwrap().prompt.clone());

    let out = teleprompt::resend_with_reentry(
        &mut engine,
        &tree,
        "enable",
        &Command::new("show clock"),
        2,
    )
    .await
    .unwrap();
    assert_eq!(out.text, "12:00:00 UTC\n");
}

#[tokio::test]
async fn single_attempt_surfaces_the_stall() {
    let tree = cisco_tree();
    let transport = ScriptedTransport::new(vec![("show clock\n", vec![])]);
    let mut engine = ExpectEngine::new(Box::new(transport), EngineConfig::default());
    engine.set_prompt(tree.get("enable").unwrap().prompt.clone());

    let err = teleprompt::resend_with_reentry(
        &mut engine,
        &tree,
        "enable",
        &Command::new("show clock"),
        1,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Engine(EngineError::LoopLimitExceeded { .. })
    ));
}
