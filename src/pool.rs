//! Bounded pool of live sessions shared across logical callers.
//!
//! One mutex guards the idle list and the live-session counter; checkout
//! blocks on a notification with an overall deadline and re-checks its
//! predicate after every wakeup. A session is exclusively owned by whoever
//! holds it — the pool at rest, exactly one caller between checkout and
//! return.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, timeout};

use crate::engine::{EngineConfig, ExpectEngine};
use crate::error::{PoolError, Result};
use crate::mode::{ModeRouter, ModeTree};
use crate::transport::{ConnectParams, SshTransport, TcpTransport, Transport};

/// Pool tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum simultaneously live (idle + checked out) sessions.
    pub max_size: usize,

    /// How long a checkout may wait before failing with `PoolExhausted`.
    pub checkout_timeout: Duration,

    /// Bound on reconnecting a stale idle session during checkout.
    pub reconnect_timeout: Duration,

    /// Idle age beyond which a session is probed before reuse instead of
    /// trusting its liveness flag.
    pub idle_probe_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            checkout_timeout: Duration::from_secs(30),
            reconnect_timeout: Duration::from_secs(10),
            idle_probe_threshold: Duration::from_secs(60),
        }
    }
}

/// A live session as managed by the pool: the expect engine plus the
/// identity needed for compatibility matching.
pub struct PooledSession {
    id: u64,
    session_type: String,
    params: ConnectParams,
    engine: ExpectEngine,
    current_mode: Option<String>,
    last_active: std::time::Instant,
}

impl PooledSession {
    /// Wrap a freshly created engine. Called by session factories.
    pub fn new(
        session_type: impl Into<String>,
        params: ConnectParams,
        engine: ExpectEngine,
    ) -> Self {
        Self {
            id: 0,
            session_type: session_type.into(),
            params,
            engine,
            current_mode: None,
            last_active: std::time::Instant::now(),
        }
    }

    /// Pool-unique identity (0 until first checkout).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The concrete transport kind ("ssh", "tcp", ...).
    pub fn session_type(&self) -> &str {
        &self.session_type
    }

    /// The parameters the session was opened with.
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// The expect engine driving this session.
    pub fn engine(&mut self) -> &mut ExpectEngine {
        &mut self.engine
    }

    /// The mode the session is currently believed to sit in.
    pub fn current_mode(&self) -> Option<&str> {
        self.current_mode.as_deref()
    }

    /// Record the session's current mode.
    pub fn set_current_mode(&mut self, mode: Option<String>) {
        self.current_mode = mode;
    }

    /// Whether the underlying connection is believed alive.
    pub fn is_active(&self) -> bool {
        self.engine.is_active()
    }

    /// How long the session has been idle since its last checkout/return.
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

/// Builds sessions of one concrete kind with fixed connection parameters.
///
/// Multiple factories can be offered together ("try SSH, else TCP"); the
/// pool tries them in order until one succeeds.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// The concrete transport kind this factory produces.
    fn session_type(&self) -> &str;

    /// The parameters sessions will be opened with.
    fn params(&self) -> &ConnectParams;

    /// Connect and wrap a new live session.
    async fn create(&self) -> Result<PooledSession>;

    /// Whether an existing session can stand in for one this factory would
    /// create. Both the concrete type and the connection parameters must
    /// match — a session opened with different credentials or host is never
    /// silently reused.
    fn is_compatible(&self, session: &PooledSession) -> bool {
        session.session_type() == self.session_type() && session.params() == self.params()
    }
}

/// Factory producing SSH-backed sessions.
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    params: ConnectParams,
    engine_config: EngineConfig,
}

impl SshSessionFactory {
    /// Create a factory for the given connection parameters.
    pub fn new(params: ConnectParams, engine_config: EngineConfig) -> Self {
        Self {
            params,
            engine_config,
        }
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    fn session_type(&self) -> &str {
        "ssh"
    }

    fn params(&self) -> &ConnectParams {
        &self.params
    }

    async fn create(&self) -> Result<PooledSession> {
        let mut transport = SshTransport::new(self.params.clone());
        transport.connect().await?;
        let engine = ExpectEngine::new(Box::new(transport), self.engine_config.clone());
        Ok(PooledSession::new("ssh", self.params.clone(), engine))
    }
}

/// Factory producing raw-TCP sessions.
#[derive(Debug, Clone)]
pub struct TcpSessionFactory {
    params: ConnectParams,
    engine_config: EngineConfig,
}

impl TcpSessionFactory {
    /// Create a factory for the given connection parameters.
    pub fn new(params: ConnectParams, engine_config: EngineConfig) -> Self {
        Self {
            params,
            engine_config,
        }
    }
}

#[async_trait]
impl SessionFactory for TcpSessionFactory {
    fn session_type(&self) -> &str {
        "tcp"
    }

    fn params(&self) -> &ConnectParams {
        &self.params
    }

    async fn create(&self) -> Result<PooledSession> {
        let mut transport = TcpTransport::new(self.params.clone());
        transport.connect().await?;
        let engine = ExpectEngine::new(Box::new(transport), self.engine_config.clone());
        Ok(PooledSession::new("tcp", self.params.clone(), engine))
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<PooledSession>,
    live: usize,
}

/// Bounded, shared session pool.
pub struct SessionPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Notify,
    next_id: AtomicU64,
}

enum Claim {
    Reuse(PooledSession),
    Create,
    Wait,
}

impl SessionPool {
    /// Create a pool with the given configuration.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Currently live (idle + checked out) sessions.
    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live
    }

    /// Currently idle sessions.
    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    /// Check out a session compatible with one of the offered factories.
    ///
    /// Blocks until an idle compatible session exists, a new one can be
    /// created under capacity, or the checkout timeout elapses
    /// (`PoolExhausted`). A stale idle session gets one bounded reconnect
    /// attempt; on failure it is evicted and the search continues.
    pub async fn get_session(
        &self,
        factories: &[Arc<dyn SessionFactory>],
    ) -> Result<PooledSession> {
        let deadline = Instant::now() + self.config.checkout_timeout;

        loop {
            // Register interest before checking the predicate so a wakeup
            // between check and wait is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claim = {
                let mut state = self.state.lock().await;
                if let Some(pos) = state
                    .idle
                    .iter()
                    .position(|s| factories.iter().any(|f| f.is_compatible(s)))
                {
                    Claim::Reuse(state.idle.remove(pos))
                } else if state.live < self.config.max_size {
                    state.live += 1;
                    Claim::Create
                } else {
                    Claim::Wait
                }
            };

            match claim {
                Claim::Reuse(mut session) => {
                    let fresh = session.is_active()
                        && (session.idle_for() < self.config.idle_probe_threshold
                            || session.engine().probe().await);
                    if fresh {
                        debug!("reusing idle session {}", session.id());
                        session.last_active = std::time::Instant::now();
                        return Ok(session);
                    }
                    debug!("idle session {} is stale, reconnecting", session.id());
                    match timeout(self.config.reconnect_timeout, session.engine().reconnect())
                        .await
                    {
                        Ok(Ok(())) => {
                            session.set_current_mode(None);
                            session.last_active = std::time::Instant::now();
                            return Ok(session);
                        }
                        Ok(Err(e)) => warn!("reconnect of session {} failed: {e}", session.id()),
                        Err(_) => warn!(
                            "reconnect of session {} timed out after {:?}",
                            session.id(),
                            self.config.reconnect_timeout
                        ),
                    }
                    self.evict(session).await;
                    // A chain of stale sessions must not overrun the
                    // checkout deadline one reconnect at a time.
                    if Instant::now() >= deadline {
                        return Err(PoolError::Exhausted {
                            waited: self.config.checkout_timeout,
                        }
                        .into());
                    }
                }
                Claim::Create => match self.create_session(factories).await {
                    Ok(session) => return Ok(session),
                    Err(e) => {
                        self.release_slot().await;
                        return Err(e);
                    }
                },
                Claim::Wait => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return Err(PoolError::Exhausted {
                            waited: self.config.checkout_timeout,
                        }
                        .into());
                    };
                    if timeout(remaining, notified).await.is_err() {
                        return Err(PoolError::Exhausted {
                            waited: self.config.checkout_timeout,
                        }
                        .into());
                    }
                }
            }
        }
    }

    /// Check out a session and position it at `target` mode in `tree`.
    ///
    /// A session whose routing fails is removed (its mode state is unknown)
    /// rather than re-pooled.
    pub async fn get_session_in_mode(
        &self,
        factories: &[Arc<dyn SessionFactory>],
        tree: &ModeTree,
        target: &str,
    ) -> Result<PooledSession> {
        let mut session = self.get_session(factories).await?;
        let router = ModeRouter::new(tree);

        let positioned = async {
            let current = match session.current_mode() {
                Some(mode) => mode.to_string(),
                None => router.detect(session.engine()).await?,
            };
            if current != target {
                router.switch(session.engine(), &current, target).await?;
            }
            Ok(())
        }
        .await;

        match positioned {
            Ok(()) => {
                session.set_current_mode(Some(target.to_string()));
                Ok(session)
            }
            Err(e) => {
                self.remove_session(session).await;
                Err(e)
            }
        }
    }

    /// Hand a session back. Re-pooled only if it reports itself active;
    /// a dead session is dropped and its slot freed. Either way one blocked
    /// waiter is woken.
    ///
    /// A session whose last command failed with a device-reported error is
    /// still good — only connection-level death disqualifies it.
    pub async fn return_session(&self, mut session: PooledSession) {
        if session.is_active() {
            debug!("session {} returned to pool", session.id());
            session.last_active = std::time::Instant::now();
            let mut state = self.state.lock().await;
            state.idle.push(session);
        } else {
            debug!("session {} returned dead, dropping", session.id());
            let mut state = self.state.lock().await;
            state.live -= 1;
        }
        self.available.notify_one();
    }

    /// Explicitly evict a session: disconnect, free its slot, wake one
    /// waiter.
    pub async fn remove_session(&self, mut session: PooledSession) {
        debug!("removing session {}", session.id());
        if let Err(e) = session.engine().disconnect().await {
            debug!("disconnect of session {} failed: {e}", session.id());
        }
        self.evict(session).await;
    }

    async fn create_session(
        &self,
        factories: &[Arc<dyn SessionFactory>],
    ) -> Result<PooledSession> {
        let mut attempted = Vec::with_capacity(factories.len());

        for factory in factories {
            attempted.push(factory.session_type().to_string());
            match factory.create().await {
                Ok(mut session) => {
                    session.id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "created {} session {} to {}",
                        session.session_type(),
                        session.id(),
                        session.params().socket_addr()
                    );
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        "{} session creation to {} failed: {e}",
                        factory.session_type(),
                        factory.params().socket_addr()
                    );
                }
            }
        }

        Err(PoolError::CreationFailed { attempted }.into())
    }

    async fn evict(&self, session: PooledSession) {
        drop(session);
        self.release_slot().await;
    }

    async fn release_slot(&self) {
        let mut state = self.state.lock().await;
        state.live -= 1;
        drop(state);
        self.available.notify_one();
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("session_type", &self.session_type)
            .field("params", &self.params)
            .field("current_mode", &self.current_mode)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.config)
            .finish()
    }
}
