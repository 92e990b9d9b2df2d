//! # Teleprompt
//!
//! Async prompt-driven automation for remote interactive sessions.
//!
//! Teleprompt drives CLIs over SSH or raw TCP the way a human operator
//! would: send a command, watch the output, answer interactive questions,
//! and stop when the prompt comes back. Sessions are pooled and navigated
//! through a tree of command modes (think exec / enable / config).
//!
//! ## Features
//!
//! - Async SSH sessions via russh, plus a raw TCP transport
//! - Expect engine with tail-limited prompt search and output normalization
//! - Pattern-action tables for answering prompts mid-command
//! - Loop detection for interactions that stop making progress
//! - Mode tree with least-common-ancestor routing between modes
//! - Bounded session pool with parameter-matched reuse
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use teleprompt::{
//!     Command, ConnectParams, EngineConfig, PoolConfig, SessionFactory, SessionPool,
//!     SshSessionFactory,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), teleprompt::Error> {
//!     let params = ConnectParams::new("192.168.1.1", 22)
//!         .username("admin")
//!         .password("secret");
//!     let factories: Vec<Arc<dyn SessionFactory>> =
//!         vec![Arc::new(SshSessionFactory::new(params, EngineConfig::default()))];
//!
//!     let pool = SessionPool::new(PoolConfig::default());
//!     let mut session = pool.get_session(&factories).await?;
//!
//!     let out = session
//!         .engine()
//!         .send_command(&Command::new("show version"))
//!         .await?;
//!     println!("{}", out.text);
//!
//!     pool.return_session(session).await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod command;
pub mod engine;
pub mod error;
pub mod mode;
pub mod pattern;
pub mod pool;
pub mod retry;
pub mod rules;
pub mod transport;

// Re-export main types for convenience
pub use command::Command;
pub use engine::{CommandOutput, EngineConfig, ExpectEngine};
pub use error::{EngineError, Error, ModeError, PoolError, Result, TransportError};
pub use mode::{Mode, ModeRouter, ModeTree, Step};
pub use pattern::Prompt;
pub use pool::{
    PoolConfig, PooledSession, SessionFactory, SessionPool, SshSessionFactory, TcpSessionFactory,
};
pub use retry::resend_with_reentry;
pub use rules::{ActionReply, ActionRule, ActionTable, ErrorRule, ErrorTable, FailureContext};
pub use transport::{AuthMethod, ConnectParams, SshTransport, TcpTransport, Transport};
