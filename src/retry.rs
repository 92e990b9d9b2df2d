//! Recovery helper: re-anchor a wedged session and resend a command.
//!
//! A command that times out or exhausts its read budget usually leaves the
//! session at an unknown point (a pager, a half-entered mode, a slow device).
//! Instead of discarding the connection, re-detect the current mode, route
//! back to where the command belongs, and try again.

use log::warn;

use crate::command::Command;
use crate::engine::{CommandOutput, ExpectEngine};
use crate::error::{EngineError, Error, Result, TransportError};
use crate::mode::{ModeRouter, ModeTree};

/// Whether an error is worth a re-anchor-and-resend cycle.
///
/// Device-reported failures and prompt mismatches are deterministic; only
/// stalls (read timeouts, exhausted read budgets) can be transient.
fn is_recoverable(err: &Error) -> bool {
    matches!(
        err,
        Error::Engine(EngineError::LoopLimitExceeded { .. })
            | Error::Transport(TransportError::ReadTimeout(_))
    )
}

/// Send `cmd` in `mode`, re-detecting and re-routing the session after each
/// recoverable failure, up to `attempts` tries in total.
///
/// The session must already be positioned in `mode`; on a clean first try
/// this costs nothing over a plain `send_command`. The last error is
/// returned when every attempt fails.
pub async fn resend_with_reentry(
    engine: &mut ExpectEngine,
    tree: &ModeTree,
    mode: &str,
    cmd: &Command,
    attempts: usize,
) -> Result<CommandOutput> {
    let router = ModeRouter::new(tree);
    let mut last_err = None;

    for attempt in 1..=attempts.max(1) {
        if attempt > 1 {
            warn!(
                "resending '{}' (attempt {attempt}/{attempts}) after: {}",
                cmd.text,
                last_err.as_ref().map_or_else(String::new, Error::to_string)
            );
            let current = router.detect(engine).await?;
            if current != mode {
                router.switch(engine, &current, mode).await?;
            }
        }

        match engine.send_command(cmd).await {
            Ok(out) => return Ok(out),
            Err(e) if is_recoverable(&e) => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    // attempts >= 1, so at least one send ran and stored its error.
    Err(last_err.unwrap_or_else(|| {
        EngineError::LoopLimitExceeded {
            command: cmd.text.clone(),
            empty_reads: 0,
            output: String::new(),
        }
        .into()
    }))
}
