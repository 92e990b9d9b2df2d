//! The expect engine: the send/read/match/act loop that drives one command
//! to completion.
//!
//! `ExpectEngine` owns its transport exclusively; `&mut self` on every
//! operation means two tasks can never interleave `send_command` and
//! `switch_prompt` on the same session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::buffer::{self, ResponseBuffer};
use crate::command::Command;
use crate::error::{EngineError, Error, Result, TransportError};
use crate::pattern::Prompt;
use crate::rules::{ActionReply, LoopDetector};
use crate::transport::Transport;

/// Bound on best-effort drain iterations.
const MAX_DRAIN_READS: usize = 32;

/// Tunables for the read-match-act loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a single blocking receive may wait.
    pub read_timeout: Duration,

    /// How many consecutive empty reads are tolerated before the command
    /// fails with `LoopLimitExceeded`.
    pub max_empty_reads: u32,

    /// Per-read timeout while draining stale input.
    pub drain_timeout: Duration,

    /// Loop detector: repetitions of a combination that constitute a loop.
    pub max_action_loops: usize,

    /// Loop detector: longest rule combination checked for repetition.
    pub max_combination_length: usize,

    /// Tail-search depth for prompt matching.
    pub search_depth: usize,

    /// Reject commands whose explicit prompt disagrees with the session's
    /// resolved prompt.
    pub reconcile_prompts: bool,

    /// Line terminator appended to every send.
    pub line_terminator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            max_empty_reads: 5,
            drain_timeout: Duration::from_millis(200),
            max_action_loops: 3,
            max_combination_length: 2,
            search_depth: 1000,
            reconcile_prompts: true,
            line_terminator: "\n".to_string(),
        }
    }
}

/// Result of one executed command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    /// The command that was executed.
    pub command: String,

    /// The output with command echo and trailing prompt removed.
    pub text: String,

    /// The full normalized output, echo and prompt included.
    pub raw: String,

    /// The prompt text matched at the end.
    pub prompt: String,

    /// Time taken to execute the command.
    pub elapsed: Duration,
}

/// Drives commands over one exclusively-owned transport.
pub struct ExpectEngine {
    transport: Box<dyn Transport>,
    config: EngineConfig,

    /// The prompt the session is currently believed to sit at.
    prompt: Option<Prompt>,

    /// Per-session exact prompts, keyed by mode name. Mode objects are
    /// shared configuration; resolution state lives here instead.
    exact_prompts: HashMap<String, Prompt>,
}

impl ExpectEngine {
    /// Wrap a transport. The transport may or may not be connected yet.
    pub fn new(transport: Box<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            transport,
            config,
            prompt: None,
            exact_prompts: HashMap::new(),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The currently cached prompt, if any.
    pub fn cached_prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    /// Pin the cached prompt (after external mode knowledge, e.g. detection).
    pub fn set_prompt(&mut self, prompt: Prompt) {
        self.prompt = Some(prompt);
    }

    /// Invalidate the cached prompt.
    pub fn discard_prompt(&mut self) {
        self.prompt = None;
    }

    /// The exact prompt resolved for a mode on this session, if probed.
    pub fn exact_prompt(&self, mode: &str) -> Option<&Prompt> {
        self.exact_prompts.get(mode)
    }

    /// Record a probed exact prompt for a mode on this session.
    pub fn set_exact_prompt(&mut self, mode: impl Into<String>, prompt: Prompt) {
        self.exact_prompts.insert(mode.into(), prompt);
    }

    /// Whether the underlying connection is believed alive.
    pub fn is_active(&self) -> bool {
        self.transport.is_active()
    }

    /// Reconnect the transport, dropping all per-session prompt state.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.prompt = None;
        self.exact_prompts.clear();
        self.transport.connect().await
    }

    /// Disconnect the transport.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// Send one command and read until its prompt returns.
    ///
    /// The read loop accumulates normalized output, fires matching action
    /// rules (starting a fresh buffer bunch after each so interaction noise
    /// stays out of the result), counts empty reads against the budget, and
    /// feeds the loop detector when the command asks for it. The error table
    /// is applied to the final text and outranks a successful prompt match:
    /// a device can print both its prompt and an error line in one flush.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<CommandOutput> {
        let target = self.resolve_prompt(cmd)?;
        let start = Instant::now();

        if cmd.drain_first {
            self.drain().await?;
        }
        self.send_line(&cmd.text, false).await?;

        let (buf, prompt_text) = self.read_until(cmd, Some(&target)).await?;

        let raw = buf.full();
        let text = clean_output(&buf.concat(), &cmd.text, &target);

        if let Some(errors) = &cmd.errors {
            if let Some(err) = errors.check(&cmd.text, &text) {
                return Err(err);
            }
        }

        Ok(CommandOutput {
            command: cmd.text.clone(),
            text,
            raw,
            prompt: prompt_text,
            elapsed: start.elapsed(),
        })
    }

    /// Send a command across a prompt boundary and resolve the new prompt.
    ///
    /// The cached prompt is discarded up front since it is about to change.
    /// With an explicit expected prompt this behaves like [`send_command`]
    /// but caches and returns the new prompt; without one, the first stable
    /// tail line after output goes quiet becomes the session's literal
    /// prompt. Used when entering modes whose exact prompt text is unknown
    /// up front.
    ///
    /// [`send_command`]: ExpectEngine::send_command
    pub async fn switch_prompt(&mut self, cmd: &Command) -> Result<Prompt> {
        self.prompt = None;

        if cmd.drain_first {
            self.drain().await?;
        }
        self.send_line(&cmd.text, false).await?;

        let resolved = match &cmd.prompt {
            Some(explicit) => {
                let (buf, _) = self.read_until(cmd, Some(explicit)).await?;
                if let Some(errors) = &cmd.errors {
                    let text = clean_output(&buf.concat(), &cmd.text, explicit);
                    if let Some(err) = errors.check(&cmd.text, &text) {
                        return Err(err);
                    }
                }
                explicit.clone()
            }
            None => {
                let (buf, line) = self.read_until(cmd, None).await?;
                if let Some(errors) = &cmd.errors {
                    if let Some(err) = errors.check(&cmd.text, &buf.concat()) {
                        return Err(err);
                    }
                }
                Prompt::literal(line)
            }
        };

        debug!("switched prompt to '{resolved}'");
        self.prompt = Some(resolved.clone());
        Ok(resolved)
    }

    /// Cheap liveness check: send a bare line terminator and wait for the
    /// cached prompt to come back. Without a cached prompt this only asks
    /// the transport.
    pub async fn probe(&mut self) -> bool {
        let Some(prompt) = self.prompt.clone() else {
            return self.transport.is_active();
        };
        let cmd = Command::probe().with_prompt(prompt);
        self.send_command(&cmd).await.is_ok()
    }

    /// Best-effort flush of stale buffered input. Bounded; never blocks
    /// past `drain_timeout` per read.
    pub async fn drain(&mut self) -> Result<()> {
        for _ in 0..MAX_DRAIN_READS {
            match self.transport.receive(self.config.drain_timeout).await {
                Ok(data) if data.is_empty() => break,
                Ok(data) => trace!("drained {} stale bytes", data.len()),
                Err(Error::Transport(TransportError::ReadTimeout(_))) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The core read loop.
    ///
    /// With a target prompt, exits when the active bunch tail matches it.
    /// Without one (prompt resolution), exits on the first quiet read after
    /// data arrived, returning the tail line as the resolved prompt text.
    async fn read_until(
        &mut self,
        cmd: &Command,
        target: Option<&Prompt>,
    ) -> Result<(ResponseBuffer, String)> {
        let mut buf = ResponseBuffer::new(self.config.search_depth);
        let mut detector = LoopDetector::new(
            self.config.max_action_loops,
            self.config.max_combination_length,
        );
        let mut actions = cmd.actions.clone();
        let read_timeout = cmd.timeout.unwrap_or(self.config.read_timeout);
        let mut empty_reads = 0u32;
        let mut got_data = false;

        loop {
            let chunk = match self.transport.receive(read_timeout).await {
                Ok(data) => data,
                Err(Error::Transport(TransportError::ReadTimeout(_))) => String::new(),
                Err(e) => return Err(e),
            };

            if chunk.is_empty() {
                if target.is_none() && got_data {
                    let line = buffer::last_line(buf.tail()).trim_start().to_string();
                    if !line.is_empty() {
                        return Ok((buf, line));
                    }
                }
                empty_reads += 1;
                if empty_reads > self.config.max_empty_reads {
                    if target.is_none() && got_data {
                        return Err(EngineError::CannotResolvePrompt {
                            tail: buf.tail().to_string(),
                        }
                        .into());
                    }
                    return Err(EngineError::LoopLimitExceeded {
                        command: cmd.text.clone(),
                        empty_reads,
                        output: buf.full(),
                    }
                    .into());
                }
                continue;
            }

            empty_reads = 0;
            got_data = true;
            buf.push(&buffer::normalize(&chunk));

            let mut matched_prompt = None;
            if let Some(t) = target {
                if t.is_match(buf.tail()) {
                    matched_prompt = Some(
                        t.matched_text(buf.tail()).unwrap_or_default().to_string(),
                    );
                }
            }

            if let Some(table) = actions.as_mut() {
                if let Some(id) = table.match_first(buf.current()) {
                    if cmd.detect_loops && detector.record(&id) {
                        return Err(EngineError::ActionLoopDetected {
                            pattern: id,
                            output: buf.full(),
                        }
                        .into());
                    }
                    let reply = table.fire(&id, buf.current());
                    buf.consume_bunch();
                    match reply {
                        Some(ActionReply::Send(text)) => {
                            debug!("action '{id}' replying {text:?}");
                            self.send_line(&text, false).await?;
                        }
                        Some(ActionReply::SendHidden(text)) => {
                            debug!("action '{id}' replying <hidden>");
                            self.send_line(&text, true).await?;
                        }
                        Some(ActionReply::None) | None => {
                            debug!("action '{id}' fired without reply");
                        }
                    }
                }
            }

            if let Some(prompt_text) = matched_prompt {
                return Ok((buf, prompt_text));
            }
        }
    }

    async fn send_line(&mut self, text: &str, hidden: bool) -> Result<()> {
        if hidden {
            trace!("send: <hidden>");
        } else {
            trace!("send: {text:?}");
        }
        let line = format!("{}{}", text, self.config.line_terminator);
        self.transport.send(&line).await
    }

    fn resolve_prompt(&self, cmd: &Command) -> Result<Prompt> {
        match (&cmd.prompt, &self.prompt) {
            (Some(explicit), Some(resolved)) => {
                if self.config.reconcile_prompts && explicit != resolved {
                    return Err(EngineError::PromptMismatch {
                        expected: explicit.to_string(),
                        resolved: resolved.to_string(),
                    }
                    .into());
                }
                Ok(explicit.clone())
            }
            (Some(explicit), None) => Ok(explicit.clone()),
            (None, Some(cached)) => Ok(cached.clone()),
            (None, None) => Err(EngineError::NoPrompt {
                command: cmd.text.clone(),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for ExpectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpectEngine")
            .field("prompt", &self.prompt)
            .field("exact_prompts", &self.exact_prompts)
            .field("active", &self.transport.is_active())
            .finish()
    }
}

/// Strip the command echo from the front and the trailing prompt from the
/// back of a raw result.
fn clean_output(raw: &str, command: &str, prompt: &Prompt) -> String {
    let output = if command.is_empty() {
        raw
    } else {
        raw.strip_prefix(command).unwrap_or(raw)
    };
    let output = output.trim_start_matches(['\r', '\n']);

    match prompt.find_last(output) {
        Some((start, _)) => output[..start].to_string(),
        None => output.to_string(),
    }
}
