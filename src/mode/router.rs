//! Route computation and execution between command modes.
//!
//! Routing is a least-common-ancestor walk over the mode tree: the path from
//! the current mode to the root and the path from the target to the root are
//! intersected; everything below the shared ancestor on the current side
//! becomes exit steps, everything below it on the target side becomes enter
//! steps.

use log::debug;

use super::{Mode, ModeTree};
use crate::command::Command;
use crate::engine::ExpectEngine;
use crate::error::{EngineError, Error, ModeError, Result};
use crate::pattern::Prompt;

/// One hop in a mode route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Enter the named mode (send its enter commands, expect its prompt).
    Enter(String),

    /// Exit the named mode (send its exit commands, expect the parent's
    /// prompt).
    Exit(String),
}

/// Computes and executes mode routes over a shared tree.
#[derive(Debug, Clone, Copy)]
pub struct ModeRouter<'a> {
    tree: &'a ModeTree,
}

impl<'a> ModeRouter<'a> {
    /// Create a router over the given tree.
    pub fn new(tree: &'a ModeTree) -> Self {
        Self { tree }
    }

    /// Compute the ordered steps from mode `from` to mode `to`.
    ///
    /// `route(a, a)` is empty; exits come deepest-first, enters
    /// shallowest-first.
    pub fn route(&self, from: &str, to: &str) -> Result<Vec<Step>> {
        let down = self.tree.path_to_root(from)?;
        let up = self.tree.path_to_root(to)?;

        // Both paths end at the root, so a common ancestor always exists.
        let ancestor = down
            .iter()
            .position(|name| up.contains(name))
            .expect("paths share the root");
        let ancestor_in_up = up
            .iter()
            .position(|name| name == &down[ancestor])
            .expect("ancestor is on the target path");

        let mut steps: Vec<Step> = down[..ancestor]
            .iter()
            .map(|name| Step::Exit(name.clone()))
            .collect();
        steps.extend(
            up[..ancestor_in_up]
                .iter()
                .rev()
                .map(|name| Step::Enter(name.clone())),
        );

        Ok(steps)
    }

    /// Drive the engine from mode `from` to mode `to`.
    pub async fn switch(&self, engine: &mut ExpectEngine, from: &str, to: &str) -> Result<()> {
        for step in self.route(from, to)? {
            debug!("mode step: {step:?}");
            match step {
                Step::Enter(name) => self.step_up(engine, &name).await?,
                Step::Exit(name) => self.step_down(engine, &name).await?,
            }
        }
        Ok(())
    }

    /// Determine which mode a session currently sits in.
    ///
    /// Probes with an empty command expecting the union of every mode's
    /// prompt; the first mode (definition order) whose prompt matches the
    /// resolved tail identifies the mode. No match is fatal — a session in
    /// an unknown state must not be treated as "no mode".
    pub async fn detect(&self, engine: &mut ExpectEngine) -> Result<String> {
        engine.discard_prompt();

        let cmd = Command::probe()
            .with_prompt(self.tree.union_prompt())
            .drain_first();

        let out = match engine.send_command(&cmd).await {
            Ok(out) => out,
            Err(Error::Engine(EngineError::LoopLimitExceeded { output, .. })) => {
                return Err(ModeError::CannotDetermineMode { tail: output }.into());
            }
            Err(e) => return Err(e),
        };

        for mode in self.tree.iter() {
            if mode.matches(&out.prompt) {
                debug!("detected mode '{}' from prompt {:?}", mode.name, out.prompt);
                let prompt = engine
                    .exact_prompt(&mode.name)
                    .cloned()
                    .unwrap_or_else(|| mode.prompt.clone());
                engine.set_prompt(prompt);
                return Ok(mode.name.clone());
            }
        }

        Err(ModeError::CannotDetermineMode { tail: out.prompt }.into())
    }

    /// Enter `name` from its parent: send enter commands expecting the
    /// mode's own prompt, then resolve an exact prompt if configured.
    async fn step_up(&self, engine: &mut ExpectEngine, name: &str) -> Result<()> {
        let mode = self.tree.get(name)?;
        let target = self.session_prompt(engine, mode);

        self.run_steps(
            engine,
            &mode.enter_commands,
            target,
            mode.enter_actions.as_ref(),
            mode.enter_errors.as_ref(),
        )
        .await?;

        if mode.exact_prompt && engine.exact_prompt(name).is_none() {
            let probed = engine.switch_prompt(&Command::probe()).await?;
            debug!("resolved exact prompt for '{name}': {probed}");
            engine.set_exact_prompt(name, probed);
        }

        Ok(())
    }

    /// Exit `name` toward its parent: send exit commands expecting the
    /// parent's prompt.
    async fn step_down(&self, engine: &mut ExpectEngine, name: &str) -> Result<()> {
        let mode = self.tree.get(name)?;
        let parent_name = mode.parent.as_deref().ok_or_else(|| {
            Error::from(ModeError::InvalidTree {
                message: format!("cannot exit root mode '{name}'"),
            })
        })?;
        let parent = self.tree.get(parent_name)?;
        let target = self.session_prompt(engine, parent);

        self.run_steps(
            engine,
            &mode.exit_commands,
            target,
            mode.exit_actions.as_ref(),
            mode.exit_errors.as_ref(),
        )
        .await
    }

    /// Send a step's command sequence. All but the last command stay within
    /// the current prompt; the last one crosses the boundary to `target`.
    async fn run_steps(
        &self,
        engine: &mut ExpectEngine,
        commands: &[String],
        target: Prompt,
        actions: Option<&crate::rules::ActionTable>,
        errors: Option<&crate::rules::ErrorTable>,
    ) -> Result<()> {
        let Some((last, init)) = commands.split_last() else {
            // Boundary without a command (configuration quirk): just adopt
            // the target prompt.
            engine.set_prompt(target);
            return Ok(());
        };

        for text in init {
            let mut cmd = Command::new(text);
            if let Some(a) = actions {
                cmd = cmd.with_actions(a.clone());
            }
            if let Some(e) = errors {
                cmd = cmd.with_errors(e.clone());
            }
            engine.send_command(&cmd).await?;
        }

        let mut cmd = Command::new(last).with_prompt(target);
        if let Some(a) = actions {
            cmd = cmd.with_actions(a.clone());
        }
        if let Some(e) = errors {
            cmd = cmd.with_errors(e.clone());
        }
        engine.switch_prompt(&cmd).await?;
        Ok(())
    }

    /// The prompt this session should expect for a mode: the probed exact
    /// prompt when one is cached, else the mode's generic pattern.
    fn session_prompt(&self, engine: &ExpectEngine, mode: &Mode) -> Prompt {
        engine
            .exact_prompt(&mode.name)
            .cloned()
            .unwrap_or_else(|| mode.prompt.clone())
    }
}
