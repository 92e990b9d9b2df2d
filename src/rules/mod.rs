//! Pattern-action tables and loop detection.
//!
//! Action tables react to intermediate device output (login prompts, pagers,
//! confirmations) without ending a command; error tables end a command in a
//! typed failure when a recognized error pattern appears; the loop detector
//! aborts commands stuck oscillating between action rules.

mod action;
mod error;
mod loopdetect;

pub use action::{ActionReply, ActionRule, ActionTable, Responder};
pub use error::{ErrorResponse, ErrorRule, ErrorTable, FailureContext};
pub use loopdetect::LoopDetector;
