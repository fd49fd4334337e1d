//! Layered tool-access policy for agent workspaces.
//!
//! [`PolicyEngine`] classifies the static tool catalog against a workspace's
//! permissions, the process guardrails and an optional gateway context.
//! Deny always wins: once a layer denies a tool, later layers are skipped.

pub mod catalog;
pub mod command;
mod engine;

pub use catalog::{ContextRestriction, RUN_COMMAND};
pub use command::{CommandGuard, glob_matches, glob_to_regex};
pub use engine::{PolicyAudit, PolicyEngine, PolicyInput};
