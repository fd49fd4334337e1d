//! # toolgate-protocol: shared contract types
//!
//! Types shared by the policy engine, the concurrency primitives, the
//! workspace override client and the kernel that wires them together.
//!
//! It is intentionally dependency-light (no tokio, no regex) so hosts can
//! depend on it as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (WorkspaceId, ApprovalId, TaskId)
//! - [`workspace`]: Workspace, WorkspacePermissions
//! - [`guardrails`]: GuardrailSettings, TaskUsage, BudgetViolation
//! - [`tool`]: ToolCall, ToolGroup, ToolRiskLevel, GatewayContext
//! - [`policy`]: PolicyLayer, LayerDecision, PolicyCheckResult
//! - [`approval`]: records of once-only transitions
//! - [`error`]: GateError, GateResult

pub mod approval;
pub mod error;
pub mod guardrails;
pub mod ids;
pub mod policy;
pub mod tool;
pub mod workspace;

pub use approval::{ApprovalResolution, PairingOutcome, TaskCreated};
pub use error::{GateError, GateResult};
pub use guardrails::{BudgetViolation, GuardrailSettings, TaskUsage};
pub use ids::{ApprovalId, TaskId, WorkspaceId};
pub use policy::{LayerDecision, LayerVerdict, PolicyCheckResult, PolicyLayer};
pub use tool::{GatewayContext, ToolCall, ToolGroup, ToolRiskLevel};
pub use workspace::{Workspace, WorkspacePermissions};
