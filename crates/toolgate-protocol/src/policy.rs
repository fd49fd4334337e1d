//! Policy types: layers, layer decisions, and access check results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the ordered evaluation stages of the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLayer {
    GlobalGuardrails,
    WorkspacePermissions,
    ContextRestrictions,
    ToolSpecific,
    /// Workspace-authored script, applied after the engine.
    WorkspaceOverride,
}

impl PolicyLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalGuardrails => "global_guardrails",
            Self::WorkspacePermissions => "workspace_permissions",
            Self::ContextRestrictions => "context_restrictions",
            Self::ToolSpecific => "tool_specific",
            Self::WorkspaceOverride => "workspace_override",
        }
    }
}

impl fmt::Display for PolicyLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single layer for a single tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerVerdict {
    Allow,
    Deny,
    RequireApproval,
    Pass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDecision {
    pub layer: PolicyLayer,
    pub decision: LayerVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LayerDecision {
    pub fn pass(layer: PolicyLayer) -> Self {
        Self {
            layer,
            decision: LayerVerdict::Pass,
            reason: None,
        }
    }

    pub fn deny(layer: PolicyLayer, reason: impl Into<String>) -> Self {
        Self {
            layer,
            decision: LayerVerdict::Deny,
            reason: Some(reason.into()),
        }
    }

    pub fn require_approval(layer: PolicyLayer, reason: impl Into<String>) -> Self {
        Self {
            layer,
            decision: LayerVerdict::RequireApproval,
            reason: Some(reason.into()),
        }
    }

    pub fn is_deny(&self) -> bool {
        self.decision == LayerVerdict::Deny
    }
}

/// Output of one access check.
///
/// `allowed = false` is a normal outcome, not an error. `requires_approval`
/// routes the call through a human-in-the-loop step before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCheckResult {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<PolicyLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
}

impl PolicyCheckResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            denied_by: None,
            requires_approval: None,
            approval_reason: None,
        }
    }

    /// Allowed with an explicit `requires_approval = false`.
    pub fn allow_without_approval(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
            denied_by: None,
            requires_approval: Some(false),
            approval_reason: None,
        }
    }

    pub fn deny(layer: PolicyLayer, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            denied_by: Some(layer),
            requires_approval: None,
            approval_reason: None,
        }
    }

    pub fn require_approval(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            denied_by: None,
            requires_approval: Some(true),
            approval_reason: Some(reason.into()),
        }
    }

    pub fn needs_approval(&self) -> bool {
        self.allowed && self.requires_approval == Some(true)
    }

    /// Allowed and no approval step needed.
    pub fn is_allowed_now(&self) -> bool {
        self.allowed && !self.needs_approval()
    }
}
