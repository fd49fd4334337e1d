//! Workspace-authored policy override, evaluated in an external sandbox.
//!
//! A workspace may ship a script at [`OVERRIDE_SCRIPT_PATH`]. After the
//! policy engine has decided, [`WorkspacePolicyOverride::evaluate`] hands the
//! script, the tool call and a workspace snapshot to an [`OverrideRunner`]
//! and normalises whatever comes back into an [`OverrideDecision`].
//!
//! The override fails open. A missing, unreadable, failing or slow script
//! yields [`OverrideVerdict::Pass`] and a warning in the log.

mod command;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use toolgate_protocol::{GatewayContext, Workspace, WorkspaceId, WorkspacePermissions};
use tracing::{debug, instrument, warn};

pub use command::CommandOverrideRunner;

/// Workspace-relative location of the override script.
pub const OVERRIDE_SCRIPT_PATH: &str = ".toolgate/policy.override";

/// Resource budget handed to the sandbox for one script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideLimits {
    pub max_duration_ms: u64,
    pub max_allocations: u64,
    pub max_memory_bytes: u64,
    /// Allocations between forced collections.
    pub gc_interval: u64,
    pub max_recursion_depth: u32,
}

impl OverrideLimits {
    /// Ceiling no caller-supplied limit may exceed.
    pub const HARD_MAX: Self = Self {
        max_duration_ms: 5_000,
        max_allocations: 1_000_000,
        max_memory_bytes: 128 * 1024 * 1024,
        gc_interval: 100_000,
        max_recursion_depth: 1_000,
    };

    /// Each field capped at [`Self::HARD_MAX`].
    pub fn clamped(self) -> Self {
        let max = Self::HARD_MAX;
        Self {
            max_duration_ms: self.max_duration_ms.min(max.max_duration_ms),
            max_allocations: self.max_allocations.min(max.max_allocations),
            max_memory_bytes: self.max_memory_bytes.min(max.max_memory_bytes),
            gc_interval: self.gc_interval.min(max.gc_interval),
            max_recursion_depth: self.max_recursion_depth.min(max.max_recursion_depth),
        }
    }
}

impl Default for OverrideLimits {
    fn default() -> Self {
        Self {
            max_duration_ms: 1_000,
            max_allocations: 100_000,
            max_memory_bytes: 32 * 1024 * 1024,
            gc_interval: 10_000,
            max_recursion_depth: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub id: WorkspaceId,
    pub name: String,
    pub path: PathBuf,
    pub is_temp: bool,
    pub permissions: WorkspacePermissions,
}

impl From<&Workspace> for WorkspaceSnapshot {
    fn from(workspace: &Workspace) -> Self {
        Self {
            id: workspace.id.clone(),
            name: workspace.name.clone(),
            path: workspace.path.clone(),
            is_temp: workspace.is_temp,
            permissions: workspace.permissions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideInput {
    pub tool: String,
    pub params: Value,
    pub gateway_context: Option<GatewayContext>,
    pub workspace: WorkspaceSnapshot,
    pub timestamp_ms: i64,
}

/// One script run, as sent to an [`OverrideRunner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub source: String,
    pub input: OverrideInput,
    pub limits: OverrideLimits,
    /// SHA-256 of `source`, hex encoded.
    pub cache_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverrideEnvelope {
    Success { output: Value },
    Failure { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideVerdict {
    Pass,
    Deny,
    RequireApproval,
}

impl OverrideVerdict {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(Self::Pass),
            "deny" => Some(Self::Deny),
            "require_approval" => Some(Self::RequireApproval),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideDecision {
    pub decision: OverrideVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OverrideDecision {
    pub fn pass() -> Self {
        Self {
            decision: OverrideVerdict::Pass,
            reason: None,
        }
    }

    /// Accepts a bare verdict string or `{decision, reason?}`. Anything else
    /// is a pass.
    pub fn from_output(output: &Value) -> Self {
        let (verdict, reason) = match output {
            Value::String(verdict) => (verdict.as_str(), None),
            Value::Object(fields) => match fields.get("decision").and_then(Value::as_str) {
                Some(verdict) => (
                    verdict,
                    fields
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                ),
                None => return Self::pass(),
            },
            _ => return Self::pass(),
        };
        match OverrideVerdict::parse(verdict) {
            Some(decision) => Self { decision, reason },
            None => Self::pass(),
        }
    }
}

/// Executes override scripts. Implementations own the actual sandbox.
#[async_trait]
pub trait OverrideRunner: Send + Sync {
    async fn run(&self, request: OverrideRequest) -> Result<OverrideEnvelope>;
}

#[derive(Debug, Clone)]
struct CachedScript {
    modified: SystemTime,
    source: String,
    content_hash: String,
}

pub struct WorkspacePolicyOverride {
    runner: Arc<dyn OverrideRunner>,
    limits: OverrideLimits,
    scripts: parking_lot::Mutex<HashMap<PathBuf, CachedScript>>,
}

impl std::fmt::Debug for WorkspacePolicyOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspacePolicyOverride")
            .field("limits", &self.limits)
            .field("cached_scripts", &self.scripts.lock().len())
            .finish()
    }
}

impl WorkspacePolicyOverride {
    pub fn new(runner: Arc<dyn OverrideRunner>) -> Self {
        Self {
            runner,
            limits: OverrideLimits::default(),
            scripts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default budget. Values above the hard maximum are capped.
    pub fn with_limits(mut self, limits: OverrideLimits) -> Self {
        self.limits = limits.clamped();
        self
    }

    pub fn limits(&self) -> OverrideLimits {
        self.limits
    }

    pub fn script_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(OVERRIDE_SCRIPT_PATH)
    }

    /// Run the workspace script for one tool call. Never fails; every error
    /// becomes a pass.
    #[instrument(skip(self, workspace, params), fields(workspace = %workspace.id))]
    pub async fn evaluate(
        &self,
        workspace: &Workspace,
        tool: &str,
        params: &Value,
        gateway_context: Option<GatewayContext>,
    ) -> OverrideDecision {
        match self
            .try_evaluate(workspace, tool, params, gateway_context)
            .await
        {
            Ok(decision) => {
                debug!(decision = ?decision.decision, "override evaluated");
                decision
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), "override script ignored; passing");
                OverrideDecision::pass()
            }
        }
    }

    async fn try_evaluate(
        &self,
        workspace: &Workspace,
        tool: &str,
        params: &Value,
        gateway_context: Option<GatewayContext>,
    ) -> Result<OverrideDecision> {
        let Some(script) = self.load_script(&workspace.path).await? else {
            debug!("no override script");
            return Ok(OverrideDecision::pass());
        };

        let request = OverrideRequest {
            source: script.source,
            input: OverrideInput {
                tool: tool.to_owned(),
                params: params.clone(),
                gateway_context,
                workspace: WorkspaceSnapshot::from(workspace),
                timestamp_ms: Utc::now().timestamp_millis(),
            },
            limits: self.limits,
            cache_key: script.content_hash,
        };

        match self.runner.run(request).await? {
            OverrideEnvelope::Success { output } => Ok(OverrideDecision::from_output(&output)),
            OverrideEnvelope::Failure { error } => bail!("override script failed: {error}"),
        }
    }

    async fn load_script(&self, workspace_root: &Path) -> Result<Option<CachedScript>> {
        let path = Self::script_path(workspace_root);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                self.scripts.lock().remove(&path);
                return Ok(None);
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to stat {}", path.display()));
            }
        };
        let modified = metadata
            .modified()
            .with_context(|| format!("no modification time for {}", path.display()))?;

        if let Some(cached) = self.scripts.lock().get(&path)
            && cached.modified == modified
        {
            return Ok(Some(cached.clone()));
        }

        let source = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let script = CachedScript {
            modified,
            content_hash: hex::encode(Sha256::digest(source.as_bytes())),
            source,
        };
        debug!(path = %path.display(), hash = %script.content_hash, "override script loaded");
        self.scripts.lock().insert(path, script.clone());
        Ok(Some(script))
    }

    pub fn invalidate(&self, workspace_root: &Path) {
        self.scripts.lock().remove(&Self::script_path(workspace_root));
    }
}
