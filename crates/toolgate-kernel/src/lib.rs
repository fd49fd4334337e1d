//! Wires the policy engine, the workspace override and the once-only
//! transition handlers into a single [`GateKernel`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use toolgate_policy::{PolicyEngine, PolicyInput};
use toolgate_protocol::{
    ApprovalId, ApprovalResolution, GatewayContext, GateResult, GuardrailSettings, PairingOutcome,
    PolicyCheckResult, PolicyLayer, TaskCreated, TaskId, ToolCall, Workspace, WorkspaceId,
};
use toolgate_sandbox::{
    OverrideDecision, OverrideLimits, OverrideRunner, OverrideVerdict, WorkspacePolicyOverride,
};
use toolgate_sync::{Executed, IdempotencyLedger, LedgerConfig, NamedMutexManager};
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct KernelBuilder {
    guardrails: GuardrailSettings,
    ledger: LedgerConfig,
    override_runner: Option<Arc<dyn OverrideRunner>>,
    override_limits: OverrideLimits,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            guardrails: GuardrailSettings::default(),
            ledger: LedgerConfig::default(),
            override_runner: None,
            override_limits: OverrideLimits::default(),
        }
    }

    pub fn guardrails(mut self, guardrails: GuardrailSettings) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn ledger_config(mut self, config: LedgerConfig) -> Self {
        self.ledger = config;
        self
    }

    pub fn override_runner(mut self, runner: Arc<dyn OverrideRunner>) -> Self {
        self.override_runner = Some(runner);
        self
    }

    pub fn override_limits(mut self, limits: OverrideLimits) -> Self {
        self.override_limits = limits;
        self
    }

    pub fn build(self) -> GateKernel {
        let policy_override = self.override_runner.map(|runner| {
            Arc::new(WorkspacePolicyOverride::new(runner).with_limits(self.override_limits))
        });

        GateKernel {
            guardrails: Arc::new(self.guardrails),
            locks: Arc::new(NamedMutexManager::new()),
            approvals: IdempotencyLedger::new(self.ledger.clone()),
            pairings: IdempotencyLedger::new(self.ledger.clone()),
            tasks: IdempotencyLedger::new(self.ledger),
            policy_override,
        }
    }
}

/// Final decision for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateVerdict {
    #[serde(flatten)]
    pub result: PolicyCheckResult,
    /// Present when the workspace override ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_decision: Option<OverrideDecision>,
}

#[derive(Clone)]
pub struct GateKernel {
    guardrails: Arc<GuardrailSettings>,
    locks: Arc<NamedMutexManager>,
    approvals: IdempotencyLedger<ApprovalResolution>,
    pairings: IdempotencyLedger<PairingOutcome>,
    tasks: IdempotencyLedger<TaskCreated>,
    policy_override: Option<Arc<WorkspacePolicyOverride>>,
}

impl GateKernel {
    pub fn guardrails(&self) -> &GuardrailSettings {
        &self.guardrails
    }

    /// Start background expiry sweeps. Requires a running tokio runtime.
    pub fn start(&self) {
        self.approvals.start_sweeper();
        self.pairings.start_sweeper();
        self.tasks.start_sweeper();
        info!(
            override_enabled = self.policy_override.is_some(),
            "gate kernel started"
        );
    }

    pub fn shutdown(&self) {
        self.approvals.destroy();
        self.pairings.destroy();
        self.tasks.destroy();
        let released = self.locks.cleanup();
        info!(released_locks = released, "gate kernel stopped");
    }

    /// Build the engine for one workspace and channel. Reuse it for every
    /// call in the same session.
    pub fn policy_engine(
        &self,
        workspace: &Workspace,
        gateway_context: Option<GatewayContext>,
    ) -> PolicyEngine {
        PolicyEngine::new(PolicyInput {
            workspace,
            guardrails: &self.guardrails,
            gateway_context,
        })
    }

    /// Engine verdict, then the workspace override.
    ///
    /// An engine deny is final and the override is not consulted. An
    /// override deny turns an allow into a deny; an override approval
    /// request adds an approval step. The override can never allow what the
    /// engine denied or waive an approval the engine required.
    #[instrument(
        skip(self, engine, workspace, call),
        fields(workspace = %workspace.id, tool = %call.tool_name, call_id = %call.call_id)
    )]
    pub async fn evaluate_tool_call(
        &self,
        engine: &PolicyEngine,
        workspace: &Workspace,
        call: &ToolCall,
    ) -> GateVerdict {
        let result = engine.check_tool_access(&call.tool_name, Some(&call.input));
        if !result.allowed {
            debug!(denied_by = ?result.denied_by, "engine denied tool call");
            return GateVerdict {
                result,
                override_decision: None,
            };
        }
        let Some(policy_override) = &self.policy_override else {
            return GateVerdict {
                result,
                override_decision: None,
            };
        };

        let decision = policy_override
            .evaluate(
                workspace,
                &call.tool_name,
                &call.input,
                engine.gateway_context(),
            )
            .await;
        let result = apply_override(result, &decision);
        GateVerdict {
            result,
            override_decision: Some(decision),
        }
    }

    /// Record a human answer to an approval request exactly once.
    ///
    /// `effect` runs at most once per approval id; repeated or concurrent
    /// responses receive the first resolution with `cached = true`.
    #[instrument(skip(self, approval_id, actor, effect), fields(approval_id = %approval_id))]
    pub async fn respond_to_approval<F, Fut, E>(
        &self,
        approval_id: &ApprovalId,
        approved: bool,
        actor: &str,
        effect: F,
    ) -> GateResult<Executed<ApprovalResolution>>
    where
        F: FnOnce(ApprovalResolution) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let key = IdempotencyLedger::<ApprovalResolution>::make_key(
            "approval",
            &[Some(approval_id.as_str())],
        );
        let resolution = ApprovalResolution {
            approval_id: approval_id.clone(),
            approved,
            actor: actor.to_owned(),
            resolved_at: Utc::now(),
        };
        self.once(&self.approvals, key, resolution, effect).await
    }

    /// Bind a channel sender to a workspace exactly once.
    #[instrument(skip(self, workspace_id, effect), fields(workspace = %workspace_id))]
    pub async fn complete_pairing<F, Fut, E>(
        &self,
        channel: &str,
        sender_id: &str,
        workspace_id: &WorkspaceId,
        effect: F,
    ) -> GateResult<Executed<PairingOutcome>>
    where
        F: FnOnce(PairingOutcome) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let key = IdempotencyLedger::<PairingOutcome>::make_key(
            "pairing",
            &[Some(channel), Some(sender_id)],
        );
        let outcome = PairingOutcome {
            channel: channel.to_owned(),
            sender_id: sender_id.to_owned(),
            workspace_id: workspace_id.clone(),
            paired_at: Utc::now(),
        };
        self.once(&self.pairings, key, outcome, effect).await
    }

    /// Create at most one task per fingerprint while its entry is live.
    #[instrument(skip(self, effect))]
    pub async fn create_task_once<F, Fut, E>(
        &self,
        fingerprint: &str,
        effect: F,
    ) -> GateResult<Executed<TaskCreated>>
    where
        F: FnOnce(TaskCreated) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let key = IdempotencyLedger::<TaskCreated>::make_key("task", &[Some(fingerprint)]);
        let created = TaskCreated {
            task_id: TaskId::new_uuid(),
            fingerprint: fingerprint.to_owned(),
            created_at: Utc::now(),
        };
        self.once(&self.tasks, key, created, effect).await
    }

    /// Serialize on the key's named lock, then dedupe on `ledger`.
    async fn once<T, F, Fut, E>(
        &self,
        ledger: &IdempotencyLedger<T>,
        key: String,
        record: T,
        effect: F,
    ) -> GateResult<Executed<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let settled = self
            .locks
            .with_lock(&key, || {
                ledger.execute(&key, None, || async move {
                    effect(record.clone()).await?;
                    Ok::<_, E>(record)
                })
            })
            .await;
        // The ledger replays the outcome, so the per-key lock is no longer needed.
        self.locks.cleanup();
        let executed = settled?;
        debug!(key = %key, cached = executed.cached, "once-only transition settled");
        Ok(executed)
    }
}

fn apply_override(result: PolicyCheckResult, decision: &OverrideDecision) -> PolicyCheckResult {
    match decision.decision {
        OverrideVerdict::Pass => result,
        OverrideVerdict::Deny => PolicyCheckResult::deny(
            PolicyLayer::WorkspaceOverride,
            decision
                .reason
                .clone()
                .unwrap_or_else(|| "Denied by workspace override".to_owned()),
        ),
        OverrideVerdict::RequireApproval if result.needs_approval() => result,
        OverrideVerdict::RequireApproval => PolicyCheckResult::require_approval(
            decision
                .reason
                .clone()
                .unwrap_or_else(|| "Workspace override requires approval".to_owned()),
        ),
    }
}
