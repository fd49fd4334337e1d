//! The layered tool-access policy engine.
//!
//! An engine is built once per (workspace, guardrails, gateway context) and
//! classifies every tool in the static catalog eagerly. Layers run in a fixed
//! order and stop at the first deny, so a later layer can never revive a
//! denied tool. Only the `run_command` pattern check runs per call.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use toolgate_protocol::{
    GatewayContext, GuardrailSettings, LayerDecision, LayerVerdict, PolicyCheckResult,
    PolicyLayer, ToolGroup, ToolRiskLevel, Workspace, WorkspacePermissions,
};
use tracing::debug;

use crate::catalog::{self, DELETE_FILE, RUN_COMMAND};
use crate::command::CommandGuard;

/// Everything the engine needs to classify tools.
#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub workspace: &'a Workspace,
    pub guardrails: &'a GuardrailSettings,
    pub gateway_context: Option<GatewayContext>,
}

#[derive(Debug, Clone)]
struct ToolClassification {
    decisions: Vec<LayerDecision>,
}

impl ToolClassification {
    fn deny(&self) -> Option<&LayerDecision> {
        self.decisions.iter().find(|decision| decision.is_deny())
    }

    fn first_approval(&self) -> Option<&LayerDecision> {
        self.decisions
            .iter()
            .find(|decision| decision.decision == LayerVerdict::RequireApproval)
    }
}

/// Serializable snapshot of an engine's classification, for auditing.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyAudit {
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_context: Option<GatewayContext>,
    pub denied: Vec<&'static str>,
    pub approval_required: Vec<&'static str>,
    pub decisions: IndexMap<&'static str, Vec<LayerDecision>>,
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    workspace_id: String,
    gateway_context: Option<GatewayContext>,
    tools: IndexMap<&'static str, ToolClassification>,
    guard: CommandGuard,
}

impl PolicyEngine {
    pub fn new(input: PolicyInput<'_>) -> Self {
        let PolicyInput {
            workspace,
            guardrails,
            gateway_context,
        } = input;

        let tools: IndexMap<&'static str, ToolClassification> = catalog::all_tools()
            .iter()
            .map(|tool| {
                let decisions = classify(tool, workspace, guardrails, gateway_context);
                (*tool, ToolClassification { decisions })
            })
            .collect();

        let engine = Self {
            workspace_id: workspace.id.to_string(),
            gateway_context,
            tools,
            guard: CommandGuard::from_guardrails(guardrails),
        };
        debug!(
            workspace_id = %engine.workspace_id,
            gateway_context = ?gateway_context,
            denied = engine.denied_tools().len(),
            approval_required = engine.approval_required_tools().len(),
            "policy engine built"
        );
        engine
    }

    /// Decide whether `tool` may run with `input`.
    ///
    /// Tools outside the static catalog have no classification and are
    /// allowed.
    pub fn check_tool_access(&self, tool: &str, input: Option<&Value>) -> PolicyCheckResult {
        let Some(classification) = self.tools.get(tool) else {
            debug!(tool, "tool not in catalog; no policy applies");
            return PolicyCheckResult::allow();
        };

        if let Some(deny) = classification.deny() {
            return PolicyCheckResult::deny(
                deny.layer,
                deny.reason.clone().unwrap_or_else(|| format!("{tool} is denied")),
            );
        }

        if tool == RUN_COMMAND
            && let Some(command) = input
                .and_then(|input| input.get("command"))
                .and_then(Value::as_str)
        {
            return self.check_command(command, classification);
        }

        match classification.first_approval() {
            Some(decision) => PolicyCheckResult::require_approval(
                decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("{tool} requires approval")),
            ),
            None => PolicyCheckResult::allow(),
        }
    }

    fn check_command(
        &self,
        command: &str,
        classification: &ToolClassification,
    ) -> PolicyCheckResult {
        if let Some(pattern) = self.guard.blocked_match(command) {
            debug!(pattern, "command blocked");
            return PolicyCheckResult::deny(
                PolicyLayer::GlobalGuardrails,
                format!("Command matches blocked pattern: {pattern}"),
            );
        }

        if let Some(pattern) = self.guard.trusted_match(command) {
            return PolicyCheckResult::allow_without_approval(format!(
                "Command matches trusted pattern: {pattern}"
            ));
        }

        let reason = classification
            .first_approval()
            .and_then(|decision| decision.reason.clone())
            .unwrap_or_else(|| "Shell commands require approval".to_owned());
        PolicyCheckResult::require_approval(reason)
    }

    /// Tools whose classification is deny, in catalog order.
    pub fn denied_tools(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .filter(|(_, classification)| classification.deny().is_some())
            .map(|(tool, _)| *tool)
            .collect()
    }

    /// Tools that are not denied but need approval, in catalog order.
    pub fn approval_required_tools(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .filter(|(_, classification)| {
                classification.deny().is_none() && classification.first_approval().is_some()
            })
            .map(|(tool, _)| *tool)
            .collect()
    }

    /// Layer decisions recorded for `tool`, in evaluation order.
    pub fn tool_decisions(&self, tool: &str) -> &[LayerDecision] {
        self.tools
            .get(tool)
            .map(|classification| classification.decisions.as_slice())
            .unwrap_or_default()
    }

    pub fn gateway_context(&self) -> Option<GatewayContext> {
        self.gateway_context
    }

    pub fn audit(&self) -> PolicyAudit {
        PolicyAudit {
            workspace_id: self.workspace_id.clone(),
            gateway_context: self.gateway_context,
            denied: self.denied_tools(),
            approval_required: self.approval_required_tools(),
            decisions: self
                .tools
                .iter()
                .map(|(tool, classification)| (*tool, classification.decisions.clone()))
                .collect(),
        }
    }

    pub fn expand_tool_group(group: ToolGroup) -> &'static [&'static str] {
        catalog::group_members(group)
    }

    pub fn is_tool_in_group(tool: &str, group: ToolGroup) -> bool {
        catalog::in_group(tool, group)
    }

    pub fn tool_risk_level(tool: &str) -> Option<ToolRiskLevel> {
        catalog::risk_level(tool)
    }

    /// Construction-free pre-filter for planner tool lists.
    ///
    /// Runs only the workspace-permission and context layers, so it may
    /// accept a tool the full engine gates or blocks on guardrails, but it
    /// never accepts a tool those two layers deny.
    pub fn is_tool_allowed_quick(
        tool: &str,
        workspace: &Workspace,
        gateway_context: Option<GatewayContext>,
    ) -> bool {
        if workspace_permissions_layer(tool, &workspace.permissions).is_deny() {
            return false;
        }
        match gateway_context {
            Some(context) => !context_restrictions_layer(tool, context).is_deny(),
            None => true,
        }
    }

    /// Keep the tools [`Self::is_tool_allowed_quick`] accepts.
    pub fn filter_tools<'a>(
        tools: impl IntoIterator<Item = &'a str>,
        workspace: &Workspace,
        gateway_context: Option<GatewayContext>,
    ) -> Vec<&'a str> {
        tools
            .into_iter()
            .filter(|tool| Self::is_tool_allowed_quick(tool, workspace, gateway_context))
            .collect()
    }
}

fn classify(
    tool: &str,
    workspace: &Workspace,
    guardrails: &GuardrailSettings,
    gateway_context: Option<GatewayContext>,
) -> Vec<LayerDecision> {
    let mut decisions = Vec::with_capacity(4);

    if record(&mut decisions, global_guardrails_layer(tool, guardrails)) {
        return decisions;
    }
    if record(
        &mut decisions,
        workspace_permissions_layer(tool, &workspace.permissions),
    ) {
        return decisions;
    }
    if let Some(context) = gateway_context
        && record(&mut decisions, context_restrictions_layer(tool, context))
    {
        return decisions;
    }
    record(&mut decisions, tool_specific_layer(tool));
    decisions
}

/// Push `decision`; true when it denies and evaluation must stop.
fn record(decisions: &mut Vec<LayerDecision>, decision: LayerDecision) -> bool {
    let denied = decision.is_deny();
    decisions.push(decision);
    denied
}

fn global_guardrails_layer(tool: &str, guardrails: &GuardrailSettings) -> LayerDecision {
    let layer = PolicyLayer::GlobalGuardrails;
    if catalog::in_group(tool, ToolGroup::Network)
        && guardrails.enforce_allowed_domains
        && guardrails.allowed_domains.is_empty()
    {
        return LayerDecision::deny(
            layer,
            "Domain allow-list is enforced but empty; network tools are disabled",
        );
    }
    LayerDecision::pass(layer)
}

fn workspace_permissions_layer(tool: &str, permissions: &WorkspacePermissions) -> LayerDecision {
    let layer = PolicyLayer::WorkspacePermissions;

    if catalog::in_group(tool, ToolGroup::Read) && !permissions.read {
        return LayerDecision::deny(layer, "Workspace does not have read permission");
    }
    if catalog::in_group(tool, ToolGroup::Write) && !permissions.write {
        return LayerDecision::deny(layer, "Workspace does not have write permission");
    }
    if tool == RUN_COMMAND && !permissions.shell {
        return LayerDecision::deny(layer, "Workspace does not have shell permission");
    }
    if catalog::in_group(tool, ToolGroup::Network) && !permissions.network {
        return LayerDecision::deny(layer, "Workspace does not have network permission");
    }

    if tool == DELETE_FILE && !permissions.delete {
        return LayerDecision::require_approval(
            layer,
            "Workspace does not have delete permission; deletion requires approval",
        );
    }
    if tool == RUN_COMMAND {
        return LayerDecision::require_approval(layer, "Shell commands always require approval");
    }
    LayerDecision::pass(layer)
}

fn context_restrictions_layer(tool: &str, context: GatewayContext) -> LayerDecision {
    let layer = PolicyLayer::ContextRestrictions;
    let restriction = catalog::context_restriction(context);

    if restriction.denied_tools.contains(&tool) {
        return LayerDecision::deny(layer, format!("{tool} is not available in {context} contexts"));
    }
    if let Some(group) = restriction
        .denied_groups
        .iter()
        .find(|group| catalog::in_group(tool, **group))
    {
        return LayerDecision::deny(
            layer,
            format!("{group} tools are not available in {context} contexts"),
        );
    }
    if restriction.require_approval_for.contains(&tool) {
        return LayerDecision::require_approval(
            layer,
            format!("{tool} requires approval in {context} contexts"),
        );
    }
    LayerDecision::pass(layer)
}

fn tool_specific_layer(tool: &str) -> LayerDecision {
    let layer = PolicyLayer::ToolSpecific;
    if catalog::risk_level(tool) == Some(ToolRiskLevel::Destructive) {
        return LayerDecision::require_approval(layer, format!("{tool} is a destructive operation"));
    }
    LayerDecision::pass(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolgate_protocol::WorkspacePermissions;

    fn workspace(permissions: WorkspacePermissions) -> Workspace {
        Workspace::new("ws-test", "/tmp/ws-test").with_permissions(permissions)
    }

    fn engine(
        permissions: WorkspacePermissions,
        guardrails: GuardrailSettings,
        gateway_context: Option<GatewayContext>,
    ) -> PolicyEngine {
        let workspace = workspace(permissions);
        PolicyEngine::new(PolicyInput {
            workspace: &workspace,
            guardrails: &guardrails,
            gateway_context,
        })
    }

    fn permission_matrix() -> Vec<WorkspacePermissions> {
        let mut all = Vec::new();
        for bits in 0_u8..32 {
            all.push(WorkspacePermissions {
                read: bits & 1 != 0,
                write: bits & 2 != 0,
                delete: bits & 4 != 0,
                network: bits & 8 != 0,
                shell: bits & 16 != 0,
                ..WorkspacePermissions::default()
            });
        }
        all
    }

    fn guardrail_matrix() -> Vec<GuardrailSettings> {
        vec![
            GuardrailSettings::default(),
            GuardrailSettings {
                enforce_allowed_domains: true,
                allowed_domains: Vec::new(),
                ..GuardrailSettings::default()
            },
            GuardrailSettings {
                enforce_allowed_domains: true,
                allowed_domains: vec!["example.com".into()],
                ..GuardrailSettings::default()
            },
        ]
    }

    const CONTEXTS: [Option<GatewayContext>; 4] = [
        None,
        Some(GatewayContext::Private),
        Some(GatewayContext::Group),
        Some(GatewayContext::Public),
    ];

    #[test]
    fn deny_is_monotonic_across_all_combinations() {
        for permissions in permission_matrix() {
            for guardrails in guardrail_matrix() {
                for context in CONTEXTS {
                    let engine = engine(permissions.clone(), guardrails.clone(), context);
                    for tool in catalog::all_tools() {
                        let decisions = engine.tool_decisions(tool);
                        let Some(index) = decisions.iter().position(LayerDecision::is_deny) else {
                            continue;
                        };
                        assert_eq!(index, decisions.len() - 1, "{tool}: layers after deny");
                        let result = engine.check_tool_access(tool, None);
                        assert!(!result.allowed);
                        assert_eq!(result.denied_by, Some(decisions[index].layer));
                    }
                }
            }
        }
    }

    #[test]
    fn layers_are_recorded_in_order() {
        let engine = engine(
            WorkspacePermissions::full(),
            GuardrailSettings::default(),
            Some(GatewayContext::Private),
        );
        let layers: Vec<PolicyLayer> = engine
            .tool_decisions("read_file")
            .iter()
            .map(|decision| decision.layer)
            .collect();
        assert_eq!(
            layers,
            vec![
                PolicyLayer::GlobalGuardrails,
                PolicyLayer::WorkspacePermissions,
                PolicyLayer::ContextRestrictions,
                PolicyLayer::ToolSpecific,
            ]
        );

        let no_context = engine_without_context();
        assert_eq!(no_context.tool_decisions("read_file").len(), 3);
        assert!(no_context.tool_decisions("not_a_tool").is_empty());
    }

    fn engine_without_context() -> PolicyEngine {
        engine(WorkspacePermissions::full(), GuardrailSettings::default(), None)
    }

    #[test]
    fn blocked_command_wins_over_trusted_pattern() {
        let guardrails = GuardrailSettings {
            custom_blocked_patterns: vec!["npm\\s+publish".into()],
            auto_approve_trusted_commands: true,
            trusted_command_patterns: vec!["npm *".into(), "rm *".into()],
            ..GuardrailSettings::default()
        };
        let engine = engine(WorkspacePermissions::full(), guardrails, None);

        for command in ["npm publish --access public", "rm -rf /"] {
            let result = engine.check_tool_access(RUN_COMMAND, Some(&json!({ "command": command })));
            assert!(!result.allowed, "{command} allowed");
            assert_eq!(result.denied_by, Some(PolicyLayer::GlobalGuardrails));
        }

        let trusted = engine.check_tool_access(RUN_COMMAND, Some(&json!({"command": "npm test"})));
        assert!(trusted.allowed);
        assert_eq!(trusted.requires_approval, Some(false));
    }

    #[test]
    fn context_isolation_for_clipboard() {
        for context in [GatewayContext::Group, GatewayContext::Public] {
            for permissions in permission_matrix() {
                let engine = engine(permissions, GuardrailSettings::default(), Some(context));
                let result = engine.check_tool_access("read_clipboard", None);
                assert!(!result.allowed);
                assert_eq!(result.denied_by, Some(PolicyLayer::ContextRestrictions));
            }
        }

        let private = engine(
            WorkspacePermissions::full(),
            GuardrailSettings::default(),
            Some(GatewayContext::Private),
        );
        assert!(private.check_tool_access("read_clipboard", None).is_allowed_now());
    }

    #[test]
    fn shell_is_never_auto_approved_by_permissions() {
        let engine = engine(
            WorkspacePermissions::full(),
            GuardrailSettings::default(),
            None,
        );
        for command in ["anything", "ls -la", "cargo build"] {
            let result = engine.check_tool_access(RUN_COMMAND, Some(&json!({ "command": command })));
            assert!(result.allowed);
            assert_eq!(result.requires_approval, Some(true));
        }
        assert!(engine.check_tool_access(RUN_COMMAND, None).needs_approval());
    }

    #[test]
    fn shell_without_permission_is_denied() {
        let engine = engine(
            WorkspacePermissions::default(),
            GuardrailSettings::default(),
            None,
        );
        let result = engine.check_tool_access(RUN_COMMAND, Some(&json!({"command": "ls"})));
        assert!(!result.allowed);
        assert_eq!(result.denied_by, Some(PolicyLayer::WorkspacePermissions));
    }

    #[test]
    fn trusted_pattern_waives_shell_floor_in_group_chat() {
        let guardrails = GuardrailSettings {
            auto_approve_trusted_commands: true,
            trusted_command_patterns: vec!["git status".into()],
            ..GuardrailSettings::default()
        };
        let workspace = workspace(WorkspacePermissions::full());
        let engine = PolicyEngine::new(PolicyInput {
            workspace: &workspace,
            guardrails: &guardrails,
            gateway_context: Some(GatewayContext::Group),
        });

        let trusted = engine.check_tool_access(RUN_COMMAND, Some(&json!({"command": "git status"})));
        assert!(trusted.allowed);
        assert_eq!(trusted.requires_approval, Some(false));

        let untrusted = engine.check_tool_access(RUN_COMMAND, Some(&json!({"command": "git push"})));
        assert!(untrusted.needs_approval());
        assert_eq!(
            untrusted.approval_reason.as_deref(),
            Some("Shell commands always require approval")
        );
    }

    #[test]
    fn delete_without_permission_degrades_to_approval() {
        let engine = engine(
            WorkspacePermissions {
                delete: false,
                ..WorkspacePermissions::full()
            },
            GuardrailSettings::default(),
            None,
        );
        let result = engine.check_tool_access(DELETE_FILE, None);
        assert!(result.allowed);
        assert_eq!(result.requires_approval, Some(true));
        assert!(result.approval_reason.unwrap().contains("delete permission"));

        let permitted = engine_without_context();
        let result = permitted.check_tool_access(DELETE_FILE, None);
        assert!(result.needs_approval());
        assert!(result.approval_reason.unwrap().contains("destructive"));
    }

    #[test]
    fn network_without_allow_list_is_denied_by_guardrails() {
        let guardrails = GuardrailSettings {
            enforce_allowed_domains: true,
            allowed_domains: Vec::new(),
            ..GuardrailSettings::default()
        };
        let engine = engine(WorkspacePermissions::full(), guardrails, None);
        let result = engine.check_tool_access("web_search", None);
        assert!(!result.allowed);
        assert_eq!(result.denied_by, Some(PolicyLayer::GlobalGuardrails));
        assert_eq!(engine.tool_decisions("web_search").len(), 1);
    }

    #[test]
    fn quick_check_never_accepts_a_layer_two_or_three_deny() {
        for permissions in permission_matrix() {
            for context in CONTEXTS {
                let workspace = workspace(permissions.clone());
                let engine = PolicyEngine::new(PolicyInput {
                    workspace: &workspace,
                    guardrails: &GuardrailSettings::default(),
                    gateway_context: context,
                });
                for tool in catalog::all_tools() {
                    if !PolicyEngine::is_tool_allowed_quick(tool, &workspace, context) {
                        continue;
                    }
                    let denied_by = engine.check_tool_access(tool, None).denied_by;
                    assert!(
                        !matches!(
                            denied_by,
                            Some(PolicyLayer::WorkspacePermissions | PolicyLayer::ContextRestrictions)
                        ),
                        "{tool} accepted by quick check but denied by {denied_by:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn filter_tools_for_planner() {
        let workspace = workspace(WorkspacePermissions::none());
        let offered = PolicyEngine::filter_tools(
            ["read_file", "memory_search", "web_search", "custom_plugin"],
            &workspace,
            Some(GatewayContext::Private),
        );
        assert_eq!(offered, vec!["memory_search", "custom_plugin"]);
    }

    #[test]
    fn introspection_lists() {
        let engine = engine(
            WorkspacePermissions::default(),
            GuardrailSettings::default(),
            Some(GatewayContext::Public),
        );
        let denied = engine.denied_tools();
        assert!(denied.contains(&RUN_COMMAND));
        assert!(denied.contains(&"read_clipboard"));
        assert!(!denied.contains(&"read_file"));

        let gated = engine.approval_required_tools();
        assert!(gated.contains(&"web_fetch"));
        assert!(!gated.iter().any(|tool| denied.contains(tool)));

        let audit = engine.audit();
        assert_eq!(audit.workspace_id, "ws-test");
        assert_eq!(audit.decisions.len(), catalog::all_tools().len());
        let json = serde_json::to_value(&audit).unwrap();
        assert_eq!(json["gateway_context"], "public");
    }

    #[test]
    fn static_helpers() {
        assert!(PolicyEngine::expand_tool_group(ToolGroup::Network).contains(&"web_search"));
        assert!(PolicyEngine::is_tool_in_group(RUN_COMMAND, ToolGroup::System));
        assert!(!PolicyEngine::is_tool_in_group("read_file", ToolGroup::Write));
        assert_eq!(
            PolicyEngine::tool_risk_level(DELETE_FILE),
            Some(ToolRiskLevel::Destructive)
        );
        assert_eq!(PolicyEngine::tool_risk_level("unknown"), None);
    }

    #[test]
    fn unknown_tools_are_unclassified() {
        let engine = engine(WorkspacePermissions::none(), GuardrailSettings::default(), None);
        assert!(engine.check_tool_access("custom_plugin", None).is_allowed_now());
    }
}
