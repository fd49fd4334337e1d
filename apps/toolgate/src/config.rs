use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toolgate_protocol::{GuardrailSettings, Workspace};
use toolgate_sandbox::OverrideLimits;
use toolgate_sync::LedgerConfig;

/// On-disk gate configuration. Only `workspace` is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub workspace: Workspace,
    #[serde(default)]
    pub guardrails: GuardrailSettings,
    #[serde(default)]
    pub override_limits: OverrideLimits,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl GateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() -> Result<()> {
        let config: GateConfig = serde_json::from_str(
            r#"{"workspace": {"id": "ws-cli", "path": "/srv/ws", "permissions": {"shell": true}}}"#,
        )?;
        assert_eq!(config.workspace.id.as_str(), "ws-cli");
        assert!(config.workspace.permissions.shell);
        assert!(config.workspace.permissions.read);
        assert!(config.guardrails.block_dangerous_commands);
        assert_eq!(config.override_limits, OverrideLimits::default());
        assert_eq!(config.ledger, LedgerConfig::default());
        Ok(())
    }

    #[test]
    fn load_reports_the_path() {
        let missing = std::env::temp_dir()
            .join(format!("toolgate-missing-{}.json", uuid::Uuid::new_v4()));
        let error = GateConfig::load(&missing).unwrap_err();
        assert!(format!("{error:#}").contains("failed to read config"));
    }
}
