//! Process-wide guardrail settings.
//!
//! Guardrails are workspace-independent: budgets, blocked and trusted
//! command patterns, and the network domain allow-list. The built-in blocked
//! command patterns live in the policy crate and are not part of this
//! configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    /// `0` disables the ceiling.
    pub max_tokens_per_task: u64,
    /// USD. `0.0` disables the ceiling.
    pub max_cost_per_task: f64,
    /// `0` disables the ceiling.
    pub max_iterations_per_task: u32,
    /// Gates `custom_blocked_patterns`. Built-in patterns always apply.
    pub block_dangerous_commands: bool,
    /// Case-insensitive regular expressions.
    pub custom_blocked_patterns: Vec<String>,
    pub auto_approve_trusted_commands: bool,
    /// Glob patterns: `*` any run of characters, `?` one character.
    pub trusted_command_patterns: Vec<String>,
    pub enforce_allowed_domains: bool,
    pub allowed_domains: Vec<String>,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            max_tokens_per_task: 100_000,
            max_cost_per_task: 1.0,
            max_iterations_per_task: 50,
            block_dangerous_commands: true,
            custom_blocked_patterns: Vec::new(),
            auto_approve_trusted_commands: false,
            trusted_command_patterns: Vec::new(),
            enforce_allowed_domains: false,
            allowed_domains: Vec::new(),
        }
    }
}

/// Resource consumption of a running task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub tokens_used: u64,
    pub cost_used: f64,
    pub iterations: u32,
}

/// Which budget ceiling a task crossed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "budget", rename_all = "snake_case")]
pub enum BudgetViolation {
    #[error("token budget exceeded: {used} of {limit}")]
    Tokens { used: u64, limit: u64 },
    #[error("cost budget exceeded: ${used:.4} of ${limit:.4}")]
    Cost { used: f64, limit: f64 },
    #[error("iteration limit reached: {used} of {limit}")]
    Iterations { used: u32, limit: u32 },
}

impl GuardrailSettings {
    /// First ceiling `usage` has reached, checked tokens, cost, iterations.
    pub fn check_budget(&self, usage: &TaskUsage) -> Option<BudgetViolation> {
        if self.max_tokens_per_task > 0 && usage.tokens_used >= self.max_tokens_per_task {
            return Some(BudgetViolation::Tokens {
                used: usage.tokens_used,
                limit: self.max_tokens_per_task,
            });
        }
        if self.max_cost_per_task > 0.0 && usage.cost_used >= self.max_cost_per_task {
            return Some(BudgetViolation::Cost {
                used: usage.cost_used,
                limit: self.max_cost_per_task,
            });
        }
        if self.max_iterations_per_task > 0 && usage.iterations >= self.max_iterations_per_task {
            return Some(BudgetViolation::Iterations {
                used: usage.iterations,
                limit: self.max_iterations_per_task,
            });
        }
        None
    }

    /// Whether `host` may be contacted under the domain allow-list.
    ///
    /// Entries match the host itself and any subdomain; a leading `*.` on an
    /// entry is accepted and ignored. Always true when enforcement is off.
    pub fn is_domain_allowed(&self, host: &str) -> bool {
        if !self.enforce_allowed_domains {
            return true;
        }
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.allowed_domains.iter().any(|entry| {
            let entry = entry
                .trim()
                .trim_start_matches("*.")
                .trim_end_matches('.')
                .to_ascii_lowercase();
            !entry.is_empty()
                && (host == entry
                    || host
                        .strip_suffix(entry.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.')))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_ceilings_in_order() {
        let guardrails = GuardrailSettings {
            max_tokens_per_task: 1_000,
            max_cost_per_task: 0.5,
            max_iterations_per_task: 3,
            ..GuardrailSettings::default()
        };

        assert_eq!(guardrails.check_budget(&TaskUsage::default()), None);
        assert!(matches!(
            guardrails.check_budget(&TaskUsage {
                tokens_used: 1_000,
                cost_used: 0.9,
                iterations: 0,
            }),
            Some(BudgetViolation::Tokens { limit: 1_000, .. })
        ));
        assert!(matches!(
            guardrails.check_budget(&TaskUsage {
                tokens_used: 10,
                cost_used: 0.0,
                iterations: 3,
            }),
            Some(BudgetViolation::Iterations { used: 3, limit: 3 })
        ));
    }

    #[test]
    fn zero_disables_budget() {
        let guardrails = GuardrailSettings {
            max_tokens_per_task: 0,
            max_cost_per_task: 0.0,
            max_iterations_per_task: 0,
            ..GuardrailSettings::default()
        };
        let usage = TaskUsage {
            tokens_used: u64::MAX,
            cost_used: 1e9,
            iterations: u32::MAX,
        };
        assert_eq!(guardrails.check_budget(&usage), None);
    }

    #[test]
    fn domain_allow_list_matches_subdomains_only() {
        let guardrails = GuardrailSettings {
            enforce_allowed_domains: true,
            allowed_domains: vec!["example.com".into(), "*.docs.rs".into()],
            ..GuardrailSettings::default()
        };
        assert!(guardrails.is_domain_allowed("example.com"));
        assert!(guardrails.is_domain_allowed("API.Example.com."));
        assert!(guardrails.is_domain_allowed("serde.docs.rs"));
        assert!(!guardrails.is_domain_allowed("badexample.com"));
        assert!(!guardrails.is_domain_allowed("example.com.evil.net"));
        assert!(!guardrails.is_domain_allowed(""));

        let open = GuardrailSettings::default();
        assert!(open.is_domain_allowed("anything.invalid"));
    }

    #[test]
    fn partial_document_loads() {
        let guardrails: GuardrailSettings =
            serde_json::from_str(r#"{"auto_approve_trusted_commands": true}"#).unwrap();
        assert!(guardrails.auto_approve_trusted_commands);
        assert!(guardrails.block_dangerous_commands);
        assert_eq!(guardrails.max_iterations_per_task, 50);
    }
}
