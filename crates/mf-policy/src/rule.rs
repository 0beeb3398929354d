//! The [`PolicyRule`] struct: one (format, operation) permission.

use mf_core::config::PolicyRuleConfig;
use mf_core::{MediaFormat, Operation, ResourceLimits};
use serde::{Deserialize, Serialize};

/// Whether `operation` may touch `format`, and under which ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub format: MediaFormat,
    pub operation: Operation,
    /// `false` for an explicit deny entry.
    pub allowed: bool,
    pub limits: ResourceLimits,
}

impl PolicyRule {
    /// Expand one configuration entry into a rule per named operation.
    ///
    /// Operations listed under `deny` produce `allowed = false` rules even
    /// when they also appear under `operations`.
    pub fn expand(config: &PolicyRuleConfig) -> Vec<PolicyRule> {
        let limits = ResourceLimits::from(config);
        let mut rules: Vec<PolicyRule> = config
            .operations
            .iter()
            .chain(config.deny.iter())
            .map(|&operation| PolicyRule {
                format: config.format,
                operation,
                allowed: !config.deny.contains(&operation),
                limits,
            })
            .collect();
        rules.sort_by_key(|r| r.operation);
        rules.dedup_by_key(|r| r.operation);
        rules
    }

    /// Combine two rules for the same key: a deny anywhere wins and the
    /// tighter limits apply.
    #[must_use]
    pub fn merge(self, other: PolicyRule) -> PolicyRule {
        PolicyRule {
            allowed: self.allowed && other.allowed,
            limits: self.limits.tighten(other.limits),
            ..self
        }
    }
}
