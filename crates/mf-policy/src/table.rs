//! The read-only [`PolicyTable`] built once from configuration.

use std::collections::BTreeMap;

use mf_core::config::PolicyConfig;
use mf_core::{MediaFormat, Operation};

use crate::rule::PolicyRule;

/// Immutable lookup of (format, operation) rules plus global ceilings.
///
/// Built once at startup and shared behind an `Arc`; there is no interior
/// mutability, so concurrent readers never contend.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    rules: BTreeMap<(MediaFormat, Operation), PolicyRule>,
    max_dpi: u32,
    max_elements: usize,
    max_frames: u64,
}

impl PolicyTable {
    /// Build the table. Several entries for the same format merge, with any
    /// deny winning and the tightest limits applying.
    pub fn from_config(config: &PolicyConfig) -> Self {
        let mut rules: BTreeMap<(MediaFormat, Operation), PolicyRule> = BTreeMap::new();
        for entry in &config.rules {
            for rule in PolicyRule::expand(entry) {
                rules
                    .entry((rule.format, rule.operation))
                    .and_modify(|existing| *existing = existing.merge(rule))
                    .or_insert(rule);
            }
        }

        tracing::debug!("Policy table loaded with {} rules", rules.len());

        Self {
            rules,
            max_dpi: config.max_dpi,
            max_elements: config.max_elements,
            max_frames: config.max_frames,
        }
    }

    /// The rule for `(format, operation)`, if one was configured.
    pub fn lookup(&self, format: MediaFormat, operation: Operation) -> Option<&PolicyRule> {
        self.rules.get(&(format, operation))
    }

    /// All rules, ordered by format then operation.
    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn max_dpi(&self) -> u32 {
        self.max_dpi
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn max_frames(&self) -> u64 {
        self.max_frames
    }
}
