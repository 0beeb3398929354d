//! Effective resource ceilings for a job.

use serde::{Deserialize, Serialize};

use crate::config::PolicyRuleConfig;

/// Caps applied to every engine invocation of an admitted job.
///
/// Produced by the policy guard as the minimum over all rules a request
/// touches, then handed to the engine adapter unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Bytes of memory an engine may use.
    pub memory: u64,
    /// Bytes of intermediate disk an engine may write.
    pub disk: u64,
    pub max_width: u32,
    pub max_height: u32,
    pub max_pages: u32,
}

impl ResourceLimits {
    /// Limits with no effective ceiling; the identity for [`tighten`](Self::tighten).
    pub fn unbounded() -> Self {
        Self {
            memory: u64::MAX,
            disk: u64::MAX,
            max_width: u32::MAX,
            max_height: u32::MAX,
            max_pages: u32::MAX,
        }
    }

    /// Field-wise minimum of `self` and `other`.
    #[must_use]
    pub fn tighten(self, other: ResourceLimits) -> Self {
        Self {
            memory: self.memory.min(other.memory),
            disk: self.disk.min(other.disk),
            max_width: self.max_width.min(other.max_width),
            max_height: self.max_height.min(other.max_height),
            max_pages: self.max_pages.min(other.max_pages),
        }
    }

    /// Whether a `width`x`height` raster fits inside the pixel caps.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_width && height <= self.max_height
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        let rule = PolicyRuleConfig::new(crate::MediaFormat::Png, &[]);
        Self::from(&rule)
    }
}

impl From<&PolicyRuleConfig> for ResourceLimits {
    fn from(rule: &PolicyRuleConfig) -> Self {
        Self {
            memory: rule.memory_cap,
            disk: rule.disk_cap,
            max_width: rule.max_width,
            max_height: rule.max_height,
            max_pages: rule.max_pages,
        }
    }
}
