//! Risk tiers inferred from tool names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk classification of a tool, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionTier {
    Safe,
    Normal,
    Dangerous,
    Critical,
}

const CRITICAL_KEYWORDS: &[&str] = &["format", "wipe", "destroy", "shutdown", "reboot"];
const DANGEROUS_KEYWORDS: &[&str] = &["delete", "remove", "close", "kill", "terminate"];
const SAFE_KEYWORDS: &[&str] = &[
    "get", "read", "list", "search", "find", "open_url", "open_map",
];

impl PermissionTier {
    /// Classifies a tool by case-insensitive keyword search over its name.
    ///
    /// Critical keywords win over dangerous ones, which win over safe ones;
    /// anything unmatched is normal.
    pub fn infer(tool_name: &str) -> Self {
        let name = tool_name.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|keyword| name.contains(keyword));

        if matches(CRITICAL_KEYWORDS) {
            PermissionTier::Critical
        } else if matches(DANGEROUS_KEYWORDS) {
            PermissionTier::Dangerous
        } else if matches(SAFE_KEYWORDS) {
            PermissionTier::Safe
        } else {
            PermissionTier::Normal
        }
    }

    pub fn requires_confirmation(self) -> bool {
        matches!(self, PermissionTier::Dangerous | PermissionTier::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionTier::Safe => "safe",
            PermissionTier::Normal => "normal",
            PermissionTier::Dangerous => "dangerous",
            PermissionTier::Critical => "critical",
        }
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived permission view of one discovered tool. Recomputed on every
/// discovery and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionRecord {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub tier: PermissionTier,
    pub requires_confirmation: bool,
}

impl PermissionRecord {
    pub fn classify(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        let tier = PermissionTier::infer(&tool_name);
        Self {
            server_name: server_name.into(),
            tool_name,
            description: description.into(),
            tier,
            requires_confirmation: tier.requires_confirmation(),
        }
    }
}
