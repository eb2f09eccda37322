use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business domain a request is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Sales,
    Analytics,
    Finance,
    Inventory,
    General,
}

impl Intent {
    /// Intents that can own an agent, in classification priority order.
    pub const ROUTABLE: [Intent; 4] =
        [Intent::Sales, Intent::Analytics, Intent::Finance, Intent::Inventory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Analytics => "analytics",
            Self::Finance => "finance",
            Self::Inventory => "inventory",
            Self::General => "general",
        }
    }

    /// Label reported to callers as `agent_used`.
    pub fn agent_label(&self) -> &'static str {
        match self {
            Self::Sales => "sales_agent",
            Self::Analytics => "analytics_agent",
            Self::Finance => "finance_agent",
            Self::Inventory => "inventory_agent",
            Self::General => "general_purpose",
        }
    }

    /// Accepts both the bare domain name and the agent label, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
        let normalized = normalized.to_ascii_lowercase();
        [Self::Sales, Self::Analytics, Self::Finance, Self::Inventory, Self::General]
            .into_iter()
            .find(|intent| normalized == intent.as_str() || normalized == intent.agent_label())
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown intent label `{0}`")]
pub struct UnknownIntent(pub String);

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_label(value).ok_or_else(|| UnknownIntent(value.to_string()))
    }
}
