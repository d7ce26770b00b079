//! Deployment profile definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment a host application runs in.
///
/// Profiles select default thresholds; they never change behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    /// Local development. Relaxed thresholds, fast breaker recovery.
    #[default]
    Development,

    /// Pre-production.
    Staging,

    /// Production. Stricter thresholds, longer breaker cooldowns.
    Production,
}

impl DeploymentProfile {
    /// Whether operators expect alerts for this profile.
    pub fn alerts_enabled(&self) -> bool {
        !matches!(self, DeploymentProfile::Development)
    }
}

impl fmt::Display for DeploymentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentProfile::Development => write!(f, "development"),
            DeploymentProfile::Staging => write!(f, "staging"),
            DeploymentProfile::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown deployment profile: {0}")]
pub struct ParseProfileError(pub String);

impl FromStr for DeploymentProfile {
    type Err = ParseProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentProfile::Development),
            "staging" | "stage" => Ok(DeploymentProfile::Staging),
            "production" | "prod" => Ok(DeploymentProfile::Production),
            other => Err(ParseProfileError(other.to_string())),
        }
    }
}
