//! Configuration for ward-daemon

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use ward_resilience::ResilienceConfig;
use ward_types::DeploymentProfile;

use crate::error::{DaemonError, DaemonResult};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Deployment profile used when no resilience file is given
    #[serde(default)]
    pub profile: DeploymentProfile,

    /// Path to a TOML resilience configuration
    #[serde(default)]
    pub resilience_file: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            profile: DeploymentProfile::Development,
            resilience_file: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

fn default_true() -> bool {
    true
}

impl DaemonConfig {
    /// Load configuration: defaults, then an optional file, then `WARD_*`
    /// environment variables (`__` separates nested keys).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WARD")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Resolve the resilience configuration: the TOML file when one is
    /// configured, otherwise the profile defaults.
    pub fn resilience_config(&self) -> DaemonResult<ResilienceConfig> {
        match &self.resilience_file {
            Some(path) => {
                let document = std::fs::read_to_string(Path::new(path)).map_err(|e| {
                    DaemonError::Config(format!("cannot read resilience config {}: {}", path, e))
                })?;
                Ok(ResilienceConfig::from_toml_str(&document)?)
            }
            None => Ok(ResilienceConfig::for_profile(self.profile)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8088);
        assert!(config.server.enable_cors);
        assert_eq!(config.profile, DeploymentProfile::Development);
    }

    #[test]
    fn test_load_without_file() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
    }

    #[test]
    fn test_profile_resilience_config() {
        let config = DaemonConfig {
            profile: DeploymentProfile::Production,
            ..Default::default()
        };
        let resilience = config.resilience_config().unwrap();
        assert_eq!(
            resilience.circuit_breaker.reset_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_resilience_file() {
        let path = std::env::temp_dir().join(format!("ward-resilience-{}.toml", std::process::id()));
        std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 9\n").unwrap();

        let config = DaemonConfig {
            resilience_file: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let resilience = config.resilience_config().unwrap();
        assert_eq!(resilience.circuit_breaker.failure_threshold, 9);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_resilience_file() {
        let config = DaemonConfig {
            resilience_file: Some("/nonexistent/ward.toml".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.resilience_config(),
            Err(DaemonError::Config(_))
        ));
    }
}
