// Bridge configuration

use crate::native::Capabilities;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capabilities requested from the native interface at construction
    pub capabilities: Capabilities,
    /// Text returned by `get_version`
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::default(),
            description: "JDWP bridge over JVMTI".to_string(),
            jdwp_major: 1,
            jdwp_minor: 8,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(
            r#"{"jdwp_minor": 6, "capabilities": {"can_suspend": false}}"#,
        )
        .unwrap();

        assert_eq!(config.jdwp_major, 1);
        assert_eq!(config.jdwp_minor, 6);
        assert!(!config.capabilities.can_suspend);
        assert!(config.capabilities.can_tag_objects);
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(matches!(
            BridgeConfig::from_json("{\"jdwp_major\": \"one\"}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
