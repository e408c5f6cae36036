//! Host-supplied bridge options.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid options document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
}

/// Options as the host passes them, typically a JSON object.
///
/// Every key is optional and unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Directory holding the viewer executable. Unset means look it up on `PATH`.
    pub oid_path: Option<PathBuf>,
    pub viewer_binary: String,
    pub style: String,
    pub accept_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub event_loop_timeout_ms: u64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            oid_path: None,
            viewer_binary: "oidwindow".to_string(),
            style: "fusion".to_string(),
            accept_timeout_ms: 10_000,
            request_timeout_ms: 3_000,
            event_loop_timeout_ms: 200,
        }
    }
}

impl BridgeOptions {
    /// Parse a JSON options document. Blank input yields the defaults.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(document)?)
    }

    pub fn into_config(self) -> Result<OrchestratorConfig, ConfigError> {
        let timeouts = [
            ("accept_timeout_ms", self.accept_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("event_loop_timeout_ms", self.event_loop_timeout_ms),
        ];
        if let Some((field, _)) = timeouts.into_iter().find(|&(_, ms)| ms == 0) {
            return Err(ConfigError::ZeroTimeout { field });
        }

        let mut config = OrchestratorConfig::new(self.viewer_binary)
            .with_style(self.style)
            .with_accept_timeout(Duration::from_millis(self.accept_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_event_loop_timeout(Duration::from_millis(self.event_loop_timeout_ms));
        if let Some(dir) = self.oid_path {
            config = config.with_viewer_dir(dir);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_document_yields_defaults() {
        assert_eq!(BridgeOptions::from_json("").unwrap(), BridgeOptions::default());
        assert_eq!(BridgeOptions::from_json("{}").unwrap(), BridgeOptions::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let options =
            BridgeOptions::from_json(r#"{"oid_path": "/opt/oid/bin", "unknown": 1}"#).unwrap();
        assert_eq!(options.oid_path, Some(PathBuf::from("/opt/oid/bin")));
        assert_eq!(options.viewer_binary, "oidwindow");
        assert_eq!(options.accept_timeout_ms, 10_000);
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(matches!(
            BridgeOptions::from_json(r#"{"accept_timeout_ms": "soon"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn into_config_resolves_executable_and_timeouts() {
        let options = BridgeOptions {
            oid_path: Some(PathBuf::from("/opt/oid/bin")),
            request_timeout_ms: 250,
            ..BridgeOptions::default()
        };
        let config = options.into_config().unwrap();
        assert_eq!(
            config.viewer_executable(),
            PathBuf::from("/opt/oid/bin/oidwindow")
        );
        assert_eq!(config.style, "fusion");
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.accept_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let options = BridgeOptions {
            event_loop_timeout_ms: 0,
            ..BridgeOptions::default()
        };
        let err = options.into_config().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroTimeout {
                field: "event_loop_timeout_ms"
            }
        ));
    }
}
