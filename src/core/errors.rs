//! MLX-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MlxError>;

/// Top-level error type for the load engine.
///
/// The four engine-level failure classes map to `InvalidConfig` (fatal to the
/// run), `Session` (fatal to one worker), `Action` (fatal to one iteration)
/// and `Probe` (fatal to one device sample).
#[derive(Debug, Error)]
pub enum MlxError {
    #[error("[MLX-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[MLX-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[MLX-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[MLX-1004] unknown action kind {kind:?} in scenario {scenario:?}")]
    UnknownActionKind { scenario: String, kind: String },

    #[error("[MLX-2001] session failure on device {device}: {details}")]
    Session { device: String, details: String },

    #[error("[MLX-2002] action {action} failed: {details}")]
    Action {
        action: &'static str,
        details: String,
    },

    #[error("[MLX-2003] device probe failure: {details}")]
    Probe { details: String },

    #[error("[MLX-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[MLX-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[MLX-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl MlxError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MLX-1001",
            Self::MissingConfig { .. } => "MLX-1002",
            Self::ConfigParse { .. } => "MLX-1003",
            Self::UnknownActionKind { .. } => "MLX-1004",
            Self::Session { .. } => "MLX-2001",
            Self::Action { .. } => "MLX-2002",
            Self::Probe { .. } => "MLX-2003",
            Self::Serialization { .. } => "MLX-3001",
            Self::Io { .. } => "MLX-3002",
            Self::Runtime { .. } => "MLX-3900",
        }
    }

    /// Whether the error belongs to the configuration class that aborts a run
    /// before any worker starts.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::UnknownActionKind { .. }
        )
    }

    /// Convenience constructor for configuration errors.
    #[must_use]
    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::InvalidConfig {
            details: details.into(),
        }
    }

    /// Convenience constructor for action failures.
    #[must_use]
    pub fn action(action: &'static str, details: impl Into<String>) -> Self {
        Self::Action {
            action,
            details: details.into(),
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for MlxError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for MlxError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<MlxError> {
        vec![
            MlxError::InvalidConfig {
                details: String::new(),
            },
            MlxError::MissingConfig {
                path: PathBuf::new(),
            },
            MlxError::ConfigParse {
                context: "",
                details: String::new(),
            },
            MlxError::UnknownActionKind {
                scenario: String::new(),
                kind: String::new(),
            },
            MlxError::Session {
                device: String::new(),
                details: String::new(),
            },
            MlxError::action("tap", ""),
            MlxError::Probe {
                details: String::new(),
            },
            MlxError::Serialization {
                context: "",
                details: String::new(),
            },
            MlxError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            MlxError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = all_variants().iter().map(MlxError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_mlx_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("MLX-"),
                "code {} must start with MLX-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = MlxError::invalid_config("no scenarios configured");
        let msg = err.to_string();
        assert!(msg.contains("MLX-1001"), "display should contain code: {msg}");
        assert!(msg.contains("no scenarios configured"));
    }

    #[test]
    fn only_config_failures_abort_before_workers() {
        let config: Vec<&str> = all_variants()
            .iter()
            .filter(|e| e.is_config_error())
            .map(MlxError::code)
            .collect();
        assert_eq!(config, vec!["MLX-1001", "MLX-1002", "MLX-1003", "MLX-1004"]);
        assert!(!MlxError::action("swipe", "element gone").is_config_error());
    }

    #[test]
    fn unknown_action_kind_names_scenario_and_kind() {
        let err = MlxError::UnknownActionKind {
            scenario: "checkout".to_string(),
            kind: "pinch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checkout"));
        assert!(msg.contains("pinch"));
        assert_eq!(err.code(), "MLX-1004");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: MlxError = json_err.into();
        assert_eq!(err.code(), "MLX-3001");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: MlxError = toml_err.into();
        assert_eq!(err.code(), "MLX-1003");
    }
}
