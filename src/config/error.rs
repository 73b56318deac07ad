//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a [`ViewConfig`](super::ViewConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config file parsing error")]
    Toml(#[from] toml::de::Error),

    /// A field holds a value the engine cannot work with.
    #[error("[view.{field}] {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(super) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_config_error_display() {
        let io_err = ConfigError::Io(
            PathBuf::from("app.toml"),
            Error::new(ErrorKind::NotFound, "file not found"),
        );
        let display = format!("{io_err}");
        assert!(display.contains("IO error"));
        assert!(display.contains("app.toml"));

        let invalid = ConfigError::invalid("template_ext", "must not be empty");
        assert_eq!(format!("{invalid}"), "[view.template_ext] must not be empty");
    }

    #[test]
    fn test_toml_error_converts() {
        let err: ConfigError = toml::from_str::<toml::Value>("[view").unwrap_err().into();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
