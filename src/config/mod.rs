//! View engine configuration.
//!
//! Read from the `[view]` table of the hosting application's TOML file.
//! Other tables in that file are ignored; unknown keys inside `[view]` are
//! rejected.
//!
//! # Example
//!
//! ```toml
//! [view]
//! view_root = "resources/views"
//! cache_root = "storage/cache/views"
//! template_ext = "tmpl"
//! artifact_ext = "tmplc"
//! verbose = true
//! ```

pub mod defaults;
mod error;

pub use error::ConfigError;

use anyhow::Result;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Locations and naming of templates and compiled artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ViewConfig {
    /// Directory holding template sources.
    #[serde(default = "defaults::view::view_root")]
    #[educe(Default = defaults::view::view_root())]
    pub view_root: PathBuf,

    /// Directory compiled artifacts are written to (flat).
    #[serde(default = "defaults::view::cache_root")]
    #[educe(Default = defaults::view::cache_root())]
    pub cache_root: PathBuf,

    /// Source file extension, without the dot.
    #[serde(default = "defaults::view::template_ext")]
    #[educe(Default = defaults::view::template_ext())]
    pub template_ext: String,

    /// Artifact file extension, without the dot.
    #[serde(default = "defaults::view::artifact_ext")]
    #[educe(Default = defaults::view::artifact_ext())]
    pub artifact_ext: String,

    /// Log compilations and cache activity.
    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub verbose: bool,
}

/// The hosting application's config file, of which only `[view]` is read.
#[derive(Deserialize)]
struct HostFile {
    #[serde(default)]
    view: ViewConfig,
}

impl ViewConfig {
    pub fn new(view_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            view_root: view_root.into(),
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Parse configuration from the content of a TOML file.
    pub fn from_str(content: &str) -> Result<Self> {
        let file: HostFile = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(file.view)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Resolve relative roots against `root` and make them absolute.
    pub fn with_root(mut self, root: &Path) -> Self {
        self.view_root = Self::normalize_path(&root.join(&self.view_root));
        self.cache_root = Self::normalize_path(&root.join(&self.cache_root));
        self
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            // For non-existent paths, manually make them absolute
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// Checked by [`crate::init`] before the process-wide view is installed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::check_extension("template_ext", &self.template_ext)?;
        Self::check_extension("artifact_ext", &self.artifact_ext)?;

        if self.view_root == self.cache_root && self.template_ext == self.artifact_ext {
            return Err(ConfigError::invalid(
                "artifact_ext",
                "must differ from template_ext when both roots are the same directory",
            ));
        }

        if !self.view_root.is_dir() {
            return Err(ConfigError::invalid(
                "view_root",
                format!("`{}` is not a directory", self.view_root.display()),
            ));
        }

        Ok(())
    }

    fn check_extension(field: &'static str, ext: &str) -> Result<(), ConfigError> {
        if ext.is_empty() {
            return Err(ConfigError::invalid(field, "must not be empty"));
        }
        if ext.starts_with('.') || ext.contains(['/', '\\']) {
            return Err(ConfigError::invalid(
                field,
                format!("`{ext}` must be a bare extension like `tmpl`"),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
