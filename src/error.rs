//! Errors surfaced by compilation, caching and rendering.
//!
//! Malformed directives never appear here: the compiler passes them through
//! as literal text.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("template `{name}` not found at `{}`", path.display())]
    TemplateNotFound { name: String, path: PathBuf },

    #[error("layout `{layout}` extended by `{name}` not found at `{}`", path.display())]
    LayoutNotFound {
        name: String,
        layout: String,
        path: PathBuf,
    },

    #[error("failed to write compiled template to `{}`", path.display())]
    CacheWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("include cycle: {}", chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },

    #[error("IO error when reading `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid compiled template `{name}`: {message}")]
    Syntax { name: String, message: String },

    #[error("render data must serialize to a map: {0}")]
    InvalidContext(String),

    #[error("invalid view configuration")]
    Config(#[from] ConfigError),

    #[error("view engine is not initialized, call `elle::init` first")]
    NotInitialized,

    #[error("view engine is already initialized")]
    AlreadyInitialized,
}

pub type Result<T, E = ViewError> = std::result::Result<T, E>;
