//! Elle - a small directive template language compiled to cached artifacts.
//!
//! Templates use `{{ $var }}` interpolation (always HTML-escaped), `@if`,
//! `@foreach` and `@include` control directives, and `@extends` / `@section`
//! / `@yield` layout inheritance. Each template is compiled once into an
//! artifact file under the cache root and reused until its source, or a
//! layout it extends, changes.
//!
//! # Example
//!
//! ```no_run
//! use elle::{View, ViewConfig};
//! use serde_json::json;
//!
//! let view = View::new(ViewConfig::new("resources/views", "storage/cache/views"));
//! let html = view.render_with("welcome", &json!({ "name": "Ann" }))?;
//! # Ok::<(), elle::ViewError>(())
//! ```
//!
//! # Modules
//!
//! | Module     | Purpose                                         |
//! |------------|-------------------------------------------------|
//! | `compiler` | source → artifact text, sections, layouts       |
//! | `expr`     | expression language inside directives           |
//! | `runtime`  | executes artifact text against a context        |
//! | `cache`    | artifact files, freshness, atomic writes        |
//! | `view`     | render entry points and the process-wide view   |
//! | `config`   | `[view]` configuration                          |

#[macro_use]
mod logger;

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod expr;
pub mod runtime;
pub mod value;
pub mod view;

pub use cache::{Artifact, ArtifactCache};
pub use compiler::compile;
pub use config::{ConfigError, ViewConfig};
pub use error::{Result, ViewError};
pub use value::Context;
pub use view::{RenderContext, View, context, global, init, render};
