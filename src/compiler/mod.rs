//! Directive compilation.
//!
//! Translates template source into artifact text made of literal text and
//! `<?elle ... ?>` instructions:
//!
//! - **lexer**: split source into text, comments and directive tokens
//! - **directive**: the directive set and argument validation
//! - **codegen**: emit instructions for each directive
//! - **sections**: pull `@extends` and `@section` out of compiled text
//! - **layout**: fill a layout's `@yield` slots
//!
//! # Flow
//!
//! ```text
//! source ──► tokenize() ──► generate() ──► extract() ──► compose()
//!                               │              │              │
//!                               ▼              ▼              ▼
//!                          compiled text   SectionMap    artifact body
//! ```
//!
//! Everything here is pure. Reading sources and layouts from disk is the
//! cache's job.

pub mod codegen;
pub mod directive;
pub mod layout;
pub mod lexer;
pub mod sections;

pub use layout::{compose, fill_yields};
pub use sections::{Extracted, SectionMap, extract};

/// Compile template source into artifact text.
///
/// Total: malformed directives are emitted unchanged. Existing instructions
/// are copied verbatim, so compiling compiled text returns it unchanged.
pub fn compile(source: &str) -> String {
    codegen::generate(&lexer::tokenize(source))
}
