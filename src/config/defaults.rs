//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

pub fn r#false() -> bool {
    false
}

// ============================================================================
// [view] Section Defaults
// ============================================================================

pub mod view {
    use std::path::PathBuf;

    pub fn view_root() -> PathBuf {
        "resources/views".into()
    }

    pub fn cache_root() -> PathBuf {
        "storage/cache/views".into()
    }

    pub fn template_ext() -> String {
        "tmpl".into()
    }

    pub fn artifact_ext() -> String {
        "tmplc".into()
    }
}
