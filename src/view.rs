//! Rendering entry points.
//!
//! [`View`] owns an [`ArtifactCache`] and renders templates by name. Each
//! call builds its own [`RenderContext`], so a `View` can be shared across
//! threads without locking.
//!
//! A process-wide view can be installed once with [`init`] and used through
//! [`render`].

use crate::cache::ArtifactCache;
use crate::config::ViewConfig;
use crate::error::{Result, ViewError};
use crate::runtime::{Include, Program, Scope};
use crate::value::Context;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::OnceLock;

static VIEW: OnceLock<View> = OnceLock::new();

/// Install the process-wide view. Fails if `config` does not validate or if
/// one is already installed.
pub fn init(config: ViewConfig) -> Result<&'static View> {
    config.validate()?;
    let mut installed = false;
    let view = VIEW.get_or_init(|| {
        installed = true;
        View::new(config)
    });
    if installed {
        Ok(view)
    } else {
        Err(ViewError::AlreadyInitialized)
    }
}

/// The process-wide view installed by [`init`].
pub fn global() -> Result<&'static View> {
    VIEW.get().ok_or(ViewError::NotInitialized)
}

/// Render `name` with the process-wide view.
pub fn render(name: &str, data: &Context) -> Result<String> {
    global()?.render(name, data)
}

#[derive(Debug)]
pub struct View {
    cache: ArtifactCache,
}

impl View {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            cache: ArtifactCache::new(config),
        }
    }

    pub const fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Whether a template source exists for `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.cache.source_path(name).is_ok_and(|path| path.is_file())
    }

    /// Render a template. Nothing is returned unless the whole render succeeds.
    pub fn render(&self, name: &str, data: &Context) -> Result<String> {
        let mut out = String::new();
        RenderContext::new(self).render_into(name, data, &mut out)?;
        if self.cache.config().verbose {
            log!("render"; "{name} ({} bytes)", out.len());
        }
        Ok(out)
    }

    /// Render with any serializable value that serializes to a map.
    pub fn render_with<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> Result<String> {
        self.render(name, &context(data)?)
    }
}

/// Convert serializable data into a render context. `null` gives an empty
/// context; anything other than a map is rejected.
pub fn context<T: Serialize + ?Sized>(data: &T) -> Result<Context> {
    match serde_json::to_value(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Context::new()),
        Ok(other) => Err(ViewError::InvalidContext(format!("got `{other}`"))),
        Err(err) => Err(ViewError::InvalidContext(err.to_string())),
    }
}

/// State of a single render: the templates currently being rendered,
/// outermost first.
pub struct RenderContext<'v> {
    view: &'v View,
    stack: SmallVec<[String; 4]>,
}

impl<'v> RenderContext<'v> {
    pub fn new(view: &'v View) -> Self {
        Self {
            view,
            stack: SmallVec::new(),
        }
    }

    pub fn render_into(&mut self, name: &str, data: &Context, out: &mut String) -> Result<()> {
        if self.stack.iter().any(|active| active == name) {
            let mut chain: Vec<String> = self.stack.to_vec();
            chain.push(name.to_owned());
            return Err(ViewError::IncludeCycle { chain });
        }

        let artifact = self.view.cache.get(name)?;
        let program = Program::parse(name, &artifact.text)?;

        self.stack.push(name.to_owned());
        let result = program.execute(&mut Scope::new(data), out, self);
        self.stack.pop();
        result
    }
}

impl Include for RenderContext<'_> {
    fn include(&mut self, name: &str, scope: &Scope<'_>, out: &mut String) -> Result<()> {
        let data = scope.flatten();
        self.render_into(name, &data, out)
    }
}
