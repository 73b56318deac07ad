//! Compiled artifact cache.
//!
//! Maps a logical template name to an artifact file on disk, compiling it
//! when missing or stale.
//!
//! # Layout
//!
//! ```text
//! <view_root>/layouts/app.tmpl      ──► <cache_root>/<hex(blake3("layouts/app"))>.tmplc
//! <view_root>/home.tmpl             ──► <cache_root>/<hex(blake3("home"))>.tmplc
//! ```
//!
//! # Freshness
//!
//! An artifact is reused when its mtime is not older than its source and not
//! older than any layout it was composed from. Those layouts are recorded in
//! the artifact's leading `uses` instructions.
//!
//! A written artifact carries the newest mtime its inputs had before they were
//! read, so an edit landing mid-compile still reads as newer.
//!
//! # Concurrency
//!
//! Check-then-compile runs under a per-name mutex. Artifacts are written to a
//! temp file in the cache directory and renamed into place, so readers never
//! see a partial artifact, even across processes.

use crate::compiler::{SectionMap, compile, extract, fill_yields};
use crate::config::ViewConfig;
use crate::error::{Result, ViewError};
use crate::runtime::{dependencies, dependency_header};
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// A compiled template ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub text: String,
}

#[derive(Debug)]
pub struct ArtifactCache {
    config: ViewConfig,
    locks: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
    compiles: AtomicUsize,
}

impl ArtifactCache {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(FxHashMap::default()),
            compiles: AtomicUsize::new(0),
        }
    }

    pub const fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Source file for a logical name.
    ///
    /// Names are relative and slash separated; absolute names, `..`, empty
    /// segments and backslashes are rejected as not found.
    pub fn source_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.template_file(name);
        if is_valid_name(name) {
            Ok(path)
        } else {
            Err(ViewError::TemplateNotFound {
                name: name.to_owned(),
                path,
            })
        }
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        let key = hex::encode(blake3::hash(name.as_bytes()).as_bytes());
        self.config
            .cache_root
            .join(format!("{key}.{}", self.config.artifact_ext))
    }

    /// Number of compilations this cache has performed.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Whether `get(name)` would reuse the artifact on disk.
    pub fn is_fresh(&self, name: &str) -> bool {
        self.source_path(name)
            .is_ok_and(|source| self.fresh_artifact(&source, &self.artifact_path(name)).is_some())
    }

    /// Return the artifact for `name`, compiling it first if needed.
    pub fn get(&self, name: &str) -> Result<Artifact> {
        let source = self.source_path(name)?;
        if !source.is_file() {
            return Err(ViewError::TemplateNotFound {
                name: name.to_owned(),
                path: source,
            });
        }
        let path = self.artifact_path(name);

        let lock = self.lock_for(name);
        let _guard = lock.lock();

        if let Some(text) = self.fresh_artifact(&source, &path) {
            return Ok(Artifact {
                name: name.to_owned(),
                path,
                text,
            });
        }

        let (text, stamp) = self.build(name, &source)?;
        self.persist(&path, &text, stamp)?;
        self.compiles.fetch_add(1, Ordering::Relaxed);
        if self.config.verbose {
            log!("compile"; "{name} -> {}", path.display());
        }

        Ok(Artifact {
            name: name.to_owned(),
            path,
            text,
        })
    }

    /// Compile every template under the view root. Returns how many
    /// templates were visited.
    pub fn warm(&self) -> Result<usize> {
        let names = self.template_names();
        names.par_iter().try_for_each(|name| self.get(name).map(drop))?;
        if self.config.verbose {
            log!("cache"; "warmed {} templates", names.len());
        }
        Ok(names.len())
    }

    /// Delete all artifacts. Returns how many files were removed.
    pub fn clear(&self) -> Result<usize> {
        let root = &self.config.cache_root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(ViewError::Io {
                    path: root.clone(),
                    source,
                });
            }
        };

        let ext = self.config.artifact_ext.as_str();
        let mut removed = 0;
        for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
            if path.is_file() && path.extension().is_some_and(|e| e == ext) {
                fs::remove_file(&path).map_err(|source| ViewError::Io {
                    path: path.clone(),
                    source,
                })?;
                removed += 1;
            }
        }
        if self.config.verbose {
            log!("cache"; "cleared {removed} artifacts");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------------

    fn template_file(&self, name: &str) -> PathBuf {
        self.config
            .view_root
            .join(format!("{name}.{}", self.config.template_ext))
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(name.to_owned()).or_default())
    }

    /// Artifact text if the artifact on disk is current.
    fn fresh_artifact(&self, source: &Path, artifact: &Path) -> Option<String> {
        if !is_up_to_date(source, artifact, None) {
            return None;
        }
        let text = fs::read_to_string(artifact).ok()?;

        let mut deps_mtime: Option<SystemTime> = None;
        for layout in dependencies(&text) {
            // a vanished layout forces a rebuild, which reports it
            let path = self.source_path(&layout).ok()?;
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            deps_mtime = deps_mtime.max(Some(modified));
        }

        is_up_to_date(source, artifact, deps_mtime).then_some(text)
    }

    /// Compile `name` and resolve its `@extends` chain into artifact text,
    /// along with the newest mtime of the files read.
    fn build(&self, name: &str, source_path: &Path) -> Result<(String, Option<SystemTime>)> {
        let mut stamp = modified(source_path);
        let source = fs::read_to_string(source_path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ViewError::TemplateNotFound {
                name: name.to_owned(),
                path: source_path.to_path_buf(),
            },
            _ => ViewError::Io {
                path: source_path.to_path_buf(),
                source: err,
            },
        })?;

        // extracted text is already compiled; only yields are left to resolve
        let page = extract(&compile(&source));
        let mut sections: SectionMap = page
            .sections
            .iter()
            .map(|(section, content)| (section.clone(), fill_yields(content, &page.sections)))
            .collect();
        let mut body = page.body;
        let mut next = page.layout;
        let mut chain = vec![name.to_owned()];

        while let Some(layout) = next.take() {
            if chain.contains(&layout) {
                chain.push(layout);
                return Err(ViewError::IncludeCycle { chain });
            }
            let (layout_source, layout_stamp) = self.read_layout(&chain, &layout)?;
            stamp = stamp.max(layout_stamp);
            let parent = extract(&compile(&layout_source));

            let inherited: Vec<(String, String)> = parent
                .sections
                .iter()
                .filter(|(section, _)| !sections.contains_key(*section))
                .map(|(section, content)| (section.clone(), fill_yields(content, &sections)))
                .collect();
            sections.extend(inherited);

            body = parent.body;
            next = parent.layout;
            chain.push(layout);
        }

        let mut text = dependency_header(&chain[1..]);
        text.push_str(&fill_yields(&body, &sections));
        Ok((text, stamp))
    }

    fn read_layout(&self, chain: &[String], layout: &str) -> Result<(String, Option<SystemTime>)> {
        let path = self.template_file(layout);
        let not_found = || ViewError::LayoutNotFound {
            name: chain.last().cloned().unwrap_or_default(),
            layout: layout.to_owned(),
            path: path.clone(),
        };
        if !is_valid_name(layout) {
            return Err(not_found());
        }
        let stamp = modified(&path);
        let source = fs::read_to_string(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => not_found(),
            _ => ViewError::Io {
                path: path.clone(),
                source: err,
            },
        })?;
        Ok((source, stamp))
    }

    fn persist(&self, path: &Path, text: &str, stamp: Option<SystemTime>) -> Result<()> {
        let write_failed = |source: io::Error| ViewError::CacheWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        let root = &self.config.cache_root;
        fs::create_dir_all(root).map_err(write_failed)?;

        let mut tmp = NamedTempFile::new_in(root).map_err(write_failed)?;
        tmp.write_all(text.as_bytes()).map_err(write_failed)?;
        if let Some(stamp) = stamp {
            tmp.as_file().set_modified(stamp).map_err(write_failed)?;
        }
        tmp.persist(path).map_err(|err| write_failed(err.error))?;
        Ok(())
    }

    /// Logical names of all templates under the view root.
    fn template_names(&self) -> Vec<String> {
        let root = &self.config.view_root;
        let ext = self.config.template_ext.as_str();
        WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|e| e == ext))
            .filter_map(|e| {
                let relative = e.path().strip_prefix(root).ok()?.with_extension("");
                let segments: Vec<&str> = relative
                    .components()
                    .map(|c| c.as_os_str().to_str())
                    .collect::<Option<_>>()?;
                Some(segments.join("/"))
            })
            .filter(|name| is_valid_name(name))
            .collect()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && name.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

/// Check if destination is up-to-date compared to source and dependencies.
fn is_up_to_date(src: &Path, dst: &Path, deps_mtime: Option<SystemTime>) -> bool {
    let Ok(src_time) = src.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let Ok(dst_time) = dst.metadata().and_then(|m| m.modified()) else {
        return false;
    };

    // Check if source is newer than destination
    if src_time > dst_time {
        return false;
    }

    // Check if any dependency is newer than destination
    if let Some(deps) = deps_mtime
        && deps > dst_time
    {
        return false;
    }

    true
}
