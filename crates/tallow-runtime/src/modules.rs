//! Module registry and search path.
//!
//! Modules are looked up in two places, in order:
//! 1. Precompiled modules registered under an id with [`ModuleRegistry::load`]
//! 2. Files found by substituting the module path into each search template
//!
//! Module names use `.` separators (`ui.main`); on disk these become path
//! separators (`ui/main`).

use crate::error::RuntimeError;
use dashmap::DashMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

/// Precompiled modules by id
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<[u8]>>,
}

impl ModuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` under `id`, replacing any earlier module
    pub fn load(&self, id: &str, bytes: &[u8]) -> Result<(), RuntimeError> {
        if id.is_empty() || id.contains('\0') {
            return Err(RuntimeError::InvalidModuleId(id.to_string()));
        }
        if self.modules.insert(id.to_string(), Arc::from(bytes)).is_some() {
            log::debug!("module '{}' replaced", id);
        }
        Ok(())
    }

    /// Remove the module registered under `id`
    pub fn unload(&self, id: &str) -> Result<(), RuntimeError> {
        self.modules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))
    }

    /// Bytes registered under `id`
    pub fn get(&self, id: &str) -> Option<Arc<[u8]>> {
        self.modules.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// `?`-template search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    templates: Vec<String>,
    root: Option<PathBuf>,
}

impl SearchPath {
    /// Search path with templates relative to the working directory
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates, root: None }
    }

    /// Resolve relative templates against `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Search templates in order
    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    /// Candidate files for `name`, in search order
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let relative = name.replace('.', &MAIN_SEPARATOR.to_string());
        self.templates
            .iter()
            .map(|template| {
                let path = PathBuf::from(template.replace('?', &relative));
                match &self.root {
                    Some(root) if path.is_relative() => root.join(path),
                    _ => path,
                }
            })
            .collect()
    }

    /// First existing candidate for `name`
    pub fn find(&self, name: &str) -> Result<PathBuf, RuntimeError> {
        let candidates = self.candidates(name);
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }
        let tried = candidates
            .iter()
            .map(|p| format!("\n\tno file '{}'", p.display()))
            .collect();
        Err(RuntimeError::ModuleNotFound {
            name: name.to_string(),
            tried,
        })
    }
}

/// Module id for a file path: the file stem
pub(crate) fn module_id_for_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
