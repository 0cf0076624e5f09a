//! Module registry: discovers modules and answers dependency queries.
//!
//! Modules come from TOML manifests in a modules directory (see
//! [`crate::module::command`]) or are registered in-process. A manifest that
//! cannot be read or parsed is reported as a [`DiscoveryError`] for that file
//! alone; discovery carries on with the rest.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::module::{CommandModule, HardeningModule, ModuleError, Operations};

/// Static description of a discovered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Module name.
    pub name: String,
    /// Declared dependencies.
    pub dependencies: BTreeSet<String>,
    /// Implemented optional operations.
    pub operations: Operations,
}

/// A module that could not be discovered.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The modules directory itself could not be listed.
    #[error("failed to read modules directory {}: {source}", path.display())]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// An entry of the modules directory could not be read.
    #[error("failed to read entry in modules directory {}: {source}", dir.display())]
    Entry {
        /// Directory being scanned.
        dir: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A manifest was unreadable or invalid.
    #[error("invalid module manifest {}: {source}", path.display())]
    Invalid {
        /// Manifest path.
        path: PathBuf,
        /// Why the manifest was rejected.
        source: ModuleError,
    },
    /// A second module claimed an already registered name.
    #[error("duplicate module '{name}' in {}", path.display())]
    Duplicate {
        /// Conflicting name.
        name: String,
        /// Where the duplicate came from.
        path: PathBuf,
    },
}

/// Result of scanning a modules directory.
#[derive(Default)]
pub struct Discovery {
    /// Modules that were discovered successfully.
    pub registry: ModuleRegistry,
    /// Per-module discovery failures.
    pub errors: Vec<DiscoveryError>,
}

/// Name-indexed set of available modules.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn HardeningModule>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for `*.toml` manifests (non-recursive, sorted by file name).
    ///
    /// A missing directory yields an empty registry.
    pub fn discover(dir: &Path) -> Discovery {
        let mut discovery = Discovery::default();

        if !dir.is_dir() {
            debug!(dir = %dir.display(), "modules directory absent, nothing to discover");
            return discovery;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(source) => {
                warn!(dir = %dir.display(), error = %source, "failed to read modules directory");
                discovery.errors.push(DiscoveryError::Directory {
                    path: dir.to_path_buf(),
                    source,
                });
                return discovery;
            }
        };

        let manifests = manifest_paths(
            dir,
            entries.map(|entry| entry.map(|e| e.path())),
            &mut discovery.errors,
        );

        for path in manifests {
            match CommandModule::from_file(&path) {
                Ok(module) => {
                    if let Err(e) = discovery.registry.register_from(Arc::new(module), &path) {
                        warn!(error = %e, "skipping duplicate module");
                        discovery.errors.push(e);
                    }
                }
                Err(source) => {
                    warn!(path = %path.display(), error = %source, "skipping invalid module manifest");
                    discovery
                        .errors
                        .push(DiscoveryError::Invalid { path, source });
                }
            }
        }

        info!(
            count = discovery.registry.len(),
            errors = discovery.errors.len(),
            dir = %dir.display(),
            "module discovery complete"
        );
        discovery
    }

    /// Register an in-process module.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Duplicate`] if the name is already taken.
    pub fn register(&mut self, module: Arc<dyn HardeningModule>) -> Result<(), DiscoveryError> {
        self.register_from(module, Path::new("<in-process>"))
    }

    fn register_from(
        &mut self,
        module: Arc<dyn HardeningModule>,
        origin: &Path,
    ) -> Result<(), DiscoveryError> {
        let name = module.name().to_owned();
        if self.modules.contains_key(&name) {
            return Err(DiscoveryError::Duplicate {
                name,
                path: origin.to_path_buf(),
            });
        }
        self.modules.insert(name, module);
        Ok(())
    }

    /// Look up a module by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn HardeningModule>> {
        self.modules.get(name).cloned()
    }

    /// Returns `true` when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Declared dependencies of `name`; empty when none or unknown.
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<String> {
        self.modules
            .get(name)
            .map(|m| m.dependencies().clone())
            .unwrap_or_default()
    }

    /// Dependency map of every registered module.
    pub fn dependency_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.modules
            .iter()
            .map(|(name, m)| (name.clone(), m.dependencies().clone()))
            .collect()
    }

    /// Descriptors of every registered module, sorted by name.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.modules
            .values()
            .map(|m| ModuleDescriptor {
                name: m.name().to_owned(),
                dependencies: m.dependencies().clone(),
                operations: m.operations(),
            })
            .collect()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` when no module is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Sorted `*.toml` files among `entries`; unreadable entries become errors.
fn manifest_paths(
    dir: &Path,
    entries: impl IntoIterator<Item = std::io::Result<PathBuf>>,
    errors: &mut Vec<DiscoveryError>,
) -> Vec<PathBuf> {
    let mut manifests = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => {
                if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    manifests.push(path);
                }
            }
            Err(source) => {
                warn!(dir = %dir.display(), error = %source, "skipping unreadable directory entry");
                errors.push(DiscoveryError::Entry {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        }
    }
    manifests.sort();
    manifests
}
