//! Folder-based module resolution.
//!
//! [`ModuleResolver`] is a [`ResolutionProvider`] that looks for
//! `<folder>/<SimpleName>.module` in each registered search folder, in
//! registration order, and falls back to its home directory (by default the
//! directory of the running executable).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use svchost_core::MODULE_EXTENSION;
use tracing::{debug, warn};

use crate::domain::{LoadedModule, ModuleDomain, ResolutionProvider, ResolveRequest};

/// Resolves module references against an ordered list of folders.
///
/// The folder list is append-only and may be read by resolution callbacks
/// running concurrently with construction.
#[derive(Debug)]
pub struct ModuleResolver {
    folders: RwLock<Vec<PathBuf>>,
    home: Option<PathBuf>,
    connected: Mutex<Vec<Arc<ModuleDomain>>>,
}

impl ModuleResolver {
    /// Creates a resolver whose fallback folder is the executable's directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_home(executable_dir())
    }

    /// Creates a resolver with an explicit fallback folder.
    #[must_use]
    pub fn with_home(home: Option<PathBuf>) -> Self {
        Self {
            folders: RwLock::new(Vec::with_capacity(1)),
            home,
            connected: Mutex::new(Vec::with_capacity(1)),
        }
    }

    /// Appends a search folder. Duplicates are not checked.
    pub fn add_folder(&self, folder: impl Into<PathBuf>) {
        self.folders.write().push(folder.into());
    }

    /// Snapshot of the registered folders, in registration order.
    #[must_use]
    pub fn folders(&self) -> Vec<PathBuf> {
        self.folders.read().clone()
    }

    #[must_use]
    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    /// Attaches this resolver to `domain` (default: the process domain).
    ///
    /// Connecting to a domain this resolver is already connected to does
    /// nothing.
    pub fn connect(self: &Arc<Self>, domain: Option<&Arc<ModuleDomain>>) {
        let domain = domain.map_or_else(ModuleDomain::current, Arc::clone);
        let mut connected = self.connected.lock();
        if connected.iter().any(|d| Arc::ptr_eq(d, &domain)) {
            return;
        }
        let provider: Arc<dyn ResolutionProvider> = Arc::clone(self) as Arc<dyn ResolutionProvider>;
        domain.attach(provider);
        debug!("Module resolver connected to domain {}", domain.name());
        connected.push(domain);
    }

    /// Detaches this resolver from `domain` (default: the process domain).
    ///
    /// Disconnecting from a domain this resolver is not connected to does
    /// nothing.
    pub fn disconnect(self: &Arc<Self>, domain: Option<&Arc<ModuleDomain>>) {
        let domain = domain.map_or_else(ModuleDomain::current, Arc::clone);
        let mut connected = self.connected.lock();
        let Some(index) = connected.iter().position(|d| Arc::ptr_eq(d, &domain)) else {
            return;
        };
        let provider: Arc<dyn ResolutionProvider> = Arc::clone(self) as Arc<dyn ResolutionProvider>;
        domain.detach(&provider);
        connected.remove(index);
        debug!("Module resolver disconnected from domain {}", domain.name());
    }

    /// Returns `true` if this resolver is attached to `domain`.
    #[must_use]
    pub fn is_connected(&self, domain: &Arc<ModuleDomain>) -> bool {
        self.connected.lock().iter().any(|d| Arc::ptr_eq(d, domain))
    }

    /// The image path this resolver would load for `simple_name`, if any.
    ///
    /// The first folder containing the image wins; the home folder is only
    /// tried when no search folder matches.
    #[must_use]
    pub fn locate(&self, simple_name: &str) -> Option<PathBuf> {
        let folders = self.folders.read();
        folders
            .iter()
            .map(PathBuf::as_path)
            .chain(self.home.as_deref())
            .map(|folder| candidate_path(folder, simple_name))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionProvider for ModuleResolver {
    fn resolve(&self, domain: &ModuleDomain, request: &ResolveRequest<'_>) -> Option<Arc<LoadedModule>> {
        let name = request.reference.simple_name();
        let Some(path) = self.locate(name) else {
            debug!("Module resolver found no image for {name}");
            return None;
        };
        match domain.load_from(&path, request.mode) {
            Ok(module) => {
                debug!("Resolved {name} to {}", path.display());
                Some(module)
            }
            Err(e) => {
                warn!("Unable to load {} for {name}: {e}", path.display());
                None
            }
        }
    }
}

fn candidate_path(folder: &Path, simple_name: &str) -> PathBuf {
    folder.join(format!("{simple_name}.{MODULE_EXTENSION}"))
}

pub(crate) fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
