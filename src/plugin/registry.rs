use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::plugin::module::{Handler, Loader, Module};
use crate::plugin::{MODULE_SEPARATOR, NAME_CAPACITY, RegistryError};
use crate::table::{NameTable, TableError};

struct LoadedModule {
    module: Box<dyn Module>,
    path: Option<PathBuf>,
}

/// Registration state of one handler a module announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStatus {
    /// The handler table points at this module's symbol.
    Loaded,
    /// Another module registered the name first.
    NameConflict,
    /// The module announces the name but does not export the symbol.
    NotFound,
}

impl InterfaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceStatus::Loaded => "loaded",
            InterfaceStatus::NameConflict => "name conflict",
            InterfaceStatus::NotFound => "not found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    pub name: String,
    pub note: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSummary {
    pub name: String,
    pub note: String,
    pub status: InterfaceStatus,
}

/// Loaded modules and the handlers they export.
pub struct PluginRegistry {
    modules: NameTable<LoadedModule>,
    handlers: NameTable<Handler>,
    loader: Box<dyn Loader>,
    protected: Option<String>,
}

impl PluginRegistry {
    pub fn new(loader: Box<dyn Loader>, max_modules: usize, max_handlers: usize) -> Self {
        Self {
            modules: NameTable::with_capacity(max_modules),
            handlers: NameTable::with_capacity(max_handlers),
            loader,
            protected: None,
        }
    }

    /// Registers an in-process module that can never be unloaded.
    pub fn install_builtin(
        &mut self,
        name: &str,
        module: Box<dyn Module>,
    ) -> Result<(), RegistryError> {
        check_module_name(name)?;
        self.attach(name, module, None)?;
        self.protected = Some(name.to_string());
        Ok(())
    }

    /// Loads the library at `path` and registers the handlers it exports.
    ///
    /// Returns the module name (the file name of `path`). Handlers whose
    /// name is already taken, or whose symbol does not resolve, are skipped.
    pub fn load(&mut self, path: &Path) -> Result<String, RegistryError> {
        let name = module_name(path)?;
        check_module_name(&name)?;
        if self.modules.contains_key(name.as_str()) {
            return Err(RegistryError::AlreadyLoaded);
        }

        let module = self.loader.open(path).map_err(RegistryError::Open)?;
        self.attach(&name, module, Some(path.to_path_buf()))?;
        info!(module = %name, path = %path.display(), "Module loaded");
        Ok(name)
    }

    fn attach(
        &mut self,
        name: &str,
        module: Box<dyn Module>,
        path: Option<PathBuf>,
    ) -> Result<(), RegistryError> {
        // On failure `module` is dropped here, which closes the library.
        self.modules
            .insert(name.to_string(), LoadedModule { module, path })
            .map_err(|e| match e {
                TableError::Duplicate => RegistryError::AlreadyLoaded,
                TableError::Full | TableError::ReservedKey => RegistryError::TableFull,
            })?;

        let Some(loaded) = self.modules.get(name) else {
            return Ok(());
        };
        for descriptor in loaded.module.descriptors() {
            let handler = loaded.module.resolve(&descriptor.name);
            let Some(handler) = handler else {
                debug!(module = %name, handler = %descriptor.name, "Symbol not exported, skipping");
                continue;
            };
            if !is_handler_name(&descriptor.name) {
                warn!(module = %name, handler = %descriptor.name, "Invalid handler name, skipping");
                continue;
            }
            match self.handlers.insert(descriptor.name.clone(), handler) {
                Ok(()) => debug!(module = %name, handler = %descriptor.name, "Handler registered"),
                Err(TableError::Duplicate) => {
                    warn!(module = %name, handler = %descriptor.name, "Handler name taken, skipping")
                }
                Err(e) => {
                    warn!(module = %name, handler = %descriptor.name, error = %e, "Handler not registered")
                }
            }
        }
        Ok(())
    }

    /// Unloads a module and removes the handlers it registered.
    pub fn unload(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.is_protected(name) {
            return Err(RegistryError::Protected);
        }
        let Some(loaded) = self.modules.remove(name) else {
            return Err(RegistryError::NotLoaded);
        };

        for descriptor in loaded.module.descriptors() {
            let Some(handler) = loaded.module.resolve(&descriptor.name) else {
                continue;
            };
            let owned = self
                .handlers
                .get(descriptor.name.as_str())
                .is_some_and(|current| current.same_as(&handler));
            if owned {
                self.handlers.remove(descriptor.name.as_str());
                debug!(module = %name, handler = %descriptor.name, "Handler removed");
            }
        }

        loaded.module.cleanup();
        drop(loaded);
        info!(module = %name, "Module unloaded");
        Ok(())
    }

    /// Looks up a callable handler by its bare name.
    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).copied()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.as_deref() == Some(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// All loaded modules with their notes.
    pub fn modules(&self) -> Vec<ModuleSummary> {
        self.modules
            .iter()
            .map(|(name, loaded)| ModuleSummary {
                name: name.clone(),
                note: loaded.module.describe(),
                path: loaded.path.clone(),
            })
            .collect()
    }

    /// The handlers module `name` announces and whether each is registered.
    pub fn interfaces(&self, name: &str) -> Result<Vec<InterfaceSummary>, RegistryError> {
        let loaded = self.modules.get(name).ok_or(RegistryError::NotLoaded)?;
        let interfaces = loaded
            .module
            .descriptors()
            .into_iter()
            .map(|d| {
                let status = match loaded.module.resolve(&d.name) {
                    None => InterfaceStatus::NotFound,
                    Some(handler) => match self.handlers.get(d.name.as_str()) {
                        Some(current) if current.same_as(&handler) => InterfaceStatus::Loaded,
                        _ => InterfaceStatus::NameConflict,
                    },
                };
                InterfaceSummary {
                    name: d.name,
                    note: d.note,
                    status,
                }
            })
            .collect();
        Ok(interfaces)
    }
}

/// Module name of a library path: its final path segment.
pub fn module_name(path: &Path) -> Result<String, RegistryError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or(RegistryError::BadName)
}

fn check_module_name(name: &str) -> Result<(), RegistryError> {
    if name.len() >= NAME_CAPACITY {
        return Err(RegistryError::NameTooLong);
    }
    if !name.contains(MODULE_SEPARATOR) {
        return Err(RegistryError::BadName);
    }
    Ok(())
}

/// Whether `name` may be used as a handler key.
pub fn is_handler_name(name: &str) -> bool {
    !name.is_empty() && name.len() < NAME_CAPACITY && !name.contains(MODULE_SEPARATOR)
}
