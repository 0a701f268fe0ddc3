//! Plugin code: what a loaded module looks like and how entry points become one.
//!
//! A [`PluginModule`] is a named pair of optional hooks. The manager requires
//! `activate` and calls `deactivate` if present. Modules come from a
//! [`ModuleLoader`]:
//!
//! - [`NativeModuleLoader`]: `.so` / `.dylib` / `.dll` built with
//!   [`export_plugin!`](crate::export_plugin), loaded through `libloading`
//! - [`LinkedModuleLoader`]: modules compiled into the host; the entry file
//!   (`*.linked`) holds the module name
//! - [`DefaultModuleLoader`]: picks one of the above by extension
//!
//! Native plugins share Rust types with the host, so they must be built with
//! the same toolchain and the same `appdeck` version.

use crate::error::{HookError, PluginError, PluginResult};
use crate::scope::PluginContext;
use libloading::Library;
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Keeps the code behind a module's hooks and handlers alive.
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

pub type ActivateHook = Box<dyn FnOnce(&mut PluginContext<'_>) -> Result<(), HookError> + Send>;
pub type DeactivateHook = Box<dyn FnOnce() -> Result<(), HookError> + Send>;

/// Trait-style plugin, adapted into hooks by [`PluginModule::from_plugin`].
pub trait Plugin: Send + 'static {
    fn activate(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), HookError>;

    fn deactivate(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Loaded plugin code.
#[derive(Default)]
pub struct PluginModule {
    pub(crate) activate: Option<ActivateHook>,
    pub(crate) deactivate: Option<DeactivateHook>,
    pub(crate) keep_alive: Option<KeepAlive>,
}

impl PluginModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activate<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut PluginContext<'_>) -> Result<(), HookError> + Send + 'static,
    {
        self.activate = Some(Box::new(hook));
        self
    }

    pub fn with_deactivate<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), HookError> + Send + 'static,
    {
        self.deactivate = Some(Box::new(hook));
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Share one plugin instance between the two hooks.
    pub fn from_plugin<P: Plugin>(plugin: P) -> Self {
        let shared = Arc::new(parking_lot::Mutex::new(plugin));
        let for_deactivate = shared.clone();
        Self::new()
            .with_activate(move |ctx| shared.lock().activate(ctx))
            .with_deactivate(move || for_deactivate.lock().deactivate())
    }

    pub fn has_activate(&self) -> bool {
        self.activate.is_some()
    }

    pub fn has_deactivate(&self) -> bool {
        self.deactivate.is_some()
    }
}

/// Turns an entry point file into a [`PluginModule`].
///
/// Implementations must not hand out code cached from an earlier load of the
/// same path; the manager relies on that for hot reload.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, entry: &Path) -> PluginResult<PluginModule>;
}

fn invalid(entry: &Path, reason: impl Into<String>) -> PluginError {
    PluginError::InvalidPluginModule {
        entry: entry.to_path_buf(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Linked modules
// ---------------------------------------------------------------------------

pub const LINKED_EXTENSION: &str = "linked";

type ModuleFactory = Arc<dyn Fn() -> PluginModule + Send + Sync>;

/// Modules compiled into the host, looked up by name.
#[derive(Default, Clone)]
pub struct LinkedModuleLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl LinkedModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ModuleLoader for LinkedModuleLoader {
    fn load(&self, entry: &Path) -> PluginResult<PluginModule> {
        // Re-read on every load so editing the entry file switches modules.
        let name = std::fs::read_to_string(entry).map_err(|source| PluginError::Io {
            path: entry.to_path_buf(),
            source,
        })?;
        let name = name.trim();
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| invalid(entry, format!("no linked module named \"{name}\"")))?;
        Ok(factory())
    }
}

// ---------------------------------------------------------------------------
// Native modules
// ---------------------------------------------------------------------------

pub const ACTIVATE_SYMBOL: &[u8] = b"appdeck_plugin_activate\0";
pub const DEACTIVATE_SYMBOL: &[u8] = b"appdeck_plugin_deactivate\0";

type NativeActivateFn = fn(&mut PluginContext<'_>) -> Result<(), HookError>;
type NativeDeactivateFn = fn() -> Result<(), HookError>;

/// A library mapped from a private copy of the plugin's entry point.
struct ShadowLibrary {
    library: Option<Library>,
    shadow_path: PathBuf,
}

impl Drop for ShadowLibrary {
    fn drop(&mut self) {
        drop(self.library.take());
        if let Err(e) = std::fs::remove_file(&self.shadow_path) {
            debug!(path = %self.shadow_path.display(), "Failed to remove shadow copy: {e}");
        }
    }
}

/// Loads native plugin libraries.
///
/// Every load maps a uniquely named copy of the library, so a rebuilt
/// plugin is never served from the platform loader's handle cache.
pub struct NativeModuleLoader {
    shadow_dir: PathBuf,
}

impl NativeModuleLoader {
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
        }
    }

    pub fn is_native(entry: &Path) -> bool {
        matches!(
            entry.extension().and_then(|e| e.to_str()),
            Some("so" | "dylib" | "dll")
        )
    }

    fn shadow_copy(&self, entry: &Path) -> PluginResult<PathBuf> {
        std::fs::create_dir_all(&self.shadow_dir).map_err(|source| PluginError::Io {
            path: self.shadow_dir.clone(),
            source,
        })?;

        let stem = entry
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plugin");
        let ext = entry.extension().and_then(|e| e.to_str()).unwrap_or("so");
        let shadow = self
            .shadow_dir
            .join(format!("{stem}-{}.{ext}", uuid::Uuid::new_v4().simple()));

        std::fs::copy(entry, &shadow).map_err(|source| PluginError::Io {
            path: entry.to_path_buf(),
            source,
        })?;
        Ok(shadow)
    }
}

impl Default for NativeModuleLoader {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("appdeck-modules"))
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn load(&self, entry: &Path) -> PluginResult<PluginModule> {
        let shadow_path = self.shadow_copy(entry)?;

        // SAFETY: loading a library runs its initializers. Plugins are trusted
        // code installed by the user; the host process boundary is the only
        // isolation we provide.
        let library = match unsafe { Library::new(&shadow_path) } {
            Ok(lib) => lib,
            Err(e) => {
                let _ = std::fs::remove_file(&shadow_path);
                return Err(invalid(entry, format!("failed to load library: {e}")));
            }
        };

        // SAFETY: the symbol types match what `export_plugin!` generates. The
        // fn pointers are only called while `shadow` (which owns the library)
        // is alive: each hook closure holds a clone of it.
        let activate: Option<NativeActivateFn> =
            unsafe { library.get::<NativeActivateFn>(ACTIVATE_SYMBOL) }
                .ok()
                .map(|sym| *sym);
        let deactivate: Option<NativeDeactivateFn> =
            unsafe { library.get::<NativeDeactivateFn>(DEACTIVATE_SYMBOL) }
                .ok()
                .map(|sym| *sym);

        let shadow = Arc::new(ShadowLibrary {
            library: Some(library),
            shadow_path,
        });
        debug!(entry = %entry.display(), "Mapped native plugin library");

        let mut module = PluginModule::new().with_keep_alive(shadow.clone());
        if let Some(activate) = activate {
            let pin = shadow.clone();
            module = module.with_activate(move |ctx| {
                let result = activate(ctx);
                drop(pin);
                result
            });
        } else {
            warn!(entry = %entry.display(), "Native plugin does not export an activate hook");
        }
        if let Some(deactivate) = deactivate {
            let pin = shadow;
            module = module.with_deactivate(move || {
                let result = deactivate();
                drop(pin);
                result
            });
        }
        Ok(module)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Chooses a loader from the entry point's extension.
pub struct DefaultModuleLoader {
    linked: LinkedModuleLoader,
    native: NativeModuleLoader,
}

impl DefaultModuleLoader {
    pub fn new(linked: LinkedModuleLoader, native: NativeModuleLoader) -> Self {
        Self { linked, native }
    }
}

impl ModuleLoader for DefaultModuleLoader {
    fn load(&self, entry: &Path) -> PluginResult<PluginModule> {
        if NativeModuleLoader::is_native(entry) {
            return self.native.load(entry);
        }
        match entry.extension().and_then(|e| e.to_str()) {
            Some(LINKED_EXTENSION) => self.linked.load(entry),
            other => Err(invalid(
                entry,
                format!("unsupported entry point type: {}", other.unwrap_or("<none>")),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Module cache
// ---------------------------------------------------------------------------

struct CachedModule {
    generation: u64,
    _keep_alive: Option<KeepAlive>,
}

/// The manager's explicit registry of loaded module code, keyed by entry path.
///
/// Evicted before every load, so each load observes the file as it is now.
#[derive(Default)]
pub struct ModuleCache {
    entries: HashMap<PathBuf, CachedModule>,
    next_generation: u64,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget whatever was loaded from `entry`. Returns its generation.
    pub fn evict(&mut self, entry: &Path) -> Option<u64> {
        self.entries.remove(entry).map(|cached| cached.generation)
    }

    /// Record a fresh load of `entry` and return its generation.
    pub fn insert(&mut self, entry: PathBuf, keep_alive: Option<KeepAlive>) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            entry,
            CachedModule {
                generation,
                _keep_alive: keep_alive,
            },
        );
        generation
    }

    pub fn generation(&self, entry: &Path) -> Option<u64> {
        self.entries.get(entry).map(|cached| cached.generation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Export a [`Plugin`] type from a `cdylib` so [`NativeModuleLoader`] can load it.
///
/// The type must implement [`Plugin`] and [`Default`]. One instance is created
/// per activation and dropped after `deactivate`.
#[macro_export]
macro_rules! export_plugin {
    ($plugin:ty) => {
        static __APPDECK_PLUGIN_INSTANCE: ::std::sync::Mutex<::std::option::Option<$plugin>> =
            ::std::sync::Mutex::new(::std::option::Option::None);

        #[unsafe(no_mangle)]
        pub fn appdeck_plugin_activate(
            ctx: &mut $crate::PluginContext<'_>,
        ) -> ::std::result::Result<(), $crate::HookError> {
            let mut slot = __APPDECK_PLUGIN_INSTANCE
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let plugin = slot.insert(<$plugin as ::std::default::Default>::default());
            $crate::Plugin::activate(plugin, ctx)
        }

        #[unsafe(no_mangle)]
        pub fn appdeck_plugin_deactivate() -> ::std::result::Result<(), $crate::HookError> {
            let taken = __APPDECK_PLUGIN_INSTANCE
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            match taken {
                ::std::option::Option::Some(mut plugin) => $crate::Plugin::deactivate(&mut plugin),
                ::std::option::Option::None => ::std::result::Result::Ok(()),
            }
        }
    };
}
