use crate::app_logger::LogRingBuffer;
use crate::builtin;
use crate::catalog::AppCatalog;
use crate::config::AppConfig;
use crate::module::{DefaultModuleLoader, ModuleLoader, NativeModuleLoader};
use crate::operations::OperationRegistry;
use crate::plugins::PluginManager;
use crate::resolver::AddressResolver;
use crate::watcher::{ChangeListener, PluginWatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Builtin apps live in this folder under the assets root.
pub const BUILTIN_APPS_DIR_NAME: &str = "apps";

/// Global application state, shared by the desktop shell's commands.
pub struct AppState {
    /// Effective config: file values plus environment overrides.
    pub(crate) config: parking_lot::RwLock<AppConfig>,
    pub registry: Arc<OperationRegistry>,
    pub plugins: Arc<PluginManager>,
    pub catalog: AppCatalog,
    pub resolver: AddressResolver,
    pub log_buffer: Arc<LogRingBuffer>,
    /// Present while user plugins are watched for changes.
    pub(crate) plugin_watcher: parking_lot::Mutex<Option<PluginWatcher>>,
}

impl AppState {
    /// `default_assets_root` is used unless the config names one.
    pub fn new(
        config: AppConfig,
        default_assets_root: PathBuf,
        loader: Arc<dyn ModuleLoader>,
        log_buffer: Arc<LogRingBuffer>,
    ) -> Self {
        let assets_root = config.assets_dir.clone().unwrap_or(default_assets_root);
        let user_apps_dir = config.resolved_user_apps_dir();

        let registry = Arc::new(OperationRegistry::new());
        let plugins = Arc::new(PluginManager::new(registry.clone(), loader));
        plugins.set_disabled(config.disabled_plugin_ids.iter().cloned());

        Self {
            catalog: AppCatalog::new(assets_root.join(BUILTIN_APPS_DIR_NAME), user_apps_dir),
            resolver: AddressResolver::new(assets_root, config.dev_server_url.clone()),
            config: parking_lot::RwLock::new(config),
            registry,
            plugins,
            log_buffer,
            plugin_watcher: parking_lot::Mutex::new(None),
        }
    }

    /// Builtin linked modules plus native libraries.
    pub fn with_default_loader(
        config: AppConfig,
        default_assets_root: PathBuf,
        log_buffer: Arc<LogRingBuffer>,
    ) -> Self {
        let loader = DefaultModuleLoader::new(builtin::linked_modules(), NativeModuleLoader::default());
        Self::new(config, default_assets_root, Arc::new(loader), log_buffer)
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    pub fn builtin_apps_dir(&self) -> &Path {
        self.catalog.builtin_dir()
    }

    pub fn user_apps_dir(&self) -> &Path {
        self.catalog.user_dir()
    }

    /// Directories app files may be read from.
    pub fn app_roots(&self) -> Vec<PathBuf> {
        vec![self.builtin_apps_dir().to_path_buf(), self.user_apps_dir().to_path_buf()]
    }

    /// Load builtin plugins, then user plugins. Builtin ids win collisions.
    pub async fn load_plugins(&self) -> usize {
        let builtin = self.plugins.load_all(self.builtin_apps_dir()).await;
        let user = self.plugins.load_all(self.user_apps_dir()).await;
        info!(builtin, user, "Startup plugin load complete");
        builtin + user
    }

    /// Watch the user apps directory if enabled in the config.
    pub fn start_watcher(&self, listener: Option<ChangeListener>) {
        if !self.config.read().watch_plugins {
            info!("Plugin watching disabled");
            return;
        }
        match PluginWatcher::start(self.user_apps_dir(), self.plugins.clone(), listener) {
            Ok(watcher) => *self.plugin_watcher.lock() = Some(watcher),
            Err(e) => warn!("Plugin hot reload unavailable: {e}"),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.plugin_watcher.lock().is_some()
    }

    /// Stop watching and unload every plugin.
    pub async fn shutdown(&self) {
        self.plugin_watcher.lock().take();
        self.plugins.unload_all().await;
    }
}
