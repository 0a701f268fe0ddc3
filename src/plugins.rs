//! Plugin lifecycle: discovery, loading, activation, teardown and hot reload.
//!
//! Plugins are app directories whose `manifest.json` declares a `main` entry
//! point. Loading one turns that entry point into a [`PluginModule`], calls
//! its `activate` hook with a [`CapabilityScope`], and remembers exactly which
//! operations it registered. Unloading reverses those registrations.
//!
//! `load`, `unload` and `reload` are serialized by an async mutex, so two
//! plugins never race on the shared [`OperationRegistry`].

use crate::error::{HookError, PluginError, PluginResult};
use crate::manifest::{self, Manifest};
use crate::module::{DeactivateHook, ModuleCache, ModuleLoader};
use crate::operations::OperationRegistry;
use crate::scope::{CapabilityScope, PluginContext};
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle states, used only to log transitions. The manager stores
/// activated plugins and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PluginState {
    Unloaded,
    Loading,
    Activated,
    Unloading,
}

fn transition(plugin_id: &str, from: PluginState, to: PluginState) {
    debug!(plugin_id, ?from, ?to, "Plugin state change");
}

/// What a successful `load` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoadOutcome {
    /// The manifest has no entry point; nothing was loaded or registered.
    CatalogOnly { id: String },
    /// The plugin is active and registered these operations.
    Activated { id: String, operations: Vec<String> },
}

/// Read-only view of a loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub plugin_dir: PathBuf,
    pub operations: Vec<String>,
}

struct LoadedPlugin {
    manifest: Manifest,
    plugin_dir: PathBuf,
    entry_path: PathBuf,
    generation: u64,
    deactivate: Option<DeactivateHook>,
    /// Fully-qualified names registered during `activate`. The only record
    /// used for teardown.
    operations: Vec<String>,
}

#[derive(Default)]
struct PluginSet {
    /// Insertion order.
    loaded: Vec<LoadedPlugin>,
    modules: ModuleCache,
}

impl PluginSet {
    fn position(&self, plugin_id: &str) -> Option<usize> {
        self.loaded.iter().position(|p| p.manifest.id == plugin_id)
    }

    fn position_by_dir(&self, plugin_dir: &Path) -> Option<usize> {
        self.loaded.iter().position(|p| p.plugin_dir == plugin_dir)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct PluginManager {
    registry: Arc<OperationRegistry>,
    loader: Arc<dyn ModuleLoader>,
    disabled: parking_lot::RwLock<HashSet<String>>,
    state: Mutex<PluginSet>,
}

impl PluginManager {
    pub fn new(registry: Arc<OperationRegistry>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            registry,
            loader,
            disabled: parking_lot::RwLock::new(HashSet::new()),
            state: Mutex::new(PluginSet::default()),
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Plugin ids that `load` refuses. Already loaded plugins stay loaded.
    pub fn set_disabled<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.disabled.write() = ids.into_iter().map(Into::into).collect();
    }

    /// Load every plugin directory directly under `root`.
    ///
    /// Failures are logged per plugin and never stop the batch. Returns the
    /// number of plugins activated.
    pub async fn load_all(&self, root: &Path) -> usize {
        info!(root = %root.display(), "Loading plugins");

        let dirs = match manifest::plugin_directories(root).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(root = %root.display(), "Plugin directory is not readable: {e}");
                return 0;
            }
        };

        let mut activated = 0;
        for dir in dirs {
            match self.load(&dir).await {
                Ok(LoadOutcome::Activated { .. }) => activated += 1,
                Ok(LoadOutcome::CatalogOnly { .. }) => {}
                Err(PluginError::Disabled(id)) => {
                    info!(plugin_id = %id, "Skipping disabled plugin");
                }
                Err(e) => {
                    error!(plugin_dir = %dir.display(), "Failed to load plugin: {e}");
                }
            }
        }

        info!(root = %root.display(), activated, "Plugins loaded");
        activated
    }

    /// Load and activate the plugin in `plugin_dir`.
    pub async fn load(&self, plugin_dir: &Path) -> PluginResult<LoadOutcome> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, plugin_dir).await
    }

    async fn load_locked(&self, state: &mut PluginSet, plugin_dir: &Path) -> PluginResult<LoadOutcome> {
        let manifest = manifest::read_manifest(plugin_dir).await?;
        let id = manifest.id.clone();

        if self.disabled.read().contains(&id) {
            return Err(PluginError::Disabled(id));
        }
        if state.position(&id).is_some() {
            return Err(PluginError::DuplicatePluginId(id));
        }

        let Some(main) = manifest.main.clone() else {
            debug!(plugin_id = %id, "No entry point, catalog-only");
            return Ok(LoadOutcome::CatalogOnly { id });
        };

        let entry_path = plugin_dir.join(&main);
        if !tokio::fs::try_exists(&entry_path).await.unwrap_or(false) {
            return Err(PluginError::EntryPointMissing {
                dir: plugin_dir.to_path_buf(),
                entry: main,
            });
        }

        transition(&id, PluginState::Unloaded, PluginState::Loading);

        if let Some(stale) = state.modules.evict(&entry_path) {
            debug!(plugin_id = %id, generation = stale, "Evicted cached module");
        }
        info!(plugin_id = %id, entry = %entry_path.display(), "Loading plugin module");
        let mut module = self.loader.load(&entry_path)?;

        let Some(activate) = module.activate.take() else {
            transition(&id, PluginState::Loading, PluginState::Unloaded);
            return Err(PluginError::InvalidPluginModule {
                entry: entry_path,
                reason: "module does not provide an activate hook".into(),
            });
        };

        let mut scope = CapabilityScope::new(&id, self.registry.clone(), module.keep_alive.clone());
        let outcome = {
            let mut ctx = PluginContext::new(&mut scope, plugin_dir);
            catch_unwind(AssertUnwindSafe(|| activate(&mut ctx)))
        };
        let failure: Option<HookError> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(format!("activate panicked: {}", panic_message(payload)).into()),
        };
        let operations = scope.into_registered();

        if let Some(source) = failure {
            // Roll back whatever activate managed to register.
            for name in &operations {
                self.registry.remove(name);
            }
            transition(&id, PluginState::Loading, PluginState::Unloaded);
            return Err(PluginError::ActivationFailed { plugin_id: id, source });
        }

        let generation = state.modules.insert(entry_path.clone(), module.keep_alive.clone());
        info!(
            plugin_id = %id,
            operations = operations.len(),
            generation,
            "Plugin activated"
        );
        transition(&id, PluginState::Loading, PluginState::Activated);

        state.loaded.push(LoadedPlugin {
            manifest,
            plugin_dir: plugin_dir.to_path_buf(),
            entry_path,
            generation,
            deactivate: module.deactivate.take(),
            operations: operations.clone(),
        });

        Ok(LoadOutcome::Activated { id, operations })
    }

    /// Unload `plugin_id`. Unknown ids are a logged no-op.
    pub async fn unload(&self, plugin_id: &str) {
        if let Err(e) = self.try_unload(plugin_id).await {
            warn!(plugin_id, "{e}");
        }
    }

    /// Unload `plugin_id`, reporting [`PluginError::PluginNotFound`] for
    /// unknown ids.
    pub async fn try_unload(&self, plugin_id: &str) -> PluginResult<()> {
        let mut state = self.state.lock().await;
        let index = state
            .position(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound(plugin_id.to_string()))?;
        self.unload_at(&mut state, index);
        Ok(())
    }

    fn unload_at(&self, state: &mut PluginSet, index: usize) {
        let mut plugin = state.loaded.remove(index);
        let id = plugin.manifest.id.clone();
        transition(&id, PluginState::Activated, PluginState::Unloading);
        info!(plugin_id = %id, "Unloading plugin");

        if let Some(deactivate) = plugin.deactivate.take() {
            match catch_unwind(AssertUnwindSafe(deactivate)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(plugin_id = %id, "Error deactivating plugin: {e}"),
                Err(payload) => error!(
                    plugin_id = %id,
                    "Plugin panicked in deactivate: {}",
                    panic_message(payload)
                ),
            }
        }

        for name in &plugin.operations {
            self.registry.remove(name);
        }

        if state.modules.generation(&plugin.entry_path) == Some(plugin.generation) {
            state.modules.evict(&plugin.entry_path);
        }

        transition(&id, PluginState::Unloading, PluginState::Unloaded);
        info!(plugin_id = %id, removed = plugin.operations.len(), "Plugin unloaded");
    }

    /// Unload every plugin, one at a time, in load order.
    pub async fn unload_all(&self) {
        let mut state = self.state.lock().await;
        info!(count = state.loaded.len(), "Unloading all plugins");
        while !state.loaded.is_empty() {
            self.unload_at(&mut state, 0);
        }
    }

    /// Unload whatever is loaded from `plugin_dir`, then load it again.
    pub async fn reload(&self, plugin_dir: &Path) -> PluginResult<LoadOutcome> {
        let mut state = self.state.lock().await;

        if let Some(index) = state.position_by_dir(plugin_dir) {
            self.unload_at(&mut state, index);
        } else if let Ok(manifest) = manifest::read_manifest(plugin_dir).await
            && let Some(index) = state.position(&manifest.id)
        {
            // The plugin folder was renamed. A folder that still exists keeps
            // its plugin and this load fails as a duplicate.
            let previous_dir = state.loaded[index].plugin_dir.clone();
            if !tokio::fs::try_exists(&previous_dir).await.unwrap_or(true) {
                self.unload_at(&mut state, index);
            }
        }

        self.load_locked(&mut state, plugin_dir).await
    }

    /// Unload the plugin loaded from `plugin_dir`, if any. Returns its id.
    pub async fn unload_dir(&self, plugin_dir: &Path) -> Option<String> {
        let mut state = self.state.lock().await;
        let index = state.position_by_dir(plugin_dir)?;
        let id = state.loaded[index].manifest.id.clone();
        self.unload_at(&mut state, index);
        Some(id)
    }

    /// Snapshot of loaded plugins, in load order.
    pub async fn loaded_plugins(&self) -> Vec<PluginSummary> {
        let state = self.state.lock().await;
        state
            .loaded
            .iter()
            .map(|p| PluginSummary {
                id: p.manifest.id.clone(),
                name: p.manifest.name.clone(),
                description: p.manifest.description.clone(),
                plugin_dir: p.plugin_dir.clone(),
                operations: p.operations.clone(),
            })
            .collect()
    }

    pub async fn is_loaded(&self, plugin_id: &str) -> bool {
        self.state.lock().await.position(plugin_id).is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::PluginModule;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Builds modules from the entry file's lines, re-read on every load:
    ///
    /// - `op <name>`: register `<name>`, returning the entry file contents
    /// - `fail`: activate returns an error after earlier registrations
    /// - `panic`: activate panics after earlier registrations
    /// - `no-activate`: module without an activate hook
    /// - `fail-deactivate`: deactivate returns an error
    #[derive(Default)]
    struct ScriptedLoader {
        loads: AtomicUsize,
        deactivations: Arc<AtomicUsize>,
    }

    impl ModuleLoader for ScriptedLoader {
        fn load(&self, entry: &Path) -> PluginResult<PluginModule> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let script = std::fs::read_to_string(entry).map_err(|source| PluginError::Io {
                path: entry.to_path_buf(),
                source,
            })?;
            let lines: Vec<String> = script.lines().map(|l| l.trim().to_string()).collect();

            if lines.iter().any(|l| l == "no-activate") {
                return Ok(PluginModule::new());
            }

            let fail_deactivate = lines.iter().any(|l| l == "fail-deactivate");
            let deactivations = self.deactivations.clone();
            let version = script.clone();

            Ok(PluginModule::new()
                .with_activate(move |ctx| {
                    for line in &lines {
                        if let Some(name) = line.strip_prefix("op ") {
                            let version = version.clone();
                            ctx.register_operation(name, move |_| {
                                let version = version.clone();
                                async move { Ok(Value::String(version)) }
                            })?;
                        } else if line == "fail" {
                            return Err("scripted failure".into());
                        } else if line == "panic" {
                            panic!("scripted panic");
                        }
                    }
                    Ok(())
                })
                .with_deactivate(move || {
                    deactivations.fetch_add(1, Ordering::SeqCst);
                    if fail_deactivate {
                        Err("scripted deactivate failure".into())
                    } else {
                        Ok(())
                    }
                }))
        }
    }

    struct Fixture {
        tmp: TempDir,
        loader: Arc<ScriptedLoader>,
        manager: PluginManager,
    }

    impl Fixture {
        fn new() -> Self {
            let loader = Arc::new(ScriptedLoader::default());
            let manager = PluginManager::new(Arc::new(OperationRegistry::new()), loader.clone());
            Self {
                tmp: TempDir::new().unwrap(),
                loader,
                manager,
            }
        }

        fn root(&self) -> &Path {
            self.tmp.path()
        }

        /// Write `{root}/{dir}/manifest.json` and, if given, `main.script`.
        fn plugin(&self, dir: &str, id: &str, script: Option<&str>) -> PathBuf {
            let path = self.root().join(dir);
            std::fs::create_dir_all(&path).unwrap();
            let manifest = match script {
                Some(_) => json!({ "id": id, "name": id, "main": "main.script" }),
                None => json!({ "id": id, "name": id }),
            };
            std::fs::write(path.join("manifest.json"), manifest.to_string()).unwrap();
            if let Some(script) = script {
                std::fs::write(path.join("main.script"), script).unwrap();
            }
            path
        }

        fn registry(&self) -> &OperationRegistry {
            self.manager.registry()
        }
    }

    #[tokio::test]
    async fn catalog_only_plugin_registers_nothing() {
        let fx = Fixture::new();
        let dir = fx.plugin("hello", "hello", None);

        let outcome = fx.manager.load(&dir).await.unwrap();
        assert_eq!(outcome, LoadOutcome::CatalogOnly { id: "hello".into() });
        assert!(fx.registry().is_empty());
        assert!(fx.manager.loaded_plugins().await.is_empty());
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn operations_are_namespaced_and_removed_on_unload() {
        let fx = Fixture::new();
        let dir = fx.plugin("hosts", "hosts-view", Some("op x\nop y"));

        let outcome = fx.manager.load(&dir).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Activated {
                id: "hosts-view".into(),
                operations: vec!["plugin:hosts-view:x".into(), "plugin:hosts-view:y".into()],
            }
        );
        assert!(fx.registry().contains("plugin:hosts-view:x"));

        fx.manager.unload("hosts-view").await;
        assert!(!fx.registry().contains("plugin:hosts-view:x"));
        assert!(fx.registry().is_empty());
        assert!(!fx.manager.is_loaded("hosts-view").await);
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_before_loading_code() {
        let fx = Fixture::new();
        let first = fx.plugin("first", "same", Some("op a"));
        let second = fx.plugin("second", "same", Some("op b"));

        fx.manager.load(&first).await.unwrap();
        let err = fx.manager.load(&second).await.unwrap_err();

        assert!(matches!(err, PluginError::DuplicatePluginId(ref id) if id == "same"));
        assert_eq!(fx.registry().names(), vec!["plugin:same:a"]);
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loading_same_directory_twice_is_duplicate() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a"));
        fx.manager.load(&dir).await.unwrap();
        let err = fx.manager.load(&dir).await.unwrap_err();
        assert!(matches!(err, PluginError::DuplicatePluginId(_)));
        assert_eq!(fx.registry().names(), vec!["plugin:p:a"]);
    }

    #[tokio::test]
    async fn unload_unknown_is_noop() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a"));
        fx.manager.load(&dir).await.unwrap();

        fx.manager.unload("never-loaded").await;

        assert_eq!(fx.manager.loaded_plugins().await.len(), 1);
        assert_eq!(fx.registry().names(), vec!["plugin:p:a"]);
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn try_unload_unknown_reports_not_found() {
        let fx = Fixture::new();
        let err = fx.manager.try_unload("ghost").await.unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn hot_reload_reflects_new_code() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op old\nop shared"));
        fx.manager.load(&dir).await.unwrap();
        let before = fx.registry().invoke("plugin:p:shared", Value::Null).await.unwrap();
        assert_eq!(before, json!("op old\nop shared"));

        std::fs::write(dir.join("main.script"), "op new\nop shared").unwrap();
        fx.manager.unload("p").await;
        fx.manager.load(&dir).await.unwrap();

        assert_eq!(fx.registry().names(), vec!["plugin:p:new", "plugin:p:shared"]);
        let after = fx.registry().invoke("plugin:p:shared", Value::Null).await.unwrap();
        assert_eq!(after, json!("op new\nop shared"));
        assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reload_replaces_loaded_plugin() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op one"));
        fx.manager.load(&dir).await.unwrap();

        std::fs::write(dir.join("main.script"), "op two").unwrap();
        let outcome = fx.manager.reload(&dir).await.unwrap();

        assert_eq!(
            outcome,
            LoadOutcome::Activated {
                id: "p".into(),
                operations: vec!["plugin:p:two".into()],
            }
        );
        assert_eq!(fx.registry().names(), vec!["plugin:p:two"]);
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_after_folder_rename() {
        let fx = Fixture::new();
        let old = fx.plugin("old-name", "p", Some("op a"));
        fx.manager.load(&old).await.unwrap();

        let new = fx.root().join("new-name");
        std::fs::rename(&old, &new).unwrap();
        fx.manager.reload(&new).await.unwrap();

        let loaded = fx.manager.loaded_plugins().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].plugin_dir, new);
        assert_eq!(fx.registry().names(), vec!["plugin:p:a"]);
    }

    #[tokio::test]
    async fn reload_of_other_directory_with_same_id_is_duplicate() {
        let fx = Fixture::new();
        let first = fx.plugin("first", "p", Some("op a"));
        let second = fx.plugin("second", "p", Some("op b"));
        fx.manager.load(&first).await.unwrap();

        let err = fx.manager.reload(&second).await.unwrap_err();
        assert!(matches!(err, PluginError::DuplicatePluginId(ref id) if id == "p"));

        let loaded = fx.manager.loaded_plugins().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].plugin_dir, first);
        assert_eq!(fx.registry().names(), vec!["plugin:p:a"]);
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reload_of_unloaded_directory_just_loads() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op one"));
        fx.manager.reload(&dir).await.unwrap();
        assert!(fx.manager.is_loaded("p").await);
    }

    #[tokio::test]
    async fn activation_failure_rolls_back_registrations() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a\nop b\nfail\nop c"));

        let err = fx.manager.load(&dir).await.unwrap_err();
        assert!(matches!(err, PluginError::ActivationFailed { ref plugin_id, .. } if plugin_id == "p"));
        assert!(fx.registry().is_empty());
        assert!(!fx.manager.is_loaded("p").await);

        // Fixing the plugin makes it loadable again.
        std::fs::write(dir.join("main.script"), "op a").unwrap();
        fx.manager.load(&dir).await.unwrap();
        assert_eq!(fx.registry().names(), vec!["plugin:p:a"]);
    }

    #[tokio::test]
    async fn activation_panic_is_caught_and_rolled_back() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a\npanic"));

        let err = fx.manager.load(&dir).await.unwrap_err();
        match err {
            PluginError::ActivationFailed { source, .. } => {
                assert!(source.to_string().contains("scripted panic"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.registry().is_empty());
    }

    #[tokio::test]
    async fn duplicate_operation_inside_activate_fails_activation() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a\nop a"));

        let err = fx.manager.load(&dir).await.unwrap_err();
        match err {
            PluginError::ActivationFailed { source, .. } => {
                assert!(source.to_string().contains("plugin:p:a"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.registry().is_empty());
    }

    #[tokio::test]
    async fn module_without_activate_is_invalid() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("no-activate"));
        let err = fx.manager.load(&dir).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidPluginModule { .. }));
        assert!(!fx.manager.is_loaded("p").await);
    }

    #[tokio::test]
    async fn missing_entry_point() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a"));
        std::fs::remove_file(dir.join("main.script")).unwrap();

        let err = fx.manager.load(&dir).await.unwrap_err();
        assert!(matches!(err, PluginError::EntryPointMissing { ref entry, .. } if entry == "main.script"));
    }

    #[tokio::test]
    async fn missing_manifest_propagates() {
        let fx = Fixture::new();
        let dir = fx.root().join("empty");
        std::fs::create_dir_all(&dir).unwrap();
        let err = fx.manager.load(&dir).await.unwrap_err();
        assert!(matches!(err, PluginError::ManifestMissing { .. }));
    }

    #[tokio::test]
    async fn failing_deactivate_does_not_block_cleanup() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a\nfail-deactivate"));
        fx.manager.load(&dir).await.unwrap();

        fx.manager.unload("p").await;
        assert!(fx.registry().is_empty());
        assert!(!fx.manager.is_loaded("p").await);
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_all_skips_broken_plugins() {
        let fx = Fixture::new();
        fx.plugin("a-good", "good", Some("op x"));
        fx.plugin("b-catalog", "catalog", None);
        fx.plugin("c-broken", "broken", Some("fail"));
        std::fs::create_dir_all(fx.root().join("d-no-manifest")).unwrap();
        let bad = fx.root().join("e-bad-json");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("manifest.json"), "{").unwrap();

        let activated = fx.manager.load_all(fx.root()).await;
        assert_eq!(activated, 1);
        assert_eq!(fx.registry().names(), vec!["plugin:good:x"]);
    }

    #[tokio::test]
    async fn load_all_missing_root_loads_nothing() {
        let fx = Fixture::new();
        assert_eq!(fx.manager.load_all(&fx.root().join("missing")).await, 0);
    }

    #[tokio::test]
    async fn disabled_plugins_are_not_loaded() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a"));
        fx.manager.set_disabled(["p"]);

        let err = fx.manager.load(&dir).await.unwrap_err();
        assert!(matches!(err, PluginError::Disabled(_)));
        assert_eq!(fx.manager.load_all(fx.root()).await, 0);
        assert!(fx.registry().is_empty());
    }

    #[tokio::test]
    async fn loaded_plugins_in_insertion_order() {
        let fx = Fixture::new();
        let z = fx.plugin("z", "zeta", Some("op a"));
        let a = fx.plugin("a", "alpha", Some("op b"));
        fx.manager.load(&z).await.unwrap();
        fx.manager.load(&a).await.unwrap();

        let ids: Vec<String> = fx.manager.loaded_plugins().await.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn unload_all_clears_everything() {
        let fx = Fixture::new();
        fx.plugin("a", "a", Some("op x"));
        fx.plugin("b", "b", Some("op y\nfail-deactivate"));
        assert_eq!(fx.manager.load_all(fx.root()).await, 2);

        fx.manager.unload_all().await;
        assert!(fx.registry().is_empty());
        assert!(fx.manager.loaded_plugins().await.is_empty());
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unload_dir_returns_plugin_id() {
        let fx = Fixture::new();
        let dir = fx.plugin("folder", "the-id", Some("op x"));
        fx.manager.load(&dir).await.unwrap();

        assert_eq!(fx.manager.unload_dir(&dir).await.as_deref(), Some("the-id"));
        assert_eq!(fx.manager.unload_dir(&dir).await, None);
        assert!(fx.registry().is_empty());
    }

    #[tokio::test]
    async fn summary_lists_operations() {
        let fx = Fixture::new();
        let dir = fx.plugin("p", "p", Some("op a"));
        fx.manager.load(&dir).await.unwrap();

        let summary = &fx.manager.loaded_plugins().await[0];
        assert_eq!(summary.name, "p");
        assert_eq!(summary.plugin_dir, dir);
        assert_eq!(summary.operations, vec!["plugin:p:a"]);
    }
}
