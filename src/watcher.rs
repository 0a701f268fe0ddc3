//! Hot reload of user plugins when their files change.

use crate::error::PluginError;
use crate::manifest::MANIFEST_FILE_NAME;
use crate::plugins::{LoadOutcome, PluginManager};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, Debouncer, new_debouncer};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Editors and build tools write several files per save.
const DEBOUNCE_MS: u64 = 500;

/// Plugin-private runtime data. Writes here never trigger a reload.
const DATA_DIR_NAME: &str = "data";

/// Called with the plugin directories that were reloaded or unloaded.
pub type ChangeListener = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

/// Map a changed path to the plugin directory it belongs to.
///
/// That is the first component under `root`. Hidden entries and anything
/// under a plugin's `data/` directory are ignored.
pub fn plugin_dir_for_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();

    let Some(Component::Normal(first)) = components.next() else {
        return None;
    };

    for component in relative.components() {
        if let Component::Normal(name) = component
            && name.to_string_lossy().starts_with('.')
        {
            return None;
        }
    }

    if let Some(Component::Normal(second)) = components.next()
        && second == DATA_DIR_NAME
    {
        return None;
    }

    Some(root.join(first))
}

/// Reload every changed plugin directory, or unload it if its manifest is gone.
pub async fn apply_changes(manager: &PluginManager, dirs: &[PathBuf]) {
    for dir in dirs {
        if !tokio::fs::try_exists(dir.join(MANIFEST_FILE_NAME)).await.unwrap_or(false) {
            if let Some(id) = manager.unload_dir(dir).await {
                info!(plugin_id = %id, path = %dir.display(), "Plugin removed");
            }
            continue;
        }

        match manager.reload(dir).await {
            Ok(LoadOutcome::Activated { id, operations }) => {
                info!(plugin_id = %id, operations = operations.len(), "Plugin reloaded");
            }
            Ok(LoadOutcome::CatalogOnly { id }) => {
                debug!(plugin_id = %id, "App changed (no plugin code)");
            }
            Err(PluginError::Disabled(id)) => {
                debug!(plugin_id = %id, "Changed plugin is disabled");
            }
            Err(e) => error!(path = %dir.display(), "Failed to reload plugin: {e}"),
        }
    }
}

/// Watches a plugin root and reloads changed plugins. Dropping it stops both
/// the file watcher and the reload task.
pub struct PluginWatcher {
    root: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl PluginWatcher {
    /// Start watching `root`, creating it if needed. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        root: &Path,
        manager: Arc<PluginManager>,
        listener: Option<ChangeListener>,
    ) -> Result<Self, String> {
        std::fs::create_dir_all(root)
            .map_err(|e| format!("Failed to create {}: {e}", root.display()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let watch_root = root.to_path_buf();

        let mut debouncer = new_debouncer(
            Duration::from_millis(DEBOUNCE_MS),
            move |events: Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Plugin watcher error: {e}");
                        return;
                    }
                };

                let dirs: BTreeSet<PathBuf> = events
                    .iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .filter_map(|e| plugin_dir_for_path(&watch_root, &e.path))
                    .collect();

                if !dirs.is_empty() {
                    let _ = tx.send(dirs.into_iter().collect());
                }
            },
        )
        .map_err(|e| format!("Failed to create plugin watcher: {e}"))?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| format!("Failed to watch {}: {e}", root.display()))?;

        let task = tokio::spawn(async move {
            while let Some(dirs) = rx.recv().await {
                apply_changes(&manager, &dirs).await;
                if let Some(listener) = &listener {
                    listener(dirs);
                }
            }
        });

        info!(root = %root.display(), "Watching plugins");
        Ok(Self {
            root: root.to_path_buf(),
            _debouncer: debouncer,
            task,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{LinkedModuleLoader, PluginModule};
    use crate::operations::OperationRegistry;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn maps_paths_to_first_component() {
        let root = Path::new("/apps");
        assert_eq!(
            plugin_dir_for_path(root, Path::new("/apps/hosts-view/main.linked")),
            Some(PathBuf::from("/apps/hosts-view"))
        );
        assert_eq!(
            plugin_dir_for_path(root, Path::new("/apps/hosts-view/lib/deep/file.so")),
            Some(PathBuf::from("/apps/hosts-view"))
        );
        assert_eq!(
            plugin_dir_for_path(root, Path::new("/apps/new-plugin")),
            Some(PathBuf::from("/apps/new-plugin"))
        );
    }

    #[test]
    fn ignores_noise() {
        let root = Path::new("/apps");
        assert_eq!(plugin_dir_for_path(root, Path::new("/apps")), None);
        assert_eq!(plugin_dir_for_path(root, Path::new("/elsewhere/x/y")), None);
        assert_eq!(plugin_dir_for_path(root, Path::new("/apps/.DS_Store")), None);
        assert_eq!(plugin_dir_for_path(root, Path::new("/apps/notes/.main.swp")), None);
        assert_eq!(plugin_dir_for_path(root, Path::new("/apps/notes/data/state.json")), None);
    }

    fn manager() -> Arc<PluginManager> {
        let loader = LinkedModuleLoader::new().with("pinger", || {
            PluginModule::new().with_activate(|ctx| {
                ctx.register_operation("ping", |_| async { Ok(json!("pong")) })?;
                Ok(())
            })
        });
        Arc::new(PluginManager::new(Arc::new(OperationRegistry::new()), Arc::new(loader)))
    }

    fn write_plugin(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE_NAME),
            r#"{"id":"pinger","name":"Pinger","main":"main.linked"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("main.linked"), "pinger").unwrap();
    }

    #[tokio::test]
    async fn apply_changes_loads_reloads_and_removes() {
        let tmp = TempDir::new().unwrap();
        let manager = manager();
        let dir = tmp.path().join("pinger");

        write_plugin(&dir);
        apply_changes(&manager, std::slice::from_ref(&dir)).await;
        assert!(manager.registry().contains("plugin:pinger:ping"));

        // Reapplying reloads in place.
        apply_changes(&manager, std::slice::from_ref(&dir)).await;
        assert_eq!(manager.loaded_plugins().await.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
        apply_changes(&manager, std::slice::from_ref(&dir)).await;
        assert!(manager.registry().is_empty());
        assert!(manager.loaded_plugins().await.is_empty());
    }

    #[tokio::test]
    async fn user_change_does_not_replace_builtin_with_same_id() {
        let tmp = TempDir::new().unwrap();
        let manager = manager();
        let builtin = tmp.path().join("builtin").join("pinger");
        let user = tmp.path().join("user").join("my-pinger");
        write_plugin(&builtin);
        write_plugin(&user);

        manager.load(&builtin).await.unwrap();
        apply_changes(&manager, std::slice::from_ref(&user)).await;

        let loaded = manager.loaded_plugins().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].plugin_dir, builtin);
        assert!(manager.registry().contains("plugin:pinger:ping"));
    }

    #[tokio::test]
    async fn start_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("apps");
        let watcher = PluginWatcher::start(&root, manager(), None).unwrap();
        assert!(root.is_dir());
        assert_eq!(watcher.root(), root);
    }
}
