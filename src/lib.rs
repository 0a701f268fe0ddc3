pub mod app_logger;
pub mod builtin;
pub mod catalog;
#[cfg(feature = "desktop")]
mod commands;
pub mod config;
pub mod error;
pub mod icons;
pub mod manifest;
pub mod module;
pub mod operations;
pub mod plugins;
pub mod resolver;
pub mod scope;
pub mod state;
pub mod watcher;

// Plugin-facing API; `export_plugin!` expands to these paths.
pub use error::{HookError, OperationError, PluginError, PluginResult, ResolveError};
pub use module::{ModuleLoader, Plugin, PluginModule};
pub use operations::OperationRegistry;
pub use plugins::{LoadOutcome, PluginManager, PluginSummary};
pub use scope::{CapabilityScope, PluginContext};
pub use state::AppState;

#[cfg(feature = "desktop")]
pub fn run() {
    use std::path::PathBuf;
    use std::sync::Arc;
    use tauri::{Emitter, Manager};

    let config = config::AppConfig::load().with_env_overrides();
    let log_buffer = Arc::new(app_logger::LogRingBuffer::default());
    if let Err(e) = app_logger::init_logging(&config.log_level, log_buffer.clone()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting AppDeck");

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
            if let Some(window) = app.get_webview_window("main") {
                let _ = window.unminimize();
                let _ = window.set_focus();
            }
        }))
        .plugin(tauri_plugin_opener::init())
        .setup(move |app| {
            // Packaged builds ship `apps/` as a resource; dev builds read the
            // source tree.
            let default_assets_root = app
                .path()
                .resource_dir()
                .ok()
                .filter(|dir| dir.join(state::BUILTIN_APPS_DIR_NAME).is_dir())
                .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("public"));

            let state = Arc::new(AppState::with_default_loader(
                config,
                default_assets_root,
                log_buffer,
            ));
            app.manage(state.clone());

            let handle = app.handle().clone();
            let listener: watcher::ChangeListener = Arc::new(move |dirs| {
                let payload = commands::PluginChangedPayload {
                    plugin_dirs: dirs
                        .iter()
                        .map(|d| d.to_string_lossy().into_owned())
                        .collect(),
                };
                if let Err(e) = handle.emit(commands::PLUGIN_CHANGED_EVENT, payload) {
                    tracing::warn!("Failed to emit plugin change: {e}");
                }
            });

            // The watcher task is spawned on the Tauri runtime and outlives
            // this block.
            tauri::async_runtime::block_on(async {
                state.load_plugins().await;
                state.start_watcher(Some(listener));
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_apps_list,
            commands::get_apps_dir_path,
            commands::get_user_apps_dir_path,
            commands::resolve_app_path,
            commands::resolve_preload_path,
            commands::read_icon_as_base64,
            commands::list_loaded_plugins,
            commands::reload_plugin,
            commands::unload_plugin,
            commands::invoke_plugin_operation,
            config::load_config,
            config::save_config,
            app_logger::get_logs,
            app_logger::clear_logs,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|app_handle, event| {
        if let tauri::RunEvent::Exit = event
            && let Some(state) = app_handle.try_state::<Arc<AppState>>()
        {
            tauri::async_runtime::block_on(state.shutdown());
            tracing::info!("Plugins unloaded, exiting");
        }
    });
}
