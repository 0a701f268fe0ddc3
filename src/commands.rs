//! Bridge commands the shell UI and embedded views call through `invoke`.
//!
//! Errors cross the boundary as strings.

use crate::catalog::AppCatalogEntry;
use crate::plugins::{LoadOutcome, PluginSummary};
use crate::resolver::{AppSource, ResolvedPreload};
use crate::state::AppState;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tauri::State;
use tracing::warn;

/// Event emitted after the watcher reloaded or removed plugins.
pub(crate) const PLUGIN_CHANGED_EVENT: &str = "plugin-changed";

#[derive(Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PluginChangedPayload {
    pub plugin_dirs: Vec<String>,
}

fn source_for(source_directory: Option<&str>) -> AppSource<'_> {
    match source_directory {
        Some(dir) => AppSource::User(Path::new(dir)),
        None => AppSource::Builtin,
    }
}

/// `dir` must be an app directory under one of the app roots.
fn checked_app_dir(state: &AppState, dir: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(dir);
    let inside = state
        .app_roots()
        .iter()
        .any(|root| path.parent() == Some(root.as_path()));
    if inside {
        Ok(path)
    } else {
        Err(format!("Not an app directory: {dir}"))
    }
}

#[tauri::command]
pub(crate) async fn get_apps_list(state: State<'_, Arc<AppState>>) -> Result<Vec<AppCatalogEntry>, String> {
    Ok(state.catalog.collect_apps().await)
}

#[tauri::command]
pub(crate) fn get_apps_dir_path(state: State<'_, Arc<AppState>>) -> String {
    state.builtin_apps_dir().to_string_lossy().into_owned()
}

#[tauri::command]
pub(crate) fn get_user_apps_dir_path(state: State<'_, Arc<AppState>>) -> String {
    state.user_apps_dir().to_string_lossy().into_owned()
}

/// Address for the embedded view. `source_directory` is set for user apps.
#[tauri::command]
pub(crate) fn resolve_app_path(
    state: State<'_, Arc<AppState>>,
    url: String,
    source_directory: Option<String>,
) -> Result<String, String> {
    state
        .resolver
        .resolve_app_address(&url, source_for(source_directory.as_deref()))
        .map(|resolved| resolved.address)
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub(crate) async fn resolve_preload_path(
    state: State<'_, Arc<AppState>>,
    preload_path: String,
    source_directory: Option<String>,
) -> Result<ResolvedPreload, String> {
    state
        .resolver
        .resolve_preload_address(&preload_path, source_for(source_directory.as_deref()))
        .await
        .map_err(|e| e.to_string())
}

/// `None` when the icon cannot be read; the UI falls back to a placeholder.
#[tauri::command]
pub(crate) async fn read_icon_as_base64(
    state: State<'_, Arc<AppState>>,
    icon_path: String,
) -> Result<Option<String>, String> {
    match crate::icons::read_icon_as_data_uri(Path::new(&icon_path), &state.app_roots()).await {
        Ok(uri) => Ok(Some(uri)),
        Err(e) => {
            warn!(path = %icon_path, "{e}");
            Ok(None)
        }
    }
}

#[tauri::command]
pub(crate) async fn list_loaded_plugins(
    state: State<'_, Arc<AppState>>,
) -> Result<Vec<PluginSummary>, String> {
    Ok(state.plugins.loaded_plugins().await)
}

#[tauri::command]
pub(crate) async fn reload_plugin(
    state: State<'_, Arc<AppState>>,
    plugin_dir: String,
) -> Result<LoadOutcome, String> {
    let dir = checked_app_dir(&state, &plugin_dir)?;
    state.plugins.reload(&dir).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub(crate) async fn unload_plugin(
    state: State<'_, Arc<AppState>>,
    plugin_id: String,
) -> Result<(), String> {
    state.plugins.try_unload(&plugin_id).await.map_err(|e| e.to_string())
}

/// Call `plugin:<id>:<op>` with optional JSON arguments.
#[tauri::command]
pub(crate) async fn invoke_plugin_operation(
    state: State<'_, Arc<AppState>>,
    name: String,
    args: Option<Value>,
) -> Result<Value, String> {
    state
        .registry
        .invoke(&name, args.unwrap_or(Value::Null))
        .await
        .map_err(|e| e.to_string())
}
