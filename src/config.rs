use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

pub(crate) const APP_CONFIG_FILE: &str = "config.json";
pub(crate) const USER_APPS_DIR_NAME: &str = "apps";

pub const DEV_SERVER_URL_ENV: &str = "APPDECK_DEV_SERVER_URL";
pub const USER_APPS_DIR_ENV: &str = "APPDECK_USER_APPS_DIR";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/appdeck/`
/// - Linux: `~/.config/appdeck/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/appdeck/`
///
/// Falls back to `~/.appdeck/` if the platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("appdeck"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".appdeck")
        })
}

/// Load a JSON file, returning Default if missing or corrupt.
/// Corrupt files are logged so a reset to defaults is never silent.
pub(crate) fn load_json_file<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), "Could not read config: {e}");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            error!(path = %path.display(), "Corrupt config, using defaults: {e}");
            T::default()
        }
    }
}

/// Save a JSON file atomically (temp file + rename).
/// Sets 0600 permissions on Unix.
pub(crate) fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let dir = path
        .parent()
        .ok_or_else(|| format!("Config path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create config directory: {e}"))?;

    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize config: {e}"))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| APP_CONFIG_FILE.to_string());
    let temp = dir.join(format!("{file_name}.tmp.{}", std::process::id()));

    std::fs::write(&temp, &json).map_err(|e| format!("Failed to write temp config: {e}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&temp, perms)
            .map_err(|e| format!("Failed to set config permissions: {e}"))?;
    }

    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        format!("Failed to commit config: {e}")
    })?;

    Ok(())
}

/// Load `{config_dir}/{filename}`.
pub(crate) fn load_json_config<T: DeserializeOwned + Default>(filename: &str) -> T {
    load_json_file(&config_dir().join(filename))
}

/// Save `{config_dir}/{filename}`.
pub(crate) fn save_json_config<T: Serialize>(filename: &str, value: &T) -> Result<(), String> {
    save_json_file(&config_dir().join(filename), value)
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Serve builtin apps from this dev server instead of packaged files.
    #[serde(default)]
    pub dev_server_url: Option<String>,
    /// Directory containing the builtin `apps/` folder. Defaults to the
    /// bundled resources.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
    /// Defaults to `{config_dir}/apps`.
    #[serde(default)]
    pub user_apps_dir: Option<PathBuf>,
    #[serde(default)]
    pub disabled_plugin_ids: Vec<String>,
    /// Reload user plugins when their files change.
    #[serde(default = "default_true")]
    pub watch_plugins: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dev_server_url: None,
            assets_dir: None,
            user_apps_dir: None,
            disabled_plugin_ids: Vec::new(),
            watch_plugins: true,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Self {
        load_json_config(APP_CONFIG_FILE)
    }

    pub fn save(&self) -> Result<(), String> {
        save_json_config(APP_CONFIG_FILE, self)
    }

    /// Environment variables win over the file. Empty values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env(DEV_SERVER_URL_ENV) {
            self.dev_server_url = Some(url);
        }
        if let Some(dir) = non_empty_env(USER_APPS_DIR_ENV) {
            self.user_apps_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn resolved_user_apps_dir(&self) -> PathBuf {
        self.user_apps_dir
            .clone()
            .unwrap_or_else(|| config_dir().join(USER_APPS_DIR_NAME))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tauri commands
// ---------------------------------------------------------------------------

/// The config as stored on disk, without environment overrides.
#[cfg(feature = "desktop")]
#[tauri::command]
pub(crate) fn load_config() -> AppConfig {
    AppConfig::load()
}

/// Persist the config. Disabled plugin ids apply to the next load; paths and
/// the dev server apply after restart.
#[cfg(feature = "desktop")]
#[tauri::command]
pub(crate) fn save_config(
    state: tauri::State<'_, std::sync::Arc<crate::state::AppState>>,
    config: AppConfig,
) -> Result<(), String> {
    config.save()?;
    state.plugins.set_disabled(config.disabled_plugin_ids.iter().cloned());
    state.config.write().disabled_plugin_ids = config.disabled_plugin_ids;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
