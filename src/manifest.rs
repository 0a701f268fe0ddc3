//! App and plugin manifests.
//!
//! Every app lives in its own directory under an apps root and declares
//! itself in `{dir}/manifest.json`. The same descriptor feeds both the
//! catalog (id, name, icon, preload) and the plugin loader (`main`).

use crate::error::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Manifest as declared in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Host-side entry point, relative to the app directory. Absent for
    /// catalog-only apps.
    #[serde(default, alias = "entryPoint")]
    pub main: Option<String>,
    /// Script injected into the embedded view before the app loads.
    #[serde(default)]
    pub preload: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Validate a parsed manifest for required fields and sanity.
fn validate_manifest(manifest: &Manifest) -> Result<(), String> {
    if manifest.id.is_empty() {
        return Err("id is empty".into());
    }
    // The id becomes a segment of `plugin:<id>:<op>` and a directory name.
    if manifest.id.contains(':') {
        return Err(format!("id \"{}\" must not contain ':'", manifest.id));
    }
    if manifest.id == "." || manifest.id == ".." || manifest.id.contains(['/', '\\']) {
        return Err(format!("id \"{}\" is not a valid directory name", manifest.id));
    }
    if manifest.name.is_empty() {
        return Err("name is empty".into());
    }
    if let Some(main) = &manifest.main {
        if main.is_empty() {
            return Err("main is empty".into());
        }
        if is_path_escape(main) {
            return Err(format!("main \"{main}\" attempts path traversal"));
        }
    }
    if let Some(preload) = &manifest.preload
        && preload.is_empty()
    {
        return Err("preload is empty".into());
    }
    Ok(())
}

/// Returns true if a relative path attempts to escape its root via `..`,
/// absolute components, or a drive prefix.
pub(crate) fn is_path_escape(relative: &str) -> bool {
    let path = Path::new(relative);

    if path.is_absolute() {
        return true;
    }

    path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Parse and validate manifest JSON. `path` is only used for error reporting.
pub fn parse_manifest(path: &Path, data: &str) -> PluginResult<Manifest> {
    let manifest: Manifest =
        serde_json::from_str(data).map_err(|e| PluginError::ManifestMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    validate_manifest(&manifest).map_err(|reason| PluginError::ManifestMalformed {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(manifest)
}

/// Read `{dir}/manifest.json`.
pub async fn read_manifest(dir: &Path) -> PluginResult<Manifest> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let data = match tokio::fs::read_to_string(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PluginError::ManifestMissing {
                dir: dir.to_path_buf(),
            });
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(PluginError::ManifestMalformed {
                path,
                reason: format!("not valid UTF-8: {e}"),
            });
        }
        Err(source) => return Err(PluginError::Io { path, source }),
    };
    parse_manifest(&path, &data)
}

/// Immediate, non-hidden subdirectories of `root`, sorted by name.
pub async fn plugin_directories(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut dirs = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        // Follows symlinks, so linked app folders count as apps.
        match tokio::fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_dir() => dirs.push(entry.path()),
            _ => {}
        }
    }

    dirs.sort();
    Ok(dirs)
}
