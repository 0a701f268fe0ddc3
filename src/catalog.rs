//! Merged listing of builtin and user apps.
//!
//! Recomputed on every query. Builtin apps come first, then user apps; each
//! source is ordered by directory name. A broken app is skipped with a
//! warning and never hides the others.

use crate::manifest::{self, Manifest};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// URL prefix builtin apps are served under.
pub const BUILTIN_URL_PREFIX: &str = "/apps";
const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AppOrigin {
    Builtin,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCatalogEntry {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// `/apps/<dir>/index.html` for builtin apps, `file://` URL for user apps.
    pub url: String,
    pub icon: Option<String>,
    /// Builtin: rooted at `/apps/<dir>/`. User: relative to `source_directory`.
    pub preload: Option<String>,
    pub origin: AppOrigin,
    pub source_directory: PathBuf,
}

impl AppCatalogEntry {
    fn builtin(manifest: Manifest, dir_name: &str, dir: PathBuf) -> Self {
        let base = format!("{BUILTIN_URL_PREFIX}/{dir_name}");
        Self {
            url: format!("{base}/{INDEX_FILE}"),
            preload: manifest
                .preload
                .map(|p| format!("{base}/{}", p.trim_start_matches("./"))),
            id: manifest.id,
            name: manifest.name,
            description: manifest.description,
            icon: manifest.icon,
            origin: AppOrigin::Builtin,
            source_directory: dir,
        }
    }

    fn user(manifest: Manifest, dir: PathBuf) -> Option<Self> {
        let url = match Url::from_file_path(dir.join(INDEX_FILE)) {
            Ok(url) => url.to_string(),
            Err(()) => {
                warn!(path = %dir.display(), "Cannot build a file URL for user app");
                return None;
            }
        };
        Some(Self {
            id: manifest.id,
            name: manifest.name,
            description: manifest.description,
            url,
            icon: manifest.icon,
            preload: manifest.preload,
            origin: AppOrigin::User,
            source_directory: dir,
        })
    }
}

pub struct AppCatalog {
    builtin_dir: PathBuf,
    user_dir: PathBuf,
}

impl AppCatalog {
    pub fn new(builtin_dir: impl Into<PathBuf>, user_dir: impl Into<PathBuf>) -> Self {
        Self {
            builtin_dir: builtin_dir.into(),
            user_dir: user_dir.into(),
        }
    }

    pub fn builtin_dir(&self) -> &Path {
        &self.builtin_dir
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Lazily scan both sources. Each call starts a fresh scan.
    ///
    /// A user app whose id was already emitted by a builtin app is skipped.
    pub fn list_apps(&self) -> impl Stream<Item = AppCatalogEntry> + Send + 'static {
        let builtin_dir = self.builtin_dir.clone();
        let user_dir = self.user_dir.clone();

        async_stream::stream! {
            let mut seen = HashSet::new();

            for (dir, manifest) in scan(&builtin_dir, AppOrigin::Builtin).await {
                let dir_name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                seen.insert(manifest.id.clone());
                yield AppCatalogEntry::builtin(manifest, &dir_name, dir);
            }

            for (dir, manifest) in scan(&user_dir, AppOrigin::User).await {
                if seen.contains(&manifest.id) {
                    warn!(
                        app_id = %manifest.id,
                        path = %dir.display(),
                        "User app id collides with a builtin app, skipping"
                    );
                    continue;
                }
                if let Some(entry) = AppCatalogEntry::user(manifest, dir) {
                    seen.insert(entry.id.clone());
                    yield entry;
                }
            }
        }
    }

    pub async fn collect_apps(&self) -> Vec<AppCatalogEntry> {
        self.list_apps().collect().await
    }
}

/// Valid manifests of one source. Only the builtin source warns about a
/// missing root.
async fn scan(root: &Path, origin: AppOrigin) -> Vec<(PathBuf, Manifest)> {
    let dirs = match manifest::plugin_directories(root).await {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == ErrorKind::NotFound && origin == AppOrigin::User => {
            debug!(path = %root.display(), "User apps directory does not exist");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %root.display(), ?origin, "Failed to read apps directory: {e}");
            return Vec::new();
        }
    };

    let mut apps = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match manifest::read_manifest(&dir).await {
            Ok(manifest) => apps.push((dir, manifest)),
            Err(e) => warn!(path = %dir.display(), "Skipping app: {e}"),
        }
    }
    apps
}
