//! Maps catalog references to addresses the embedded view can load.
//!
//! In development builtin apps are served by the dev server; everything
//! else, and every preload script, is a `file://` URL.

use crate::error::ResolveError;
use crate::manifest::is_path_escape;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

const FILE_SCHEME_PREFIX: &str = "file://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressKind {
    DevServer,
    PackagedFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAddress {
    pub kind: AddressKind,
    pub address: String,
}

/// A preload script location. Always a file address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPreload {
    pub address: String,
    pub path: PathBuf,
    pub exists: bool,
}

impl ResolvedPreload {
    /// For callers that cannot continue without the script.
    pub fn require_exists(self) -> Result<Self, ResolveError> {
        if self.exists {
            Ok(self)
        } else {
            Err(ResolveError::FileNotFound(self.path))
        }
    }
}

/// Where an app's files live.
#[derive(Debug, Clone, Copy)]
pub enum AppSource<'a> {
    /// Bundled with the host, under the assets root.
    Builtin,
    /// Installed by the user, in its own directory.
    User(&'a Path),
}

pub struct AddressResolver {
    assets_root: PathBuf,
    dev_server_url: Option<String>,
}

impl AddressResolver {
    pub fn new(assets_root: impl Into<PathBuf>, dev_server_url: Option<String>) -> Self {
        Self {
            assets_root: assets_root.into(),
            dev_server_url: dev_server_url.filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn assets_root(&self) -> &Path {
        &self.assets_root
    }

    pub fn dev_server_url(&self) -> Option<&str> {
        self.dev_server_url.as_deref()
    }

    pub fn resolve_app_address(
        &self,
        reference: &str,
        source: AppSource<'_>,
    ) -> Result<ResolvedAddress, ResolveError> {
        if reference.starts_with(FILE_SCHEME_PREFIX) {
            return Ok(ResolvedAddress {
                kind: AddressKind::PackagedFile,
                address: reference.to_string(),
            });
        }

        // User apps are never on the dev server.
        if let (Some(base), AppSource::Builtin) = (&self.dev_server_url, source) {
            check_reference(reference)?;
            let address = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                reference.trim_start_matches('/')
            );
            return Ok(ResolvedAddress {
                kind: AddressKind::DevServer,
                address,
            });
        }

        let path = self.local_path(reference, source)?;
        Ok(ResolvedAddress {
            kind: AddressKind::PackagedFile,
            address: file_url(reference, &path)?,
        })
    }

    /// Like [`resolve_app_address`](Self::resolve_app_address), but always a
    /// file address. A missing file is logged and reported, not an error.
    pub async fn resolve_preload_address(
        &self,
        reference: &str,
        source: AppSource<'_>,
    ) -> Result<ResolvedPreload, ResolveError> {
        let path = if reference.starts_with(FILE_SCHEME_PREFIX) {
            Url::parse(reference)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| ResolveError::ResolutionFailed {
                    reference: reference.to_string(),
                    reason: "not a local file URL".into(),
                })?
        } else {
            self.local_path(reference, source)?
        };

        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if exists {
            debug!(path = %path.display(), "Resolved preload script");
        } else {
            warn!(path = %path.display(), "Preload script does not exist");
        }

        Ok(ResolvedPreload {
            address: file_url(reference, &path)?,
            path,
            exists,
        })
    }

    fn local_path(&self, reference: &str, source: AppSource<'_>) -> Result<PathBuf, ResolveError> {
        check_reference(reference)?;

        if let AppSource::User(dir) = source
            && Path::new(reference).is_absolute()
        {
            // Absolute paths are accepted only inside the app's own directory.
            let path = Path::new(reference);
            return match path.strip_prefix(dir) {
                Ok(inner) if !is_path_escape(&inner.to_string_lossy()) => Ok(path.to_path_buf()),
                _ => Err(failed(reference, "path is outside the app directory")),
            };
        }

        let relative = reference.trim_start_matches('/');
        if is_path_escape(relative) {
            return Err(failed(reference, "path escapes its root"));
        }
        let root = match source {
            AppSource::Builtin => &self.assets_root,
            AppSource::User(dir) => dir,
        };
        Ok(root.join(relative))
    }
}

fn failed(reference: &str, reason: &str) -> ResolveError {
    ResolveError::ResolutionFailed {
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

fn check_reference(reference: &str) -> Result<(), ResolveError> {
    if reference.trim().is_empty() {
        return Err(failed(reference, "empty reference"));
    }
    Ok(())
}

fn file_url(reference: &str, path: &Path) -> Result<String, ResolveError> {
    Url::from_file_path(path)
        .map(|u| u.to_string())
        .map_err(|()| failed(reference, "path is not absolute"))
}
