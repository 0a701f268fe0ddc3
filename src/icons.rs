//! App icons as `data:` URIs, so the UI can show icons of user apps that
//! live outside the served assets.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};

const DEFAULT_ICON_MIME: &str = "image/png";

/// Read `path` and encode it as `data:<mime>;base64,<payload>`.
///
/// The canonical path must lie under one of `allowed_roots`.
pub async fn read_icon_as_data_uri(path: &Path, allowed_roots: &[PathBuf]) -> Result<String, String> {
    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| format!("Failed to resolve icon {}: {e}", path.display()))?;

    let mut allowed = false;
    for root in allowed_roots {
        if let Ok(root) = tokio::fs::canonicalize(root).await
            && canonical.starts_with(&root)
        {
            allowed = true;
            break;
        }
    }
    if !allowed {
        return Err(format!("Icon path is outside the apps directories: {}", path.display()));
    }

    let bytes = tokio::fs::read(&canonical)
        .await
        .map_err(|e| format!("Failed to read icon {}: {e}", path.display()))?;

    let mime = mime_guess::from_path(&canonical)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_ICON_MIME.to_string());

    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}
