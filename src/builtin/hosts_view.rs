//! Read-only viewer for the system hosts file.

use crate::error::HookError;
use crate::module::Plugin;
use crate::scope::PluginContext;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MODULE_NAME: &str = "hosts-view";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadHostsResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub path: String,
}

/// Platform location of the hosts file.
pub fn hosts_path() -> PathBuf {
    if cfg!(windows) {
        let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
        PathBuf::from(system_root).join(r"System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Read failures are part of the result, not an operation error, so the
/// view can show them.
pub async fn read_hosts(path: &Path) -> ReadHostsResult {
    let shown = path.to_string_lossy().into_owned();
    match tokio::fs::read_to_string(path).await {
        Ok(content) => ReadHostsResult {
            success: true,
            content: Some(content),
            error: None,
            path: shown,
        },
        Err(e) => {
            warn!(path = %shown, "Failed to read hosts file: {e}");
            ReadHostsResult {
                success: false,
                content: None,
                error: Some(e.to_string()),
                path: shown,
            }
        }
    }
}

#[derive(Default)]
pub struct HostsView {
    hosts_path: Option<PathBuf>,
}

impl HostsView {
    /// Read `path` instead of the system hosts file.
    pub fn with_hosts_path(path: impl Into<PathBuf>) -> Self {
        Self {
            hosts_path: Some(path.into()),
        }
    }
}

impl Plugin for HostsView {
    fn activate(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), HookError> {
        let path = self.hosts_path.clone().unwrap_or_else(hosts_path);

        let read_path = path.clone();
        ctx.register_operation("read-hosts", move |_| {
            let path = read_path.clone();
            async move { serde_json::to_value(read_hosts(&path).await).map_err(HookError::from) }
        })?;

        ctx.register_operation("get-hosts-path", move |_| {
            let path = path.to_string_lossy().into_owned();
            async move { Ok(Value::String(path)) }
        })?;

        info!(plugin_id = ctx.plugin_id(), "Hosts viewer activated");
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), HookError> {
        info!("Hosts viewer deactivated");
        Ok(())
    }
}
