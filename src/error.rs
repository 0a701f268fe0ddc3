//! Error types for plugin loading, address resolution and operation dispatch.

use std::path::PathBuf;

/// Error type plugin code returns from hooks and operation handlers.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from manifest reading and the plugin lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No `manifest.json` in the plugin directory.
    #[error("manifest.json not found in {}", .dir.display())]
    ManifestMissing { dir: PathBuf },

    /// The manifest exists but is not valid JSON of the expected shape.
    #[error("malformed manifest {}: {reason}", .path.display())]
    ManifestMalformed { path: PathBuf, reason: String },

    /// The manifest declares an entry point that does not exist.
    #[error("entry point {entry} not found in {}", .dir.display())]
    EntryPointMissing { dir: PathBuf, entry: String },

    /// The entry point could not be turned into a usable plugin module.
    #[error("{} is not a valid plugin module: {reason}", .entry.display())]
    InvalidPluginModule { entry: PathBuf, reason: String },

    /// The plugin's `activate` hook returned an error or panicked.
    #[error("plugin {plugin_id} failed to activate: {source}")]
    ActivationFailed {
        plugin_id: String,
        #[source]
        source: HookError,
    },

    /// A plugin with this id is already loaded.
    #[error("plugin {0} is already loaded")]
    DuplicatePluginId(String),

    /// An operation with this fully-qualified name is already registered.
    #[error("operation {0} is already registered")]
    DuplicateOperation(String),

    /// A plugin tried to register an operation under an unusable name.
    #[error("invalid operation name {name:?} for plugin {plugin_id}")]
    InvalidOperationName { plugin_id: String, name: String },

    /// No plugin with this id is loaded.
    #[error("plugin {0} is not loaded")]
    PluginNotFound(String),

    /// The plugin id is listed in `disabled_plugin_ids`.
    #[error("plugin {0} is disabled")]
    Disabled(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Errors from mapping an app reference to a loadable address.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot resolve {reference:?}: {reason}")]
    ResolutionFailed { reference: String, reason: String },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Errors from invoking a registered operation.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("no handler registered for {0}")]
    NotFound(String),

    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn activation_failure_keeps_hook_error_as_source() {
        let hook: HookError = "boom".into();
        let err = PluginError::ActivationFailed {
            plugin_id: "hosts-view".into(),
            source: hook,
        };
        assert_eq!(err.to_string(), "plugin hosts-view failed to activate: boom");
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("boom"));
    }

    #[test]
    fn messages_name_the_offending_path() {
        let err = PluginError::EntryPointMissing {
            dir: PathBuf::from("/apps/demo"),
            entry: "main.linked".into(),
        };
        assert_eq!(err.to_string(), "entry point main.linked not found in /apps/demo");

        let err = ResolveError::FileNotFound(PathBuf::from("/apps/demo/preload.js"));
        assert_eq!(err.to_string(), "file not found: /apps/demo/preload.js");
    }
}
