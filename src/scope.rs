//! Per-plugin capability scope and activation context.
//!
//! A plugin never touches the [`OperationRegistry`] directly. During
//! `activate` it receives a [`PluginContext`] whose scope prefixes every name
//! with `plugin:<id>:` and remembers what it registered, so the manager can
//! undo exactly those registrations later.

use crate::error::{PluginError, PluginResult};
use crate::module::KeepAlive;
use crate::operations::{Handler, OperationRegistry, OperationResult};
use futures_util::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Namespace prefix shared by every plugin operation.
pub const OPERATION_NAMESPACE: &str = "plugin";

/// Fully qualified operation name: `plugin:{plugin_id}:{operation}`.
pub fn qualified_operation_name(plugin_id: &str, operation: &str) -> String {
    format!("{OPERATION_NAMESPACE}:{plugin_id}:{operation}")
}

/// Namespaced registration surface bound to one plugin.
pub struct CapabilityScope {
    plugin_id: String,
    registry: Arc<OperationRegistry>,
    keep_alive: Option<KeepAlive>,
    registered: Vec<String>,
}

impl CapabilityScope {
    pub(crate) fn new(
        plugin_id: impl Into<String>,
        registry: Arc<OperationRegistry>,
        keep_alive: Option<KeepAlive>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            registry,
            keep_alive,
            registered: Vec::new(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Register `handler` as `plugin:<id>:<name>`.
    ///
    /// Fails with [`PluginError::DuplicateOperation`] if that name is taken.
    pub fn register_operation<F, Fut>(&mut self, name: &str, handler: F) -> PluginResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        if name.trim().is_empty() {
            return Err(PluginError::InvalidOperationName {
                plugin_id: self.plugin_id.clone(),
                name: name.to_string(),
            });
        }

        let qualified = qualified_operation_name(&self.plugin_id, name);
        let handler: Handler = Arc::new(move |args| handler(args).boxed());
        self.registry.insert(
            qualified.clone(),
            &self.plugin_id,
            handler,
            self.keep_alive.clone(),
        )?;
        self.registered.push(qualified);
        Ok(())
    }

    /// Names registered through this scope, in registration order.
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    pub(crate) fn into_registered(self) -> Vec<String> {
        self.registered
    }
}

/// What a plugin's `activate` hook receives.
pub struct PluginContext<'a> {
    scope: &'a mut CapabilityScope,
    plugin_dir: &'a Path,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(scope: &'a mut CapabilityScope, plugin_dir: &'a Path) -> Self {
        Self { scope, plugin_dir }
    }

    pub fn plugin_id(&self) -> &str {
        self.scope.plugin_id()
    }

    /// The plugin's own directory, for resolving bundled resources.
    pub fn plugin_dir(&self) -> &Path {
        self.plugin_dir
    }

    pub fn scope(&mut self) -> &mut CapabilityScope {
        self.scope
    }

    /// Shorthand for `ctx.scope().register_operation(..)`.
    pub fn register_operation<F, Fut>(&mut self, name: &str, handler: F) -> PluginResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.scope.register_operation(name, handler)
    }
}
