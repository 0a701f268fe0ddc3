//! Host-wide table of remote-invocable operations.
//!
//! The embedded views reach host-side logic by fully-qualified name
//! (`plugin:<id>:<op>`). Only a [`CapabilityScope`](crate::scope::CapabilityScope)
//! inserts entries and only the plugin manager removes them; everyone else
//! can look up and invoke.

use crate::error::{HookError, OperationError, PluginError, PluginResult};
use crate::module::KeepAlive;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a single operation call.
pub type OperationResult = Result<Value, HookError>;

/// A registered operation handler.
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, OperationResult> + Send + Sync>;

struct Registration {
    handler: Handler,
    owner: String,
    // Declared after `handler` so the handler is dropped while the code
    // behind it is still mapped.
    keep_alive: Option<KeepAlive>,
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: DashMap<String, Registration>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. Never overwrites an existing entry.
    pub(crate) fn insert(
        &self,
        name: String,
        owner: &str,
        handler: Handler,
        keep_alive: Option<KeepAlive>,
    ) -> PluginResult<()> {
        match self.operations.entry(name) {
            Entry::Occupied(existing) => Err(PluginError::DuplicateOperation(existing.key().clone())),
            Entry::Vacant(slot) => {
                debug!(operation = %slot.key(), plugin_id = owner, "Registered operation");
                slot.insert(Registration {
                    handler,
                    owner: owner.to_string(),
                    keep_alive,
                });
                Ok(())
            }
        }
    }

    /// Remove `name`. Returns whether it was present; removing twice is fine.
    pub(crate) fn remove(&self, name: &str) -> bool {
        let removed = self.operations.remove(name).is_some();
        if removed {
            debug!(operation = name, "Removed operation");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Names registered by one plugin, sorted.
    pub fn names_for_plugin(&self, plugin_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .operations
            .iter()
            .filter(|e| e.value().owner == plugin_id)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Call the operation registered under `name`.
    ///
    /// The handler is cloned out of the table before it runs, so no lock is
    /// held while the call is in flight and other operations (or the same one)
    /// can be invoked concurrently.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, OperationError> {
        let (handler, keep_alive) = {
            let entry = self
                .operations
                .get(name)
                .ok_or_else(|| OperationError::NotFound(name.to_string()))?;
            (entry.handler.clone(), entry.keep_alive.clone())
        };

        let outcome = handler(args).await;
        drop(handler);
        drop(keep_alive);

        outcome.map_err(|e| OperationError::Failed {
            operation: name.to_string(),
            message: e.to_string(),
        })
    }
}
