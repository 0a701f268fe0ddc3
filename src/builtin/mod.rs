//! Plugins compiled into the host. An app selects one with a `*.linked`
//! entry point naming the module.

pub mod hosts_view;

use crate::module::{LinkedModuleLoader, PluginModule};

/// Every builtin module, by name.
pub fn linked_modules() -> LinkedModuleLoader {
    LinkedModuleLoader::new().with(hosts_view::MODULE_NAME, || {
        PluginModule::from_plugin(hosts_view::HostsView::default())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_hosts_view() {
        assert_eq!(linked_modules().names(), vec!["hosts-view"]);
    }
}
