//! pgherd plugin hooks.
//!
//! Two halves of the plugin protocol: hooks around each sub-object the
//! controller touches ([`hooks`]), and plugin-owned status merged into the
//! cluster with a fixed requeue ([`aggregate`]). Both resolve the plugin
//! client from the [`ReconcileSession`](pgherd_core::ReconcileSession).

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod hooks;
mod static_client;

pub use aggregate::{apply_plugin_status, merge_plugin_statuses, PLUGIN_STATUS_REQUEUE};
pub use hooks::{post_reconcile_hooks, pre_reconcile_hooks, reconcile_with_hooks, ObjectReconcile};
pub use static_client::{HookCall, StaticPluginClient};
