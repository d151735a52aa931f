use std::collections::BTreeMap;
use std::time::Duration;

use kube::core::DynamicObject;

use crate::{Cluster, Error, Result};

/// Whether the caller may keep working on the object a hook was called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookOutcome {
    #[default]
    Continue,
    /// Skip the remaining work for this object in the current pass.
    Stop,
}

/// Value returned by a pre/post reconcile hook.
#[derive(Debug, Default)]
pub struct ReconcilerHookResult {
    /// Plugin that produced the result, when known
    pub identifier: Option<String>,
    pub outcome: HookOutcome,
    /// Optional requeue hint from the plugin
    pub requeue_after: Option<Duration>,
    pub error: Option<Error>,
}

impl ReconcilerHookResult {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn stop(identifier: impl Into<String>) -> Self {
        Self { identifier: Some(identifier.into()), outcome: HookOutcome::Stop, ..Self::default() }
    }

    pub fn failed(error: Error) -> Self {
        Self { error: Some(error), ..Self::default() }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_requeue(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self
    }

    /// True when the caller must not continue with the object.
    pub fn should_stop(&self) -> bool {
        self.error.is_some() || self.outcome == HookOutcome::Stop
    }

    pub fn into_error(self) -> Option<Error> {
        self.error
    }
}

/// Client for the plugins participating in a reconcile pass.
///
/// Transport is up to the implementation; calls are awaited sequentially by the pass.
#[async_trait::async_trait]
pub trait PluginClient: Send + Sync {
    /// Called before the controller changes `object`.
    async fn pre_reconcile(&self, cluster: &Cluster, object: &DynamicObject) -> ReconcilerHookResult;

    /// Called after the controller finished with `object`, whatever the outcome.
    async fn post_reconcile(&self, cluster: &Cluster, object: &DynamicObject) -> ReconcilerHookResult;

    /// Plugin-owned status values keyed by plugin name.
    async fn set_cluster_status(&self, cluster: &Cluster) -> Result<BTreeMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_and_errors_halt_the_object() {
        assert!(!ReconcilerHookResult::proceed().should_stop());
        assert!(ReconcilerHookResult::stop("barman").should_stop());
        assert!(ReconcilerHookResult::failed(Error::Cancelled).should_stop());
    }

    #[test]
    fn builders_keep_fields() {
        let r = ReconcilerHookResult::proceed().with_identifier("wal").with_requeue(Duration::from_secs(30));
        assert_eq!(r.identifier.as_deref(), Some("wal"));
        assert_eq!(r.requeue_after, Some(Duration::from_secs(30)));
        assert_eq!(r.outcome, HookOutcome::Continue);
        assert!(r.into_error().is_none());
    }
}
