use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use kube::core::DynamicObject;
use pgherd_core::{Cluster, Error, PluginClient, ReconcilerHookResult, Result};

/// One hook invocation seen by [`StaticPluginClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    /// "pre" or "post"
    pub hook: &'static str,
    pub kind: String,
    pub name: String,
}

/// In-process plugin client answering from fixed data.
///
/// Backs the CLI's `--statuses` file and the tests; records every hook call.
#[derive(Debug, Default)]
pub struct StaticPluginClient {
    name: String,
    statuses: BTreeMap<String, String>,
    stop_on: BTreeSet<(String, String)>,
    hook_error: Option<(&'static str, String)>,
    hook_requeue: BTreeMap<&'static str, Duration>,
    status_error: Option<String>,
    calls: Mutex<Vec<HookCall>>,
}

impl StaticPluginClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_status(mut self, plugin: impl Into<String>, status: impl Into<String>) -> Self {
        self.statuses.insert(plugin.into(), status.into());
        self
    }

    pub fn with_statuses(mut self, statuses: BTreeMap<String, String>) -> Self {
        self.statuses.extend(statuses);
        self
    }

    /// Answer `Stop` from the pre-reconcile hook for this object.
    pub fn stop_on(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.stop_on.insert((kind.into(), name.into()));
        self
    }

    /// Fail the "pre" or "post" hook with `message`.
    pub fn failing_hooks(mut self, hook: &'static str, message: impl Into<String>) -> Self {
        self.hook_error = Some((hook, message.into()));
        self
    }

    /// Attach a requeue hint to every answer of the "pre" or "post" hook.
    pub fn requeue_on(mut self, hook: &'static str, after: Duration) -> Self {
        self.hook_requeue.insert(hook, after);
        self
    }

    pub fn failing_status(mut self, message: impl Into<String>) -> Self {
        self.status_error = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, hook: &'static str, object: &DynamicObject) -> (String, String) {
        let kind = object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let name = object.metadata.name.clone().unwrap_or_default();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HookCall { hook, kind: kind.clone(), name: name.clone() });
        (kind, name)
    }

    fn hook_failure(&self, hook: &'static str) -> Option<ReconcilerHookResult> {
        match &self.hook_error {
            Some((h, msg)) if *h == hook => {
                Some(ReconcilerHookResult::failed(Error::plugin(&self.name, msg.clone())).with_identifier(&self.name))
            }
            _ => None,
        }
    }

    fn answer(&self, hook: &'static str, result: ReconcilerHookResult) -> ReconcilerHookResult {
        match self.hook_requeue.get(hook) {
            Some(after) => result.with_requeue(*after),
            None => result,
        }
    }
}

#[async_trait::async_trait]
impl PluginClient for StaticPluginClient {
    async fn pre_reconcile(&self, _cluster: &Cluster, object: &DynamicObject) -> ReconcilerHookResult {
        let key = self.record("pre", object);
        if let Some(failed) = self.hook_failure("pre") {
            return failed;
        }
        if self.stop_on.contains(&key) {
            return self.answer("pre", ReconcilerHookResult::stop(&self.name));
        }
        self.answer("pre", ReconcilerHookResult::proceed().with_identifier(&self.name))
    }

    async fn post_reconcile(&self, _cluster: &Cluster, object: &DynamicObject) -> ReconcilerHookResult {
        self.record("post", object);
        self.hook_failure("post")
            .unwrap_or_else(|| self.answer("post", ReconcilerHookResult::proceed().with_identifier(&self.name)))
    }

    async fn set_cluster_status(&self, _cluster: &Cluster) -> Result<BTreeMap<String, String>> {
        if let Some(msg) = &self.status_error {
            return Err(Error::plugin(&self.name, msg.clone()));
        }
        Ok(self.statuses.clone())
    }
}
