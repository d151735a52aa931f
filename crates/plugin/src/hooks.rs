//! Pre/post reconcile hooks around a single managed sub-object.
//!
//! The dispatcher only resolves the plugin client from the session and
//! forwards the call; outcomes and errors go back to the caller unchanged.

use std::future::Future;
use std::time::Duration;

use kube::{core::DynamicObject, Resource, ResourceExt};
use metrics::counter;
use pgherd_core::{cluster_key, Cluster, ReconcileSession, ReconcilerHookResult, Result};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Pre,
    Post,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::Pre => "pre-reconcile",
            Hook::Post => "post-reconcile",
        }
    }
}

fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

async fn dispatch<K>(hook: Hook, session: &ReconcileSession, cluster: &Cluster, object: &K) -> ReconcilerHookResult
where
    K: Resource + Serialize,
{
    let name = object.name_any();
    let client = match session.plugin_client() {
        Ok(c) => c,
        Err(e) => return ReconcilerHookResult::failed(e),
    };
    let dynamic = match to_dynamic(object) {
        Ok(d) => d,
        Err(e) => {
            warn!(hook = hook.as_str(), name = %name, error = %e, "cannot hand object to plugins");
            return ReconcilerHookResult::failed(e);
        }
    };
    let kind = dynamic.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();

    let call = async {
        Ok(match hook {
            Hook::Pre => client.pre_reconcile(cluster, &dynamic).await,
            Hook::Post => client.post_reconcile(cluster, &dynamic).await,
        })
    };
    let result = session.guard(call).await.unwrap_or_else(ReconcilerHookResult::failed);

    counter!("plugin_hook_total", 1u64, "hook" => hook.as_str());
    match &result.error {
        Some(e) => {
            counter!("plugin_hook_err_total", 1u64, "hook" => hook.as_str());
            warn!(cluster = %cluster_key(cluster), hook = hook.as_str(), kind = %kind, name = %name,
                plugin = ?result.identifier, error = %e, "plugin hook failed");
        }
        None => debug!(cluster = %cluster_key(cluster), hook = hook.as_str(), kind = %kind, name = %name,
            plugin = ?result.identifier, outcome = ?result.outcome, "plugin hook done"),
    }
    result
}

/// Run the plugins' pre-reconcile hook for `object`.
pub async fn pre_reconcile_hooks<K>(session: &ReconcileSession, cluster: &Cluster, object: &K) -> ReconcilerHookResult
where
    K: Resource + Serialize,
{
    dispatch(Hook::Pre, session, cluster, object).await
}

/// Run the plugins' post-reconcile hook for `object`.
pub async fn post_reconcile_hooks<K>(session: &ReconcileSession, cluster: &Cluster, object: &K) -> ReconcilerHookResult
where
    K: Resource + Serialize,
{
    dispatch(Hook::Post, session, cluster, object).await
}

/// What happened to one object wrapped by [`reconcile_with_hooks`].
#[derive(Debug)]
pub enum ObjectReconcile<T> {
    /// The pre-hook failed or asked to stop; the work never ran.
    Skipped(ReconcilerHookResult),
    /// The work ran and the post-hook was called afterwards.
    Completed { pre: ReconcilerHookResult, output: Result<T>, post: ReconcilerHookResult },
}

impl<T> ObjectReconcile<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// Shortest requeue hint among the hooks that ran.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Skipped(pre) => pre.requeue_after,
            Self::Completed { pre, post, .. } => match (pre.requeue_after, post.requeue_after) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    /// Collapse into the first error seen; `Ok(None)` when a hook stopped the object.
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Self::Skipped(pre) => match pre.into_error() {
                Some(e) => Err(e),
                None => Ok(None),
            },
            Self::Completed { output, post, .. } => {
                let out = output?;
                match post.into_error() {
                    Some(e) => Err(e),
                    None => Ok(Some(out)),
                }
            }
        }
    }
}

/// Run `work` for `object` between the pre and post hooks.
///
/// `work` is skipped when the pre-hook fails or stops. Otherwise the post-hook
/// runs after `work`, whether it succeeded or not.
pub async fn reconcile_with_hooks<K, T, F, Fut>(
    session: &ReconcileSession,
    cluster: &Cluster,
    object: &K,
    work: F,
) -> ObjectReconcile<T>
where
    K: Resource + Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let pre = pre_reconcile_hooks(session, cluster, object).await;
    if pre.should_stop() {
        debug!(name = %object.name_any(), plugin = ?pre.identifier, "skipping object after pre-reconcile hook");
        return ObjectReconcile::Skipped(pre);
    }
    let output = work().await;
    if let Err(e) = &output {
        debug!(name = %object.name_any(), error = %e, "object work failed; running post-reconcile hook");
    }
    let post = post_reconcile_hooks(session, cluster, object).await;
    ObjectReconcile::Completed { pre, output, post }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticPluginClient;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use pgherd_core::{ClusterSpec, Error, HookOutcome};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn cluster() -> Cluster {
        let mut c = Cluster::new("pg", ClusterSpec { instances: 1, ..Default::default() });
        c.metadata.namespace = Some("db".into());
        c
    }

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), namespace: Some("db".into()), ..Default::default() },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn hooks_without_client_fail_loudly() {
        let r = pre_reconcile_hooks(&ReconcileSession::new(), &cluster(), &config_map("a")).await;
        assert!(matches!(r.error, Some(Error::MissingPluginClient)));
        assert!(r.should_stop());
    }

    #[tokio::test]
    async fn hooks_forward_the_object() {
        let plugins = Arc::new(StaticPluginClient::new("barman"));
        let session = ReconcileSession::new().with_plugin_client(plugins.clone());
        let c = cluster();

        assert!(!pre_reconcile_hooks(&session, &c, &config_map("a")).await.should_stop());
        assert!(!post_reconcile_hooks(&session, &c, &config_map("a")).await.should_stop());

        let calls = plugins.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].hook, "pre");
        assert_eq!(calls[0].kind, "ConfigMap");
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].hook, "post");
    }

    #[tokio::test]
    async fn stop_is_returned_verbatim() {
        let plugins = Arc::new(StaticPluginClient::new("barman").stop_on("ConfigMap", "guarded"));
        let session = ReconcileSession::new().with_plugin_client(plugins);
        let r = pre_reconcile_hooks(&session, &cluster(), &config_map("guarded")).await;
        assert_eq!(r.outcome, HookOutcome::Stop);
        assert!(r.error.is_none());
        assert_eq!(r.identifier.as_deref(), Some("barman"));
    }

    #[tokio::test]
    async fn pre_stop_skips_work_and_post() {
        let plugins = Arc::new(StaticPluginClient::new("barman").stop_on("ConfigMap", "guarded"));
        let session = ReconcileSession::new().with_plugin_client(plugins.clone());
        let flag = AtomicBool::new(false);
        let ran = &flag;

        let out = reconcile_with_hooks(&session, &cluster(), &config_map("guarded"), move || async move {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(out.is_skipped());
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(plugins.calls().len(), 1);
        assert!(out.into_result().unwrap().is_none());
    }

    #[tokio::test]
    async fn post_runs_after_failed_work() {
        let plugins = Arc::new(StaticPluginClient::new("barman"));
        let session = ReconcileSession::new().with_plugin_client(plugins.clone());

        let out = reconcile_with_hooks(&session, &cluster(), &config_map("a"), || async {
            Err::<(), _>(Error::plugin("controller", "create failed"))
        })
        .await;

        let hooks: Vec<_> = plugins.calls().into_iter().map(|c| c.hook).collect();
        assert_eq!(hooks, vec!["pre", "post"]);
        assert!(matches!(out.into_result(), Err(Error::Plugin { .. })));
    }

    #[tokio::test]
    async fn post_hook_error_fails_the_object() {
        let plugins = Arc::new(StaticPluginClient::new("barman").failing_hooks("post", "plugin unreachable"));
        let session = ReconcileSession::new().with_plugin_client(plugins);

        let out = reconcile_with_hooks(&session, &cluster(), &config_map("a"), || async { Ok(5) }).await;
        let err = out.into_result().unwrap_err();
        assert_eq!(err.to_string(), "plugin error [barman]: plugin unreachable");
    }

    #[tokio::test]
    async fn pre_hook_requeue_survives_completed_work() {
        let plugins = Arc::new(StaticPluginClient::new("barman").requeue_on("pre", Duration::from_secs(30)));
        let session = ReconcileSession::new().with_plugin_client(plugins);

        let out = reconcile_with_hooks(&session, &cluster(), &config_map("a"), || async { Ok(()) }).await;

        assert_eq!(out.requeue_after(), Some(Duration::from_secs(30)));
        let ObjectReconcile::Completed { pre, post, .. } = &out else {
            panic!("expected the work to run");
        };
        assert_eq!(pre.identifier.as_deref(), Some("barman"));
        assert!(post.requeue_after.is_none());
    }

    #[tokio::test]
    async fn shortest_hook_requeue_wins() {
        let plugins = Arc::new(
            StaticPluginClient::new("barman")
                .requeue_on("pre", Duration::from_secs(30))
                .requeue_on("post", Duration::from_secs(10)),
        );
        let session = ReconcileSession::new().with_plugin_client(plugins);

        let out = reconcile_with_hooks(&session, &cluster(), &config_map("a"), || async { Ok(()) }).await;
        assert_eq!(out.requeue_after(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn dynamic_objects_reach_plugins() {
        let plugins = Arc::new(StaticPluginClient::new("barman").stop_on("Secret", "creds"));
        let session = ReconcileSession::new().with_plugin_client(plugins.clone());
        let secret: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "creds", "namespace": "db" },
        }))
        .unwrap();

        let r = pre_reconcile_hooks(&session, &cluster(), &secret).await;

        assert_eq!(r.outcome, HookOutcome::Stop);
        let calls = plugins.calls();
        assert_eq!(calls[0].kind, "Secret");
        assert_eq!(calls[0].name, "creds");
    }

    #[tokio::test]
    async fn cancelled_session_does_not_reach_plugins() {
        let plugins = Arc::new(StaticPluginClient::new("barman"));
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let session = ReconcileSession::with_cancellation(token).with_plugin_client(plugins.clone());

        let r = pre_reconcile_hooks(&session, &cluster(), &config_map("a")).await;
        assert!(r.error.as_ref().is_some_and(Error::is_cancelled));
        assert!(plugins.calls().is_empty());
    }
}
