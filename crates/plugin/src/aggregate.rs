//! Merge plugin-reported status values into `status.pluginStatus`.

use std::collections::BTreeMap;
use std::time::Duration;

use metrics::counter;
use pgherd_core::{cluster_key, Cluster, ReconcileSession, Result};
use pgherd_kubehub::{StatusClient, StatusPatch};
use tracing::{debug, error};

/// Delay before the pass is re-run after plugin status was merged.
pub const PLUGIN_STATUS_REQUEUE: Duration = Duration::from_secs(5);

/// Overwrite entries whose name is in `statuses`. Unknown names are ignored.
/// Returns how many entries matched.
pub fn merge_plugin_statuses(cluster: &mut Cluster, statuses: &BTreeMap<String, String>) -> usize {
    let Some(status) = cluster.status.as_mut() else {
        return 0;
    };
    let mut matched = 0;
    for entry in status.plugin_status.iter_mut() {
        if let Some(val) = statuses.get(&entry.name) {
            entry.status = val.clone();
            matched += 1;
        }
    }
    matched
}

/// Ask the plugins for their status and patch it into the cluster.
///
/// Returns `Some(PLUGIN_STATUS_REQUEUE)` when plugins reported anything, `None`
/// when they reported nothing. Query and patch errors are returned as-is and
/// never come with a requeue.
pub async fn apply_plugin_status(
    session: &ReconcileSession,
    client: &dyn StatusClient,
    cluster: &mut Cluster,
) -> Result<Option<Duration>> {
    let orig = cluster.clone();
    let key = cluster_key(cluster);
    let plugins = session.plugin_client()?;

    let statuses = match session.guard(plugins.set_cluster_status(cluster)).await {
        Ok(s) => s,
        Err(e) => {
            error!(cluster = %key, error = %e, "plugin status query failed");
            return Err(e);
        }
    };
    if statuses.is_empty() {
        debug!(cluster = %key, "no plugin status reported");
        return Ok(None);
    }

    let matched = merge_plugin_statuses(cluster, &statuses);
    debug!(cluster = %key, reported = statuses.len(), matched, "merged plugin status");

    if orig.status == cluster.status {
        counter!("status_patch_skipped_total", 1u64);
        debug!(cluster = %key, "plugin status unchanged; not patching");
    } else {
        let patch = StatusPatch::between(&orig, cluster)?;
        match session.guard(client.patch_status(&patch)).await {
            Ok(updated) => *cluster = updated,
            Err(e) => {
                error!(cluster = %key, error = %e, "patching plugin status failed");
                return Err(e);
            }
        }
    }

    counter!("plugin_status_requeue_total", 1u64);
    Ok(Some(PLUGIN_STATUS_REQUEUE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticPluginClient;
    use pgherd_core::{ClusterSpec, ClusterStatus, Error, PluginStatusEntry};
    use pgherd_kubehub::MemoryStatusClient;
    use std::sync::Arc;

    fn seeded(store: &MemoryStatusClient, names: &[&str]) -> Cluster {
        let mut c = Cluster::new("pg", ClusterSpec { instances: 1, ..Default::default() });
        c.metadata.namespace = Some("db".into());
        c.status = Some(ClusterStatus {
            phase: "Healthy".into(),
            plugin_status: names.iter().map(|n| PluginStatusEntry::new(*n)).collect(),
            ..Default::default()
        });
        store.insert(&c).unwrap()
    }

    fn session(plugins: StaticPluginClient) -> ReconcileSession {
        ReconcileSession::new().with_plugin_client(Arc::new(plugins))
    }

    fn entries(c: &Cluster) -> Vec<(String, String)> {
        c.status.as_ref().unwrap().plugin_status.iter().map(|e| (e.name.clone(), e.status.clone())).collect()
    }

    #[tokio::test]
    async fn only_known_entries_are_updated() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["A", "B"]);
        let s = session(StaticPluginClient::new("x").with_status("A", "x").with_status("C", "y"));

        let requeue = apply_plugin_status(&s, &store, &mut c).await.unwrap();

        assert_eq!(requeue, Some(PLUGIN_STATUS_REQUEUE));
        assert_eq!(entries(&c), vec![("A".into(), "x".into()), ("B".into(), String::new())]);
        let stored = store.get_cluster("db", "pg").await.unwrap();
        assert_eq!(entries(&stored), entries(&c));
    }

    #[tokio::test]
    async fn empty_mapping_means_no_patch_no_requeue() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["A"]);
        let requeue = apply_plugin_status(&session(StaticPluginClient::new("x")), &store, &mut c).await.unwrap();
        assert_eq!(requeue, None);
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn requeue_is_five_seconds() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["barman"]);
        let s = session(StaticPluginClient::new("barman").with_status("barman", "backup-ok"));
        let requeue = apply_plugin_status(&s, &store, &mut c).await.unwrap();
        assert_eq!(requeue, Some(Duration::from_secs(5)));
        assert_eq!(store.patch_count(), 1);
    }

    #[tokio::test]
    async fn query_error_skips_patch() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["barman"]);
        let s = session(StaticPluginClient::new("barman").with_status("barman", "v").failing_status("timeout"));
        let err = apply_plugin_status(&s, &store, &mut c).await.unwrap_err();
        assert!(matches!(err, Error::Plugin { .. }));
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn patch_error_has_no_requeue() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["barman"]);
        store.mutate("db", "pg", |o| o.spec.instances = 2).unwrap();
        let s = session(StaticPluginClient::new("barman").with_status("barman", "v"));
        let err = apply_plugin_status(&s, &store, &mut c).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn unchanged_values_are_not_patched() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["A"]);
        let s = session(StaticPluginClient::new("x").with_status("C", "y"));
        let requeue = apply_plugin_status(&s, &store, &mut c).await.unwrap();
        assert_eq!(requeue, Some(PLUGIN_STATUS_REQUEUE));
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn missing_client_is_an_error() {
        let store = MemoryStatusClient::new();
        let mut c = seeded(&store, &["A"]);
        let err = apply_plugin_status(&ReconcileSession::new(), &store, &mut c).await.unwrap_err();
        assert!(matches!(err, Error::MissingPluginClient));
    }

    #[test]
    fn merge_without_status_is_a_noop() {
        let mut c = Cluster::new("pg", ClusterSpec::default());
        let statuses = BTreeMap::from([("A".to_string(), "x".to_string())]);
        assert_eq!(merge_plugin_statuses(&mut c, &statuses), 0);
        assert!(c.status.is_none());
    }
}
