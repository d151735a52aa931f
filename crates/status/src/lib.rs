//! pgherd status synchronizer.
//!
//! Records the cluster phase and the readiness condition derived from it.
//! A merge patch is sent only when the status actually changed, and it is
//! computed against a snapshot so earlier status edits in the same pass are
//! carried along instead of reverted.

#![forbid(unsafe_code)]

use metrics::counter;
use pgherd_core::{
    cluster_key, conditions::{find_status_condition, set_status_condition}, phase::ready_condition, Cluster,
    ClusterStatus, ReconcileSession, Result,
};
use pgherd_kubehub::{StatusClient, StatusPatch};
use tracing::{debug, error, Level};

/// Set phase and reason, diffing against the cluster as it is right now.
pub async fn register_phase(
    session: &ReconcileSession,
    client: &dyn StatusClient,
    cluster: &mut Cluster,
    phase: &str,
    reason: &str,
) -> Result<()> {
    let orig = cluster.clone();
    register_phase_with_orig_cluster(session, client, cluster, &orig, phase, reason).await
}

/// Set phase and reason on `modified`, diffing against `orig`.
///
/// `orig` may predate other status edits made to `modified` during this pass;
/// those edits are part of the resulting patch. On success `modified` is
/// replaced by the stored object (fresh resourceVersion).
pub async fn register_phase_with_orig_cluster(
    session: &ReconcileSession,
    client: &dyn StatusClient,
    modified: &mut Cluster,
    orig: &Cluster,
    phase: &str,
    reason: &str,
) -> Result<()> {
    let key = cluster_key(modified);
    let status = modified.status.get_or_insert_with(ClusterStatus::default);
    status.phase = phase.to_string();
    status.phase_reason = reason.to_string();

    let condition = ready_condition(phase);
    let changed = set_status_condition(&mut status.conditions, condition.clone());
    debug!(cluster = %key, condition = ?condition, changed, "set status condition");

    if orig.status == modified.status {
        counter!("status_patch_skipped_total", 1u64);
        debug!(cluster = %key, phase, "register phase: found no difference to apply");
        return Ok(());
    }

    let patch = StatusPatch::between(orig, modified)?;
    let updated = match session.guard(client.patch_status(&patch)).await {
        Ok(c) => c,
        Err(e) => {
            error!(cluster = %key, phase, error = %e, "register phase: patching the status failed");
            return Err(e);
        }
    };
    *modified = updated;
    debug!(cluster = %key, phase, reason, "register phase: patched the status");

    if tracing::enabled!(Level::DEBUG) {
        verify_conditions(session, client, modified, &condition.type_).await;
    }
    Ok(())
}

/// Re-read the cluster after a patch and log what the store holds. Failures are only logged.
async fn verify_conditions(session: &ReconcileSession, client: &dyn StatusClient, cluster: &Cluster, type_: &str) {
    let key = cluster_key(cluster);
    let local = cluster.status.as_ref().and_then(|s| find_status_condition(&s.conditions, type_));
    debug!(cluster = %key, condition = ?local, "register phase: after patch, check");

    let (Some(ns), Some(name)) = (cluster.metadata.namespace.as_deref(), cluster.metadata.name.as_deref()) else {
        return;
    };
    match session.guard(client.get_cluster(ns, name)).await {
        Ok(stored) => {
            let conditions = stored.status.map(|s| s.conditions).unwrap_or_default();
            debug!(cluster = %key, conditions = ?conditions, "register phase: condition on cluster");
        }
        Err(e) => error!(cluster = %key, error = %e, "register phase: checking the cluster object"),
    }
}
