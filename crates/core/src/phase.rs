//! Phase vocabulary and the readiness condition derived from it.
//!
//! Only [`PHASE_HEALTHY`] counts as ready; every other phase maps to the same
//! not-ready condition.

use crate::{Condition, ConditionStatus};

pub const PHASE_HEALTHY: &str = "Healthy";
pub const PHASE_FIRST_PRIMARY: &str = "Setting up primary";
pub const PHASE_CREATING_REPLICA: &str = "Creating a new replica";
pub const PHASE_UPGRADE: &str = "Upgrading cluster";
pub const PHASE_FAILING_OVER: &str = "Failing over";
pub const PHASE_SWITCHOVER: &str = "Switchover in progress";
pub const PHASE_WAITING_FOR_INSTANCES: &str = "Waiting for the instances to become active";
pub const PHASE_UNRECOVERABLE: &str = "Cluster cannot proceed to reconciliation due to an unknown state";
pub const PHASE_CANNOT_CREATE_OBJECTS: &str = "Unable to create required cluster objects";

/// Condition type carrying cluster readiness.
pub const CONDITION_CLUSTER_READY: &str = "Ready";
pub const REASON_CLUSTER_READY: &str = "ClusterIsReady";
pub const REASON_CLUSTER_NOT_READY: &str = "ClusterIsNotReady";

pub fn is_healthy(phase: &str) -> bool {
    phase == PHASE_HEALTHY
}

/// Readiness condition for a phase, without a transition time.
pub fn ready_condition(phase: &str) -> Condition {
    if is_healthy(phase) {
        Condition::new(CONDITION_CLUSTER_READY, ConditionStatus::True, REASON_CLUSTER_READY, "Cluster is Ready")
    } else {
        Condition::new(CONDITION_CLUSTER_READY, ConditionStatus::False, REASON_CLUSTER_NOT_READY, "Cluster Is Not Ready")
    }
}
