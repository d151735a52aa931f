use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use kube::ResourceExt;
use pgherd_core::{Cluster, Error, Result};
use serde_json::Value as Json;
use tracing::debug;

use crate::{StatusClient, StatusPatch};

type Key = (String, String);

/// In-process cluster store with API-server-like status patch semantics:
/// only the `status` part of a patch is applied, every write bumps the
/// resourceVersion and a stale resourceVersion precondition is a conflict.
#[derive(Default)]
pub struct MemoryStatusClient {
    objects: Mutex<BTreeMap<Key, Json>>,
    patches: Mutex<Vec<StatusPatch>>,
    fail_next: Mutex<Option<Error>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bump(rv: Option<&str>) -> String {
    rv.and_then(|s| s.parse::<u64>().ok()).unwrap_or(0).saturating_add(1).to_string()
}

fn stored_rv(obj: &Json) -> Option<&str> {
    obj.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str())
}

fn set_rv(obj: &mut Json, rv: String) {
    if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert("resourceVersion".into(), Json::String(rv));
    }
}

impl MemoryStatusClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `cluster` (overwriting any previous copy) and return it as stored,
    /// with a fresh resourceVersion.
    pub fn insert(&self, cluster: &Cluster) -> Result<Cluster> {
        let key = Self::key_of(cluster)?;
        let mut objects = lock(&self.objects);
        let prev_rv = objects.get(&key).and_then(stored_rv).map(String::from);
        let mut v = serde_json::to_value(cluster)?;
        set_rv(&mut v, bump(prev_rv.as_deref().or(cluster.resource_version().as_deref())));
        let stored: Cluster = serde_json::from_value(v.clone())?;
        objects.insert(key, v);
        Ok(stored)
    }

    /// Simulate a concurrent writer: mutate the stored copy and bump its resourceVersion.
    pub fn mutate(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Cluster)) -> Result<Cluster> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = lock(&self.objects);
        let current = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound { namespace: namespace.into(), name: name.into() })?;
        let rv = stored_rv(&current).map(String::from);
        let mut cluster: Cluster = serde_json::from_value(current)?;
        f(&mut cluster);
        let mut v = serde_json::to_value(&cluster)?;
        set_rv(&mut v, bump(rv.as_deref()));
        let stored: Cluster = serde_json::from_value(v.clone())?;
        objects.insert(key, v);
        Ok(stored)
    }

    /// Make the next `patch_status` call fail with `err` (the patch is still recorded).
    pub fn fail_next_patch(&self, err: Error) {
        *lock(&self.fail_next) = Some(err);
    }

    pub fn patches(&self) -> Vec<StatusPatch> {
        lock(&self.patches).clone()
    }

    pub fn patch_count(&self) -> usize {
        lock(&self.patches).len()
    }

    fn key_of(cluster: &Cluster) -> Result<Key> {
        let ns = cluster
            .namespace()
            .ok_or_else(|| Error::Identity(format!("cluster {} has no namespace", cluster.name_any())))?;
        let name = cluster.metadata.name.clone().ok_or_else(|| Error::Identity("cluster has no name".into()))?;
        Ok((ns, name))
    }
}

#[async_trait::async_trait]
impl StatusClient for MemoryStatusClient {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster> {
        let objects = lock(&self.objects);
        let v = objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound { namespace: namespace.into(), name: name.into() })?;
        Ok(serde_json::from_value(v)?)
    }

    async fn patch_status(&self, patch: &StatusPatch) -> Result<Cluster> {
        lock(&self.patches).push(patch.clone());
        if let Some(err) = lock(&self.fail_next).take() {
            return Err(err);
        }

        let key = (patch.namespace.clone(), patch.name.clone());
        let mut objects = lock(&self.objects);
        let obj = objects
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound { namespace: patch.namespace.clone(), name: patch.name.clone() })?;

        let current_rv = stored_rv(obj).map(String::from);
        if let Some(want) = patch.resource_version() {
            if current_rv.as_deref() != Some(want) {
                return Err(Error::Conflict {
                    namespace: patch.namespace.clone(),
                    name: patch.name.clone(),
                    message: format!(
                        "the object has been modified (rv {} -> {})",
                        want,
                        current_rv.as_deref().unwrap_or("")
                    ),
                });
            }
        }

        if let (Some(status_patch), Some(root)) = (patch.status(), obj.as_object_mut()) {
            json_patch::merge(root.entry("status").or_insert(Json::Null), status_patch);
        }
        let next_rv = bump(current_rv.as_deref());
        set_rv(obj, next_rv.clone());
        debug!(ns = %patch.namespace, name = %patch.name, rv = %next_rv, "memory store: status patched");
        Ok(serde_json::from_value(obj.clone())?)
    }
}
