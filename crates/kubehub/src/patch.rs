//! JSON merge patches (RFC 7386) for the cluster status subresource.
//!
//! Patches are generated here; applying them is left to `json_patch::merge`.

use kube::ResourceExt;
use pgherd_core::{Cluster, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Whether status patches carry the base resourceVersion as a precondition.
/// Enabled by default; set PGHERD_DISABLE_OPTIMISTIC_LOCK=1 to send plain merge patches.
pub fn optimistic_lock_enabled() -> bool {
    !std::env::var("PGHERD_DISABLE_OPTIMISTIC_LOCK")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// A status merge patch addressed to one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPatch {
    pub namespace: String,
    pub name: String,
    /// `{"metadata":{"resourceVersion":..}, "status":{..}}`
    pub body: Json,
}

impl StatusPatch {
    /// Patch turning `base`'s status into `modified`'s, addressed by `base`'s identity.
    pub fn between(base: &Cluster, modified: &Cluster) -> Result<Self> {
        Self::between_with(base, modified, optimistic_lock_enabled())
    }

    pub fn between_with(base: &Cluster, modified: &Cluster, optimistic_lock: bool) -> Result<Self> {
        let namespace = base
            .namespace()
            .ok_or_else(|| Error::Identity(format!("cluster {} has no namespace", base.name_any())))?;
        let name = base.metadata.name.clone().ok_or_else(|| Error::Identity("cluster has no name".into()))?;

        let from = serde_json::to_value(&base.status)?;
        let to = serde_json::to_value(&modified.status)?;
        let mut body = Map::new();
        if optimistic_lock {
            if let Some(rv) = base.resource_version() {
                body.insert("metadata".into(), serde_json::json!({ "resourceVersion": rv }));
            }
        }
        body.insert("status".into(), merge_diff(&from, &to).unwrap_or_else(|| Json::Object(Map::new())));
        Ok(Self { namespace, name, body: Json::Object(body) })
    }

    pub fn status(&self) -> Option<&Json> {
        self.body.get("status")
    }

    /// resourceVersion precondition, when present.
    pub fn resource_version(&self) -> Option<&str> {
        self.body.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str())
    }
}

/// Merge patch that turns `base` into `target`, or None when they are equal.
///
/// Objects are diffed key by key, removed keys become `null`, anything else
/// (arrays included) is replaced whole.
pub fn merge_diff(base: &Json, target: &Json) -> Option<Json> {
    if base == target {
        return None;
    }
    match (base, target) {
        (Json::Object(bo), Json::Object(to)) => {
            let mut out = Map::new();
            for (k, tv) in to.iter() {
                match bo.get(k) {
                    Some(bv) => {
                        if let Some(d) = merge_diff(bv, tv) {
                            out.insert(k.clone(), d);
                        }
                    }
                    None => {
                        out.insert(k.clone(), tv.clone());
                    }
                }
            }
            for k in bo.keys() {
                if !to.contains_key(k) {
                    out.insert(k.clone(), Json::Null);
                }
            }
            Some(Json::Object(out))
        }
        (_, t) => Some(t.clone()),
    }
}
