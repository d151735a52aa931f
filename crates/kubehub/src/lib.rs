//! pgherd kubehub – the remote object store boundary for cluster status.
//!
//! [`StatusClient`] is what the status and plugin crates talk to. The kube-rs
//! implementation sends merge patches to the `status` subresource; the
//! in-memory one backs tests and dry runs.

#![forbid(unsafe_code)]

mod memory;
mod patch;

use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use pgherd_core::{Cluster, Error, Result};
use tracing::debug;

pub use memory::MemoryStatusClient;
pub use patch::{merge_diff, optimistic_lock_enabled, StatusPatch};

/// Read and status-patch access to `Cluster` objects.
#[async_trait::async_trait]
pub trait StatusClient: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster>;

    /// Send a status merge patch; returns the stored object after the patch.
    async fn patch_status(&self, patch: &StatusPatch) -> Result<Cluster>;
}

fn field_manager() -> String {
    std::env::var("PGHERD_FIELD_MANAGER").unwrap_or_else(|_| "pgherd-controller".to_string())
}

/// StatusClient backed by the Kubernetes API server.
pub struct KubeStatusClient {
    client: Client,
    field_manager: String,
}

impl KubeStatusClient {
    pub fn new(client: Client) -> Self {
        Self { client, field_manager: field_manager() }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, namespace: &str) -> Api<Cluster> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map API errors we care about (conflict, not found) onto typed variants.
fn map_kube_err(e: kube::Error, namespace: &str, name: &str) -> Error {
    if let kube::Error::Api(resp) = &e {
        match resp.code {
            409 => {
                return Error::Conflict {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message: resp.message.clone(),
                }
            }
            404 => return Error::NotFound { namespace: namespace.to_string(), name: name.to_string() },
            _ => {}
        }
    }
    Error::Kube { source: e }
}

#[async_trait::async_trait]
impl StatusClient for KubeStatusClient {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster> {
        self.api(namespace).get(name).await.map_err(|e| map_kube_err(e, namespace, name))
    }

    async fn patch_status(&self, patch: &StatusPatch) -> Result<Cluster> {
        let pp = PatchParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        debug!(ns = %patch.namespace, name = %patch.name, rv = ?patch.resource_version(), "patching cluster status");
        let res = self
            .api(&patch.namespace)
            .patch_status(&patch.name, &pp, &Patch::Merge(&patch.body))
            .await;
        match res {
            Ok(c) => {
                metrics::counter!("status_patch_total", 1u64);
                Ok(c)
            }
            Err(e) => {
                metrics::counter!("status_patch_err_total", 1u64);
                Err(map_kube_err(e, &patch.namespace, &patch.name))
            }
        }
    }
}
