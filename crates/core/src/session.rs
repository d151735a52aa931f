use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{Error, PluginClient, Result};

/// Per-pass state threaded explicitly through hooks and status updates.
///
/// Built once per reconcile pass; nothing here is shared across passes unless
/// the caller clones the session.
#[derive(Clone, Default)]
pub struct ReconcileSession {
    plugins: Option<Arc<dyn PluginClient>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ReconcileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileSession")
            .field("plugin_client", &self.plugins.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ReconcileSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { plugins: None, cancel }
    }

    /// Derive a session carrying `client` for hooks and plugin status.
    pub fn with_plugin_client(mut self, client: Arc<dyn PluginClient>) -> Self {
        self.plugins = Some(client);
        self
    }

    /// The plugin client attached to this pass.
    pub fn plugin_client(&self) -> Result<Arc<dyn PluginClient>> {
        match &self.plugins {
            Some(c) => Ok(Arc::clone(c)),
            None => {
                error!("plugin client requested but none attached to the reconcile session");
                Err(Error::MissingPluginClient)
            }
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a collaborator call, aborting with `Error::Cancelled` once the pass is cancelled.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }
}
