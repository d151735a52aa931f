use thiserror::Error;

/// Errors surfaced by status synchronization and plugin hooks.
///
/// None of these are retried internally; the reconcile loop decides whether
/// to re-run the whole pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    /// The store rejected a patch because its base resourceVersion is stale.
    #[error("conflict patching {namespace}/{name}: {message}")]
    Conflict { namespace: String, name: String, message: String },

    #[error("cluster {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// Object is missing namespace or name and cannot be addressed.
    #[error("cannot address object: {0}")]
    Identity(String),

    /// Hooks or plugin status were requested on a session without a plugin client.
    #[error("no plugin client attached to the reconcile session")]
    MissingPluginClient,

    #[error("plugin error [{plugin}]: {message}")]
    Plugin { plugin: String, message: String },

    #[error("reconcile pass cancelled")]
    Cancelled,

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin { plugin: plugin.into(), message: message.into() }
    }

    /// True for stale-base rejections, whether mapped or still a raw 409.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube { source: kube::Error::Api(resp) } => resp.code == 409,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
