use std::sync::Arc;

use sprout_audit::AuditError;
use sprout_provision::ProvisionError;
use sprout_resolve::ResolveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("recording spawn: {0}")]
    Audit(#[from] AuditError),
}

/// Failure seen by `ensure`/`refresh` callers. Cloneable so every caller
/// waiting on the same attempt gets the same error.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("spawn failed: {0}")]
    Spawn(#[source] Arc<SpawnerError>),
    #[error("backend url {url:?} is invalid: {source}")]
    BadUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("backend will never be ready: {0}")]
    NeverReady(String),
    #[error("status stream ended without ready")]
    StreamEnded,
    #[error("spawn attempt aborted: {0}")]
    Aborted(String),
    #[error("refresh failed: {0}")]
    Refresh(#[source] Arc<SpawnerError>),
    #[error("shutting down {name}: {source}")]
    Shutdown {
        name: String,
        #[source]
        source: Arc<SpawnerError>,
    },
}
