use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a [`crate::ContainerRuntime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such container or network: {0}")]
    NotFound(String),
    #[error("runtime rejected {op} for {id}: {message}")]
    Rejected {
        op: &'static str,
        id: String,
        message: String,
    },
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("bad PORT value {value:?}")]
    BadPort { value: String },
    #[error("resource dir {alias} ({path}): {source}")]
    ResourceDir {
        alias: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{op} {id}: {source}")]
    Runtime {
        op: &'static str,
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error(transparent)]
    Reap(#[from] ReapFailures),
}

impl ProvisionError {
    pub(crate) fn runtime(op: &'static str, id: impl Into<String>) -> impl FnOnce(RuntimeError) -> Self {
        let id = id.into();
        move |source| ProvisionError::Runtime { op, id, source }
    }
}

/// Every failure hit during one reaper sweep.
#[derive(Debug)]
pub struct ReapFailures {
    pub errors: Vec<RuntimeError>,
}

impl fmt::Display for ReapFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReapFailures {}
