use std::io;
use std::path::PathBuf;

use sprout_spec::ParseError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a definition or space store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unknown space {0:?}")]
    UnknownSpace(String),
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such service: {name:?} (have {known:?})")]
    UnknownService { name: String, known: Vec<String> },
    #[error("service {service:?} has no parameter {parameter:?}")]
    UnknownParameter { service: String, parameter: String },
    #[error("service {service:?} requires parameter {parameter:?}")]
    MissingParameter { service: String, parameter: String },
    #[error("parameter {parameter:?} is not concrete: {token:?}")]
    NotConcrete { parameter: String, token: String },
    #[error("service {service:?} declares parameter {parameter:?} with unsupported type {kind:?}")]
    UnsupportedType {
        service: String,
        parameter: String,
        kind: String,
    },
    #[error("parameter {parameter:?}: {source}")]
    Resource {
        parameter: String,
        #[source]
        source: ParseError,
    },
    #[error("parameter {parameter:?}: resolving view {reference:?} failed: {source}")]
    View {
        parameter: String,
        reference: String,
        #[source]
        source: StoreError,
    },
    #[error("definition store: {0}")]
    Definitions(#[source] StoreError),
}
