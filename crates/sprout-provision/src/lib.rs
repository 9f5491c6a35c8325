//! Turns spawn resolutions into running instances on a container runtime,
//! streams their readiness, and reaps instances left behind by earlier
//! driver generations.

pub mod config;
pub mod driver;
pub mod error;
pub mod mounts;
pub mod reaper;
pub mod runtime;
pub mod state;
pub mod watch;

#[cfg(any(feature = "test-fixtures", test))]
pub mod fixtures;

pub use config::DriverConfig;
pub use driver::{LABEL_ACTIVITY, LABEL_GENERATION, LABEL_NAMESPACE, ProvisionDriver};
pub use error::{ProvisionError, ReapFailures, RuntimeError};
pub use reaper::ReapSummary;
pub use runtime::{
    BindMount, ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, DynRuntime,
    ListFilter, LogStream, NetworkSummary, PortMapping, RemoveOptions, RemoveReport, RuntimeResult,
};
pub use state::{Event, State};
