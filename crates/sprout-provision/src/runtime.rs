//! The container runtime seam. Only the primitives the driver needs.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::RuntimeError;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

pub type LogStream = Pin<Box<dyn Stream<Item = RuntimeResult<Vec<u8>>> + Send>>;

pub type DynRuntime = Arc<dyn ContainerRuntime>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub destination: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            read_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: String,
}

/// Everything needed to create one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<BindMount>,
    pub ports: Vec<PortMapping>,
    pub networks: Vec<String>,
    /// Ask the runtime to delete the container once it exits.
    pub remove_on_exit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub hostname: String,
    /// Runtime status string, e.g. `running` or `exited`.
    pub status: String,
    pub healthy: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub state: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    /// Also remove containers depending on this one.
    pub dependents: bool,
}

/// Per-object outcome of a remove call; a remove can partially fail.
#[derive(Debug)]
pub struct RemoveReport {
    pub id: String,
    pub error: Option<RuntimeError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Every label must match.
    pub labels: BTreeMap<String, String>,
    /// Include stopped containers.
    pub all: bool,
}

impl ListFilter {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start(&self, id: &str) -> RuntimeResult<()>;

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerDetails>;

    async fn stop(&self, id: &str) -> RuntimeResult<()>;

    async fn remove(&self, id: &str, options: RemoveOptions) -> RuntimeResult<Vec<RemoveReport>>;

    async fn list(&self, filter: &ListFilter) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Follow stdout and stderr until the container goes away.
    async fn stream_logs(&self, id: &str) -> RuntimeResult<LogStream>;

    async fn list_networks(&self, filter: &ListFilter) -> RuntimeResult<Vec<NetworkSummary>>;

    async fn remove_network(&self, id: &str) -> RuntimeResult<Vec<RemoveReport>>;
}
