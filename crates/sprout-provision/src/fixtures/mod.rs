//! In-process container runtime for tests. Enable with the `test-fixtures` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, ListFilter, LogStream,
    NetworkSummary, RemoveOptions, RemoveReport, RuntimeResult,
};

#[derive(Debug, Clone)]
struct MockContainer {
    hostname: String,
    status: String,
    healthy: bool,
    labels: BTreeMap<String, String>,
    remove_on_exit: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    containers: BTreeMap<String, MockContainer>,
    networks: BTreeMap<String, BTreeMap<String, String>>,
    created: Vec<ContainerSpec>,
    stopped: Vec<String>,
    removed: Vec<String>,
    fail_stop: BTreeSet<String>,
    fail_remove: BTreeSet<String>,
    fail_create: Option<String>,
    fail_start: Option<String>,
    /// Remaining injected `inspect` failures per container.
    fail_inspect: HashMap<String, usize>,
    fail_list_networks: bool,
    ready_on_start: bool,
    logs: Vec<Vec<u8>>,
}

/// Records every call and keeps container state in memory.
///
/// Containers report `running` after start and become healthy only when
/// [`MockRuntime::set_healthy`] is called, unless built with
/// [`MockRuntime::ready_on_start`].
#[derive(Debug, Default)]
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Started containers are healthy immediately.
    pub fn ready_on_start() -> Self {
        let runtime = Self::new();
        runtime.inner.lock().unwrap().ready_on_start = true;
        runtime
    }

    pub fn insert_container(&self, id: &str, status: &str, labels: BTreeMap<String, String>) {
        self.inner.lock().unwrap().containers.insert(
            id.to_string(),
            MockContainer {
                hostname: id.to_string(),
                status: status.to_string(),
                healthy: false,
                labels,
                remove_on_exit: false,
            },
        );
    }

    pub fn insert_network(&self, id: &str, labels: BTreeMap<String, String>) {
        self.inner
            .lock()
            .unwrap()
            .networks
            .insert(id.to_string(), labels);
    }

    pub fn set_healthy(&self, id: &str, healthy: bool) {
        if let Some(c) = self.inner.lock().unwrap().containers.get_mut(id) {
            c.healthy = healthy;
        }
    }

    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(c) = self.inner.lock().unwrap().containers.get_mut(id) {
            c.status = status.to_string();
        }
    }

    /// Drop the container as if it crashed and the runtime cleaned it up.
    pub fn kill(&self, id: &str) {
        self.inner.lock().unwrap().containers.remove(id);
    }

    pub fn fail_create(&self, message: &str) {
        self.inner.lock().unwrap().fail_create = Some(message.to_string());
    }

    pub fn fail_start(&self, message: &str) {
        self.inner.lock().unwrap().fail_start = Some(message.to_string());
    }

    /// The next `times` inspections of `id` fail with a transient error.
    pub fn fail_inspect(&self, id: &str, times: usize) {
        self.inner
            .lock()
            .unwrap()
            .fail_inspect
            .insert(id.to_string(), times);
    }

    pub fn fail_list_networks(&self) {
        self.inner.lock().unwrap().fail_list_networks = true;
    }

    pub fn fail_stop(&self, id: &str) {
        self.inner.lock().unwrap().fail_stop.insert(id.to_string());
    }

    pub fn fail_remove(&self, id: &str) {
        self.inner.lock().unwrap().fail_remove.insert(id.to_string());
    }

    pub fn set_logs(&self, chunks: Vec<Vec<u8>>) {
        self.inner.lock().unwrap().logs = chunks;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().unwrap().containers.contains_key(id)
    }

    pub fn has_network(&self, id: &str) -> bool {
        self.inner.lock().unwrap().networks.contains_key(id)
    }

    pub fn hostname(&self, id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.containers.get(id).map(|c| c.hostname.clone())
    }

    pub fn status_of(&self, id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.containers.get(id).map(|c| c.status.clone())
    }

    /// Every spec passed to `create`, in call order.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.inner.lock().unwrap().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.inner.lock().unwrap().removed.clone()
    }

    pub fn running(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .filter(|(_, c)| c.status == "running")
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn not_found(id: &str) -> RuntimeError {
    RuntimeError::NotFound(id.to_string())
}

fn rejected(op: &'static str, id: &str) -> RuntimeError {
    RuntimeError::Rejected {
        op,
        id: id.to_string(),
        message: "injected failure".into(),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.fail_create {
            return Err(RuntimeError::Unavailable(message.clone()));
        }
        inner.next_id += 1;
        let id = format!("mock-{}", inner.next_id);
        let hostname = format!("host-{}", inner.next_id);
        inner.created.push(spec.clone());
        inner.containers.insert(
            id.clone(),
            MockContainer {
                hostname,
                status: "created".into(),
                healthy: false,
                labels: spec.labels.clone(),
                remove_on_exit: spec.remove_on_exit,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.fail_start {
            return Err(RuntimeError::Unavailable(message.clone()));
        }
        let ready = inner.ready_on_start;
        let container = inner.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        container.status = "running".into();
        container.healthy = ready;
        Ok(())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remaining) = inner.fail_inspect.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RuntimeError::Unavailable(format!("inspect {id}: injected failure")));
            }
        }
        let container = inner.containers.get(id).ok_or_else(|| not_found(id))?;
        Ok(ContainerDetails {
            id: id.to_string(),
            hostname: container.hostname.clone(),
            status: container.status.clone(),
            healthy: container.healthy,
            labels: container.labels.clone(),
        })
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_stop.contains(id) {
            return Err(rejected("stop", id));
        }
        let container = inner.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        container.status = "exited".into();
        container.healthy = false;
        let remove = container.remove_on_exit;
        inner.stopped.push(id.to_string());
        if remove {
            inner.containers.remove(id);
            inner.removed.push(id.to_string());
        }
        Ok(())
    }

    async fn remove(&self, id: &str, _options: RemoveOptions) -> RuntimeResult<Vec<RemoveReport>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_remove.contains(id) {
            return Ok(vec![RemoveReport {
                id: id.to_string(),
                error: Some(rejected("remove", id)),
            }]);
        }
        inner.containers.remove(id).ok_or_else(|| not_found(id))?;
        inner.removed.push(id.to_string());
        Ok(vec![RemoveReport {
            id: id.to_string(),
            error: None,
        }])
    }

    async fn list(&self, filter: &ListFilter) -> RuntimeResult<Vec<ContainerSummary>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .containers
            .iter()
            .filter(|(_, c)| filter.all || c.status == "running")
            .filter(|(_, c)| filter.matches(&c.labels))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                state: c.status.clone(),
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn stream_logs(&self, id: &str) -> RuntimeResult<LogStream> {
        let inner = self.inner.lock().unwrap();
        if !inner.containers.contains_key(id) {
            return Err(not_found(id));
        }
        let chunks: Vec<RuntimeResult<Vec<u8>>> = inner.logs.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn list_networks(&self, filter: &ListFilter) -> RuntimeResult<Vec<NetworkSummary>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_list_networks {
            return Err(RuntimeError::Unavailable("network list: injected failure".into()));
        }
        Ok(inner
            .networks
            .iter()
            .filter(|(_, labels)| filter.matches(labels))
            .map(|(id, labels)| NetworkSummary {
                id: id.clone(),
                labels: labels.clone(),
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<Vec<RemoveReport>> {
        let mut inner = self.inner.lock().unwrap();
        inner.networks.remove(id).ok_or_else(|| not_found(id))?;
        Ok(vec![RemoveReport {
            id: id.to_string(),
            error: None,
        }])
    }
}
