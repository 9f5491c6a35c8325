use std::sync::Arc;

use async_trait::async_trait;
use sprout_audit::{DynAuditSink, record_spawn};
use sprout_provision::{Event, ProvisionDriver};
use sprout_resolve::Resolver;
use sprout_spec::{ParameterRequest, SpawnRequest, SpawnResolution, SpawnResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::SpawnerError;

/// What the cache needs from the layers below it.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Resolve and start an instance. Its status events stop once `cancel` fires.
    async fn spawn(
        &self,
        request: &SpawnRequest,
        cancel: CancellationToken,
    ) -> Result<(SpawnResponse, mpsc::Receiver<Event>), SpawnerError>;

    async fn shutdown(&self, name: &str, reason: &str) -> Result<(), SpawnerError>;

    /// Resolve without side effects on existing spaces.
    async fn peek(&self, request: &SpawnRequest) -> Result<SpawnResolution, SpawnerError>;
}

pub type DynSpawner = Arc<dyn Spawner>;

/// The production spawner: resolver, driver, and an optional audit trail.
pub struct Provisioner {
    resolver: Resolver,
    driver: Arc<ProvisionDriver>,
    audit: Option<DynAuditSink>,
}

impl Provisioner {
    pub fn new(resolver: Resolver, driver: Arc<ProvisionDriver>) -> Self {
        Self {
            resolver,
            driver,
            audit: None,
        }
    }

    pub fn with_audit(mut self, sink: DynAuditSink) -> Self {
        self.audit = Some(sink);
        self
    }
}

#[async_trait]
impl Spawner for Provisioner {
    async fn spawn(
        &self,
        request: &SpawnRequest,
        cancel: CancellationToken,
    ) -> Result<(SpawnResponse, mpsc::Receiver<Event>), SpawnerError> {
        let resolved = self.resolver.resolve_with_spaces(request).await?;
        let response = self.driver.spawn(&resolved.resolution).await?;
        info!(
            instance = %response.name,
            service = %response.resolution.service_name,
            spaces = ?resolved.space_ids,
            "provisioned"
        );

        // The instance stays up when the audit write fails.
        if let Some(sink) = &self.audit {
            record_spawn(sink.as_ref(), request, &resolved.resolution, &response).await?;
        }

        let events = self.driver.status(&response.name, cancel);
        Ok((response, events))
    }

    async fn shutdown(&self, name: &str, reason: &str) -> Result<(), SpawnerError> {
        Ok(self.driver.shutdown(name, reason).await?)
    }

    async fn peek(&self, request: &SpawnRequest) -> Result<SpawnResolution, SpawnerError> {
        Ok(self.resolver.peek(request).await?)
    }
}

/// `request` with every explicit parameter replaced by its resolved value,
/// so re-resolving reuses the same spaces instead of allocating new scratch
/// views.
pub fn pinned_request(request: &SpawnRequest, resolution: &SpawnResolution) -> SpawnRequest {
    let mut pinned = request.clone();
    if pinned.service_name.is_empty() {
        pinned.service_name = resolution.service_name.clone();
    }
    for (name, parameter) in &resolution.parameters {
        if !parameter.implicit {
            pinned
                .parameters
                .insert(name.clone(), ParameterRequest::new(parameter.format()));
        }
    }
    pinned
}
