//! Garbage collection of instances and networks left by earlier generations.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::driver::{LABEL_GENERATION, LABEL_NAMESPACE, ProvisionDriver};
use crate::error::{ProvisionError, ReapFailures, RuntimeError};
use crate::runtime::{ListFilter, RemoveOptions, RemoveReport};

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapSummary {
    pub containers: Vec<String>,
    pub networks: Vec<String>,
}

impl ProvisionDriver {
    /// True for objects in our namespace carrying some other, non-empty generation.
    fn is_orphan(&self, labels: &BTreeMap<String, String>) -> bool {
        let namespace = labels.get(LABEL_NAMESPACE).map(String::as_str).unwrap_or("");
        if namespace.is_empty() || namespace != self.config.namespace {
            return false;
        }
        let generation = labels.get(LABEL_GENERATION).map(String::as_str).unwrap_or("");
        !generation.is_empty() && generation != self.generation
    }

    /// Stop and remove orphans. Individual failures are collected and
    /// reported together once everything else has been attempted; only a
    /// failure to list containers aborts the sweep.
    pub async fn cleanup(&self) -> Result<ReapSummary, ProvisionError> {
        let filter = ListFilter {
            labels: BTreeMap::from([(LABEL_NAMESPACE.to_string(), self.config.namespace.clone())]),
            all: true,
        };
        let mut summary = ReapSummary::default();
        let mut errors = Vec::new();

        let containers = self
            .runtime
            .list(&filter)
            .await
            .map_err(ProvisionError::runtime("list", "containers"))?;
        for container in containers.into_iter().filter(|c| self.is_orphan(&c.labels)) {
            if matches!(container.state.as_str(), "running" | "paused" | "restarting") {
                info!(instance = %container.id, "stopping orphaned instance");
                if let Err(err) = self.runtime.stop(&container.id).await {
                    errors.push(err);
                }
            }

            info!(instance = %container.id, "removing orphaned instance");
            let options = RemoveOptions {
                force: true,
                dependents: true,
            };
            if collect(self.runtime.remove(&container.id, options).await, &mut errors) {
                summary.containers.push(container.id);
            }
        }

        let networks = match self.runtime.list_networks(&filter).await {
            Ok(networks) => networks,
            Err(err) => {
                errors.push(err);
                Vec::new()
            }
        };
        for network in networks.into_iter().filter(|n| self.is_orphan(&n.labels)) {
            info!(network = %network.id, "removing orphaned network");
            if collect(self.runtime.remove_network(&network.id).await, &mut errors) {
                summary.networks.push(network.id);
            }
        }

        if errors.is_empty() {
            Ok(summary)
        } else {
            warn!(failures = errors.len(), "reaper finished with errors");
            Err(ReapFailures { errors }.into())
        }
    }
}

/// Fold a remove outcome into `errors`; true when nothing failed.
fn collect(outcome: Result<Vec<RemoveReport>, RuntimeError>, errors: &mut Vec<RuntimeError>) -> bool {
    match outcome {
        Ok(reports) => {
            let before = errors.len();
            errors.extend(reports.into_iter().filter_map(|r| r.error));
            errors.len() == before
        }
        Err(err) => {
            errors.push(err);
            false
        }
    }
}
