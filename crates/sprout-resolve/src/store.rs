use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sprout_spec::{ServiceDefinition, SpaceView};

use crate::error::StoreResult;

pub type DynDefinitionStore = Arc<dyn DefinitionStore>;
pub type DynSpaceStore = Arc<dyn SpaceStore>;

/// Source of already-evaluated service definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn resolve_service(&self, name: &str) -> StoreResult<Option<ServiceDefinition>>;
    async fn all_services(&self) -> StoreResult<BTreeMap<String, ServiceDefinition>>;
}

/// Arguments for materializing a single space view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewResolveRequest {
    /// Tip reference, or `scratch` for a fresh view.
    pub reference: String,
    pub base: Option<String>,
    pub read_only: bool,
    pub checkpoint_existing_first: bool,
    pub owner_if_created: String,
    pub alias_if_created: String,
}

/// Content-addressed space storage. Returns only once the view is usable.
#[async_trait]
pub trait SpaceStore: Send + Sync {
    async fn resolve_view(&self, request: &ViewResolveRequest) -> StoreResult<SpaceView>;
}
