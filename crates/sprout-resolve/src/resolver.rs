use std::collections::{BTreeMap, BTreeSet};

use sprout_spec::{
    ParameterRequest, ParameterSchema, ParameterType, ParameterValue, ResolvedParameter,
    ServiceDefinition, SpaceView, SpaceViewRequest, SpawnRequest, SpawnResolution,
};
use tracing::debug;

use crate::error::ResolveError;
use crate::store::{DynDefinitionStore, DynSpaceStore, ViewResolveRequest};

/// A resolution plus the concrete space ids it touched.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub resolution: SpawnResolution,
    pub space_ids: Vec<String>,
}

/// Binds requests to definition schemas.
pub struct Resolver {
    definitions: DynDefinitionStore,
    spaces: DynSpaceStore,
}

impl Resolver {
    pub fn new(definitions: DynDefinitionStore, spaces: DynSpaceStore) -> Self {
        Self {
            definitions,
            spaces,
        }
    }

    pub async fn resolve(&self, request: &SpawnRequest) -> Result<SpawnResolution, ResolveError> {
        Ok(self.resolve_with_spaces(request).await?.resolution)
    }

    pub async fn resolve_with_spaces(&self, request: &SpawnRequest) -> Result<Resolved, ResolveError> {
        self.resolve_inner(request, true).await
    }

    /// Resolve without asking the space store to checkpoint existing views.
    ///
    /// Used to compare a live instance against its current definition.
    pub async fn peek(&self, request: &SpawnRequest) -> Result<SpawnResolution, ResolveError> {
        Ok(self.resolve_inner(request, false).await?.resolution)
    }

    async fn resolve_inner(
        &self,
        request: &SpawnRequest,
        allow_checkpoint: bool,
    ) -> Result<Resolved, ResolveError> {
        let definition = self.lookup(&request.service_name).await?;
        let schema = &definition.spawn.schema;

        if let Some(unknown) = request.parameters.keys().find(|name| !schema.contains_key(*name)) {
            return Err(ResolveError::UnknownParameter {
                service: definition.name.clone(),
                parameter: unknown.clone(),
            });
        }

        let mut parameters = BTreeMap::new();
        let mut space_ids = BTreeSet::new();

        for (name, declared) in schema {
            let (token, implicit) = match request.parameters.get(name) {
                Some(token) => (token.clone(), false),
                None => match &declared.value {
                    Some(default) => (ParameterRequest::new(default.as_str()), true),
                    None if declared.optional => continue,
                    None => {
                        return Err(ResolveError::MissingParameter {
                            service: definition.name.clone(),
                            parameter: name.clone(),
                        });
                    }
                },
            };

            let value = self
                .resolve_parameter(request, &definition, name, declared, &token, allow_checkpoint)
                .await?;
            for view in value.views() {
                space_ids.insert(view.space_id().to_string());
            }
            parameters.insert(name.clone(), ResolvedParameter { value, implicit });
        }

        debug!(
            service = %definition.name,
            parameters = parameters.len(),
            spaces = space_ids.len(),
            "resolved spawn request"
        );

        Ok(Resolved {
            resolution: SpawnResolution {
                user: request.user.clone(),
                ephemeral: request.ephemeral,
                service_name: definition.name.clone(),
                parameters,
                grace_period_seconds: None,
                spawn: definition.spawn.clone(),
            },
            space_ids: space_ids.into_iter().collect(),
        })
    }

    async fn lookup(&self, name: &str) -> Result<ServiceDefinition, ResolveError> {
        let found = self
            .definitions
            .resolve_service(name)
            .await
            .map_err(ResolveError::Definitions)?;
        match found {
            Some(definition) => Ok(definition),
            None => {
                let known = self
                    .definitions
                    .all_services()
                    .await
                    .map_err(ResolveError::Definitions)?
                    .into_keys()
                    .collect();
                Err(ResolveError::UnknownService {
                    name: name.to_string(),
                    known,
                })
            }
        }
    }

    async fn resolve_parameter(
        &self,
        request: &SpawnRequest,
        definition: &ServiceDefinition,
        name: &str,
        declared: &ParameterSchema,
        token: &ParameterRequest,
        allow_checkpoint: bool,
    ) -> Result<ParameterValue, ResolveError> {
        let not_concrete = || ResolveError::NotConcrete {
            parameter: name.to_string(),
            token: token.to_string(),
        };

        match &declared.kind {
            ParameterType::String => Ok(ParameterValue::String(token.to_string())),
            ParameterType::Resource => {
                token
                    .resource()
                    .map(ParameterValue::Resource)
                    .map_err(|source| ResolveError::Resource {
                        parameter: name.to_string(),
                        source,
                    })
            }
            ParameterType::Space => {
                if !token.is_concrete(&declared.kind) {
                    return Err(not_concrete());
                }
                let view = token.space(request.force_read_only);
                let view = self
                    .materialize(request, name, &view, allow_checkpoint)
                    .await?;
                Ok(ParameterValue::Space(view))
            }
            ParameterType::Spaces => {
                if !token.is_concrete(&declared.kind) {
                    return Err(not_concrete());
                }
                let mut views = Vec::new();
                for member in token.spaces(request.force_read_only) {
                    views.push(
                        self.materialize(request, name, &member, allow_checkpoint)
                            .await?,
                    );
                }
                Ok(ParameterValue::Spaces(views))
            }
            ParameterType::Unknown(kind) => Err(ResolveError::UnsupportedType {
                service: definition.name.clone(),
                parameter: name.to_string(),
                kind: kind.clone(),
            }),
        }
    }

    async fn materialize(
        &self,
        request: &SpawnRequest,
        parameter: &str,
        view: &SpaceViewRequest,
        allow_checkpoint: bool,
    ) -> Result<SpaceView, ResolveError> {
        if !view.is_concrete() {
            return Err(ResolveError::NotConcrete {
                parameter: parameter.to_string(),
                token: view.space_id.clone(),
            });
        }
        let resolve = ViewResolveRequest {
            reference: view.space_id.clone(),
            base: view.base_ref.clone(),
            read_only: view.read_only,
            checkpoint_existing_first: allow_checkpoint && view.checkpoint_existing_first,
            owner_if_created: request.user.clone(),
            alias_if_created: String::new(),
        };
        self.spaces
            .resolve_view(&resolve)
            .await
            .map_err(|source| ResolveError::View {
                parameter: parameter.to_string(),
                reference: view.space_id.clone(),
                source,
            })
    }
}
