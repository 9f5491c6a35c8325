//! In-memory stores for tests and single-process embedding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use sprout_spec::view_ref::space_id_of;
use sprout_spec::{SCRATCH, ServiceDefinition, SpaceView};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, io_error};
use crate::store::{DefinitionStore, SpaceStore, ViewResolveRequest};

/// Definition store over a mutable map; replacing an entry simulates a
/// configuration update.
#[derive(Debug, Default)]
pub struct MemDefinitionStore {
    services: RwLock<BTreeMap<String, ServiceDefinition>>,
}

impl MemDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(services: impl IntoIterator<Item = ServiceDefinition>) -> Self {
        let store = Self::new();
        for service in services {
            store.insert(service);
        }
        store
    }

    pub fn insert(&self, service: ServiceDefinition) -> Option<ServiceDefinition> {
        self.services
            .write()
            .unwrap()
            .insert(service.name.clone(), service)
    }

    pub fn remove(&self, name: &str) -> Option<ServiceDefinition> {
        self.services.write().unwrap().remove(name)
    }
}

#[async_trait]
impl DefinitionStore for MemDefinitionStore {
    async fn resolve_service(&self, name: &str) -> StoreResult<Option<ServiceDefinition>> {
        Ok(self.services.read().unwrap().get(name).cloned())
    }

    async fn all_services(&self) -> StoreResult<BTreeMap<String, ServiceDefinition>> {
        Ok(self.services.read().unwrap().clone())
    }
}

#[derive(Debug, Clone)]
struct SpaceRecord {
    owner: String,
    alias: String,
    base: Option<String>,
    checkpoints: u64,
}

/// Space store that lays views out under `root/<space-id>/{tree,owner,alias}`.
#[derive(Debug)]
pub struct MemSpaceStore {
    root: PathBuf,
    spaces: Mutex<BTreeMap<String, SpaceRecord>>,
    requests: Mutex<Vec<ViewResolveRequest>>,
}

impl MemSpaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            spaces: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn add_space(&self, id: &str, owner: &str) {
        self.spaces.lock().unwrap().insert(
            id.to_string(),
            SpaceRecord {
                owner: owner.to_string(),
                alias: id.to_string(),
                base: None,
                checkpoints: 0,
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.spaces.lock().unwrap().contains_key(id)
    }

    pub fn space_count(&self) -> usize {
        self.spaces.lock().unwrap().len()
    }

    pub fn checkpoints(&self, id: &str) -> u64 {
        self.spaces
            .lock()
            .unwrap()
            .get(id)
            .map(|record| record.checkpoints)
            .unwrap_or(0)
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<ViewResolveRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn space_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn lookup_or_create(&self, request: &ViewResolveRequest) -> StoreResult<(String, SpaceRecord, bool)> {
        let mut spaces = self.spaces.lock().unwrap();

        let id = if request.reference == SCRATCH {
            format!("sp-{}", Uuid::new_v4().simple())
        } else {
            let id = space_id_of(&request.reference).to_string();
            if let Some(record) = spaces.get_mut(&id) {
                if request.checkpoint_existing_first && !request.read_only {
                    record.checkpoints += 1;
                }
                return Ok((id, record.clone(), false));
            }
            if request.base.is_none() {
                return Err(StoreError::UnknownSpace(request.reference.clone()));
            }
            id
        };

        if let Some(base) = &request.base {
            if !spaces.contains_key(space_id_of(base)) {
                return Err(StoreError::UnknownSpace(base.clone()));
            }
        }

        let alias = if request.alias_if_created.is_empty() {
            id.clone()
        } else {
            request.alias_if_created.clone()
        };
        let record = SpaceRecord {
            owner: request.owner_if_created.clone(),
            alias,
            base: request.base.clone(),
            checkpoints: 0,
        };
        spaces.insert(id.clone(), record.clone());
        Ok((id, record, true))
    }

    async fn materialize(&self, id: &str, record: &SpaceRecord) -> StoreResult<()> {
        let dir = self.space_dir(id);
        let tree = dir.join("tree");
        tokio::fs::create_dir_all(&tree)
            .await
            .map_err(|err| io_error(&tree, err))?;
        let owner = dir.join("owner");
        tokio::fs::write(&owner, record.owner.as_bytes())
            .await
            .map_err(|err| io_error(&owner, err))?;
        let alias = dir.join("alias");
        tokio::fs::write(&alias, record.alias.as_bytes())
            .await
            .map_err(|err| io_error(&alias, err))?;
        Ok(())
    }
}

#[async_trait]
impl SpaceStore for MemSpaceStore {
    async fn resolve_view(&self, request: &ViewResolveRequest) -> StoreResult<SpaceView> {
        self.requests.lock().unwrap().push(request.clone());

        let (id, record, created) = self.lookup_or_create(request)?;
        self.materialize(&id, &record).await?;

        let tip = if created {
            id.clone()
        } else {
            request.reference.clone()
        };
        let dir = self.space_dir(&id);
        Ok(SpaceView {
            tip,
            base: record.base,
            read_only: request.read_only,
            tree_path: dir.join("tree"),
            owner_file_path: dir.join("owner"),
            alias_file_path: dir.join("alias"),
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(reference: &str) -> ViewResolveRequest {
        ViewResolveRequest {
            reference: reference.into(),
            base: None,
            read_only: false,
            checkpoint_existing_first: false,
            owner_if_created: "alice".into(),
            alias_if_created: String::new(),
        }
    }

    #[tokio::test]
    async fn scratch_allocates_a_fresh_space_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemSpaceStore::new(dir.path());

        let view = store.resolve_view(&request(SCRATCH)).await.unwrap();
        assert!(view.created);
        assert!(view.tip.starts_with("sp-"));
        assert!(store.contains(&view.tip));
        assert!(view.tree_path.is_dir());
        assert_eq!(std::fs::read_to_string(&view.owner_file_path).unwrap(), "alice");
        assert_eq!(std::fs::read_to_string(&view.alias_file_path).unwrap(), view.tip);

        let again = store.resolve_view(&request(SCRATCH)).await.unwrap();
        assert_ne!(again.tip, view.tip);
    }

    #[tokio::test]
    async fn existing_space_checkpoints_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemSpaceStore::new(dir.path());
        store.add_space("sp-1", "bob");

        let mut req = request("sp-1@4");
        req.checkpoint_existing_first = true;
        let view = store.resolve_view(&req).await.unwrap();
        assert!(!view.created);
        assert_eq!(view.tip, "sp-1@4");
        assert_eq!(view.space_id(), "sp-1");
        assert_eq!(store.checkpoints("sp-1"), 1);
        assert_eq!(std::fs::read_to_string(&view.owner_file_path).unwrap(), "bob");
    }

    #[tokio::test]
    async fn unknown_space_and_unknown_base_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemSpaceStore::new(dir.path());

        let err = store.resolve_view(&request("sp-missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownSpace(ref id) if id == "sp-missing"));

        let mut fork = request("sp-new");
        fork.base = Some("sp-old".into());
        let err = store.resolve_view(&fork).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownSpace(ref id) if id == "sp-old"));

        store.add_space("sp-old", "carol");
        let view = store.resolve_view(&fork).await.unwrap();
        assert!(view.created);
        assert_eq!(view.base.as_deref(), Some("sp-old"));
        assert_eq!(store.space_count(), 2);
    }
}
