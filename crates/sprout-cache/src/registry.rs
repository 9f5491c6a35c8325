use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sprout_spec::SpawnRequest;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::single::{Ensured, SingleInstanceCache};
use crate::spawner::DynSpawner;

/// Process-wide table of live instances, one cache per fixed request.
///
/// Create one at startup and call [`InstanceRegistry::drain`] on shutdown.
pub struct InstanceRegistry {
    spawner: DynSpawner,
    caches: Mutex<HashMap<SpawnRequest, Arc<SingleInstanceCache>>>,
}

impl InstanceRegistry {
    pub fn new(spawner: DynSpawner) -> Self {
        Self {
            spawner,
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_for(&self, request: &SpawnRequest) -> Arc<SingleInstanceCache> {
        let mut caches = self.caches.lock().unwrap();
        caches
            .entry(request.clone())
            .or_insert_with(|| Arc::new(SingleInstanceCache::new(self.spawner.clone(), request.clone())))
            .clone()
    }

    pub async fn ensure(&self, request: &SpawnRequest) -> Result<Ensured, CacheError> {
        self.cache_for(request).ensure().await
    }

    pub fn len(&self) -> usize {
        self.caches.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<SingleInstanceCache>> {
        self.caches.lock().unwrap().values().cloned().collect()
    }

    /// Check every cache for drift, then evict caches left idle. Returns how
    /// many were invalidated; the first error is returned after every cache
    /// has been checked.
    pub async fn refresh_all(&self) -> Result<usize, CacheError> {
        let mut invalidated = 0;
        let mut first_error = None;
        for cache in self.snapshot() {
            match cache.refresh().await {
                Ok(true) => invalidated += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(service = %cache.request().service_name, error = %err, "refresh failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        self.evict_idle();
        match first_error {
            Some(err) => Err(err),
            None => Ok(invalidated),
        }
    }

    /// Drop caches with nothing cached, no attempt running and no holder
    /// outside the registry. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let mut caches = self.caches.lock().unwrap();
        let before = caches.len();
        caches.retain(|_, cache| Arc::strong_count(cache) > 1 || !cache.is_idle());
        let evicted = before - caches.len();
        if evicted > 0 {
            debug!(evicted, remaining = caches.len(), "evicted idle caches");
        }
        evicted
    }

    /// Invalidate every cache and shut its instance down. Returns how many
    /// instances were stopped.
    pub async fn drain(&self, reason: &str) -> Result<usize, CacheError> {
        let caches: Vec<_> = self.caches.lock().unwrap().drain().map(|(_, cache)| cache).collect();
        let mut stopped = 0;
        let mut first_error = None;
        for cache in caches {
            let Some(response) = cache.invalidate(reason) else {
                continue;
            };
            match self.spawner.shutdown(&response.name, reason).await {
                Ok(()) => stopped += 1,
                Err(err) => {
                    warn!(instance = %response.name, error = %err, "shutdown during drain failed");
                    first_error.get_or_insert(CacheError::Shutdown {
                        name: response.name,
                        source: Arc::new(err),
                    });
                }
            }
        }
        info!(stopped, %reason, "instance registry drained");
        match first_error {
            Some(err) => Err(err),
            None => Ok(stopped),
        }
    }
}
