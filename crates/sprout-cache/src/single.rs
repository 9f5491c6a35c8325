//! Generation-tracked cache of one backend for one fixed request.
//!
//! Two locks with disjoint jobs: `state` (std mutex) covers short reads and
//! writes of the cached entry and is never held across an await;
//! `spawn_lock` (tokio mutex) queues concurrent `ensure` callers behind the
//! single spawn attempt in flight.

use std::sync::{Arc, Mutex};

use sprout_provision::Event;
use sprout_spec::{SpawnRequest, SpawnResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CacheError;
use crate::spawner::{DynSpawner, pinned_request};

#[derive(Debug)]
struct CacheEntry {
    generation: u64,
    url: Url,
    token: Option<String>,
    resolution_digest: String,
    response: SpawnResponse,
    /// Cancels the status subscription feeding this entry's watcher.
    stream_cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    entry: Option<CacheEntry>,
    /// Spawn attempts started so far.
    attempts: u64,
    in_flight: bool,
    /// Outcome of the most recent failed attempt, by attempt number.
    last_failure: Option<(u64, CacheError)>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<CacheState>,
}

/// Clears the entry it was created for, and nothing newer.
#[derive(Debug, Clone)]
pub struct Cleanup {
    generation: u64,
    shared: Arc<Shared>,
}

impl Cleanup {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true when this call cleared the entry.
    pub fn run(&self, reason: &str) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        match state.entry.take_if(|entry| entry.generation == self.generation) {
            Some(entry) => {
                entry.stream_cancel.cancel();
                info!(
                    action = "cache:clear",
                    generation = state.generation,
                    cleanup_generation = self.generation,
                    instance = %entry.response.name,
                    %reason
                );
                true
            }
            None => {
                debug!(
                    action = "cache:staleclear",
                    generation = state.generation,
                    cleanup_generation = self.generation,
                    %reason
                );
                false
            }
        }
    }
}

/// Result of [`SingleInstanceCache::ensure`].
#[derive(Debug)]
pub struct Ensured {
    pub url: Url,
    pub token: Option<String>,
    /// False when an already cached instance was returned.
    pub spawned: bool,
    pub cleanup: Cleanup,
}

pub struct SingleInstanceCache {
    inner: Arc<CacheInner>,
    /// Held by the attempt in flight, not by its caller.
    spawn_lock: Arc<tokio::sync::Mutex<()>>,
}

/// What a spawn attempt needs once it is detached from its caller.
struct CacheInner {
    request: SpawnRequest,
    spawner: DynSpawner,
    shared: Arc<Shared>,
}

impl SingleInstanceCache {
    pub fn new(spawner: DynSpawner, request: SpawnRequest) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                request,
                spawner,
                shared: Arc::new(Shared::default()),
            }),
            spawn_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn request(&self) -> &SpawnRequest {
        &self.inner.request
    }

    pub fn generation(&self) -> u64 {
        self.inner.shared.state.lock().unwrap().generation
    }

    /// The live instance, if any.
    pub fn current(&self) -> Option<SpawnResponse> {
        let state = self.inner.shared.state.lock().unwrap();
        state.entry.as_ref().map(|entry| entry.response.clone())
    }

    /// True when nothing is cached and no attempt is running.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.shared.state.lock().unwrap();
        state.entry.is_none() && !state.in_flight
    }

    /// Address of the live instance, spawning one when there is none.
    ///
    /// Concurrent callers share a single attempt and see its result, success
    /// or failure. A failed attempt is not retried; the next call starts a
    /// fresh one. Dropping the returned future does not abandon an attempt
    /// already started: it still either commits its instance or shuts it down.
    pub async fn ensure(&self) -> Result<Ensured, CacheError> {
        if let Some(hit) = self.inner.cached() {
            return Ok(hit);
        }

        let joinable = {
            let state = self.inner.shared.state.lock().unwrap();
            state.attempts + u64::from(!state.in_flight)
        };

        let spawning = self.spawn_lock.clone().lock_owned().await;
        if let Some(hit) = self.inner.cached() {
            return Ok(hit);
        }

        let attempt = {
            let mut state = self.inner.shared.state.lock().unwrap();
            if let Some((failed, err)) = &state.last_failure {
                if *failed >= joinable {
                    return Err(err.clone());
                }
            }
            state.attempts += 1;
            state.in_flight = true;
            state.attempts
        };

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _spawning = spawning;
            inner.run_attempt(attempt).await
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = CacheError::Aborted(err.to_string());
                let mut state = self.inner.shared.state.lock().unwrap();
                state.in_flight = false;
                state.last_failure = Some((attempt, err.clone()));
                Err(err)
            }
        }
    }

    /// Re-resolve the cached request and tear the instance down if its
    /// digest moved. Returns whether an invalidation happened; an empty
    /// cache is a no-op.
    pub async fn refresh(&self) -> Result<bool, CacheError> {
        let inner = &self.inner;
        let (name, was, pinned, cleanup) = {
            let state = inner.shared.state.lock().unwrap();
            let Some(entry) = state.entry.as_ref() else {
                return Ok(false);
            };
            (
                entry.response.name.clone(),
                entry.resolution_digest.clone(),
                pinned_request(&inner.request, &entry.response.resolution),
                Cleanup {
                    generation: entry.generation,
                    shared: inner.shared.clone(),
                },
            )
        };

        let now = inner
            .spawner
            .peek(&pinned)
            .await
            .map_err(|err| CacheError::Refresh(Arc::new(err)))?
            .digest();
        debug!(instance = %name, %now, %was, "refresh");
        if now == was {
            return Ok(false);
        }

        let reason = format!("digest changed; was {was}, now {now}");
        cleanup.run(&reason);
        inner
            .spawner
            .shutdown(&name, &reason)
            .await
            .map_err(|err| CacheError::Shutdown {
                name,
                source: Arc::new(err),
            })?;
        Ok(true)
    }

    /// Drop the entry whatever its generation and return the instance it held.
    pub fn invalidate(&self, reason: &str) -> Option<SpawnResponse> {
        let mut state = self.inner.shared.state.lock().unwrap();
        let entry = state.entry.take()?;
        entry.stream_cancel.cancel();
        info!(
            action = "cache:clear",
            generation = state.generation,
            instance = %entry.response.name,
            %reason
        );
        Some(entry.response)
    }
}

impl CacheInner {
    fn cached(&self) -> Option<Ensured> {
        let state = self.shared.state.lock().unwrap();
        let entry = state.entry.as_ref();
        debug!(
            action = "cache:get",
            generation = state.generation,
            hit = entry.is_some()
        );
        entry.map(|entry| Ensured {
            url: entry.url.clone(),
            token: entry.token.clone(),
            spawned: false,
            cleanup: Cleanup {
                generation: entry.generation,
                shared: self.shared.clone(),
            },
        })
    }

    /// Spawn, wait for readiness and commit the entry under attempt `attempt`.
    async fn run_attempt(&self, attempt: u64) -> Result<Ensured, CacheError> {
        let outcome = self.spawn_until_ready().await;

        let mut state = self.shared.state.lock().unwrap();
        state.in_flight = false;
        let (response, url, events, cancel) = match outcome {
            Ok(ready) => ready,
            Err(err) => {
                state.last_failure = Some((attempt, err.clone()));
                return Err(err);
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let token = response.bearer_token.clone();
        let name = response.name.clone();
        info!(action = "cache:set", generation, url = %url, instance = %name);
        state.entry = Some(CacheEntry {
            generation,
            url: url.clone(),
            token: token.clone(),
            resolution_digest: response.resolution.digest(),
            response,
            stream_cancel: cancel.clone(),
        });
        state.last_failure = None;
        drop(state);

        let cleanup = Cleanup {
            generation,
            shared: self.shared.clone(),
        };
        watch_until_gone(events, cancel, cleanup.clone(), self.spawner.clone(), name);

        Ok(Ensured {
            url,
            token,
            spawned: true,
            cleanup,
        })
    }

    async fn spawn_until_ready(
        &self,
    ) -> Result<(SpawnResponse, Url, mpsc::Receiver<Event>, CancellationToken), CacheError> {
        // Independent of the caller so the subscription outlives this call.
        let cancel = CancellationToken::new();
        let (response, mut events) = match self.spawner.spawn(&self.request, cancel.clone()).await {
            Ok(spawned) => spawned,
            Err(err) => {
                cancel.cancel();
                return Err(CacheError::Spawn(Arc::new(err)));
            }
        };

        let url = match response.url() {
            Ok(url) => url,
            Err(source) => {
                self.abandon(&response, &cancel, "invalid backend url").await;
                return Err(CacheError::BadUrl {
                    url: response.backend_url.clone(),
                    source,
                });
            }
        };

        loop {
            let Some(event) = events.recv().await else {
                self.abandon(&response, &cancel, "status stream ended").await;
                return Err(CacheError::StreamEnded);
            };
            debug!(instance = %response.name, %event, "status event");
            if let Some(message) = event.error() {
                let err = CacheError::NeverReady(message.to_string());
                self.abandon(&response, &cancel, &err.to_string()).await;
                return Err(err);
            }
            if event.is_pending() {
                continue;
            }
            if event.is_ready() {
                break;
            }
            if event.is_gone() {
                let err = CacheError::NeverReady(event.to_string());
                self.abandon(&response, &cancel, &err.to_string()).await;
                return Err(err);
            }
        }

        Ok((response, url, events, cancel))
    }

    /// Best-effort teardown of an instance that will never be cached.
    async fn abandon(&self, response: &SpawnResponse, cancel: &CancellationToken, reason: &str) {
        cancel.cancel();
        if let Err(err) = self.spawner.shutdown(&response.name, reason).await {
            warn!(instance = %response.name, error = %err, "shutdown after failed spawn");
        }
    }
}

/// Keep draining status until the instance is lost, then shut it down and
/// clear its entry.
///
/// Losing the status stream counts as losing the instance: once nothing
/// watches it, it must not keep running. Cancellation means whoever cleared
/// the entry owns the teardown.
fn watch_until_gone(
    mut events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    cleanup: Cleanup,
    spawner: DynSpawner,
    name: String,
) {
    tokio::spawn(async move {
        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) if event.error().is_some() || event.is_gone() => break event.to_string(),
                    Some(_) => {}
                    None => break "status stream ended".to_string(),
                },
            }
        };
        cancel.cancel();
        debug!(generation = cleanup.generation, instance = %name, %reason, "backend lost");
        if let Err(err) = spawner.shutdown(&name, &reason).await {
            warn!(instance = %name, error = %err, "shutdown of lost backend failed");
        }
        cleanup.run(&reason);
    });
}
