//! Connection registry: the single table of live client sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use kennel_core::{ClientId, RelayError};

use crate::session::ClientSession;

/// Relay statistics (a snapshot of the atomic counters)
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub sessions: usize,
    pub telemetry_received: u64,
    pub commands_forwarded: u64,
    pub evictions: u64,
}

/// Lock-free counters shared by the registry and every session
#[derive(Debug, Default)]
pub struct RelayCounters {
    sessions: AtomicUsize,
    telemetry_received: AtomicU64,
    commands_forwarded: AtomicU64,
    evictions: AtomicU64,
}

impl RelayCounters {
    pub fn record_telemetry(&self) {
        self.telemetry_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            sessions: self.sessions.load(Ordering::Relaxed),
            telemetry_received: self.telemetry_received.load(Ordering::Relaxed),
            commands_forwarded: self.commands_forwarded.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A registered session plus the generation it was registered under
struct Entry {
    session: Arc<ClientSession>,
    generation: u64,
}

/// Registry of live sessions keyed by client id.
///
/// Cloning is cheap; all clones share one table.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: RwLock<HashMap<ClientId, Entry>>,
    counters: Arc<RelayCounters>,
    /// Monotonically increasing registration generation
    generation: AtomicU64,
    liveness: Duration,
}

impl Registry {
    pub fn new(liveness: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                counters: Arc::new(RelayCounters::default()),
                generation: AtomicU64::new(0),
                liveness,
            }),
        }
    }

    pub fn liveness(&self) -> Duration {
        self.inner.liveness
    }

    /// Counters to hand to new sessions
    pub fn counters(&self) -> Arc<RelayCounters> {
        Arc::clone(&self.inner.counters)
    }

    pub fn stats(&self) -> RelayStats {
        self.inner.counters.snapshot()
    }

    /// Register a session under `id`.
    ///
    /// Fails with `DuplicateId` while a healthy session holds the id; a
    /// stale or closed one is evicted and replaced. Returns the generation
    /// to pass to [`Registry::unregister_generation`].
    pub async fn register(
        &self,
        id: ClientId,
        session: Arc<ClientSession>,
    ) -> Result<u64, RelayError> {
        let now = Instant::now();
        let mut sessions = self.inner.sessions.write().await;

        if let Some(existing) = sessions.get(&id) {
            if existing.session.is_healthy(now, self.inner.liveness) {
                return Err(RelayError::DuplicateId(id));
            }
            existing.session.close();
            self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            info!(client = %id, generation = existing.generation, "Evicted stale session on reattach");
        } else {
            self.inner.counters.sessions.fetch_add(1, Ordering::Relaxed);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(
            id.clone(),
            Entry {
                session,
                generation,
            },
        );
        info!(client = %id, generation, "Client registered");
        Ok(generation)
    }

    /// Remove and close the session for `id`, whatever its generation
    pub async fn unregister(&self, id: &ClientId) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.remove(id) {
            Some(entry) => {
                entry.session.close();
                self.inner.counters.sessions.fetch_sub(1, Ordering::Relaxed);
                info!(client = %id, generation = entry.generation, "Client unregistered");
                true
            }
            None => false,
        }
    }

    /// Unregister only if `generation` is still the registered one, so a
    /// handler for a replaced connection cannot remove its successor.
    pub async fn unregister_generation(&self, id: &ClientId, generation: u64) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let Some(entry) = sessions.get(id) else {
            return false;
        };
        if entry.generation != generation {
            debug!(
                client = %id,
                registered_generation = entry.generation,
                stale_generation = generation,
                "Skipping unregister: generation mismatch (newer connection exists)"
            );
            return false;
        }
        if let Some(entry) = sessions.remove(id) {
            entry.session.close();
            self.inner.counters.sessions.fetch_sub(1, Ordering::Relaxed);
            info!(client = %id, generation, "Client unregistered");
        }
        true
    }

    pub async fn lookup(&self, id: &ClientId) -> Result<Arc<ClientSession>, RelayError> {
        self.inner
            .sessions
            .read()
            .await
            .get(id)
            .filter(|entry| !entry.session.is_closed())
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| RelayError::UnknownClient(id.clone()))
    }

    /// Ids of sessions heard from within the liveness window, sorted
    pub async fn list_active(&self) -> Vec<ClientId> {
        let now = Instant::now();
        let mut ids: Vec<ClientId> = self
            .inner
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.session.is_healthy(now, self.inner.liveness))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Evict every session silent for longer than the liveness window
    pub async fn sweep_stale(&self) -> Vec<ClientId> {
        let now = Instant::now();
        let mut sessions = self.inner.sessions.write().await;
        let stale: Vec<ClientId> = sessions
            .iter()
            .filter(|(_, entry)| !entry.session.is_healthy(now, self.inner.liveness))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if let Some(entry) = sessions.remove(id) {
                entry.session.close();
                self.inner.counters.sessions.fetch_sub(1, Ordering::Relaxed);
                self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
                info!(client = %id, generation = entry.generation, "Evicted stale session");
            }
        }
        stale
    }
}
