use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::types::Recommendation;

/// Errors cross task boundaries as strings so every waiter can own a copy.
type Outcome = std::result::Result<Recommendation, String>;

enum Slot {
    Ready { value: Recommendation, expires_at: Instant },
    /// A computation is in flight; waiters subscribe to the channel. The
    /// stored receiver keeps the channel alive even with no waiters.
    Pending(watch::Receiver<Option<Outcome>>),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL cache over full recommendations, keyed by normalized query.
///
/// Single-flight: the first caller for a key becomes the leader and runs
/// the computation on a detached task; callers arriving while it is in
/// flight wait on a per-key channel and observe the identical outcome. A
/// follower timing out merely abandons its wait; the leader keeps going.
/// Expired entries are recomputed on next access.
pub struct RequestCache {
    ttl: Duration,
    slots: Arc<DashMap<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache key: lowercased, whitespace-collapsed query.
pub fn normalize_key(query: &str) -> String {
    query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

impl RequestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Recommendation>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Recommendation>> + Send + 'static,
    {
        enum Role {
            Hit(Recommendation),
            Follower(watch::Receiver<Option<Outcome>>),
            Leader(watch::Sender<Option<Outcome>>, watch::Receiver<Option<Outcome>>),
        }

        let role = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = match occupied.get() {
                    Slot::Ready { value, expires_at } if *expires_at > Instant::now() => {
                        Some(Role::Hit(value.clone()))
                    }
                    Slot::Pending(rx) => Some(Role::Follower(rx.clone())),
                    Slot::Ready { .. } => None, // expired: recompute below
                };
                match live {
                    Some(role) => role,
                    None => {
                        let (tx, rx) = watch::channel(None);
                        occupied.insert(Slot::Pending(rx.clone()));
                        Role::Leader(tx, rx)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(Slot::Pending(rx.clone()));
                Role::Leader(tx, rx)
            }
        };

        match role {
            Role::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Role::Follower(rx) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "joining in-flight computation");
                await_outcome(rx).await
            }
            Role::Leader(tx, rx) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let slots = Arc::clone(&self.slots);
                let ttl = self.ttl;
                let key = key.to_string();
                let fut = compute();
                // Detached: a cancelled leader request must not strand the
                // followers waiting on this key.
                tokio::spawn(async move {
                    let outcome: Outcome = fut.await.map_err(|e| e.to_string());
                    match &outcome {
                        Ok(value) => {
                            slots.insert(
                                key,
                                Slot::Ready {
                                    value: value.clone(),
                                    expires_at: Instant::now() + ttl,
                                },
                            );
                        }
                        Err(_) => {
                            slots.remove(&key);
                        }
                    }
                    let _ = tx.send(Some(outcome));
                });
                await_outcome(rx).await
            }
        }
    }

    /// Drop every completed entry; in-flight computations finish and
    /// publish as usual. Returns the number of entries evicted.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Ready { .. } => {
                cleared += 1;
                false
            }
            Slot::Pending(_) => true,
        });
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let size = self
            .slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready { expires_at, .. } if *expires_at > now))
            .count();
        CacheStats {
            size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

async fn await_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Result<Recommendation> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome.map_err(AppError::Internal);
        }
        if rx.changed().await.is_err() {
            return Err(AppError::Internal("pricing computation was aborted".to_string()));
        }
    }
}
