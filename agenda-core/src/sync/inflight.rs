//! Single-flight fetches.
//!
//! At most one fetch runs per cache key. Later callers attach to the running
//! fetch and receive the same outcome through a watch channel. The fetch runs
//! on its own task, so a caller that stops waiting does not cancel it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::cache::CacheKey;
use crate::error::{AgendaError, AgendaResult};
use crate::utils::lock_recover;

type Slot<T> = watch::Receiver<Option<AgendaResult<T>>>;

/// Handle on a fetch, running or finished.
pub struct FetchHandle<T> {
    rx: Slot<T>,
    /// Whether this caller started the fetch
    pub leader: bool,
}

impl<T: Clone> FetchHandle<T> {
    /// Wait for the fetch outcome.
    pub async fn outcome(mut self) -> AgendaResult<T> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(AgendaError::TransientFetch("fetch produced no outcome".into()))),
            Err(_) => Err(AgendaError::TransientFetch(
                "fetch task ended without an outcome".into(),
            )),
        }
    }
}

pub struct InFlight<T> {
    fetches: Arc<Mutex<HashMap<CacheKey, Slot<T>>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        InFlight {
            fetches: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the fetch running for `key`, if any.
    pub fn join(&self, key: &CacheKey) -> Option<FetchHandle<T>> {
        Self::attach(&lock_recover(&self.fetches), key)
    }

    fn attach(fetches: &HashMap<CacheKey, Slot<T>>, key: &CacheKey) -> Option<FetchHandle<T>> {
        // A receiver whose sender is gone belongs to a task that died
        let rx = fetches.get(key).filter(|rx| rx.has_changed().is_ok())?;
        trace!(key = %key, "Joining in-flight fetch");
        Some(FetchHandle {
            rx: rx.clone(),
            leader: false,
        })
    }

    /// Attach to the fetch running for `key`, or spawn `start()` as the new one.
    pub fn join_or_start<F, Fut>(&self, key: &CacheKey, start: F) -> FetchHandle<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AgendaResult<T>> + Send + 'static,
    {
        let mut fetches = lock_recover(&self.fetches);
        if let Some(handle) = Self::attach(&fetches, key) {
            return handle;
        }

        let (tx, rx) = watch::channel(None);
        fetches.insert(key.clone(), rx.clone());
        drop(fetches);

        debug!(key = %key, "Starting fetch");
        let fut = start();
        let registry = self.fetches.clone();
        let key = key.clone();
        let own = rx.clone();
        tokio::spawn(async move {
            let outcome = fut.await;
            {
                let mut fetches = lock_recover(&registry);
                if fetches.get(&key).is_some_and(|rx| rx.same_channel(&own)) {
                    fetches.remove(&key);
                }
            }
            tx.send_replace(Some(outcome));
        });

        FetchHandle { rx, leader: true }
    }

    pub fn is_running(&self, key: &CacheKey) -> bool {
        lock_recover(&self.fetches).contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityKind;
    use crate::owner::OwnerId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key() -> CacheKey {
        CacheKey::new(OwnerId::new("owner").unwrap(), EntityKind::Events, "jan")
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let inflight: InFlight<u32> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let start = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            }
        };
        let first = inflight.join_or_start(&key(), start);
        let second = inflight.join_or_start(&key(), start);
        assert!(first.leader);
        assert!(!second.leader);

        assert_eq!(first.outcome().await, Ok(7));
        assert_eq!(second.outcome().await, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!inflight.is_running(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_every_waiter() {
        let inflight: InFlight<u32> = InFlight::new();
        let start = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(AgendaError::TransientFetch("offline".into()))
        };
        let a = inflight.join_or_start(&key(), start);
        let b = inflight.join_or_start(&key(), start);
        let expected = Err(AgendaError::TransientFetch("offline".into()));
        assert_eq!(a.outcome().await, expected);
        assert_eq!(b.outcome().await, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_still_completes() {
        let inflight: InFlight<u32> = InFlight::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        let handle = inflight.join_or_start(&key(), move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        drop(handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!inflight.is_running(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn join_only_attaches_to_running_fetches() {
        let inflight: InFlight<u32> = InFlight::new();
        assert!(inflight.join(&key()).is_none());

        let leader = inflight.join_or_start(&key(), || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(3)
        });
        let follower = inflight.join(&key()).expect("fetch is running");
        assert!(!follower.leader);
        assert_eq!(follower.outcome().await, Ok(3));
        assert_eq!(leader.outcome().await, Ok(3));
        assert!(inflight.join(&key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_fetch_is_not_joined() {
        let inflight: InFlight<u32> = InFlight::new();
        let first = inflight.join_or_start(&key(), || async { Ok(1) });
        assert_eq!(first.outcome().await, Ok(1));
        let second = inflight.join_or_start(&key(), || async { Ok(2) });
        assert!(second.leader);
        assert_eq!(second.outcome().await, Ok(2));
    }
}
