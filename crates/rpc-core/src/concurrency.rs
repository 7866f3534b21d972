//! Concurrency primitives shared by the client and server state machines.
//!
//! Four small building blocks, used nowhere else in the workspace but
//! relied on pervasively: [`SingleFlight`] and [`SingleFlightMap`] collapse
//! concurrent operations into one in-flight attempt with retry-on-failure;
//! [`LatestGreatest`] keeps only the newest operation authoritative, for
//! cooperative supersession; [`DeferredResult`] is an externally resolvable
//! result handle used to correlate a sent `methodCall` with its eventual
//! `methodCallResult`.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, oneshot};

/// The outcome of one `SingleFlight` generation, shared by every caller
/// that joined it while it was in flight.
struct Slot<T, E> {
    done: Notify,
    outcome: Mutex<Option<Result<T, E>>>,
}

/// Collapses concurrent calls to [`SingleFlight::exec`] into a single
/// in-flight operation. While an operation is running, every other caller
/// awaits the same result. Once the operation settles the slot is cleared,
/// so the *next* (non-concurrent) call always starts a fresh attempt —
/// `SingleFlight` deduplicates concurrency, it is not a result cache.
pub struct SingleFlight<T, E> {
    current: Mutex<Option<Arc<Slot<T, E>>>>,
    in_flight: std::sync::atomic::AtomicBool,
    idle: Notify,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> SingleFlight<T, E> {
    /// Create an idle single-flight slot.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            in_flight: std::sync::atomic::AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Run `op` if nothing is in flight; otherwise await the in-flight
    /// operation's result. On settling (success or failure) the slot is
    /// cleared before the result is returned to the caller that started
    /// it, so the next call to `exec` always retries.
    pub async fn exec<F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (slot, is_leader) = {
            let mut guard = self.current.lock().await;
            if let Some(existing) = guard.as_ref() {
                (existing.clone(), false)
            } else {
                let fresh = Arc::new(Slot {
                    done: Notify::new(),
                    outcome: Mutex::new(None),
                });
                *guard = Some(fresh.clone());
                (fresh, true)
            }
        };

        if !is_leader {
            // Join the in-flight operation and wait for it to settle.
            loop {
                if let Some(outcome) = slot.outcome.lock().await.clone() {
                    return outcome;
                }
                slot.done.notified().await;
            }
        }

        self.in_flight.store(true, std::sync::atomic::Ordering::SeqCst);
        let outcome = op().await;
        self.in_flight.store(false, std::sync::atomic::Ordering::SeqCst);

        *slot.outcome.lock().await = Some(outcome.clone());
        slot.done.notify_waiters();
        // Clear the slot only after publishing the outcome, so a caller
        // that raced the leader for `self.current` but lost (and is about
        // to check `current` again) always either joins this slot or
        // starts the next generation cleanly.
        *self.current.lock().await = None;
        self.idle.notify_waiters();

        outcome
    }

    /// Resolve once no operation is in flight. Never fails.
    pub async fn wait_til_idle(&self) {
        loop {
            if !self.in_flight.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
            self.idle.notified().await;
        }
    }

    /// Fail fast if this slot is not idle. Used as an assertion at hand-off
    /// points where the caller has already established (by protocol) that
    /// no concurrent sync should be running.
    ///
    /// # Panics
    ///
    /// Panics if an operation is currently in flight — this indicates a
    /// protocol violation in the calling state machine, not a recoverable
    /// condition.
    pub fn expect_idle(&self) {
        assert!(
            !self.in_flight.load(std::sync::atomic::Ordering::SeqCst),
            "SingleFlight::expect_idle called while an operation was in flight"
        );
    }
}

/// Keyed variant of [`SingleFlight`]: each key gets its own collapsing slot.
pub struct SingleFlightMap<K, T, E> {
    slots: dashmap::DashMap<K, Arc<SingleFlight<T, E>>>,
    last_outcome: dashmap::DashMap<K, Result<T, E>>,
}

impl<K, T, E> Default for SingleFlightMap<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> SingleFlightMap<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty map of single-flight slots.
    pub fn new() -> Self {
        Self {
            slots: dashmap::DashMap::new(),
            last_outcome: dashmap::DashMap::new(),
        }
    }

    fn slot_for(&self, key: &K) -> Arc<SingleFlight<T, E>> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SingleFlight::new()))
            .clone()
    }

    /// Run `op` under the single-flight slot for `key`.
    pub async fn exec<F, Fut>(&self, key: K, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.slot_for(&key);
        let outcome = slot.exec(op).await;
        self.last_outcome.insert(key, outcome.clone());
        outcome
    }

    /// Await every entry currently tracked by the map and return only the
    /// values that resolved successfully, dropping any that are still
    /// failing. Used to flush a batch of security-property fetches without
    /// letting one rejected group poison the others.
    pub async fn drain_succeeded(&self) -> Vec<T> {
        let keys: Vec<K> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = self.slots.get(&key) {
                slot.wait_til_idle().await;
            }
            if let Some(entry) = self.last_outcome.get(&key) {
                if let Ok(value) = entry.value() {
                    out.push(value.clone());
                }
            }
        }
        out
    }
}

/// Keeps only the newest operation authoritative. Every call to
/// [`LatestGreatest::exec`] supersedes any operation already running: an
/// older generation's result is still computed but never published if a
/// newer generation has already started (its `is_outdated` predicate
/// reports `true` so well-behaved operations can bail out early too).
pub struct LatestGreatest<T> {
    generation: std::sync::atomic::AtomicU64,
    latest: tokio::sync::watch::Sender<Option<(u64, T)>>,
}

impl<T: Clone + Send + Sync + 'static> LatestGreatest<T> {
    /// Create an empty latest-greatest cell.
    pub fn new() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(None);
        Self {
            generation: std::sync::atomic::AtomicU64::new(0),
            latest: tx,
        }
    }

    /// Start a new operation, superseding any operation already running.
    /// `op` receives a closure it can poll to cooperatively cancel once a
    /// newer generation has started. Returns once `op`'s generation is
    /// published (i.e. this call's own result, not a still-later one).
    pub async fn exec<F, Fut>(self: &Arc<Self>, op: F) -> T
    where
        F: FnOnce(Arc<dyn Fn() -> bool + Send + Sync>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let my_generation = self
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let this = self.clone();
        let is_outdated: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(move || {
            this.generation.load(std::sync::atomic::Ordering::SeqCst) != my_generation
        });

        let this = self.clone();
        let fut = op(is_outdated);
        tokio::spawn(async move {
            let value = fut.await;
            // Publish unconditionally: a superseded generation's watch send
            // is immediately overwritten by the newer generation's own
            // send, and get_latest() only returns a value whose generation
            // matches the highest one observed so far.
            let _ = this.latest.send(Some((my_generation, value)));
        });

        self.get_latest().await
    }

    /// Resolve to the result of the current latest operation, retrying
    /// across supersession until a generation that is *still* the latest
    /// one at completion time has published its result.
    pub async fn get_latest(&self) -> T {
        let mut rx = self.latest.subscribe();
        loop {
            let current_generation = self.generation.load(std::sync::atomic::Ordering::SeqCst);
            if let Some((gen, value)) = rx.borrow().clone() {
                if gen == current_generation {
                    return value;
                }
            }
            if rx.changed().await.is_err() {
                // Sender dropped; fall back to whatever is cached, if any.
                if let Some((_, value)) = rx.borrow().clone() {
                    return value;
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for LatestGreatest<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An externally resolvable result handle: one side holds the `Future`
/// half, the other calls [`DeferredResult::resolve`] or
/// [`DeferredResult::reject`]. Used to bind a pending `methodCall`'s
/// `callId` to the eventual `methodCallResult`.
pub struct DeferredResult<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
    receiver: Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> Default for DeferredResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredResult<T> {
    /// Create a new, unresolved deferred result.
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Resolve the deferred result. A no-op if already resolved or
    /// rejected (idempotent, matching the "resolved exactly once" lifetime
    /// invariant on `Call`).
    pub async fn resolve(&self, value: T) {
        if let Some(tx) = self.sender.lock().await.take() {
            let _ = tx.send(value);
        }
    }

    /// Reject the deferred result by dropping its sender; the awaiting
    /// side observes a `RecvError`. Callers typically wrap this with their
    /// own error type (see `rpc-client`'s pending-call table).
    pub async fn reject(&self) {
        let _ = self.sender.lock().await.take();
    }

    /// Consume and await the result. Can only be called once; subsequent
    /// calls return `None` immediately.
    pub async fn wait(&self) -> Option<T> {
        let rx = self.receiver.lock().await.take()?;
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn single_flight_runs_op_once_for_concurrent_callers() {
        let flight: Arc<SingleFlight<u32, ()>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .exec(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Ok::<_, ()>(42u32)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_flight_retries_after_failure() {
        let flight: SingleFlight<u32, &'static str> = SingleFlight::new();
        let attempt = AtomicUsize::new(0);

        let first = flight
            .exec(|| async {
                attempt.fetch_add(1, Ordering::SeqCst);
                Err::<u32, &str>("boom")
            })
            .await;
        assert_eq!(first, Err("boom"));

        let second = flight
            .exec(|| async {
                attempt.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(7)
            })
            .await;
        assert_eq!(second, Ok(7));
        assert_eq!(attempt.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_flight_map_keys_are_independent() {
        let map: SingleFlightMap<&'static str, u32, ()> = SingleFlightMap::new();
        let a = map.exec("a", || async { Ok::<_, ()>(1) }).await.unwrap();
        let b = map.exec("b", || async { Ok::<_, ()>(2) }).await.unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[tokio::test]
    async fn deferred_result_resolves_once() {
        let deferred: Arc<DeferredResult<u32>> = Arc::new(DeferredResult::new());
        let waiter = deferred.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        deferred.resolve(99).await;
        // A second resolve must not panic or override the first.
        deferred.resolve(100).await;

        assert_eq!(handle.await.unwrap(), Some(99));
    }

    #[tokio::test]
    async fn deferred_result_reject_yields_none() {
        let deferred: DeferredResult<u32> = DeferredResult::new();
        deferred.reject().await;
        assert_eq!(deferred.wait().await, None);
    }

    #[tokio::test]
    async fn latest_greatest_returns_only_the_newest_generation() {
        let cell: Arc<LatestGreatest<u32>> = Arc::new(LatestGreatest::new());

        // Start a slow, stale operation first.
        let stale = cell.clone();
        let stale_handle = tokio::spawn(async move {
            stale
                .exec(|_is_outdated| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                    1u32
                })
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let fresh = cell
            .exec(|_is_outdated| async move { 2u32 })
            .await;
        assert_eq!(fresh, 2);

        // The stale generation's own get_latest() call must also observe
        // the newer, authoritative result rather than its own computation.
        assert_eq!(stale_handle.await.unwrap(), 2);
    }
}
