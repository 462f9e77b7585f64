//! The allocator orchestrator and the public pool facade.
//!
//! `Inner<T>` owns the single logical lock (`parking_lot::Mutex<State<T>>`)
//! guarding the idle store, the pending queue, and the allocated counter, per
//! the concurrency model in the crate's design notes. `Pool<T>` is a cheap
//! `Arc`-backed handle onto it; [`PoolBuilder`] is the only way to construct
//! one.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::{Order, PoolConfig};
use crate::error::{Error, Result};
use crate::idle_store::{IdleEntry, IdleStore};
use crate::metrics::{MetricsRecorder, MetricsState, NoopMetricsRecorder, PoolMetrics};
use crate::pending::{Granted, PendingOutcome, PendingQueue};
use crate::resource::PoolableRef;
use crate::traits::{
    Allocator, DestroyHandler, DropDestroyHandler, EvictionPredicate, NeverEvict,
    NoopReleaseHandler, RefMetadata, ReleaseHandler,
};

#[cfg(feature = "tracing")]
use crate::metrics::TracingMetricsRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    ShutDown,
}

struct State<T: Send + 'static> {
    idle: IdleStore<T>,
    pending: PendingQueue<T>,
    allocated: usize,
    run: RunState,
}

/// Shared pool state. Lives behind an `Arc` so `PoolableRef<T>` can hand
/// itself back without the caller threading a `Pool<T>` through every call.
pub(crate) struct Inner<T: Send + 'static> {
    cfg: PoolConfig,
    allocator: Arc<dyn Allocator<T>>,
    release_handler: Arc<dyn ReleaseHandler<T>>,
    destroy_handler: Arc<dyn DestroyHandler<T>>,
    eviction: Arc<dyn EvictionPredicate<T>>,
    metrics_recorder: Arc<dyn MetricsRecorder>,
    metrics: MetricsState,
    state: Mutex<State<T>>,
}

enum AcquireAction<T: Send + 'static> {
    DestroyThenRetry(T),
    Grant(IdleEntry<T>),
    Allocate,
    Wait(u64, oneshot::Receiver<PendingOutcome<T>>),
}

enum AdmitAction<T> {
    DestroyIdleThenRetry(T),
    GrantIdle(IdleEntry<T>),
    Allocate,
}

/// A request to borrow a resource was cancelled while still waiting: remove
/// it from the pending queue so it is never matched (§4.4).
struct PendingGuard<T: Send + 'static> {
    id: u64,
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.pending.remove(self.id) {
            self.inner.metrics.set_pending(state.pending.len());
        }
    }
}

async fn acquire_internal<T: Send + 'static>(
    inner: &Arc<Inner<T>>,
    timeout: Option<Duration>,
) -> Result<PoolableRef<T>> {
    loop {
        let action = {
            let mut state = inner.state.lock();
            if state.run == RunState::ShutDown {
                return Err(Error::PoolShutDown);
            }
            if let Some(entry) = state.idle.take_next() {
                if inner.eviction.should_evict(&entry.instance, &entry.meta) {
                    state.allocated = state.allocated.saturating_sub(1);
                    inner.metrics.set_allocated(state.allocated);
                    inner.metrics.set_idle(state.idle.len());
                    AcquireAction::DestroyThenRetry(entry.instance)
                } else {
                    AcquireAction::Grant(entry)
                }
            } else if state.allocated < inner.cfg.size_max {
                state.allocated += 1;
                inner.metrics.set_allocated(state.allocated);
                AcquireAction::Allocate
            } else if state.pending.len() >= inner.cfg.max_pending_acquire {
                return Err(Error::PendingQueueFull {
                    max: inner.cfg.max_pending_acquire,
                });
            } else {
                let (id, rx) = state.pending.push();
                inner.metrics.set_pending(state.pending.len());
                AcquireAction::Wait(id, rx)
            }
        };

        match action {
            AcquireAction::DestroyThenRetry(instance) => {
                let start = Instant::now();
                let res = inner.destroy_handler.destroy(instance).await;
                inner.metrics_recorder.record_destroy(start.elapsed());
                if let Err(_e) = res {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "pool: destroy handler failed for evicted idle ref");
                }
                continue;
            }
            AcquireAction::Grant(entry) => return Ok(grant(inner, entry)),
            AcquireAction::Allocate => return allocate_for_caller(inner).await,
            AcquireAction::Wait(id, rx) => return wait_for_pending(inner, id, rx, timeout).await,
        }
    }
}

/// Finish handing an idle entry to its new borrower: bump the acquire count,
/// record the idle-time metric, and build the handle.
fn grant<T: Send + 'static>(inner: &Arc<Inner<T>>, mut entry: IdleEntry<T>) -> PoolableRef<T> {
    entry.meta.acquire_count += 1;
    if let Some(since) = entry.meta.last_idle_since.take() {
        inner
            .metrics_recorder
            .record_idle_time(Instant::now().saturating_duration_since(since));
    }
    inner.metrics_recorder.record_recycled();
    {
        let state = inner.state.lock();
        inner.metrics.set_idle(state.idle.len());
    }
    PoolableRef::new(entry.instance, entry.meta, Arc::clone(inner))
}

/// Allocate a resource for a borrower that currently owns the in-flight
/// allocation (i.e. is not sitting in the pending queue). The allocation
/// itself runs on a detached task so that cancelling this borrower's
/// `acquire` future can never abort it (§4.4): if the caller goes away
/// before the allocator finishes, the freshly built resource is routed
/// through the normal release path instead of being discarded.
async fn allocate_for_caller<T: Send + 'static>(inner: &Arc<Inner<T>>) -> Result<PoolableRef<T>> {
    let (tx, rx) = oneshot::channel::<std::result::Result<(T, RefMetadata), Error>>();
    let inner2 = Arc::clone(inner);
    tokio::spawn(async move {
        let start = Instant::now();
        match inner2.allocator.allocate().await {
            Ok(instance) => {
                inner2
                    .metrics_recorder
                    .record_allocation_success(start.elapsed());
                let mut meta = RefMetadata::new(Instant::now());
                meta.acquire_count = 1;
                if let Err(Ok((instance, meta))) = tx.send(Ok((instance, meta))) {
                    // The caller cancelled between allocation start and now.
                    // The resource was never wasted; release it normally.
                    release_abandoned(&inner2, instance, meta).await;
                }
            }
            Err(e) => {
                inner2
                    .metrics_recorder
                    .record_allocation_error(start.elapsed());
                {
                    let mut state = inner2.state.lock();
                    state.allocated = state.allocated.saturating_sub(1);
                    inner2.metrics.set_allocated(state.allocated);
                }
                let _ = tx.send(Err(Error::allocator(e)));
            }
        }
    });

    match rx.await {
        Ok(Ok((instance, meta))) => Ok(PoolableRef::new(instance, meta, Arc::clone(inner))),
        Ok(Err(e)) => Err(e),
        // The spawned task is still running and will resolve the reservation
        // itself (release or decrement) once it completes; nothing to do here.
        Err(_closed) => Err(Error::PoolShutDown),
    }
}

async fn wait_for_pending<T: Send + 'static>(
    inner: &Arc<Inner<T>>,
    id: u64,
    rx: oneshot::Receiver<PendingOutcome<T>>,
    timeout: Option<Duration>,
) -> Result<PoolableRef<T>> {
    let _guard = PendingGuard {
        id,
        inner: Arc::clone(inner),
    };

    let outcome = match timeout {
        Some(d) => match tokio::time::timeout(d, rx).await {
            Ok(received) => received,
            Err(_elapsed) => return Err(Error::AcquireTimeout(d)),
        },
        None => rx.await,
    };

    match outcome {
        Ok(PendingOutcome::Granted(granted)) => {
            let entry = granted.take();
            Ok(PoolableRef::new(entry.instance, entry.meta, Arc::clone(inner)))
        }
        Ok(PendingOutcome::Failed(e)) => Err(e),
        Err(_sender_dropped) => Err(Error::PoolShutDown),
    }
}

/// Build the callback a [`Granted`] hand-off runs if it is dropped before
/// being received: release `entry` exactly as if the vanished waiter had
/// called `release()` on it immediately.
fn abandon_on_drop<T: Send + 'static>(
    inner: &Arc<Inner<T>>,
) -> impl FnOnce(IdleEntry<T>) + Send + 'static {
    let inner = Arc::clone(inner);
    move |entry: IdleEntry<T>| {
        tokio::spawn(async move {
            release_abandoned(&inner, entry.instance, entry.meta).await;
        });
    }
}

/// Run the release handler and then either recycle or destroy `instance`,
/// surfacing handler failures through `Result` the way [`PoolableRef::release`]
/// and [`PoolableRef::invalidate`] need to.
pub(crate) async fn do_release<T: Send + 'static>(
    inner: Arc<Inner<T>>,
    mut instance: T,
    meta: RefMetadata,
    invalidate: bool,
) -> Result<()> {
    if invalidate {
        return destroy_and_admit(&inner, instance, meta, true).await;
    }

    let start = Instant::now();
    match inner.release_handler.release(&mut instance).await {
        Ok(()) => {
            inner.metrics_recorder.record_reset(start.elapsed());
            let evict = inner.eviction.should_evict(&instance, &meta);
            let shut_down = inner.state.lock().run == RunState::ShutDown;
            if evict || shut_down {
                destroy_and_admit(&inner, instance, meta, false).await
            } else {
                hand_off_or_store(&inner, instance, meta);
                Ok(())
            }
        }
        Err(e) => {
            let surfaced = Error::release_handler(e);
            // The ref is destroyed regardless of the releaser's fate.
            let _ = destroy_and_admit(&inner, instance, meta, false).await;
            Err(surfaced)
        }
    }
}

/// Destroy `instance`, decrement the allocated count, then give a pending
/// waiter (if any) a chance at the slot that just freed up.
async fn destroy_and_admit<T: Send + 'static>(
    inner: &Arc<Inner<T>>,
    instance: T,
    meta: RefMetadata,
    surface_destroy_failure: bool,
) -> Result<()> {
    let start = Instant::now();
    let res = inner.destroy_handler.destroy(instance).await;
    inner.metrics_recorder.record_destroy(start.elapsed());
    inner
        .metrics_recorder
        .record_lifetime(meta.allocation_age(Instant::now()));
    {
        let mut state = inner.state.lock();
        state.allocated = state.allocated.saturating_sub(1);
        inner.metrics.set_allocated(state.allocated);
    }

    try_admit_next_pending(inner).await;

    match res {
        Ok(()) => Ok(()),
        Err(e) => {
            let err = Error::destroy_handler(e);
            if surface_destroy_failure {
                Err(err)
            } else {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "pool: destroy handler failed");
                Ok(())
            }
        }
    }
}

/// Hand `instance` to the head of the pending queue if one is waiting,
/// skipping the idle store entirely per §4.3; otherwise recycle it into the
/// idle store. Retries against the next waiter if the current head has
/// already cancelled out from under us.
fn hand_off_or_store<T: Send + 'static>(inner: &Arc<Inner<T>>, instance: T, meta: RefMetadata) {
    let mut granted = Granted::new(IdleEntry { instance, meta }, abandon_on_drop(inner));
    loop {
        let mut state = inner.state.lock();
        let Some(waiter) = state.pending.pop_next() else {
            let mut entry = granted.take();
            entry.mark_idle(Instant::now());
            state.idle.insert(entry);
            inner.metrics.set_idle(state.idle.len());
            return;
        };
        inner.metrics.set_pending(state.pending.len());
        drop(state);

        match waiter.try_send(PendingOutcome::Granted(granted)) {
            Ok(()) => return,
            Err(PendingOutcome::Granted(g)) => {
                // The waiter cancelled in the gap between pop and send; try
                // the next one (or fall back to the idle store). The send
                // failure returns the value back to us untouched, so no
                // resource ever actually passed through the channel here.
                granted = g;
                continue;
            }
            Err(PendingOutcome::Failed(_)) => unreachable!("hand-off only ever sends Granted"),
        }
    }
}

/// After a destroy frees a slot, try to admit exactly one pending waiter by
/// recycling an idle ref or starting a fresh allocation for them. A no-op if
/// nobody is waiting or the pool has no idle ref and is already at capacity.
async fn try_admit_next_pending<T: Send + 'static>(inner: &Arc<Inner<T>>) {
    loop {
        let action = {
            let mut state = inner.state.lock();
            if state.pending.is_empty() || state.run == RunState::ShutDown {
                return;
            }
            if let Some(entry) = state.idle.take_next() {
                if inner.eviction.should_evict(&entry.instance, &entry.meta) {
                    state.allocated = state.allocated.saturating_sub(1);
                    inner.metrics.set_allocated(state.allocated);
                    AdmitAction::DestroyIdleThenRetry(entry.instance)
                } else {
                    AdmitAction::GrantIdle(entry)
                }
            } else if state.allocated < inner.cfg.size_max {
                state.allocated += 1;
                inner.metrics.set_allocated(state.allocated);
                AdmitAction::Allocate
            } else {
                return;
            }
        };

        match action {
            AdmitAction::DestroyIdleThenRetry(instance) => {
                let start = Instant::now();
                let res = inner.destroy_handler.destroy(instance).await;
                inner.metrics_recorder.record_destroy(start.elapsed());
                if let Err(_e) = res {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "pool: destroy handler failed for evicted idle ref");
                }
                continue;
            }
            AdmitAction::GrantIdle(mut entry) => {
                entry.meta.acquire_count += 1;
                if let Some(since) = entry.meta.last_idle_since.take() {
                    inner
                        .metrics_recorder
                        .record_idle_time(Instant::now().saturating_duration_since(since));
                }
                inner.metrics_recorder.record_recycled();
                let waiter = {
                    let mut state = inner.state.lock();
                    let w = state.pending.pop_next();
                    inner.metrics.set_idle(state.idle.len());
                    inner.metrics.set_pending(state.pending.len());
                    w
                };
                let Some(waiter) = waiter else {
                    // Raced: the last waiter cancelled before we could serve
                    // it. Put the ref back and stop.
                    let mut state = inner.state.lock();
                    entry.mark_idle(Instant::now());
                    state.idle.insert(entry);
                    inner.metrics.set_idle(state.idle.len());
                    return;
                };
                let granted = Granted::new(entry, abandon_on_drop(inner));
                match waiter.try_send(PendingOutcome::Granted(granted)) {
                    Ok(()) => return,
                    Err(PendingOutcome::Granted(g)) => {
                        let mut entry = g.take();
                        let mut state = inner.state.lock();
                        entry.mark_idle(Instant::now());
                        state.idle.insert(entry);
                        inner.metrics.set_idle(state.idle.len());
                        continue;
                    }
                    Err(PendingOutcome::Failed(_)) => unreachable!(),
                }
            }
            AdmitAction::Allocate => {
                let waiter = {
                    let mut state = inner.state.lock();
                    let w = state.pending.pop_next();
                    inner.metrics.set_pending(state.pending.len());
                    w
                };
                let Some(waiter) = waiter else {
                    let mut state = inner.state.lock();
                    state.allocated = state.allocated.saturating_sub(1);
                    inner.metrics.set_allocated(state.allocated);
                    return;
                };
                let inner2 = Arc::clone(inner);
                tokio::spawn(async move {
                    let start = Instant::now();
                    match inner2.allocator.allocate().await {
                        Ok(instance) => {
                            inner2
                                .metrics_recorder
                                .record_allocation_success(start.elapsed());
                            let mut meta = RefMetadata::new(Instant::now());
                            meta.acquire_count = 1;
                            let granted =
                                Granted::new(IdleEntry { instance, meta }, abandon_on_drop(&inner2));
                            if let Err(PendingOutcome::Granted(g)) =
                                waiter.try_send(PendingOutcome::Granted(granted))
                            {
                                let entry = g.take();
                                release_abandoned(&inner2, entry.instance, entry.meta).await;
                            }
                        }
                        Err(e) => {
                            inner2
                                .metrics_recorder
                                .record_allocation_error(start.elapsed());
                            {
                                let mut state = inner2.state.lock();
                                state.allocated = state.allocated.saturating_sub(1);
                                inner2.metrics.set_allocated(state.allocated);
                            }
                            let _ = waiter.try_send(PendingOutcome::Failed(Error::allocator(e)));
                        }
                    }
                });
                return;
            }
        }
    }
}

/// A resource was produced or held for a borrower who is no longer there to
/// receive it (cancelled mid-allocation, or cancelled in the gap between a
/// hand-off send and its delivery). Release it exactly as if the vanished
/// borrower had called `release()` immediately.
async fn release_abandoned<T: Send + 'static>(inner: &Arc<Inner<T>>, mut instance: T, meta: RefMetadata) {
    let start = Instant::now();
    match inner.release_handler.release(&mut instance).await {
        Ok(()) => {
            inner.metrics_recorder.record_reset(start.elapsed());
            let evict = inner.eviction.should_evict(&instance, &meta)
                || inner.state.lock().run == RunState::ShutDown;
            if evict {
                let _ = destroy_and_admit(inner, instance, meta, false).await;
            } else {
                hand_off_or_store(inner, instance, meta);
            }
        }
        Err(_e) => {
            let _ = destroy_and_admit(inner, instance, meta, false).await;
        }
    }
}

/// Error returned by [`Pool::with_poolable`]: either the pool failed to
/// produce a ref, or the supplied closure's own future failed.
#[derive(Debug, thiserror::Error)]
pub enum WithPoolableError<E> {
    /// Failed before the closure ever ran (see [`crate::Error`]).
    #[error(transparent)]
    Pool(#[from] Error),
    /// The closure itself failed; the resource was still released normally.
    #[error("{0}")]
    Inner(E),
}

/// The public contract: `acquire`, `acquire_timeout`, `with_poolable`,
/// `dispose`, `metrics`, `is_disposed`. Cheap to clone — every clone shares
/// the same underlying orchestrator state.
pub struct Pool<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("metrics", &self.metrics()).finish()
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Start building a pool from its allocator, the only collaborator
    /// every pool requires.
    #[must_use]
    pub fn builder<A>(allocator: A) -> PoolBuilder<T>
    where
        A: Allocator<T> + 'static,
    {
        PoolBuilder::new(allocator)
    }

    /// Borrow a resource, waiting indefinitely if none is immediately
    /// available and the pool is already at capacity.
    pub async fn acquire(&self) -> Result<PoolableRef<T>> {
        acquire_internal(&self.inner, None).await
    }

    /// As [`acquire`](Self::acquire), but fails with [`Error::AcquireTimeout`]
    /// if still waiting in the pending queue after `timeout` elapses. A
    /// synchronous grant, or a borrower that ends up owning an in-flight
    /// allocation, never arms this timer (§4.1, §4.5).
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PoolableRef<T>> {
        acquire_internal(&self.inner, Some(timeout)).await
    }

    /// Acquire a resource, run `f` on it, and release it on every
    /// termination path of `f` (success or error). A panic inside `f`, or
    /// this future itself being dropped mid-use, still releases the
    /// resource via [`PoolableRef`]'s drop safety net.
    pub async fn with_poolable<F, Fut, U, E>(&self, f: F) -> std::result::Result<U, WithPoolableError<E>>
    where
        F: FnOnce(&mut T) -> Fut,
        Fut: Future<Output = std::result::Result<U, E>>,
    {
        let mut poolable = self.acquire().await?;
        let outcome = f(&mut poolable).await;
        if let Err(e) = poolable.release().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "pool: release after with_poolable failed");
        }
        outcome.map_err(WithPoolableError::Inner)
    }

    /// Shut the pool down: destroys every idle resource and fails every
    /// pending acquire with [`Error::PoolShutDown`]. Resources already
    /// acquired by a borrower remain usable until their next release, at
    /// which point they are destroyed rather than recycled. Idempotent.
    pub async fn dispose(&self) {
        let already_down = {
            let mut state = self.inner.state.lock();
            if state.run == RunState::ShutDown {
                true
            } else {
                state.run = RunState::ShutDown;
                false
            }
        };
        if already_down {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            state.pending.drain_shutdown();
            self.inner.metrics.set_pending(0);
        }

        loop {
            let entry = {
                let mut state = self.inner.state.lock();
                state.idle.take_next()
            };
            let Some(entry) = entry else { break };
            let start = Instant::now();
            let res = self.inner.destroy_handler.destroy(entry.instance).await;
            self.inner.metrics_recorder.record_destroy(start.elapsed());
            self.inner
                .metrics_recorder
                .record_lifetime(entry.meta.allocation_age(Instant::now()));
            if let Err(_e) = res {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "pool: destroy handler failed during dispose");
            }
            let mut state = self.inner.state.lock();
            state.allocated = state.allocated.saturating_sub(1);
            self.inner.metrics.set_allocated(state.allocated);
            self.inner.metrics.set_idle(state.idle.len());
        }
    }

    /// A point-in-time, read-only snapshot of pool occupancy.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Whether [`dispose`](Self::dispose) has already run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().run == RunState::ShutDown
    }
}

/// Builds a [`Pool`] from its allocator and the rest of its collaborators
/// and tunables. `build` is `async` because, per the crate's error
/// propagation policy, warm-up allocation for `initial_size` resources
/// happens before the pool is handed back, and allocator failures during
/// warm-up leave the pool uncreated.
pub struct PoolBuilder<T: Send + 'static> {
    cfg: PoolConfig,
    allocator: Arc<dyn Allocator<T>>,
    release_handler: Option<Arc<dyn ReleaseHandler<T>>>,
    destroy_handler: Option<Arc<dyn DestroyHandler<T>>>,
    eviction: Option<Arc<dyn EvictionPredicate<T>>>,
    metrics_recorder: Option<Arc<dyn MetricsRecorder>>,
}

impl<T: Send + 'static> PoolBuilder<T> {
    /// Start from the allocator; every other collaborator has a harmless
    /// default (never evict, no-op release, drop-and-forget destroy,
    /// no-op or `tracing`-backed metrics depending on the `tracing`
    /// feature).
    pub fn new<A>(allocator: A) -> Self
    where
        A: Allocator<T> + 'static,
    {
        Self {
            cfg: PoolConfig::default(),
            allocator: Arc::new(allocator),
            release_handler: None,
            destroy_handler: None,
            eviction: None,
            metrics_recorder: None,
        }
    }

    /// Maximum number of simultaneously allocated resources.
    #[must_use]
    pub fn size_max(mut self, n: usize) -> Self {
        self.cfg.size_max = n;
        self
    }

    /// Number of resources eagerly allocated by [`build`](Self::build).
    #[must_use]
    pub fn initial_size(mut self, n: usize) -> Self {
        self.cfg.initial_size = n;
        self
    }

    /// Maximum number of borrowers allowed to wait in the pending queue.
    #[must_use]
    pub fn max_pending_acquire(mut self, n: usize) -> Self {
        self.cfg.max_pending_acquire = n;
        self
    }

    /// Idle-store / pending-queue ordering policy.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.cfg.order = order;
        self
    }

    /// Whether the idle store is partitioned per carrier thread.
    #[must_use]
    pub fn affinity(mut self, on: bool) -> Self {
        self.cfg.affinity = on;
        self
    }

    /// Pure, synchronous decision of whether to destroy a resource instead
    /// of reusing it.
    #[must_use]
    pub fn eviction_predicate<P>(mut self, predicate: P) -> Self
    where
        P: EvictionPredicate<T> + 'static,
    {
        self.eviction = Some(Arc::new(predicate));
        self
    }

    /// Resets a resource between uses.
    #[must_use]
    pub fn release_handler<H>(mut self, handler: H) -> Self
    where
        H: ReleaseHandler<T> + 'static,
    {
        self.release_handler = Some(Arc::new(handler));
        self
    }

    /// Tears a resource down permanently.
    #[must_use]
    pub fn destroy_handler<H>(mut self, handler: H) -> Self
    where
        H: DestroyHandler<T> + 'static,
    {
        self.destroy_handler = Some(Arc::new(handler));
        self
    }

    /// Passive observer of pool lifecycle events.
    #[must_use]
    pub fn metrics_recorder<M>(mut self, recorder: M) -> Self
    where
        M: MetricsRecorder + 'static,
    {
        self.metrics_recorder = Some(Arc::new(recorder));
        self
    }

    /// Validate the configuration, then eagerly allocate `initial_size`
    /// resources before returning the pool.
    ///
    /// # Errors
    /// Returns [`Error::IllegalConfig`] if the tunables are inconsistent, or
    /// the allocator's [`Error::AllocatorFailure`] if warm-up allocation
    /// fails; in the latter case the pool is not created.
    pub async fn build(self) -> Result<Pool<T>> {
        self.cfg.validate()?;

        let partitions = if self.cfg.affinity {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            1
        };

        let inner = Arc::new(Inner {
            cfg: self.cfg.clone(),
            allocator: self.allocator,
            release_handler: self
                .release_handler
                .unwrap_or_else(|| Arc::new(NoopReleaseHandler)),
            destroy_handler: self
                .destroy_handler
                .unwrap_or_else(|| Arc::new(DropDestroyHandler)),
            eviction: self.eviction.unwrap_or_else(|| Arc::new(NeverEvict)),
            metrics_recorder: self
                .metrics_recorder
                .unwrap_or_else(default_metrics_recorder),
            metrics: MetricsState::default(),
            state: Mutex::new(State {
                idle: IdleStore::new(self.cfg.order, self.cfg.affinity, partitions),
                pending: PendingQueue::new(self.cfg.order),
                allocated: 0,
                run: RunState::Running,
            }),
        });

        for _ in 0..self.cfg.initial_size {
            let start = Instant::now();
            let instance = inner
                .allocator
                .allocate()
                .await
                .map_err(Error::allocator)?;
            inner
                .metrics_recorder
                .record_allocation_success(start.elapsed());
            let mut state = inner.state.lock();
            state.allocated += 1;
            inner.metrics.set_allocated(state.allocated);
            state.idle.insert(IdleEntry::fresh(instance, Instant::now()));
            inner.metrics.set_idle(state.idle.len());
        }

        Ok(Pool { inner })
    }
}

fn default_metrics_recorder() -> Arc<dyn MetricsRecorder> {
    #[cfg(feature = "tracing")]
    {
        Arc::new(TracingMetricsRecorder)
    }
    #[cfg(not(feature = "tracing"))]
    {
        Arc::new(NoopMetricsRecorder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_allocator() -> (Arc<AtomicU32>, impl Fn() -> std::future::Ready<std::result::Result<u32, std::convert::Infallible>>) {
        let count = Arc::new(AtomicU32::new(0));
        let count_c = Arc::clone(&count);
        let factory = move || {
            let n = count_c.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok::<_, std::convert::Infallible>(n))
        };
        (count, factory)
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let err = Pool::builder(|| async { Ok::<_, std::convert::Infallible>(1u32) })
            .size_max(0)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalConfig(_)));
    }

    #[tokio::test]
    async fn fifo_smoke_wave_reuse_then_growth() {
        let (created, factory) = counting_allocator();
        let pool = Pool::builder(factory)
            .size_max(3)
            .order(Order::Fifo)
            .eviction_predicate(|_: &u32, meta: &crate::traits::RefMetadata| meta.acquire_count >= 2)
            .build()
            .await
            .unwrap();

        // Wave 1: three fresh allocations.
        let mut wave1 = Vec::new();
        for _ in 0..3 {
            wave1.push(pool.acquire().await.unwrap());
        }
        assert_eq!(created.load(Ordering::SeqCst), 3);
        for mut r in wave1 {
            r.release().await.unwrap();
        }

        // Wave 2: recycled (acquire_count becomes 2, which evicts on the
        // *next* acquire rather than this one).
        let mut wave2 = Vec::new();
        for _ in 0..3 {
            wave2.push(pool.acquire().await.unwrap());
        }
        assert_eq!(created.load(Ordering::SeqCst), 3);
        for mut r in wave2 {
            r.release().await.unwrap();
        }

        // Wave 3: acquire_count would reach 2 on handoff -> evicted, fresh
        // allocations replace all three.
        let mut wave3 = Vec::new();
        for _ in 0..3 {
            wave3.push(pool.acquire().await.unwrap());
        }
        assert_eq!(created.load(Ordering::SeqCst), 6);
        for mut r in wave3 {
            r.release().await.unwrap();
        }
    }

    #[tokio::test]
    async fn lifo_single_slot_reuses_same_ref() {
        let (_created, factory) = counting_allocator();
        let pool = Pool::builder(factory)
            .size_max(1)
            .order(Order::Lifo)
            .build()
            .await
            .unwrap();

        let mut r = pool.acquire().await.unwrap();
        let first_value = *r;
        r.release().await.unwrap();

        let r2 = pool.acquire().await.unwrap();
        assert_eq!(*r2, first_value);
    }

    #[tokio::test]
    async fn pending_queue_full_fails_synchronously() {
        let (_created, factory) = counting_allocator();
        let pool = Pool::builder(factory)
            .size_max(1)
            .max_pending_acquire(1)
            .build()
            .await
            .unwrap();

        let held = pool.acquire().await.unwrap();

        let pool_a = pool.clone();
        let waiter_a = tokio::spawn(async move { pool_a.acquire().await });

        // Give the first waiter time to actually register in the queue.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = pool.acquire().await;
        assert!(matches!(second, Err(Error::PendingQueueFull { max: 1 })));

        drop(held);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiter_a.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_before_release_does_not_leak_or_double_grant() {
        let (_created, factory) = counting_allocator();
        let pool = Pool::builder(factory).size_max(1).build().await.unwrap();

        let mut held = pool.acquire().await.unwrap();

        let pool_b = pool.clone();
        let waiter = tokio::spawn(async move { pool_b.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;

        held.release().await.unwrap();

        let metrics = pool.metrics();
        assert_eq!(metrics.idle_size, 1);
        assert_eq!(metrics.pending_acquire_size, 0);
    }

    #[tokio::test]
    async fn timeout_fires_only_while_pending() {
        let pool = Pool::builder(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, std::convert::Infallible>(0u32)
        })
        .size_max(1)
        .build()
        .await
        .unwrap();

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire_timeout(Duration::from_millis(100)).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = pool.acquire_timeout(Duration::from_millis(100)).await;
        assert!(matches!(second, Err(Error::AcquireTimeout(_))));

        // The first acquire owns the in-flight allocation and must still
        // succeed even though it takes longer than the 100ms timeout.
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_deterministically_on_paused_clock() {
        let pool = Pool::builder(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, std::convert::Infallible>(0u32)
        })
        .size_max(1)
        .build()
        .await
        .unwrap();

        // This acquire owns the in-flight allocation; it must not time out
        // no matter how far the paused clock advances.
        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire_timeout(Duration::from_secs(1)).await }
        });
        tokio::time::advance(Duration::from_millis(1)).await;

        // A second acquire is genuinely pending and must time out exactly
        // at its configured deadline, not a moment before.
        let second = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire_timeout(Duration::from_secs(1)).await }
        });
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(999)).await;
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(matches!(
            second.await.unwrap(),
            Err(Error::AcquireTimeout(_))
        ));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dispose_destroys_idle_and_rejects_new_acquires() {
        let (_created, factory) = counting_allocator();
        let pool = Pool::builder(factory)
            .size_max(3)
            .initial_size(3)
            .build()
            .await
            .unwrap();
        assert_eq!(pool.metrics().idle_size, 3);

        pool.dispose().await;

        assert!(pool.is_disposed());
        assert_eq!(pool.metrics().idle_size, 0);
        assert!(matches!(pool.acquire().await, Err(Error::PoolShutDown)));
    }

    #[tokio::test]
    async fn acquired_ref_outlives_dispose_then_destroys_on_release() {
        let (_created, factory) = counting_allocator();
        let pool = Pool::builder(factory).size_max(1).build().await.unwrap();
        let mut r = pool.acquire().await.unwrap();

        pool.dispose().await;
        r.release().await.unwrap();

        assert_eq!(pool.metrics().allocated_size, 0);
        assert_eq!(pool.metrics().idle_size, 0);
    }

    #[tokio::test]
    async fn with_poolable_releases_on_closure_error() {
        let (_created, factory) = counting_allocator();
        let pool = Pool::builder(factory).size_max(1).build().await.unwrap();

        let result: std::result::Result<(), WithPoolableError<&str>> = pool
            .with_poolable(|_: &mut u32| async { Err("boom") })
            .await;
        assert!(matches!(result, Err(WithPoolableError::Inner("boom"))));
        assert_eq!(pool.metrics().idle_size, 1);
    }
}
