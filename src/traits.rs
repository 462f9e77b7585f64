//! Externally supplied collaborators: allocator, release handler, destroy
//! handler, and eviction predicate.
//!
//! The pool treats all four as pluggable, boxed trait objects so that
//! `Pool<T>` itself stays generic only over the resource type. Plain async
//! closures satisfy the async traits via the blanket implementations below.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::BoxError;

/// Per-acquisition bookkeeping handed to the eviction predicate and used to
/// derive the `recordLifetime`/`recordIdleTime` metrics.
#[derive(Debug, Clone, Copy)]
pub struct RefMetadata {
    /// Number of times this resource has been successfully acquired,
    /// including the current acquisition.
    pub acquire_count: u32,
    /// When the underlying resource was allocated.
    pub allocated_at: Instant,
    /// When the resource most recently entered the idle store, if ever.
    pub last_idle_since: Option<Instant>,
}

impl RefMetadata {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            acquire_count: 0,
            allocated_at: now,
            last_idle_since: None,
        }
    }

    /// How long ago the resource was allocated.
    #[must_use]
    pub fn allocation_age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.allocated_at)
    }

    /// How long the resource has been idle, if it currently is.
    #[must_use]
    pub fn idle_age(&self, now: Instant) -> Option<std::time::Duration> {
        self.last_idle_since.map(|since| now.saturating_duration_since(since))
    }
}

/// Produces new resource instances on demand.
#[async_trait]
pub trait Allocator<T>: Send + Sync {
    /// Allocate a fresh resource instance.
    async fn allocate(&self) -> Result<T, BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> Allocator<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn allocate(&self) -> Result<T, BoxError> {
        (self)().await.map_err(|e| Box::new(e) as BoxError)
    }
}

/// Resets a resource between uses. Runs on every `release`, before the
/// eviction predicate is consulted.
#[async_trait]
pub trait ReleaseHandler<T>: Send + Sync {
    /// Reset `instance` to a reusable state.
    async fn release(&self, instance: &mut T) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> ReleaseHandler<T> for F
where
    T: Send + 'static,
    F: Fn(&mut T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn release(&self, instance: &mut T) -> Result<(), BoxError> {
        (self)(instance).await.map_err(|e| Box::new(e) as BoxError)
    }
}

/// Tears a resource down permanently.
#[async_trait]
pub trait DestroyHandler<T>: Send + Sync {
    /// Tear `instance` down. Called exactly once per allocated resource,
    /// whether it is evicted, fails release, or is torn down at shutdown.
    async fn destroy(&self, instance: T) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> DestroyHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn destroy(&self, instance: T) -> Result<(), BoxError> {
        (self)(instance).await.map_err(|e| Box::new(e) as BoxError)
    }
}

/// Decides whether an idle resource should be destroyed rather than
/// recycled. Invoked only just before an idle ref is handed to a borrower
/// and just after a successful release. Must be deterministic and free of
/// observable side effects.
pub trait EvictionPredicate<T>: Send + Sync {
    /// Return `true` to destroy `instance` instead of reusing it.
    fn should_evict(&self, instance: &T, meta: &RefMetadata) -> bool;
}

impl<T, F> EvictionPredicate<T> for F
where
    F: Fn(&T, &RefMetadata) -> bool + Send + Sync,
{
    fn should_evict(&self, instance: &T, meta: &RefMetadata) -> bool {
        (self)(instance, meta)
    }
}

/// An eviction predicate that never evicts; the default when the builder is
/// not given one.
pub struct NeverEvict;

impl<T> EvictionPredicate<T> for NeverEvict {
    fn should_evict(&self, _instance: &T, _meta: &RefMetadata) -> bool {
        false
    }
}

/// A release handler that does nothing; the default when the builder is not
/// given one.
pub struct NoopReleaseHandler;

#[async_trait]
impl<T: Send + 'static> ReleaseHandler<T> for NoopReleaseHandler {
    async fn release(&self, _instance: &mut T) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A destroy handler that simply drops the instance; the default when the
/// builder is not given one.
pub struct DropDestroyHandler;

#[async_trait]
impl<T: Send + 'static> DestroyHandler<T> for DropDestroyHandler {
    async fn destroy(&self, instance: T) -> Result<(), BoxError> {
        drop(instance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_allocator_satisfies_trait() {
        let alloc = || async { Ok::<_, std::convert::Infallible>(42u32) };
        let value = Allocator::<u32>::allocate(&alloc).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn closure_release_handler_satisfies_trait() {
        let handler = |n: &mut u32| {
            *n += 1;
            async move { Ok::<_, std::convert::Infallible>(()) }
        };
        let mut value = 1u32;
        ReleaseHandler::release(&handler, &mut value).await.unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn never_evict_always_false() {
        let meta = RefMetadata::new(Instant::now());
        assert!(!NeverEvict.should_evict(&1u32, &meta));
    }
}
