//! `PoolableRef<T>`: a handle wrapping one resource instance plus its
//! per-acquisition metadata.
//!
//! Rust's ownership model already enforces "idle xor acquired xor held by a
//! borrower" at compile time — an idle entry lives only inside the
//! orchestrator's locked state, and a `PoolableRef<T>` is only ever handed to
//! exactly one borrower. The only runtime state this type needs is a single
//! `terminal` flag so repeated `release`/`invalidate` calls, and a plain
//! drop, observe the same terminal state instead of double-destroying the
//! resource.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::Result;
use crate::pool::{do_release, Inner};
use crate::traits::RefMetadata;

/// A resource borrowed from a [`crate::Pool`].
///
/// Dereferences to the underlying resource. Must eventually be returned via
/// [`release`](Self::release) or [`invalidate`](Self::invalidate); if
/// dropped without either — a panic unwinding past it, or an outer future
/// cancelling while it's still held — a best-effort release runs on a
/// spawned task so the resource is never silently leaked.
pub struct PoolableRef<T: Send + 'static> {
    instance: Option<T>,
    meta: RefMetadata,
    inner: Arc<Inner<T>>,
    terminal: bool,
}

impl<T: Send + 'static> PoolableRef<T> {
    pub(crate) fn new(instance: T, meta: RefMetadata, inner: Arc<Inner<T>>) -> Self {
        Self {
            instance: Some(instance),
            meta,
            inner,
            terminal: false,
        }
    }

    /// Per-acquisition bookkeeping: acquire count, allocation age, idle age.
    #[must_use]
    pub fn metadata(&self) -> &RefMetadata {
        &self.meta
    }

    /// Return this resource to the pool. Runs the release handler, then
    /// either recycles or destroys it per the eviction predicate.
    ///
    /// Idempotent: once this or [`invalidate`](Self::invalidate) has run,
    /// later calls to either are no-ops that return `Ok(())`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ReleaseHandlerFailure`] if the release handler
    /// fails; the resource is destroyed regardless.
    pub async fn release(&mut self) -> Result<()> {
        if self.terminal {
            return Ok(());
        }
        self.terminal = true;
        let instance = self
            .instance
            .take()
            .expect("non-terminal PoolableRef always holds its instance");
        do_release(Arc::clone(&self.inner), instance, self.meta, false).await
    }

    /// Destroy this resource unconditionally, bypassing recycling.
    /// Idempotent with the same terminal state as [`release`](Self::release).
    ///
    /// # Errors
    /// Returns [`crate::Error::DestroyHandlerFailure`] if the destroy handler
    /// fails.
    pub async fn invalidate(&mut self) -> Result<()> {
        if self.terminal {
            return Ok(());
        }
        self.terminal = true;
        let instance = self
            .instance
            .take()
            .expect("non-terminal PoolableRef always holds its instance");
        do_release(Arc::clone(&self.inner), instance, self.meta, true).await
    }
}

impl<T: Send + 'static> Deref for PoolableRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.instance
            .as_ref()
            .expect("PoolableRef used after release/invalidate")
    }
}

impl<T: Send + 'static> DerefMut for PoolableRef<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.instance
            .as_mut()
            .expect("PoolableRef used after release/invalidate")
    }
}

impl<T: Send + 'static> Drop for PoolableRef<T> {
    fn drop(&mut self) {
        if self.terminal {
            return;
        }
        if let Some(instance) = self.instance.take() {
            let meta = self.meta;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let _ = do_release(inner, instance, meta, false).await;
            });
        }
    }
}

impl<T: Send + std::fmt::Debug + 'static> std::fmt::Debug for PoolableRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolableRef")
            .field("instance", &self.instance)
            .field("meta", &self.meta)
            .field("terminal", &self.terminal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::PoolBuilder;
    use std::time::Duration;

    #[tokio::test]
    async fn deref_and_deref_mut_reach_instance() {
        let pool = PoolBuilder::new(|| async { Ok::<_, std::convert::Infallible>(0u32) })
            .size_max(1)
            .build()
            .await
            .unwrap();
        let mut r = pool.acquire().await.unwrap();
        *r += 1;
        assert_eq!(*r, 1);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = PoolBuilder::new(|| async { Ok::<_, std::convert::Infallible>(0u32) })
            .size_max(1)
            .build()
            .await
            .unwrap();
        let mut r = pool.acquire().await.unwrap();
        r.release().await.unwrap();
        r.release().await.unwrap();
    }

    #[tokio::test]
    async fn invalidate_after_release_is_a_noop() {
        let pool = PoolBuilder::new(|| async { Ok::<_, std::convert::Infallible>(0u32) })
            .size_max(1)
            .build()
            .await
            .unwrap();
        let mut r = pool.acquire().await.unwrap();
        r.release().await.unwrap();
        r.invalidate().await.unwrap();
        // release recycled the ref; a no-op invalidate must not destroy it.
        assert_eq!(pool.metrics().idle_size, 1);
    }

    #[tokio::test]
    async fn dropping_without_release_recycles_in_background() {
        let pool = PoolBuilder::new(|| async { Ok::<_, std::convert::Infallible>(0u32) })
            .size_max(1)
            .build()
            .await
            .unwrap();
        {
            let _r = pool.acquire().await.unwrap();
        }
        // The background release task needs a moment to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.metrics().idle_size, 1);
    }

    #[tokio::test]
    async fn invalidate_destroys_instead_of_recycling() {
        let pool = PoolBuilder::new(|| async { Ok::<_, std::convert::Infallible>(0u32) })
            .size_max(1)
            .build()
            .await
            .unwrap();
        let mut r = pool.acquire().await.unwrap();
        r.invalidate().await.unwrap();
        let metrics = pool.metrics();
        assert_eq!(metrics.idle_size, 0);
        assert_eq!(metrics.allocated_size, 0);
    }
}
