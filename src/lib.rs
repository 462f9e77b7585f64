//! # respool
//!
//! A generic, asynchronous object pool for expensive-to-create resources —
//! database connections, sockets, file handles, large buffers.
//!
//! Borrowers call [`Pool::acquire`], use the returned [`PoolableRef`], and
//! release it; the pool amortizes allocation, enforces an upper bound on
//! concurrent usage via `size_max`, evicts unhealthy resources through a
//! user-supplied [`EvictionPredicate`], and resets resources between uses
//! through a user-supplied [`ReleaseHandler`].
//!
//! ## What the pool owns vs. what you supply
//!
//! The pool owns the acquire/release state machine: the idle store, the
//! pending queue of waiting borrowers, and the orchestration between them
//! under concurrent access, cancellation, timeouts, and shutdown. You supply
//! the four collaborators that give the pool meaning for your resource type:
//! an [`Allocator`], a [`ReleaseHandler`], a [`DestroyHandler`], and
//! optionally an [`EvictionPredicate`] and a [`MetricsRecorder`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use respool::{Pool, Order};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool: Pool<String> = Pool::builder(|| async {
//!     Ok::<_, std::convert::Infallible>(String::from("connection"))
//! })
//! .size_max(10)
//! .initial_size(2)
//! .order(Order::Fifo)
//! .build()
//! .await?;
//!
//! let mut conn = pool.acquire().await?;
//! conn.push_str("-in-use");
//! conn.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Ordering
//!
//! [`Order::Fifo`] serves the oldest idle resource and the oldest waiting
//! borrower first; [`Order::Lifo`] serves the most recently released
//! resource and the most recently submitted waiter first. See `DESIGN.md`
//! for why one `Order` enum governs both the idle store and the pending
//! queue.
//!
//! ## Non-goals
//!
//! Distributed pooling across processes; resource multiplexing (one
//! borrower holds exactly one resource at a time); pool-initiated
//! keep-alive health probes independent of acquire/release; prioritized
//! queueing beyond FIFO/LIFO.

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]

mod config;
mod error;
mod idle_store;
mod metrics;
mod pending;
mod pool;
mod resource;
mod traits;

pub use crate::config::{Order, PoolConfig};
pub use crate::error::{BoxError, Error, FieldViolation, Result};
pub use crate::metrics::{MetricsRecorder, NoopMetricsRecorder, PoolMetrics};
pub use crate::pool::{Pool, PoolBuilder, WithPoolableError};
pub use crate::resource::PoolableRef;
pub use crate::traits::{
    Allocator, DestroyHandler, DropDestroyHandler, EvictionPredicate, NeverEvict,
    NoopReleaseHandler, RefMetadata, ReleaseHandler,
};

#[cfg(feature = "tracing")]
pub use crate::metrics::TracingMetricsRecorder;

#[cfg(feature = "metrics")]
pub use crate::metrics::PrometheusMetricsRecorder;

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
