//! Pool configuration.

use crate::error::{illegal_config, Error, FieldViolation};

/// Ordering policy for the idle store and, symmetrically, the pending
/// queue (see the design-notes resolution in `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Order {
    /// First-in, first-out: the oldest idle ref and the oldest pending
    /// waiter are served first.
    Fifo,
    /// Last-in, first-out: the most recently released ref and the most
    /// recently submitted waiter are served first.
    Lifo,
}

impl Default for Order {
    fn default() -> Self {
        Order::Fifo
    }
}

/// Immutable pool tunables, validated eagerly at build time.
///
/// Collaborator fields (allocator, handlers, predicate, metrics recorder)
/// live on [`crate::PoolBuilder`] rather than here, since they are not
/// plain data: `PoolConfig` captures only what can be serialized and
/// compared.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Maximum number of simultaneously allocated resources.
    pub size_max: usize,
    /// Number of resources eagerly allocated when the pool is built.
    pub initial_size: usize,
    /// Maximum number of borrowers allowed to wait in the pending queue.
    pub max_pending_acquire: usize,
    /// Idle-store / pending-queue ordering policy.
    pub order: Order,
    /// Whether the idle store is partitioned per carrier thread.
    pub affinity: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size_max: 10,
            initial_size: 0,
            max_pending_acquire: usize::MAX,
            order: Order::Fifo,
            affinity: false,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration, collecting every violation found rather
    /// than failing on the first.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        let mut violations = Vec::new();

        if self.size_max == 0 {
            violations.push(FieldViolation::new("size_max", "must be at least 1"));
        }
        if self.initial_size > self.size_max {
            violations.push(FieldViolation::new(
                "initial_size",
                format!("must be <= size_max ({})", self.size_max),
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(illegal_config(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PoolConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_size_max_is_rejected() {
        let cfg = PoolConfig {
            size_max: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn initial_size_above_size_max_is_rejected() {
        let cfg = PoolConfig {
            size_max: 2,
            initial_size: 3,
            ..Default::default()
        };
        match cfg.validate() {
            Err(Error::IllegalConfig(msg)) => assert!(msg.contains("initial_size")),
            other => panic!("expected IllegalConfig, got {other:?}"),
        }
    }

    #[test]
    fn collects_multiple_violations() {
        let cfg = PoolConfig {
            size_max: 0,
            initial_size: 3,
            ..Default::default()
        };
        match cfg.validate() {
            Err(Error::IllegalConfig(msg)) => {
                assert!(msg.contains("size_max"));
                assert!(msg.contains("initial_size"));
            }
            other => panic!("expected IllegalConfig, got {other:?}"),
        }
    }
}
