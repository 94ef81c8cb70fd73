use std::time::Duration;

/// Flush thresholds for an [`Accumulator`](crate::Accumulator). A buffer
/// flushes when any threshold is hit.
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Absolute item count.
    pub max_items: usize,
    /// Maximum time since the first unflushed item.
    pub max_batch_age: Duration,
    /// Maximum idle time since the last added item.
    pub max_idle_age: Duration,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_batch_age: Duration::from_millis(50),
            max_idle_age: Duration::from_millis(10),
        }
    }
}

/// Externally supplied tunables for the framework core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Period of the cleanup sweep; also the deadline past which FAILED,
    /// CORRUPT and stuck records are resubmitted.
    pub cleanup_period: Duration,
    /// Error-count bound for the event-triggered retry path. The periodic
    /// sweep deliberately ignores it.
    pub retry_threshold: u32,
    /// Concurrent per-intent processing chains.
    pub worker_pool_size: usize,
    /// Thresholds for the intent-update accumulator.
    pub accumulator: AccumulatorConfig,
    /// Thresholds for the tracker's resource-message accumulator.
    pub tracker_accumulator: AccumulatorConfig,
    /// Debounce for the full recompilation sweep.
    pub recompile_delay: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cleanup_period: Duration::from_secs(5),
            retry_threshold: 5,
            worker_pool_size: 12,
            accumulator: AccumulatorConfig::default(),
            tracker_accumulator: AccumulatorConfig {
                max_items: 1000,
                max_batch_age: Duration::from_millis(100),
                max_idle_age: Duration::from_millis(10),
            },
            recompile_delay: Duration::from_millis(50),
        }
    }
}
