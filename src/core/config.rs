//! Engine configuration

use std::time::Duration;

/// Configuration for the streaming engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum number of fetch+decode tasks running concurrently.
    pub max_concurrent_loads: usize,
    /// Minimum time between traversal ticks. `update()` calls arriving
    /// earlier are skipped.
    pub update_interval: Duration,
    /// Interval at which the task scheduler sweeps and promotes tasks.
    pub poll_interval: Duration,
    /// Multiplier applied to projected node diameters. Values above 1.0
    /// refine earlier (more detail), below 1.0 later (less detail).
    pub diameter_ratio: f32,
    /// Field-of-view multiplier for the culling frustum. Values above 1.0
    /// keep tiles just outside the view edges streaming.
    pub fov_ratio: f32,
    /// How many times a failed tile load is retried before the tile is
    /// left permanently failed.
    pub fail_retry_count: u32,
    /// When true, subtrees that leave the view are hidden but kept in
    /// memory; when false they are destroyed and refetched on return.
    pub memory_cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 16,
            update_interval: Duration::from_secs_f64(1.0 / 60.0),
            poll_interval: Duration::from_millis(100),
            diameter_ratio: 1.0,
            fov_ratio: 1.0,
            fail_retry_count: 5,
            memory_cache: false,
        }
    }
}
