use serde::{Deserialize, Serialize};

/// Scheduler tuning knobs, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker count used by `run_default`. 0 = one per available core.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Live-chunk count above which the source is no longer re-queued.
    /// 0 = auto (4 x worker count).
    #[serde(default = "default_high_water")]
    pub live_chunk_high_water: usize,
}

fn default_workers() -> usize {
    0
}

fn default_high_water() -> usize {
    0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            live_chunk_high_water: default_high_water(),
        }
    }
}

impl SchedulerConfig {
    /// Worker count for `run_default`, falling back to the machine's
    /// parallelism when unset.
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }

    /// Source throttling threshold for a given worker count.
    pub(crate) fn resolved_high_water(&self, nthreads: usize) -> usize {
        if self.live_chunk_high_water == 0 {
            4 * nthreads.max(1)
        } else {
            self.live_chunk_high_water
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.workers, 0);
        assert_eq!(config.live_chunk_high_water, 0);
    }

    #[test]
    fn effective_workers_falls_back_to_parallelism() {
        let config = SchedulerConfig::default();
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn effective_workers_honors_explicit_count() {
        let config = SchedulerConfig {
            workers: 3,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.effective_workers(), 3);
    }

    #[test]
    fn high_water_auto_scales_with_threads() {
        let config = SchedulerConfig::default();
        assert_eq!(config.resolved_high_water(1), 4);
        assert_eq!(config.resolved_high_water(8), 32);
    }

    #[test]
    fn high_water_explicit_wins() {
        let config = SchedulerConfig {
            live_chunk_high_water: 10,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.resolved_high_water(8), 10);
    }
}
