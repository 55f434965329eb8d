//! Replenishment policy for one-time key pools.
//!
//! Pure decision logic: no I/O, no clock, no RNG. Given the current pool
//! level it answers one question, how many keys to generate right now.

use crate::error::PolicyError;

/// Fraction of capacity below which regeneration is mandatory
const DEFAULT_LOW_WATER_MARK: f64 = 0.10;

/// Fraction of capacity regeneration fills back up to
const DEFAULT_HIGH_WATER_MARK: f64 = 0.80;

/// Hard cap on keys generated in one pass
const DEFAULT_MAX_BATCH: usize = 2000;

/// What a policy evaluation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationPlan {
    /// Pool level is acceptable, do nothing
    Skip,
    /// Generate this many keys now
    Generate {
        /// Number of pairs to create, already clamped to the batch limit
        count: usize,
    },
}

/// Two-watermark replenishment policy.
///
/// Regeneration triggers only when the pool falls below the low watermark,
/// then fills back up to the high watermark. The gap between the two
/// prevents a pool hovering at one threshold from regenerating on every
/// send. `max_batch` bounds the latency and memory of a single pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplenishPolicy {
    low_water_mark: f64,
    high_water_mark: f64,
    max_batch: usize,
}

impl Default for ReplenishPolicy {
    fn default() -> Self {
        Self {
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl ReplenishPolicy {
    /// Build a policy with explicit thresholds.
    ///
    /// # Errors
    ///
    /// - `InvalidWatermarks`: unless `0 < low < high <= 1`
    /// - `ZeroBatch`: if `max_batch` is zero
    pub fn new(
        low_water_mark: f64,
        high_water_mark: f64,
        max_batch: usize,
    ) -> Result<Self, PolicyError> {
        let ordered = low_water_mark > 0.0
            && low_water_mark < high_water_mark
            && high_water_mark <= 1.0;
        if !ordered {
            return Err(PolicyError::InvalidWatermarks {
                low: low_water_mark,
                high: high_water_mark,
            });
        }
        if max_batch == 0 {
            return Err(PolicyError::ZeroBatch);
        }

        Ok(Self { low_water_mark, high_water_mark, max_batch })
    }

    /// Pool level below which regeneration is mandatory.
    pub fn min_threshold(&self, capacity: usize) -> usize {
        (capacity as f64 * self.low_water_mark).floor() as usize
    }

    /// Pool level a regeneration pass fills up to.
    ///
    /// Rounded half up: with the default watermarks an 8192-capacity pool
    /// targets 6554 pairs.
    pub fn target(&self, capacity: usize) -> usize {
        (capacity as f64 * self.high_water_mark).round() as usize
    }

    /// Largest number of keys one pass may generate.
    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Decide whether and how much to regenerate.
    ///
    /// Unforced plans skip whenever the pool sits at or above the low
    /// watermark. Forced plans always do useful work: even a pool at
    /// target gets a full batch (the pool itself clamps at capacity).
    pub fn plan(&self, current: usize, capacity: usize, forced: bool) -> RegenerationPlan {
        if !forced && current >= self.min_threshold(capacity) {
            return RegenerationPlan::Skip;
        }

        let count = self.target(capacity).saturating_sub(current).min(self.max_batch);
        if count == 0 {
            if forced {
                return RegenerationPlan::Generate { count: self.max_batch };
            }
            return RegenerationPlan::Skip;
        }

        RegenerationPlan::Generate { count }
    }
}
