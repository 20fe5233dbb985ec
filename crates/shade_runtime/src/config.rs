//! Cache layer configuration.

/// Tuning knobs for the adaptive cache layer.
///
/// The defaults match the behaviour the runtime was tuned for; tests lower
/// the thresholds to reach escalation states quickly.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// When false no shadow streams are created and every access is generic.
    pub enabled: bool,
    /// Slots per polymorphic site.
    pub polymorphic_cap: usize,
    /// Misses per code unit before a missing site goes megamorphic.
    pub churn_threshold: usize,
    /// Invalidations of one type before caching for it is disabled.
    pub type_invalidate_limit: u32,
    /// Upper bound for each per-unit slot table.
    pub max_cache_slots: usize,
    /// Calls a unit must receive before it gets a shadow stream.
    pub warmup_calls: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polymorphic_cap: 4,
            churn_threshold: 1000,
            type_invalidate_limit: 1000,
            max_cache_slots: 256,
            warmup_calls: 0,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
