//! Counters for cache behaviour.

/// Per-opcode-family counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpcodeStats {
    /// Specialized fast path succeeded.
    pub hits: u64,
    /// Specialized site saw an unexpected receiver or an empty slot.
    pub slight_misses: u64,
    /// Site was rewritten to its uncachable form.
    pub misses: u64,
    /// Executions of the uncachable form.
    pub uncacheable: u64,
    /// Successful specializations.
    pub entries: u64,
}

/// Why a fill produced no entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UncacheableStats {
    pub custom_getattr: u64,
    pub custom_setattr: u64,
    pub unstable_type: u64,
    pub meta_data_descr: u64,
    pub not_found: u64,
    pub table_full: u64,
    pub polymorphic_full: u64,
    pub churn: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub load_attr: OpcodeStats,
    pub store_attr: OpcodeStats,
    pub load_method: OpcodeStats,
    pub load_global: OpcodeStats,
    pub uncacheable: UncacheableStats,
    /// Classifications that produced a new entry.
    pub fills: u64,
    /// Classifications abandoned because the type changed underneath them.
    pub discarded_fills: u64,
    pub type_invalidations: u64,
    pub global_caches_disabled: u64,
}
