//! Runtime-configurable knobs for a [`crate::heap::Heap`].
//!
//! Grounded on `mmtk-core`'s `util::options::Options`: a plain struct of
//! named values, constructible from compiled-in defaults and independently
//! overridable from the environment. `mmtk-core` uses the `MMTK_` prefix;
//! this crate uses `SCONE_`.

use crate::constants::{
    DEFAULT_ALIGN, DEFAULT_GC_INTERVAL_MS, DEFAULT_MAP_THRESHOLD, DEFAULT_NUM_BINS,
    DEFAULT_QUANTUM,
};

/// Knobs consulted when a [`crate::heap::Heap`] is constructed. Not
/// reconsulted afterwards — a running heap's size-class quantum, bin count,
/// alignment, and map threshold are fixed for its lifetime, same as the
/// original's compile-time constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Size-class quantum `C`.
    pub quantum: usize,
    /// Number of segregated free-list bins.
    pub num_bins: usize,
    /// Mapping threshold `M`: payloads at or above this go through the map
    /// path instead of the heap.
    pub map_threshold: usize,
    /// Alignment `A`. Must be a power of two in `{2, 4, 8, 16}`.
    pub align: usize,
    /// Background collector wakeup period, in milliseconds.
    pub gc_interval_ms: u64,
    /// Whether the collector thread should be started immediately by
    /// `Heap::new`, rather than left for the caller to start with
    /// `enable_gc`.
    pub gc_enabled_at_init: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            quantum: DEFAULT_QUANTUM,
            num_bins: DEFAULT_NUM_BINS,
            map_threshold: DEFAULT_MAP_THRESHOLD,
            align: DEFAULT_ALIGN,
            gc_interval_ms: DEFAULT_GC_INTERVAL_MS,
            gc_enabled_at_init: false,
        }
    }
}

impl Options {
    /// Builds an `Options` from compiled-in defaults, overriding each field
    /// that has a well-formed `SCONE_*` environment variable set. A
    /// malformed value is logged and the default for that field is kept
    /// rather than failing construction.
    pub fn from_env() -> Self {
        let mut opts = Options::default();
        if let Some(v) = Self::parse_env("SCONE_QUANTUM") {
            opts.quantum = v;
        }
        if let Some(v) = Self::parse_env("SCONE_NUM_BINS") {
            opts.num_bins = v;
        }
        if let Some(v) = Self::parse_env("SCONE_MAP_THRESHOLD") {
            opts.map_threshold = v;
        }
        if let Some(v) = Self::parse_env::<usize>("SCONE_ALIGN") {
            if v.is_power_of_two() && (2..=16).contains(&v) {
                opts.align = v;
            } else {
                log::warn!("SCONE_ALIGN={v} is not a power of two in [2,16], ignoring");
            }
        }
        if let Some(v) = Self::parse_env("SCONE_GC_INTERVAL_MS") {
            opts.gc_interval_ms = v;
        }
        if let Ok(v) = std::env::var("SCONE_GC_ENABLED_AT_INIT") {
            opts.gc_enabled_at_init = matches!(v.as_str(), "1" | "true" | "yes");
        }
        opts
    }

    fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
        match std::env::var(name) {
            Ok(val) => match val.parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!("{name}={val} could not be parsed, keeping default");
                    None
                }
            },
            Err(_) => None,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.align.is_power_of_two() || !(2..=16).contains(&self.align) {
            return Err("align must be a power of two in [2, 16]");
        }
        if self.num_bins == 0 {
            return Err("num_bins must be non-zero");
        }
        if self.quantum == 0 {
            return Err("quantum must be non-zero");
        }
        Ok(())
    }
}
