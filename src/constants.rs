//! Fixed quantities from §3 and §4 of the design: word size, sentinel
//! values, and the defaults for the knobs `Options` may override.

use std::mem::size_of;

/// Architectural word size used for alignment (`A` in the design). We target
/// the native pointer width rather than letting it vary per allocation.
pub const WORD_SIZE: usize = size_of::<usize>();

static_assertions::const_assert!(
    WORD_SIZE == 2 || WORD_SIZE == 4 || WORD_SIZE == 8 || WORD_SIZE == 16
);

/// Default alignment `A`. Equal to the word size unless overridden by
/// `Options`.
pub const DEFAULT_ALIGN: usize = WORD_SIZE;

/// Fixed sentinel claiming "this is one of our blocks". Chosen so that a
/// single flipped byte anywhere in the word changes every byte's parity,
/// making single-byte corruption detectable by inspection.
pub const MAGIC: usize = 0xA110_C0DE_A110_C0DEu64 as usize;

/// Sentinel written at the start of the header region (after `magic`/`size`/
/// flags/diagnostics), distinct from `MAGIC` and `TAIL_CANARY` so the three
/// checks in `block::classify` cannot pass on a coincidental bit pattern.
pub const HEAD_CANARY: usize = 0xDEAD_BEEF_CAFE_BABEu64 as usize;

/// Sentinel written in the trailing word of every block.
pub const TAIL_CANARY: usize = 0xFEED_FACE_5EA1_5EA1u64 as usize;

/// Size-class quantum `C` (§3): class index is `ceil(total / C)`.
pub const DEFAULT_QUANTUM: usize = 128;

/// Default number of segregated free-list bins.
pub const DEFAULT_NUM_BINS: usize = 10;

/// Mapping threshold `M` (§3/§4.7): requests with payload `>= M` bypass the
/// heap and go straight to an anonymous mapping.
pub const DEFAULT_MAP_THRESHOLD: usize = 128 * 1024;

/// Default background collector wakeup period.
pub const DEFAULT_GC_INTERVAL_MS: u64 = 100;
