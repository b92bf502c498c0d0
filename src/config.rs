//! # BORE Configuration
//!
//! Compile-time constants governing the burst penalty engine and the
//! fixed-size task table. Runtime-adjustable knobs live in
//! [`crate::tunables`]; their defaults and bounds are defined here.

/// Maximum number of tasks the task table can hold simultaneously.
/// Slot 0 is always the root task.
pub const MAX_TASKS: usize = 128;

/// Number of nice levels, and therefore the number of entries in the
/// priority→weight tables. Effective priorities live in `0..NICE_WIDTH`.
pub const NICE_WIDTH: usize = 40;

/// Highest effective priority value (lowest scheduling weight).
pub const MAX_EFFECTIVE_PRIO: i32 = NICE_WIDTH as i32 - 1;

/// Load weight of `Idle`-policy tasks, outside the nice curve.
pub const WEIGHT_IDLEPRIO: u32 = 3;

/// `2^32 / WEIGHT_IDLEPRIO`.
pub const WMULT_IDLEPRIO: u32 = 1_431_655_765;

/// Static priorities below this value belong to realtime tasks.
pub const MAX_RT_PRIO: u8 = 100;

/// Static priority of a nice-0 task.
pub const DEFAULT_PRIO: u8 = MAX_RT_PRIO + 20;

/// Width of the fractional part of penalty values, in bits.
pub const PENALTY_FRAC_BITS: u32 = 8;

/// Upper bound for every penalty value. The integer part of a penalty
/// (`penalty >> 8`) therefore never exceeds `NICE_WIDTH - 1`.
pub const MAX_BURST_PENALTY: u32 = ((NICE_WIDTH as u32) << PENALTY_FRAC_BITS) - 1;

/// Maximum number of candidates scanned while refreshing a burst cache.
pub const BURST_CACHE_STOP_COUNT: u32 = 63;

/// Burst cache timestamps are stored as `now >> BURST_CACHE_TIMESTAMP_SHIFT`.
pub const BURST_CACHE_TIMESTAMP_SHIFT: u32 = 16;

/// Number of tasks reweighted per lock hold during a reconciliation sweep
/// driven through [`crate::kernel`].
pub const SWEEP_BATCH: usize = 16;

// ---------------------------------------------------------------------------
// Tunable defaults
// ---------------------------------------------------------------------------

/// Burst penalties feed into effective priority.
pub const DEFAULT_SCHED_BORE: u8 = 1;

/// New processes inherit from the nearest branching ancestor.
pub const DEFAULT_INHERIT_TYPE: u8 = 2;

/// Penalty increases are halved per burst episode.
pub const DEFAULT_SMOOTHNESS: u8 = 1;

/// Bursts shorter than 2^24 ns (~16.7 ms) accrue no penalty.
pub const DEFAULT_PENALTY_OFFSET: u8 = 24;

/// 1.5 in 10-bit fixed point.
pub const DEFAULT_PENALTY_SCALE: u32 = 1536;

/// 75 ms.
pub const DEFAULT_CACHE_LIFETIME_NS: u32 = 75_000_000;

// ---------------------------------------------------------------------------
// Tunable bounds (inclusive maxima; all minima are 0)
// ---------------------------------------------------------------------------

pub const MAX_SCHED_BORE: u32 = 1;
pub const MAX_INHERIT_TYPE: u32 = 2;
pub const MAX_SMOOTHNESS: u32 = 3;
pub const MAX_PENALTY_OFFSET: u32 = (1 << 6) - 1;
pub const MAX_PENALTY_SCALE: u32 = (1 << 12) - 1;
pub const MAX_CACHE_LIFETIME_NS: u32 = u32::MAX;
