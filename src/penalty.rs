//! # Penalty Transfer Function
//!
//! Turns accumulated burst time into a bounded penalty score, smooths
//! penalties across burst episodes, and rescales deadline distances when a
//! priority change is forgiven.
//!
//! ## Fixed-point conventions
//!
//! Penalties carry [`PENALTY_FRAC_BITS`] fractional bits, so the integer part
//! of a penalty is directly a number of nice levels:
//!
//! ```text
//!   burst_time ──log2──► greed (x.8) ──−offset──► penalty (x.8) ──×scale/1024──► clamp
//! ```
//!
//! All arithmetic is integer-only and saturating by construction.

use crate::config::{MAX_BURST_PENALTY, PENALTY_FRAC_BITS};
use crate::weights::PrioWeights;

/// Base-2 logarithm of `v` in the penalty's fixed point
/// (`PENALTY_FRAC_BITS` fractional bits).
///
/// The integer part is `⌊log2 v⌋`; the fractional part is the bits that
/// follow the highest set bit. `log2_fp(0)` is 0.
#[inline]
fn log2_fp(v: u64) -> u32 {
    const FP: u32 = PENALTY_FRAC_BITS;
    const _: () = assert!(FP >= 1 && FP <= 26);

    if v == 0 {
        return 0;
    }

    let lz = v.leading_zeros();
    let exponent = 63 - lz;
    // Drop the leading one, keep the next `FP` bits.
    let mantissa = ((v << lz) << 1 >> (64 - FP)) as u32;

    (exponent << FP) | mantissa
}

/// Map an accumulated burst time (ns) to a penalty in `[0, MAX_BURST_PENALTY]`.
///
/// Bursts shorter than `2^penalty_offset` ns yield 0; beyond that the
/// penalty grows with the logarithm of the burst, scaled by
/// `penalty_scale / 1024`.
pub fn calc_burst_penalty(burst_time: u64, penalty_offset: u8, penalty_scale: u32) -> u32 {
    let greed = log2_fp(burst_time);
    let tolerance = (penalty_offset as u32) << PENALTY_FRAC_BITS;
    let penalty = greed.saturating_sub(tolerance);
    let scaled = (penalty as u64 * penalty_scale as u64) >> 10;

    scaled.min(MAX_BURST_PENALTY as u64) as u32
}

/// Asymmetric smoothing between burst episodes.
///
/// A lower penalty is accepted immediately. A higher one is approached by
/// `ceil((new - old) / 2^smoothness)` per episode.
#[inline]
pub fn binary_smooth(new: u32, old: u32, smoothness: u8) -> u32 {
    if new <= old {
        return new;
    }

    let increment = new - old;
    let shift = smoothness as u32;
    let divisor = 1u32 << shift;

    old + ((increment + divisor - 1) >> shift)
}

/// `(a * mul) >> shift` with a 128-bit intermediate.
#[inline]
fn mul_u64_u32_shr(a: u64, mul: u32, shift: u32) -> u64 {
    ((a as u128 * mul as u128) >> shift) as u64
}

/// Rescale a virtual-time distance from `old_prio`'s weight to `new_prio`'s.
///
/// Multiplying by `weight[old]` (10-bit fixed point, nice-0 = 1024) and then
/// by `inv_weight[new]` (`2^32 / weight`, consumed with a 22-bit shift)
/// yields `delta * weight[old] / weight[new]`.
pub fn rescale_slice(delta: u64, old_prio: usize, new_prio: usize, weights: &PrioWeights) -> u64 {
    let unscaled = mul_u64_u32_shr(delta, weights.weight(old_prio), 10);
    mul_u64_u32_shr(unscaled, weights.inv_weight(new_prio), 22)
}

/// Rescale a signed `deadline - vruntime` distance, preserving its sign.
///
/// A nonzero distance never truncates to zero.
pub fn rescale_vremain(vremain: i64, old_prio: usize, new_prio: usize, weights: &PrioWeights) -> i64 {
    if vremain == 0 {
        return 0;
    }

    let magnitude = rescale_slice(vremain.unsigned_abs(), old_prio, new_prio, weights);
    let vscaled = magnitude.clamp(1, i64::MAX as u64) as i64;
    if vremain < 0 {
        -vscaled
    } else {
        vscaled
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
