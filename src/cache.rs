//! # Burst Cache
//!
//! A memoized representative penalty attached to an anchor task (the subtree
//! cache of an ancestor, or the group cache of a thread-group leader). Fork
//! storms read the cached value instead of rescanning the anchor's children
//! or threads on every creation.
//!
//! Fields are atomics updated with relaxed ordering. Two refreshers racing on
//! the same anchor compute the same average from the same task table and
//! simply store it twice; a reader may observe a penalty paired with the
//! previous timestamp, which at worst triggers one extra refresh.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::BURST_CACHE_TIMESTAMP_SHIFT;

#[derive(Debug)]
pub struct BurstCache {
    penalty: AtomicU32,
    /// `now >> BURST_CACHE_TIMESTAMP_SHIFT`, truncated to 32 bits.
    timestamp: AtomicU32,
}

impl BurstCache {
    pub const fn new() -> Self {
        Self {
            penalty: AtomicU32::new(0),
            timestamp: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn penalty(&self) -> u32 {
        self.penalty.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.timestamp.load(Ordering::Relaxed)
    }

    #[inline]
    fn coarse(now: u64) -> u32 {
        (now >> BURST_CACHE_TIMESTAMP_SHIFT) as u32
    }

    /// True when more than `lifetime` ns have passed since the last refresh,
    /// i.e. `now - (timestamp << SHIFT) > lifetime`.
    ///
    /// The coarse part of the age is a wrapping subtraction, so a wrapped
    /// timestamp still ages correctly; the fine bits of `now` are added back
    /// so that lifetimes below one coarse tick are honored.
    pub fn is_expired(&self, now: u64, lifetime: u32) -> bool {
        let coarse_age = Self::coarse(now).wrapping_sub(self.timestamp()) as u64;
        let fine = now & ((1 << BURST_CACHE_TIMESTAMP_SHIFT) - 1);
        let age = (coarse_age << BURST_CACHE_TIMESTAMP_SHIFT) | fine;
        age > lifetime as u64
    }

    /// Store `max(total / count, floor)` stamped with `now`.
    ///
    /// `floor` is the anchor's own penalty; an empty scan averages to 0.
    pub fn refresh(&self, count: u32, total: u32, floor: u32, now: u64) -> u32 {
        let average = if count > 0 { total / count } else { 0 };
        let penalty = average.max(floor);

        self.penalty.store(penalty, Ordering::Relaxed);
        self.timestamp.store(Self::coarse(now), Ordering::Relaxed);
        penalty
    }

    /// Return the cached penalty, refreshing it first with `scan` if expired.
    ///
    /// `scan` yields `(count, total)` over the anchor's eligible candidates.
    pub fn get_or_refresh<F>(&self, now: u64, lifetime: u32, floor: u32, scan: F) -> u32
    where
        F: FnOnce() -> (u32, u32),
    {
        if !self.is_expired(now, lifetime) {
            return self.penalty();
        }

        let (count, total) = scan();
        self.refresh(count, total, floor, now)
    }

    /// Forget the cached value and timestamp.
    pub fn clear(&self) {
        self.penalty.store(0, Ordering::Relaxed);
        self.timestamp.store(0, Ordering::Relaxed);
    }
}

impl Default for BurstCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
