//! # Global Tunables
//!
//! Process-wide knobs of the burst penalty engine. Every write is validated
//! against the tunable's bound before anything changes; a rejected write
//! leaves the configuration untouched.
//!
//! | Name                          | Range       | Default    | Sweep |
//! |-------------------------------|-------------|------------|-------|
//! | `sched_bore`                  | 0–1         | 1          | yes   |
//! | `sched_burst_inherit_type`    | 0–2         | 2          | yes   |
//! | `sched_burst_smoothness`      | 0–3         | 1          | yes   |
//! | `sched_burst_penalty_offset`  | 0–63        | 24         | yes   |
//! | `sched_burst_penalty_scale`   | 0–4095      | 1536       | yes   |
//! | `sched_burst_cache_lifetime`  | 0–u32::MAX  | 75 000 000 | no    |
//!
//! Applying the sweep is the scheduler's job, see
//! [`Scheduler::set_tunable`](crate::scheduler::Scheduler::set_tunable).

use crate::config::*;
use crate::error::SchedError;

/// Which inheritance policy a newly forked process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritType {
    /// Start from a clean slate.
    None = 0,
    /// Average over the creator's children.
    Parent = 1,
    /// Average over the children of the nearest branching ancestor.
    AncestorHub = 2,
}

impl InheritType {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => InheritType::Parent,
            2 => InheritType::AncestorHub,
            _ => InheritType::None,
        }
    }
}

/// Administrative key for one tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tunable {
    Enabled,
    InheritType,
    Smoothness,
    PenaltyOffset,
    PenaltyScale,
    CacheLifetime,
}

impl Tunable {
    pub const ALL: [Tunable; 6] = [
        Tunable::Enabled,
        Tunable::InheritType,
        Tunable::Smoothness,
        Tunable::PenaltyOffset,
        Tunable::PenaltyScale,
        Tunable::CacheLifetime,
    ];

    /// Name under which the tunable is exported to operators.
    pub const fn name(self) -> &'static str {
        match self {
            Tunable::Enabled => "sched_bore",
            Tunable::InheritType => "sched_burst_inherit_type",
            Tunable::Smoothness => "sched_burst_smoothness",
            Tunable::PenaltyOffset => "sched_burst_penalty_offset",
            Tunable::PenaltyScale => "sched_burst_penalty_scale",
            Tunable::CacheLifetime => "sched_burst_cache_lifetime",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, SchedError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or(SchedError::UnknownTunable)
    }

    /// Inclusive upper bound accepted by a write.
    pub const fn max(self) -> u32 {
        match self {
            Tunable::Enabled => MAX_SCHED_BORE,
            Tunable::InheritType => MAX_INHERIT_TYPE,
            Tunable::Smoothness => MAX_SMOOTHNESS,
            Tunable::PenaltyOffset => MAX_PENALTY_OFFSET,
            Tunable::PenaltyScale => MAX_PENALTY_SCALE,
            Tunable::CacheLifetime => MAX_CACHE_LIFETIME_NS,
        }
    }

    /// Whether an accepted write must be followed by a reconciliation sweep.
    pub const fn needs_sweep(self) -> bool {
        !matches!(self, Tunable::CacheLifetime)
    }
}

/// The live configuration. One instance per scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    pub enabled: bool,
    pub inherit_type: InheritType,
    pub smoothness: u8,
    pub penalty_offset: u8,
    pub penalty_scale: u32,
    pub cache_lifetime: u32,
}

impl Tunables {
    pub const fn new() -> Self {
        Self {
            enabled: DEFAULT_SCHED_BORE != 0,
            inherit_type: InheritType::from_raw(DEFAULT_INHERIT_TYPE),
            smoothness: DEFAULT_SMOOTHNESS,
            penalty_offset: DEFAULT_PENALTY_OFFSET,
            penalty_scale: DEFAULT_PENALTY_SCALE,
            cache_lifetime: DEFAULT_CACHE_LIFETIME_NS,
        }
    }

    pub fn get(&self, tunable: Tunable) -> u32 {
        match tunable {
            Tunable::Enabled => self.enabled as u32,
            Tunable::InheritType => self.inherit_type as u32,
            Tunable::Smoothness => self.smoothness as u32,
            Tunable::PenaltyOffset => self.penalty_offset as u32,
            Tunable::PenaltyScale => self.penalty_scale,
            Tunable::CacheLifetime => self.cache_lifetime,
        }
    }

    /// Validate and store a value. Does not reconcile any task.
    pub fn set(&mut self, tunable: Tunable, value: u32) -> Result<(), SchedError> {
        let max = tunable.max();
        if value > max {
            return Err(SchedError::OutOfRange { tunable, value, max });
        }

        // Bounds above guarantee the narrowing casts are lossless.
        match tunable {
            Tunable::Enabled => self.enabled = value != 0,
            Tunable::InheritType => self.inherit_type = InheritType::from_raw(value as u8),
            Tunable::Smoothness => self.smoothness = value as u8,
            Tunable::PenaltyOffset => self.penalty_offset = value as u8,
            Tunable::PenaltyScale => self.penalty_scale = value,
            Tunable::CacheLifetime => self.cache_lifetime = value,
        }
        Ok(())
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
