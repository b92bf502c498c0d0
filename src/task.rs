//! # Task Control Block
//!
//! Defines the task model seen by the burst penalty engine. The host
//! scheduler owns the lifecycle of every task; the engine reads its
//! scheduling class, family links and fair-scheduling entity, and owns only
//! the [`BurstContext`] embedded in each TCB.
//!
//! ## Burst Model
//!
//! A *burst* is the CPU time a task consumes between two blocking points.
//! While a burst runs, its length maps to `curr_penalty`; when it ends, the
//! penalty is folded into `prev_penalty`:
//!
//! ```text
//!    tick/dequeue ──► burst_time += Δ ──► curr_penalty = f(burst_time)
//!                                              │
//!    block/yield  ──► prev_penalty = smooth(curr_penalty, prev_penalty)
//!                                              │
//!                     penalty = max(prev, curr) ──► score = penalty >> 8
//! ```

use core::fmt;

use bitflags::bitflags;

use crate::cache::BurstCache;
use crate::config::{DEFAULT_PRIO, MAX_RT_PRIO, PENALTY_FRAC_BITS};
use crate::penalty::{binary_smooth, calc_burst_penalty};
use crate::tunables::Tunables;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Index of a task in the scheduler's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// The root task. It is its own parent.
    pub const ROOT: TaskId = TaskId(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a task-table slot.
///
/// ```text
///   ┌──────┐  alloc  ┌─────┐  wake_up_new  ┌────────┐  exit  ┌─────────┐
///   │ Free │ ──────► │ New │ ────────────► │ Active │ ─────► │ Exiting │
///   └──────┘         └─────┘               └────────┘        └─────────┘
///       ▲                                                         │
///       └─────────────────────────── release ─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Unused slot.
    Free,
    /// Allocated and being set up; not yet linked into its parent's family.
    New,
    /// Linked and alive.
    Active,
    /// Has begun exiting; still linked until released.
    Exiting,
}

// ---------------------------------------------------------------------------
// Scheduling policy
// ---------------------------------------------------------------------------

/// Scheduling policy of a task. Only the fair policies are eligible for
/// burst penalties and inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Default time-sharing policy.
    Normal,
    /// Fair class, for non-interactive throughput work.
    Batch,
    /// Fair class with the fixed idle weight; never reweighted by the engine.
    Idle,
    /// Realtime, first-in first-out. Ignored by the engine.
    Fifo,
    /// Realtime, round-robin. Ignored by the engine.
    RoundRobin,
}

impl SchedPolicy {
    /// Whether the policy is served by the fair scheduling class.
    #[inline]
    pub const fn is_fair(self) -> bool {
        matches!(self, SchedPolicy::Normal | SchedPolicy::Batch | SchedPolicy::Idle)
    }

    #[inline]
    pub const fn is_idle(self) -> bool {
        matches!(self, SchedPolicy::Idle)
    }
}

bitflags! {
    /// Per-task attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Kernel-internal task; never penalized.
        const KTHREAD = 1 << 0;
    }
}

bitflags! {
    /// Flags describing how a new task relates to its creator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CloneFlags: u64 {
        /// New thread in the creator's thread group.
        const THREAD = 1 << 0;
        /// Attach as a sibling of the creator instead of as its child.
        const PARENT = 1 << 1;
    }
}

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// Scheduling attributes the host sets when a task is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Static priority, `MAX_RT_PRIO..MAX_RT_PRIO + 40` for fair tasks.
    pub static_prio: u8,
    pub policy: SchedPolicy,
    pub flags: TaskFlags,
}

impl TaskConfig {
    /// A normal fair task at the given nice level (-20..=19).
    pub const fn nice(nice: i8) -> Self {
        Self {
            static_prio: (DEFAULT_PRIO as i16 + nice as i16) as u8,
            policy: SchedPolicy::Normal,
            flags: TaskFlags::empty(),
        }
    }

    /// Same configuration under another scheduling policy.
    pub const fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Same configuration with `flags` replacing the current attribute flags.
    pub const fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Static priority relative to the fair range (0 = nice -20).
    #[inline]
    pub const fn base_prio(&self) -> i32 {
        self.static_prio as i32 - MAX_RT_PRIO as i32
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::nice(0)
    }
}

// ---------------------------------------------------------------------------
// Fair-scheduling entity (owned by the host run-queue)
// ---------------------------------------------------------------------------

/// The host's fair-scheduling bookkeeping for one task.
///
/// The engine rescales `deadline` and writes `weight`/`inv_weight`; every
/// other use of these fields belongs to the host run-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedEntity {
    /// Whether the task is currently queued on a run-queue.
    pub on_rq: bool,
    pub vruntime: u64,
    pub deadline: u64,
    pub weight: u64,
    pub inv_weight: u32,
}

impl SchedEntity {
    pub const fn new() -> Self {
        Self {
            on_rq: false,
            vruntime: 0,
            deadline: 0,
            weight: 0,
            inv_weight: 0,
        }
    }

    /// Signed virtual-time distance to the deadline.
    #[inline]
    pub fn vremain(&self) -> i64 {
        self.deadline.wrapping_sub(self.vruntime) as i64
    }
}

impl Default for SchedEntity {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Burst context
// ---------------------------------------------------------------------------

/// Per-task burst accounting state. All penalties are in
/// `[0, MAX_BURST_PENALTY]` with 8 fractional bits.
#[derive(Debug)]
pub struct BurstContext {
    /// Run time accumulated since the last burst restart (ns).
    pub burst_time: u64,
    /// Penalty of the running burst; recomputed on every accounted slice.
    pub curr_penalty: u32,
    /// Smoothed penalty carried across burst episodes.
    pub prev_penalty: u32,
    /// Penalty used for priority: `max(prev_penalty, curr_penalty)`.
    pub penalty: u32,
    /// Set while a weight change is in flight.
    pub stop_update: bool,
    pub futex_waiting: bool,
    /// Average penalty of this task's children (or branching descendants).
    pub subtree: BurstCache,
    /// Average penalty of this task's thread group; used on leaders only.
    pub group: BurstCache,
}

impl BurstContext {
    pub const fn new() -> Self {
        Self {
            burst_time: 0,
            curr_penalty: 0,
            prev_penalty: 0,
            penalty: 0,
            stop_update: false,
            futex_waiting: false,
            subtree: BurstCache::new(),
            group: BurstCache::new(),
        }
    }

    /// Penalty expressed in priority levels.
    #[inline]
    pub const fn score(&self) -> i32 {
        (self.penalty >> PENALTY_FRAC_BITS) as i32
    }

    /// Credit `delta_exec` ns of run time to the running burst.
    ///
    /// Returns `true` when the burst's penalty now exceeds the carried one,
    /// i.e. when the task's priority may have to drop right away. Does
    /// nothing while a weight change is in flight.
    pub fn account(&mut self, delta_exec: u64, tunables: &Tunables) -> bool {
        if self.stop_update {
            return false;
        }

        self.burst_time = self.burst_time.saturating_add(delta_exec);
        self.curr_penalty =
            calc_burst_penalty(self.burst_time, tunables.penalty_offset, tunables.penalty_scale);

        self.curr_penalty > self.prev_penalty
    }

    /// Close the running burst: fold its penalty into `prev_penalty` and
    /// start a new, empty one.
    pub fn restart(&mut self, smoothness: u8) {
        self.prev_penalty = binary_smooth(self.curr_penalty, self.prev_penalty, smoothness);
        self.curr_penalty = 0;
        self.burst_time = 0;
    }

    /// Zero every field, caches included.
    pub fn reset(&mut self) {
        self.burst_time = 0;
        self.curr_penalty = 0;
        self.prev_penalty = 0;
        self.penalty = 0;
        self.stop_update = false;
        self.futex_waiting = false;
        self.subtree.clear();
        self.group.clear();
    }
}

impl Default for BurstContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// One slot of the task table.
///
/// Family links are plain [`TaskId`]s into the same table; a task never
/// owns its relatives.
#[derive(Debug)]
pub struct TaskControlBlock {
    pub id: TaskId,
    pub state: TaskState,
    pub config: TaskConfig,
    /// Real parent. The root task points at itself.
    pub parent: TaskId,
    /// Thread-group leader; equal to `id` for single-threaded processes.
    pub group_leader: TaskId,
    pub se: SchedEntity,
    pub bore: BurstContext,
}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static table.
    pub const EMPTY: Self = Self {
        id: TaskId(0),
        state: TaskState::Free,
        config: TaskConfig::nice(0),
        parent: TaskId(0),
        group_leader: TaskId(0),
        se: SchedEntity::new(),
        bore: BurstContext::new(),
    };

    /// Occupy the slot for a freshly allocated task.
    pub fn init(&mut self, id: TaskId, config: TaskConfig, parent: TaskId, group_leader: TaskId) {
        self.id = id;
        self.state = TaskState::New;
        self.config = config;
        self.parent = parent;
        self.group_leader = group_leader;
        self.se = SchedEntity::new();
        self.bore.reset();
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state != TaskState::Free
    }

    /// Linked into its parent's family (visible to family walks).
    #[inline]
    pub fn is_linked(&self) -> bool {
        matches!(self.state, TaskState::Active | TaskState::Exiting)
    }

    #[inline]
    pub fn is_group_leader(&self) -> bool {
        self.group_leader == self.id
    }

    #[inline]
    pub fn is_kthread(&self) -> bool {
        self.config.flags.contains(TaskFlags::KTHREAD)
    }

    /// Exists, runs in the fair class and has not begun exiting.
    #[inline]
    pub fn is_bore_eligible(&self) -> bool {
        matches!(self.state, TaskState::New | TaskState::Active) && self.config.policy.is_fair()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
