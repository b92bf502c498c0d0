//! # Scheduler
//!
//! The burst penalty engine proper. A [`Scheduler`] owns the task table, the
//! live [`Tunables`], a reference to the host's priority weight tables and
//! the host's run-queue hook, and turns scheduler events into priority and
//! weight changes.
//!
//! ## Event flow
//!
//! ```text
//!   tick / dequeue ──► update_curr() ──► penalty rose? ──► update_penalty()
//!   block / yield  ──► restart_burst[_rescale_deadline]() ─► update_penalty()
//!   fork / clone   ──► task_fork() ──► inheritance policy ──► update_penalty()
//!   admin write    ──► set_tunable() ──► readjust_all_task_weights()
//!
//!   update_penalty(): prio changed? ──► reweight_task_by_prio()
//!                                         ├─ queued:   RunQueue::reweight_entity()
//!                                         └─ sleeping: write se.weight directly
//! ```
//!
//! ## Locking
//!
//! Every mutating method takes `&mut self`: exclusive access stands in for
//! the host's run-queue lock (per-task calls) and task-list lock (sweeps).
//! Inheritance only needs a shared view of the table; burst caches are
//! updated through atomics.

use core::ops::{Deref, DerefMut, Index, IndexMut};

use log::{debug, info, trace, warn};

use crate::config::{MAX_EFFECTIVE_PRIO, MAX_TASKS, WEIGHT_IDLEPRIO, WMULT_IDLEPRIO};
use crate::error::SchedError;
use crate::inherit::{self, InheritFn, TaskTopology};
use crate::penalty::rescale_vremain;
use crate::task::{CloneFlags, TaskConfig, TaskControlBlock, TaskId, TaskState};
use crate::tunables::{Tunable, Tunables};
use crate::weights::PrioWeights;

// ---------------------------------------------------------------------------
// Host run-queue hook
// ---------------------------------------------------------------------------

/// The host run-queue's weight-change primitive.
pub trait RunQueue {
    /// Change the load weight of a task that is currently queued
    /// (`task.se.on_rq`), including `task.se.weight`.
    ///
    /// The host may account pending run time here; burst accounting of
    /// `task` is suppressed for the duration of the call.
    fn reweight_entity(&mut self, task: &mut TaskControlBlock, weight: u64);
}

impl<R: RunQueue + ?Sized> RunQueue for &mut R {
    fn reweight_entity(&mut self, task: &mut TaskControlBlock, weight: u64) {
        (**self).reweight_entity(task, weight)
    }
}

/// Sets `stop_update` for as long as it lives.
struct StopUpdate<'a>(&'a mut TaskControlBlock);

impl<'a> StopUpdate<'a> {
    fn new(task: &'a mut TaskControlBlock) -> Self {
        task.bore.stop_update = true;
        Self(task)
    }
}

impl Deref for StopUpdate<'_> {
    type Target = TaskControlBlock;

    fn deref(&self) -> &TaskControlBlock {
        self.0
    }
}

impl DerefMut for StopUpdate<'_> {
    fn deref_mut(&mut self) -> &mut TaskControlBlock {
        self.0
    }
}

impl Drop for StopUpdate<'_> {
    fn drop(&mut self) {
        self.0.bore.stop_update = false;
    }
}

// ---------------------------------------------------------------------------
// Task table
// ---------------------------------------------------------------------------

const EMPTY_SLOT: TaskControlBlock = TaskControlBlock::EMPTY;

/// Fixed-size task table. Slot 0 holds the root task.
#[derive(Debug)]
pub struct TaskTable {
    tasks: [TaskControlBlock; MAX_TASKS],
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tasks: [EMPTY_SLOT; MAX_TASKS],
        }
    }

    /// Occupy slot 0 with the root task: its own parent and group leader.
    pub fn init_root(&mut self, config: TaskConfig) {
        let root = &mut self.tasks[TaskId::ROOT.index()];
        root.init(TaskId::ROOT, config, TaskId::ROOT, TaskId::ROOT);
        root.state = TaskState::Active;
    }

    /// Claim the first free slot.
    pub fn alloc(&mut self) -> Result<TaskId, SchedError> {
        self.tasks
            .iter()
            .position(|t| t.state == TaskState::Free)
            .map(TaskId)
            .ok_or(SchedError::TaskTableFull)
    }

    pub fn get(&self, id: TaskId) -> Result<&TaskControlBlock, SchedError> {
        self.tasks
            .get(id.index())
            .filter(|t| t.is_allocated())
            .ok_or(SchedError::NoSuchTask(id))
    }

    pub fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskControlBlock, SchedError> {
        self.tasks
            .get_mut(id.index())
            .filter(|t| t.is_allocated())
            .ok_or(SchedError::NoSuchTask(id))
    }

    /// Allocated tasks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock> + '_ {
        self.tasks.iter().filter(|t| t.is_allocated())
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<TaskId> for TaskTable {
    type Output = TaskControlBlock;

    fn index(&self, id: TaskId) -> &TaskControlBlock {
        &self.tasks[id.index()]
    }
}

impl IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        &mut self.tasks[id.index()]
    }
}

impl TaskTopology for TaskTable {
    fn task(&self, id: TaskId) -> &TaskControlBlock {
        &self[id]
    }

    fn children_of(&self, id: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .filter(move |t| t.is_linked() && t.parent == id && t.id != id && t.is_group_leader())
            .map(|t| t.id)
    }

    fn threads_of(&self, leader: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .filter(move |t| t.is_linked() && t.group_leader == leader)
            .map(|t| t.id)
    }
}

// ---------------------------------------------------------------------------
// Priority helpers
// ---------------------------------------------------------------------------

/// Static priority adjusted by the burst score, clamped to `0..=39`.
pub fn effective_prio(task: &TaskControlBlock, tunables: &Tunables) -> u8 {
    let mut prio = task.config.base_prio();

    if tunables.enabled {
        prio += task.bore.score();
    }

    prio.clamp(0, MAX_EFFECTIVE_PRIO) as u8
}

/// Apply the weight of `prio` to `task`. Idle-policy tasks are left alone.
fn reweight_task_by_prio<R: RunQueue>(rq: &mut R, weights: &PrioWeights, task: &mut TaskControlBlock, prio: u8) {
    if task.config.policy.is_idle() {
        return;
    }

    let prio = prio as usize;
    let weight = weights.weight(prio) as u64;

    if task.se.on_rq {
        let mut guard = StopUpdate::new(task);
        rq.reweight_entity(&mut guard, weight);
    } else {
        task.se.weight = weight;
    }

    task.se.inv_weight = weights.inv_weight(prio);
    trace!("bore: {} reweighted to prio {} (weight {})", task.id, prio, weight);
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The burst penalty engine.
///
/// Owns the task table and the live tunables; borrows the host's weight
/// tables for its whole lifetime and drives the host run-queue `R` through
/// [`RunQueue::reweight_entity`] whenever a queued task's weight changes.
pub struct Scheduler<R> {
    /// All tasks. The host drives their lifecycle through the methods below.
    pub tasks: TaskTable,
    tunables: Tunables,
    weights: &'static PrioWeights,
    rq: R,
    inherit_fn: InheritFn<TaskTable>,
}

impl<R: RunQueue> Scheduler<R> {
    /// Start the engine with default tunables and a root task.
    pub fn new(weights: &'static PrioWeights, rq: R, root: TaskConfig) -> Self {
        Self::with_tunables(weights, rq, root, Tunables::new())
    }

    /// Start the engine with explicit tunables, e.g. restored from a
    /// previous boot. The tunables are trusted as given.
    pub fn with_tunables(weights: &'static PrioWeights, rq: R, root: TaskConfig, tunables: Tunables) -> Self {
        let mut sched = Self {
            tasks: TaskTable::new(),
            inherit_fn: inherit::policy_for(tunables.inherit_type),
            tunables,
            weights,
            rq,
        };

        sched.tasks.init_root(root);
        sched.tasks[TaskId::ROOT].bore.reset();
        sched.set_load_weight(TaskId::ROOT);

        info!(
            "bore: burst penalty engine ready (enabled={}, inherit={:?}, smoothness={}, offset={}, scale={})",
            sched.tunables.enabled,
            sched.tunables.inherit_type,
            sched.tunables.smoothness,
            sched.tunables.penalty_offset,
            sched.tunables.penalty_scale,
        );
        sched
    }

    /// Live configuration. Change it through [`set_tunable`](Self::set_tunable).
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// The host run-queue handed to [`new`](Self::new).
    pub fn run_queue(&self) -> &R {
        &self.rq
    }

    pub fn run_queue_mut(&mut self) -> &mut R {
        &mut self.rq
    }

    /// Control block of an allocated task.
    ///
    /// # Returns
    /// - `Ok(tcb)` for any slot that is not free.
    /// - `Err(SchedError::NoSuchTask)` otherwise.
    pub fn task(&self, id: TaskId) -> Result<&TaskControlBlock, SchedError> {
        self.tasks.get(id)
    }

    /// Mutable control block, for the host's own run-queue bookkeeping
    /// (`se.on_rq`, `se.vruntime`, `se.deadline`).
    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskControlBlock, SchedError> {
        self.tasks.get_mut(id)
    }

    /// Effective priority of `id` in `0..=39`, see [`effective_prio`].
    pub fn effective_prio(&self, id: TaskId) -> Result<u8, SchedError> {
        Ok(effective_prio(self.tasks.get(id)?, &self.tunables))
    }

    // -----------------------------------------------------------------------
    // Burst accounting
    // -----------------------------------------------------------------------

    /// Credit `delta_exec` ns of run time to `id`'s running burst.
    ///
    /// A burst whose penalty overtakes the carried one costs priority
    /// immediately, not only when the burst ends.
    pub fn update_curr(&mut self, id: TaskId, delta_exec: u64) -> Result<(), SchedError> {
        let task = self.tasks.get_mut(id)?;
        if task.bore.account(delta_exec, &self.tunables) {
            self.update_penalty(id);
        }
        Ok(())
    }

    /// End `id`'s burst episode and reconcile its priority.
    pub fn restart_burst(&mut self, id: TaskId) -> Result<(), SchedError> {
        let task = self.tasks.get_mut(id)?;
        task.bore.restart(self.tunables.smoothness);
        self.update_penalty(id);
        Ok(())
    }

    /// Like [`restart_burst`](Self::restart_burst), and when the priority
    /// improves, shrink the queued deadline distance to the new weight.
    pub fn restart_burst_rescale_deadline(&mut self, id: TaskId) -> Result<(), SchedError> {
        let task = self.tasks.get(id)?;
        let vremain = task.se.vremain();
        let old_prio = effective_prio(task, &self.tunables);

        self.restart_burst(id)?;

        let weights = self.weights;
        let task = &mut self.tasks[id];
        let new_prio = effective_prio(task, &self.tunables);

        if old_prio > new_prio {
            let vscaled = rescale_vremain(vremain, old_prio as usize, new_prio as usize, weights);
            task.se.deadline = task.se.vruntime.wrapping_add_signed(vscaled);
        }
        Ok(())
    }

    /// Recompute `penalty` and reweight when the effective priority moved.
    fn update_penalty(&mut self, id: TaskId) {
        let task = &mut self.tasks[id];
        let prev_prio = effective_prio(task, &self.tunables);

        task.bore.penalty = if task.is_kthread() {
            0
        } else {
            task.bore.prev_penalty.max(task.bore.curr_penalty)
        };

        let new_prio = effective_prio(task, &self.tunables);
        if new_prio != prev_prio {
            reweight_task_by_prio(&mut self.rq, self.weights, task, new_prio);
        }
    }

    /// Write the initial weight of `id`: the fixed idle weight for
    /// `Idle`-policy tasks, else the weight of its effective priority.
    fn set_load_weight(&mut self, id: TaskId) {
        let task = &mut self.tasks[id];
        if task.config.policy.is_idle() {
            task.se.weight = WEIGHT_IDLEPRIO as u64;
            task.se.inv_weight = WMULT_IDLEPRIO;
            return;
        }
        let prio = effective_prio(task, &self.tunables);
        reweight_task_by_prio(&mut self.rq, self.weights, task, prio);
    }

    /// Zero `id`'s burst state, caches included.
    pub fn reset_task_bore(&mut self, id: TaskId) -> Result<(), SchedError> {
        self.tasks.get_mut(id)?.bore.reset();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task creation
    // -----------------------------------------------------------------------

    /// Seed the burst state of `child`, freshly created by `parent`.
    ///
    /// `child` must still be [`TaskState::New`] so that it is not counted
    /// among the family it inherits from. Threads inherit from their
    /// group; processes from the selected inheritance policy.
    pub fn task_fork(&mut self, child: TaskId, parent: TaskId, clone_flags: CloneFlags, now: u64) -> Result<(), SchedError> {
        self.tasks.get(parent)?;
        let task = self.tasks.get(child)?;
        if !task.is_bore_eligible() || !self.tunables.enabled {
            return Ok(());
        }

        let lifetime = self.tunables.cache_lifetime;
        let inherited = if clone_flags.contains(CloneFlags::THREAD) {
            inherit::inherit_from_thread_group(&self.tasks, parent, now, lifetime)
        } else {
            (self.inherit_fn)(&self.tasks, parent, clone_flags, now, lifetime)
        };

        let ctx = &mut self.tasks[child].bore;
        ctx.prev_penalty = ctx.prev_penalty.max(inherited);
        ctx.curr_penalty = 0;
        ctx.burst_time = 0;
        ctx.stop_update = false;
        ctx.futex_waiting = false;

        self.update_penalty(child);
        trace!("bore: {} forked from {} inheriting {}", child, parent, inherited);
        Ok(())
    }

    /// Allocate a slot for a task created by `parent`. The task starts in
    /// [`TaskState::New`] with the weight of its static priority.
    ///
    /// Threads and sibling clones get `parent`'s real parent; threads join
    /// `parent`'s thread group.
    pub fn alloc_task(&mut self, parent: TaskId, clone_flags: CloneFlags, config: TaskConfig) -> Result<TaskId, SchedError> {
        let creator = self.tasks.get(parent)?;
        let real_parent = if clone_flags.intersects(CloneFlags::THREAD | CloneFlags::PARENT) {
            creator.parent
        } else {
            parent
        };
        let leader = if clone_flags.contains(CloneFlags::THREAD) {
            Some(creator.group_leader)
        } else {
            None
        };

        let id = self.tasks.alloc()?;
        self.tasks[id].init(id, config, real_parent, leader.unwrap_or(id));
        self.set_load_weight(id);
        Ok(id)
    }

    /// Link a new task into its family.
    pub fn wake_up_new_task(&mut self, id: TaskId) -> Result<(), SchedError> {
        let task = self.tasks.get_mut(id)?;
        if task.state == TaskState::New {
            task.state = TaskState::Active;
        }
        Ok(())
    }

    /// Allocate, seed and link a task in one step.
    pub fn create_task(&mut self, parent: TaskId, clone_flags: CloneFlags, config: TaskConfig, now: u64) -> Result<TaskId, SchedError> {
        let id = self.alloc_task(parent, clone_flags, config)?;
        self.task_fork(id, parent, clone_flags, now)?;
        self.wake_up_new_task(id)?;
        Ok(id)
    }

    /// Mark `id` as exiting; it stops counting towards any average.
    pub fn exit_task(&mut self, id: TaskId) -> Result<(), SchedError> {
        let task = self.tasks.get_mut(id)?;
        task.state = TaskState::Exiting;
        task.se.on_rq = false;
        Ok(())
    }

    /// Free `id`'s slot. Its children are adopted by the root task; if it led
    /// a thread group, the oldest remaining thread takes over.
    pub fn release_task(&mut self, id: TaskId) -> Result<(), SchedError> {
        if id == TaskId::ROOT {
            return Err(SchedError::NoSuchTask(id));
        }
        let task = self.tasks.get(id)?;
        let parent = task.parent;
        let was_leader = task.is_group_leader();

        let successor = if was_leader {
            self.tasks.threads_of(id).find(|&t| t != id)
        } else {
            None
        };

        for slot in 0..MAX_TASKS {
            let t = &mut self.tasks[TaskId(slot)];
            if !t.is_allocated() || t.id == id {
                continue;
            }
            if let Some(new_leader) = successor {
                if t.group_leader == id {
                    t.group_leader = new_leader;
                    t.parent = parent;
                }
            }
            if t.parent == id {
                t.parent = TaskId::ROOT;
            }
        }

        self.tasks[id].state = TaskState::Free;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tunables and reconciliation
    // -----------------------------------------------------------------------

    /// Current value of one tunable, as the administrative interface shows it.
    pub fn get_tunable(&self, tunable: Tunable) -> u32 {
        self.tunables.get(tunable)
    }

    /// Validate and apply an administrative write, then reconcile every
    /// eligible task's weight. A rejected write changes nothing.
    pub fn set_tunable(&mut self, tunable: Tunable, value: u32) -> Result<(), SchedError> {
        self.store_tunable(tunable, value)?;
        if tunable.needs_sweep() {
            self.readjust_all_task_weights();
        }
        Ok(())
    }

    /// Validate and store a write without sweeping. Returns whether a sweep
    /// is owed.
    pub(crate) fn store_tunable(&mut self, tunable: Tunable, value: u32) -> Result<bool, SchedError> {
        if let Err(err) = self.tunables.set(tunable, value) {
            warn!("bore: rejected write: {}", err);
            return Err(err);
        }

        if tunable == Tunable::InheritType {
            self.inherit_fn = inherit::policy_for(self.tunables.inherit_type);
        }

        info!("bore: {} = {}", tunable.name(), value);
        Ok(tunable.needs_sweep())
    }

    /// Reapply the priority→weight mapping to eligible tasks in slots
    /// `start..start + limit`. Returns the slot to resume from, if any.
    ///
    /// Penalties are not recomputed; only their mapping to weights is.
    pub fn readjust_task_weights(&mut self, start: usize, limit: usize) -> Option<usize> {
        let end = start.saturating_add(limit).min(MAX_TASKS);

        for slot in start..end {
            let task = &mut self.tasks[TaskId(slot)];
            if !task.is_bore_eligible() {
                continue;
            }
            let prio = effective_prio(task, &self.tunables);
            reweight_task_by_prio(&mut self.rq, self.weights, task, prio);
        }

        (end < MAX_TASKS).then_some(end)
    }

    /// Reapply the priority→weight mapping to every eligible task.
    pub fn readjust_all_task_weights(&mut self) {
        let mut cursor = Some(0);
        while let Some(start) = cursor {
            cursor = self.readjust_task_weights(start, MAX_TASKS);
        }
        debug!("bore: reweighted {} tasks", self.tasks.iter().filter(|t| t.is_bore_eligible()).count());
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CACHE_LIFETIME_NS, MAX_BURST_PENALTY};
    use crate::task::{SchedPolicy, TaskFlags};
    use crate::tunables::InheritType;
    use crate::weights::NICE_WEIGHTS;

    const NOW: u64 = 100_000_000_000;

    /// Records weight changes and replays the host's habit of accounting
    /// pending run time from inside the weight-change primitive.
    #[derive(Default)]
    struct RecordingRunQueue {
        calls: Vec<(TaskId, u64)>,
        pending_exec: u64,
        saw_stop_update: bool,
        reentry_accounted: bool,
    }

    impl RunQueue for RecordingRunQueue {
        fn reweight_entity(&mut self, task: &mut TaskControlBlock, weight: u64) {
            self.saw_stop_update = task.bore.stop_update;
            let burst_before = task.bore.burst_time;
            task.bore.account(self.pending_exec, &Tunables::new());
            self.reentry_accounted = task.bore.burst_time != burst_before;

            task.se.weight = weight;
            self.calls.push((task.id, weight));
        }
    }

    fn sched() -> Scheduler<RecordingRunQueue> {
        Scheduler::new(&NICE_WEIGHTS, RecordingRunQueue::default(), TaskConfig::nice(0))
    }

    fn sched_with(inherit_type: InheritType) -> Scheduler<RecordingRunQueue> {
        let mut s = sched();
        s.set_tunable(Tunable::InheritType, inherit_type as u32).unwrap();
        s
    }

    fn spawn(s: &mut Scheduler<RecordingRunQueue>, parent: TaskId) -> TaskId {
        s.create_task(parent, CloneFlags::empty(), TaskConfig::nice(0), NOW).unwrap()
    }

    /// Burst long enough to cost `levels` whole priority levels with the
    /// default offset (24) and scale (1.5).
    fn burst_for_levels(levels: u32) -> u64 {
        // penalty = (log2(b) - 24) * 256 * 1.5  ⇒  log2(b) = 24 + levels / 1.5
        let steps = (levels * 2 + 2) / 3;
        1u64 << (24 + steps)
    }

    #[test]
    fn test_root_initialized() {
        let s = sched();
        let root = s.task(TaskId::ROOT).unwrap();
        assert_eq!(root.parent, TaskId::ROOT);
        assert_eq!(root.se.weight, 1024);
        assert_eq!(root.se.inv_weight, 4194304);
        assert_eq!(s.effective_prio(TaskId::ROOT), Ok(20));
    }

    #[test]
    fn test_effective_prio_adds_score() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.task_mut(t).unwrap().bore.penalty = 5 << 8;
        assert_eq!(s.effective_prio(t), Ok(25));

        s.task_mut(t).unwrap().bore.penalty = MAX_BURST_PENALTY;
        assert_eq!(s.effective_prio(t), Ok(39), "clamped to the table");

        s.task_mut(t).unwrap().config = TaskConfig::nice(-20);
        s.task_mut(t).unwrap().bore.penalty = 0;
        assert_eq!(s.effective_prio(t), Ok(0));
    }

    #[test]
    fn test_effective_prio_ignores_score_when_disabled() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.task_mut(t).unwrap().bore.penalty = 10 << 8;
        s.set_tunable(Tunable::Enabled, 0).unwrap();
        assert_eq!(s.effective_prio(t), Ok(20));
    }

    #[test]
    fn test_short_bursts_keep_priority() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);

        for _ in 0..10 {
            s.update_curr(t, 1_000_000).unwrap();
        }

        let task = s.task(t).unwrap();
        assert_eq!(task.bore.curr_penalty, 0);
        assert_eq!(task.se.weight, 1024);
    }

    #[test]
    fn test_long_burst_drops_priority_mid_burst() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);

        s.update_curr(t, burst_for_levels(3)).unwrap();

        let task = s.task(t).unwrap();
        assert!(task.bore.score() >= 3, "score {}", task.bore.score());
        let prio = s.effective_prio(t).unwrap() as usize;
        assert!(prio >= 23);
        assert_eq!(task.se.weight, NICE_WEIGHTS.weight(prio) as u64);
        assert_eq!(task.se.inv_weight, NICE_WEIGHTS.inv_weight(prio));
        assert!(s.run_queue().calls.is_empty(), "sleeping task is written directly");
    }

    #[test]
    fn test_queued_task_goes_through_run_queue_with_guard() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.task_mut(t).unwrap().se.on_rq = true;
        s.run_queue_mut().pending_exec = 1 << 40;

        s.update_curr(t, burst_for_levels(6)).unwrap();

        let rq = s.run_queue();
        assert_eq!(rq.calls.len(), 1);
        assert_eq!(rq.calls[0].0, t);
        assert!(rq.saw_stop_update, "stop_update must be set during the weight change");
        assert!(!rq.reentry_accounted, "reentrant accounting must be suppressed");

        let task = s.task(t).unwrap();
        assert!(!task.bore.stop_update, "guard must clear the flag");
        assert_eq!(task.bore.burst_time, burst_for_levels(6));
    }

    #[test]
    fn test_restart_smooths_penalty() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        {
            let task = s.task_mut(t).unwrap();
            task.bore.prev_penalty = 100;
            task.bore.curr_penalty = 250;
            task.bore.burst_time = 1 << 26;
        }

        s.restart_burst(t).unwrap();

        let task = s.task(t).unwrap();
        assert_eq!(task.bore.prev_penalty, 175);
        assert_eq!(task.bore.curr_penalty, 0);
        assert_eq!(task.bore.burst_time, 0);
        assert_eq!(task.bore.penalty, 175);
    }

    #[test]
    fn test_restart_forgives_and_restores_weight() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.update_curr(t, burst_for_levels(8)).unwrap();
        let penalized = s.effective_prio(t).unwrap();
        assert!(penalized > 20);

        // Rises are halved per episode, drops are taken at once.
        s.restart_burst(t).unwrap();
        let after_first = s.task(t).unwrap().bore.prev_penalty;
        assert!(after_first > 0 && after_first < MAX_BURST_PENALTY);

        s.restart_burst(t).unwrap();
        assert_eq!(s.task(t).unwrap().bore.penalty, 0);
        assert_eq!(s.effective_prio(t), Ok(20));
        assert_eq!(s.task(t).unwrap().se.weight, 1024);
    }

    #[test]
    fn test_kthread_never_penalized() {
        let mut s = sched();
        let config = TaskConfig::nice(0).with_flags(TaskFlags::KTHREAD);
        let k = s.create_task(TaskId::ROOT, CloneFlags::empty(), config, NOW).unwrap();

        s.update_curr(k, burst_for_levels(10)).unwrap();
        s.restart_burst(k).unwrap();

        let task = s.task(k).unwrap();
        assert!(task.bore.prev_penalty > 0, "history is still tracked");
        assert_eq!(task.bore.penalty, 0);
        assert_eq!(s.effective_prio(k), Ok(20));
    }

    #[test]
    fn test_idle_policy_gets_idle_weight_on_creation() {
        let mut s = sched();
        let config = TaskConfig::nice(0).with_policy(SchedPolicy::Idle);
        let t = s.create_task(TaskId::ROOT, CloneFlags::empty(), config, NOW).unwrap();

        let task = s.task(t).unwrap();
        assert_eq!(task.se.weight, WEIGHT_IDLEPRIO as u64);
        assert_eq!(task.se.inv_weight, WMULT_IDLEPRIO);
        assert_ne!(task.se.inv_weight, 0, "hosts divide by the weight");
    }

    #[test]
    fn test_idle_policy_is_never_reweighted() {
        let mut s = sched();
        let config = TaskConfig::nice(0).with_policy(SchedPolicy::Idle);
        let t = s.create_task(TaskId::ROOT, CloneFlags::empty(), config, NOW).unwrap();

        s.update_curr(t, burst_for_levels(10)).unwrap();
        s.set_tunable(Tunable::PenaltyScale, 4095).unwrap();

        assert_eq!(s.task(t).unwrap().se.weight, WEIGHT_IDLEPRIO as u64);
        assert_eq!(s.task(t).unwrap().se.inv_weight, WMULT_IDLEPRIO);
        assert!(s.effective_prio(t).unwrap() > 20);
    }

    #[test]
    fn test_rescale_deadline_on_forgiveness() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        {
            let task = s.task_mut(t).unwrap();
            task.bore.prev_penalty = 10 << 8;
            task.bore.penalty = 10 << 8;
            task.se.vruntime = 1_000_000_000;
            task.se.deadline = 1_000_000_000 + 8_000_000;
        }
        assert_eq!(s.effective_prio(t), Ok(30));

        s.restart_burst_rescale_deadline(t).unwrap();

        let task = s.task(t).unwrap();
        assert_eq!(s.effective_prio(t), Ok(20));
        let vremain = task.se.vremain();
        // weight[30] / weight[20] = 110 / 1024
        let expected = 8_000_000 * 110 / 1024;
        assert!(vremain > 0);
        assert!((vremain - expected).abs() <= 1, "{} vs {}", vremain, expected);
    }

    #[test]
    fn test_rescale_deadline_keeps_sign_of_overdue_task() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        {
            let task = s.task_mut(t).unwrap();
            task.bore.prev_penalty = 5 << 8;
            task.bore.penalty = 5 << 8;
            task.se.vruntime = 50_000_000;
            task.se.deadline = 50_000_000 - 2_000_000;
        }

        s.restart_burst_rescale_deadline(t).unwrap();

        let task = s.task(t).unwrap();
        assert!(task.se.vremain() < 0, "overdue stays overdue: {}", task.se.vremain());
        assert!(task.se.vremain() > -2_000_000);
    }

    #[test]
    fn test_rescale_deadline_untouched_without_improvement() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        {
            let task = s.task_mut(t).unwrap();
            task.se.vruntime = 7_000;
            task.se.deadline = 9_000;
            task.bore.curr_penalty = 4 << 8;
            task.bore.burst_time = 1 << 27;
        }

        s.restart_burst_rescale_deadline(t).unwrap();

        let task = s.task(t).unwrap();
        assert_eq!(task.se.deadline, 9_000);
        assert!(task.bore.prev_penalty > 0);
    }

    #[test]
    fn test_fork_inherit_none_starts_clean() {
        let mut s = sched_with(InheritType::None);
        let p = spawn(&mut s, TaskId::ROOT);
        s.task_mut(p).unwrap().bore.penalty = 20 << 8;
        let sibling = spawn(&mut s, p);
        s.task_mut(sibling).unwrap().bore.penalty = 20 << 8;

        let c = spawn(&mut s, p);

        let task = s.task(c).unwrap();
        assert_eq!(task.bore.prev_penalty, 0);
        assert_eq!(task.bore.penalty, 0);
        assert_eq!(s.effective_prio(c), Ok(20));
    }

    #[test]
    fn test_fork_inherits_from_parent_and_reweights_immediately() {
        let mut s = sched_with(InheritType::Parent);
        let p = spawn(&mut s, TaskId::ROOT);
        s.task_mut(p).unwrap().bore.penalty = 4 << 8;
        let a = spawn(&mut s, p);
        s.task_mut(a).unwrap().bore.penalty = 6 << 8;
        let b = spawn(&mut s, p);
        s.task_mut(b).unwrap().bore.penalty = 10 << 8;

        // Past the lifetime of the cache stamped while creating a and b.
        let later = NOW + 2 * DEFAULT_CACHE_LIFETIME_NS as u64;
        let c = s.create_task(p, CloneFlags::empty(), TaskConfig::nice(0), later).unwrap();

        let task = s.task(c).unwrap();
        assert_eq!(task.bore.prev_penalty, 8 << 8);
        assert_eq!(task.bore.curr_penalty, 0);
        assert_eq!(task.bore.burst_time, 0);
        assert_eq!(s.effective_prio(c), Ok(28));
        assert_eq!(task.se.weight, NICE_WEIGHTS.weight(28) as u64, "weight applied before first run");
        assert_eq!(task.state, TaskState::Active);
    }

    #[test]
    fn test_fork_storm_reuses_cache() {
        let lifetime = DEFAULT_CACHE_LIFETIME_NS as u64;
        let mut s = sched_with(InheritType::Parent);
        let p = spawn(&mut s, TaskId::ROOT);
        let a = spawn(&mut s, p);
        s.task_mut(a).unwrap().bore.penalty = 3 << 8;

        // Refreshes the cache: average of {a}.
        let t1 = NOW + 2 * lifetime;
        let first = s.create_task(p, CloneFlags::empty(), TaskConfig::nice(0), t1).unwrap();
        assert_eq!(s.task(first).unwrap().bore.prev_penalty, 3 << 8);

        // Within the cache lifetime a changed sibling is not seen.
        s.task_mut(a).unwrap().bore.penalty = 30 << 8;
        let second = s.create_task(p, CloneFlags::empty(), TaskConfig::nice(0), t1).unwrap();
        assert_eq!(s.task(second).unwrap().bore.prev_penalty, 3 << 8);

        // After expiry it is: a, first and second.
        let t2 = t1 + 2 * lifetime;
        let third = s.create_task(p, CloneFlags::empty(), TaskConfig::nice(0), t2).unwrap();
        assert_eq!(s.task(third).unwrap().bore.prev_penalty, ((30 << 8) + 2 * (3 << 8)) / 3);
    }

    #[test]
    fn test_fork_thread_uses_group_cache() {
        let mut s = sched_with(InheritType::None);
        let leader = spawn(&mut s, TaskId::ROOT);
        s.task_mut(leader).unwrap().bore.penalty = 10;
        let t1 = s.create_task(leader, CloneFlags::THREAD, TaskConfig::nice(0), NOW).unwrap();
        s.task_mut(t1).unwrap().bore.penalty = 20;
        let t2 = s.create_task(leader, CloneFlags::THREAD, TaskConfig::nice(0), NOW).unwrap();
        s.task_mut(t2).unwrap().bore.penalty = 30;
        // The two creations above refreshed the group cache; let it expire.
        let later = NOW + 2 * DEFAULT_CACHE_LIFETIME_NS as u64;

        let t3 = s.create_task(t1, CloneFlags::THREAD, TaskConfig::nice(0), later).unwrap();

        let task = s.task(t3).unwrap();
        assert_eq!(task.group_leader, leader);
        assert_eq!(task.parent, TaskId::ROOT, "threads share the leader's real parent");
        assert_eq!(task.bore.prev_penalty, 20);
        assert_eq!(s.task(leader).unwrap().bore.group.penalty(), 20);
    }

    #[test]
    fn test_threads_are_not_children() {
        let mut s = sched();
        let leader = spawn(&mut s, TaskId::ROOT);
        s.create_task(leader, CloneFlags::THREAD, TaskConfig::nice(0), NOW).unwrap();

        assert_eq!(s.tasks.children_of(TaskId::ROOT).collect::<Vec<_>>(), [leader]);
        assert_eq!(s.tasks.threads_of(leader).count(), 2);
    }

    #[test]
    fn test_fork_property_prev_penalty_at_least_inherited() {
        let mut s = sched_with(InheritType::AncestorHub);
        let hub = spawn(&mut s, TaskId::ROOT);
        for i in 0..5u32 {
            let c = spawn(&mut s, hub);
            s.task_mut(c).unwrap().bore.penalty = i * 700;
        }
        let creator = spawn(&mut s, hub);

        let expected = inherit::inherit_from_ancestor_hub(
            &s.tasks,
            creator,
            CloneFlags::empty(),
            NOW + 10 * DEFAULT_CACHE_LIFETIME_NS as u64,
            DEFAULT_CACHE_LIFETIME_NS,
        );
        let c = s
            .create_task(creator, CloneFlags::empty(), TaskConfig::nice(0), NOW + 10 * DEFAULT_CACHE_LIFETIME_NS as u64)
            .unwrap();

        let task = s.task(c).unwrap();
        assert!(task.bore.prev_penalty >= expected);
        assert_eq!(task.bore.curr_penalty, 0);
        assert_eq!(task.bore.burst_time, 0);
    }

    #[test]
    fn test_fork_skipped_when_disabled_or_realtime() {
        let mut s = sched_with(InheritType::Parent);
        let p = spawn(&mut s, TaskId::ROOT);
        s.task_mut(p).unwrap().bore.penalty = 12 << 8;

        let rt = s
            .create_task(p, CloneFlags::empty(), TaskConfig::nice(0).with_policy(SchedPolicy::Fifo), NOW)
            .unwrap();
        assert_eq!(s.task(rt).unwrap().bore.prev_penalty, 0);

        s.set_tunable(Tunable::Enabled, 0).unwrap();
        let c = spawn(&mut s, p);
        assert_eq!(s.task(c).unwrap().bore.prev_penalty, 0);
    }

    #[test]
    fn test_rejected_tunable_write_changes_nothing() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.task_mut(t).unwrap().se.weight = 777;
        let before = s.tunables().clone();

        assert!(s.set_tunable(Tunable::PenaltyOffset, 64).is_err());

        assert_eq!(s.tunables(), &before);
        assert_eq!(s.task(t).unwrap().se.weight, 777, "no sweep after a rejected write");
    }

    #[test]
    fn test_sweep_converges_after_enable_toggle() {
        let mut s = sched();
        let mut ids = Vec::new();
        for i in 0..6u32 {
            let t = spawn(&mut s, TaskId::ROOT);
            s.task_mut(t).unwrap().bore.penalty = i * (3 << 8);
            s.task_mut(t).unwrap().se.on_rq = i % 2 == 0;
            ids.push(t);
        }

        s.set_tunable(Tunable::Enabled, 0).unwrap();
        for &t in &ids {
            assert_eq!(s.task(t).unwrap().se.weight, 1024, "disabled: all back to nice 0");
        }

        s.set_tunable(Tunable::Enabled, 1).unwrap();
        for &t in &ids {
            let prio = s.effective_prio(t).unwrap() as usize;
            let task = s.task(t).unwrap();
            assert_eq!(task.se.weight, NICE_WEIGHTS.weight(prio) as u64, "task {}", t);
            assert_eq!(task.se.inv_weight, NICE_WEIGHTS.inv_weight(prio));
        }
    }

    #[test]
    fn test_sweep_skips_ineligible_tasks() {
        let mut s = sched();
        let rt = s
            .create_task(TaskId::ROOT, CloneFlags::empty(), TaskConfig::nice(0).with_policy(SchedPolicy::RoundRobin), NOW)
            .unwrap();
        s.task_mut(rt).unwrap().se.weight = 5;
        let z = spawn(&mut s, TaskId::ROOT);
        s.exit_task(z).unwrap();
        s.task_mut(z).unwrap().se.weight = 6;

        s.set_tunable(Tunable::PenaltyScale, 2048).unwrap();

        assert_eq!(s.task(rt).unwrap().se.weight, 5);
        assert_eq!(s.task(z).unwrap().se.weight, 6);
    }

    #[test]
    fn test_cache_lifetime_write_does_not_sweep() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.task_mut(t).unwrap().se.weight = 777;

        s.set_tunable(Tunable::CacheLifetime, 1).unwrap();

        assert_eq!(s.get_tunable(Tunable::CacheLifetime), 1);
        assert_eq!(s.task(t).unwrap().se.weight, 777);
    }

    #[test]
    fn test_inherit_type_write_reselects_policy() {
        let mut s = sched_with(InheritType::Parent);
        let p = spawn(&mut s, TaskId::ROOT);
        s.task_mut(p).unwrap().bore.penalty = 9 << 8;
        let c1 = spawn(&mut s, p);
        assert_eq!(s.task(c1).unwrap().bore.prev_penalty, 9 << 8);

        s.set_tunable(Tunable::InheritType, InheritType::None as u32).unwrap();
        let c2 = spawn(&mut s, p);
        assert_eq!(s.task(c2).unwrap().bore.prev_penalty, 0);
    }

    #[test]
    fn test_chunked_sweep_covers_table() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.task_mut(t).unwrap().bore.penalty = 7 << 8;

        let mut cursor = Some(0);
        let mut rounds = 0;
        while let Some(start) = cursor {
            cursor = s.readjust_task_weights(start, 16);
            rounds += 1;
        }

        assert_eq!(rounds, MAX_TASKS / 16);
        assert_eq!(s.task(t).unwrap().se.weight, NICE_WEIGHTS.weight(27) as u64);
    }

    #[test]
    fn test_release_reparents_children_to_root() {
        let mut s = sched();
        let p = spawn(&mut s, TaskId::ROOT);
        let c = spawn(&mut s, p);

        s.exit_task(p).unwrap();
        s.release_task(p).unwrap();

        assert_eq!(s.task(c).unwrap().parent, TaskId::ROOT);
        assert!(matches!(s.task(p), Err(SchedError::NoSuchTask(id)) if id == p));
        assert_eq!(s.release_task(TaskId::ROOT), Err(SchedError::NoSuchTask(TaskId::ROOT)));
    }

    #[test]
    fn test_release_leader_promotes_thread() {
        let mut s = sched();
        let leader = spawn(&mut s, TaskId::ROOT);
        let t1 = s.create_task(leader, CloneFlags::THREAD, TaskConfig::nice(0), NOW).unwrap();
        let t2 = s.create_task(leader, CloneFlags::THREAD, TaskConfig::nice(0), NOW).unwrap();

        s.exit_task(leader).unwrap();
        s.release_task(leader).unwrap();

        assert_eq!(s.task(t1).unwrap().group_leader, t1);
        assert_eq!(s.task(t2).unwrap().group_leader, t1);
        assert_eq!(s.tasks.children_of(TaskId::ROOT).collect::<Vec<_>>(), [t1]);
    }

    #[test]
    fn test_table_full() {
        let mut s = sched();
        for _ in 1..MAX_TASKS {
            spawn(&mut s, TaskId::ROOT);
        }
        assert_eq!(
            s.create_task(TaskId::ROOT, CloneFlags::empty(), TaskConfig::nice(0), NOW),
            Err(SchedError::TaskTableFull)
        );
    }

    #[test]
    fn test_unknown_task_is_reported() {
        let mut s = sched();
        assert_eq!(s.update_curr(TaskId(77), 1), Err(SchedError::NoSuchTask(TaskId(77))));
        assert_eq!(s.restart_burst(TaskId(MAX_TASKS + 5)), Err(SchedError::NoSuchTask(TaskId(MAX_TASKS + 5))));
    }

    #[test]
    fn test_reset_task_bore() {
        let mut s = sched();
        let t = spawn(&mut s, TaskId::ROOT);
        s.update_curr(t, burst_for_levels(4)).unwrap();
        s.restart_burst(t).unwrap();

        s.reset_task_bore(t).unwrap();

        let task = s.task(t).unwrap();
        assert_eq!(task.bore.prev_penalty, 0);
        assert_eq!(task.bore.penalty, 0);
        assert_eq!(task.bore.burst_time, 0);
    }
}
