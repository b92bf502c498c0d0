//! # Kernel
//!
//! Global entry points for a host scheduler that keeps one engine for the
//! whole system.
//!
//! The engine lives behind a spin lock, entered inside a critical section,
//! and every call fails with [`SchedError::NotInitialized`] until [`init`]
//! has run.
//!
//! ## Hook Map
//!
//! ```text
//! host event                         engine entry point
//! ─────────────────────────────────  ──────────────────────────────────
//! run time accounted (tick/dequeue)  on_runtime_accounted()
//! task blocks or yields              on_burst_restart()
//! task wakes with a queued deadline  on_burst_restart_rescale_deadline()
//! fork / clone                       create_task()  (or alloc + on_task_created)
//! exec / policy reset                reset_burst_state()
//! exit, reap                         exit_task(), release_task()
//! operator reads / writes            get_tunable*(), set_tunable*()
//! ```
//!
//! A tunable write that needs a sweep reweights the table in batches of
//! [`SWEEP_BATCH`] tasks, dropping the lock between batches so that ticks
//! are not held off for the whole table.

use log::debug;
use spin::Mutex;

use crate::config::SWEEP_BATCH;
use crate::error::SchedError;
use crate::scheduler::{RunQueue, Scheduler};
use crate::sync;
use crate::task::{CloneFlags, TaskConfig, TaskControlBlock, TaskId};
use crate::tunables::Tunable;
use crate::weights::PrioWeights;

/// The host run-queue as seen by the global engine.
pub type HostRunQueue = &'static mut (dyn RunQueue + Send);

static SCHEDULER: Mutex<Option<Scheduler<HostRunQueue>>> = Mutex::new(None);

/// Run `f` on the global engine with the lock held.
fn with_scheduler<F, T>(f: F) -> Result<T, SchedError>
where
    F: FnOnce(&mut Scheduler<HostRunQueue>) -> Result<T, SchedError>,
{
    sync::critical_section(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().ok_or(SchedError::NotInitialized)?;
        f(sched)
    })
}

/// Install the global engine.
///
/// # Parameters
/// - `weights`: Priority→weight tables, indexed by effective priority.
/// - `rq`: The host run-queue's weight-change hook.
/// - `root`: Configuration of the root task (slot 0).
///
/// A second call replaces the first engine and all of its task state.
pub fn init(weights: &'static PrioWeights, rq: HostRunQueue, root: TaskConfig) {
    let sched = Scheduler::new(weights, rq, root);
    sync::critical_section(|| {
        *SCHEDULER.lock() = Some(sched);
    });
}

/// Whether [`init`] has run.
pub fn is_initialized() -> bool {
    sync::critical_section(|| SCHEDULER.lock().is_some())
}

/// Run `f` on one task's control block, e.g. to update its run-queue
/// bookkeeping.
pub fn with_task<F, T>(id: TaskId, f: F) -> Result<T, SchedError>
where
    F: FnOnce(&mut TaskControlBlock) -> T,
{
    with_scheduler(|s| s.task_mut(id).map(f))
}

/// Effective priority of a task, `0..=39`.
pub fn effective_prio(id: TaskId) -> Result<u8, SchedError> {
    with_scheduler(|s| s.effective_prio(id))
}

/// Credit run time to a task's running burst.
///
/// # Parameters
/// - `id`: The task that ran.
/// - `delta_exec`: Run time in ns since the previous call for this task.
///
/// Called from tick and dequeue accounting. May reweight the task at once
/// if its burst has outgrown its carried penalty.
pub fn on_runtime_accounted(id: TaskId, delta_exec: u64) -> Result<(), SchedError> {
    with_scheduler(|s| s.update_curr(id, delta_exec))
}

/// End a task's burst episode (it blocked or yielded).
pub fn on_burst_restart(id: TaskId) -> Result<(), SchedError> {
    with_scheduler(|s| s.restart_burst(id))
}

/// Like [`on_burst_restart`], and pull the queued deadline back when the
/// priority improves.
pub fn on_burst_restart_rescale_deadline(id: TaskId) -> Result<(), SchedError> {
    with_scheduler(|s| s.restart_burst_rescale_deadline(id))
}

/// Reserve a slot for a task that `parent` is creating. Pair with
/// [`on_task_created`] and [`wake_up_new_task`].
pub fn alloc_task(parent: TaskId, clone_flags: CloneFlags, config: TaskConfig) -> Result<TaskId, SchedError> {
    with_scheduler(|s| s.alloc_task(parent, clone_flags, config))
}

/// Seed the burst state of `child` before it is linked.
pub fn on_task_created(child: TaskId, parent: TaskId, clone_flags: CloneFlags, now: u64) -> Result<(), SchedError> {
    with_scheduler(|s| s.task_fork(child, parent, clone_flags, now))
}

/// Link a task allocated with [`alloc_task`] into its family.
pub fn wake_up_new_task(id: TaskId) -> Result<(), SchedError> {
    with_scheduler(|s| s.wake_up_new_task(id))
}

/// Create a task in one step: allocate, inherit, link.
///
/// # Parameters
/// - `parent`: The creating task.
/// - `clone_flags`: `THREAD` joins `parent`'s thread group; `PARENT` makes
///   the task a sibling of `parent`.
/// - `config`: Static priority, policy and flags of the new task.
/// - `now`: Monotonic clock (ns), used to age inheritance caches.
///
/// # Returns
/// - `Ok(id)`: The new task's slot.
/// - `Err(SchedError::TaskTableFull)`: No free slot (`MAX_TASKS` reached).
/// - `Err(SchedError::NoSuchTask)`: `parent` is not allocated.
pub fn create_task(parent: TaskId, clone_flags: CloneFlags, config: TaskConfig, now: u64) -> Result<TaskId, SchedError> {
    with_scheduler(|s| s.create_task(parent, clone_flags, config, now))
}

/// Forget a task's burst history and caches (exec, policy change).
pub fn reset_burst_state(id: TaskId) -> Result<(), SchedError> {
    with_scheduler(|s| s.reset_task_bore(id))
}

/// Mark a task as exiting; it stops counting towards inheritance averages.
pub fn exit_task(id: TaskId) -> Result<(), SchedError> {
    with_scheduler(|s| s.exit_task(id))
}

/// Free an exited task's slot, reparenting its children to the root.
pub fn release_task(id: TaskId) -> Result<(), SchedError> {
    with_scheduler(|s| s.release_task(id))
}

// ---------------------------------------------------------------------------
// Administrative interface
// ---------------------------------------------------------------------------

/// Read one tunable.
pub fn get_tunable(tunable: Tunable) -> Result<u32, SchedError> {
    with_scheduler(|s| Ok(s.get_tunable(tunable)))
}

/// Validate and apply a tunable write.
///
/// # Returns
/// - `Ok(())`: The value is stored and, unless the tunable is the cache
///   lifetime, every eligible task has been reweighted.
/// - `Err(SchedError::OutOfRange)`: Rejected; nothing changed.
/// - `Err(SchedError::NotInitialized)`: [`init`] has not run.
pub fn set_tunable(tunable: Tunable, value: u32) -> Result<(), SchedError> {
    if !with_scheduler(|s| s.store_tunable(tunable, value))? {
        return Ok(());
    }

    let mut cursor = Some(0);
    let mut batches = 0usize;
    while let Some(start) = cursor {
        cursor = with_scheduler(|s| Ok(s.readjust_task_weights(start, SWEEP_BATCH)))?;
        batches += 1;
    }
    debug!("bore: {} sweep done in {} batches", tunable.name(), batches);
    Ok(())
}

/// Read a tunable by its exported name, e.g. `"sched_burst_smoothness"`.
pub fn get_tunable_by_name(name: &str) -> Result<u32, SchedError> {
    get_tunable(Tunable::from_name(name)?)
}

/// Write a tunable by its exported name. Unknown names fail with
/// [`SchedError::UnknownTunable`].
pub fn set_tunable_by_name(name: &str, value: u32) -> Result<(), SchedError> {
    set_tunable(Tunable::from_name(name)?, value)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
