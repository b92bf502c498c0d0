//! # BORE: Burst-Oriented Response Enhancer
//!
//! A burst penalty engine for fair (virtual-deadline) CPU schedulers.
//!
//! ## Overview
//!
//! BORE watches how long each task runs between blocking points and turns
//! long bursts into a lower scheduling weight. Interactive tasks that sleep
//! often keep their static weight; CPU hogs drift towards the light end of
//! the nice curve, and regain weight once they start blocking again.
//!
//! - **Penalty**: `log2(burst)` above a tolerance, scaled, saturated
//! - **Smoothing**: increases are absorbed over several bursts, decreases are immediate
//! - **Inheritance**: new tasks start from the average penalty of their family
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Host fair scheduler                     │
//! ├────────────────────────────────────────────────────────┤
//! │            Global entry points (kernel.rs)              │
//! │  on_runtime_accounted · on_burst_restart · set_tunable │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Inheritance      │  Sync Primitives  │
//! │  scheduler.rs│   inherit.rs       │  sync.rs          │
//! │  ─ update_curr│  ─ parent         │  ─ critical_section│
//! │  ─ restart   │   ─ ancestor hub   │                   │
//! │  ─ task_fork │   ─ thread group   │                   │
//! │  ─ sweep     │   cache.rs         │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │  Penalty math (penalty.rs) · Weights (weights.rs)       │
//! │  Tunables (tunables.rs)                                 │
//! ├────────────────────────────────────────────────────────┤
//! │              Task Model (task.rs)                       │
//! │    TCB · BurstContext · SchedEntity · TaskState         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Penalty Model
//!
//! All penalties are fixed point with 8 fractional bits, capped at
//! `(40 << 8) - 1`. The integer part is the *score*, the number of priority
//! levels a task loses:
//!
//! ```text
//! penalty  = (log2(burst_ns) - offset) × scale       (0 below 2^offset ns)
//! prio     = clamp(static_prio - 100 + score, 0, 39)  (score ignored when disabled)
//! weight   = weights[prio]
//! ```
//!
//! With the defaults (offset 24, scale 1.5) a task running for 16.7 ms is
//! free, and every doubling beyond costs one and a half nice levels.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically sized
//! - **No `alloc`**: pure `core` outside of tests
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS]`, slot 0 is the root task
//! - **Critical sections**: `cortex_m::interrupt::free()` on bare-metal Cortex-M

#![cfg_attr(not(test), no_std)]

pub mod cache;
pub mod config;
pub mod error;
pub mod inherit;
pub mod kernel;
pub mod penalty;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod tunables;
pub mod weights;

pub use error::SchedError;
pub use scheduler::{RunQueue, Scheduler, TaskTable};
pub use task::{CloneFlags, SchedPolicy, TaskConfig, TaskFlags, TaskId};
pub use tunables::{InheritType, Tunable, Tunables};
pub use weights::{PrioWeights, NICE_WEIGHTS};
