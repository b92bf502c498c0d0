//! Errors surfaced to the host scheduler and the administrative interface.

use thiserror::Error;

use crate::task::TaskId;
use crate::tunables::Tunable;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    #[error("task table is full")]
    TaskTableFull,

    #[error("no such task: {0}")]
    NoSuchTask(TaskId),

    #[error("{} = {value} is out of range (0..={max})", .tunable.name())]
    OutOfRange { tunable: Tunable, value: u32, max: u32 },

    #[error("unknown tunable")]
    UnknownTunable,

    #[error("scheduler is not initialized")]
    NotInitialized,
}
