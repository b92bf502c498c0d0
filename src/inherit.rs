//! # Inheritance Policies
//!
//! Decide the penalty a newly created task starts with, so that a fork storm
//! from a bursty parent cannot escape its history by spawning fresh tasks.
//!
//! | Policy                      | Anchor                         | Averaged over                    |
//! |-----------------------------|--------------------------------|----------------------------------|
//! | [`inherit_none`]            | none                           | nothing                          |
//! | [`inherit_from_parent`]     | creator (or its parent)        | direct children                  |
//! | [`inherit_from_ancestor_hub`] | nearest branching ancestor   | first branching descendant of each child |
//! | [`inherit_from_thread_group`] | thread-group leader          | all threads of the group         |
//!
//! Each anchor memoizes its average in a [`BurstCache`](crate::cache::BurstCache),
//! refreshed only once it expires. Every scan stops after
//! [`BURST_CACHE_STOP_COUNT`] eligible candidates, and every family walk is
//! bounded by the size of the task table, so a concurrent change to the
//! family structure can skew one average but never stall a fork.

use crate::config::{BURST_CACHE_STOP_COUNT, MAX_TASKS};
use crate::task::{CloneFlags, TaskControlBlock, TaskId};
use crate::tunables::InheritType;

/// Read-only view of the host's task family structure.
pub trait TaskTopology {
    fn task(&self, id: TaskId) -> &TaskControlBlock;

    /// Real parent of `id`. The root is its own parent.
    fn parent_of(&self, id: TaskId) -> TaskId {
        self.task(id).parent
    }

    /// Direct children of `id` in creation order. Threads other than a
    /// group leader are not children of anyone.
    fn children_of(&self, id: TaskId) -> impl Iterator<Item = TaskId> + '_;

    /// Every thread of the group led by `leader`, leader included.
    fn threads_of(&self, leader: TaskId) -> impl Iterator<Item = TaskId> + '_;

    /// Number of children of `id`, counting at most two.
    fn count_children_upto2(&self, id: TaskId) -> u32 {
        self.children_of(id).take(2).count() as u32
    }

    /// First child of `id`, if any.
    fn first_child(&self, id: TaskId) -> Option<TaskId> {
        self.children_of(id).next()
    }
}

/// Signature shared by the selectable process inheritance policies.
pub type InheritFn<T> = fn(topo: &T, parent: TaskId, clone_flags: CloneFlags, now: u64, lifetime: u32) -> u32;

/// Select the policy for an [`InheritType`].
pub fn policy_for<T: TaskTopology>(inherit_type: InheritType) -> InheritFn<T> {
    match inherit_type {
        InheritType::None => inherit_none::<T>,
        InheritType::Parent => inherit_from_parent::<T>,
        InheritType::AncestorHub => inherit_from_ancestor_hub::<T>,
    }
}

/// Sum eligible penalties over `candidates`, stopping after the scan cap.
fn scan<T, I>(topo: &T, candidates: I) -> (u32, u32)
where
    T: TaskTopology,
    I: Iterator<Item = TaskId>,
{
    let mut count = 0u32;
    let mut total = 0u32;

    for id in candidates {
        if count >= BURST_CACHE_STOP_COUNT {
            break;
        }
        let task = topo.task(id);
        if !task.is_bore_eligible() {
            continue;
        }
        count += 1;
        // 63 × MAX_BURST_PENALTY fits comfortably in u32.
        total += task.bore.penalty;
    }

    (count, total)
}

pub fn inherit_none<T: TaskTopology>(_topo: &T, _parent: TaskId, _flags: CloneFlags, _now: u64, _lifetime: u32) -> u32 {
    0
}

/// Average over the anchor's direct children, floored by the anchor itself.
pub fn inherit_from_parent<T: TaskTopology>(
    topo: &T,
    parent: TaskId,
    clone_flags: CloneFlags,
    now: u64,
    lifetime: u32,
) -> u32 {
    let anchor = if clone_flags.contains(CloneFlags::PARENT) {
        topo.parent_of(parent)
    } else {
        parent
    };

    let task = topo.task(anchor);
    task.bore.subtree.get_or_refresh(now, lifetime, task.bore.penalty, || {
        scan(topo, topo.children_of(anchor))
    })
}

/// Follow single-child links down from `id` to the first task that has
/// zero or several children.
fn branching_descendant<T: TaskTopology>(topo: &T, mut id: TaskId) -> TaskId {
    for _ in 0..MAX_TASKS {
        if topo.count_children_upto2(id) != 1 {
            break;
        }
        match topo.first_child(id) {
            Some(child) => id = child,
            None => break,
        }
    }
    id
}

/// Walk up from the creator past ancestors that have no other child, and
/// average the branching descendants of the first ancestor that forks.
///
/// The child being created is not linked yet, so at the creator itself a
/// count of zero means "no siblings"; above it, one child means the chain
/// continues. Attaching as a sibling starts one level up, where the creator
/// already occupies that one slot.
pub fn inherit_from_ancestor_hub<T: TaskTopology>(
    topo: &T,
    parent: TaskId,
    clone_flags: CloneFlags,
    now: u64,
    lifetime: u32,
) -> u32 {
    let mut ancestor = parent;
    let mut sole_child_count = 0;

    if clone_flags.contains(CloneFlags::PARENT) {
        ancestor = topo.parent_of(ancestor);
        sole_child_count = 1;
    }

    for _ in 0..MAX_TASKS {
        let next = topo.parent_of(ancestor);
        if next == ancestor || topo.count_children_upto2(ancestor) > sole_child_count {
            break;
        }
        ancestor = next;
        sole_child_count = 1;
    }

    let task = topo.task(ancestor);
    task.bore.subtree.get_or_refresh(now, lifetime, task.bore.penalty, || {
        let descendants = topo
            .children_of(ancestor)
            .map(|child| branching_descendant(topo, child));
        scan(topo, descendants)
    })
}

/// Average over every thread of the creator's group, floored by the leader.
pub fn inherit_from_thread_group<T: TaskTopology>(topo: &T, parent: TaskId, now: u64, lifetime: u32) -> u32 {
    let leader = topo.task(parent).group_leader;
    let task = topo.task(leader);

    task.bore.group.get_or_refresh(now, lifetime, task.bore.penalty, || {
        scan(topo, topo.threads_of(leader))
    })
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
