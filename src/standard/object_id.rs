//! Process-wide identity allocation for tasks and buffers.
//!
//! Every `Task` and `BufferState` is assigned a small stable id at
//! construction, used as the acquire-set requestor key and threaded through
//! every event-log record so that a trace can be followed without holding a
//! reference to the object itself.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable, monotonically increasing identity for a `Task`.
///
/// Never reused for the lifetime of the process, including after the task
/// that owned it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> TaskId {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// A sentinel identity representing the host thread as an acquire
    /// requestor (as opposed to a task).
    pub fn host() -> TaskId {
        TaskId(0)
    }

    pub fn is_host(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_host() {
            write!(f, "#host")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Stable, monotonically increasing identity for a `BufferState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn next() -> BufferId {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_distinct_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b > a);
    }

    #[test]
    fn host_id_is_stable() {
        assert!(TaskId::host().is_host());
        assert_eq!(format!("{}", TaskId::host()), "#host");
    }
}
