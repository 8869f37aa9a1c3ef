//! Named collections of tasks supporting mass cancellation and mass wait.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::standard::object_id::TaskId;
use crate::standard::task::TaskNode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GroupError {
    #[error("task is already launched and cannot join a group pre-launch")]
    AlreadyLaunched,
    #[error("group '{0}' has already been canceled")]
    Canceled(String),
}

impl From<GroupError> for Error {
    fn from(err: GroupError) -> Error {
        Error::Group(err.to_string())
    }
}

struct Inner {
    members: HashMap<TaskId, Weak<dyn TaskNode>>,
    canceled: bool,
}

/// A named, ref-counted collection of task references with a cancellation
/// flag and a completion counter.
pub struct Group {
    name: String,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Arc<Group> {
        Arc::new(Group {
            name: name.into(),
            inner: Mutex::new(Inner { members: HashMap::new(), canceled: false }),
            cond: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// Adds `task` to the group. Mirrors `AlreadyLaunched` if the task is
    /// already launched, and immediately cancels the task if the group is
    /// already canceled.
    pub fn join_node(&self, task: Arc<dyn TaskNode>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.canceled {
            task.cancel();
            return Err(GroupError::Canceled(self.name.clone()).into());
        }
        inner.members.insert(task.id(), Arc::downgrade(&task));
        Ok(())
    }

    /// Cancels every current member and flags the group so that any task
    /// subsequently joining is cancelled immediately.
    pub fn cancel(&self) {
        let members: Vec<Arc<dyn TaskNode>> = {
            let mut inner = self.inner.lock();
            inner.canceled = true;
            inner.members.values().filter_map(Weak::upgrade).collect()
        };
        crate::standard::event_log::emit(crate::standard::event_log::Event::GroupCanceled(self.name.clone()));
        for member in members {
            member.cancel();
        }
    }

    /// Removes a finished member and wakes any waiter if the group is now
    /// empty of unfinished members.
    pub(crate) fn leave(&self, task_id: TaskId) {
        let mut inner = self.inner.lock();
        inner.members.remove(&task_id);
        if inner.members.values().filter_map(Weak::upgrade).all(|m| m.is_finished()) {
            self.cond.notify_all();
        }
    }

    /// Blocks until every member currently in the group has finished.
    pub fn wait(&self) {
        let mut inner = self.inner.lock();
        loop {
            let all_finished = inner.members.values()
                .filter_map(Weak::upgrade)
                .all(|m| m.is_finished());
            if all_finished {
                return;
            }
            self.cond.wait(&mut inner);
        }
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::scheduler::InlineScheduler;
    use crate::standard::task::{Attributes, Task};
    use std::sync::Arc;

    #[test]
    fn cancel_propagates_to_members() {
        let group = Group::new("g");
        let task: Arc<Task<i32>> = Task::new_bound(
            Attributes::empty(), None, Arc::new(InlineScheduler),
            Box::new(|_ctx| Ok(1)),
        );
        group.join_node(task.clone()).unwrap();
        group.cancel();
        assert!(task.is_canceled());
    }

    #[test]
    fn join_after_cancel_cancels_immediately() {
        let group = Group::new("g");
        group.cancel();
        let task: Arc<Task<i32>> = Task::new_bound(
            Attributes::empty(), None, Arc::new(InlineScheduler),
            Box::new(|_ctx| Ok(1)),
        );
        let res = group.join_node(task.clone());
        assert!(res.is_err());
        assert!(task.is_canceled());
    }
}
