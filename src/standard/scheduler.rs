//! Pluggable hand-off between "a task became ready" and "a thread runs it".

use std::sync::Arc;

use crate::standard::task::TaskNode;

/// Drives the coordination layer without dictating how ready tasks
/// actually get CPU time. The out-of-scope worker pool implements this
/// against its work-stealing tree; the crate ships [`InlineScheduler`] for
/// tests and simple embeddings.
pub trait Scheduler: Send + Sync {
    fn spawn_ready(&self, task: Arc<dyn TaskNode>);
}

/// Runs every ready task synchronously on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn spawn_ready(&self, task: Arc<dyn TaskNode>) {
        task.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::task::{Attributes, Task};

    #[test]
    fn inline_scheduler_runs_immediately() {
        let scheduler = Arc::new(InlineScheduler);
        let task: Arc<Task<i32>> = Task::new_bound(
            Attributes::empty(), None, scheduler,
            Box::new(|_ctx| Ok(42)),
        );
        task.launch(None).unwrap();
        assert_eq!(task.wait().unwrap(), 42);
    }
}
