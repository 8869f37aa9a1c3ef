//! `TaskBundleDispatch`: batches several GPU tasks under one collective
//! buffer acquisition.

use crate::error::Result;
use crate::standard::acquire_set::BufferAcquireSet;
use crate::standard::buffer_policy::AcquireAction;
use crate::standard::device::ExecutorDeviceSet;
use crate::standard::gpu_task::GPUTask;
use crate::standard::object_id::TaskId;

/// Collects N GPU tasks (the first is the root that triggered bundling),
/// unions their per-task buffer requests into one shared
/// `BufferAcquireSet`, acquires it blockingly exactly once, launches each
/// task in order, then releases the shared set once the last task's
/// completion callback fires.
///
/// Bundling presumes every task targets the same executor device.
pub struct TaskBundleDispatch {
    tasks: Vec<GPUTask>,
    shared: BufferAcquireSet,
    requestor: TaskId,
}

impl TaskBundleDispatch {
    pub fn new(requestor: TaskId) -> TaskBundleDispatch {
        TaskBundleDispatch { tasks: Vec::new(), shared: BufferAcquireSet::new(), requestor }
    }

    /// Adds a task to the bundle, marking it as bundle-dispatched and
    /// unioning its buffer arguments into the shared acquire set.
    pub fn push(&mut self, mut task: GPUTask) {
        task.set_does_bundle_dispatch(true);
        for (buf, action, used_as_texture) in task.acquire_set_mut().drain_entries() {
            self.shared.add(buf, action, used_as_texture);
        }
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Acquires every unioned buffer once, dispatches and launches each
    /// task in order against the shared set, then releases it.
    pub fn execute(&mut self, device_set: ExecutorDeviceSet) -> Result<bool> {
        let ok = self.shared.blocking_acquire(self.requestor, device_set, false, |_| false)?;
        if !ok {
            return Ok(false);
        }

        let mut offset = 0usize;
        for task in &mut self.tasks {
            let consumed = task.dispatch_args_with(&self.shared, offset);
            task.launch_only()?;
            offset += consumed;
        }

        self.shared.release(self.requestor);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::buffer_state::BufferState;
    use crate::standard::device::ExecutorDevice;
    use crate::standard::gpu_task::{KernelArg, LaunchRange, MockDeviceRuntime};
    use std::sync::Arc;

    #[test]
    fn bundle_acquires_once_and_releases_once() {
        let buf = Arc::new(BufferState::new(16, false));
        let runtime = Arc::new(MockDeviceRuntime::new());
        let requestor = TaskId::next();
        let mut bundle = TaskBundleDispatch::new(requestor);

        for access in [AcquireAction::Read, AcquireAction::Write, AcquireAction::Read] {
            let mut task = GPUTask::new(TaskId::next(), ExecutorDevice::Cpu, LaunchRange::D1(1), runtime.clone());
            task.add_arg(KernelArg::Buffer { buf: buf.clone(), access });
            bundle.push(task);
        }

        assert_eq!(bundle.len(), 3);
        let ok = bundle.execute(ExecutorDeviceSet::CPU).unwrap();
        assert!(ok);

        let calls = runtime.calls.lock().unwrap();
        let launches = calls.iter().filter(|c| c.starts_with("launch")).count();
        assert_eq!(launches, 3);
        assert_eq!(buf.acquire_set_len(), 0);
    }
}
