//! GPU/accelerator task specialisation: a kernel launch whose buffer
//! arguments flow through a `BufferAcquireSet`.

use std::sync::Arc;
use std::sync::Mutex;

use crate::error::Result;
use crate::standard::acquire_set::BufferAcquireSet;
use crate::standard::arena::ArenaType;
use crate::standard::buffer_policy::AcquireAction;
use crate::standard::buffer_state::BufferState;
use crate::standard::device::{ExecutorDevice, ExecutorDeviceSet};
use crate::standard::event_log::{self, Event};
use crate::standard::object_id::TaskId;

/// A kernel's launch range, one to three dimensions of global work size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchRange {
    D1(usize),
    D2(usize, usize),
    D3(usize, usize, usize),
}

/// A move-sink argument slot, used by the out-of-scope kernel-signature
/// layer to track whether a value has been supplied, is awaiting a
/// producer task, or was already consumed by a prior dispatch attempt.
#[derive(Debug, Clone)]
pub enum ArgSlot<T> {
    Value(T),
    Pending,
    Taken,
}

/// One argument a kernel invocation accepts, enumerated by dispatch kind.
pub enum KernelArg {
    /// Copied into a side-tuple the task owns for the launch's lifetime.
    Value(Vec<u8>),
    /// Local (workgroup-shared) memory sized `element_size * count` bytes.
    LocalAlloc { element_size: usize, count: usize },
    /// A buffer argument, acquired with `access` against `buf`.
    Buffer { buf: Arc<BufferState>, access: AcquireAction },
    /// Like `Buffer`, but resolves to a texture arena.
    Texture { buf: Arc<BufferState>, access: AcquireAction },
    /// Passed through to the driver untouched.
    Sampler(u32),
}

/// Stands in for the out-of-scope OpenCL/GLES driver binding: resolves the
/// arena `BufferAcquireSet` chose for the executing device into whatever
/// native handle the real runtime dispatches.
pub trait DeviceRuntime: Send + Sync {
    fn dispatch_value(&self, slot: usize, bytes: &[u8]);
    fn dispatch_local_alloc(&self, slot: usize, bytes: usize);
    fn dispatch_buffer(&self, slot: usize, arena_type: ArenaType);
    fn dispatch_sampler(&self, slot: usize, sampler: u32);
    fn launch(&self, range: LaunchRange) -> Result<()>;
}

/// Records every dispatch call in order, for test assertions, instead of
/// talking to a real device.
#[derive(Debug, Default)]
pub struct MockDeviceRuntime {
    pub calls: Mutex<Vec<String>>,
}

impl MockDeviceRuntime {
    pub fn new() -> MockDeviceRuntime {
        MockDeviceRuntime::default()
    }
}

impl DeviceRuntime for MockDeviceRuntime {
    fn dispatch_value(&self, slot: usize, bytes: &[u8]) {
        self.calls.lock().unwrap().push(format!("value[{}]={:?}", slot, bytes));
    }

    fn dispatch_local_alloc(&self, slot: usize, bytes: usize) {
        self.calls.lock().unwrap().push(format!("local[{}]={}b", slot, bytes));
    }

    fn dispatch_buffer(&self, slot: usize, arena_type: ArenaType) {
        self.calls.lock().unwrap().push(format!("buffer[{}]={}", slot, arena_type));
    }

    fn dispatch_sampler(&self, slot: usize, sampler: u32) {
        self.calls.lock().unwrap().push(format!("sampler[{}]={}", slot, sampler));
    }

    fn launch(&self, range: LaunchRange) -> Result<()> {
        self.calls.lock().unwrap().push(format!("launch {:?}", range));
        Ok(())
    }
}

/// A GPU kernel launch: its argument list plus a `BufferAcquireSet` sized
/// to the number of buffer-typed arguments among them.
pub struct GPUTask {
    id: TaskId,
    device: ExecutorDevice,
    range: LaunchRange,
    args: Vec<KernelArg>,
    acquire_set: BufferAcquireSet,
    runtime: Arc<dyn DeviceRuntime>,
    first_execution: bool,
    does_bundle_dispatch: bool,
}

impl GPUTask {
    pub fn new(
        id: TaskId,
        device: ExecutorDevice,
        range: LaunchRange,
        runtime: Arc<dyn DeviceRuntime>,
    ) -> GPUTask {
        GPUTask {
            id,
            device,
            range,
            args: Vec::new(),
            acquire_set: BufferAcquireSet::new(),
            runtime,
            first_execution: true,
            does_bundle_dispatch: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn first_execution(&self) -> bool {
        self.first_execution
    }

    /// Set when a `TaskBundleDispatch` owns this task's acquire/release;
    /// the task then only dispatches its arguments.
    pub fn set_does_bundle_dispatch(&mut self, flag: bool) {
        self.does_bundle_dispatch = flag;
    }

    pub fn does_bundle_dispatch(&self) -> bool {
        self.does_bundle_dispatch
    }

    /// Appends an argument, registering any buffer/texture argument it
    /// carries with the internal `BufferAcquireSet` in the same order.
    pub fn add_arg(&mut self, arg: KernelArg) {
        match &arg {
            KernelArg::Buffer { buf, access } => self.acquire_set.add(buf.clone(), *access, false),
            KernelArg::Texture { buf, access } => self.acquire_set.add(buf.clone(), *access, true),
            _ => {}
        }
        self.args.push(arg);
    }

    pub(crate) fn acquire_set_mut(&mut self) -> &mut BufferAcquireSet {
        &mut self.acquire_set
    }

    /// Acquires every buffer argument (skipped when bundle dispatch owns
    /// acquisition), dispatches each argument slot, and launches the
    /// kernel. Returns `Ok(false)` if acquisition hit an unresolved
    /// conflict — the caller should retry after the injected dependency
    /// fires, exactly like a CPU task's acquire-conflict path.
    pub fn execute(
        &mut self,
        requestor: TaskId,
        setup_task_deps_on_conflict: bool,
        resolve_conflict: impl FnMut(TaskId) -> bool,
    ) -> Result<bool> {
        if !self.does_bundle_dispatch {
            let ok = self.acquire_set.blocking_acquire(
                requestor,
                ExecutorDeviceSet::single(self.device),
                setup_task_deps_on_conflict,
                resolve_conflict,
            )?;
            if !ok {
                return Ok(false);
            }
        }

        self.dispatch_args_with(&self.acquire_set, 0);
        self.runtime.launch(self.range)?;
        event_log::emit(Event::TaskRan(self.id));

        if !self.does_bundle_dispatch {
            self.acquire_set.release(requestor);
        }
        self.first_execution = false;
        Ok(true)
    }

    /// Dispatches every argument slot, resolving buffer/texture arguments
    /// against `set` starting at `buffer_offset` (its own `acquire_set` for
    /// a standalone launch, or the bundle's shared set — at the offset this
    /// task's buffers were unioned into — for bundle dispatch). Returns the
    /// number of buffer-typed arguments consumed, so a bundle can advance
    /// its own offset for the next task.
    pub(crate) fn dispatch_args_with(&self, set: &BufferAcquireSet, buffer_offset: usize) -> usize {
        let mut buffer_index = buffer_offset;
        for (slot, arg) in self.args.iter().enumerate() {
            match arg {
                KernelArg::Value(bytes) => self.runtime.dispatch_value(slot, bytes),
                KernelArg::LocalAlloc { element_size, count } => {
                    self.runtime.dispatch_local_alloc(slot, element_size * count)
                }
                KernelArg::Buffer { .. } | KernelArg::Texture { .. } => {
                    let arena_type = set.find_acquired_arena(buffer_index, self.device).unwrap_or(ArenaType::None);
                    self.runtime.dispatch_buffer(slot, arena_type);
                    buffer_index += 1;
                }
                KernelArg::Sampler(s) => self.runtime.dispatch_sampler(slot, *s),
            }
        }
        buffer_index - buffer_offset
    }

    /// Launches this task's kernel without touching any acquire set;
    /// used by `TaskBundleDispatch` after it has already resolved every
    /// argument's arena via the shared set.
    pub(crate) fn launch_only(&mut self) -> Result<()> {
        self.runtime.launch(self.range)?;
        event_log::emit(Event::TaskRan(self.id));
        self.first_execution = false;
        Ok(())
    }

    pub(crate) fn device(&self) -> ExecutorDevice {
        self.device
    }

    pub(crate) fn buffer_arg_count(&self) -> usize {
        self.args
            .iter()
            .filter(|a| matches!(a, KernelArg::Buffer { .. } | KernelArg::Texture { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::buffer_state::BufferState;

    #[test]
    fn value_and_buffer_args_dispatch_in_slot_order() {
        let buf = Arc::new(BufferState::new(16, false));
        let runtime = Arc::new(MockDeviceRuntime::new());
        let mut task = GPUTask::new(TaskId::next(), ExecutorDevice::Cpu, LaunchRange::D1(4), runtime.clone());
        task.add_arg(KernelArg::Value(vec![7, 0, 0, 0]));
        task.add_arg(KernelArg::Buffer { buf: buf.clone(), access: AcquireAction::Write });
        let requestor = TaskId::next();
        let ok = task.execute(requestor, false, |_| false).unwrap();
        assert!(ok);
        let calls = runtime.calls.lock().unwrap();
        assert_eq!(calls[0], "value[0]=[7, 0, 0, 0]");
        assert!(calls[1].starts_with("buffer[1]=main_memory"));
        assert!(calls[2].starts_with("launch"));
    }

    #[test]
    fn sampler_and_local_alloc_pass_through() {
        let runtime = Arc::new(MockDeviceRuntime::new());
        let mut task = GPUTask::new(TaskId::next(), ExecutorDevice::Cpu, LaunchRange::D1(1), runtime.clone());
        task.add_arg(KernelArg::LocalAlloc { element_size: 4, count: 8 });
        task.add_arg(KernelArg::Sampler(3));
        task.execute(TaskId::next(), false, |_| false).unwrap();
        let calls = runtime.calls.lock().unwrap();
        assert_eq!(calls[0], "local[0]=32b");
        assert_eq!(calls[1], "sampler[1]=3");
    }
}
