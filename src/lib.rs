//! `taskmesh` — a heterogeneous-compute task runtime.
//!
//! Schedules compute across CPU, GPU (OpenCL/GLES), and DSP executors while
//! safely sharing memory buffers between them. This crate is the buffer-aware
//! task coordination layer: the multi-arena buffer state machine, the
//! deadlock-free multi-buffer acquire protocol, the task state machine that
//! drives execution/cancellation/dynamic dependency injection, and GPU
//! task-bundle dispatch. The CPU worker pool, the OpenCL/GLES/DSP driver
//! bindings, and kernel compilation itself are out of scope — this crate
//! exposes the `Scheduler` and `DeviceRuntime` traits those layers implement.
//!
//! ## Quick start
//!
//! ```no_run
//! use taskmesh::{runtime_init, runtime_shutdown, RuntimeConfig, create_task, create_buffer};
//!
//! runtime_init(RuntimeConfig::default()).unwrap();
//!
//! let buf = create_buffer::<f32>(1024).unwrap();
//! {
//!     let mut w = buf.acquire_write().unwrap();
//!     w.fill(1.0);
//! }
//!
//! let task = create_task(|_ctx| 42).unwrap();
//! task.launch().unwrap();
//! assert_eq!(task.wait().unwrap(), 42);
//!
//! runtime_shutdown().unwrap();
//! ```

mod standard;
pub mod error;
#[cfg(test)]
mod tests;

pub use crate::error::{Error, Result};

pub use self::standard::{
    Access, AcquireAction, AcquireError, AcquireScope, AcquireSetStatus, AllocKind, ArgSlot,
    Arena, ArenaType, Attributes, BufferAcquireSet, BufferHandle, BufferId, BufferPolicy,
    BufferState, CopyEngine, DeviceRuntime, Event, ExecutorDevice, ExecutorDeviceSet, GPUTask,
    Group, GroupError, HostCopyEngine, InlineScheduler, KernelArg, LaunchRange, MockDeviceRuntime,
    Pending, PendingWriter, ReadGuard, Runtime, RuntimeConfig, RuntimeConfigBuilder, Scheduler,
    TaskBundleDispatch, TaskContext, TaskHandle, TaskId, TaskNode, TaskOutcome, WriteGuard,
    create_buffer, create_buffer_from_region, create_group, create_task, create_task_with_attributes,
    create_task_with_buffers, create_value_task, pending, runtime_init, runtime_shutdown,
};
#[cfg(feature = "event-log")]
pub use self::standard::{event_log, EventLog};
