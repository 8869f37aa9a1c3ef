//! The buffer-aware task coordination layer: arenas, buffer state, the
//! acquire protocol, the task state machine, and GPU bundle dispatch.

mod object_id;
mod event_log;
mod device;
mod arena;
mod buffer_state;
mod buffer_policy;
mod acquire_set;
mod runtime;
mod scheduler;
mod group;
mod task;
mod buffer;
mod task_handle;
mod gpu_task;
mod bundle;

pub use self::object_id::{BufferId, TaskId};
pub use self::event_log::Event;
#[cfg(feature = "event-log")]
pub use self::event_log::{log as event_log, EventLog};
pub use self::device::{ExecutorDevice, ExecutorDeviceSet};
pub use self::arena::{AllocKind, Arena, ArenaType, CopyEngine, HostCopyEngine};
pub use self::buffer_state::{Access, BufferState};
pub use self::buffer_policy::{AcquireAction, AcquireScope, BufferPolicy};
pub use self::acquire_set::{AcquireError, AcquireSetStatus, BufferAcquireSet};
pub use self::runtime::{Runtime, RuntimeConfig, RuntimeConfigBuilder, runtime_init, runtime_shutdown};
pub use self::scheduler::{InlineScheduler, Scheduler};
pub use self::group::{Group, GroupError};
pub use self::task::{Attributes, TaskContext, TaskNode, TaskOutcome};
pub use self::buffer::{BufferHandle, ReadGuard, WriteGuard, create_buffer, create_buffer_from_region};
pub use self::task_handle::{
    Pending, PendingWriter, TaskHandle,
    create_group, create_task, create_task_with_attributes, create_task_with_buffers,
    create_value_task, pending,
};
pub use self::gpu_task::{ArgSlot, DeviceRuntime, GPUTask, KernelArg, LaunchRange, MockDeviceRuntime};
pub use self::bundle::TaskBundleDispatch;
