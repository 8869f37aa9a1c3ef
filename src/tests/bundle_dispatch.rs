//! A bundle of GPU tasks, each touching a distinct pair of buffers (one as
//! a plain buffer argument, one as a texture), acquires and releases its
//! unioned buffer set exactly once and resolves every task's arguments
//! against the buffer it was actually registered with — not whichever
//! buffer the deadlock-free sort happened to visit at that slot.

use std::sync::Arc;

use crate::{
    AcquireAction, BufferState, ExecutorDevice, ExecutorDeviceSet, GPUTask, KernelArg,
    LaunchRange, MockDeviceRuntime, TaskBundleDispatch, TaskId,
};

#[test]
fn bundle_resolves_each_task_args_against_its_own_buffers() {
    let buf_a = Arc::new(BufferState::new(16, false));
    let buf_b = Arc::new(BufferState::new(16, false));
    let buf_c = Arc::new(BufferState::new(16, false));
    let buf_d = Arc::new(BufferState::new(16, false));
    let runtime = Arc::new(MockDeviceRuntime::new());

    let mut bundle = TaskBundleDispatch::new(TaskId::next());

    let mut task1 = GPUTask::new(TaskId::next(), ExecutorDevice::GpuCl, LaunchRange::D1(1), runtime.clone());
    task1.add_arg(KernelArg::Texture { buf: buf_a.clone(), access: AcquireAction::Read });
    task1.add_arg(KernelArg::Buffer { buf: buf_b.clone(), access: AcquireAction::Write });
    bundle.push(task1);

    let mut task2 = GPUTask::new(TaskId::next(), ExecutorDevice::GpuCl, LaunchRange::D1(1), runtime.clone());
    task2.add_arg(KernelArg::Texture { buf: buf_c.clone(), access: AcquireAction::Read });
    task2.add_arg(KernelArg::Buffer { buf: buf_d.clone(), access: AcquireAction::Write });
    bundle.push(task2);

    assert_eq!(bundle.len(), 2);
    let ok = bundle.execute(ExecutorDeviceSet::single(ExecutorDevice::GpuCl)).unwrap();
    assert!(ok);

    let calls = runtime.calls.lock().unwrap();
    assert_eq!(calls.len(), 6);
    assert_eq!(calls[0], "buffer[0]=gpu_cl_texture");
    assert_eq!(calls[1], "buffer[1]=gpu_cl_buffer");
    assert!(calls[2].starts_with("launch"));
    assert_eq!(calls[3], "buffer[0]=gpu_cl_texture");
    assert_eq!(calls[4], "buffer[1]=gpu_cl_buffer");
    assert!(calls[5].starts_with("launch"));

    for buf in [&buf_a, &buf_b, &buf_c, &buf_d] {
        assert_eq!(buf.acquire_set_len(), 0);
    }
}
