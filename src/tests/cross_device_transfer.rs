//! Acquiring a host-resident buffer for a second device synchronises the
//! data into a freshly allocated arena without invalidating the host copy,
//! since a read-only acquire never needs exclusive ownership of the data.

use crate::{
    create_buffer_from_region, runtime_init, runtime_shutdown, AcquireAction, AcquireScope,
    ArenaType, BufferPolicy, ExecutorDevice, ExecutorDeviceSet, RuntimeConfig, TaskId,
};
use serial_test::serial;

#[test]
#[serial]
fn read_only_acquire_synchronises_without_invalidating_host() {
    runtime_init(RuntimeConfig::default()).unwrap();

    let buf = create_buffer_from_region(vec![1u8, 2, 3, 4]).unwrap();
    let state = buf.state().clone();
    let requestor = TaskId::next();

    let policy = BufferPolicy::new();
    let res = policy
        .request_acquire(
            &state,
            requestor,
            ExecutorDeviceSet::single(ExecutorDevice::GpuCl),
            AcquireAction::Read,
            AcquireScope::Full,
            false,
        )
        .unwrap();
    assert!(res.ok);

    assert!(state.has_arena(ArenaType::GpuClBuffer));
    assert!(state.is_valid_data_arena(ArenaType::GpuClBuffer));
    assert!(state.is_valid_data_arena(ArenaType::MainMemory));

    policy.release(&state, requestor);
    runtime_shutdown().unwrap();
}
