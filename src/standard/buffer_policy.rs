//! The global orchestrator between device requests and `BufferState`.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::standard::arena::ArenaType;
use crate::standard::buffer_state::{Access, BufferState, ConflictInfo};
use crate::standard::device::{ExecutorDevice, ExecutorDeviceSet};
use crate::standard::object_id::TaskId;

/// The two-phase scope of an acquire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireScope {
    Tentative,
    Confirm,
    /// Tentative and confirm performed atomically under one lock.
    Full,
}

/// The action a caller is requesting against a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireAction {
    Read,
    Write,
    ReadWrite,
}

impl AcquireAction {
    fn access(self) -> Access {
        match self {
            AcquireAction::Read => Access::Read,
            AcquireAction::Write => Access::Write,
            AcquireAction::ReadWrite => Access::ReadWrite,
        }
    }
}

/// Chooses which `ArenaType` each `ExecutorDevice` accesses, creates and
/// synchronises arenas on demand, and otherwise just forwards to
/// `BufferState`. It holds no per-buffer state of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferPolicy;

impl BufferPolicy {
    pub fn new() -> BufferPolicy {
        BufferPolicy
    }

    /// Pure mapping from device to the arena type it reads/writes through.
    pub fn get_arena_type_accessed_by(&self, device: ExecutorDevice, used_as_texture: bool) -> ArenaType {
        match device {
            ExecutorDevice::Cpu => ArenaType::MainMemory,
            ExecutorDevice::GpuCl if used_as_texture => ArenaType::GpuClTexture,
            ExecutorDevice::GpuCl => ArenaType::GpuClBuffer,
            ExecutorDevice::GpuGl => ArenaType::GlBuffer,
            ExecutorDevice::GpuTexture => ArenaType::GpuClTexture,
            ExecutorDevice::Dsp => ArenaType::DspIon,
            ExecutorDevice::Unspecified => ArenaType::MainMemory,
        }
    }

    pub fn request_acquire(
        &self,
        buf: &Arc<BufferState>,
        requestor: TaskId,
        device_set: ExecutorDeviceSet,
        action: AcquireAction,
        scope: AcquireScope,
        used_as_texture: bool,
    ) -> Result<ConflictInfo> {
        match scope {
            AcquireScope::Tentative => Ok(buf.add_acquire_requestor(requestor, device_set, action.access(), true)),
            AcquireScope::Confirm => self.confirm(buf, requestor, device_set, action, used_as_texture),
            AcquireScope::Full => {
                let tentative = buf.add_acquire_requestor(requestor, device_set, action.access(), true);
                if !tentative.ok {
                    return Ok(tentative);
                }
                self.confirm(buf, requestor, device_set, action, used_as_texture)
            }
        }
    }

    /// Confirms `requestor`'s tentative acquire, creating/synchronising an
    /// arena per device. Delegates to `BufferState::unsafe_confirm` so the
    /// whole sequence runs under one lock acquisition: two confirmers
    /// racing on the same buffer would otherwise see each other's
    /// in-between state (e.g. one creating the arena the other is about to
    /// create) and fail spuriously.
    fn confirm(
        &self,
        buf: &Arc<BufferState>,
        requestor: TaskId,
        device_set: ExecutorDeviceSet,
        action: AcquireAction,
        used_as_texture: bool,
    ) -> Result<ConflictInfo> {
        let mut devices = Vec::new();
        device_set.for_each(|d| devices.push(d));
        let entries: Vec<(ExecutorDevice, ArenaType)> = devices
            .into_iter()
            .map(|d| (d, self.get_arena_type_accessed_by(d, used_as_texture)))
            .collect();

        buf.unsafe_confirm(requestor, &entries, action.access() != Access::Read)?;

        Ok(ConflictInfo { ok: true, conflicting_requestor: None, multiplicity: 1 })
    }

    pub fn release(&self, buf: &Arc<BufferState>, requestor: TaskId) -> usize {
        buf.remove_acquire_requestor(requestor)
    }

    /// Opportunistically drops `device`'s preferred arena from `buf` if it
    /// holds one and nothing else is bound to it, freeing the arena's
    /// backing storage without disturbing any other device's view of the
    /// buffer. No-op if the arena is still bound-to by a peer arena (the
    /// same guard `BufferState::remove_arena` enforces) or doesn't exist.
    pub fn remove_matching_arena(&self, buf: &Arc<BufferState>, device: ExecutorDevice, used_as_texture: bool) -> Result<()> {
        let arena_type = self.get_arena_type_accessed_by(device, used_as_texture);
        if !buf.has_arena(arena_type) {
            return Ok(());
        }
        match buf.remove_arena(arena_type, true) {
            Ok(()) => Ok(()),
            Err(Error::InvalidArgument(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::object_id::TaskId;

    #[test]
    fn confirm_allocates_and_validates_arena() {
        let buf = Arc::new(BufferState::new(64, false));
        let policy = BufferPolicy::new();
        let requestor = TaskId::next();
        let res = policy.request_acquire(
            &buf, requestor, ExecutorDeviceSet::CPU, AcquireAction::Write, AcquireScope::Full, false,
        ).unwrap();
        assert!(res.ok);
        assert!(buf.has_arena(ArenaType::MainMemory));
        assert!(buf.is_valid_data_arena(ArenaType::MainMemory));
    }

    #[test]
    fn texture_hint_selects_texture_arena() {
        let policy = BufferPolicy::new();
        assert_eq!(
            policy.get_arena_type_accessed_by(ExecutorDevice::GpuCl, true),
            ArenaType::GpuClTexture
        );
        assert_eq!(
            policy.get_arena_type_accessed_by(ExecutorDevice::GpuCl, false),
            ArenaType::GpuClBuffer
        );
    }

    #[test]
    fn remove_matching_arena_drops_unbound_device_arena() {
        let buf = Arc::new(BufferState::new(64, false));
        let policy = BufferPolicy::new();
        let requestor = TaskId::next();
        policy.request_acquire(
            &buf, requestor, ExecutorDeviceSet::CPU, AcquireAction::Write, AcquireScope::Full, false,
        ).unwrap();
        policy.release(&buf, requestor);

        policy.remove_matching_arena(&buf, ExecutorDevice::Cpu, false).unwrap();
        assert!(!buf.has_arena(ArenaType::MainMemory));
    }

    #[test]
    fn remove_matching_arena_is_noop_when_arena_missing() {
        let buf = Arc::new(BufferState::new(64, false));
        let policy = BufferPolicy::new();
        policy.remove_matching_arena(&buf, ExecutorDevice::Cpu, false).unwrap();
    }

    #[test]
    fn remove_matching_arena_honors_bound_peer_guard() {
        use crate::standard::arena::Arena;

        let buf = Arc::new(BufferState::new(64, false));
        buf.add_arena(Arena::new_internal(ArenaType::MainMemory, 64), true).unwrap();
        buf.add_arena(Arena::new_bound(ArenaType::GpuClBuffer, ArenaType::MainMemory, 64), false).unwrap();

        let policy = BufferPolicy::new();
        policy.remove_matching_arena(&buf, ExecutorDevice::Cpu, false).unwrap();
        assert!(buf.has_arena(ArenaType::MainMemory), "bound-peer guard should have kept the arena");
    }

    #[test]
    fn concurrent_confirms_do_not_race_arena_creation() {
        use std::thread;

        let buf = Arc::new(BufferState::new(64, false));
        let policy = Arc::new(BufferPolicy::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let buf = buf.clone();
            let policy = policy.clone();
            handles.push(thread::spawn(move || {
                let requestor = TaskId::next();
                let res = policy.request_acquire(
                    &buf, requestor, ExecutorDeviceSet::CPU, AcquireAction::Read, AcquireScope::Full, false,
                ).unwrap();
                assert!(res.ok);
                policy.release(&buf, requestor);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.acquire_set_len(), 0);
    }
}
