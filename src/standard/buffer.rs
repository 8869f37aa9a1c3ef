//! The public buffer handle and host-side acquire/release guards.

use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::Result;
use crate::standard::arena::ArenaType;
use crate::standard::buffer_policy::{AcquireAction, AcquireScope, BufferPolicy};
use crate::standard::buffer_state::BufferState;
use crate::standard::device::ExecutorDeviceSet;
use crate::standard::event_log::{self, Event};
use crate::standard::object_id::TaskId;
use crate::standard::runtime;

/// A handle to a logical buffer of `T`. Cheap to clone; every clone shares
/// the same underlying `BufferState`.
#[derive(Clone)]
pub struct BufferHandle<T> {
    state: Arc<BufferState>,
    len: usize,
    _marker: PhantomData<T>,
}

/// Allocates a new buffer of `count` elements. Fails with
/// `Error::RuntimeNotInitialized` outside the `runtime_init`/
/// `runtime_shutdown` window.
pub fn create_buffer<T: Copy + Send + Sync + 'static>(count: usize) -> Result<BufferHandle<T>> {
    let rt = runtime::current()?;
    let size_in_bytes = count * mem::size_of::<T>();
    let state = Arc::new(BufferState::new(size_in_bytes, rt.config().buffer_statistics_enabled()));
    event_log::emit(Event::BufferCreated(state.id(), size_in_bytes));
    Ok(BufferHandle { state, len: count, _marker: PhantomData })
}

/// Wraps caller-supplied storage as a buffer's initial, valid main-memory
/// arena.
pub fn create_buffer_from_region<T: Copy + Send + Sync + 'static>(data: Vec<T>) -> Result<BufferHandle<T>> {
    let rt = runtime::current()?;
    let len = data.len();
    let bytes = unsafe {
        let ptr = data.as_ptr() as *const u8;
        std::slice::from_raw_parts(ptr, len * mem::size_of::<T>()).to_vec()
    };
    let state = BufferState::new(bytes.len(), rt.config().buffer_statistics_enabled());
    let arena = crate::standard::arena::Arena::new_external(ArenaType::MainMemory, bytes);
    state.add_arena(arena, true)?;
    let state = Arc::new(state);
    event_log::emit(Event::BufferCreated(state.id(), state.size_in_bytes()));
    Ok(BufferHandle { state, len, _marker: PhantomData })
}

impl<T: Copy + Send + Sync + 'static> BufferHandle<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn state(&self) -> &Arc<BufferState> {
        &self.state
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.state.set_name(name);
    }

    /// Acquires the buffer for reading from the host thread, blocking
    /// until any conflicting writer releases.
    pub fn acquire_read(&self) -> Result<ReadGuard<'_, T>> {
        self.host_acquire(AcquireAction::Read)?;
        Ok(ReadGuard { handle: self })
    }

    /// Acquires the buffer for writing from the host thread.
    pub fn acquire_write(&self) -> Result<WriteGuard<'_, T>> {
        self.host_acquire(AcquireAction::Write)?;
        Ok(WriteGuard { handle: self })
    }

    fn host_acquire(&self, action: AcquireAction) -> Result<()> {
        let policy = BufferPolicy::new();
        loop {
            let conflict = policy.request_acquire(
                &self.state,
                TaskId::host(),
                ExecutorDeviceSet::CPU,
                action,
                AcquireScope::Full,
                false,
            )?;
            if conflict.ok {
                return Ok(());
            }
            self.state.wait_for_release_signal();
        }
    }

    fn release_host(&self) {
        BufferPolicy::new().release(&self.state, TaskId::host());
    }

    fn bytes(&self) -> *const u8 {
        let mut ptr = std::ptr::null();
        self.state.with_arena_mut(ArenaType::MainMemory, |arena| {
            ptr = arena.bytes().as_ptr();
        });
        ptr
    }
}

/// RAII read access to a buffer's host-visible bytes, reinterpreted as
/// `&[T]`. Releases on drop.
pub struct ReadGuard<'a, T: Copy + Send + Sync + 'static> {
    handle: &'a BufferHandle<T>,
}

impl<'a, T: Copy + Send + Sync + 'static> Deref for ReadGuard<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.handle.bytes() as *const T, self.handle.len) }
    }
}

impl<'a, T: Copy + Send + Sync + 'static> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.handle.release_host();
    }
}

/// RAII write access to a buffer's host-visible bytes, reinterpreted as
/// `&mut [T]`. Releases on drop.
pub struct WriteGuard<'a, T: Copy + Send + Sync + 'static> {
    handle: &'a BufferHandle<T>,
}

impl<'a, T: Copy + Send + Sync + 'static> Deref for WriteGuard<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.handle.bytes() as *const T, self.handle.len) }
    }
}

impl<'a, T: Copy + Send + Sync + 'static> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.handle.bytes() as *mut T, self.handle.len) }
    }
}

impl<'a, T: Copy + Send + Sync + 'static> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        self.handle.release_host();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::runtime::{runtime_init, runtime_shutdown, RuntimeConfig};
    use serial_test::serial;

    #[test]
    #[serial]
    fn write_then_read_round_trips() {
        runtime_init(RuntimeConfig::default()).unwrap();
        let buf = create_buffer::<u32>(4).unwrap();
        {
            let mut w = buf.acquire_write().unwrap();
            w.copy_from_slice(&[1, 2, 3, 4]);
        }
        {
            let r = buf.acquire_read().unwrap();
            assert_eq!(&*r, &[1, 2, 3, 4]);
        }
        runtime_shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn from_region_is_immediately_valid() {
        runtime_init(RuntimeConfig::default()).unwrap();
        let buf = create_buffer_from_region(vec![9u8, 8, 7]).unwrap();
        let r = buf.acquire_read().unwrap();
        assert_eq!(&*r, &[9, 8, 7]);
        drop(r);
        runtime_shutdown().unwrap();
    }
}
