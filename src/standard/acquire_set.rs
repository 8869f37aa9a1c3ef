//! Deadlock-free, all-or-nothing acquisition of several buffers at once.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::standard::arena::ArenaType;
use crate::standard::buffer_policy::{AcquireAction, AcquireScope, BufferPolicy};
use crate::standard::buffer_state::BufferState;
use crate::standard::device::{ExecutorDevice, ExecutorDeviceSet};
use crate::standard::event_log::{self, Event};
use crate::standard::object_id::TaskId;

/// Internal-only conflict signal exchanged between the acquire machinery
/// and `BufferState`/`BufferPolicy`. Never part of the public `Error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AcquireError {
    #[error("buffer {buffer} conflicted with {conflicter:?}")]
    BufferConflict { buffer: usize, conflicter: Option<TaskId> },
    #[error("acquire set exceeded MULTI_DEVICE_COUNT devices")]
    TooManyDevices,
    #[error("device set must not contain Unspecified")]
    UnspecifiedDevice,
    #[error("acquire attempted while not idle")]
    NotIdle,
    #[error("possible acquire cycle")]
    PossibleCycle,
}

impl From<AcquireError> for Error {
    fn from(err: AcquireError) -> Error {
        Error::Acquire(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireSetStatus {
    Idle,
    TentativelyAcquired,
    FullyAcquired,
}

/// What occupies one `(buffer, device)` cell of an acquired set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Empty,
    /// Reserved during pass 1; no arena chosen yet.
    Tentative,
    /// This buffer was deliberately skipped for this device (an override
    /// device set excluded it).
    Fake,
    Real(ArenaType),
}

struct Entry {
    buf: Arc<BufferState>,
    action: AcquireAction,
    used_as_texture: bool,
    override_devices: Option<ExecutorDeviceSet>,
    preacquired: Option<ArenaType>,
    cells: Vec<Cell>,
}

/// Per-task helper that acquires every buffer a task needs, atomically, in
/// a deterministic global order so that concurrent multi-buffer acquires
/// can never deadlock.
pub struct BufferAcquireSet {
    policy: BufferPolicy,
    entries: Vec<Entry>,
    devices: Vec<ExecutorDevice>,
    status: AcquireSetStatus,
}

const SPIN_RETRIES: usize = 256;

impl BufferAcquireSet {
    pub fn new() -> BufferAcquireSet {
        BufferAcquireSet {
            policy: BufferPolicy::new(),
            entries: Vec::new(),
            devices: Vec::new(),
            status: AcquireSetStatus::Idle,
        }
    }

    pub fn status(&self) -> AcquireSetStatus {
        self.status
    }

    /// Adds a buffer to the set being built, with an optional already
    /// in-device-accessible-state arena to use instead of going through
    /// `BufferPolicy`, and an optional subset of the task's devices this
    /// buffer should actually be acquired for.
    pub fn add(&mut self, buf: Arc<BufferState>, action: AcquireAction, used_as_texture: bool) {
        self.entries.push(Entry {
            buf,
            action,
            used_as_texture,
            override_devices: None,
            preacquired: None,
            cells: Vec::new(),
        });
    }

    pub fn set_override_devices(&mut self, index: usize, devices: ExecutorDeviceSet) {
        self.entries[index].override_devices = Some(devices);
    }

    pub fn set_preacquired(&mut self, index: usize, arena_type: ArenaType) {
        self.entries[index].preacquired = Some(arena_type);
    }

    /// Removes every buffer this set was tracking, in insertion order, for
    /// a `TaskBundleDispatch` to fold into its own shared set. Only valid
    /// while `idle` (nothing yet acquired).
    pub(crate) fn drain_entries(&mut self) -> Vec<(Arc<BufferState>, AcquireAction, bool)> {
        debug_assert_eq!(self.status, AcquireSetStatus::Idle);
        self.entries
            .drain(..)
            .map(|e| (e.buf, e.action, e.used_as_texture))
            .collect()
    }

    /// Attempts the two-pass acquire. Returns `Ok(true)` on success,
    /// `Ok(false)` if a conflict could not be resolved and the caller
    /// should fail/retry the whole task, consuming no buffers either way
    /// (everything tentative is released before returning).
    pub fn acquire(
        &mut self,
        requestor: TaskId,
        device_set: ExecutorDeviceSet,
        setup_task_deps_on_conflict: bool,
        mut resolve_conflict: impl FnMut(TaskId) -> bool,
    ) -> Result<bool> {
        if self.status != AcquireSetStatus::Idle {
            return Err(AcquireError::NotIdle.into());
        }
        if device_set.count() > ExecutorDeviceSet::MULTI_DEVICE_COUNT {
            return Err(AcquireError::TooManyDevices.into());
        }
        if device_set.has(ExecutorDevice::Unspecified) {
            return Err(AcquireError::UnspecifiedDevice.into());
        }

        self.devices.clear();
        device_set.for_each(|d| self.devices.push(d));

        // Deterministic order: visit buffers sorted by the BufferState's
        // Arc allocation address, but keep `self.entries` itself in
        // insertion order so that callers (e.g. GPU argument dispatch)
        // can keep indexing `find_acquired_arena` by the index they added
        // a buffer at. Applied system-wide, the sorted visitation order is
        // what makes concurrent multi-buffer acquires deadlock-free.
        let mut sorted: Vec<usize> = (0..self.entries.len()).collect();
        sorted.sort_by_key(|&i| Arc::as_ptr(&self.entries[i].buf) as usize);

        // Coalesce consecutive duplicate buffers (e.g. read then write of
        // the same buffer) into the superset access. `coalesced` holds one
        // representative original index per distinct buffer, in sorted
        // (deadlock-free) visitation order.
        let mut coalesced: Vec<usize> = Vec::new();
        {
            let mut i = 0;
            while i < sorted.len() {
                let mut j = i + 1;
                while j < sorted.len() && Arc::ptr_eq(&self.entries[sorted[i]].buf, &self.entries[sorted[j]].buf) {
                    let dup_action = self.entries[sorted[j]].action;
                    if dup_action != self.entries[sorted[i]].action {
                        self.entries[sorted[i]].action = AcquireAction::ReadWrite;
                    }
                    j += 1;
                }
                coalesced.push(sorted[i]);
                i = j;
            }
        }

        let mut retries = 0;
        'restart: loop {
            // Pass 1: tentative.
            let mut acquired_so_far: Vec<usize> = Vec::new();
            for &idx in &coalesced {
                if self.entries[idx].preacquired.is_some() {
                    continue;
                }
                let conflict = self.policy.request_acquire(
                    &self.entries[idx].buf,
                    requestor,
                    device_set,
                    self.entries[idx].action,
                    AcquireScope::Tentative,
                    self.entries[idx].used_as_texture,
                )?;

                if conflict.ok {
                    acquired_so_far.push(idx);
                    continue;
                }

                // Release everything tentatively acquired in this attempt.
                for &done in &acquired_so_far {
                    self.policy.release(&self.entries[done].buf, requestor);
                }

                if !setup_task_deps_on_conflict {
                    self.status = AcquireSetStatus::Idle;
                    return Ok(false);
                }

                retries += 1;
                if retries > SPIN_RETRIES {
                    return Err(AcquireError::PossibleCycle.into());
                }

                match conflict.conflicting_requestor {
                    Some(conflicter) => {
                        if resolve_conflict(conflicter) {
                            // A dynamic dependency now gates this task;
                            // the caller will be rescheduled after the
                            // conflicter finishes.
                            event_log::emit(Event::BufferConflict(
                                self.entries[idx].buf.id(), requestor,
                            ));
                            self.status = AcquireSetStatus::Idle;
                            return Ok(false);
                        }
                        // Conflicter already finished; retry immediately.
                        thread::yield_now();
                        continue 'restart;
                    }
                    None => {
                        // Conflict is with another tentative holder; spin.
                        thread::sleep(Duration::from_micros(10));
                        continue 'restart;
                    }
                }
            }

            self.status = AcquireSetStatus::TentativelyAcquired;

            // Pass 2: confirm. Guaranteed to succeed.
            for &idx in &coalesced {
                let entry = &mut self.entries[idx];
                let devices_for_entry: Vec<ExecutorDevice> = match entry.override_devices {
                    Some(subset) => self.devices.iter().copied().filter(|d| subset.has(*d)).collect(),
                    None => self.devices.clone(),
                };

                entry.cells = vec![Cell::Empty; self.devices.len()];

                if let Some(arena_type) = entry.preacquired {
                    for (i, d) in self.devices.iter().enumerate() {
                        entry.cells[i] = if devices_for_entry.contains(d) { Cell::Real(arena_type) } else { Cell::Fake };
                    }
                    continue;
                }

                let per_device_set = devices_for_entry.iter().fold(ExecutorDeviceSet::empty(), |acc, d| acc | ExecutorDeviceSet::single(*d));

                self.policy.request_acquire(
                    &entry.buf,
                    requestor,
                    per_device_set,
                    entry.action,
                    AcquireScope::Confirm,
                    entry.used_as_texture,
                )?;

                for (i, d) in self.devices.iter().enumerate() {
                    if !devices_for_entry.contains(d) {
                        entry.cells[i] = Cell::Fake;
                        continue;
                    }
                    let arena_type = self.policy.get_arena_type_accessed_by(*d, entry.used_as_texture);
                    entry.cells[i] = Cell::Real(arena_type);
                }
            }

            // Mirror cells onto duplicate (coalesced-away) entries so that
            // `find_acquired_arena` resolves correctly regardless of which
            // original index the caller queries.
            for i in 0..self.entries.len() {
                if coalesced.contains(&i) {
                    continue;
                }
                if let Some(&primary) = coalesced.iter().find(|&&p| Arc::ptr_eq(&self.entries[p].buf, &self.entries[i].buf)) {
                    self.entries[i].cells = self.entries[primary].cells.clone();
                }
            }

            self.status = AcquireSetStatus::FullyAcquired;
            return Ok(true);
        }
    }

    /// Convenience wrapper around `acquire`. Tentative-vs-tentative
    /// collisions are already spun out internally by `acquire` itself; a
    /// `false` result here is always final, either because dependency
    /// injection is off (the caller should fail/retry the whole task) or
    /// because a dynamic dependency was just registered on the conflicter
    /// (the caller is rescheduled once it finishes, so retrying here would
    /// only register duplicate dependencies).
    pub fn blocking_acquire(
        &mut self,
        requestor: TaskId,
        device_set: ExecutorDeviceSet,
        setup_task_deps_on_conflict: bool,
        mut resolve_conflict: impl FnMut(TaskId) -> bool,
    ) -> Result<bool> {
        self.acquire(requestor, device_set, setup_task_deps_on_conflict, &mut resolve_conflict)
    }

    pub fn find_acquired_arena(&self, buffer_index: usize, device: ExecutorDevice) -> Option<ArenaType> {
        let entry = self.entries.get(buffer_index)?;
        let i = self.devices.iter().position(|d| *d == device)?;
        match entry.cells.get(i)? {
            Cell::Real(t) => Some(*t),
            _ => None,
        }
    }

    pub fn release(&mut self, requestor: TaskId) {
        for entry in &self.entries {
            if entry.preacquired.is_some() {
                continue;
            }
            if self.status != AcquireSetStatus::Idle {
                self.policy.release(&entry.buf, requestor);
            }
        }
        self.status = AcquireSetStatus::Idle;
        for entry in &mut self.entries {
            entry.cells.clear();
        }
    }
}

impl Default for BufferAcquireSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::object_id::TaskId;

    #[test]
    fn single_buffer_acquire_and_release_round_trips() {
        let buf = Arc::new(BufferState::new(16, false));
        let mut set = BufferAcquireSet::new();
        set.add(buf.clone(), AcquireAction::Write, false);
        let requestor = TaskId::next();
        let ok = set.acquire(requestor, ExecutorDeviceSet::CPU, false, |_| false).unwrap();
        assert!(ok);
        assert_eq!(set.status(), AcquireSetStatus::FullyAcquired);
        set.release(requestor);
        assert_eq!(buf.acquire_set_len(), 0);
    }

    #[test]
    fn conflicting_writer_fails_without_dependency_injection() {
        let buf = Arc::new(BufferState::new(16, false));
        let first = TaskId::next();
        let second = TaskId::next();

        let mut set_a = BufferAcquireSet::new();
        set_a.add(buf.clone(), AcquireAction::Write, false);
        assert!(set_a.acquire(first, ExecutorDeviceSet::CPU, false, |_| false).unwrap());

        let mut set_b = BufferAcquireSet::new();
        set_b.add(buf.clone(), AcquireAction::Write, false);
        let ok = set_b.acquire(second, ExecutorDeviceSet::CPU, false, |_| false).unwrap();
        assert!(!ok);

        set_a.release(first);
    }

    #[test]
    fn coalesces_duplicate_buffer_into_superset_access() {
        let buf = Arc::new(BufferState::new(16, false));
        let mut set = BufferAcquireSet::new();
        set.add(buf.clone(), AcquireAction::Read, false);
        set.add(buf.clone(), AcquireAction::Write, false);
        let requestor = TaskId::next();
        assert!(set.acquire(requestor, ExecutorDeviceSet::CPU, false, |_| false).unwrap());
        assert_eq!(buf.acquire_set_len(), 1);
        set.release(requestor);
    }
}
