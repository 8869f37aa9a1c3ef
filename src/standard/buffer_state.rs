//! The logical identity of a buffer, orthogonal to any device's view of it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::standard::arena::{Arena, ArenaType, CopyEngine, HostCopyEngine};
use crate::standard::device::{ExecutorDevice, ExecutorDeviceSet};
use crate::standard::event_log::{self, Event};
use crate::standard::object_id::{BufferId, TaskId};

/// The kind of access a requestor holds (or wants) on a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
    Unspecified,
}

impl Access {
    fn is_read(self) -> bool {
        matches!(self, Access::Read)
    }

    fn is_write_like(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }

    /// Superset of two accesses on the same buffer by the same requestor;
    /// anything other than an identical pair collapses to `ReadWrite`.
    fn combine(self, other: Access) -> Access {
        if self == other {
            self
        } else {
            Access::ReadWrite
        }
    }
}

/// One entry in a `BufferState`'s acquire set.
///
/// Invariants: `tentative` implies `multiplicity == 0`; a confirmed entry
/// has `multiplicity >= 1`; `per_device_arena` is populated only once
/// confirmed.
#[derive(Debug, Clone)]
pub struct AcquireInfo {
    pub requestor: TaskId,
    pub device_set: ExecutorDeviceSet,
    pub access: Access,
    pub tentative: bool,
    pub multiplicity: usize,
    per_device_arena: HashMap<ExecutorDevice, ArenaType>,
}

impl AcquireInfo {
    pub fn arena_for(&self, device: ExecutorDevice) -> Option<ArenaType> {
        self.per_device_arena.get(&device).copied()
    }
}

/// Outcome of a call to `add_acquire_requestor`.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub ok: bool,
    pub conflicting_requestor: Option<TaskId>,
    pub multiplicity: usize,
}

impl ConflictInfo {
    fn ok() -> ConflictInfo {
        ConflictInfo { ok: true, conflicting_requestor: None, multiplicity: 0 }
    }

    fn conflict(requestor: Option<TaskId>, multiplicity: usize) -> ConflictInfo {
        ConflictInfo { ok: false, conflicting_requestor: requestor, multiplicity }
    }
}

/// Result of searching for a valid source to synchronise `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySource {
    AlreadyValid,
    Found(ArenaType),
    NoSource,
    CopyConflict,
}

#[derive(Debug, Default, Clone, Copy)]
struct SampleMeanVar {
    count: u64,
    mean: f64,
    m2: f64,
}

impl SampleMeanVar {
    fn update(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

/// Per-(src, dst) arena-type running copy-duration statistics, enabled
/// only when the owning `Runtime`'s config requests it.
pub struct BufferStatistics {
    table: Vec<Vec<Mutex<SampleMeanVar>>>,
}

impl BufferStatistics {
    fn new() -> BufferStatistics {
        let table = (0..ArenaType::COUNT)
            .map(|_| (0..ArenaType::COUNT).map(|_| Mutex::new(SampleMeanVar::default())).collect())
            .collect();
        BufferStatistics { table }
    }

    fn sample(&self, src: ArenaType, dst: ArenaType, seconds: f64) {
        self.table[src.index()][dst.index()].lock().update(seconds);
    }

    /// Returns `(mean, variance)` copy duration in seconds for the given
    /// arena-type pair, if any sample has been recorded.
    pub fn mean_variance(&self, src: ArenaType, dst: ArenaType) -> Option<(f64, f64)> {
        let s = self.table[src.index()][dst.index()].lock();
        if s.count == 0 {
            None
        } else {
            Some((s.mean, s.variance()))
        }
    }
}

struct Inner {
    existing_arenas: HashMap<ArenaType, Arena>,
    valid_data_arenas: HashSet<ArenaType>,
    acquire_set: Vec<AcquireInfo>,
    device_hints: ExecutorDeviceSet,
    pending_host_acquires: bool,
    name: Option<String>,
}

/// The ref-counted identity of a logical buffer.
///
/// All state transitions are serialised through `inner`'s mutex; each
/// public method takes the lock for the duration of one transition rather
/// than exposing the lock itself to callers.
pub struct BufferState {
    id: BufferId,
    size_in_bytes: usize,
    inner: Mutex<Inner>,
    cond: Condvar,
    statistics: Option<BufferStatistics>,
    copy_engine: Box<dyn CopyEngine>,
}

impl fmt::Debug for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferState")
            .field("id", &self.id)
            .field("name", &inner.name)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("arenas", &inner.existing_arenas.keys().collect::<Vec<_>>())
            .field("valid", &inner.valid_data_arenas)
            .field("acquire_set_len", &inner.acquire_set.len())
            .finish()
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock();
        match &inner.name {
            Some(name) => write!(f, "buffer {} '{}'", self.id, name),
            None => write!(f, "buffer {}", self.id),
        }
    }
}

impl BufferState {
    pub fn new(size_in_bytes: usize, statistics_enabled: bool) -> BufferState {
        BufferState {
            id: BufferId::next(),
            size_in_bytes,
            inner: Mutex::new(Inner {
                existing_arenas: HashMap::new(),
                valid_data_arenas: HashSet::new(),
                acquire_set: Vec::new(),
                device_hints: ExecutorDeviceSet::empty(),
                pending_host_acquires: false,
                name: None,
            }),
            cond: Condvar::new(),
            statistics: if statistics_enabled { Some(BufferStatistics::new()) } else { None },
            copy_engine: Box::new(HostCopyEngine),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.lock().name = Some(name.into());
    }

    pub fn name(&self) -> Option<String> {
        self.inner.lock().name.clone()
    }

    pub fn device_hints(&self) -> ExecutorDeviceSet {
        self.inner.lock().device_hints
    }

    pub fn statistics(&self) -> Option<&BufferStatistics> {
        self.statistics.as_ref()
    }

    pub fn has_arena(&self, arena_type: ArenaType) -> bool {
        self.inner.lock().existing_arenas.contains_key(&arena_type)
    }

    pub fn is_valid_data_arena(&self, arena_type: ArenaType) -> bool {
        self.inner.lock().valid_data_arenas.contains(&arena_type)
    }

    /// Inserts `arena`. Errors if an arena of that type already exists, or
    /// if `has_valid_data` is requested while another arena already holds
    /// valid data.
    pub fn add_arena(&self, arena: Arena, has_valid_data: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::add_arena_locked(&mut inner, arena, has_valid_data, self.id)
    }

    fn add_arena_locked(inner: &mut Inner, arena: Arena, has_valid_data: bool, id: BufferId) -> Result<()> {
        let arena_type = arena.get_type();
        if inner.existing_arenas.contains_key(&arena_type) {
            return Err(Error::InvalidArgument(format!(
                "arena of type {} already exists on buffer {}",
                arena_type, id
            )));
        }
        if has_valid_data && !inner.valid_data_arenas.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "buffer {} already has a valid arena; cannot add another as valid",
                id
            )));
        }
        inner.existing_arenas.insert(arena_type, arena);
        if has_valid_data {
            inner.valid_data_arenas.insert(arena_type);
        }
        Ok(())
    }

    pub fn remove_arena(&self, arena_type: ArenaType, delete: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if delete {
            let bound_by_peer = inner.existing_arenas.values().any(|a| a.get_bound_to() == Some(arena_type));
            if bound_by_peer {
                return Err(Error::InvalidArgument(format!(
                    "cannot delete arena {}: another arena is bound to it", arena_type
                )));
            }
        }
        inner.existing_arenas.remove(&arena_type);
        inner.valid_data_arenas.remove(&arena_type);
        Ok(())
    }

    pub fn invalidate_arena(&self, arena_type: ArenaType) {
        self.inner.lock().valid_data_arenas.remove(&arena_type);
    }

    /// A bound-to peer of a newly-valid arena is treated as implicitly
    /// valid: its bound target being valid means the bytes are already
    /// visible through it, so it is never separately invalidated.
    fn is_implicitly_valid(inner: &Inner, arena_type: ArenaType) -> bool {
        inner.existing_arenas.get(&arena_type)
            .and_then(|a| a.get_bound_to())
            .map(|target| inner.valid_data_arenas.contains(&target))
            .unwrap_or(false)
    }

    /// Chooses a copy source for `dst`. Prefers a source already bound to
    /// `dst` (zero-copy), otherwise any valid source, tie-broken by arena
    /// type enumeration order.
    pub fn pick_optimal_copy_from(&self, dst: ArenaType) -> CopySource {
        let inner = self.inner.lock();
        Self::pick_optimal_copy_from_locked(&inner, dst)
    }

    fn pick_optimal_copy_from_locked(inner: &Inner, dst: ArenaType) -> CopySource {
        if inner.valid_data_arenas.contains(&dst) || Self::is_implicitly_valid(inner, dst) {
            return CopySource::AlreadyValid;
        }
        if inner.valid_data_arenas.is_empty() {
            return CopySource::NoSource;
        }
        let dst_arena = match inner.existing_arenas.get(&dst) {
            Some(a) => a,
            None => return CopySource::NoSource,
        };
        if let Some(bound_target) = dst_arena.get_bound_to() {
            if inner.valid_data_arenas.contains(&bound_target) {
                return CopySource::Found(bound_target);
            }
        }
        let mut candidates: Vec<ArenaType> = inner.valid_data_arenas.iter().copied().collect();
        candidates.sort_by_key(|t| t.index());
        for src in candidates {
            if let Some(src_arena) = inner.existing_arenas.get(&src) {
                if Arena::can_copy(src_arena, dst_arena) {
                    return CopySource::Found(src);
                }
            }
        }
        CopySource::CopyConflict
    }

    /// Copies bytes from `src` into `dst`, marking `dst` valid. Precondition:
    /// `src` is currently valid and `Arena::can_copy(src, dst)` holds.
    pub fn copy_valid_data(&self, src: ArenaType, dst: ArenaType) -> Result<()> {
        let mut inner = self.inner.lock();
        self.copy_valid_data_locked(&mut inner, src, dst)
    }

    fn copy_valid_data_locked(&self, inner: &mut Inner, src: ArenaType, dst: ArenaType) -> Result<()> {
        if !inner.valid_data_arenas.contains(&src) {
            return Err(Error::RuntimeFatal(format!(
                "copy_valid_data: source arena {} is not valid", src
            )));
        }
        // Split the borrow: take `src` bytes out, then copy into `dst`.
        let src_bytes = {
            let src_arena = inner.existing_arenas.get(&src)
                .ok_or_else(|| Error::RuntimeFatal(format!("missing source arena {}", src)))?;
            src_arena.bytes().to_vec()
        };
        let dst_arena = inner.existing_arenas.get_mut(&dst)
            .ok_or_else(|| Error::RuntimeFatal(format!("missing destination arena {}", dst)))?;
        if dst_arena.bytes().len() != src_bytes.len() {
            return Err(Error::RuntimeFatal(format!(
                "arena size mismatch copying {} -> {}", src, dst
            )));
        }
        dst_arena.bytes_mut().copy_from_slice(&src_bytes);
        inner.valid_data_arenas.insert(dst);
        if let Some(stats) = &self.statistics {
            stats.sample(src, dst, 0.0);
        }
        Ok(())
    }

    /// Makes `arena_type` the sole valid arena, synchronising data into it
    /// first if necessary.
    pub fn designate_as_unique_valid(&self, arena_type: ArenaType) -> Result<()> {
        let mut inner = self.inner.lock();
        self.designate_as_unique_valid_locked(&mut inner, arena_type)
    }

    fn designate_as_unique_valid_locked(&self, inner: &mut Inner, arena_type: ArenaType) -> Result<()> {
        let already_valid = inner.valid_data_arenas.contains(&arena_type) || Self::is_implicitly_valid(inner, arena_type);
        if !already_valid {
            match Self::pick_optimal_copy_from_locked(inner, arena_type) {
                CopySource::AlreadyValid => {}
                CopySource::Found(src) => self.copy_valid_data_locked(inner, src, arena_type)?,
                CopySource::NoSource => {
                    // Nothing valid exists yet; the new arena becomes valid
                    // with whatever (zeroed) contents it was allocated with.
                }
                CopySource::CopyConflict => {
                    return Err(Error::RuntimeFatal(format!(
                        "no valid source could be copied into {}", arena_type
                    )));
                }
            }
        }
        inner.valid_data_arenas.insert(arena_type);
        let peers: Vec<ArenaType> = inner.existing_arenas.keys().copied()
            .filter(|t| *t != arena_type)
            .collect();
        for peer in peers {
            if Self::is_implicitly_valid(inner, peer) {
                continue;
            }
            inner.valid_data_arenas.remove(&peer);
        }
        Ok(())
    }

    /// Attempts to add `requestor` to the acquire set. See the module-level
    /// acquire protocol documentation for the exact conflict rules.
    pub fn add_acquire_requestor(
        &self,
        requestor: TaskId,
        device_set: ExecutorDeviceSet,
        access: Access,
        tentative: bool,
    ) -> ConflictInfo {
        let mut inner = self.inner.lock();

        if let Some(existing_idx) = inner.acquire_set.iter().position(|e| e.requestor == requestor) {
            let (existing_tentative, existing_access) = {
                let e = &inner.acquire_set[existing_idx];
                (e.tentative, e.access)
            };
            if tentative {
                // (a) any new tentative request while already present conflicts.
                return ConflictInfo::conflict(
                    if existing_tentative { None } else { Some(requestor) },
                    inner.acquire_set[existing_idx].multiplicity,
                );
            }
            if existing_tentative {
                // (b) confirming-style request while prior entry is tentative.
                return ConflictInfo::conflict(None, 0);
            }
            if access.is_read() && !existing_access.is_read() {
                // (c) same requestor, confirmed, new read vs non-read prior.
                return ConflictInfo::conflict(Some(requestor), inner.acquire_set[existing_idx].multiplicity);
            }
            // (d) otherwise bump multiplicity and succeed.
            let entry = &mut inner.acquire_set[existing_idx];
            entry.multiplicity += 1;
            entry.access = entry.access.combine(access);
            return ConflictInfo::ok();
        }

        if access.is_read() {
            let all_read = inner.acquire_set.iter().all(|e| e.access.is_read());
            if !all_read {
                let conflicter = inner.acquire_set.iter().find(|e| !e.tentative && !e.access.is_read());
                return ConflictInfo::conflict(
                    conflicter.map(|e| e.requestor),
                    conflicter.map(|e| e.multiplicity).unwrap_or(0),
                );
            }
        } else if !inner.acquire_set.is_empty() {
            let conflicter = inner.acquire_set.iter().find(|e| !e.tentative);
            return ConflictInfo::conflict(
                conflicter.map(|e| e.requestor),
                conflicter.map(|e| e.multiplicity).unwrap_or(0),
            );
        }

        inner.acquire_set.push(AcquireInfo {
            requestor,
            device_set,
            access,
            tentative,
            multiplicity: if tentative { 0 } else { 1 },
            per_device_arena: HashMap::new(),
        });
        inner.device_hints |= device_set.hintable();
        event_log::emit(Event::BufferAcquired(self.id, requestor));
        ConflictInfo::ok()
    }

    pub fn confirm_tentative(&self, requestor: TaskId) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::confirm_tentative_locked(&mut inner, requestor, self.id)
    }

    fn confirm_tentative_locked(inner: &mut Inner, requestor: TaskId, id: BufferId) -> Result<()> {
        let entry = inner.acquire_set.iter_mut().find(|e| e.requestor == requestor)
            .ok_or_else(|| Error::InvalidArgument(format!(
                "confirm_tentative: no entry for {} on buffer {}", requestor, id
            )))?;
        if !entry.tentative {
            return Err(Error::InvalidArgument(format!(
                "confirm_tentative: entry for {} is not tentative", requestor
            )));
        }
        entry.tentative = false;
        entry.multiplicity = 1;
        Ok(())
    }

    pub fn update_acquire_info_with_arena(
        &self,
        requestor: TaskId,
        device: ExecutorDevice,
        arena_type: ArenaType,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::update_acquire_info_with_arena_locked(&mut inner, requestor, device, arena_type)
    }

    fn update_acquire_info_with_arena_locked(
        inner: &mut Inner,
        requestor: TaskId,
        device: ExecutorDevice,
        arena_type: ArenaType,
    ) -> Result<()> {
        let entry = inner.acquire_set.iter_mut().find(|e| e.requestor == requestor)
            .ok_or_else(|| Error::InvalidArgument(format!(
                "update_acquire_info_with_arena: no entry for {}", requestor
            )))?;
        entry.per_device_arena.insert(device, arena_type);
        Ok(())
    }

    /// Atomically confirms `requestor`'s tentative acquire against every
    /// `(device, arena_type)` pair: creates each arena that does not exist
    /// yet, synchronises valid data into it, and records it in the acquire
    /// entry — all under one lock acquisition, so two confirmers racing on
    /// the same buffer can never interleave arena creation with each other.
    pub(crate) fn unsafe_confirm(
        &self,
        requestor: TaskId,
        entries: &[(ExecutorDevice, ArenaType)],
        write_like: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::confirm_tentative_locked(&mut inner, requestor, self.id)?;

        for &(device, arena_type) in entries {
            if !inner.existing_arenas.contains_key(&arena_type) {
                let arena = Arena::new_internal(arena_type, self.size_in_bytes);
                Self::add_arena_locked(&mut inner, arena, false, self.id)?;
            }

            match Self::pick_optimal_copy_from_locked(&inner, arena_type) {
                CopySource::AlreadyValid => {}
                CopySource::Found(src) => self.copy_valid_data_locked(&mut inner, src, arena_type)?,
                CopySource::NoSource => {
                    // Freshly allocated arena; no data exists yet anywhere.
                }
                CopySource::CopyConflict => {
                    return Err(Error::RuntimeFatal(format!(
                        "no synchronisable source for arena {} on buffer {}", arena_type, self.id
                    )));
                }
            }

            if write_like {
                self.designate_as_unique_valid_locked(&mut inner, arena_type)?;
            }

            if let Some(arena) = inner.existing_arenas.get(&arena_type) {
                arena.ref_();
            }
            Self::update_acquire_info_with_arena_locked(&mut inner, requestor, device, arena_type)?;
        }

        Ok(())
    }

    /// Removes `requestor`'s entry (decrementing multiplicity first).
    /// Returns the remaining multiplicity (0 once the entry is gone).
    pub fn remove_acquire_requestor(&self, requestor: TaskId) -> usize {
        let mut inner = self.inner.lock();
        let idx = match inner.acquire_set.iter().position(|e| e.requestor == requestor) {
            Some(i) => i,
            None => return 0,
        };

        let (tentative, multiplicity) = {
            let e = &inner.acquire_set[idx];
            (e.tentative, e.multiplicity)
        };

        if tentative || multiplicity <= 1 {
            let entry = inner.acquire_set.remove(idx);
            for (device, arena_type) in entry.per_device_arena {
                if let Some(arena) = inner.existing_arenas.get(&arena_type) {
                    arena.unref();
                }
                let _ = device;
            }
            event_log::emit(Event::BufferReleased(self.id, requestor));
            if inner.acquire_set.is_empty() && inner.pending_host_acquires {
                inner.pending_host_acquires = false;
                self.cond.notify_one();
            }
            0
        } else {
            inner.acquire_set[idx].multiplicity -= 1;
            inner.acquire_set[idx].multiplicity
        }
    }

    pub fn acquire_set_len(&self) -> usize {
        self.inner.lock().acquire_set.len()
    }

    pub fn acquire_entries(&self) -> Vec<AcquireInfo> {
        self.inner.lock().acquire_set.clone()
    }

    /// Blocks the calling (host) thread until the acquire set is empty.
    pub fn wait_for_release_signal(&self) {
        let mut inner = self.inner.lock();
        while !inner.acquire_set.is_empty() {
            inner.pending_host_acquires = true;
            self.cond.wait(&mut inner);
        }
    }

    pub(crate) fn existing_arena_type(&self, arena_type: ArenaType) -> bool {
        self.inner.lock().existing_arenas.contains_key(&arena_type)
    }

    pub(crate) fn with_arena_mut<F, R>(&self, arena_type: ArenaType, f: F) -> Option<R>
    where
        F: FnOnce(&mut Arena) -> R,
    {
        let mut inner = self.inner.lock();
        inner.existing_arenas.get_mut(&arena_type).map(f)
    }

    pub(crate) fn ref_arena(&self, arena_type: ArenaType) {
        let inner = self.inner.lock();
        if let Some(arena) = inner.existing_arenas.get(&arena_type) {
            arena.ref_();
        }
    }
}

impl Drop for BufferState {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        debug_assert!(
            inner.acquire_set.is_empty(),
            "BufferState {} dropped while {} acquire(s) still held",
            self.id,
            inner.acquire_set.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u64) -> TaskId {
        // Tests only need distinct ids, not the real allocator sequence.
        for _ in 0..n {
            let _ = TaskId::next();
        }
        TaskId::next()
    }

    #[test]
    fn readers_coalesce() {
        let buf = BufferState::new(1024, false);
        let r1 = t(0);
        let r2 = t(0);
        let c1 = buf.add_acquire_requestor(r1, ExecutorDeviceSet::CPU, Access::Read, false);
        let c2 = buf.add_acquire_requestor(r2, ExecutorDeviceSet::CPU, Access::Read, false);
        assert!(c1.ok);
        assert!(c2.ok);
        assert_eq!(buf.acquire_set_len(), 2);
    }

    #[test]
    fn writer_excludes_others() {
        let buf = BufferState::new(1024, false);
        let w = t(0);
        let r = t(0);
        let c1 = buf.add_acquire_requestor(w, ExecutorDeviceSet::CPU, Access::Write, false);
        assert!(c1.ok);
        let c2 = buf.add_acquire_requestor(r, ExecutorDeviceSet::CPU, Access::Read, false);
        assert!(!c2.ok);
        assert_eq!(c2.conflicting_requestor, Some(w));
    }

    #[test]
    fn remove_signals_pending_host_wait() {
        let buf = BufferState::new(1024, false);
        let w = t(0);
        buf.add_acquire_requestor(w, ExecutorDeviceSet::CPU, Access::Write, false);
        assert_eq!(buf.remove_acquire_requestor(w), 0);
        assert_eq!(buf.acquire_set_len(), 0);
    }

    #[test]
    fn multiplicity_increments_and_decrements() {
        let buf = BufferState::new(1024, false);
        let r = t(0);
        buf.add_acquire_requestor(r, ExecutorDeviceSet::CPU, Access::Read, false);
        let c = buf.add_acquire_requestor(r, ExecutorDeviceSet::CPU, Access::Read, false);
        assert!(c.ok);
        assert_eq!(buf.remove_acquire_requestor(r), 1);
        assert_eq!(buf.remove_acquire_requestor(r), 0);
    }
}
