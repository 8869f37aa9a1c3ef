//! Device-local buffer backings.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// A storage backing kind. Doubles as a dense array index
/// (`ArenaType::COUNT` entries) wherever `BufferState` keeps a per-type
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaType {
    MainMemory,
    GpuClBuffer,
    GpuClTexture,
    GlBuffer,
    DspIon,
    /// Sentinel meaning "no arena"; never a key of `existing_arenas`.
    None,
}

impl ArenaType {
    pub const COUNT: usize = 5;

    pub(crate) fn index(self) -> usize {
        match self {
            ArenaType::MainMemory => 0,
            ArenaType::GpuClBuffer => 1,
            ArenaType::GpuClTexture => 2,
            ArenaType::GlBuffer => 3,
            ArenaType::DspIon => 4,
            ArenaType::None => usize::MAX,
        }
    }
}

impl fmt::Display for ArenaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ArenaType::MainMemory => "main_memory",
            ArenaType::GpuClBuffer => "gpu_cl_buffer",
            ArenaType::GpuClTexture => "gpu_cl_texture",
            ArenaType::GlBuffer => "gl_buffer",
            ArenaType::DspIon => "dsp_ion",
            ArenaType::None => "none",
        };
        f.write_str(s)
    }
}

/// How an arena's storage came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    Unallocated,
    /// Allocated and owned by this arena.
    Internal,
    /// Wraps storage supplied by the caller (e.g. `create_buffer_from_region`).
    External,
    /// Aliases another arena's storage; see `bound_to`.
    Bound,
}

/// One device-addressable backing of a buffer's bytes.
///
/// Invariant: if `alloc_kind` is `Unallocated` the arena is never marked
/// valid by its owning `BufferState`.
pub struct Arena {
    arena_type: ArenaType,
    alloc_kind: AllocKind,
    bound_to: Option<ArenaType>,
    size_in_bytes: usize,
    storage: Vec<u8>,
    refcount: AtomicUsize,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Arena")
            .field("arena_type", &self.arena_type)
            .field("alloc_kind", &self.alloc_kind)
            .field("bound_to", &self.bound_to)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("refcount", &self.refcount.load(Ordering::Relaxed))
            .finish()
    }
}

impl Arena {
    pub fn new_internal(arena_type: ArenaType, size_in_bytes: usize) -> Arena {
        Arena {
            arena_type,
            alloc_kind: AllocKind::Internal,
            bound_to: None,
            size_in_bytes,
            storage: vec![0u8; size_in_bytes],
            refcount: AtomicUsize::new(0),
        }
    }

    pub fn new_external(arena_type: ArenaType, storage: Vec<u8>) -> Arena {
        let size_in_bytes = storage.len();
        Arena {
            arena_type,
            alloc_kind: AllocKind::External,
            bound_to: None,
            size_in_bytes,
            storage,
            refcount: AtomicUsize::new(0),
        }
    }

    pub fn new_bound(arena_type: ArenaType, bound_to: ArenaType, size_in_bytes: usize) -> Arena {
        Arena {
            arena_type,
            alloc_kind: AllocKind::Bound,
            bound_to: Some(bound_to),
            size_in_bytes,
            storage: Vec::new(),
            refcount: AtomicUsize::new(0),
        }
    }

    pub fn get_type(&self) -> ArenaType {
        self.arena_type
    }

    pub fn get_alloc_kind(&self) -> AllocKind {
        self.alloc_kind
    }

    pub fn get_bound_to(&self) -> Option<ArenaType> {
        self.bound_to
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    pub fn ref_(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn unref(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// Pure policy predicate: can bytes be transferred from `src` into
    /// `dst`? False when the pair shares storage under incompatible
    /// aliasing or when no copy path is registered for the type pair.
    pub fn can_copy(src: &Arena, dst: &Arena) -> bool {
        if dst.alloc_kind == AllocKind::Unallocated {
            return false;
        }
        if src.bound_to == Some(dst.arena_type) || dst.bound_to == Some(src.arena_type) {
            // Zero-copy pair; always permitted (and normally short-circuited
            // before a physical copy is even attempted).
            return true;
        }
        // The crate ships copy support for every registered pair; an
        // out-of-scope driver layer could restrict this further.
        true
    }
}

/// Performs the actual byte transfer for one arena-type pair.
///
/// The driver layer (out of scope for this crate) is expected to supply a
/// `CopyEngine` per real device; `HostCopyEngine` is the in-process default,
/// sufficient for CPU-CPU transfers and as a test double for every other
/// pair.
pub trait CopyEngine: Send + Sync {
    fn copy(&self, src: &Arena, dst: &mut Arena) -> Result<()>;
}

/// Plain `memcpy`-equivalent copy engine. Used whenever no richer device
/// copy path has been registered, including tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostCopyEngine;

impl CopyEngine for HostCopyEngine {
    fn copy(&self, src: &Arena, dst: &mut Arena) -> Result<()> {
        if src.storage.len() != dst.storage.len() {
            return Err(Error::RuntimeFatal(format!(
                "arena size mismatch during copy: {} != {}",
                src.storage.len(),
                dst.storage.len()
            )));
        }
        dst.storage.copy_from_slice(&src.storage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unallocated_peer_cannot_be_copy_destination() {
        let src = Arena::new_internal(ArenaType::MainMemory, 16);
        let mut dst = Arena::new_internal(ArenaType::GpuClBuffer, 16);
        dst.alloc_kind = AllocKind::Unallocated;
        assert!(!Arena::can_copy(&src, &dst));
    }

    #[test]
    fn host_copy_engine_transfers_bytes() {
        let mut src = Arena::new_internal(ArenaType::MainMemory, 4);
        src.bytes_mut().copy_from_slice(&[1, 2, 3, 4]);
        let mut dst = Arena::new_internal(ArenaType::GpuClBuffer, 4);
        HostCopyEngine.copy(&src, &mut dst).unwrap();
        assert_eq!(dst.bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn refcount_tracks_ref_unref() {
        let arena = Arena::new_internal(ArenaType::MainMemory, 4);
        assert_eq!(arena.ref_(), 1);
        assert_eq!(arena.ref_(), 2);
        assert_eq!(arena.unref(), 1);
    }
}
