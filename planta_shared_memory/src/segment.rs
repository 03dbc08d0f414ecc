//! Line state segment mapping

use crate::error::{IpcError, IpcResult};
use crate::platform::{attach_segment_mmap, create_segment_mmap, remove_segment};
use crate::state::{LineState, SEGMENT_SIZE};
use memmap2::MmapMut;

/// A mapped line state segment
pub struct LineSegment {
    mmap: MmapMut,
}

impl LineSegment {
    /// Create a fresh, formatted segment, replacing a stale one
    pub fn create(name: &str) -> IpcResult<Self> {
        if remove_segment(name)? {
            tracing::debug!("Removed stale segment {}", name);
        }

        let mmap = create_segment_mmap(name, SEGMENT_SIZE)?;
        let segment = Self::wrap(name, mmap)?;
        segment.state().format();
        Ok(segment)
    }

    /// Attach to a segment created by the supervisor
    pub fn attach(name: &str) -> IpcResult<Self> {
        let mmap = attach_segment_mmap(name)?;
        let segment = Self::wrap(name, mmap)?;
        segment.state().validate(name)?;
        Ok(segment)
    }

    fn wrap(name: &str, mmap: MmapMut) -> IpcResult<Self> {
        if mmap.len() < std::mem::size_of::<LineState>() {
            return Err(IpcError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("segment is {} bytes", mmap.len()),
            });
        }
        validate_memory_alignment(mmap.as_ptr() as usize)?;
        Ok(Self { mmap })
    }

    /// Shared state view
    pub fn state(&self) -> &LineState {
        // SAFETY: the mapping is at least size_of::<LineState>() bytes and
        // 64-byte aligned (checked in `wrap`); LineState is repr(C) and made
        // only of atomics, for which the zero-filled or formatted bytes are
        // valid.
        unsafe { &*(self.mmap.as_ptr() as *const LineState) }
    }

    /// Remove the segment from the system. Existing mappings stay valid.
    pub fn remove(name: &str) -> IpcResult<bool> {
        remove_segment(name)
    }
}

/// Validate that `address` satisfies `LineState`'s alignment
pub fn validate_memory_alignment(address: usize) -> IpcResult<()> {
    let alignment = std::mem::align_of::<LineState>();
    if address % alignment != 0 {
        return Err(IpcError::LayoutMismatch {
            name: format!("{address:#x}"),
            reason: format!("mapping not aligned to {alignment}"),
        });
    }
    Ok(())
}
