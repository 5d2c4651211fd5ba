//! Memory-mapped I/O for the NPU bridge windows
//!
//! Two traits split the device memory by how it is used:
//!
//! - [`RegisterBus`]: 32-bit volatile register access, offsets are a caller
//!   contract (a bad offset is a bug and panics)
//! - [`SharedMemory`]: byte-addressable staging RAM, bounds are data-dependent
//!   and checked with `Result`
//!
//! [`MappedWindow`] implements both over a `/dev/mem` mapping made with
//! rustix. The software model in [`crate::sim`] implements them in memory.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]

use crate::error::{NpuError, Result};
use npu_chip::bridge::Window;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// Volatile 32-bit register access at byte offsets.
///
/// Every call is exactly one bus transaction, issued in program order.
pub trait RegisterBus {
    /// Read the register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`.
    fn write32(&self, offset: usize, value: u32);
}

impl<B: RegisterBus + ?Sized> RegisterBus for &B {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

/// Byte-addressable staging memory shared with the DMA engines.
pub trait SharedMemory {
    /// Size of the window in bytes.
    fn size(&self) -> usize;

    /// Copy `buffer.len()` bytes out of the window.
    ///
    /// # Errors
    ///
    /// Returns error if the read would exceed the window.
    fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> Result<()>;

    /// Copy `data` into the window.
    ///
    /// # Errors
    ///
    /// Returns error if the write would exceed the window.
    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Zero `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the range exceeds the window.
    fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        self.write_bytes(offset, &vec![0u8; len])
    }
}

impl<M: SharedMemory + ?Sized> SharedMemory for &mut M {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        (**self).read_bytes(offset, buffer)
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write_bytes(offset, data)
    }
}

/// Check `[offset, offset + len)` against `limit`.
pub(crate) fn check_bounds(offset: usize, len: usize, limit: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(NpuError::OutOfBounds { offset, len, limit }),
    }
}

/// A physical window mapped from `/dev/mem`
pub struct MappedWindow {
    ptr: NonNull<u8>,
    size: usize,
    base: u64,
}

impl std::fmt::Debug for MappedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWindow")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

// SAFETY: Send - MappedWindow owns the mapping exclusively. Moving it between threads
// doesn't invalidate the mapping (mmap'd memory is process-wide). It is deliberately not
// Sync: register writes go through &self and push/poll sequences must not interleave.
unsafe impl Send for MappedWindow {}

impl MappedWindow {
    /// Map `window` from an open `/dev/mem` handle
    ///
    /// # Errors
    ///
    /// Returns an error if the window is empty or mmap fails.
    pub fn map(dev_mem: &File, window: Window) -> Result<Self> {
        if window.span == 0 {
            return Err(NpuError::map_failed(window.base, 0, "empty window"));
        }

        tracing::debug!("Mapping {:#x}+{:#x}", window.base, window.span);

        // SAFETY: mmap necessary for MMIO - maps a physical window into the process.
        // Invariants: (1) dev_mem is an open /dev/mem handle; (2) span is non-zero;
        // (3) base is page aligned for every shipped window; (4) ptr valid for span bytes
        // or Err. Unmapped exactly once in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                window.span,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                dev_mem.as_fd(),
                window.base,
            )
        }
        .map_err(|e| NpuError::map_failed(window.base, window.span, e.to_string()))?;

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            NpuError::map_failed(window.base, window.span, "mmap returned null")
        })?;

        tracing::info!(
            "Mapped {:#x}+{:#x} at {ptr:p}",
            window.base,
            window.span
        );

        Ok(Self {
            ptr,
            size: window.span,
            base: window.base,
        })
    }

    /// Physical base address of the mapping
    pub const fn base(&self) -> u64 {
        self.base
    }
}

impl RegisterBus for MappedWindow {
    /// # Panics
    ///
    /// Panics if `offset` is misaligned or `offset + 4` exceeds the window.
    fn read32(&self, offset: usize) -> u32 {
        assert!(offset % 4 == 0, "Unaligned register offset {offset:#x}");
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap in map(), valid for self.size; (2) offset+4 <= size;
        // (3) u32 aligned (checked). Caller guarantees: offset names a register.
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        value
    }

    /// # Panics
    ///
    /// Panics if `offset` is misaligned or `offset + 4` exceeds the window.
    fn write32(&self, offset: usize, value: u32) {
        assert!(offset % 4 == 0, "Unaligned register offset {offset:#x}");
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= size; (3) u32 aligned (checked).
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
    }
}

impl SharedMemory for MappedWindow {
    fn size(&self) -> usize {
        self.size
    }

    fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        check_bounds(offset, buffer.len(), self.size)?;
        // SAFETY: copy_nonoverlapping from mapped RAM into a user buffer.
        // Invariants: (1) offset + len <= size (checked above); (2) src is inside the
        // mapping, dst is a valid mutable slice; (3) they cannot overlap; (4) u8 alignment.
        unsafe {
            let src = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(src, buffer.as_mut_ptr(), buffer.len());
        }
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.size)?;
        // SAFETY: copy_nonoverlapping from a user slice into mapped RAM.
        // Invariants: (1) offset + len <= size (checked above); (2) dst is inside the
        // mapping; (3) no overlap with the user slice; (4) u8 alignment.
        unsafe {
            let dst = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        // SAFETY: munmap necessary - releases the mapping made in map().
        // Invariants: (1) ptr/size are exactly what mmap returned/was given; (2) Drop runs
        // at most once; (3) no references into the mapping outlive self.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
        tracing::debug!("Unmapped {:#x}+{:#x}", self.base, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_check_rejects_overrun_and_overflow() {
        assert!(check_bounds(0, 16, 16).is_ok());
        assert!(matches!(
            check_bounds(8, 16, 16),
            Err(NpuError::OutOfBounds { offset: 8, len: 16, limit: 16 })
        ));
        assert!(check_bounds(usize::MAX, 1, 16).is_err());
    }
}
