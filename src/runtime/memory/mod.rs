// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::core::{
    alloc::Layout,
    ops::{
        Deref,
        DerefMut,
    },
    slice,
};
use ::std::alloc;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Alignment of device allocations. Matches the cache-line alignment required
/// by the handshake array.
const DEVICE_ALLOC_ALIGN: usize = 64;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A region of device global memory.
///
/// Device memory is modeled by a dedicated cache-line-aligned allocation that
/// is only touched through the explicit copy primitives below, so staging a
/// structure to the device is a real copy and the host mirror stays intact.
pub struct DeviceBuffer {
    /// Base address.
    ptr: *mut u8,
    /// Size in bytes.
    len: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for device buffers.
impl DeviceBuffer {
    /// Allocates a zero-initialized region of device memory.
    pub fn new(len: usize) -> Result<DeviceBuffer, Fail> {
        // Check if the requested length is invalid.
        if len == 0 {
            return Err(Fail::new(libc::EINVAL, "cannot allocate a zero-length device buffer"));
        }

        let layout: Layout = match Layout::from_size_align(len, DEVICE_ALLOC_ALIGN) {
            Ok(layout) => layout,
            Err(_) => return Err(Fail::new(libc::EINVAL, "invalid device buffer layout")),
        };

        let ptr: *mut u8 = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            let cause: String = format!("failed to allocate device memory (len={})", len);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::ENOMEM, &cause));
        }

        Ok(DeviceBuffer { ptr, len })
    }

    /// Returns the size of the target device buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the target device buffer has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the device address of the target buffer.
    pub fn addr(&self) -> u64 {
        self.ptr as u64
    }

    /// Copies a host buffer into the target device buffer at a given offset.
    pub fn copy_in(&mut self, offset: usize, src: &[u8]) -> Result<(), Fail> {
        // Check if the copy fits in the buffer.
        let end: Option<usize> = offset.checked_add(src.len());
        if end.is_none() || end > Some(self.len) {
            let cause: String = format!(
                "copy does not fit in device buffer (offset={}, len={}, capacity={})",
                offset,
                src.len(),
                self.len
            );
            error!("copy_in(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        unsafe {
            let dst: *mut u8 = self.ptr.add(offset);
            dst.copy_from_nonoverlapping(src.as_ptr(), src.len());
        }

        Ok(())
    }

    /// Copies out of the target device buffer at a given offset into a host buffer.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<(), Fail> {
        // Check if the copy fits in the buffer.
        let end: Option<usize> = offset.checked_add(dst.len());
        if end.is_none() || end > Some(self.len) {
            let cause: String = format!(
                "copy does not fit in device buffer (offset={}, len={}, capacity={})",
                offset,
                dst.len(),
                self.len
            );
            error!("copy_out(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        unsafe {
            let src: *const u8 = self.ptr.add(offset);
            dst.as_mut_ptr().copy_from_nonoverlapping(src, dst.len());
        }

        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Send trait implementation. Device buffers are handed to kernel launches as
/// raw addresses; the buffer itself stays owned by the host runtime.
unsafe impl Send for DeviceBuffer {}

/// Sync trait implementation.
unsafe impl Sync for DeviceBuffer {}

/// Dereference trait implementation.
impl Deref for DeviceBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

/// Mutable dereference trait implementation.
impl DerefMut for DeviceBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// Drop trait implementation.
impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // The layout cannot fail to reconstruct: it was validated on allocation.
        if let Ok(layout) = Layout::from_size_align(self.len, DEVICE_ALLOC_ALIGN) {
            unsafe { alloc::dealloc(self.ptr, layout) };
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
