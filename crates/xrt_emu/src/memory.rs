//! Buffer objects: device allocations with host-visible mirrors.
//!
//! A [`BufferObject`] owns two copies of its data: a slab in device memory
//! and a mirror in host memory. The two are synchronized only by explicit
//! [`BufferObject::sync`] calls, one full copy per direction, matching how a
//! real runtime schedules DMA. A kernel observes exactly what was pushed
//! with [`SyncDirection::ToDevice`], and the host observes results only
//! after [`SyncDirection::FromDevice`].

use std::mem::size_of;

use bitflags::bitflags;
use bytemuck::Pod;

use crate::device::Device;
use crate::error::{XrtError, XrtResult};
use crate::kernel::Arg;

bitflags! {
    /// Allocation flags for a buffer object.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct BoFlags: u32 {
        /// Host mirror may be cached; accepted for API compatibility, the
        /// emulation does not distinguish cached mirrors.
        const CACHEABLE = 0b001;
        /// Device-only allocation: no host mirror, `map` fails.
        const DEVICE_ONLY = 0b010;
        /// Host-only allocation: no device slab, cannot be synced or passed
        /// to a kernel.
        const HOST_ONLY = 0b100;
    }
}

/// Direction of an explicit buffer synchronization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncDirection {
    /// Copy the host mirror into device memory.
    ToDevice,
    /// Copy device memory into the host mirror.
    FromDevice,
}

/// A device buffer with a host-visible mirror, bound to one memory bank.
///
/// The bank is fixed at allocation time and checked against the kernel's
/// argument grouping when the buffer is passed to
/// [`Kernel::start`](crate::kernel::Kernel::start). Use
/// [`Kernel::group_id`](crate::kernel::Kernel::group_id) to pick the right
/// bank for an argument slot.
///
/// # Example
///
/// ```
/// # use xrt_emu::prelude::*;
/// # fn main() -> XrtResult<()> {
/// let device = Device::get_device(0)?;
/// let mut bo = BufferObject::<u32>::new(&device, 16, 0)?;
/// bo.populate(|i| i as u32)?;
/// bo.sync(SyncDirection::ToDevice)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BufferObject<T: Pod> {
    device: Device,
    slab: Option<u64>,
    host: Vec<T>,
    len: usize,
    bank: u32,
    flags: BoFlags,
}

impl<T: Pod> BufferObject<T> {
    /// Allocate a buffer of `len` elements on the given memory bank.
    ///
    /// Fails with [`XrtError::OutOfMemory`] if the device cannot satisfy the
    /// allocation.
    pub fn new(device: &Device, len: usize, bank: u32) -> XrtResult<Self> {
        Self::new_with_flags(device, len, bank, BoFlags::empty())
    }

    /// Allocate a buffer with explicit [`BoFlags`].
    pub fn new_with_flags(
        device: &Device,
        len: usize,
        bank: u32,
        flags: BoFlags,
    ) -> XrtResult<Self> {
        if flags.contains(BoFlags::DEVICE_ONLY) && flags.contains(BoFlags::HOST_ONLY) {
            return Err(XrtError::InvalidValue);
        }
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or(XrtError::OutOfMemory)?;
        let slab = if flags.contains(BoFlags::HOST_ONLY) {
            None
        } else {
            Some(device.alloc(bytes)?)
        };
        let host = if flags.contains(BoFlags::DEVICE_ONLY) {
            Vec::new()
        } else {
            vec![T::zeroed(); len]
        };
        Ok(BufferObject {
            device: device.clone(),
            slab,
            host,
            len,
            bank,
            flags,
        })
    }

    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the buffer in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    /// The memory bank this buffer is bound to.
    pub fn bank(&self) -> u32 {
        self.bank
    }

    pub fn flags(&self) -> BoFlags {
        self.flags
    }

    /// Borrow the host mirror. Fails for `DEVICE_ONLY` buffers.
    pub fn map(&self) -> XrtResult<&[T]> {
        if self.flags.contains(BoFlags::DEVICE_ONLY) {
            return Err(XrtError::InvalidValue);
        }
        Ok(&self.host)
    }

    /// Mutably borrow the host mirror. Fails for `DEVICE_ONLY` buffers.
    pub fn map_mut(&mut self) -> XrtResult<&mut [T]> {
        if self.flags.contains(BoFlags::DEVICE_ONLY) {
            return Err(XrtError::InvalidValue);
        }
        Ok(&mut self.host)
    }

    /// Write `generator(i)` for every index into the host mirror.
    ///
    /// Pure host-side; the device copy is untouched until the buffer is
    /// synced to the device.
    pub fn populate<F: FnMut(usize) -> T>(&mut self, mut generator: F) -> XrtResult<()> {
        for (i, slot) in self.map_mut()?.iter_mut().enumerate() {
            *slot = generator(i);
        }
        Ok(())
    }

    /// Synchronize buffer content between host and device.
    ///
    /// The transfer is a synchronous full copy; the call returns once the
    /// copy is complete. Fails with [`XrtError::InvalidValue`] for buffers
    /// lacking the side the direction needs.
    pub fn sync(&mut self, direction: SyncDirection) -> XrtResult<()> {
        let slab = self.slab.ok_or(XrtError::InvalidValue)?;
        if self.flags.contains(BoFlags::DEVICE_ONLY) {
            return Err(XrtError::InvalidValue);
        }
        match direction {
            SyncDirection::ToDevice => self
                .device
                .write_slab(slab, bytemuck::cast_slice(&self.host)),
            SyncDirection::FromDevice => self
                .device
                .read_slab(slab, bytemuck::cast_slice_mut(&mut self.host)),
        }
    }

    /// Pass this buffer as a positional kernel argument.
    pub fn as_arg(&self) -> Arg<'_> {
        Arg::buffer(&self.device, self.slab, self.bank)
    }
}

impl<T: Pod> Drop for BufferObject<T> {
    fn drop(&mut self) {
        if let Some(slab) = self.slab.take() {
            self.device.free(slab);
        }
    }
}
