//! Functions and types for enumerating accelerator devices and loading
//! images onto them.
//!
//! The emulation platform exposes a single device, index 0. Every call to
//! [`Device::get_device`] opens an independent device: its memory, loaded
//! image and command queue are private to that handle (and to clones of it),
//! so repeated runs of a host program cannot observe state from earlier runs.
//!
//! Internally a device is a fixed-capacity memory arena plus a worker thread
//! that drains a command queue. Kernel launches are executed strictly in
//! submission order, which is the emulated analogue of a single in-order
//! hardware queue.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::error::{XrtError, XrtResult};
use crate::image::{Image, KernelDef, Opcode, Uuid};
use crate::run::RunInner;

/// Total device memory of the emulated accelerator, in bytes.
const DEVICE_MEMORY: usize = 256 * 1024 * 1024;

/// Locks a mutex, recovering the data if a device worker panicked while
/// holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An opened accelerator device.
///
/// `Device` is a cheap clonable handle; clones refer to the same device.
/// Buffer objects and kernels keep their device alive, and the device's
/// worker thread is joined when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct Device {
    inner: Arc<DeviceState>,
}

#[derive(Debug)]
struct DeviceState {
    name: String,
    mem: Arc<Mutex<DeviceMem>>,
    loaded: Mutex<Option<Image>>,
    queue: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Returns the number of accelerator devices on the platform.
    pub fn num_devices() -> XrtResult<u32> {
        Ok(1)
    }

    /// Open the device with the given index.
    ///
    /// Fails with [`XrtError::InvalidDevice`] if the index does not refer to
    /// an existing device.
    pub fn get_device(index: u32) -> XrtResult<Device> {
        if index >= Device::num_devices()? {
            return Err(XrtError::InvalidDevice);
        }
        let mem = Arc::new(Mutex::new(DeviceMem::new(DEVICE_MEMORY)));
        let (sender, receiver) = mpsc::channel();
        let worker_mem = Arc::clone(&mem);
        let worker = thread::Builder::new()
            .name(format!("xrt-emu{index}"))
            .spawn(move || worker_loop(receiver, worker_mem))
            .map_err(|_| XrtError::OperatingSystemError)?;
        Ok(Device {
            inner: Arc::new(DeviceState {
                name: format!("xrt-emu{index}"),
                mem,
                loaded: Mutex::new(None),
                queue: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// The name of this device.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total device memory in bytes.
    pub fn total_memory(&self) -> usize {
        lock(&self.inner.mem).capacity
    }

    /// Load an accelerator image file onto the device and return its UUID.
    ///
    /// Loading replaces any previously loaded image; kernels must afterwards
    /// be resolved against the UUID returned here.
    pub fn load_image<P: AsRef<Path>>(&self, path: P) -> XrtResult<Uuid> {
        self.install_image(Image::from_file(path)?)
    }

    /// Load an accelerator image from an in-memory blob.
    pub fn load_image_bytes(&self, bytes: &[u8]) -> XrtResult<Uuid> {
        self.install_image(Image::from_bytes(bytes)?)
    }

    fn install_image(&self, image: Image) -> XrtResult<Uuid> {
        let uuid = image.uuid();
        *lock(&self.inner.loaded) = Some(image);
        Ok(uuid)
    }

    /// Look up a kernel definition in the loaded image.
    ///
    /// `InvalidHandle` if no image is loaded or `uuid` is stale, `NotFound`
    /// if the image has no kernel of that name.
    pub(crate) fn resolve_kernel(&self, uuid: Uuid, name: &str) -> XrtResult<KernelDef> {
        let loaded = lock(&self.inner.loaded);
        match loaded.as_ref() {
            Some(image) if image.uuid() == uuid => {
                image.kernel(name).cloned().ok_or(XrtError::NotFound)
            }
            _ => Err(XrtError::InvalidHandle),
        }
    }

    pub(crate) fn alloc(&self, size: usize) -> XrtResult<u64> {
        lock(&self.inner.mem).alloc(size)
    }

    pub(crate) fn free(&self, id: u64) {
        lock(&self.inner.mem).free(id);
    }

    pub(crate) fn write_slab(&self, id: u64, bytes: &[u8]) -> XrtResult<()> {
        let mut mem = lock(&self.inner.mem);
        let slab = mem.slabs.get_mut(&id).ok_or(XrtError::InvalidValue)?;
        if slab.bytes.len() != bytes.len() {
            return Err(XrtError::InvalidValue);
        }
        slab.bytes.copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn read_slab(&self, id: u64, out: &mut [u8]) -> XrtResult<()> {
        let mem = lock(&self.inner.mem);
        let slab = mem.slabs.get(&id).ok_or(XrtError::InvalidValue)?;
        if slab.bytes.len() != out.len() {
            return Err(XrtError::InvalidValue);
        }
        out.copy_from_slice(&slab.bytes);
        Ok(())
    }

    pub(crate) fn submit(&self, command: Command) -> XrtResult<()> {
        let queue = lock(&self.inner.queue);
        match queue.as_ref() {
            Some(sender) => sender.send(command).map_err(|_| XrtError::LaunchFailed),
            None => Err(XrtError::LaunchFailed),
        }
    }

    pub(crate) fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Drop for DeviceState {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain outstanding launches and
        // exit; join so no thread outlives its device.
        drop(lock(&self.queue).take());
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

/// Device-side memory: fixed capacity, id-keyed slabs.
#[derive(Debug)]
struct DeviceMem {
    capacity: usize,
    used: usize,
    next_id: u64,
    slabs: HashMap<u64, Slab>,
}

#[derive(Debug)]
struct Slab {
    bytes: Vec<u8>,
}

impl DeviceMem {
    fn new(capacity: usize) -> DeviceMem {
        DeviceMem {
            capacity,
            used: 0,
            next_id: 1,
            slabs: HashMap::new(),
        }
    }

    fn alloc(&mut self, size: usize) -> XrtResult<u64> {
        let used = self.used.checked_add(size).ok_or(XrtError::OutOfMemory)?;
        if used > self.capacity {
            return Err(XrtError::OutOfMemory);
        }
        self.used = used;
        let id = self.next_id;
        self.next_id += 1;
        self.slabs.insert(id, Slab { bytes: vec![0; size] });
        Ok(id)
    }

    fn free(&mut self, id: u64) {
        if let Some(slab) = self.slabs.remove(&id) {
            self.used -= slab.bytes.len();
        }
    }
}

/// A launch argument after validation, as seen by the device.
#[derive(Debug)]
pub(crate) enum LaunchArg {
    Slab(u64),
    Scalar(u32),
}

/// A queued kernel launch.
#[derive(Debug)]
pub(crate) struct Command {
    pub opcode: Opcode,
    pub args: Vec<LaunchArg>,
    pub run: Arc<RunInner>,
}

fn worker_loop(receiver: Receiver<Command>, mem: Arc<Mutex<DeviceMem>>) {
    while let Ok(command) = receiver.recv() {
        let result = execute(&command, &mem);
        command.run.finish(result);
    }
}

fn execute(command: &Command, mem: &Mutex<DeviceMem>) -> XrtResult<()> {
    match command.opcode {
        Opcode::VecAdd => execute_binary(command, mem, u32::wrapping_add),
        Opcode::VecMul => execute_binary(command, mem, u32::wrapping_mul),
    }
}

/// Runs a lane-wise binary builtin over `(input0, input1, output, count)`.
///
/// The emulated device adopts the host's byte order, so lanes are
/// reinterpreted with native-endian loads and stores.
fn execute_binary(
    command: &Command,
    mem: &Mutex<DeviceMem>,
    op: fn(u32, u32) -> u32,
) -> XrtResult<()> {
    let (a, b, out, count) = match command.args.as_slice() {
        [LaunchArg::Slab(a), LaunchArg::Slab(b), LaunchArg::Slab(out), LaunchArg::Scalar(count)] => {
            (*a, *b, *out, *count as usize)
        }
        _ => return Err(XrtError::LaunchFailed),
    };
    let bytes = count.checked_mul(4).ok_or(XrtError::IllegalAddress)?;

    let mut mem = lock(mem);
    for id in [a, b, out] {
        let slab = mem.slabs.get(&id).ok_or(XrtError::LaunchFailed)?;
        if slab.bytes.len() < bytes {
            return Err(XrtError::IllegalAddress);
        }
    }

    let lanes = |bytes: &[u8]| -> Vec<u32> {
        bytes[..count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    };
    let lhs = lanes(&mem.slabs[&a].bytes);
    let rhs = lanes(&mem.slabs[&b].bytes);

    let out_slab = mem.slabs.get_mut(&out).ok_or(XrtError::LaunchFailed)?;
    for (i, (x, y)) in lhs.into_iter().zip(rhs).enumerate() {
        out_slab.bytes[i * 4..i * 4 + 4].copy_from_slice(&op(x, y).to_ne_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::image::{ImageBuilder, Opcode, Uuid};
    use std::io::Write;

    fn demo_image() -> Vec<u8> {
        ImageBuilder::new(Uuid([1; 16]))
            .vector_kernel("krnl_vadd", Opcode::VecAdd)
            .build()
    }

    #[test]
    fn platform_has_one_device() {
        assert_eq!(Device::num_devices().unwrap(), 1);
        assert!(Device::get_device(0).is_ok());
        assert_eq!(Device::get_device(1).unwrap_err(), XrtError::InvalidDevice);
    }

    #[test]
    fn device_reports_name_and_memory() {
        let device = Device::get_device(0).unwrap();
        assert_eq!(device.name(), "xrt-emu0");
        assert_eq!(device.total_memory(), DEVICE_MEMORY);
    }

    #[test]
    fn load_image_missing_file() {
        let device = Device::get_device(0).unwrap();
        let err = device.load_image("/no/such/image.xclbin").unwrap_err();
        assert_eq!(err, XrtError::FileNotFound);
    }

    #[test]
    fn load_image_rejects_garbage_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an image").unwrap();
        let device = Device::get_device(0).unwrap();
        assert_eq!(
            device.load_image(file.path()).unwrap_err(),
            XrtError::InvalidImage
        );
    }

    #[test]
    fn load_image_returns_baked_uuid() {
        let device = Device::get_device(0).unwrap();
        let uuid = device.load_image_bytes(&demo_image()).unwrap();
        assert_eq!(uuid, Uuid([1; 16]));
    }

    #[test]
    fn resolve_requires_loaded_image() {
        let device = Device::get_device(0).unwrap();
        assert_eq!(
            device.resolve_kernel(Uuid([1; 16]), "krnl_vadd").unwrap_err(),
            XrtError::InvalidHandle
        );
    }

    #[test]
    fn reload_invalidates_old_uuid() {
        let device = Device::get_device(0).unwrap();
        let old = device.load_image_bytes(&demo_image()).unwrap();
        assert!(device.resolve_kernel(old, "krnl_vadd").is_ok());

        let other = ImageBuilder::new(Uuid([2; 16]))
            .vector_kernel("krnl_vadd", Opcode::VecAdd)
            .build();
        let new = device.load_image_bytes(&other).unwrap();
        assert_eq!(
            device.resolve_kernel(old, "krnl_vadd").unwrap_err(),
            XrtError::InvalidHandle
        );
        assert!(device.resolve_kernel(new, "krnl_vadd").is_ok());
    }

    #[test]
    fn opened_devices_are_independent() {
        let first = Device::get_device(0).unwrap();
        first.load_image_bytes(&demo_image()).unwrap();

        let second = Device::get_device(0).unwrap();
        assert!(!first.same_device(&second));
        assert_eq!(
            second.resolve_kernel(Uuid([1; 16]), "krnl_vadd").unwrap_err(),
            XrtError::InvalidHandle
        );
    }

    #[test]
    fn arena_alloc_and_free() {
        let device = Device::get_device(0).unwrap();
        let total = device.total_memory();

        let id = device.alloc(total).unwrap();
        assert_eq!(device.alloc(1).unwrap_err(), XrtError::OutOfMemory);
        device.free(id);
        let id = device.alloc(total).unwrap();
        device.free(id);
    }
}
