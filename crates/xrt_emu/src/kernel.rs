//! Functions and types for resolving and launching kernels.

use crate::device::{Command, Device, LaunchArg};
use crate::error::{XrtError, XrtResult};
use crate::image::{ArgInfo, KernelDef, Uuid};
use crate::run::Run;

/// A positional kernel argument: a buffer object or a 32-bit scalar.
///
/// Buffer arguments are created with
/// [`BufferObject::as_arg`](crate::memory::BufferObject::as_arg); scalars
/// convert with `From`:
///
/// ```
/// use xrt_emu::kernel::Arg;
///
/// let count = Arg::from(4096u32);
/// ```
#[derive(Debug)]
pub struct Arg<'a> {
    repr: ArgRepr<'a>,
}

#[derive(Debug)]
enum ArgRepr<'a> {
    Buffer {
        device: &'a Device,
        slab: Option<u64>,
        bank: u32,
    },
    Scalar(u32),
}

impl<'a> Arg<'a> {
    pub(crate) fn buffer(device: &'a Device, slab: Option<u64>, bank: u32) -> Arg<'a> {
        Arg {
            repr: ArgRepr::Buffer { device, slab, bank },
        }
    }
}

impl From<u32> for Arg<'static> {
    fn from(value: u32) -> Self {
        Arg {
            repr: ArgRepr::Scalar(value),
        }
    }
}

/// A named kernel resolved from a loaded image.
///
/// Resolution requires the UUID returned by
/// [`Device::load_image`](crate::device::Device::load_image); a kernel
/// handle stays tied to that image and never observes kernels of a later
/// load.
#[derive(Debug)]
pub struct Kernel {
    device: Device,
    def: KernelDef,
}

impl Kernel {
    /// Resolve the kernel named `name` from the image identified by `uuid`.
    ///
    /// Fails with [`XrtError::InvalidHandle`] if no image with that UUID is
    /// loaded and with [`XrtError::NotFound`] if the image exposes no such
    /// kernel.
    pub fn new(device: &Device, uuid: Uuid, name: &str) -> XrtResult<Kernel> {
        let def = device.resolve_kernel(uuid, name)?;
        Ok(Kernel {
            device: device.clone(),
            def,
        })
    }

    /// The kernel's name as it appears in the image.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Number of positional arguments the kernel takes.
    pub fn num_args(&self) -> usize {
        self.def.args.len()
    }

    /// The memory bank backing the buffer argument at `index`.
    ///
    /// Buffers passed in that slot must be allocated on this bank. Fails
    /// with [`XrtError::InvalidValue`] for out-of-range indices and for
    /// scalar slots.
    pub fn group_id(&self, index: usize) -> XrtResult<u32> {
        match self.def.args.get(index) {
            Some(ArgInfo::Buffer { bank }) => Ok(*bank),
            _ => Err(XrtError::InvalidValue),
        }
    }

    /// Start the kernel with the given positional arguments.
    ///
    /// The launch is asynchronous: the call validates the arguments against
    /// the kernel signature, queues the launch, and returns a [`Run`]
    /// immediately. Any mismatch in argument count, kind, memory bank or
    /// owning device fails with [`XrtError::InvalidValue`] before anything
    /// is queued.
    pub fn start(&self, args: &[Arg<'_>]) -> XrtResult<Run> {
        if args.len() != self.def.args.len() {
            return Err(XrtError::InvalidValue);
        }
        let mut launch_args = Vec::with_capacity(args.len());
        for (arg, info) in args.iter().zip(&self.def.args) {
            match (&arg.repr, info) {
                (ArgRepr::Buffer { device, slab, bank }, ArgInfo::Buffer { bank: expected }) => {
                    if !device.same_device(&self.device) || bank != expected {
                        return Err(XrtError::InvalidValue);
                    }
                    // host-only buffers have no device slab to bind
                    let slab = slab.ok_or(XrtError::InvalidValue)?;
                    launch_args.push(LaunchArg::Slab(slab));
                }
                (ArgRepr::Scalar(value), ArgInfo::Scalar) => {
                    launch_args.push(LaunchArg::Scalar(*value));
                }
                _ => return Err(XrtError::InvalidValue),
            }
        }

        let (run, inner) = Run::new();
        self.device.submit(Command {
            opcode: self.def.opcode,
            args: launch_args,
            run: inner,
        })?;
        Ok(run)
    }
}
