//! Safe, user-friendly host API for a software-emulated FPGA accelerator.
//!
//! This crate emulates the host side of a vendor accelerator runtime: a
//! program opens a device, loads a compiled accelerator image onto it,
//! resolves kernels by name, moves data through buffer objects, and launches
//! kernels asynchronously. No hardware is involved; the "device" is a
//! worker thread with its own memory, which makes the full host workflow
//! testable on any machine.
//!
//! # Terminology
//!
//! ## Devices and hosts
//!
//! The device is the (emulated) accelerator and its associated memory space;
//! the host is the CPU. Data must be transferred from host memory to device
//! memory before a kernel can use it, and results must be transferred back.
//! Buffer objects hold both sides and synchronize them explicitly, one
//! [`sync`](memory::BufferObject::sync) call per direction.
//!
//! ## Images, kernels and runs
//!
//! An accelerator image is the emulated analogue of a compiled bitstream: it
//! lists named kernels and their argument signatures. Loading an image onto
//! a device returns a UUID; kernels are resolved from (device, UUID, name)
//! and launched with positional arguments. A launch returns a [`run::Run`]
//! handle immediately; the device executes launches in submission order, and
//! the host blocks on [`run::Run::wait`] when it needs the result.
//!
//! # Usage
//!
//! ```
//! use xrt_emu::prelude::*;
//!
//! # fn main() -> XrtResult<()> {
//! # let image_bytes = xrt_emu::image::ImageBuilder::new(Uuid([0; 16]))
//! #     .vector_kernel("krnl_vadd", Opcode::VecAdd)
//! #     .build();
//! let device = Device::get_device(0)?;
//! let uuid = device.load_image_bytes(&image_bytes)?;
//! let kernel = Kernel::new(&device, uuid, "krnl_vadd")?;
//!
//! let mut in0 = BufferObject::<u32>::new(&device, 64, kernel.group_id(0)?)?;
//! let mut in1 = BufferObject::<u32>::new(&device, 64, kernel.group_id(1)?)?;
//! let mut out = BufferObject::<u32>::new(&device, 64, kernel.group_id(2)?)?;
//!
//! in0.populate(|i| i as u32)?;
//! in1.populate(|i| i as u32)?;
//! in0.sync(SyncDirection::ToDevice)?;
//! in1.sync(SyncDirection::ToDevice)?;
//!
//! let run = kernel.start(&[in0.as_arg(), in1.as_arg(), out.as_arg(), Arg::from(64u32)])?;
//! run.wait()?;
//!
//! out.sync(SyncDirection::FromDevice)?;
//! assert_eq!(out.map()?[3], 6);
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod image;
pub mod kernel;
pub mod memory;
pub mod prelude;
pub mod run;

#[cfg(test)]
mod test {
    use crate::prelude::*;

    // Full host workflow against a freshly synthesized image, end to end.
    #[test]
    fn vadd_workflow() {
        let bytes = xrt_emu_image()
            .vector_kernel("krnl_vadd", Opcode::VecAdd)
            .build();
        let device = Device::get_device(0).unwrap();
        let uuid = device.load_image_bytes(&bytes).unwrap();
        let kernel = Kernel::new(&device, uuid, "krnl_vadd").unwrap();

        let n = 1024usize;
        let mut in0 = BufferObject::<u32>::new(&device, n, kernel.group_id(0).unwrap()).unwrap();
        let mut in1 = BufferObject::<u32>::new(&device, n, kernel.group_id(1).unwrap()).unwrap();
        let mut out = BufferObject::<u32>::new(&device, n, kernel.group_id(2).unwrap()).unwrap();

        in0.populate(|i| i as u32).unwrap();
        in1.populate(|i| 2 * i as u32).unwrap();
        in0.sync(SyncDirection::ToDevice).unwrap();
        in1.sync(SyncDirection::ToDevice).unwrap();

        let run = kernel
            .start(&[in0.as_arg(), in1.as_arg(), out.as_arg(), Arg::from(n as u32)])
            .unwrap();
        run.wait().unwrap();
        out.sync(SyncDirection::FromDevice).unwrap();

        let mirror = out.map().unwrap();
        assert!(mirror.iter().enumerate().all(|(i, &v)| v == 3 * i as u32));
    }

    fn xrt_emu_image() -> ImageBuilder {
        ImageBuilder::new(Uuid([42; 16]))
    }
}
