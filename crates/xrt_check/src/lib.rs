//! Verification harness for accelerator images.
//!
//! Runs each builtin vector kernel of an image against a host-computed
//! reference: inputs are populated with index values, pushed to the device,
//! the kernel is launched and waited on, and the pulled output must match
//! the reference exactly. Any mismatch or runtime failure fails the whole
//! check; nothing is retried.

use std::error::Error;
use std::fmt;
use std::path::Path;

use xrt_emu::prelude::*;

/// Default number of elements per buffer, matching the standard demo images.
pub const DEFAULT_DATA_SIZE: usize = 4096;

/// The host-side meaning of a vector kernel, used to compute references.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VectorOp {
    Add,
    Mul,
}

impl VectorOp {
    /// Apply the operator the way the device does: 32-bit wrapping lanes.
    pub fn apply(self, a: u32, b: u32) -> u32 {
        match self {
            VectorOp::Add => a.wrapping_add(b),
            VectorOp::Mul => a.wrapping_mul(b),
        }
    }
}

/// One job: a kernel name and the operator its output is checked against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSpec {
    pub kernel_name: String,
    pub op: VectorOp,
}

impl JobSpec {
    pub fn new(kernel_name: impl Into<String>, op: VectorOp) -> JobSpec {
        JobSpec {
            kernel_name: kernel_name.into(),
            op,
        }
    }

    /// The two jobs every standard demo image must pass.
    pub fn builtin() -> Vec<JobSpec> {
        vec![
            JobSpec::new("krnl_vadd", VectorOp::Add),
            JobSpec::new("krnl_vmult", VectorOp::Mul),
        ]
    }
}

/// Failure of a check: either the runtime failed, or the device produced
/// output that differs from the host-computed reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckError {
    Xrt(XrtError),
    Mismatch {
        kernel: String,
        index: usize,
        expected: u32,
        actual: u32,
    },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CheckError::Xrt(err) => write!(f, "runtime error: {err}"),
            CheckError::Mismatch {
                kernel,
                index,
                expected,
                actual,
            } => write!(
                f,
                "output of {kernel} does not match reference at index {index}: \
                 expected {expected}, got {actual}"
            ),
        }
    }
}

impl Error for CheckError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckError::Xrt(err) => Some(err),
            CheckError::Mismatch { .. } => None,
        }
    }
}

impl From<XrtError> for CheckError {
    fn from(err: XrtError) -> CheckError {
        CheckError::Xrt(err)
    }
}

/// Run one job against a loaded image and validate its output.
///
/// Both input buffers are populated with `i` at index `i`, so the expected
/// output is `op(i, i)` for every lane. The comparison covers the full
/// length and reports the first mismatching index.
pub fn run_job(device: &Device, uuid: Uuid, job: &JobSpec, len: usize) -> Result<(), CheckError> {
    println!("\nStarting the {} kernel...", job.kernel_name);
    let kernel = Kernel::new(device, uuid, &job.kernel_name)?;

    println!("Allocate buffers in device memory");
    let mut in0 = BufferObject::<u32>::new(device, len, kernel.group_id(0)?)?;
    let mut in1 = BufferObject::<u32>::new(device, len, kernel.group_id(1)?)?;
    let mut out = BufferObject::<u32>::new(device, len, kernel.group_id(2)?)?;

    // Test data: both inputs carry the index, the reference is computed
    // host-side in the same pass.
    let mut reference = vec![0u32; len];
    in0.populate(|i| i as u32)?;
    in1.populate(|i| {
        reference[i] = job.op.apply(i as u32, i as u32);
        i as u32
    })?;

    println!("Synchronize input buffer data to device memory");
    in0.sync(SyncDirection::ToDevice)?;
    in1.sync(SyncDirection::ToDevice)?;

    println!("Execution of the {} kernel", job.kernel_name);
    let count = u32::try_from(len).map_err(|_| XrtError::InvalidValue)?;
    let run = kernel.start(&[in0.as_arg(), in1.as_arg(), out.as_arg(), Arg::from(count)])?;
    run.wait()?;

    println!("Get the output data from the device");
    out.sync(SyncDirection::FromDevice)?;

    let mirror = out.map()?;
    for (index, (&actual, &expected)) in mirror.iter().zip(&reference).enumerate() {
        if actual != expected {
            return Err(CheckError::Mismatch {
                kernel: job.kernel_name.clone(),
                index,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Open a device, load the image at `path`, and run every builtin job.
pub fn run_checks<P: AsRef<Path>>(
    path: P,
    device_index: u32,
    len: usize,
) -> Result<(), CheckError> {
    println!("Open the device {device_index}");
    let device = Device::get_device(device_index)?;

    println!("Load the image {}", path.as_ref().display());
    let uuid = device.load_image(path)?;

    for job in JobSpec::builtin() {
        run_job(&device, uuid, &job, len)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use xrt_emu::image::ImageBuilder;

    fn demo_image() -> Vec<u8> {
        ImageBuilder::new(Uuid([0x5a; 16]))
            .vector_kernel("krnl_vadd", Opcode::VecAdd)
            .vector_kernel("krnl_vmult", Opcode::VecMul)
            .build()
    }

    #[test]
    fn operators_apply_lanewise() {
        assert_eq!(VectorOp::Add.apply(3, 4), 7);
        assert_eq!(VectorOp::Mul.apply(3, 4), 12);
        assert_eq!(VectorOp::Add.apply(u32::MAX, 1), 0);
        assert_eq!(VectorOp::Mul.apply(1 << 31, 2), 0);
    }

    #[test]
    fn builtin_jobs_cover_both_kernels() {
        let jobs = JobSpec::builtin();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0], JobSpec::new("krnl_vadd", VectorOp::Add));
        assert_eq!(jobs[1], JobSpec::new("krnl_vmult", VectorOp::Mul));
    }

    #[test]
    fn both_jobs_pass_on_a_good_image() {
        let device = Device::get_device(0).unwrap();
        let uuid = device.load_image_bytes(&demo_image()).unwrap();
        for job in JobSpec::builtin() {
            run_job(&device, uuid, &job, 256).unwrap();
        }
    }

    #[test]
    fn job_len_is_a_parameter() {
        let device = Device::get_device(0).unwrap();
        let uuid = device.load_image_bytes(&demo_image()).unwrap();
        for len in [1usize, 7, 64, DEFAULT_DATA_SIZE] {
            run_job(&device, uuid, &JobSpec::new("krnl_vadd", VectorOp::Add), len).unwrap();
        }
    }

    #[test]
    fn missing_kernel_fails_before_allocation() {
        let device = Device::get_device(0).unwrap();
        let bytes = ImageBuilder::new(Uuid([1; 16]))
            .vector_kernel("krnl_vadd", Opcode::VecAdd)
            .build();
        let uuid = device.load_image_bytes(&bytes).unwrap();
        let err = run_job(
            &device,
            uuid,
            &JobSpec::new("krnl_vmult", VectorOp::Mul),
            16,
        )
        .unwrap_err();
        assert_eq!(err, CheckError::Xrt(XrtError::NotFound));
    }

    #[test]
    fn mislabeled_kernel_is_a_mismatch() {
        // image lies: the name "krnl_vadd" is bound to the multiplier
        let device = Device::get_device(0).unwrap();
        let bytes = ImageBuilder::new(Uuid([2; 16]))
            .vector_kernel("krnl_vadd", Opcode::VecMul)
            .build();
        let uuid = device.load_image_bytes(&bytes).unwrap();

        let err = run_job(&device, uuid, &JobSpec::new("krnl_vadd", VectorOp::Add), 16)
            .unwrap_err();
        // index 0 agrees (0+0 == 0*0); the first divergence is at 1
        assert_eq!(
            err,
            CheckError::Mismatch {
                kernel: "krnl_vadd".into(),
                index: 1,
                expected: 2,
                actual: 1,
            }
        );
    }
}
