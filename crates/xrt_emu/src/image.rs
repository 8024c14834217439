//! The accelerator image container.
//!
//! An image is the emulated analogue of a compiled bitstream: it names the
//! kernels a configured device exposes and binds each kernel to one of the
//! behaviors built into the device (see [`Opcode`]). Images are flat
//! little-endian blobs so they can be produced by [`ImageBuilder`], written to
//! disk, and handed to [`Device::load_image`](crate::device::Device::load_image)
//! like a real toolchain artifact.
//!
//! # Layout
//!
//! ```text
//! magic      8  b"XCLEMU01"
//! version    u16
//! reserved   u16
//! uuid       16
//! kernels    u32
//! per kernel:
//!   name_len u32, name bytes (utf-8)
//!   opcode   u32
//!   args     u32
//!   per arg: kind u8 (0 = buffer, 1 = scalar), bank u32 (0 for scalars)
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{XrtError, XrtResult};

/// Magic bytes at the start of every accelerator image.
pub const MAGIC: [u8; 8] = *b"XCLEMU01";

/// Version of the container layout written by [`ImageBuilder`].
pub const FORMAT_VERSION: u16 = 1;

/// Identifier of a loaded image. Returned by
/// [`Device::load_image`](crate::device::Device::load_image) and required for
/// every kernel lookup afterwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Uuid(pub [u8; 16]);

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The behaviors built into the emulated device.
///
/// A real bitstream carries gate configuration; the emulator instead ships a
/// small library of vector kernels and lets the image bind names to them. All
/// builtin kernels take `(input0, input1, output, count)` with the element
/// count as a trailing scalar.
#[repr(u32)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Opcode {
    /// Lane-wise 32-bit wrapping addition.
    VecAdd = 0,
    /// Lane-wise 32-bit wrapping multiplication.
    VecMul = 1,
}

impl Opcode {
    fn from_raw(raw: u32) -> Option<Opcode> {
        match raw {
            0 => Some(Opcode::VecAdd),
            1 => Some(Opcode::VecMul),
            _ => None,
        }
    }
}

/// One argument slot of a kernel signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArgInfo {
    /// A buffer argument served from the given device memory bank.
    Buffer { bank: u32 },
    /// An immediate 32-bit scalar.
    Scalar,
}

impl ArgInfo {
    /// A buffer slot bound to `bank`.
    pub fn buffer(bank: u32) -> ArgInfo {
        ArgInfo::Buffer { bank }
    }

    /// A scalar slot.
    pub fn scalar() -> ArgInfo {
        ArgInfo::Scalar
    }
}

/// A kernel entry in an image: a name, the builtin behavior it resolves to,
/// and its argument signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelDef {
    pub name: String,
    pub opcode: Opcode,
    pub args: Vec<ArgInfo>,
}

/// A parsed accelerator image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    uuid: Uuid,
    kernels: Vec<KernelDef>,
}

impl Image {
    /// Read and parse an image file.
    ///
    /// A missing file is reported as [`XrtError::FileNotFound`], any other
    /// I/O failure as [`XrtError::OperatingSystemError`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> XrtResult<Image> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => XrtError::FileNotFound,
            _ => XrtError::OperatingSystemError,
        })?;
        Image::from_bytes(&bytes)
    }

    /// Parse an image from an in-memory blob.
    pub fn from_bytes(bytes: &[u8]) -> XrtResult<Image> {
        let mut r = Reader { buf: bytes, pos: 0 };
        if r.take(8)? != MAGIC {
            return Err(XrtError::InvalidImage);
        }
        if r.take_u16()? != FORMAT_VERSION {
            return Err(XrtError::InvalidImage);
        }
        let _reserved = r.take_u16()?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(r.take(16)?);

        let kernel_count = r.take_u32()? as usize;
        // counts come from the file; bound them by the bytes actually present
        // (12 per kernel record, 5 per argument) before allocating anything
        if kernel_count > r.remaining() / 12 {
            return Err(XrtError::InvalidImage);
        }
        let mut kernels = Vec::with_capacity(kernel_count);
        for _ in 0..kernel_count {
            let name_len = r.take_u32()? as usize;
            let name = std::str::from_utf8(r.take(name_len)?)
                .map_err(|_| XrtError::InvalidImage)?
                .to_owned();
            let opcode = Opcode::from_raw(r.take_u32()?).ok_or(XrtError::InvalidImage)?;
            let arg_count = r.take_u32()? as usize;
            if arg_count > r.remaining() / 5 {
                return Err(XrtError::InvalidImage);
            }
            let mut args = Vec::with_capacity(arg_count);
            for _ in 0..arg_count {
                let kind = r.take(1)?[0];
                let bank = r.take_u32()?;
                args.push(match kind {
                    0 => ArgInfo::Buffer { bank },
                    1 => ArgInfo::Scalar,
                    _ => return Err(XrtError::InvalidImage),
                });
            }
            kernels.push(KernelDef { name, opcode, args });
        }
        if r.pos != bytes.len() {
            // trailing garbage
            return Err(XrtError::InvalidImage);
        }
        Ok(Image { uuid: Uuid(uuid), kernels })
    }

    /// The identifier baked into this image.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// All kernels exposed by this image, in file order.
    pub fn kernels(&self) -> &[KernelDef] {
        &self.kernels
    }

    /// Look up a kernel by name.
    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> XrtResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(XrtError::InvalidImage)?;
        if end > self.buf.len() {
            return Err(XrtError::InvalidImage);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take_u16(&mut self) -> XrtResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> XrtResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Constructs accelerator images programmatically.
///
/// Used by `xtask mkimage` to generate demo images, and by tests to
/// synthesize fixtures without shipping binary files.
///
/// # Example
///
/// ```
/// use xrt_emu::image::{Image, ImageBuilder, Opcode, Uuid};
///
/// let bytes = ImageBuilder::new(Uuid([7; 16]))
///     .vector_kernel("krnl_vadd", Opcode::VecAdd)
///     .build();
/// let image = Image::from_bytes(&bytes).unwrap();
/// assert!(image.kernel("krnl_vadd").is_some());
/// ```
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    uuid: Uuid,
    kernels: Vec<KernelDef>,
}

impl ImageBuilder {
    pub fn new(uuid: Uuid) -> ImageBuilder {
        ImageBuilder {
            uuid,
            kernels: Vec::new(),
        }
    }

    /// Add a kernel with an explicit signature.
    pub fn kernel(mut self, name: &str, opcode: Opcode, args: &[ArgInfo]) -> ImageBuilder {
        self.kernels.push(KernelDef {
            name: name.to_owned(),
            opcode,
            args: args.to_vec(),
        });
        self
    }

    /// Add a kernel with the standard vector signature: two input buffers on
    /// banks 0 and 1, an output buffer on bank 2, and a trailing element
    /// count.
    pub fn vector_kernel(self, name: &str, opcode: Opcode) -> ImageBuilder {
        self.kernel(
            name,
            opcode,
            &[
                ArgInfo::buffer(0),
                ArgInfo::buffer(1),
                ArgInfo::buffer(2),
                ArgInfo::scalar(),
            ],
        )
    }

    /// Serialize the image.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.uuid.0);
        out.extend_from_slice(&(self.kernels.len() as u32).to_le_bytes());
        for kernel in &self.kernels {
            out.extend_from_slice(&(kernel.name.len() as u32).to_le_bytes());
            out.extend_from_slice(kernel.name.as_bytes());
            out.extend_from_slice(&(kernel.opcode as u32).to_le_bytes());
            out.extend_from_slice(&(kernel.args.len() as u32).to_le_bytes());
            for arg in &kernel.args {
                match arg {
                    ArgInfo::Buffer { bank } => {
                        out.push(0);
                        out.extend_from_slice(&bank.to_le_bytes());
                    }
                    ArgInfo::Scalar => {
                        out.push(1);
                        out.extend_from_slice(&0u32.to_le_bytes());
                    }
                }
            }
        }
        out
    }

    /// Serialize the image and write it to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.build())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn two_kernel_image() -> ImageBuilder {
        ImageBuilder::new(Uuid([0xab; 16]))
            .vector_kernel("krnl_vadd", Opcode::VecAdd)
            .vector_kernel("krnl_vmult", Opcode::VecMul)
    }

    #[test]
    fn round_trip() {
        let image = Image::from_bytes(&two_kernel_image().build()).unwrap();
        assert_eq!(image.uuid(), Uuid([0xab; 16]));
        assert_eq!(image.kernels().len(), 2);

        let vadd = image.kernel("krnl_vadd").unwrap();
        assert_eq!(vadd.opcode, Opcode::VecAdd);
        assert_eq!(
            vadd.args,
            vec![
                ArgInfo::buffer(0),
                ArgInfo::buffer(1),
                ArgInfo::buffer(2),
                ArgInfo::scalar(),
            ]
        );
        assert_eq!(image.kernel("krnl_vmult").unwrap().opcode, Opcode::VecMul);
        assert!(image.kernel("krnl_vsub").is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = two_kernel_image().build();
        bytes[0] = b'y';
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = two_kernel_image().build();
        bytes[8] = 0xff;
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = two_kernel_image().build();
        for len in 0..bytes.len() {
            assert_eq!(
                Image::from_bytes(&bytes[..len]),
                Err(XrtError::InvalidImage),
                "accepted a {len} byte prefix"
            );
        }
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut bytes = two_kernel_image().build();
        bytes.push(0);
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn rejects_oversized_kernel_count() {
        // a valid header that claims u32::MAX kernels with no table behind it
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn rejects_oversized_arg_count() {
        // single kernel "k": arg count lives at offset 41
        let mut bytes = ImageBuilder::new(Uuid([0; 16]))
            .kernel("k", Opcode::VecAdd, &[ArgInfo::scalar()])
            .build();
        bytes[41..45].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn rejects_unknown_opcode() {
        // single kernel "k": name_len at offset 32, name at 36, opcode at 37
        let mut bytes = ImageBuilder::new(Uuid([0; 16]))
            .kernel("k", Opcode::VecAdd, &[ArgInfo::scalar()])
            .build();
        bytes[37..41].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn rejects_non_utf8_name() {
        let mut bytes = ImageBuilder::new(Uuid([0; 16]))
            .kernel("k", Opcode::VecAdd, &[ArgInfo::scalar()])
            .build();
        bytes[36] = 0xff;
        assert_eq!(Image::from_bytes(&bytes), Err(XrtError::InvalidImage));
    }

    #[test]
    fn uuid_display_is_hex() {
        let uuid = Uuid([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0xff,
        ]);
        assert_eq!(uuid.to_string(), "000102030405060708090a0b0c0d0eff");
    }
}
