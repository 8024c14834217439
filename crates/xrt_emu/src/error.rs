//! Types for error handling.
//!
//! Nearly every operation against the emulated runtime can fail: device
//! enumeration, image loading, buffer allocation, DMA synchronization and
//! kernel launches all return [`XrtResult`]. Errors raised on the device side
//! of an asynchronous launch are surfaced by [`Run::wait`](crate::run::Run::wait).

use std::error::Error;
use std::fmt;
use std::result::Result;

/// Error enum which represents all the potential errors reported by the
/// emulated accelerator runtime.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum XrtError {
    /// The device index does not refer to an existing device.
    InvalidDevice,
    /// The accelerator image is malformed or not understood by the device.
    InvalidImage,
    /// The accelerator image file does not exist.
    FileNotFound,
    /// An operating system call failed while talking to the device.
    OperatingSystemError,
    /// A handle refers to an image that is not (or no longer) loaded.
    InvalidHandle,
    /// A named kernel was not found in the loaded image.
    NotFound,
    /// The device could not satisfy a memory allocation.
    OutOfMemory,
    /// An argument was invalid for the requested operation.
    InvalidValue,
    /// A kernel accessed memory outside of a bound buffer.
    IllegalAddress,
    /// A kernel launch could not be executed by the device.
    LaunchFailed,
}

impl fmt::Display for XrtError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            XrtError::InvalidDevice => "invalid device index",
            XrtError::InvalidImage => "malformed or incompatible accelerator image",
            XrtError::FileNotFound => "accelerator image file not found",
            XrtError::OperatingSystemError => "operating system error",
            XrtError::InvalidHandle => "handle does not match the loaded image",
            XrtError::NotFound => "named kernel not found in image",
            XrtError::OutOfMemory => "device out of memory",
            XrtError::InvalidValue => "invalid argument",
            XrtError::IllegalAddress => "illegal address touched by kernel",
            XrtError::LaunchFailed => "kernel launch failed",
        };
        write!(f, "{msg}")
    }
}

impl Error for XrtError {}

/// Result type for most runtime functions.
pub type XrtResult<T> = Result<T, XrtError>;
