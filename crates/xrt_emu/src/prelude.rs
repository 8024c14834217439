//! This module re-exports a number of commonly-used types for working with
//! the emulated runtime.
//!
//! This allows the user to `use xrt_emu::prelude::*;` and have the most
//! commonly-used types available quickly.

pub use crate::device::Device;
pub use crate::error::{XrtError, XrtResult};
pub use crate::image::{Image, ImageBuilder, Opcode, Uuid};
pub use crate::kernel::{Arg, Kernel};
pub use crate::memory::{BoFlags, BufferObject, SyncDirection};
pub use crate::run::{Run, RunState};
