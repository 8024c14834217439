use pico_args::Arguments;
use std::error::Error;
use std::path::{Path, PathBuf};

use xrt_emu::image::{ImageBuilder, Opcode, Uuid};

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = Arguments::from_env();
    let sub = args.subcommand()?.unwrap_or_default();

    match sub.as_str() {
        "mkimage" => {
            let path = args.free_from_str::<PathBuf>()?;
            args.finish();
            mkimage(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        _ => panic!("Unknown command, available: `mkimage`"),
    }
}

/// Writes the standard demo image: `krnl_vadd` and `krnl_vmult` with the
/// usual (in, in, out, count) signature on banks 0, 1 and 2.
fn mkimage(path: &Path) -> std::io::Result<()> {
    ImageBuilder::new(Uuid(*b"xrt-emu demo img"))
        .vector_kernel("krnl_vadd", Opcode::VecAdd)
        .vector_kernel("krnl_vmult", Opcode::VecMul)
        .write_to(path)
}
