use std::env;
use std::process::ExitCode;

use xrt_check::{run_checks, DEFAULT_DATA_SIZE};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        println!("Usage: {} <image file>", args[0]);
        return ExitCode::FAILURE;
    }

    match run_checks(&args[1], 0, DEFAULT_DATA_SIZE) {
        Ok(()) => {
            println!("TEST PASSED");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("TEST FAILED: {err}");
            ExitCode::FAILURE
        }
    }
}
