use std::fs;
use std::process::ExitCode;

use clap::Parser;
use luma_compiler::{compile, Registry};

/// Compile a Luma source file into an LBC container
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the `.luma` source file
    input: String,

    /// Output path for the compiled container
    output: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let src = match fs::read_to_string(&args.input) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("error: could not read {}: {e}", args.input);
            return ExitCode::FAILURE;
        }
    };

    let registry = Registry::with_builtins();
    let container = match compile(&src, &registry) {
        Ok(container) => container,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = fs::write(&args.output, container.encode()) {
        eprintln!("error: could not write {}: {e}", args.output);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
