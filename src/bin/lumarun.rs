use std::fs;
use std::process::ExitCode;

use clap::Parser;
use lumavm::{Container, Vm};

use luma::extensions::register_reference_extensions;

/// Run a compiled Luma container on the bytecode VM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the compiled `.lbc` container
    input: String,

    /// Stop after this many steps instead of running to halt
    #[arg(short, long)]
    steps: Option<u64>,

    /// Print the program counter and register file before each step
    #[arg(short, long)]
    trace: bool,
}

fn print_trace(vm: &Vm) {
    println!("pc={:#06x} regs={:?}", vm.state.pc, vm.registers());
}

fn main() -> ExitCode {
    let args = Args::parse();

    let bytes = match fs::read(&args.input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: could not read {}: {e}", args.input);
            return ExitCode::FAILURE;
        }
    };

    let container = match Container::decode(&bytes) {
        Ok(container) => container,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new();
    register_reference_extensions(&mut vm);
    vm.load(&container);

    let mut steps_run: u64 = 0;
    loop {
        if vm.halted() {
            break;
        }
        if let Some(limit) = args.steps {
            if steps_run >= limit {
                break;
            }
        }
        if args.trace {
            print_trace(&vm);
        }
        vm.step();
        steps_run += 1;
    }

    if let Some(err) = &vm.err {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
