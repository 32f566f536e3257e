//! Command-line front end: parse arguments, load an image, run it to
//! completion (`spec.md` §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use isa4380vm::cache::CacheMode;
use isa4380vm::error::LoadError;
use isa4380vm::loader;

const DEFAULT_MEM_SIZE: u32 = 131_072;

/// Run an ISA-4380 program image.
#[derive(Parser, Debug)]
#[command(name = "vm", version, about, long_about = None)]
struct Args {
    /// Path to the raw program image to execute.
    binary: PathBuf,

    /// Memory size in bytes.
    #[arg(short = 'm', long = "memory")]
    memory: Option<u32>,

    /// Cache mode: 0 off, 1 direct-mapped, 2 fully associative, 3 two-way.
    #[arg(short = 'c', long = "cache")]
    cache: Option<u8>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mem_size = args.memory.unwrap_or(DEFAULT_MEM_SIZE);
    if mem_size == 0 {
        eprintln!("error: -m/--memory must be greater than 0");
        return ExitCode::from(2);
    }

    let cache_mode = match args.cache.unwrap_or(0) {
        0 => CacheMode::Off,
        1 => CacheMode::Direct,
        2 => CacheMode::Fully,
        3 => CacheMode::TwoWay,
        other => {
            eprintln!("error: -c/--cache must be one of 0, 1, 2, 3 (got {other})");
            return ExitCode::from(2);
        }
    };

    let mut vm = match loader::load(&args.binary, mem_size, cache_mode) {
        Ok(vm) => vm,
        Err(err @ LoadError::FileNotFound(_)) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    match vm.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err((offset, fault)) => {
            eprintln!("invalid instruction at offset {offset}: {fault}");
            ExitCode::from(1)
        }
    }
}
