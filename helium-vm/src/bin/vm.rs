//! `he3vm` — the virtual machine CLI (spec §6.4): loads a module image
//! and interprets its entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use helium_vm::{Interpreter, Runtime, Value, VmConfig};

/// Run a Helium module image.
#[derive(Debug, Parser)]
#[command(name = "he3vm", version, about = "Interpret a Helium module image")]
struct Args {
    /// Path to the `.h3m` module image to load and run.
    module: PathBuf,

    /// Total heap size in bytes.
    #[arg(long, default_value_t = helium_vm::config::DEFAULT_HEAP_SIZE)]
    heap_size: usize,

    /// Maximum number of live operand-stack entries.
    #[arg(long, default_value_t = helium_vm::config::DEFAULT_MAX_STACK_ENTRIES)]
    max_stack_entries: usize,

    /// Maximum call-frame nesting depth.
    #[arg(long, default_value_t = helium_vm::config::DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,

    /// Increase log verbosity.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = VmConfig {
        heap_size: args.heap_size,
        heap_alignment: helium_vm::config::DEFAULT_ALIGNMENT,
        max_stack_entries: args.max_stack_entries,
        max_call_depth: args.max_call_depth,
    };

    let mut runtime = Runtime::new(&config);
    if let Err(err) = runtime.registry.load_module(&args.module) {
        eprintln!("error: could not load module `{}`: {err}", args.module.display());
        return ExitCode::FAILURE;
    }

    let mut interpreter = Interpreter::new(&mut runtime, config);

    match interpreter.run_entry() {
        Ok(Some(Value::I64(code))) => {
            // A conventional `main(): integer` return value doubles as
            // the process exit code, matching how every example toolchain
            // in this corpus treats an integer-returning entry point.
            exit_code_from_i64(code)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("panic: {err}");
            ExitCode::FAILURE
        }
    }
}

fn exit_code_from_i64(code: i64) -> ExitCode {
    let clamped = code.clamp(0, u8::MAX as i64) as u8;
    ExitCode::from(clamped)
}
