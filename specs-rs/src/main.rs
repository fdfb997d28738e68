use clap::Parser;
use tracing_subscriber::EnvFilter;

use specs::cli::{self, CliArgs};

fn init_logging(verbose: bool) {
    // --verbose wins over RUST_LOG; warnings are always shown.
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    if args.missing_program() {
        eprintln!("specs: no specification given");
        eprintln!("Usage: specs [OPTIONS] [SPEC]...   or   specs [OPTIONS] -f <PATH>");
        std::process::exit(2);
    }

    if let Err(e) = cli::run(&args) {
        eprintln!("specs: {e}");
        std::process::exit(1);
    }
}
