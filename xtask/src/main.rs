//! Development tasks for Parley
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

/// Fuzz targets under `fuzz/`
const FUZZ_TARGETS: &[&str] = &[
    "fuzz_envelope",
    "fuzz_frame_reader",
    "fuzz_dht_message",
    "fuzz_crypto",
    "fuzz_peer_id",
];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Parley development tasks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run the crypto benchmarks
    Bench,

    /// Run every fuzz target for a fixed time (requires cargo-fuzz and nightly)
    Fuzz {
        /// Seconds per target
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => test()?,
        Commands::Lint => lint()?,
        Commands::Fmt => run_command("cargo", &["fmt", "--all", "--check"])?,
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            lint()?;
            test()?;
            println!("All CI checks passed!");
        }
        Commands::Bench => run_command("cargo", &["bench", "-p", "parley-crypto"])?,
        Commands::Fuzz { seconds } => {
            let max_time = format!("-max_total_time={seconds}");
            for target in FUZZ_TARGETS {
                println!("Fuzzing {target} for {seconds}s...");
                run_command(
                    "cargo",
                    &["+nightly", "fuzz", "run", target, "--fuzz-dir", "fuzz", "--", &max_time],
                )?;
            }
        }
        Commands::Doc => run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?,
    }

    Ok(())
}

fn test() -> anyhow::Result<()> {
    run_command("cargo", &["test", "--workspace"])
}

fn lint() -> anyhow::Result<()> {
    run_command(
        "cargo",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
