use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "cargo-xtask", version, about = "appdock automation tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format the crate and this helper
    Fmt,
    /// Formatting check, clippy with warnings denied, then the test suite
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let shell = Shell::new()?;
    let _root = shell.push_dir(project_root()?);

    match cli.command {
        Command::Fmt => run_fmt(&shell),
        Command::Check => run_check(&shell),
    }
}

fn run_fmt(shell: &Shell) -> Result<()> {
    cmd!(shell, "cargo fmt --all")
        .run()
        .context("failed to run cargo fmt")?;
    cmd!(shell, "cargo fmt --manifest-path xtask/Cargo.toml")
        .run()
        .context("failed to format xtask")?;
    Ok(())
}

fn run_check(shell: &Shell) -> Result<()> {
    cmd!(shell, "cargo fmt --all -- --check")
        .run()
        .context("cargo fmt --check failed")?;
    cmd!(shell, "cargo clippy --all-targets -- -D warnings")
        .run()
        .context("cargo clippy failed")?;
    cmd!(shell, "cargo test")
        .run()
        .context("cargo test failed")?;
    Ok(())
}

fn project_root() -> Result<PathBuf> {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(PathBuf::from)
        .context("xtask must live inside the project root")
}
