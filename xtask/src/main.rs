use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for strata")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, doc, smoke
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Build the entire workspace
    Build,
    /// Render a short run with a resize on the mock backend
    Smoke {
        /// Also run on wgpu; fails when no adapter is available
        #[arg(long)]
        wgpu: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            run_fmt()?;
            run_clippy()?;
            run_tests()?;
            run_doc()?;
            run_smoke(false)?;
        }
        Commands::Fmt => run_fmt()?,
        Commands::Clippy => run_clippy()?,
        Commands::Test => run_tests()?,
        Commands::Doc => run_doc()?,
        Commands::Build => run_build()?,
        Commands::Smoke { wgpu } => run_smoke(wgpu)?,
    }

    Ok(())
}

fn cargo(what: &str, args: &[&str]) -> Result<()> {
    println!("==> Running cargo {what}");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {what} failed");
    }
    Ok(())
}

fn run_fmt() -> Result<()> {
    cargo("fmt --check", &["fmt", "--all", "--", "--check"])
}

fn run_clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn run_tests() -> Result<()> {
    cargo("test", &["test", "--workspace"])
}

fn run_doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn run_build() -> Result<()> {
    cargo("build", &["build", "--workspace"])
}

/// Arguments of one smoke run of `strata-cli`.
fn smoke_args(backend: &str) -> Vec<&str> {
    vec![
        "run", "-p", "strata-cli", "--", "run",
        "--frames", "8",
        "--width", "320",
        "--height", "180",
        "--resize-at", "4",
        "--resize-to", "400x240",
        "--backend", backend,
        "--json",
    ]
}

fn run_smoke(wgpu: bool) -> Result<()> {
    let mut args = smoke_args("mock");
    args.push("--manual");
    cargo("run (smoke, mock)", &args)?;
    if wgpu {
        cargo("run (smoke, wgpu)", &smoke_args("wgpu"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_targets_the_cli() {
        let args = smoke_args("mock");
        assert_eq!(&args[..3], &["run", "-p", "strata-cli"]);
        let backend = args.iter().position(|a| *a == "--backend").unwrap();
        assert_eq!(args[backend + 1], "mock");
    }
}
