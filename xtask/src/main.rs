use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the CLI monitor
    Run {
        /// Extra arguments passed to nlscan
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run the TUI
    Tui,
    /// Run all tests
    Test,
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let mut cmd = vec!["run", "-p", "nlscan-cli", "--"];
            if args.is_empty() {
                cmd.push("monitor");
            } else {
                cmd.extend(args.iter().map(String::as_str));
            }
            cargo(&cmd, "Run")?;
        }
        Commands::Tui => {
            println!("Running TUI...");
            cargo(&["run", "-p", "nlscan-tui"], "Run")?;
        }
        Commands::Test => {
            println!("Testing workspace...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
    }

    Ok(())
}
