pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "infrachat",
    about = "Infrachat operator CLI",
    long_about = "Check readiness, inspect configuration, split generated documents, and run terraform against a directory.",
    after_help = "Examples:\n  infrachat doctor --json\n  infrachat config\n  infrachat split reply.md --out ./generated\n  infrachat run ./generated plan"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Validate config, terraform binary, Azure credentials, and LLM key presence")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Split a saved model reply into named terraform files")]
    Split {
        #[arg(help = "Path to the saved reply document")]
        document: PathBuf,
        #[arg(long, help = "Write the files into this directory instead of printing them")]
        out: Option<PathBuf>,
    },
    #[command(about = "Run a terraform operation against the *.tf files in a directory")]
    Run {
        #[arg(help = "Directory holding the *.tf files")]
        dir: PathBuf,
        #[arg(help = "One of: init, validate, plan, apply, destroy")]
        operation: String,
        #[arg(long, help = "Pass -auto-approve to apply and destroy")]
        auto_approve: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Split { document, out } => commands::split::run(&document, out.as_deref()),
        Command::Run { dir, operation, auto_approve } => {
            commands::run::run(&dir, &operation, auto_approve)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
