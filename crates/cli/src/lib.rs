pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "requestflow",
    about = "Requestflow operator CLI",
    long_about = "Operate the request approval service: migrations, demo data, readiness checks and routing tables.",
    after_help = "Examples:\n  requestflow migrate\n  requestflow doctor --json\n  requestflow routes"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Create one confirmed demo user per role (idempotent)")]
    Seed,
    #[command(about = "Validate config, database connectivity, schema and role coverage")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the default routing and escalation tables")]
    Routes,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code, output }
        }
        Command::Routes => commands::routes::run(),
        Command::Config => commands::config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
