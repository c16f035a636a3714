pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "arbor",
    about = "Arbor intent-routing operator CLI",
    long_about = "Validate graph descriptions, route input through loaded graphs, and \
                  exercise the built-in demo graph.",
    after_help = "Examples:\n  arbor demo \"hello there\"\n  arbor validate --graph graph.json\n  arbor route --graph graph.json \"refund amount 40\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Load a graph description and print its structural report")]
    Validate {
        #[arg(long, help = "Path to a JSON graph description")]
        graph: PathBuf,
    },
    #[command(about = "Route input through a loaded graph and print the outcome")]
    Route {
        #[arg(long, help = "Path to a JSON graph description")]
        graph: PathBuf,
        #[arg(help = "Free-text input to route")]
        input: String,
    },
    #[command(about = "Route input through the built-in demo graph (no network)")]
    Demo {
        #[arg(help = "Free-text input to route")]
        input: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Validate { graph } => commands::validate::run(&graph),
        Command::Route { graph, input } => commands::route::run(&graph, &input),
        Command::Demo { input } => commands::demo::run(&input),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
