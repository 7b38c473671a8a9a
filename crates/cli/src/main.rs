use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
use commands::{execute_serve_command, ServeArgs};

#[derive(Parser)]
#[command(name = "ferrule")]
#[command(about = "Ferrule - configurable HTTP transport server")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the built-in routes until Ctrl+C
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => execute_serve_command(args).await,
    }
}
