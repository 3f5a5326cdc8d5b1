//! CLI argument parsing for the contacts-importer binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "contacts-importer", about = "Streaming CSV contact import service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the import server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Generate a sample contacts CSV for exercising the importer
    Generate {
        /// Number of contacts to generate
        #[arg(long, default_value_t = 1000)]
        count: usize,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}
