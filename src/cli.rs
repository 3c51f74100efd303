use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// arxd — approval request processing pipeline
#[derive(Parser)]
#[command(name = "arxd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline workers
    Run {
        /// JSON file of canonical requests to inject into the main topic
        /// before the workers start (demo/replay mode)
        #[arg(long)]
        inject: Option<PathBuf>,

        /// Application id stamped on injected messages
        #[arg(long, default_value = "demo")]
        application_id: String,
    },
}
