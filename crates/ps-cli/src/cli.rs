use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "psrun", about = "Run and replay workflow scripts", version)]
pub struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    pub cd: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a script against the project root.
    Run {
        /// Script path, relative to the project root.
        script: PathBuf,

        /// Override the step budget.
        #[arg(long)]
        max_steps: Option<u64>,

        /// Override the wall-clock budget in milliseconds.
        #[arg(long)]
        max_time_ms: Option<u64>,

        /// Override the LLM call budget.
        #[arg(long)]
        max_llm_calls: Option<u64>,

        /// Treat a detected plan loop as fatal.
        #[arg(long)]
        halt_on_loop: bool,

        /// Context encoding for structured LLM context (json or toon).
        #[arg(long)]
        context_format: Option<String>,

        /// Pre-bound globals as name=json (repeatable).
        #[arg(long = "arg", value_name = "NAME=JSON")]
        args: Vec<String>,
    },
    /// Print the timeline of a recorded run.
    Replay {
        /// Run identifier under .ps-runs/.
        run_id: String,

        /// Inline sub-run timelines beneath their parent entries.
        #[arg(long)]
        follow: bool,
    },
}
