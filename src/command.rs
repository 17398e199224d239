use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod run;

pub use run::run;


const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";


#[derive(Debug, Parser)]
#[command(name = "laurel", version, about = "Run the awards scraping pipeline and follow its progress")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise, and show worker output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to laurel.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}


#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline in the foreground and print progress
    Run {
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Serve the monitor over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Start a run on a serving monitor
    Start {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Kill the worker of a serving monitor
    Stop {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Print the task table of a serving monitor
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Follow updates from a serving monitor until the run ends
    Watch {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}


/// Overrides for how the worker is launched.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct WorkerArgs {
    /// Interpreter or executable to launch
    #[arg(long)]
    pub program: Option<String>,

    /// Script passed to the program, replacing configured arguments
    #[arg(long)]
    pub script: Option<String>,

    /// Working directory of the worker
    #[arg(long)]
    pub root: Option<PathBuf>,
}


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Monitor(#[from] crate::error::Error),
    #[error(transparent)]
    Client(#[from] crate::client::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
