//! Launches the awards scraping worker, follows its `EMIT:` event stream and
//! tracks per-task state and overall progress for one run at a time.

pub mod client;
pub mod command;
pub mod config;
mod error;
pub mod events;
pub mod monitor;
mod process;
pub mod progress;
pub mod scan;
mod server;
pub mod tasks;

pub use command::{Cli, Command};
pub use config::{Config, WorkerConfig};
pub use error::Error;
pub use events::{classify, Event, Outcome, Phase, Rejected, Stats};
pub use monitor::{Monitor, Snapshot, StartOutcome, Update};
pub use process::Pipe;
pub use server::{router, serve, Server};
pub use tasks::{Registry, TaskDef, TaskKind, TaskSnapshot, TaskState};
