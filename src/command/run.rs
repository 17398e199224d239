use clap::Parser;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::client::Client;
use crate::command::{Cli, Command, Error, WorkerArgs};
use crate::config::Config;
use crate::monitor::{Monitor, Snapshot, StartOutcome, Update};
use crate::process::Pipe;
use crate::tasks::TaskSnapshot;


pub async fn run() -> Result<(), Error> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Run { worker } => {
            let config = load_config(args.config.as_deref(), &worker)?;
            run_local(config, args.verbose).await?;
        }
        Command::Serve { bind, port, worker } => {
            let config = load_config(args.config.as_deref(), &worker)?;
            serve(config, bind, port).await?;
        }
        Command::Start { server } => {
            start(server).await?;
        }
        Command::Stop { server } => {
            Client::new(server).stop().await?;
        }
        Command::Status { server } => {
            print_snapshot(&Client::new(server).status().await?);
        }
        Command::Watch { server } => {
            watch(server, args.verbose).await?;
        }
    }
    Ok(())
}


fn init_tracing(verbose: bool) {
    let default = if verbose { "laurel=debug" } else { "laurel=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}


fn load_config(path: Option<&Path>, worker: &WorkerArgs) -> Result<Config, Error> {
    let mut config = Config::load(path)?;
    apply_overrides(&mut config, worker);
    Ok(config)
}


fn apply_overrides(config: &mut Config, worker: &WorkerArgs) {
    if let Some(program) = &worker.program {
        config.worker.program = program.clone();
    }
    if let Some(script) = &worker.script {
        config.worker.args = vec![script.clone()];
    }
    if let Some(root) = &worker.root {
        config.worker.working_dir = root.clone();
    }
}


async fn run_local(config: Config, verbose: bool) -> Result<(), Error> {
    let monitor = Monitor::spawn(config)?;
    let mut updates = monitor.subscribe();

    let run = match monitor.start().await? {
        StartOutcome::Started { run } | StartOutcome::AlreadyRunning { run } => run,
    };

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(Update::RunEnded { run: ended }) if ended == run => break,
                Ok(update) => print_update(&update, verbose),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping worker");
                monitor.stop().await?;
            }
        }
    }

    print_snapshot(&monitor.snapshot().await?);
    monitor.shutdown().await?;
    Ok(())
}


async fn serve(config: Config, bind: String, port: u16) -> Result<(), Error> {
    let monitor = Monitor::spawn(config)?;
    let server = Arc::new(crate::server::Server::new(monitor.clone()));
    let listener = tokio::net::TcpListener::bind((bind.as_str(), port)).await?;
    crate::server::serve(server, listener).await?;
    monitor.shutdown().await?;
    Ok(())
}


async fn start(server: String) -> Result<(), Error> {
    match Client::new(server).start().await? {
        StartOutcome::Started { run } => println!("started run {}", run),
        StartOutcome::AlreadyRunning { run } => println!("run {} is already active", run),
    }
    Ok(())
}


async fn watch(server: String, verbose: bool) -> Result<(), Error> {
    let mut updates = Client::new(server).updates().await?;
    while let Some(update) = updates.next().await {
        let update = update?;
        if let Update::RunEnded { run } = update {
            println!("run {} ended", run);
            break;
        }
        print_update(&update, verbose);
    }
    Ok(())
}


/// Worker log lines are only shown when `verbose` is set.
fn print_update(update: &Update, verbose: bool) {
    match update {
        Update::RunStarted { run } => println!("run {} started", run),
        Update::Task(task) if task.info.is_empty() => {
            println!("{:<22} {:?}", task.name, task.state);
        }
        Update::Task(task) => {
            println!("{:<22} {:?}: {}", task.name, task.state, task.info);
        }
        Update::Progress { percent } => println!("progress {}%", percent),
        Update::Log { pipe: Pipe::Stdout, line } if verbose => println!("| {}", line),
        Update::Log { pipe: Pipe::Stderr, line } if verbose => eprintln!("| {}", line),
        Update::Log { .. } => {}
        Update::RunEnded { run } => println!("run {} ended", run),
    }
}


fn print_snapshot(snapshot: &Snapshot) {
    match (snapshot.run, snapshot.running) {
        (Some(run), true) => println!("run {} running ({}%)", run, snapshot.percent),
        (Some(run), false) => println!("run {} finished ({}%)", run, snapshot.percent),
        (None, _) => println!("no run yet"),
    }
    for TaskSnapshot { name, state, info, .. } in &snapshot.tasks {
        println!("  {:<22} {:<10} {}", name, format!("{:?}", state), info);
    }
}
