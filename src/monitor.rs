//! The run supervisor.
//!
//! A single spawned task owns the active [`Run`] and is the only place task
//! state and progress are mutated. Commands from [`Monitor`] handles and
//! classified worker output both arrive over channels, and every resulting
//! mutation is published as an [`Update`] on a broadcast channel.

use futures::stream::{self, Stream};
use std::process::ExitStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Error;
use crate::events::Event;
use crate::process::{Output, Pipe, Worker};
use crate::progress::Progress;
use crate::tasks::{Registry, TaskSnapshot, TaskState};


const COMMAND_BUFFER: usize = 32;
const UPDATE_BUFFER: usize = 1024;


/// Notifications published to observers on every mutation.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    RunStarted { run: Uuid },
    Task(TaskSnapshot),
    Progress { percent: u8 },
    /// Worker output that is not an event.
    Log { pipe: Pipe, line: String },
    RunEnded { run: Uuid },
}


#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Snapshot {
    pub run: Option<Uuid>,
    pub running: bool,
    pub percent: u8,
    pub tasks: Vec<TaskSnapshot>,
}


#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { run: Uuid },
    AlreadyRunning { run: Uuid },
}

impl StartOutcome {
    pub fn run(&self) -> Uuid {
        match self {
            StartOutcome::Started { run } | StartOutcome::AlreadyRunning { run } => *run,
        }
    }
}


/// Cloneable handle to the supervisor task.
#[derive(Clone, Debug)]
pub struct Monitor {
    commands: mpsc::Sender<Command>,
    updates: broadcast::Sender<Update>,
}

impl Monitor {
    /// Validate `config` and spawn the supervisor task.
    pub fn spawn(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let registry = Registry::new(&config.tasks)?;
        if registry.is_empty() {
            return Err(Error::Config("at least one task is required".into()));
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);

        let supervisor = Supervisor {
            config,
            commands: commands_rx,
            updates: updates.clone(),
            run: None,
            last: Ended {
                run: None,
                progress: Progress::new(registry.len()),
                registry,
            },
        };
        tokio::spawn(supervisor.drive());

        Ok(Self {
            commands: commands_tx,
            updates,
        })
    }

    /// Launch the worker unless a run is already active.
    pub async fn start(&self) -> Result<StartOutcome, Error> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Kill the active worker. Does nothing when idle.
    pub async fn stop(&self) -> Result<(), Error> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, Error> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Kill any active run, finish it, and stop the supervisor task.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }

    /// Updates as a stream; observers that fall behind skip what they missed.
    pub fn updates(&self) -> impl Stream<Item = Update> + Send + 'static {
        stream::unfold(self.subscribe(), |mut updates| async move {
            loop {
                match updates.recv().await {
                    Ok(update) => return Some((update, updates)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "update subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::MonitorClosed)?;
        response.await.map_err(|_| Error::MonitorClosed)
    }
}


enum Command {
    Start { reply: oneshot::Sender<Result<StartOutcome, Error>> },
    Stop { reply: oneshot::Sender<()> },
    Snapshot { reply: oneshot::Sender<Snapshot> },
    Shutdown { reply: oneshot::Sender<()> },
}


/// One execution of the worker and all the state it produces.
struct Run {
    id: Uuid,
    worker: Worker,
    registry: Registry,
    progress: Progress,
}


/// What remains of the most recent run once its worker is gone.
struct Ended {
    run: Option<Uuid>,
    registry: Registry,
    progress: Progress,
}


struct Supervisor {
    config: Config,
    commands: mpsc::Receiver<Command>,
    updates: broadcast::Sender<Update>,
    run: Option<Run>,
    last: Ended,
}

enum Next {
    Command(Option<Command>),
    Output(Option<Output>),
}

impl Supervisor {
    async fn drive(mut self) {
        loop {
            let next = tokio::select! {
                command = self.commands.recv() => Next::Command(command),
                output = next_output(&mut self.run) => Next::Output(output),
            };

            match next {
                Next::Command(Some(Command::Start { reply })) => {
                    let _ = reply.send(self.start());
                }
                Next::Command(Some(Command::Stop { reply })) => {
                    self.stop();
                    let _ = reply.send(());
                }
                Next::Command(Some(Command::Snapshot { reply })) => {
                    let _ = reply.send(self.snapshot());
                }
                Next::Command(Some(Command::Shutdown { reply })) => {
                    self.stop();
                    self.end_run(None);
                    let _ = reply.send(());
                    break;
                }
                Next::Command(None) => {
                    self.stop();
                    self.end_run(None);
                    break;
                }
                Next::Output(Some(Output::Event(event))) => self.apply(event),
                Next::Output(Some(Output::Log { pipe, line })) => {
                    publish(&self.updates, Update::Log { pipe, line });
                }
                Next::Output(Some(Output::Exited(status))) => self.end_run(status),
                Next::Output(None) => self.end_run(None),
            }
        }

        tracing::debug!("monitor stopped");
    }

    fn start(&mut self) -> Result<StartOutcome, Error> {
        if let Some(run) = &self.run {
            tracing::debug!(run = %run.id, "run already active, ignoring start");
            return Ok(StartOutcome::AlreadyRunning { run: run.id });
        }

        let mut registry = self.last.registry.clone();
        registry.reset();

        let worker = Worker::spawn(&self.config.worker, &self.config.sentinel)
            .inspect_err(|err| tracing::error!(error = %err, "failed to start run"))?;

        let run = Run {
            id: Uuid::new_v4(),
            worker,
            progress: Progress::new(registry.len()),
            registry,
        };
        tracing::info!(run = %run.id, pid = run.worker.pid(), tasks = run.registry.len(), "run started");

        publish(&self.updates, Update::RunStarted { run: run.id });
        for task in run.registry.snapshots() {
            publish(&self.updates, Update::Task(task));
        }
        publish(&self.updates, Update::Progress { percent: run.progress.percent() });

        let outcome = StartOutcome::Started { run: run.id };
        self.run = Some(run);
        Ok(outcome)
    }

    fn stop(&mut self) {
        match self.run.as_mut() {
            Some(run) => run.worker.kill(),
            None => tracing::debug!("no active run to stop"),
        }
    }

    fn apply(&mut self, event: Event) {
        let Some(run) = self.run.as_mut() else {
            return;
        };

        match run.registry.apply(&event) {
            Ok(Some(change)) => {
                tracing::debug!(
                    run = %run.id,
                    task = %change.task.code,
                    state = ?change.task.state,
                    info = %change.task.info,
                    "task updated",
                );
                publish(&self.updates, Update::Task(change.task));

                if change.terminal {
                    if !run.progress.record_terminal() {
                        tracing::warn!(run = %run.id, "more finished tasks than tracked");
                    }
                    publish(&self.updates, Update::Progress { percent: run.progress.percent() });
                }
            }
            Ok(None) => {
                tracing::warn!(run = %run.id, ?event, "ignoring repeated event for task");
            }
            Err(err) => {
                tracing::debug!(run = %run.id, error = %err, "dropping event");
            }
        }
    }

    /// Sweep unfinished tasks, force progress to completion and retire the run.
    ///
    /// The exit status is only logged; a crash and a clean exit end a run
    /// the same way.
    fn end_run(&mut self, status: Option<ExitStatus>) {
        let Some(run) = self.run.take() else {
            return;
        };
        let Run { id, worker, mut registry, mut progress } = run;
        drop(worker);

        for task in registry.sweep() {
            tracing::warn!(run = %id, task = %task.code, "task did not finish");
            publish(&self.updates, Update::Task(task));
        }
        progress.finish();
        debug_assert!(registry.all_terminal());

        publish(&self.updates, Update::Progress { percent: progress.percent() });
        publish(&self.updates, Update::RunEnded { run: id });

        let failed = registry
            .snapshots()
            .iter()
            .filter(|task| task.state == TaskState::Failed)
            .count();
        tracing::info!(
            run = %id,
            exit_code = status.and_then(|status| status.code()),
            failed,
            total = registry.len(),
            "run ended",
        );

        self.last = Ended {
            run: Some(id),
            registry,
            progress,
        };
    }

    fn snapshot(&self) -> Snapshot {
        match &self.run {
            Some(run) => Snapshot {
                run: Some(run.id),
                running: true,
                percent: run.progress.percent(),
                tasks: run.registry.snapshots(),
            },
            None => Snapshot {
                run: self.last.run,
                running: false,
                percent: match self.last.run {
                    Some(_) => self.last.progress.percent(),
                    None => 0,
                },
                tasks: self.last.registry.snapshots(),
            },
        }
    }
}


async fn next_output(run: &mut Option<Run>) -> Option<Output> {
    match run {
        Some(run) => run.worker.recv().await,
        None => std::future::pending().await,
    }
}


fn publish(updates: &broadcast::Sender<Update>, update: Update) {
    // No subscribers is not an error.
    let _ = updates.send(update);
}
