use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Child;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::config::WorkerConfig;
use crate::error::Error;
use crate::events::{classify, Event, Rejected};


const OUTPUT_BUFFER: usize = 256;
const DRAIN_GRACE: Duration = Duration::from_secs(2);


/// What the reader task hands to the monitor.
#[derive(Debug)]
pub enum Output {
    Event(Event),
    /// A stdout line without the sentinel, or any stderr line.
    Log { pipe: Pipe, line: String },
    Exited(Option<ExitStatus>),
}


#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Pipe {
    Stdout,
    Stderr,
}


/// Handle to a running worker process.
///
/// The child itself is owned by a background reader task; this handle only
/// receives its classified output and can ask for it to be killed.
#[derive(Debug)]
pub struct Worker {
    pid: Option<u32>,
    output: mpsc::Receiver<Output>,
    kill: Option<oneshot::Sender<()>>,
}

impl Worker {
    pub fn spawn(config: &WorkerConfig, sentinel: &str) -> Result<Self, Error> {
        let mut child = tokio::process::Command::new(&config.program)
            .args(&config.args)
            .current_dir(&config.working_dir)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::Spawn {
                program: config.program.clone(),
                source: Arc::new(err),
            })?;

        let pid = child.id();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (kill_tx, kill_rx) = oneshot::channel();

        // Both pipes were requested above.
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::Spawn {
                program: config.program.clone(),
                source: Arc::new(std::io::Error::other("worker pipes unavailable")),
            });
        };

        tracing::info!(pid, program = %config.program, args = ?config.args, "worker started");

        tokio::spawn(drive(
            child,
            BufReader::new(stdout),
            BufReader::new(stderr),
            sentinel.to_string(),
            output_tx,
            kill_rx,
        ));

        Ok(Self {
            pid,
            output: output_rx,
            kill: Some(kill_tx),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next classified output. `None` means the reader is gone.
    pub async fn recv(&mut self) -> Option<Output> {
        self.output.recv().await
    }

    /// Ask the reader task to kill the child. Repeated calls do nothing.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            tracing::info!(pid = self.pid, "killing worker");
            let _ = kill.send(());
        }
    }
}


async fn drive<O, E>(
    mut child: Child,
    mut stdout: O,
    mut stderr: E,
    sentinel: String,
    output: mpsc::Sender<Output>,
    mut kill: oneshot::Receiver<()>,
) where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut status: Option<Option<ExitStatus>> = None;
    let mut drain_deadline = Instant::now();

    // Both pipes are read until EOF, also after the child has exited.
    let killed = loop {
        if status.is_some() && !stdout_open && !stderr_open {
            break false;
        }

        tokio::select! {
            _ = &mut kill => break true,
            exit = child.wait(), if status.is_none() => {
                status = Some(exited(exit));
                drain_deadline = Instant::now() + DRAIN_GRACE;
            }
            _ = time::sleep_until(drain_deadline), if status.is_some() => {
                tracing::warn!("worker output still open after exit, giving up on it");
                break false;
            }
            line = next_line(&mut stdout, &mut stdout_buf), if stdout_open => {
                let forwarded = match line {
                    Ok(Some(line)) => match classify(&line, &sentinel) {
                        Ok(event) => Some(Output::Event(event)),
                        Err(Rejected::NotAnEvent) => {
                            tracing::trace!(target: "worker", stream = "stdout", "{}", line);
                            Some(Output::Log { pipe: Pipe::Stdout, line })
                        }
                        Err(rejected) => {
                            tracing::debug!(%rejected, line = %line, "dropping worker event");
                            None
                        }
                    },
                    Ok(None) => {
                        stdout_open = false;
                        None
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to read worker stdout");
                        stdout_open = false;
                        None
                    }
                };
                if let Some(forwarded) = forwarded {
                    if output.send(forwarded).await.is_err() {
                        break true;
                    }
                }
            }
            line = next_line(&mut stderr, &mut stderr_buf), if stderr_open => match line {
                Ok(Some(line)) => {
                    tracing::trace!(target: "worker", stream = "stderr", "{}", line);
                    if output.send(Output::Log { pipe: Pipe::Stderr, line }).await.is_err() {
                        break true;
                    }
                }
                Ok(None) => stderr_open = false,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read worker stderr");
                    stderr_open = false;
                }
            },
        }
    };

    let status = match status {
        Some(status) => status,
        None => {
            if killed {
                if let Err(err) = child.start_kill() {
                    tracing::warn!(error = %err, "failed to kill worker");
                }
            }
            exited(child.wait().await)
        }
    };

    let _ = output.send(Output::Exited(status)).await;
}


fn exited(status: std::io::Result<ExitStatus>) -> Option<ExitStatus> {
    match status {
        Ok(status) => {
            tracing::info!(%status, "worker exited");
            Some(status)
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to wait for worker");
            None
        }
    }
}


/// Read one line, decoding lossily and trimming the line terminator.
///
/// Bytes of a line interrupted by another `select!` branch stay in `buf`
/// and are completed by the next call.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    if reader.read_until(b'\n', buf).await? == 0 && buf.is_empty() {
        return Ok(None);
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }

    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Ok(Some(line))
}
