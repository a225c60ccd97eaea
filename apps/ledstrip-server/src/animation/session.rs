//! One animator child process and the tasks that service its pipes.
//!
//! stdin is owned by a writer task fed from an unbounded queue; stdout is read
//! by the supervisor, which forwards every frame and only reaps the child once
//! stdout reaches EOF, so the manager always sees `finished` before the exit.
//! stderr lines are re-logged under the session id.

use std::{
    ffi::OsString,
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use ledstrip_proto::{Brightness, ChildMessage, FrameReader, FrameWriter, ParentMessage};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Output of a session's child, tagged with the session it belongs to.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Message { id: Uuid, message: ChildMessage },
    Exited { id: Uuid, status: Option<ExitStatus> },
}

/// How to launch the animator. Arguments after the leading ones are always
/// `animate --led-count N --brightness B --script TEXT`.
#[derive(Debug, Clone)]
pub struct AnimatorCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl AnimatorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Re-launch the running executable, which carries the `animate` subcommand.
    pub fn current_exe() -> io::Result<Self> {
        std::env::current_exe().map(Self::new)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    fn build(&self, led_count: usize, brightness: Brightness, script: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("animate")
            .arg("--led-count")
            .arg(led_count.to_string())
            .arg("--brightness")
            .arg(brightness.to_string())
            .arg("--script")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

pub(crate) struct SessionHandle {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<ParentMessage>,
    kill: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub(crate) fn spawn(
        command: &AnimatorCommand,
        id: Uuid,
        led_count: usize,
        brightness: Brightness,
        script: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> io::Result<Self> {
        let mut child = command.build(led_count, brightness, script).spawn()?;
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;
        let pid = child.id();
        debug!(session = %id, pid, "animator spawned");

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_control(id, stdin, control_rx));
        tokio::spawn(forward_stderr(id, stderr));

        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(id, child, stdout, kill_rx, events));

        Ok(Self {
            pid,
            control: control_tx,
            kill: Some(kill_tx),
            supervisor: Some(supervisor),
        })
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a message for the child. Fails once the stdin writer has stopped.
    pub(crate) fn send(&self, message: ParentMessage) -> bool {
        self.control.send(message).is_ok()
    }

    /// Kill and reap the child. Returns once the process is gone.
    pub(crate) async fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(err) = supervisor.await {
                warn!(error = %err, "animator supervisor task failed");
            }
        }
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> io::Result<T> {
    pipe.ok_or_else(|| io::Error::new(io::ErrorKind::Other, format!("animator {name} not piped")))
}

async fn supervise(
    id: Uuid,
    mut child: Child,
    stdout: ChildStdout,
    mut kill: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let drained = tokio::select! {
        _ = pump_stdout(id, stdout, events.clone()) => true,
        _ = &mut kill => false,
    };

    if drained {
        tokio::select! {
            status = child.wait() => {
                let status = match status {
                    Ok(status) => Some(status),
                    Err(err) => {
                        warn!(session = %id, error = %err, "failed to reap animator");
                        None
                    }
                };
                let _ = events.send(SessionEvent::Exited { id, status });
                return;
            }
            _ = &mut kill => {}
        }
    }

    match child.kill().await {
        Ok(()) => debug!(session = %id, "animator killed"),
        Err(err) => warn!(session = %id, error = %err, "failed to kill animator"),
    }
}

async fn pump_stdout(
    id: Uuid,
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut frames = FrameReader::new(stdout);
    loop {
        match frames.read::<ChildMessage>().await {
            Ok(Some(message)) => {
                if events.send(SessionEvent::Message { id, message }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) if !err.is_fatal() => {
                warn!(session = %id, error = %err, "skipping undecodable animator message");
            }
            Err(err) => {
                warn!(session = %id, error = %err, "animator output failed");
                break;
            }
        }
    }
}

async fn write_control(
    id: Uuid,
    stdin: ChildStdin,
    mut control: mpsc::UnboundedReceiver<ParentMessage>,
) {
    let mut frames = FrameWriter::new(stdin);
    while let Some(message) = control.recv().await {
        if let Err(err) = frames.write(&message).await {
            debug!(session = %id, error = %err, "animator stdin closed");
            break;
        }
    }
}

async fn forward_stderr(id: Uuid, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "animator", session = %id, "{line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(session = %id, error = %err, "animator stderr closed");
                break;
            }
        }
    }
}
