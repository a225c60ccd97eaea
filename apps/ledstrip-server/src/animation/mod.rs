//! Animation session management.
//!
//! [`AnimationManager`] is a cheap handle onto a single actor task that owns
//! the control surface's animation slot. Every mutation (start, stop,
//! brightness, direct strip writes) and every message from the running
//! animator is processed by that task one at a time, so at most one animator
//! is ever current and a new one is only spawned after the previous one has
//! been killed and reaped.

mod events;
mod session;

use std::{collections::VecDeque, io, sync::Arc, time::Duration};

use ledstrip_proto::{Brightness, ChildMessage, LedColor, LedStrip, ParentMessage};
use ledstrip_surface::{LedSurface, SurfaceError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use events::{SessionEnd, StopReason, StripEvent};
pub use session::AnimatorCommand;

use session::{SessionEvent, SessionHandle};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Largest script accepted, in bytes. The script travels as a single argv
/// value, which Linux caps at 128 KiB.
pub const MAX_SCRIPT_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum AnimationError {
    #[error("animation script must not be empty")]
    EmptyScript,
    #[error("animation script is {len} bytes; the limit is {limit}", limit = MAX_SCRIPT_LEN)]
    ScriptTooLarge { len: usize },
    #[error("animation script must not contain NUL characters")]
    ScriptContainsNul,
    #[error("failed to spawn animator: {0}")]
    SpawnFailed(#[source] io::Error),
    #[error("no animation is running")]
    NoActiveSession,
    #[error("an animation is running; stop it before writing to the strip")]
    AnimationRunning,
    #[error("animation ended before answering")]
    SessionEnded,
    #[error("animator did not answer within {0:?}")]
    QueryTimedOut(Duration),
    #[error("animator control channel is closed")]
    ChannelClosed,
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("animation manager has shut down")]
    ManagerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Finished,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub pid: Option<u32>,
    pub state: SessionState,
    pub brightness: Brightness,
    pub script: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationStatus {
    pub active: Option<SessionInfo>,
    pub last: Option<SessionInfo>,
}

/// A direct write to the control surface.
#[derive(Debug, Clone, PartialEq)]
pub enum StripWrite {
    Fill(LedColor),
    Clear,
    Led { index: usize, color: LedColor },
    Strip(LedStrip),
}

type QueryReply = oneshot::Sender<Result<LedStrip, AnimationError>>;

enum StripQuery {
    Ready(LedStrip),
    Pending(oneshot::Receiver<Result<LedStrip, AnimationError>>),
}

enum Command {
    Start {
        script: String,
        brightness: Option<Brightness>,
        reply: oneshot::Sender<Result<SessionInfo, AnimationError>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    SetBrightness {
        brightness: Brightness,
        reply: oneshot::Sender<Result<(), AnimationError>>,
    },
    Brightness {
        reply: oneshot::Sender<Brightness>,
    },
    QueryStrip {
        reply: oneshot::Sender<StripQuery>,
    },
    AwaitFinished {
        reply: oneshot::Sender<Result<oneshot::Receiver<SessionEnd>, AnimationError>>,
    },
    WriteStrip {
        write: StripWrite,
        brightness: Option<Brightness>,
        reply: oneshot::Sender<Result<LedStrip, AnimationError>>,
    },
    Status {
        reply: oneshot::Sender<AnimationStatus>,
    },
}

#[derive(Clone)]
pub struct AnimationManager {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<StripEvent>,
    led_count: usize,
    query_timeout: Duration,
}

impl AnimationManager {
    /// Start the manager actor for `surface`. Changes the surface reports are
    /// rebroadcast to subscribers alongside the animator's own events.
    pub fn spawn(
        surface: Arc<LedSurface>,
        animator: AnimatorCommand,
        query_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let strip_events = events.clone();
        surface.on_led_strip_changed(move |strip| {
            let _ = strip_events.send(StripEvent::LedStripChanged {
                led_strip: strip.clone(),
            });
        });
        let brightness_events = events.clone();
        surface.on_brightness_changed(move |brightness| {
            let _ = brightness_events.send(StripEvent::BrightnessChanged { brightness });
        });

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let led_count = surface.led_count();
        let actor = Actor {
            surface,
            animator,
            events: events.clone(),
            session_events: session_tx,
            session: None,
            last: None,
        };
        tokio::spawn(actor.run(commands_rx, session_rx));

        Self {
            commands: commands_tx,
            events,
            led_count,
            query_timeout,
        }
    }

    pub fn led_count(&self) -> usize {
        self.led_count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StripEvent> {
        self.events.subscribe()
    }

    /// Start `script`, replacing any running animation. `brightness` defaults
    /// to the current brightness.
    pub async fn start(
        &self,
        script: impl Into<String>,
        brightness: Option<Brightness>,
    ) -> Result<SessionInfo, AnimationError> {
        let script = script.into();
        validate_script(&script)?;
        self.request(|reply| Command::Start {
            script,
            brightness,
            reply,
        })
        .await?
    }

    /// Returns whether an animation was running.
    pub async fn stop(&self) -> Result<bool, AnimationError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn set_brightness(&self, brightness: Brightness) -> Result<(), AnimationError> {
        self.request(|reply| Command::SetBrightness { brightness, reply })
            .await?
    }

    pub async fn brightness(&self) -> Result<Brightness, AnimationError> {
        self.request(|reply| Command::Brightness { reply }).await
    }

    /// The strip as it is currently displayed. While an animation runs the
    /// animator is asked, since it is the only writer.
    pub async fn query_led_strip(&self) -> Result<LedStrip, AnimationError> {
        match self.request(|reply| Command::QueryStrip { reply }).await? {
            StripQuery::Ready(strip) => Ok(strip),
            StripQuery::Pending(reply) => {
                match tokio::time::timeout(self.query_timeout, reply).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(AnimationError::SessionEnded),
                    Err(_) => Err(AnimationError::QueryTimedOut(self.query_timeout)),
                }
            }
        }
    }

    /// Wait for the running animation to end. Errors with
    /// [`AnimationError::NoActiveSession`] when nothing is running.
    pub async fn await_finished(&self) -> Result<SessionEnd, AnimationError> {
        let ended = self
            .request(|reply| Command::AwaitFinished { reply })
            .await??;
        ended.await.map_err(|_| AnimationError::SessionEnded)
    }

    pub async fn write_strip(
        &self,
        write: StripWrite,
        brightness: Option<Brightness>,
    ) -> Result<LedStrip, AnimationError> {
        self.request(|reply| Command::WriteStrip {
            write,
            brightness,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<AnimationStatus, AnimationError> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AnimationError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AnimationError::ManagerClosed)?;
        response.await.map_err(|_| AnimationError::ManagerClosed)
    }
}

fn validate_script(script: &str) -> Result<(), AnimationError> {
    if script.trim().is_empty() {
        return Err(AnimationError::EmptyScript);
    }
    if script.len() > MAX_SCRIPT_LEN {
        return Err(AnimationError::ScriptTooLarge { len: script.len() });
    }
    if script.contains('\0') {
        return Err(AnimationError::ScriptContainsNul);
    }
    Ok(())
}

struct Session {
    info: SessionInfo,
    handle: SessionHandle,
    pending_queries: VecDeque<QueryReply>,
    waiters: Vec<oneshot::Sender<SessionEnd>>,
    last_strip: Option<LedStrip>,
    // Brightness requested while the animator owns the strip; handed back to
    // the control surface when the session ends.
    pending_brightness: Option<Brightness>,
}

struct Actor {
    surface: Arc<LedSurface>,
    animator: AnimatorCommand,
    events: broadcast::Sender<StripEvent>,
    session_events: mpsc::UnboundedSender<SessionEvent>,
    session: Option<Session>,
    last: Option<SessionInfo>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = session_events.recv() => self.handle_session_event(event).await,
            }
        }

        if let Some(session) = self.end_session(SessionEnd::Stopped).await {
            debug!(session = %session.info.id, "animation stopped on shutdown");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                script,
                brightness,
                reply,
            } => {
                let _ = reply.send(self.start(script, brightness).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Command::SetBrightness { brightness, reply } => {
                let _ = reply.send(self.set_brightness(brightness).await);
            }
            Command::Brightness { reply } => {
                let brightness = self
                    .session
                    .as_ref()
                    .and_then(|session| session.pending_brightness)
                    .unwrap_or_else(|| self.surface.brightness());
                let _ = reply.send(brightness);
            }
            Command::QueryStrip { reply } => {
                let _ = reply.send(self.query_strip());
            }
            Command::AwaitFinished { reply } => {
                let waiter = match self.session.as_mut() {
                    Some(session) => {
                        let (tx, rx) = oneshot::channel();
                        session.waiters.push(tx);
                        Ok(rx)
                    }
                    None => Err(AnimationError::NoActiveSession),
                };
                let _ = reply.send(waiter);
            }
            Command::WriteStrip {
                write,
                brightness,
                reply,
            } => {
                let _ = reply.send(self.write_strip(write, brightness).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(AnimationStatus {
                    active: self.session.as_ref().map(|session| session.info.clone()),
                    last: self.last.clone(),
                });
            }
        }
    }

    async fn start(
        &mut self,
        script: String,
        brightness: Option<Brightness>,
    ) -> Result<SessionInfo, AnimationError> {
        if let Some(previous) = self.end_session(SessionEnd::Preempted).await {
            info!(session = %previous.info.id, "animation preempted");
            self.broadcast(StripEvent::AnimationStopped {
                session_id: previous.info.id,
                reason: StopReason::Preempted,
            });
        }

        let id = Uuid::new_v4();
        let initial = brightness.unwrap_or_else(|| self.surface.brightness());
        let handle = SessionHandle::spawn(
            &self.animator,
            id,
            self.surface.led_count(),
            initial,
            &script,
            self.session_events.clone(),
        )
        .map_err(|err| {
            warn!(error = %err, "failed to spawn animator");
            AnimationError::SpawnFailed(err)
        })?;

        let mut info = SessionInfo {
            id,
            pid: handle.pid(),
            state: SessionState::Starting,
            brightness: initial,
            script,
        };
        info.state = SessionState::Running;
        info!(session = %id, pid = info.pid, brightness = %initial, "animation started");

        self.session = Some(Session {
            info: info.clone(),
            handle,
            pending_queries: VecDeque::new(),
            waiters: Vec::new(),
            last_strip: None,
            pending_brightness: brightness,
        });
        self.broadcast(StripEvent::AnimationStarted {
            session_id: id,
            led_strip: self.surface.led_strip(),
        });
        Ok(info)
    }

    async fn stop(&mut self) -> bool {
        match self.end_session(SessionEnd::Stopped).await {
            Some(session) => {
                info!(session = %session.info.id, "animation stopped");
                self.broadcast(StripEvent::AnimationStopped {
                    session_id: session.info.id,
                    reason: StopReason::Requested,
                });
                true
            }
            None => false,
        }
    }

    async fn set_brightness(&mut self, brightness: Brightness) -> Result<(), AnimationError> {
        match self.session.as_mut() {
            Some(session) => {
                if !session.handle.send(ParentMessage::SetBrightness { brightness }) {
                    return Err(AnimationError::ChannelClosed);
                }
                session.pending_brightness = Some(brightness);
                self.broadcast(StripEvent::BrightnessChanged { brightness });
                Ok(())
            }
            None => {
                self.surface.set_brightness(brightness);
                self.surface.show().await?;
                Ok(())
            }
        }
    }

    fn query_strip(&mut self) -> StripQuery {
        let Some(session) = self.session.as_mut() else {
            return StripQuery::Ready(self.surface.led_strip());
        };

        // The reply slot must exist before the request can be answered.
        let (tx, rx) = oneshot::channel();
        session.pending_queries.push_back(tx);
        if !session.handle.send(ParentMessage::GetLedStrip) {
            if let Some(slot) = session.pending_queries.pop_back() {
                let _ = slot.send(Err(AnimationError::ChannelClosed));
            }
        }
        StripQuery::Pending(rx)
    }

    async fn write_strip(
        &mut self,
        write: StripWrite,
        brightness: Option<Brightness>,
    ) -> Result<LedStrip, AnimationError> {
        if self.session.is_some() {
            return Err(AnimationError::AnimationRunning);
        }

        let surface = &self.surface;
        match write {
            StripWrite::Fill(color) => {
                surface.fill_leds(color);
            }
            StripWrite::Clear => {
                surface.clear_leds();
            }
            StripWrite::Led { index, color } => {
                surface.set_led(index, color)?;
            }
            StripWrite::Strip(strip) => {
                surface.set_led_strip(&strip)?;
            }
        }
        if let Some(brightness) = brightness {
            surface.set_brightness(brightness);
        }
        surface.show().await?;
        Ok(surface.led_strip())
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        let current = self.session.as_ref().map(|session| session.info.id);
        match event {
            SessionEvent::Message { id, message } if Some(id) == current => {
                self.handle_child_message(message).await;
            }
            SessionEvent::Exited { id, status } if Some(id) == current => {
                warn!(session = %id, ?status, "animator exited without finishing");
                self.end_session(SessionEnd::Exited).await;
                self.broadcast(StripEvent::AnimationStopped {
                    session_id: id,
                    reason: StopReason::Exited,
                });
            }
            SessionEvent::Message { id, .. } | SessionEvent::Exited { id, .. } => {
                debug!(session = %id, "dropping event from a previous animation");
            }
        }
    }

    async fn handle_child_message(&mut self, message: ChildMessage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match message {
            ChildMessage::LedStripChanged { led_strip } => {
                session.last_strip = Some(led_strip.clone());
                self.broadcast(StripEvent::LedStripChanged { led_strip });
            }
            ChildMessage::LedStrip { led_strip } => match session.pending_queries.pop_front() {
                Some(slot) => {
                    let _ = slot.send(Ok(led_strip));
                }
                None => warn!(session = %session.info.id, "unsolicited led strip reply"),
            },
            ChildMessage::Finished { error } => {
                let Some(session) = self.end_session(SessionEnd::Finished).await else {
                    return;
                };
                match &error {
                    Some(error) => warn!(session = %session.info.id, %error, "animation failed"),
                    None => info!(session = %session.info.id, "animation finished"),
                }
                let led_strip = session
                    .last_strip
                    .unwrap_or_else(|| self.surface.led_strip());
                self.broadcast(StripEvent::AnimationFinished {
                    session_id: session.info.id,
                    led_strip,
                    error,
                });
            }
        }
    }

    /// Kill and reap the current animator, settle everyone waiting on it and
    /// hand the strip back to the control surface.
    async fn end_session(&mut self, end: SessionEnd) -> Option<Session> {
        let mut session = self.session.take()?;
        session.handle.terminate().await;

        for slot in session.pending_queries.drain(..) {
            let _ = slot.send(Err(AnimationError::SessionEnded));
        }
        for waiter in session.waiters.drain(..) {
            let _ = waiter.send(end);
        }
        if let Some(brightness) = session.pending_brightness.take() {
            // Already broadcast when it was requested.
            self.surface.restore_brightness(brightness);
        }

        session.info.state = match end {
            SessionEnd::Finished => SessionState::Finished,
            SessionEnd::Stopped | SessionEnd::Preempted | SessionEnd::Exited => {
                SessionState::Stopped
            }
        };
        self.last = Some(session.info.clone());
        Some(session)
    }

    fn broadcast(&self, event: StripEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(led_count: usize) -> (Arc<LedSurface>, AnimationManager) {
        let surface = Arc::new(LedSurface::new(led_count));
        let animator = AnimatorCommand::new("/nonexistent/ledstrip-animator");
        let manager =
            AnimationManager::spawn(surface.clone(), animator, Duration::from_millis(200));
        (surface, manager)
    }

    #[tokio::test]
    async fn stop_without_session_is_silent() {
        let (_surface, manager) = manager(3);
        let mut events = manager.subscribe();

        assert!(!manager.stop().await.unwrap());
        assert!(!manager.stop().await.unwrap());
        assert!(events.try_recv().is_err());
        assert!(manager.status().await.unwrap().active.is_none());
    }

    #[tokio::test]
    async fn query_without_session_reads_the_surface() {
        let (surface, manager) = manager(2);
        surface
            .fill_leds(LedColor::new(9, 9, 9))
            .show()
            .await
            .unwrap();

        assert_eq!(
            manager.query_led_strip().await.unwrap(),
            LedStrip::filled(2, LedColor::new(9, 9, 9))
        );
    }

    #[tokio::test]
    async fn brightness_without_session_renders_immediately() {
        let (surface, manager) = manager(10);
        let mut events = manager.subscribe();
        manager
            .write_strip(StripWrite::Fill(LedColor::new(255, 0, 0)), None)
            .await
            .unwrap();
        manager.set_brightness(Brightness::Level(50)).await.unwrap();

        assert_eq!(surface.brightness(), Brightness::Level(50));
        assert_eq!(manager.brightness().await.unwrap(), Brightness::Level(50));
        assert_eq!(
            manager.query_led_strip().await.unwrap(),
            LedStrip::filled(10, LedColor::new(128, 0, 0))
        );

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["led_strip_changed", "brightness_changed", "led_strip_changed"]
        );
    }

    #[tokio::test]
    async fn direct_writes_are_validated() {
        let (_surface, manager) = manager(3);
        let err = manager
            .write_strip(
                StripWrite::Led {
                    index: 3,
                    color: LedColor::new(1, 1, 1),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnimationError::Surface(SurfaceError::IndexOutOfRange { index: 3, len: 3 })
        ));

        let strip = manager
            .write_strip(
                StripWrite::Strip(LedStrip::filled(3, LedColor::new(0, 0, 7))),
                Some(Brightness::FULL),
            )
            .await
            .unwrap();
        assert_eq!(strip, LedStrip::filled(3, LedColor::new(0, 0, 7)));
    }

    #[tokio::test]
    async fn start_rejects_empty_scripts_and_reports_spawn_failures() {
        let (_surface, manager) = manager(1);
        assert!(matches!(
            manager.start("   ", None).await,
            Err(AnimationError::EmptyScript)
        ));
        assert!(matches!(
            manager.start("led_controller.show();", None).await,
            Err(AnimationError::SpawnFailed(_))
        ));
        assert!(manager.status().await.unwrap().active.is_none());
        assert!(matches!(
            manager.await_finished().await,
            Err(AnimationError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn scripts_that_cannot_be_passed_to_the_animator_are_rejected() {
        let (_surface, manager) = manager(1);
        let mut events = manager.subscribe();

        let oversized = format!("// {}\nled_controller.show();", "x".repeat(200_000));
        assert!(matches!(
            manager.start(oversized, None).await,
            Err(AnimationError::ScriptTooLarge { len }) if len > MAX_SCRIPT_LEN
        ));
        assert!(matches!(
            manager.start("let s = \"\0\"; led_controller.show();", None).await,
            Err(AnimationError::ScriptContainsNul)
        ));
        assert!(events.try_recv().is_err());

        let at_limit = format!("//{}", "x".repeat(MAX_SCRIPT_LEN - 2));
        assert!(matches!(
            manager.start(at_limit, None).await,
            Err(AnimationError::SpawnFailed(_))
        ));
    }
}
