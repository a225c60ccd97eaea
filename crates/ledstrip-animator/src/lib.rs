//! Animation runtime.
//!
//! Runs one user script against a private [`LedSurface`] and speaks the
//! session protocol over a pair of byte streams (stdin/stdout when launched
//! by the server). Every rendered frame is reported as `led-strip-changed`;
//! `get-led-strip` requests are answered from the last rendered frame; the
//! run ends with a single `finished` message carrying the script error, if
//! any.

pub mod script;

use std::sync::Arc;

use ledstrip_proto::{
    Brightness, ChildMessage, FrameReader, FrameWriter, ParentMessage, ProtocolError,
};
use ledstrip_surface::LedSurface;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Handle,
    sync::mpsc,
    task::JoinError,
};
use tracing::{debug, info, warn};

pub use script::{execute, sandboxed_engine, ScriptLeds};

#[derive(Debug, Clone)]
pub struct AnimatorOptions {
    pub led_count: usize,
    pub brightness: Brightness,
    pub script: String,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Script returned normally; `finished` was sent.
    Completed,
    /// Script raised an error; `finished` was sent with the message.
    Failed(String),
    /// The parent closed the control channel before the script ended. Nothing
    /// is reported since nobody is listening.
    Detached,
}

#[derive(Debug, Error)]
pub enum AnimatorError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("animator task failed: {0}")]
    Join(#[from] JoinError),
}

pub async fn run<R, W>(
    options: AnimatorOptions,
    input: R,
    output: W,
) -> Result<RunOutcome, AnimatorError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let AnimatorOptions {
        led_count,
        brightness,
        script,
    } = options;
    info!(led_count, %brightness, "animation starting");

    let surface = Arc::new(LedSurface::new(led_count));
    surface.set_brightness(brightness);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outbound(output, outbound_rx));
    let mut inbound = tokio::spawn(handle_inbound(
        input,
        Arc::clone(&surface),
        outbound_tx.clone(),
    ));

    let listener_tx = outbound_tx.clone();
    let listener = surface.on_led_strip_changed(move |strip| {
        let _ = listener_tx.send(ChildMessage::LedStripChanged {
            led_strip: strip.clone(),
        });
    });

    let leds = ScriptLeds::new(Arc::clone(&surface), Handle::current());
    let mut script_task = tokio::task::spawn_blocking(move || {
        let engine = sandboxed_engine();
        execute(&engine, leds, led_count, &script).map_err(|err| err.to_string())
    });

    let outcome = tokio::select! {
        result = &mut script_task => match result? {
            Ok(()) => RunOutcome::Completed,
            Err(message) => RunOutcome::Failed(message),
        },
        _ = &mut inbound => RunOutcome::Detached,
    };

    surface.remove_listener(listener);
    inbound.abort();

    let finished = match &outcome {
        RunOutcome::Completed => {
            info!("animation completed");
            Some(ChildMessage::Finished { error: None })
        }
        RunOutcome::Failed(message) => {
            warn!(error = %message, "animation script failed");
            Some(ChildMessage::Finished {
                error: Some(message.clone()),
            })
        }
        RunOutcome::Detached => {
            info!("control channel closed; abandoning animation");
            None
        }
    };

    match finished {
        Some(message) => {
            let _ = outbound_tx.send(message);
            drop(outbound_tx);
            writer.await??;
        }
        None => writer.abort(),
    }
    Ok(outcome)
}

/// [`run`] over the process's own stdin and stdout.
pub async fn run_stdio(options: AnimatorOptions) -> Result<RunOutcome, AnimatorError> {
    run(options, tokio::io::stdin(), tokio::io::stdout()).await
}

async fn write_outbound<W>(
    output: W,
    mut outbound: mpsc::UnboundedReceiver<ChildMessage>,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameWriter::new(output);
    while let Some(message) = outbound.recv().await {
        frames.write(&message).await?;
        if message.is_finished() {
            break;
        }
    }
    Ok(())
}

async fn handle_inbound<R>(
    input: R,
    surface: Arc<LedSurface>,
    outbound: mpsc::UnboundedSender<ChildMessage>,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(input);
    loop {
        match frames.read::<ParentMessage>().await {
            Ok(Some(ParentMessage::SetBrightness { brightness })) => {
                debug!(%brightness, "brightness requested by server");
                surface.set_brightness(brightness);
                if let Err(err) = surface.show().await {
                    warn!(error = %err, "failed to render after brightness change");
                }
            }
            Ok(Some(ParentMessage::GetLedStrip)) => {
                let _ = outbound.send(ChildMessage::LedStrip {
                    led_strip: surface.led_strip(),
                });
            }
            Ok(None) => {
                debug!("control channel closed");
                break;
            }
            Err(err) if !err.is_fatal() => {
                warn!(error = %err, "ignoring malformed control message");
            }
            Err(err) => {
                warn!(error = %err, "control channel failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledstrip_proto::{LedColor, LedStrip};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const RED: LedColor = LedColor::new(255, 0, 0);

    struct Parent {
        to_child: FrameWriter<DuplexStream>,
        from_child: FrameReader<DuplexStream>,
        run: JoinHandle<Result<RunOutcome, AnimatorError>>,
    }

    impl Parent {
        async fn next(&mut self) -> ChildMessage {
            timeout(Duration::from_secs(5), self.from_child.read())
                .await
                .expect("timed out waiting for animator")
                .expect("protocol error")
                .expect("animator closed its output")
        }

        async fn outcome(self) -> RunOutcome {
            let Parent { to_child, run, .. } = self;
            let outcome = timeout(Duration::from_secs(5), run)
                .await
                .expect("animator did not stop")
                .expect("animator panicked")
                .expect("animator failed");
            drop(to_child);
            outcome
        }
    }

    fn launch(led_count: usize, script: &str) -> Parent {
        let (parent_tx, child_rx) = duplex(64 * 1024);
        let (child_tx, parent_rx) = duplex(64 * 1024);
        let options = AnimatorOptions {
            led_count,
            brightness: Brightness::FULL,
            script: script.to_string(),
        };
        Parent {
            to_child: FrameWriter::new(parent_tx),
            from_child: FrameReader::new(parent_rx),
            run: tokio::spawn(run(options, child_rx, child_tx)),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reports_frames_then_finished() {
        let mut parent = launch(3, "led_controller.fill_leds(rgb(255, 0, 0)).show();");

        assert_eq!(
            parent.next().await,
            ChildMessage::LedStripChanged {
                led_strip: LedStrip::filled(3, RED)
            }
        );
        assert_eq!(parent.next().await, ChildMessage::Finished { error: None });
        assert_eq!(parent.outcome().await, RunOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn answers_queries_and_brightness_while_running() {
        let mut parent = launch(
            2,
            "led_controller.fill_leds(rgb(255, 0, 0)).show(); sleep(300);",
        );
        assert!(matches!(
            parent.next().await,
            ChildMessage::LedStripChanged { .. }
        ));

        parent
            .to_child
            .write(&ParentMessage::GetLedStrip)
            .await
            .unwrap();
        assert_eq!(
            parent.next().await,
            ChildMessage::LedStrip {
                led_strip: LedStrip::filled(2, RED)
            }
        );

        parent
            .to_child
            .write(&ParentMessage::SetBrightness {
                brightness: Brightness::Level(50),
            })
            .await
            .unwrap();
        assert_eq!(
            parent.next().await,
            ChildMessage::LedStripChanged {
                led_strip: LedStrip::filled(2, LedColor::new(128, 0, 0))
            }
        );

        assert_eq!(parent.next().await, ChildMessage::Finished { error: None });
        assert_eq!(parent.outcome().await, RunOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn script_errors_are_reported_in_finished() {
        let mut parent = launch(1, r#"throw "boom";"#);

        let ChildMessage::Finished { error: Some(error) } = parent.next().await else {
            panic!("expected finished with an error");
        };
        assert!(error.contains("boom"), "unexpected error: {error}");
        assert!(matches!(parent.outcome().await, RunOutcome::Failed(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_control_frames_are_skipped() {
        let mut parent = launch(1, "led_controller.show(); sleep(300);");
        assert!(matches!(
            parent.next().await,
            ChildMessage::LedStripChanged { .. }
        ));

        let mut raw = parent.to_child.into_inner();
        let garbage = b"{\"action\":\"dance\"}";
        raw.write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        raw.write_all(garbage).await.unwrap();
        parent.to_child = FrameWriter::new(raw);
        parent
            .to_child
            .write(&ParentMessage::GetLedStrip)
            .await
            .unwrap();

        assert_eq!(
            parent.next().await,
            ChildMessage::LedStrip {
                led_strip: LedStrip::filled(1, LedColor::OFF)
            }
        );
        assert_eq!(parent.next().await, ChildMessage::Finished { error: None });
        assert_eq!(parent.outcome().await, RunOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closing_the_control_channel_detaches() {
        let Parent { to_child, run, .. } = launch(1, "sleep(100);");
        drop(to_child);

        let outcome = timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RunOutcome::Detached);
    }
}
