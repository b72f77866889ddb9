//! Audio output: decode a synthesized clip and play it through rodio.
//!
//! The player only knows the `AudioOutput`/`AudioHandle` traits; the rodio
//! implementation decodes the WAV bytes, appends them to a `Sink`, and
//! watches the sink from a background task that reports natural completion
//! back over the event channel. A stopped handle is discarded: its
//! watcher exits without reporting anything.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::AudioClip;
use crate::player::{PlaybackTag, PlayerEvent};

/// Audio decode or output failure. Never retried automatically; the user
/// re-triggers play.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct PlaybackDeviceError(pub String);

pub trait AudioOutput: Send + Sync + 'static {
    /// Decode and start playing `clip`. On natural completion the backend
    /// sends `PlaybackEnded { tag }` over `events`; a handle that was
    /// stopped sends nothing.
    fn start(
        &self,
        clip: AudioClip,
        tag: PlaybackTag,
        events: mpsc::Sender<PlayerEvent>,
    ) -> Result<Box<dyn AudioHandle>, PlaybackDeviceError>;
}

pub trait AudioHandle: Send {
    fn pause(&self);
    fn resume(&self);
    /// Stop and discard. No completion event follows.
    fn stop(&self);
}

pub struct RodioOutput {
    // Keeps the output device alive for the process lifetime.
    stream: OutputStream,
}

impl RodioOutput {
    pub fn new() -> Result<Self, PlaybackDeviceError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackDeviceError(format!("failed to open audio output: {e}")))?;
        Ok(Self { stream })
    }
}

impl AudioOutput for RodioOutput {
    fn start(
        &self,
        clip: AudioClip,
        tag: PlaybackTag,
        events: mpsc::Sender<PlayerEvent>,
    ) -> Result<Box<dyn AudioHandle>, PlaybackDeviceError> {
        let source = Decoder::new(Cursor::new(clip.bytes))
            .map_err(|e| PlaybackDeviceError(format!("could not decode {} audio: {e}", clip.mime)))?;

        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(source);

        let sink = Arc::new(Mutex::new(Some(sink)));
        let discarded = Arc::new(AtomicBool::new(false));

        // Completion watcher. A paused sink is not empty, so pausing just
        // keeps this loop ticking until playback really finishes.
        let watch_sink = sink.clone();
        let watch_discarded = discarded.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if watch_discarded.load(Ordering::Relaxed) {
                    return;
                }
                let is_empty = match watch_sink.lock().unwrap().as_ref() {
                    Some(s) => s.empty(),
                    None => return,
                };
                if is_empty {
                    debug!("Playback finished for sentence {}", tag.index);
                    let _ = events.send(PlayerEvent::PlaybackEnded { tag }).await;
                    return;
                }
            }
        });

        Ok(Box::new(RodioHandle { sink, discarded }))
    }
}

struct RodioHandle {
    sink: Arc<Mutex<Option<Sink>>>,
    discarded: Arc<AtomicBool>,
}

impl AudioHandle for RodioHandle {
    fn pause(&self) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.pause();
        }
    }

    fn resume(&self) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.play();
        }
    }

    fn stop(&self) {
        self.discarded.store(true, Ordering::Relaxed);
        if let Some(sink) = self.sink.lock().unwrap().take() {
            sink.stop();
        }
    }
}
