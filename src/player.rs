//! Playback state machine.
//!
//! IDLE → LOADING → PLAYING → (PAUSED | IDLE | ERROR)
//!
//! One session per loaded article. All session mutation happens on the
//! controller's loop: user commands and background events are multiplexed
//! with `tokio::select!`, and spawned work only reports back through the
//! event channel, tagged with the `(index, epoch)` it was started for. Bumping
//! the epoch is what cancels work: a result whose epoch no longer matches
//! the session's is discarded on arrival, so a stale synthesis can never
//! overwrite the state of whatever the user navigated to.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::{AudioHandle, AudioOutput};
use crate::engine::{AudioClip, SpeakerRegistry, SynthesisError, Synthesizer};
use crate::segmenter::SentenceUnit;
use crate::status::{StatusKind, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Loading => write!(f, "LOADING"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Identity of one unit of in-flight work. The epoch decides liveness;
/// the index is carried for logging and the completion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTag {
    pub index: usize,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
    Select(usize),
    SetVoice(u32),
    Quit,
}

#[derive(Debug)]
pub enum PlayerEvent {
    SynthesisReady { tag: PlaybackTag, clip: AudioClip },
    SynthesisFailed { tag: PlaybackTag, error: SynthesisError },
    PlaybackEnded { tag: PlaybackTag },
    PlaybackFailed { tag: PlaybackTag, message: String },
    AdvanceDue { epoch: u64 },
}

/// Everything mutable about the current article. Replaced wholesale when
/// new content is loaded, never patched across loads.
pub struct PlaybackSession {
    units: Vec<SentenceUnit>,
    sentences: Vec<SentenceUnit>,
    current: usize,
    state: PlaybackState,
    epoch: u64,
    handle: Option<Box<dyn AudioHandle>>,
}

impl PlaybackSession {
    pub fn new(units: Vec<SentenceUnit>) -> Self {
        let sentences = units
            .iter()
            .filter(|u| !u.is_paragraph_break)
            .cloned()
            .collect();
        Self {
            units,
            sentences,
            current: 0,
            state: PlaybackState::Idle,
            epoch: 0,
            handle: None,
        }
    }

    /// Full unit list, paragraph breaks included, for rendering.
    pub fn units(&self) -> &[SentenceUnit] {
        &self.units
    }

    /// Playable sentence count; breaks are not counted.
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

pub struct PlaybackController<S: Synthesizer, A: AudioOutput> {
    session: PlaybackSession,
    synth: Arc<S>,
    audio: A,
    voices: Arc<SpeakerRegistry>,
    status: StatusReporter,
    advance_delay: Duration,
    events_tx: mpsc::Sender<PlayerEvent>,
}

impl<S: Synthesizer, A: AudioOutput> PlaybackController<S, A> {
    pub fn new(
        session: PlaybackSession,
        synth: Arc<S>,
        audio: A,
        voices: Arc<SpeakerRegistry>,
        status: StatusReporter,
        advance_delay: Duration,
    ) -> (Self, mpsc::Receiver<PlayerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(32);
        let controller = Self {
            session,
            synth,
            audio,
            voices,
            status,
            advance_delay,
            events_tx,
        };
        (controller, events_rx)
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state
    }

    pub fn current_index(&self) -> usize {
        self.session.current
    }

    pub fn has_active_audio(&self) -> bool {
        self.session.handle.is_some()
    }

    /// Run until a Quit command or the command source goes away.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<PlayerCommand>,
        mut events: mpsc::Receiver<PlayerEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(PlayerCommand::Quit) | None => {
                            self.cancel_active();
                            info!("Player stopped");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
    }

    /// Apply one user command. All transitions funnel through here and
    /// `handle_event`; nothing else touches the session.
    pub fn handle_command(&mut self, cmd: PlayerCommand) {
        debug!("Command {cmd:?} in state {}", self.session.state);
        match cmd {
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Toggle => match self.session.state {
                PlaybackState::Playing => self.pause(),
                _ => self.play(),
            },
            PlayerCommand::Next => self.navigate(self.session.current.checked_add(1)),
            PlayerCommand::Previous => self.navigate(self.session.current.checked_sub(1)),
            PlayerCommand::Select(index) => self.navigate(Some(index)),
            PlayerCommand::SetVoice(id) => self.set_voice(id),
            PlayerCommand::Quit => {}
        }
    }

    /// Apply one background event, discarding anything stale.
    pub fn handle_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::SynthesisReady { tag, clip } => self.on_synthesis_ready(tag, clip),
            PlayerEvent::SynthesisFailed { tag, error } => self.on_synthesis_failed(tag, error),
            PlayerEvent::PlaybackEnded { tag } => self.on_playback_ended(tag),
            PlayerEvent::PlaybackFailed { tag, message } => self.on_playback_failed(tag, message),
            PlayerEvent::AdvanceDue { epoch } => self.on_advance_due(epoch),
        }
    }

    fn play(&mut self) {
        if self.session.is_empty() {
            self.status.update(StatusKind::Error, "No sentences loaded");
            return;
        }
        match self.session.state {
            PlaybackState::Playing | PlaybackState::Loading => {}
            PlaybackState::Paused if self.session.handle.is_some() => {
                if let Some(handle) = &self.session.handle {
                    handle.resume();
                }
                self.session.state = PlaybackState::Playing;
                self.status.update(StatusKind::Success, "Resumed");
            }
            _ => self.begin_load(),
        }
    }

    fn pause(&mut self) {
        // Pausing while idle or already paused is a no-op.
        if self.session.state != PlaybackState::Playing {
            return;
        }
        if let Some(handle) = &self.session.handle {
            handle.pause();
        }
        self.session.state = PlaybackState::Paused;
        self.status.update(StatusKind::Info, "Paused");
    }

    /// Move to `target` if it is a valid index; out-of-bounds requests are
    /// ignored without touching the session. Any in-flight work for the
    /// old index is cancelled and never resumed.
    fn navigate(&mut self, target: Option<usize>) {
        let Some(target) = target else { return };
        if target >= self.session.len() {
            debug!("Ignoring navigation to {target} (have {})", self.session.len());
            return;
        }

        let resume = matches!(
            self.session.state,
            PlaybackState::Playing | PlaybackState::Loading
        );
        self.cancel_active();
        self.session.current = target;

        if resume {
            self.begin_load();
        } else {
            self.session.state = PlaybackState::Idle;
            self.status.update(
                StatusKind::Info,
                &format!("Sentence {}/{}", target + 1, self.session.len()),
            );
        }
    }

    fn set_voice(&mut self, id: u32) {
        if self.voices.set_current(id) {
            // Takes effect from the next synthesis request.
            let label = match self.voices.display_name(id) {
                Some(name) => format!("Voice set to {name} ({id})"),
                None => format!("Voice set to {id}"),
            };
            self.status.update(StatusKind::Info, &label);
        } else {
            self.status
                .update(StatusKind::Error, &format!("Unknown voice id: {id}"));
        }
    }

    /// Invalidate every piece of in-flight work and stop active audio.
    fn cancel_active(&mut self) {
        self.session.epoch += 1;
        if let Some(handle) = self.session.handle.take() {
            handle.stop();
        }
    }

    /// Start synthesizing the current sentence from a clean slate.
    fn begin_load(&mut self) {
        self.cancel_active();
        let index = self.session.current;
        let tag = PlaybackTag {
            index,
            epoch: self.session.epoch,
        };
        let text = self.session.sentences[index].text.clone();

        self.session.state = PlaybackState::Loading;
        self.status.update(
            StatusKind::Loading,
            &format!("Synthesizing sentence {}/{}", index + 1, self.session.len()),
        );

        // The voice id is read now; switching later never affects a
        // request already in flight.
        let speaker = self.voices.current_voice_id();
        let synth = self.synth.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match synth.synthesize(&text, speaker).await {
                Ok(clip) => PlayerEvent::SynthesisReady { tag, clip },
                Err(error) => PlayerEvent::SynthesisFailed { tag, error },
            };
            let _ = tx.send(event).await;
        });
    }

    fn is_stale(&self, epoch: u64) -> bool {
        if epoch != self.session.epoch {
            debug!(
                "Discarding stale result (epoch {epoch} != {})",
                self.session.epoch
            );
            return true;
        }
        false
    }

    fn on_synthesis_ready(&mut self, tag: PlaybackTag, clip: AudioClip) {
        if self.is_stale(tag.epoch) {
            return;
        }
        match self.audio.start(clip, tag, self.events_tx.clone()) {
            Ok(handle) => {
                self.session.handle = Some(handle);
                self.session.state = PlaybackState::Playing;
                let text = self.session.sentences[tag.index].text.clone();
                self.status.progress(tag.index + 1, self.session.len(), &text);
            }
            Err(e) => {
                self.session.state = PlaybackState::Error;
                self.status
                    .update(StatusKind::Error, &format!("Audio playback failed: {e}"));
            }
        }
    }

    fn on_synthesis_failed(&mut self, tag: PlaybackTag, error: SynthesisError) {
        if self.is_stale(tag.epoch) {
            return;
        }
        self.session.state = PlaybackState::Error;
        self.session.handle = None;
        self.status.update(
            StatusKind::Error,
            &format!("Speech synthesis failed: {error}"),
        );
    }

    fn on_playback_ended(&mut self, tag: PlaybackTag) {
        // Paused can see this too: the sink drained just before the pause
        // took effect. The ended handle is useless either way.
        let was_playing = self.session.state == PlaybackState::Playing;
        if self.is_stale(tag.epoch)
            || !matches!(
                self.session.state,
                PlaybackState::Playing | PlaybackState::Paused
            )
        {
            return;
        }
        self.session.handle = None;
        self.session.state = PlaybackState::Idle;

        if !was_playing {
            return;
        }
        if self.session.current + 1 < self.session.len() {
            // Natural completion: the next sentence follows after a beat.
            let epoch = self.session.epoch;
            let delay = self.advance_delay;
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(PlayerEvent::AdvanceDue { epoch }).await;
            });
        } else {
            self.status.update(StatusKind::Success, "End of article");
        }
    }

    fn on_playback_failed(&mut self, tag: PlaybackTag, message: String) {
        if self.is_stale(tag.epoch) {
            return;
        }
        self.session.handle = None;
        self.session.state = PlaybackState::Error;
        self.status
            .update(StatusKind::Error, &format!("Audio playback error: {message}"));
    }

    fn on_advance_due(&mut self, epoch: u64) {
        if self.is_stale(epoch) || self.session.state != PlaybackState::Idle {
            return;
        }
        self.session.current += 1;
        self.begin_load();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PlaybackDeviceError;
    use crate::segmenter::segment;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockSynth {
        fail: bool,
    }

    #[async_trait]
    impl Synthesizer for MockSynth {
        async fn synthesize(&self, text: &str, _speaker: u32) -> Result<AudioClip, SynthesisError> {
            if self.fail {
                Err(SynthesisError::Network("engine offline".into()))
            } else {
                Ok(AudioClip {
                    bytes: text.as_bytes().to_vec(),
                    mime: "audio/wav".into(),
                })
            }
        }
    }

    struct MockAudio {
        started: Arc<Mutex<Vec<PlaybackTag>>>,
        stops: Arc<AtomicU32>,
    }

    struct MockHandle {
        stops: Arc<AtomicU32>,
    }

    impl AudioOutput for MockAudio {
        fn start(
            &self,
            _clip: AudioClip,
            tag: PlaybackTag,
            _events: mpsc::Sender<PlayerEvent>,
        ) -> Result<Box<dyn AudioHandle>, PlaybackDeviceError> {
            self.started.lock().unwrap().push(tag);
            Ok(Box::new(MockHandle {
                stops: self.stops.clone(),
            }))
        }
    }

    impl AudioHandle for MockHandle {
        fn pause(&self) {}
        fn resume(&self) {}
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        controller: PlaybackController<MockSynth, MockAudio>,
        events: mpsc::Receiver<PlayerEvent>,
        started: Arc<Mutex<Vec<PlaybackTag>>>,
        stops: Arc<AtomicU32>,
    }

    fn harness(fail: bool) -> Harness {
        let units = segment("一つ目です。二つ目です。三つ目です。");
        let session = PlaybackSession::new(units);
        let started = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(AtomicU32::new(0));
        let audio = MockAudio {
            started: started.clone(),
            stops: stops.clone(),
        };
        let (controller, events) = PlaybackController::new(
            session,
            Arc::new(MockSynth { fail }),
            audio,
            Arc::new(SpeakerRegistry::with_voices(Vec::new(), 3)),
            StatusReporter::new(false),
            Duration::from_millis(10),
        );
        Harness {
            controller,
            events,
            started,
            stops,
        }
    }

    impl Harness {
        /// Pump the next background event into the controller.
        async fn pump(&mut self) {
            let event = self.events.recv().await.expect("event channel closed");
            self.controller.handle_event(event);
        }

        async fn play_until_playing(&mut self) {
            self.controller.handle_command(PlayerCommand::Play);
            self.pump().await;
            assert_eq!(self.controller.state(), PlaybackState::Playing);
        }

        fn last_started(&self) -> PlaybackTag {
            *self.started.lock().unwrap().last().expect("nothing started")
        }
    }

    #[tokio::test]
    async fn play_synthesizes_then_plays() {
        let mut h = harness(false);

        h.controller.handle_command(PlayerCommand::Play);
        assert_eq!(h.controller.state(), PlaybackState::Loading);
        assert!(!h.controller.has_active_audio());

        h.pump().await;
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        assert!(h.controller.has_active_audio());
        assert_eq!(h.started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pause_suspends_and_play_resumes_without_resynthesis() {
        let mut h = harness(false);
        h.play_until_playing().await;

        h.controller.handle_command(PlayerCommand::Pause);
        assert_eq!(h.controller.state(), PlaybackState::Paused);
        assert!(h.controller.has_active_audio());

        h.controller.handle_command(PlayerCommand::Play);
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        // Still the original handle, so no second synthesis happened.
        assert_eq!(h.started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pause_while_idle_is_a_no_op() {
        let mut h = harness(false);
        h.controller.handle_command(PlayerCommand::Pause);
        assert_eq!(h.controller.state(), PlaybackState::Idle);
        assert!(!h.controller.has_active_audio());
    }

    #[tokio::test]
    async fn next_at_the_last_sentence_changes_nothing() {
        let mut h = harness(false);
        h.controller.handle_command(PlayerCommand::Select(2));
        assert_eq!(h.controller.current_index(), 2);

        h.controller.handle_command(PlayerCommand::Next);
        assert_eq!(h.controller.current_index(), 2);
        assert_eq!(h.controller.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn previous_at_the_first_sentence_changes_nothing() {
        let mut h = harness(false);
        h.controller.handle_command(PlayerCommand::Previous);
        assert_eq!(h.controller.current_index(), 0);
        assert_eq!(h.controller.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn select_out_of_bounds_is_ignored() {
        let mut h = harness(false);
        h.controller.handle_command(PlayerCommand::Select(10));
        assert_eq!(h.controller.current_index(), 0);
        assert_eq!(h.controller.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn navigating_while_playing_starts_the_new_sentence() {
        let mut h = harness(false);
        h.play_until_playing().await;

        h.controller.handle_command(PlayerCommand::Next);
        assert_eq!(h.controller.current_index(), 1);
        assert_eq!(h.controller.state(), PlaybackState::Loading);
        // The old handle was stopped, not kept for later.
        assert_eq!(h.stops.load(Ordering::SeqCst), 1);

        h.pump().await;
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        assert_eq!(h.last_started().index, 1);
    }

    #[tokio::test]
    async fn navigating_while_paused_lands_idle_and_discards_the_handle() {
        let mut h = harness(false);
        h.play_until_playing().await;
        h.controller.handle_command(PlayerCommand::Pause);

        h.controller.handle_command(PlayerCommand::Next);
        assert_eq!(h.controller.current_index(), 1);
        assert_eq!(h.controller.state(), PlaybackState::Idle);
        assert!(!h.controller.has_active_audio());
        assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_synthesis_never_overrides_the_new_index() {
        let mut h = harness(false);
        h.controller.handle_command(PlayerCommand::Play);
        // Navigate away while the synthesis for index 0 is in flight.
        h.controller.handle_command(PlayerCommand::Next);

        // Both results eventually arrive, in whatever order.
        h.pump().await;
        h.pump().await;

        assert_eq!(h.controller.current_index(), 1);
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        let started = h.started.lock().unwrap();
        assert_eq!(started.len(), 1, "stale clip must not start audio");
        assert_eq!(started[0].index, 1);
    }

    #[tokio::test]
    async fn synthesis_failure_enters_error_and_keeps_the_index() {
        let mut h = harness(true);
        h.controller.handle_command(PlayerCommand::Play);
        h.pump().await;

        assert_eq!(h.controller.state(), PlaybackState::Error);
        assert_eq!(h.controller.current_index(), 0);
        assert!(!h.controller.has_active_audio());

        // The session stays usable: play retries the same sentence.
        h.controller.handle_command(PlayerCommand::Play);
        assert_eq!(h.controller.state(), PlaybackState::Loading);
    }

    #[tokio::test]
    async fn device_failure_enters_error_without_moving() {
        let mut h = harness(false);
        h.play_until_playing().await;
        let tag = h.last_started();

        h.controller.handle_event(PlayerEvent::PlaybackFailed {
            tag,
            message: "decode error".into(),
        });
        assert_eq!(h.controller.state(), PlaybackState::Error);
        assert_eq!(h.controller.current_index(), 0);
    }

    #[tokio::test]
    async fn auto_advance_plays_the_next_sentence_after_the_delay() {
        let mut h = harness(false);
        h.play_until_playing().await;
        let tag = h.last_started();

        h.controller.handle_event(PlayerEvent::PlaybackEnded { tag });
        assert_eq!(h.controller.state(), PlaybackState::Idle);

        // The scheduled advance fires and moves playback forward.
        h.pump().await;
        assert_eq!(h.controller.current_index(), 1);
        assert_eq!(h.controller.state(), PlaybackState::Loading);
        h.pump().await;
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        assert_eq!(h.last_started().index, 1);
    }

    #[tokio::test]
    async fn completing_the_last_sentence_ends_in_idle() {
        let mut h = harness(false);
        h.controller.handle_command(PlayerCommand::Select(2));
        h.play_until_playing().await;
        let tag = h.last_started();

        h.controller.handle_event(PlayerEvent::PlaybackEnded { tag });
        assert_eq!(h.controller.state(), PlaybackState::Idle);
        assert_eq!(h.controller.current_index(), 2);

        // No advance is scheduled past the end.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn navigation_cancels_a_pending_auto_advance() {
        let mut h = harness(false);
        h.play_until_playing().await;
        let tag = h.last_started();
        h.controller.handle_event(PlayerEvent::PlaybackEnded { tag });

        // User jumps elsewhere before the advance fires.
        h.controller.handle_command(PlayerCommand::Select(2));
        h.pump().await;

        // The stale AdvanceDue was discarded; we are where the user put us.
        assert_eq!(h.controller.current_index(), 2);
        assert_eq!(h.controller.state(), PlaybackState::Idle);
    }
}
