//! Stream controller: the one place that owns playback state.
//!
//! Commands, session events and timer expiries all arrive on a single
//! unbounded channel and are handled one at a time by `handle_event`, so no
//! two of them ever interleave.  State changes are published through the
//! status reporter's `watch` channel; toasts go out on the broadcast channel.

use std::time::Duration;

use soundmaster_proto::config::Config;
use soundmaster_proto::protocol::{
    Broadcast, Command, ConnectionState, NotificationKind, PlaybackStatus,
    PlayerState, QualitySetting, QualityTier, Severity, SourceRole, StreamMetadata, StreamSource,
};
use soundmaster_proto::state::Preferences;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{PlaybackAdapter, SessionPhase, SessionSignal};
use crate::backoff::{BackoffPolicy, ErrorClassifier, FailureAction, FailureKind, PlaybackError};
use crate::engine::{EngineError, EngineEvent, PlaybackEngine, SessionId};
use crate::notify::Notifier;
use crate::quality::select_quality;
use crate::rotator::{FallbackRotator, Rotation, RotatorError};
use crate::status::StatusReporter;
use crate::timers::{TimerKind, Timers};

/// Everything that can happen to the controller.
#[derive(Debug)]
pub enum ControllerEvent {
    Command(Command),
    Session { id: SessionId, event: EngineEvent },
    Timer { kind: TimerKind, generation: u64 },
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Sources(#[from] RotatorError),
    #[error("stream controller has shut down")]
    Closed,
}

/// Construction parameters, usually derived from `Config`.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub sources: Vec<StreamSource>,
    pub policy: BackoffPolicy,
    pub debounce: Duration,
    pub restore_primary_after: Duration,
    pub play_timeout: Duration,
    pub init_window: Duration,
    pub volume: f32,
    pub muted: bool,
    pub quality: QualityTier,
    pub station_title: String,
}

impl ControllerOptions {
    pub fn from_config(config: &Config, sources: Vec<StreamSource>) -> Self {
        Self {
            sources,
            policy: BackoffPolicy::from_config(&config.retry),
            debounce: config.rotation.debounce(),
            restore_primary_after: config.rotation.restore_primary_after(),
            play_timeout: config.watchdog.play_timeout(),
            init_window: config.watchdog.init_window(),
            volume: config.player.default_volume,
            muted: false,
            quality: config.player.default_quality,
            station_title: config.player.station_title.clone(),
        }
    }

    /// Saved listener preferences win over config defaults.
    pub fn with_preferences(mut self, prefs: Option<Preferences>) -> Self {
        if let Some(prefs) = prefs {
            self.volume = prefs.volume;
            self.muted = prefs.muted;
            self.quality = prefs.quality;
        }
        self
    }
}

pub struct StreamController<E: PlaybackEngine> {
    adapter: PlaybackAdapter<E>,
    classifier: ErrorClassifier,
    rotator: FallbackRotator,
    status: StatusReporter,
    notifier: Notifier,
    timers: Timers,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
    broadcast_tx: broadcast::Sender<Broadcast>,

    current_url: String,
    source_role: SourceRole,
    quality: QualitySetting,
    /// The listener asked for audio; retries and rotations resume playback.
    intend_playing: bool,
    /// Grace period after an explicit switch: failures are retried as usual
    /// but not surfaced as toasts.
    initializing: bool,
    station_title: String,

    restore_primary_after: Duration,
    play_timeout: Duration,
    init_window: Duration,
}

impl<E: PlaybackEngine> StreamController<E> {
    pub fn new(
        engine: E,
        options: ControllerOptions,
        broadcast_tx: broadcast::Sender<Broadcast>,
        event_tx: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Result<Self, ControllerError> {
        let rotator = FallbackRotator::new(options.sources, options.debounce)?;
        let quality = select_quality(options.quality);
        let adapter = PlaybackAdapter::new(engine, event_tx.clone(), options.volume, options.muted);
        let current_url = rotator.desired_url().to_string();

        let status = StatusReporter::new(PlayerState {
            rev: 0,
            status: PlaybackStatus::Idle,
            is_playing: false,
            is_buffering: false,
            volume: adapter.volume(),
            is_muted: adapter.is_muted(),
            current_url: current_url.clone(),
            source_role: SourceRole::Primary,
            fallback_index: None,
            quality: quality.clone(),
            metadata: StreamMetadata {
                title: Some(options.station_title.clone()),
                artist: None,
                connection: ConnectionState::Disconnected,
            },
            is_initializing: false,
            consecutive_failures: 0,
        });

        Ok(Self {
            adapter,
            classifier: ErrorClassifier::new(options.policy),
            rotator,
            status,
            notifier: Notifier::new(broadcast_tx.clone()),
            timers: Timers::new(event_tx.clone()),
            event_tx,
            broadcast_tx,
            current_url,
            source_role: SourceRole::Primary,
            quality,
            intend_playing: false,
            initializing: false,
            station_title: options.station_title,
            restore_primary_after: options.restore_primary_after,
            play_timeout: options.play_timeout,
            init_window: options.init_window,
        })
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.event_tx.clone(),
            state: self.status.subscribe(),
            broadcast_tx: self.broadcast_tx.clone(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.status.snapshot()
    }

    pub fn adapter(&self) -> &PlaybackAdapter<E> {
        &self.adapter
    }

    /// Main event loop.  Returns after a `Shutdown` event, having released
    /// the live session and every pending timer.
    pub async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<ControllerEvent>) {
        info!("StreamController: starting on {}", self.current_url);
        self.mount();

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt) {
                break;
            }
        }

        self.unmount();
        info!("StreamController: stopped");
    }

    /// Open a session for the initial source without starting it.
    pub fn mount(&mut self) {
        self.reload();
        self.publish();
    }

    pub fn unmount(&mut self) {
        self.timers.cancel_all();
        self.adapter.shutdown();
        self.intend_playing = false;
        self.status.set_status(PlaybackStatus::Idle);
        self.status.set_connection(ConnectionState::Disconnected);
    }

    /// Process one event.  Returns false when the loop should stop.
    pub fn handle_event(&mut self, evt: ControllerEvent) -> bool {
        match evt {
            ControllerEvent::Shutdown => {
                info!("StreamController: shutdown requested");
                return false;
            }
            ControllerEvent::Command(cmd) => {
                debug!("StreamController: {:?}", cmd);
                self.handle_command(cmd);
            }
            ControllerEvent::Session { id, event } => self.handle_session_event(id, event),
            ControllerEvent::Timer { kind, generation } => {
                if self.timers.take_fired(kind, generation) {
                    self.handle_timer(kind);
                } else {
                    debug!("StreamController: stale {:?}#{} ignored", kind, generation);
                }
            }
        }
        self.publish();
        true
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::TogglePlayback => {
                if matches!(
                    self.status.current_status(),
                    PlaybackStatus::Playing | PlaybackStatus::Buffering
                ) {
                    self.pause();
                } else {
                    self.play();
                }
            }
            Command::SetVolume { value } => {
                self.adapter.set_volume(value);
            }
            Command::ToggleMute => {
                self.adapter.toggle_mute();
            }
            Command::ChangeQuality { tier } => self.change_quality(tier),
            Command::SwitchToStream { url } => self.switch_to_stream(url),
            Command::RetryStreams => self.retry_streams(),
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn play(&mut self) {
        self.intend_playing = true;
        // the listener's attempt supersedes any scheduled one
        self.timers.cancel(TimerKind::Retry);
        self.begin_play();
    }

    fn pause(&mut self) {
        self.intend_playing = false;
        self.timers.cancel(TimerKind::Watchdog);
        // a pending retry would resume audio behind the listener's back
        if self.timers.cancel(TimerKind::Retry) {
            debug!("StreamController: pending retry dropped by pause");
        }
        if !self.adapter.pause() {
            self.status.set_status(PlaybackStatus::Idle);
        }
    }

    fn change_quality(&mut self, tier: QualityTier) {
        let setting = select_quality(tier);
        if setting == self.quality {
            return;
        }
        self.notifier.info(
            NotificationKind::QualityChanged,
            "Quality changed",
            format!("Streaming at {} kbps ({})", setting.bitrate_kbps, tier),
        );
        self.quality = setting;
        if self.adapter.current_session().is_some() {
            self.reload();
        }
    }

    fn switch_to_stream(&mut self, url: String) {
        let url = url.trim().to_string();
        if url.is_empty() {
            warn!("StreamController: ignoring switch to empty url");
            return;
        }
        self.timers.cancel(TimerKind::Retry);
        self.timers.cancel(TimerKind::Watchdog);
        self.timers.cancel(TimerKind::RestorePrimary);
        self.classifier.reset();

        self.source_role = self.role_of(&url);
        self.current_url = url;
        self.initializing = true;
        self.timers.arm(TimerKind::InitWindow, self.init_window);

        self.notifier.info(
            NotificationKind::StreamSwitched,
            "Switching stream",
            self.current_url.clone(),
        );
        self.reload();
    }

    fn retry_streams(&mut self) {
        self.timers.cancel(TimerKind::Retry);
        self.timers.cancel(TimerKind::Watchdog);
        self.classifier.reset();

        let rotation = self.rotator.advance_manual(Instant::now());
        self.apply_rotation(&rotation);
        let target = self.describe_source();
        self.notifier.info(
            NotificationKind::ManualRetry,
            "Retrying stream",
            format!("Connecting to {}", target),
        );
        self.intend_playing = true;
        self.reload();
    }

    // ── session lifecycle ─────────────────────────────────────────────────────

    /// Replace the session with a fresh one for the current URL and quality,
    /// starting it if the listener wants audio.
    fn reload(&mut self) {
        self.timers.cancel(TimerKind::Retry);
        self.timers.cancel(TimerKind::Watchdog);
        if let Err(e) = self.adapter.load(&self.current_url, &self.quality) {
            self.on_construction_error(e);
            return;
        }
        if self.intend_playing {
            self.begin_play();
        } else {
            self.status.set_status(PlaybackStatus::Idle);
            self.status.set_connection(ConnectionState::Disconnected);
        }
    }

    fn begin_play(&mut self) {
        match self.adapter.play(&self.current_url, &self.quality) {
            Ok(id) => {
                if self.adapter.phase() != SessionPhase::Playing {
                    debug!("StreamController: waiting for {} to start", id);
                    self.status.set_status(PlaybackStatus::Buffering);
                    self.timers.arm(TimerKind::Watchdog, self.play_timeout);
                }
            }
            Err(e) => self.on_construction_error(e),
        }
    }

    fn on_construction_error(&mut self, e: EngineError) {
        warn!("StreamController: cannot open {}: {}", self.current_url, e);
        if self.intend_playing {
            self.on_failure(PlaybackError::new(FailureKind::Construction, e.to_string()));
        } else {
            self.status.set_status(PlaybackStatus::Error);
        }
    }

    fn handle_session_event(&mut self, id: SessionId, event: EngineEvent) {
        let Some(signal) = self.adapter.on_event(id, event) else {
            return;
        };
        match signal {
            SessionSignal::Connected => {
                self.status.set_connection(ConnectionState::Connected);
            }
            SessionSignal::Playing => {
                self.timers.cancel(TimerKind::Watchdog);
                self.timers.cancel(TimerKind::Retry);
                self.classifier.on_playing();
                self.intend_playing = true;
                self.status.set_status(PlaybackStatus::Playing);
                self.status.set_connection(ConnectionState::Playing);
                info!("StreamController: playing {}", self.current_url);
            }
            SessionSignal::Paused => {
                self.timers.cancel(TimerKind::Watchdog);
                self.status.set_status(PlaybackStatus::Paused);
                self.status.set_connection(ConnectionState::Paused);
            }
            SessionSignal::Stalled => {
                self.status.set_status(PlaybackStatus::Buffering);
            }
            SessionSignal::Ended => {
                self.timers.cancel(TimerKind::Watchdog);
                self.intend_playing = false;
                self.status.set_status(PlaybackStatus::Idle);
                self.status.set_connection(ConnectionState::Disconnected);
            }
            SessionSignal::Metadata(title) => {
                let mut metadata = self.status.snapshot().metadata;
                metadata.title = title.or_else(|| Some(self.station_title.clone()));
                self.status.update_metadata(metadata);
            }
            SessionSignal::Failed(error) => self.on_failure(error),
        }
    }

    fn on_failure(&mut self, error: PlaybackError) {
        self.timers.cancel(TimerKind::Watchdog);
        if !self.intend_playing {
            // a parked session failing is not worth a toast; the next play
            // builds a fresh one
            debug!("StreamController: idle session failed: {}", error);
            self.status.set_status(PlaybackStatus::Idle);
            return;
        }
        let decision = self.classifier.on_failure(&error);
        let max_retries = self.classifier.policy().max_retries;
        let source = self.describe_source();

        match decision.action {
            FailureAction::RetrySameSource => {
                self.status.set_status(PlaybackStatus::Buffering);
                self.timers.arm(TimerKind::Retry, decision.delay);
                self.notify_unless_initializing(
                    NotificationKind::RetryScheduled,
                    Severity::Warning,
                    "Connection issue",
                    format!(
                        "Retrying in {:.1}s (attempt {}/{})",
                        decision.delay.as_secs_f32(),
                        decision.attempt, max_retries
                    ),
                );
            }
            FailureAction::Escalate => {
                self.status.set_status(PlaybackStatus::Error);
                self.notify_unless_initializing(
                    NotificationKind::RetryExhausted,
                    Severity::Error,
                    "Stream unavailable",
                    format!(
                        "{} failed after {} retries: {}",
                        source, decision.attempt, error.message
                    ),
                );
                match self.rotator.advance(Instant::now()) {
                    Some(rotation) => {
                        self.apply_rotation(&rotation);
                        if rotation.wrapped {
                            self.notifier.info(
                                NotificationKind::RestoringPrimary,
                                "Back to main stream",
                                "All fallbacks failed, trying the main stream again",
                            );
                        } else {
                            let next = self.describe_source();
                            self.notifier.warning(
                                NotificationKind::SwitchingToFallback,
                                "Switching to backup stream",
                                format!("Now trying {}", next),
                            );
                        }
                        self.reload();
                    }
                    None => {
                        // debounced: keep hammering the current candidate
                        let delay = self.classifier.policy().delay(0);
                        self.timers.arm(TimerKind::Retry, delay);
                    }
                }
            }
        }
    }

    // ── timers ────────────────────────────────────────────────────────────────

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Retry => {
                info!("StreamController: retrying {}", self.current_url);
                self.reload();
            }
            TimerKind::Watchdog => {
                warn!(
                    "StreamController: no playback from {} within {:?}",
                    self.current_url, self.play_timeout
                );
                self.adapter.dispose();
                self.intend_playing = false;
                self.status.set_status(PlaybackStatus::Idle);
                self.status.set_connection(ConnectionState::Disconnected);
                let source = self.describe_source();
                self.notifier.warning(
                    NotificationKind::ConnectionTimeout,
                    "Connection timed out",
                    format!("{} did not start playing", source),
                );
            }
            TimerKind::RestorePrimary => {
                let url = self.rotator.restore_primary();
                self.classifier.reset();
                let was_elsewhere = self.current_url != url;
                self.current_url = url;
                self.source_role = SourceRole::Primary;
                if was_elsewhere {
                    self.notifier.success(
                        NotificationKind::RestoringPrimary,
                        "Back to main stream",
                        "Switched back from the backup stream",
                    );
                    self.reload();
                }
            }
            TimerKind::InitWindow => {
                self.initializing = false;
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn apply_rotation(&mut self, rotation: &Rotation) {
        self.current_url = rotation.url.clone();
        self.source_role = self.rotator.current_source().role;
        if self.rotator.is_on_fallback() {
            self.timers
                .arm(TimerKind::RestorePrimary, self.restore_primary_after);
        } else {
            self.timers.cancel(TimerKind::RestorePrimary);
        }
    }

    fn role_of(&self, url: &str) -> SourceRole {
        if url == self.rotator.primary_url() {
            SourceRole::Primary
        } else if url == self.rotator.desired_url() {
            self.rotator.current_source().role
        } else {
            SourceRole::Custom
        }
    }

    fn describe_source(&self) -> String {
        match self.source_role {
            SourceRole::Primary => "main stream".to_string(),
            SourceRole::Fallback(i) => {
                format!("backup stream {}/{}", i + 1, self.rotator.fallback_count())
            }
            SourceRole::Custom => self.current_url.clone(),
        }
    }

    fn notify_unless_initializing(
        &mut self,
        kind: NotificationKind,
        severity: Severity,
        title: &str,
        description: String,
    ) {
        if self.initializing {
            debug!(
                "StreamController: suppressed during switch: {} - {}",
                title, description
            );
            return;
        }
        self.notifier.push(kind, severity, title, description);
    }

    /// Sync controller-owned fields into the published state.
    fn publish(&self) {
        let volume = self.adapter.volume();
        let muted = self.adapter.is_muted();
        let fallback_index = match self.source_role {
            SourceRole::Fallback(i) => Some(i),
            _ => None,
        };
        let failures = self.classifier.state().consecutive_failures;
        self.status.update(|state| {
            state.volume = volume;
            state.is_muted = muted;
            state.current_url.clone_from(&self.current_url);
            state.source_role = self.source_role;
            state.fallback_index = fallback_index;
            state.quality.clone_from(&self.quality);
            state.is_initializing = self.initializing;
            state.consecutive_failures = failures;
        });
    }
}

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerEvent>,
    state: watch::Receiver<PlayerState>,
    broadcast_tx: broadcast::Sender<Broadcast>,
}

impl ControllerHandle {
    pub fn send(&self, cmd: Command) -> Result<(), ControllerError> {
        self.tx
            .send(ControllerEvent::Command(cmd))
            .map_err(|_| ControllerError::Closed)
    }

    pub fn play(&self) -> Result<(), ControllerError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), ControllerError> {
        self.send(Command::Pause)
    }

    pub fn toggle_playback(&self) -> Result<(), ControllerError> {
        self.send(Command::TogglePlayback)
    }

    pub fn set_volume(&self, value: f32) -> Result<(), ControllerError> {
        self.send(Command::SetVolume { value })
    }

    pub fn toggle_mute(&self) -> Result<(), ControllerError> {
        self.send(Command::ToggleMute)
    }

    pub fn change_quality(&self, tier: QualityTier) -> Result<(), ControllerError> {
        self.send(Command::ChangeQuality { tier })
    }

    pub fn switch_to_stream(&self, url: impl Into<String>) -> Result<(), ControllerError> {
        self.send(Command::SwitchToStream { url: url.into() })
    }

    pub fn retry_streams(&self) -> Result<(), ControllerError> {
        self.send(Command::RetryStreams)
    }

    pub fn state(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state.clone()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Broadcast> {
        self.broadcast_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ControllerEvent::Shutdown);
    }
}
