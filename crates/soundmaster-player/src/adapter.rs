//! Playback adapter: owns at most one live session and translates its raw
//! engine events into controller signals.
//!
//! Invariant: before a new session is constructed the previous one has been
//! unloaded exactly once, and events carrying a stale session id are dropped.

use soundmaster_proto::protocol::QualitySetting;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backoff::{FailureKind, PlaybackError};
use crate::controller::ControllerEvent;
use crate::engine::{
    validate_url, EngineError, EngineEvent, PlaybackEngine, PlaybackSession, SessionEvents,
    SessionId, SessionRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unloaded,
    Loading,
    Playing,
    Paused,
    Buffering,
    Ended,
    Error,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Error)
    }

    /// Next phase for `event`, or `None` when the event is not valid here
    /// (duplicates, or anything after a terminal phase).
    pub fn on_event(self, event: &EngineEvent) -> Option<SessionPhase> {
        use SessionPhase::*;
        if self.is_terminal() {
            return None;
        }
        match (self, event) {
            (Unloaded | Loading, EngineEvent::Load) => Some(Loading),
            (Unloaded | Loading | Paused | Buffering, EngineEvent::Play) => Some(Playing),
            (Loading | Playing | Buffering, EngineEvent::Pause) => Some(Paused),
            (Playing, EngineEvent::Stalled) => Some(Buffering),
            (Playing | Paused | Buffering, EngineEvent::End) => Some(Ended),
            (_, EngineEvent::LoadError(_) | EngineEvent::PlayError(_)) => Some(Error),
            (phase, EngineEvent::Metadata { .. }) => Some(phase),
            _ => None,
        }
    }
}

/// What the controller learns from a session event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Connected,
    Playing,
    Paused,
    Stalled,
    Ended,
    Failed(PlaybackError),
    Metadata(Option<String>),
}

struct LiveSession<S> {
    session: S,
    url: String,
    phase: SessionPhase,
}

pub struct PlaybackAdapter<E: PlaybackEngine> {
    engine: E,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    live: Option<LiveSession<E::Session>>,
    next_id: u64,
    volume: f32,
    muted: bool,
}

impl<E: PlaybackEngine> PlaybackAdapter<E> {
    pub fn new(
        engine: E,
        events_tx: mpsc::UnboundedSender<ControllerEvent>,
        volume: f32,
        muted: bool,
    ) -> Self {
        Self {
            engine,
            events_tx,
            live: None,
            next_id: 0,
            volume: volume.clamp(0.0, 1.0),
            muted,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Volume actually applied to the engine.
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.live.as_ref().map(|live| live.session.id())
    }

    pub fn phase(&self) -> SessionPhase {
        self.live
            .as_ref()
            .map_or(SessionPhase::Unloaded, |live| live.phase)
    }

    /// Replace the live session with a fresh one for `url`.  The new session
    /// is opened but not started.
    pub fn load(&mut self, url: &str, quality: &QualitySetting) -> Result<SessionId, EngineError> {
        self.dispose();
        validate_url(url)?;

        self.next_id += 1;
        let id = SessionId(self.next_id);
        let request = SessionRequest {
            url: url.to_string(),
            format: quality.format.clone(),
            bitrate_kbps: quality.bitrate_kbps,
            volume: self.effective_volume(),
        };
        let events = SessionEvents::new(id, self.events_tx.clone());
        let session = self.engine.create_session(request, events)?;
        info!(
            "adapter: {} created for {} ({} kbps {})",
            id, url, quality.bitrate_kbps, quality.format
        );
        self.live = Some(LiveSession {
            session,
            url: url.to_string(),
            phase: SessionPhase::Unloaded,
        });
        Ok(id)
    }

    /// Start playback of `url`, constructing a session lazily when there is
    /// none, when it targets another URL, or when it already ended or failed.
    pub fn play(&mut self, url: &str, quality: &QualitySetting) -> Result<SessionId, EngineError> {
        let reusable = self
            .live
            .as_ref()
            .is_some_and(|live| live.url == url && !live.phase.is_terminal());
        if !reusable {
            self.load(url, quality)?;
        }

        let live = self
            .live
            .as_mut()
            .ok_or_else(|| EngineError::Unavailable("no session after load".to_string()))?;
        if live.phase == SessionPhase::Unloaded {
            live.phase = SessionPhase::Loading;
        }
        live.session.play();
        Ok(live.session.id())
    }

    /// Returns false when there was nothing to pause.
    pub fn pause(&mut self) -> bool {
        match self.live.as_mut() {
            Some(live) if !live.phase.is_terminal() && live.phase != SessionPhase::Unloaded => {
                live.session.pause();
                true
            }
            _ => false,
        }
    }

    /// Clamp to [0, 1] and apply; ignored for NaN.  Returns the stored volume.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        if volume.is_nan() {
            debug!("adapter: ignoring NaN volume");
            return self.volume;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.apply_volume();
        self.volume
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.apply_volume();
        self.muted
    }

    fn apply_volume(&mut self) {
        let effective = self.effective_volume();
        if let Some(live) = self.live.as_mut() {
            live.session.set_volume(effective);
        }
    }

    /// Unload the live session, if any.
    pub fn dispose(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.session.unload();
            debug!("adapter: {} unloaded ({:?})", live.session.id(), live.phase);
        }
    }

    pub fn shutdown(&mut self) {
        self.dispose();
        self.engine.shutdown();
    }

    pub fn on_event(&mut self, id: SessionId, event: EngineEvent) -> Option<SessionSignal> {
        let live = match self.live.as_mut() {
            Some(live) if live.session.id() == id => live,
            _ => {
                debug!("adapter: dropping {:?} from stale {}", event, id);
                return None;
            }
        };

        let Some(next) = live.phase.on_event(&event) else {
            debug!("adapter: {} ignoring {:?} in {:?}", id, event, live.phase);
            return None;
        };
        live.phase = next;

        let signal = match event {
            EngineEvent::Load => SessionSignal::Connected,
            EngineEvent::Play => SessionSignal::Playing,
            EngineEvent::Pause => SessionSignal::Paused,
            EngineEvent::Stalled => SessionSignal::Stalled,
            EngineEvent::End => SessionSignal::Ended,
            EngineEvent::LoadError(message) => {
                SessionSignal::Failed(PlaybackError::new(FailureKind::Load, message))
            }
            EngineEvent::PlayError(message) => {
                SessionSignal::Failed(PlaybackError::new(FailureKind::Playback, message))
            }
            EngineEvent::Metadata { title } => SessionSignal::Metadata(title),
        };
        Some(signal)
    }
}

impl<E: PlaybackEngine> Drop for PlaybackAdapter<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::select_quality;
    use crate::testing::{FakeCall, FakeEngine};
    use soundmaster_proto::protocol::QualityTier;

    fn adapter() -> (
        PlaybackAdapter<FakeEngine>,
        mpsc::UnboundedReceiver<ControllerEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PlaybackAdapter::new(FakeEngine::new(), tx, 0.8, false), rx)
    }

    #[test]
    fn phase_transitions() {
        use SessionPhase::*;
        assert_eq!(Loading.on_event(&EngineEvent::Load), Some(Loading));
        assert_eq!(Loading.on_event(&EngineEvent::Play), Some(Playing));
        assert_eq!(Playing.on_event(&EngineEvent::Play), None);
        assert_eq!(Playing.on_event(&EngineEvent::Stalled), Some(Buffering));
        assert_eq!(Buffering.on_event(&EngineEvent::Play), Some(Playing));
        assert_eq!(
            Playing.on_event(&EngineEvent::PlayError("boom".into())),
            Some(Error)
        );
        assert_eq!(Error.on_event(&EngineEvent::Play), None);
        assert_eq!(Ended.on_event(&EngineEvent::LoadError("x".into())), None);
    }

    #[test]
    fn each_session_is_unloaded_once_before_the_next() {
        let (mut adapter, _rx) = adapter();
        let quality = select_quality(QualityTier::Medium);
        let log = adapter.engine().log();

        adapter.play("https://a.test", &quality).unwrap();
        adapter.load("https://b.test", &quality).unwrap();
        adapter.play("https://c.test", &quality).unwrap();
        adapter.dispose();
        adapter.dispose();

        let calls = log.calls();
        let created = log.created_ids();
        assert_eq!(created, vec![SessionId(1), SessionId(2), SessionId(3)]);
        for id in &created {
            let unloads = calls
                .iter()
                .filter(|c| **c == FakeCall::Unload(*id))
                .count();
            assert_eq!(unloads, 1, "{} unloaded {} times", id, unloads);
        }
        // unload of session N precedes creation of N+1
        for pair in created.windows(2) {
            let unload_at = calls
                .iter()
                .position(|c| *c == FakeCall::Unload(pair[0]))
                .unwrap();
            let create_at = calls
                .iter()
                .position(|c| matches!(c, FakeCall::Create { id, .. } if *id == pair[1]))
                .unwrap();
            assert!(unload_at < create_at);
        }
    }

    #[test]
    fn play_reuses_a_healthy_session() {
        let (mut adapter, _rx) = adapter();
        let quality = select_quality(QualityTier::Low);
        let first = adapter.play("https://a.test", &quality).unwrap();
        adapter.pause();
        let second = adapter.play("https://a.test", &quality).unwrap();
        assert_eq!(first, second);

        adapter.on_event(first, EngineEvent::LoadError("gone".into()));
        assert_eq!(adapter.phase(), SessionPhase::Error);
        let third = adapter.play("https://a.test", &quality).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn stale_events_are_dropped() {
        let (mut adapter, _rx) = adapter();
        let quality = select_quality(QualityTier::Medium);
        let old = adapter.play("https://a.test", &quality).unwrap();
        let new = adapter.play("https://b.test", &quality).unwrap();

        assert_eq!(adapter.on_event(old, EngineEvent::Play), None);
        assert_eq!(adapter.phase(), SessionPhase::Loading);
        assert_eq!(
            adapter.on_event(new, EngineEvent::Play),
            Some(SessionSignal::Playing)
        );
    }

    #[test]
    fn errors_are_classified_by_origin() {
        let (mut adapter, _rx) = adapter();
        let quality = select_quality(QualityTier::Medium);
        let id = adapter.play("https://a.test", &quality).unwrap();
        match adapter.on_event(id, EngineEvent::LoadError("404".into())) {
            Some(SessionSignal::Failed(err)) => assert_eq!(err.kind, FailureKind::Load),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mute_remembers_volume() {
        let (mut adapter, _rx) = adapter();
        let quality = select_quality(QualityTier::Medium);
        let id = adapter.play("https://a.test", &quality).unwrap();
        let log = adapter.engine().log();

        assert!(adapter.toggle_mute());
        assert_eq!(log.last_volume(id), Some(0.0));
        adapter.set_volume(0.3);
        // still muted: engine stays silent
        assert_eq!(log.last_volume(id), Some(0.0));
        assert!(!adapter.toggle_mute());
        assert_eq!(adapter.volume(), 0.3);
        assert_eq!(log.last_volume(id), Some(0.3));
    }

    #[test]
    fn volume_is_clamped() {
        let (mut adapter, _rx) = adapter();
        assert_eq!(adapter.set_volume(1.7), 1.0);
        assert_eq!(adapter.set_volume(-0.2), 0.0);
        assert_eq!(adapter.set_volume(f32::NAN), 0.0);
    }

    #[test]
    fn invalid_url_is_rejected_before_construction() {
        let (mut adapter, _rx) = adapter();
        let quality = select_quality(QualityTier::Medium);
        assert!(matches!(
            adapter.play("not a url", &quality),
            Err(EngineError::InvalidUrl(_))
        ));
        assert!(adapter.engine().log().created_ids().is_empty());
    }
}
