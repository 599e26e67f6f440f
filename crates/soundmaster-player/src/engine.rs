//! Seam between the controller and whatever decodes and plays audio.
//!
//! Engine calls never block: `create_session`, `play`, `pause` and friends
//! return immediately and the outcome arrives later as an [`EngineEvent`]
//! posted through the session's [`SessionEvents`] sink.

use std::fmt;

use tokio::sync::mpsc;

use crate::controller::ControllerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Lifecycle events raised by a playback session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Source opened; audio can start.
    Load,
    LoadError(String),
    Play,
    Pause,
    PlayError(String),
    End,
    /// Audio stopped flowing while playback was requested.
    Stalled,
    /// In-band stream title (ICY) changed.
    Metadata { title: Option<String> },
}

/// Everything the engine needs to open one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub url: String,
    pub format: String,
    pub bitrate_kbps: u32,
    /// Effective volume (already zero when muted).
    pub volume: f32,
}

/// Event sink handed to a session at construction.  Every event is tagged
/// with the session id so the controller can drop events from sessions that
/// have since been replaced.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    id: SessionId,
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl SessionEvents {
    pub fn new(id: SessionId, tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns false once the controller is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(ControllerEvent::Session { id: self.id, event })
            .is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("playback engine unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stream url '{0}'")]
    InvalidUrl(String),
}

/// Live handle for one source.  Dropping the handle without `unload` is a
/// leak in engines that hold external resources, so the adapter always
/// unloads explicitly.
pub trait PlaybackSession: Send {
    fn id(&self) -> SessionId;
    fn play(&mut self);
    fn pause(&mut self);
    fn set_volume(&mut self, volume: f32);
    /// Release the underlying network/audio resource.  After this returns no
    /// further events from this session may reach the controller.
    fn unload(&mut self);
}

pub trait PlaybackEngine: Send + 'static {
    type Session: PlaybackSession;

    fn create_session(
        &mut self,
        request: SessionRequest,
        events: SessionEvents,
    ) -> Result<Self::Session, EngineError>;

    /// Tear down engine-wide resources (processes, sockets).
    fn shutdown(&mut self) {}
}

/// Reject URLs no engine could open, before any resource is created.
pub fn validate_url(url: &str) -> Result<(), EngineError> {
    let trimmed = url.trim();
    let has_scheme = ["http://", "https://", "file://"]
        .iter()
        .any(|scheme| trimmed.starts_with(scheme));
    if trimmed.is_empty() || !has_scheme {
        return Err(EngineError::InvalidUrl(url.to_string()));
    }
    Ok(())
}
