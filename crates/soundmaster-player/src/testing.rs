//! In-memory playback engine for tests.  Records every call so tests can
//! assert on session lifecycles; events are injected by the tests themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{
    EngineError, PlaybackEngine, PlaybackSession, SessionEvents, SessionId, SessionRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    Create {
        id: SessionId,
        url: String,
        bitrate_kbps: u32,
        volume: f32,
    },
    Play(SessionId),
    Pause(SessionId),
    Volume(SessionId, f32),
    Unload(SessionId),
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct FakeLog {
    calls: Arc<Mutex<Vec<FakeCall>>>,
}

impl FakeLog {
    fn push(&self, call: FakeCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_ids(&self) -> Vec<SessionId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                FakeCall::Create { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn created_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                FakeCall::Create { url, .. } => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn last_created(&self) -> Option<SessionId> {
        self.created_ids().last().copied()
    }

    pub fn last_create(&self) -> Option<FakeCall> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| matches!(c, FakeCall::Create { .. }))
    }

    pub fn last_volume(&self, id: SessionId) -> Option<f32> {
        self.calls().into_iter().rev().find_map(|c| match c {
            FakeCall::Volume(v_id, v) if v_id == id => Some(v),
            _ => None,
        })
    }

    pub fn count(&self, call: &FakeCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

pub struct FakeEngine {
    log: FakeLog,
    fail_creates: Arc<AtomicBool>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            log: FakeLog::default(),
            fail_creates: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn log(&self) -> FakeLog {
        self.log.clone()
    }

    /// Shared switch that makes `create_session` fail while set.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        self.fail_creates.clone()
    }
}

impl PlaybackEngine for FakeEngine {
    type Session = FakeSession;

    fn create_session(
        &mut self,
        request: SessionRequest,
        events: SessionEvents,
    ) -> Result<FakeSession, EngineError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("fake engine offline".to_string()));
        }
        self.log.push(FakeCall::Create {
            id: events.id(),
            url: request.url,
            bitrate_kbps: request.bitrate_kbps,
            volume: request.volume,
        });
        Ok(FakeSession {
            id: events.id(),
            log: self.log.clone(),
        })
    }

    fn shutdown(&mut self) {
        self.log.push(FakeCall::Shutdown);
    }
}

pub struct FakeSession {
    id: SessionId,
    log: FakeLog,
}

impl PlaybackSession for FakeSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn play(&mut self) {
        self.log.push(FakeCall::Play(self.id));
    }

    fn pause(&mut self) {
        self.log.push(FakeCall::Pause(self.id));
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.push(FakeCall::Volume(self.id, volume));
    }

    fn unload(&mut self) {
        self.log.push(FakeCall::Unload(self.id));
    }
}
