//! mpv-backed playback engine.
//!
//! Architecture:
//!
//! ```text
//!   MpvEngine ──EngineOp──▶ MpvWorker (one task, ops handled in order)
//!                              │
//!                              ├── MpvDriver::spawn_and_connect()
//!                              │       ├── writer_task  ← MpvHandle requests → socket
//!                              │       └── reader_task  → responses / MpvEvent
//!                              │
//!                              └── SessionTracker: mpv events → EngineEvent
//!                                                   → SessionEvents sink
//! ```
//!
//! mpv is a single player, so only one session is live at a time.  Each open
//! starts paused; `play` unpauses.  A heartbeat notices a dead process and
//! fails the live session so the controller's retry logic takes over.
//!
//! Platform notes:
//! - Unix:   Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use soundmaster_proto::platform;

use crate::engine::{
    EngineError, EngineEvent, PlaybackEngine, PlaybackSession, SessionEvents, SessionId,
    SessionRequest,
};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const HEARTBEAT: Duration = Duration::from_secs(10);
const IPC_TIMEOUT: Duration = Duration::from_secs(5);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_ICY_TITLE: u64 = 3;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── IPC handle ────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Load `request.url` without starting playback.
    pub async fn open_paused(&self, request: &SessionRequest) -> anyhow::Result<()> {
        self.set_pause(true).await?;
        self.set_volume(request.volume).await?;
        if !request.format.is_empty() {
            if let Err(e) = self
                .send(json!(["set_property", "demuxer-lavf-format", request.format]))
                .await
            {
                debug!("mpv: format hint {} rejected: {}", request.format, e);
            }
        }
        self.send(json!(["loadfile", request.url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl Default for MpvDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            last_volume: 0.8,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self) -> anyhow::Result<()> {
        self.kill().await;

        info!("mpv: spawning new process");
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process().await?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process().await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel; writer inserts, reader resolves
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error");
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Turns mpv's global event stream into events for one session.
///
/// Everything before the session's own `start-file` belongs to the previous
/// file and is ignored, as is everything after its `end-file`.
#[derive(Debug)]
pub struct SessionTracker {
    started: bool,
    finished: bool,
    loaded: bool,
    paused: bool,
    playing: bool,
    title: Option<String>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            started: false,
            finished: false,
            loaded: false,
            // sessions open paused
            paused: true,
            playing: false,
            title: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Record an unpause we issued ourselves.  mpv may report `pause=false`
    /// before this file's `start-file`, where it is discarded.
    pub fn mark_unpaused(&mut self) {
        self.paused = false;
    }

    pub fn translate(&mut self, evt: &MpvEvent) -> Option<EngineEvent> {
        if self.finished {
            return None;
        }
        if let Some((obs, data)) = evt.as_property_change() {
            if !self.started {
                return None;
            }
            return match obs {
                OBS_PAUSE => self.on_pause(data.as_bool().unwrap_or(false)),
                OBS_CORE_IDLE => self.on_core_idle(data.as_bool()?),
                OBS_ICY_TITLE => {
                    let title = data
                        .as_str()
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string);
                    if title == self.title {
                        return None;
                    }
                    self.title = title.clone();
                    Some(EngineEvent::Metadata { title })
                }
                _ => None,
            };
        }

        match evt.event_name()? {
            "start-file" => {
                self.started = true;
                None
            }
            "file-loaded" if self.started => {
                self.loaded = true;
                Some(EngineEvent::Load)
            }
            "end-file" if self.started => self.on_end_file(&evt.raw),
            _ => None,
        }
    }

    fn on_pause(&mut self, paused: bool) -> Option<EngineEvent> {
        if paused == self.paused {
            return None;
        }
        self.paused = paused;
        if paused && self.loaded {
            self.playing = false;
            return Some(EngineEvent::Pause);
        }
        None
    }

    fn on_core_idle(&mut self, idle: bool) -> Option<EngineEvent> {
        if self.paused {
            return None;
        }
        match (idle, self.playing) {
            (false, false) => {
                self.playing = true;
                Some(EngineEvent::Play)
            }
            (true, true) => {
                self.playing = false;
                Some(EngineEvent::Stalled)
            }
            _ => None,
        }
    }

    fn on_end_file(&mut self, raw: &Value) -> Option<EngineEvent> {
        let reason = raw.get("reason").and_then(Value::as_str).unwrap_or("unknown");
        match reason {
            "redirect" => return None,
            "eof" | "error" | "quit" => {}
            // a superseded file stopping before ours has loaded
            _ if !self.loaded => return None,
            _ => {}
        }
        self.finished = true;
        self.playing = false;
        match reason {
            "eof" => Some(EngineEvent::End),
            "error" => {
                let detail = raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                if self.loaded {
                    Some(EngineEvent::PlayError(detail))
                } else {
                    Some(EngineEvent::LoadError(detail))
                }
            }
            "quit" => Some(EngineEvent::PlayError("mpv quit".to_string())),
            _ => None,
        }
    }
}

// ── engine ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum EngineOp {
    Open {
        request: SessionRequest,
        events: SessionEvents,
    },
    Play(SessionId),
    Pause(SessionId),
    Volume(SessionId, f32),
    Unload(SessionId),
    Shutdown,
}

/// `PlaybackEngine` backed by a single mpv process.
pub struct MpvEngine {
    ops: mpsc::UnboundedSender<EngineOp>,
}

impl MpvEngine {
    /// Start the worker task.  mpv itself is spawned lazily on first open.
    pub fn spawn() -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(MpvWorker::new().run(rx));
        Self { ops }
    }
}

impl PlaybackEngine for MpvEngine {
    type Session = MpvSession;

    fn create_session(
        &mut self,
        request: SessionRequest,
        events: SessionEvents,
    ) -> Result<MpvSession, EngineError> {
        let id = events.id();
        self.ops
            .send(EngineOp::Open { request, events })
            .map_err(|_| EngineError::Unavailable("mpv worker stopped".to_string()))?;
        Ok(MpvSession {
            id,
            ops: self.ops.clone(),
        })
    }

    fn shutdown(&mut self) {
        let _ = self.ops.send(EngineOp::Shutdown);
    }
}

pub struct MpvSession {
    id: SessionId,
    ops: mpsc::UnboundedSender<EngineOp>,
}

impl MpvSession {
    fn submit(&self, op: EngineOp) {
        if self.ops.send(op).is_err() {
            debug!("mpv: worker gone, dropping op for {}", self.id);
        }
    }
}

impl PlaybackSession for MpvSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn play(&mut self) {
        self.submit(EngineOp::Play(self.id));
    }

    fn pause(&mut self) {
        self.submit(EngineOp::Pause(self.id));
    }

    fn set_volume(&mut self, volume: f32) {
        self.submit(EngineOp::Volume(self.id, volume));
    }

    fn unload(&mut self) {
        self.submit(EngineOp::Unload(self.id));
    }
}

struct ActiveSession {
    tracker: SessionTracker,
    events: SessionEvents,
}

struct MpvWorker {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    mpv_events: Option<mpsc::Receiver<MpvEvent>>,
    active: Option<ActiveSession>,
}

async fn next_event(rx: &mut Option<mpsc::Receiver<MpvEvent>>) -> Option<MpvEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl MpvWorker {
    fn new() -> Self {
        Self {
            driver: MpvDriver::new(),
            handle: None,
            mpv_events: None,
            active: None,
        }
    }

    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<EngineOp>) {
        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                op = ops.recv() => match op {
                    None | Some(EngineOp::Shutdown) => break,
                    Some(op) => self.handle_op(op).await,
                },
                evt = next_event(&mut self.mpv_events) => match evt {
                    Some(evt) => self.forward(&evt),
                    None => self.connection_lost("mpv IPC connection closed"),
                },
                _ = heartbeat.tick() => {
                    if self.handle.is_some() && !self.driver.process_alive() {
                        self.connection_lost("mpv process exited");
                    }
                }
            }
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
        info!("mpv: engine stopped");
    }

    fn is_active(&self, id: SessionId) -> bool {
        self.active.as_ref().is_some_and(|a| a.events.id() == id)
    }

    async fn ensure_connected(&mut self, volume: f32) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process gone, respawning");
            self.handle = None;
            self.mpv_events = None;
        }
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        self.driver.last_volume = volume;
        let (event_tx, event_rx) = mpsc::channel(64);
        let handle = self.driver.spawn_and_connect(event_tx).await?;
        handle.observe_properties().await;
        self.handle = Some(handle.clone());
        self.mpv_events = Some(event_rx);
        Ok(handle)
    }

    async fn handle_op(&mut self, op: EngineOp) {
        match op {
            EngineOp::Open { request, events } => {
                let handle = match self.ensure_connected(request.volume).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("mpv: cannot start: {}", e);
                        events.emit(EngineEvent::LoadError(format!("mpv unavailable: {}", e)));
                        return;
                    }
                };
                info!("mpv: opening {} for {}", request.url, events.id());
                self.active = Some(ActiveSession {
                    tracker: SessionTracker::new(),
                    events,
                });
                if let Err(e) = handle.open_paused(&request).await {
                    warn!("mpv: loadfile {} failed: {}", request.url, e);
                    if let Some(active) = self.active.take() {
                        active.events.emit(EngineEvent::LoadError(e.to_string()));
                    }
                }
            }
            EngineOp::Play(id) => {
                if !self.is_active(id) {
                    return;
                }
                if let Some(handle) = self.handle.clone() {
                    match handle.set_pause(false).await {
                        Ok(()) => {
                            if let Some(active) = self.active.as_mut() {
                                active.tracker.mark_unpaused();
                            }
                        }
                        Err(e) => self.fail_active(format!("unpause failed: {}", e)),
                    }
                }
            }
            EngineOp::Pause(id) => {
                if !self.is_active(id) {
                    return;
                }
                let Some(handle) = self.handle.clone() else {
                    return;
                };
                if let Err(e) = handle.set_pause(true).await {
                    warn!("mpv: pause failed: {}", e);
                    return;
                }
                // mpv only reports pause for a loaded file
                if let Some(active) = self.active.as_mut() {
                    if !active.tracker.is_loaded() {
                        active.events.emit(EngineEvent::Pause);
                    }
                }
            }
            EngineOp::Volume(id, volume) => {
                if !self.is_active(id) {
                    return;
                }
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.set_volume(volume).await {
                        warn!("mpv: set volume failed: {}", e);
                    }
                }
            }
            EngineOp::Unload(id) => {
                if !self.is_active(id) {
                    return;
                }
                self.active = None;
                if let Some(handle) = &self.handle {
                    if let Err(e) = handle.stop().await {
                        debug!("mpv: stop failed: {}", e);
                    }
                }
                debug!("mpv: {} unloaded", id);
            }
            EngineOp::Shutdown => {}
        }
    }

    fn forward(&mut self, evt: &MpvEvent) {
        if let Some(active) = self.active.as_mut() {
            if let Some(event) = active.tracker.translate(evt) {
                debug!("mpv: {} → {:?}", active.events.id(), event);
                active.events.emit(event);
            }
        }
    }

    fn fail_active(&mut self, reason: String) {
        if let Some(active) = self.active.take() {
            let event = if active.tracker.is_loaded() {
                EngineEvent::PlayError(reason)
            } else {
                EngineEvent::LoadError(reason)
            };
            active.events.emit(event);
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        warn!("mpv: {}", reason);
        self.handle = None;
        self.mpv_events = None;
        self.fail_active(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    fn prop(id: u64, data: Value) -> MpvEvent {
        event(json!({ "event": "property-change", "id": id, "data": data }))
    }

    fn feed(tracker: &mut SessionTracker, events: Vec<MpvEvent>) -> Vec<EngineEvent> {
        events.iter().filter_map(|e| tracker.translate(e)).collect()
    }

    #[test]
    fn happy_path() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "start-file"})),
                event(json!({"event": "file-loaded"})),
                prop(OBS_PAUSE, json!(false)),
                prop(OBS_CORE_IDLE, json!(false)),
                prop(OBS_ICY_TITLE, json!("Artist - Track")),
                prop(OBS_ICY_TITLE, json!("Artist - Track")),
                prop(OBS_CORE_IDLE, json!(true)),
                prop(OBS_CORE_IDLE, json!(false)),
                event(json!({"event": "end-file", "reason": "eof"})),
            ],
        );
        assert_eq!(
            out,
            vec![
                EngineEvent::Load,
                EngineEvent::Play,
                EngineEvent::Metadata {
                    title: Some("Artist - Track".to_string())
                },
                EngineEvent::Stalled,
                EngineEvent::Play,
                EngineEvent::End,
            ]
        );
    }

    #[test]
    fn previous_file_events_are_ignored() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "end-file", "reason": "stop"})),
                prop(OBS_CORE_IDLE, json!(true)),
                prop(OBS_PAUSE, json!(true)),
                event(json!({"event": "start-file"})),
            ],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn error_before_load_is_a_load_error() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "start-file"})),
                event(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"})),
                event(json!({"event": "file-loaded"})),
            ],
        );
        assert_eq!(out, vec![EngineEvent::LoadError("loading failed".to_string())]);
    }

    #[test]
    fn pause_after_load_is_reported() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "start-file"})),
                event(json!({"event": "file-loaded"})),
                prop(OBS_PAUSE, json!(false)),
                prop(OBS_CORE_IDLE, json!(false)),
                prop(OBS_PAUSE, json!(true)),
                // paused: core-idle flips are not stalls
                prop(OBS_CORE_IDLE, json!(true)),
            ],
        );
        assert_eq!(
            out,
            vec![EngineEvent::Load, EngineEvent::Play, EngineEvent::Pause]
        );
    }

    #[test]
    fn redirect_keeps_session_alive() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "start-file"})),
                event(json!({"event": "end-file", "reason": "redirect"})),
                event(json!({"event": "start-file"})),
                event(json!({"event": "file-loaded"})),
            ],
        );
        assert_eq!(out, vec![EngineEvent::Load]);
    }

    #[test]
    fn early_unpause_still_reports_play() {
        let mut tracker = SessionTracker::new();
        tracker.mark_unpaused();
        let out = feed(
            &mut tracker,
            vec![
                // arrives ahead of start-file and is dropped
                prop(OBS_PAUSE, json!(false)),
                event(json!({"event": "start-file"})),
                event(json!({"event": "file-loaded"})),
                prop(OBS_CORE_IDLE, json!(false)),
            ],
        );
        assert_eq!(out, vec![EngineEvent::Load, EngineEvent::Play]);
    }

    #[test]
    fn stale_stop_before_load_keeps_session_alive() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "start-file"})),
                event(json!({"event": "end-file", "reason": "stop"})),
                event(json!({"event": "start-file"})),
                event(json!({"event": "file-loaded"})),
                prop(OBS_PAUSE, json!(false)),
                prop(OBS_CORE_IDLE, json!(false)),
            ],
        );
        assert_eq!(out, vec![EngineEvent::Load, EngineEvent::Play]);
    }

    #[test]
    fn stop_after_load_ends_tracking() {
        let mut tracker = SessionTracker::new();
        let out = feed(
            &mut tracker,
            vec![
                event(json!({"event": "start-file"})),
                event(json!({"event": "file-loaded"})),
                event(json!({"event": "end-file", "reason": "stop"})),
                prop(OBS_PAUSE, json!(false)),
                prop(OBS_CORE_IDLE, json!(false)),
            ],
        );
        assert_eq!(out, vec![EngineEvent::Load]);
    }

    #[test]
    fn property_change_parsing() {
        let evt = prop(OBS_PAUSE, json!(true));
        assert_eq!(evt.as_property_change(), Some((OBS_PAUSE, &json!(true))));
        assert_eq!(event(json!({"event": "idle"})).as_property_change(), None);
    }
}
