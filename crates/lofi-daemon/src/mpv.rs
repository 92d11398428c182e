/// mpv IPC driver and the `MediaHandle` built on top of it.
///
/// Architecture:
///
/// ```text
///   MpvMedia (owned by the controller, sync calls)
///         │ MediaCommand via unbounded mpsc, in call order
///         ▼
///   sequencer task ── owns MpvDriver, (re)spawns mpv lazily
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event                     → sequencer → MpvOutput
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use futures_util::FutureExt;
use lofi_proto::protocol::MediaHealth;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::media::{MediaEvent, MediaHandle, PlayFuture, PlayRejection};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Process liveness check period.
const HEARTBEAT: Duration = Duration::from_secs(10);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Map to the handle's own signals.  `file-loaded` means the stream is
    /// buffered enough to start; an `end-file` that was not requested is a
    /// fault.
    pub fn to_media_event(&self) -> Option<MediaEvent> {
        match self.event_name()? {
            "file-loaded" => Some(MediaEvent::CanPlay),
            "end-file" => {
                let reason = self.raw.get("reason")?.as_str()?;
                if !matches!(reason, "error" | "network") {
                    return None;
                }
                let detail = self
                    .raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or(reason);
                Some(MediaEvent::Error(format!("stream ended: {}", detail)))
            }
            _ => None,
        }
    }
}

/// What the mpv side reports back to the daemon core.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvOutput {
    Media(MediaEvent),
    Health(MediaHealth),
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
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

        tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    /// `vol` in `0.0..=1.0`; mpv takes percent.
    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "mute", muted])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: lofi_proto::platform::mpv_socket_name(),
            process: None,
            last_volume: 0.7,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        info!("mpv: spawning new process");
        let mpv_binary = lofi_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg(lofi_proto::platform::mpv_socket_arg())
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
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        // Wait for socket to appear
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
        self.kill().await;
        self.spawn_process()?;

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
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

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
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
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
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    // Never wait on the sequencer here: it may itself be
                    // waiting for a reply this task has yet to read.
                    match event_tx.try_send(MpvEvent { raw: val }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(evt)) => {
                            warn!("mpv reader: event queue full, dropping {:?}", evt.event_name());
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {}
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── MediaHandle over mpv ──────────────────────────────────────────────────────

enum MediaCommand {
    Load { url: String },
    Pause,
    Play {
        load_gen: u64,
        reply: oneshot::Sender<Result<(), PlayRejection>>,
    },
    Volume(f32),
    Muted(bool),
    Release,
}

/// The controller's media handle: one mpv process re-pointed between
/// streams.  Calls never block; they are queued to a sequencer task that
/// talks to mpv in call order.
pub struct MpvMedia {
    source: Option<String>,
    cmd_tx: mpsc::UnboundedSender<MediaCommand>,
    /// Bumped on every `load`; a play issued before the latest load is stale.
    load_gen: Arc<AtomicU64>,
}

impl MpvMedia {
    pub fn spawn(initial_volume: f32, output_tx: mpsc::UnboundedSender<MpvOutput>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let load_gen = Arc::new(AtomicU64::new(0));
        let mut driver = MpvDriver::new();
        driver.last_volume = initial_volume;
        let (event_tx, event_rx) = mpsc::channel(64);
        let sequencer = Sequencer {
            driver,
            handle: None,
            event_tx,
            output_tx,
            load_gen: load_gen.clone(),
            url: None,
            volume: initial_volume,
            muted: false,
            needs_reload: false,
        };
        tokio::spawn(sequencer.run(cmd_rx, event_rx));
        Self {
            source: None,
            cmd_tx,
            load_gen,
        }
    }

    fn queue(&self, cmd: MediaCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("mpv: sequencer gone, command dropped");
        }
    }
}

impl MediaHandle for MpvMedia {
    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn load(&mut self) {
        let Some(url) = self.source.clone() else {
            debug!("mpv: load with no source, ignored");
            return;
        };
        self.load_gen.fetch_add(1, Ordering::SeqCst);
        self.queue(MediaCommand::Load { url });
    }

    fn pause(&mut self) {
        self.queue(MediaCommand::Pause);
    }

    fn play(&mut self) -> PlayFuture {
        let (reply, rx) = oneshot::channel();
        let load_gen = self.load_gen.load(Ordering::SeqCst);
        if self.cmd_tx.send(MediaCommand::Play { load_gen, reply }).is_err() {
            return async { Err::<(), _>(PlayRejection::Other("mpv sequencer gone".to_string())) }.boxed();
        }
        async move {
            rx.await
                .unwrap_or_else(|_| Err(PlayRejection::Other("mpv sequencer gone".to_string())))
        }
        .boxed()
    }

    fn set_volume(&mut self, level: f32) {
        self.queue(MediaCommand::Volume(level));
    }

    fn set_muted(&mut self, muted: bool) {
        self.queue(MediaCommand::Muted(muted));
    }

    fn release(&mut self) {
        self.queue(MediaCommand::Release);
    }
}

/// Owns the driver and applies queued commands one at a time.
struct Sequencer {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    event_tx: mpsc::Sender<MpvEvent>,
    output_tx: mpsc::UnboundedSender<MpvOutput>,
    load_gen: Arc<AtomicU64>,
    /// Last loaded stream; replayed into a respawned process.
    url: Option<String>,
    volume: f32,
    muted: bool,
    /// mpv went idle after a stream fault; the next play reloads first.
    needs_reload: bool,
}

impl Sequencer {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<MediaCommand>,
        mut event_rx: mpsc::Receiver<MpvEvent>,
    ) {
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT, HEARTBEAT);
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(MediaCommand::Release) | None => break,
                    Some(cmd) => self.apply(cmd).await,
                },
                Some(evt) = event_rx.recv() => self.on_mpv_event(evt),
                _ = heartbeat.tick() => self.check_liveness(),
            }
        }
        self.shutdown().await;
    }

    async fn apply(&mut self, cmd: MediaCommand) {
        match cmd {
            MediaCommand::Load { url } => {
                self.needs_reload = false;
                let handle = self.connected().await;
                self.url = Some(url.clone());
                let Some(handle) = handle else {
                    self.emit(MpvOutput::Media(MediaEvent::Error(
                        "mpv is not available".to_string(),
                    )));
                    return;
                };
                let _ = handle.set_pause(true).await;
                if let Err(e) = handle.load_stream(&url).await {
                    warn!("mpv: loadfile {} failed: {}", url, e);
                    self.emit(MpvOutput::Media(MediaEvent::Error(e.to_string())));
                }
            }
            MediaCommand::Pause => {
                if let Some(handle) = self.handle.clone() {
                    if let Err(e) = handle.set_pause(true).await {
                        warn!("mpv: pause failed: {}", e);
                    }
                }
            }
            MediaCommand::Play { load_gen, reply } => {
                let result = self.play(load_gen).await;
                let _ = reply.send(result);
            }
            MediaCommand::Volume(level) => {
                self.volume = level;
                self.driver.last_volume = level;
                if let Some(handle) = self.handle.clone() {
                    if let Err(e) = handle.set_volume(level).await {
                        warn!("mpv: set volume failed: {}", e);
                    }
                }
            }
            MediaCommand::Muted(muted) => {
                self.muted = muted;
                if let Some(handle) = self.handle.clone() {
                    if let Err(e) = handle.set_mute(muted).await {
                        warn!("mpv: set mute failed: {}", e);
                    }
                }
            }
            MediaCommand::Release => {}
        }
    }

    async fn play(&mut self, load_gen: u64) -> Result<(), PlayRejection> {
        if self.load_gen.load(Ordering::SeqCst) != load_gen {
            debug!("mpv: play for load gen {} superseded", load_gen);
            return Err(PlayRejection::Aborted);
        }
        let handle = self
            .connected()
            .await
            .ok_or_else(|| PlayRejection::Other("mpv is not available".to_string()))?;
        if self.needs_reload {
            if let Some(url) = self.url.clone() {
                info!("mpv: reloading {} after stream fault", url);
                handle
                    .load_stream(&url)
                    .await
                    .map_err(|e| PlayRejection::Other(e.to_string()))?;
            }
            self.needs_reload = false;
        }
        handle
            .set_pause(false)
            .await
            .map_err(|e| PlayRejection::Other(e.to_string()))
    }

    /// Current IPC handle, spawning mpv if it is not running.
    async fn connected(&mut self) -> Option<MpvHandle> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process died, dropping handle");
            self.handle = None;
        }
        if let Some(handle) = &self.handle {
            return Some(handle.clone());
        }

        self.emit(MpvOutput::Health(MediaHealth::Starting));
        let handle = match self.driver.spawn_and_connect(self.event_tx.clone()).await {
            Ok(h) => h,
            Err(e) => {
                warn!("mpv: failed to start: {}", e);
                self.emit(MpvOutput::Health(MediaHealth::Dead));
                return None;
            }
        };
        self.emit(MpvOutput::Health(MediaHealth::Running));

        let _ = handle.set_volume(self.volume).await;
        let _ = handle.set_mute(self.muted).await;
        // A respawned process starts empty; point it back at the last stream.
        if let Some(url) = &self.url {
            let _ = handle.load_stream(url).await;
        }
        self.handle = Some(handle.clone());
        Some(handle)
    }

    fn on_mpv_event(&mut self, evt: MpvEvent) {
        if let Some(media_event) = evt.to_media_event() {
            if matches!(media_event, MediaEvent::Error(_)) {
                self.needs_reload = true;
            }
            self.emit(MpvOutput::Media(media_event));
        }
    }

    fn check_liveness(&mut self) {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: heartbeat: process died");
            self.handle = None;
            self.emit(MpvOutput::Health(MediaHealth::Dead));
            self.emit(MpvOutput::Media(MediaEvent::Error(
                "mpv process exited".to_string(),
            )));
        }
    }

    fn emit(&self, output: MpvOutput) {
        let _ = self.output_tx.send(output);
    }

    async fn shutdown(&mut self) {
        info!("mpv: releasing");
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
        self.emit(MpvOutput::Health(MediaHealth::Absent));
    }
}
