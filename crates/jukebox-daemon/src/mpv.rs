/// mpv as the jukebox audio output.
///
/// ```text
///   MpvOutput (AudioOutput, sync)
///         │  OutputCommand via unbounded mpsc, strictly ordered
///         ▼
///   command_task ── owns MpvDriver + MpvHandle, (re)spawns mpv on demand
///         │
///         ├── writer_task   ← MpvRequest → IPC socket
///         └── reader_task   ← JSON lines from the socket
///                                ├── response (request_id) → oneshot reply
///                                └── event → map_event → DaemonEvent::Output
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use jukebox_core::output::{AudioOutput, OutputEvent};

use crate::core::DaemonEvent;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Reported when mpv could not open or decode a source.
pub const LOAD_FAILED_CODE: i32 = 4;
/// Reported when mpv itself is unavailable.
pub const OUTPUT_UNAVAILABLE_CODE: i32 = 5;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv event (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// e.g. "end-file", "start-file", "playback-restart".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` of an end-file event: "eof", "stop", "quit", "error", "redirect".
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

/// Translate an mpv event into what the controller understands.  Files
/// stopped by a newer `loadfile` are not reported.
pub fn map_event(event: &MpvEvent) -> Option<OutputEvent> {
    match event.event_name()? {
        "end-file" => match event.end_reason()? {
            "eof" => Some(OutputEvent::Ended),
            "error" => Some(OutputEvent::Error {
                code: LOAD_FAILED_CODE,
                message: event
                    .raw
                    .get("file_error")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }),
            _ => None,
        },
        "playback-restart" => Some(OutputEvent::Ready),
        _ => None,
    }
}

// ── IPC handle ───────────────────────────────────────────────────────────────

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

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn execute(&self, command: &OutputCommand) -> anyhow::Result<()> {
        match command {
            OutputCommand::Load(url) => {
                self.send(json!(["loadfile", url, "replace"])).await?;
            }
            OutputCommand::Play => {
                self.send(json!(["set_property", "pause", false])).await?;
            }
            OutputCommand::Pause => {
                self.send(json!(["set_property", "pause", true])).await?;
            }
            OutputCommand::Volume(volume) => {
                let pct = (volume * 100.0).clamp(0.0, 100.0);
                self.send(json!(["set_property", "volume", pct])).await?;
            }
        }
        Ok(())
    }
}

// ── driver ───────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    last_volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: jukebox_proto::platform::mpv_socket_name(),
            process: None,
            last_volume: volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    /// Start a fresh, paused mpv and attach to its IPC endpoint.
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        info!("mpv: spawning new process");
        let mpv_binary = jukebox_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg(jukebox_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Some(handle) = self.try_attach(event_tx.clone()).await {
                return Ok(handle);
            }
        }
        anyhow::bail!("mpv IPC endpoint did not appear")
    }

    #[cfg(unix)]
    async fn try_attach(&self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let stream = tokio::net::UnixStream::connect(&self.socket_name).await.ok()?;
        info!("mpv: connected to IPC socket");
        Some(start_io_tasks(stream, event_tx))
    }

    #[cfg(windows)]
    async fn try_attach(&self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        use tokio::net::windows::named_pipe::ClientOptions;
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        let pipe = ClientOptions::new().open(&pipe_path).ok()?;
        info!("mpv: connected to named pipe");
        Some(start_io_tasks(pipe, event_tx))
    }
}

fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
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

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: AsyncRead + Unpin,
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
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
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

// ── AudioOutput ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum OutputCommand {
    Load(String),
    Play,
    Pause,
    Volume(f32),
}

/// Controller-facing side of mpv.  Commands are queued and executed in order
/// by a background task; failures come back as [`DaemonEvent::Output`].
pub struct MpvOutput {
    tx: mpsc::UnboundedSender<OutputCommand>,
}

impl MpvOutput {
    pub fn start(driver: MpvDriver, daemon_tx: mpsc::Sender<DaemonEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(command_task(driver, rx, daemon_tx));
        Self { tx }
    }

    fn push(&self, command: OutputCommand) {
        if self.tx.send(command).is_err() {
            warn!("mpv: command queue closed");
        }
    }
}

impl AudioOutput for MpvOutput {
    fn load(&mut self, url: &str) {
        self.push(OutputCommand::Load(url.to_string()));
    }

    fn play(&mut self) {
        self.push(OutputCommand::Play);
    }

    fn pause(&mut self) {
        self.push(OutputCommand::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.push(OutputCommand::Volume(volume));
    }
}

async fn command_task(
    mut driver: MpvDriver,
    mut rx: mpsc::UnboundedReceiver<OutputCommand>,
    daemon_tx: mpsc::Sender<DaemonEvent>,
) {
    let mut handle: Option<MpvHandle> = None;

    while let Some(command) = rx.recv().await {
        if let OutputCommand::Volume(v) = command {
            driver.last_volume = v;
        }
        if handle.is_none() || !driver.process_alive() {
            // Pausing or changing volume of a dead mpv needs no new process.
            if matches!(command, OutputCommand::Pause | OutputCommand::Volume(_)) {
                continue;
            }
            handle = connect(&mut driver, &daemon_tx).await;
        }
        let Some(h) = handle.as_ref() else {
            report_failure(&daemon_tx, &command, OUTPUT_UNAVAILABLE_CODE, "mpv unavailable").await;
            continue;
        };
        if let Err(e) = h.execute(&command).await {
            warn!("mpv: {:?} failed: {}", command, e);
            if !driver.process_alive() {
                handle = None;
            }
            report_failure(&daemon_tx, &command, LOAD_FAILED_CODE, &e.to_string()).await;
        }
    }

    debug!("mpv: output dropped, stopping mpv");
    driver.kill().await;
}

async fn connect(driver: &mut MpvDriver, daemon_tx: &mpsc::Sender<DaemonEvent>) -> Option<MpvHandle> {
    let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
    match driver.spawn_and_connect(event_tx).await {
        Ok(handle) => {
            tokio::spawn(forward_events(event_rx, daemon_tx.clone()));
            Some(handle)
        }
        Err(e) => {
            warn!("mpv: failed to start: {}", e);
            None
        }
    }
}

async fn forward_events(mut rx: mpsc::Receiver<MpvEvent>, daemon_tx: mpsc::Sender<DaemonEvent>) {
    while let Some(event) = rx.recv().await {
        if let Some(output_event) = map_event(&event) {
            if daemon_tx.send(DaemonEvent::Output(output_event)).await.is_err() {
                break;
            }
        }
    }
}

async fn report_failure(
    daemon_tx: &mpsc::Sender<DaemonEvent>,
    command: &OutputCommand,
    code: i32,
    message: &str,
) {
    let event = match command {
        OutputCommand::Play => OutputEvent::PlayRejected {
            reason: message.to_string(),
        },
        OutputCommand::Load(_) => OutputEvent::Error {
            code,
            message: Some(message.to_string()),
        },
        OutputCommand::Pause | OutputCommand::Volume(_) => return,
    };
    let _ = daemon_tx.send(DaemonEvent::Output(event)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_end_of_file_maps_to_ended() {
        let e = event(json!({"event": "end-file", "reason": "eof", "playlist_entry_id": 1}));
        assert_eq!(map_event(&e), Some(OutputEvent::Ended));
    }

    #[test]
    fn test_load_error_maps_to_error() {
        let e = event(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"}));
        assert_eq!(
            map_event(&e),
            Some(OutputEvent::Error {
                code: LOAD_FAILED_CODE,
                message: Some("loading failed".to_string()),
            })
        );
    }

    #[test]
    fn test_replaced_file_is_not_reported() {
        let e = event(json!({"event": "end-file", "reason": "stop"}));
        assert_eq!(map_event(&e), None);
    }

    #[test]
    fn test_playback_restart_maps_to_ready() {
        let e = event(json!({"event": "playback-restart"}));
        assert_eq!(map_event(&e), Some(OutputEvent::Ready));
        assert_eq!(map_event(&event(json!({"event": "start-file"}))), None);
    }

    #[tokio::test]
    async fn test_handle_round_trips_over_ipc() {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(client, event_tx);

        // Fake mpv: answer every request and emit one event.
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let reply = json!({"request_id": req["request_id"], "error": "success", "data": null});
                let out = format!("{}\n{}\n", reply, json!({"event": "playback-restart"}));
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        handle.execute(&OutputCommand::Play).await.unwrap();
        let e = event_rx.recv().await.unwrap();
        assert_eq!(map_event(&e), Some(OutputEvent::Ready));
    }
}
