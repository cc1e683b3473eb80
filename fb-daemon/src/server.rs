//! Unix Socket Admin Server (Hardened)
//!
//! Line-delimited JSON over a Unix domain socket. Everything an operator
//! can do to the doorbell goes through here; the scan loop itself never
//! takes requests.
//!
//! # Security Features
//! - **Socket permissions**: mode 0660 with symlink refusal on bind
//! - **Peer credentials**: UID/GID/PID audit logging for every request
//! - **Connection limits**: maximum concurrent connections enforced
//! - **Timeouts**: read/write timeouts prevent resource exhaustion
//! - **Message limits**: bounded line reads, oversize rejected mid-stream
//! - **Validation**: request parameters re-checked server-side
//!
//! Sensor-touching operations acquire a maintenance window through the
//! controller's mode handshake and run on the blocking pool, so the
//! reactor thread never waits on the hardware.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use fb_core::constants::timing::MAINTENANCE_WAIT_TIMEOUT;
use fb_core::{
    ControlState, EnrollRequest, FingerprintSensor, MaintenanceGuard, Mode, SettingsStore,
    SharedSensor,
};
use fb_protocol::{
    ControllerMode, DaemonStatus, EventEntry, FingerEntry, Request, RequestEnvelope, Response,
    ResponseData, ResponseEnvelope,
};

// ============================================================================
// Security Constants
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 8;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = fb_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket permissions (0660 = owner and group read/write)
const SOCKET_MODE: u32 = 0o660;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Everything the dispatch needs, shared with the controller loop
#[derive(Clone)]
pub struct ServerContext {
    pub state: Arc<ControlState>,
    pub sensor: SharedSensor,
    pub store: Arc<Mutex<SettingsStore>>,
}

// ============================================================================
// Bounded Reads
// ============================================================================

/// Read one newline-terminated message without ever buffering more than
/// `max_len` bytes, so an oversized line is rejected mid-stream.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            // Consume enough to make forward progress, but don't buffer
            // beyond max_len.
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Run the admin server until shutdown
pub async fn run_server(socket_path: &str, ctx: ServerContext) -> anyhow::Result<()> {
    let path = Path::new(socket_path);

    // Remove an existing socket only if it really is one; refuse symlinks
    if path.exists() {
        let metadata = path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            bail!("Socket path is a symlink - refusing for security");
        }
        std::fs::remove_file(path)?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path, SOCKET_MODE);
    info!(
        "Security: max_conn={}, max_msg={}, read_timeout={:?}",
        MAX_CONNECTIONS, MAX_MESSAGE_SIZE, READ_TIMEOUT
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            handle_client(stream, ctx).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped");

    Ok(())
}

/// Client credentials from the Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerInfo {
    uid: u32,
    gid: u32,
    pid: i32,
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, ctx: ServerContext) {
    let peer = match peer_info(&stream) {
        Some(p) => p,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };

    info!(
        "Client connected: uid={}, gid={}, pid={}",
        peer.uid, peer.gid, peer.pid
    );

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    peer.uid,
                    peer.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, peer.uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request from uid={}: {}", peer.uid, e);
                        let envelope =
                            ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let envelope = process_request(line_str, &peer, &ctx).await;

                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData
                    && e.to_string().contains("Message too large")
                {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, peer.uid, peer.pid
                    );
                    let envelope = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", peer.uid, peer.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", peer.uid, peer.pid);
                let envelope = ResponseEnvelope::new(0, Response::error("Read timeout"));
                let _ = send_response(&mut writer, &envelope).await;
                break;
            }
        }
    }
}

/// Send response with timeout
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let response_json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Get peer credentials (uid, gid, pid) from the Unix socket
fn peer_info(stream: &UnixStream) -> Option<PeerInfo> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    #[cfg(target_os = "linux")]
    {
        // SAFETY: ucred is plain data; zeroing gives a valid initial state.
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: fd is a live socket descriptor and len matches the struct.
        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if result == 0 {
            return Some(PeerInfo {
                uid: cred.uid,
                gid: cred.gid,
                pid: cred.pid,
            });
        }
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "macos"
    ))]
    {
        let mut uid: libc::uid_t = 0;
        let mut gid: libc::gid_t = 0;

        // SAFETY: getpeereid fills uid/gid for a valid socket descriptor.
        let result = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };

        if result == 0 {
            return Some(PeerInfo { uid, gid, pid: 0 });
        }
    }

    None
}

// ============================================================================
// Dispatch
// ============================================================================

/// Process a single request and return the response envelope
async fn process_request(line: &str, peer: &PeerInfo, ctx: &ServerContext) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", peer.uid, e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    // Clients validate before sending; never trust that
    if let Err(e) = request.validate() {
        warn!("Request validation failed from uid={}: {}", peer.uid, e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    let request_type = request.type_name();
    debug!(
        "Processing {} (id={}) from uid={}, pid={}",
        request_type, request_id, peer.uid, peer.pid
    );

    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::GetStatus => get_status(ctx),

        Request::GetRecentEvents => get_recent_events(ctx),

        Request::ListFingers => list_fingers(ctx),

        Request::EnrollFinger { slot, name } => {
            info!(
                "AUDIT: EnrollFinger slot={} name={:?} by uid={}, pid={}",
                slot, name, peer.uid, peer.pid
            );
            stage_enrollment(ctx, slot, name)
        }

        Request::DeleteFinger { slot } => {
            info!(
                "AUDIT: DeleteFinger slot={} by uid={}, pid={}",
                slot, peer.uid, peer.pid
            );
            let ctx = ctx.clone();
            run_blocking(move || delete_finger(&ctx, slot)).await
        }

        Request::DeleteAllFingers => {
            warn!("AUDIT: DeleteAllFingers by uid={}, pid={}", peer.uid, peer.pid);
            let ctx = ctx.clone();
            run_blocking(move || delete_all_fingers(&ctx)).await
        }

        Request::PairSensor => {
            warn!("AUDIT: PairSensor by uid={}, pid={}", peer.uid, peer.pid);
            let ctx = ctx.clone();
            run_blocking(move || pair_sensor(&ctx)).await
        }

        Request::FactoryReset => {
            warn!("AUDIT: FactoryReset by uid={}, pid={}", peer.uid, peer.pid);
            factory_reset(ctx)
        }
    };

    if let Response::Error { ref message } = response {
        warn!(
            "Request {} (id={}) failed for uid={}: {}",
            request_type, request_id, peer.uid, message
        );
    }

    ResponseEnvelope::new(request_id, response)
}

/// Run a sensor-holding operation on the blocking pool
async fn run_blocking<F>(op: F) -> Response
where
    F: FnOnce() -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(response) => response,
        Err(e) => {
            error!("Blocking operation failed: {}", e);
            Response::error("Internal daemon error")
        }
    }
}

fn protocol_mode(mode: Mode) -> ControllerMode {
    match mode {
        Mode::Scan => ControllerMode::Scan,
        Mode::Enroll => ControllerMode::Enroll,
        Mode::Maintenance => ControllerMode::Maintenance,
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn get_status(ctx: &ServerContext) -> Response {
    let status = DaemonStatus {
        mode: protocol_mode(ctx.state.modes.current()),
        sensor_connected: ctx.state.sensor_connected(),
        pairing_valid: ctx.state.pairing_valid(),
        finger_count: ctx.state.fingers().len() as u32,
    };
    Response::Ok(ResponseData::daemon_status(status))
}

fn get_recent_events(ctx: &ServerContext) -> Response {
    let events = ctx
        .state
        .events
        .recent()
        .into_iter()
        .map(|e| EventEntry {
            ts_ms: e.ts_ms,
            message: e.message,
        })
        .collect();
    Response::Ok(ResponseData::event_list(events))
}

fn list_fingers(ctx: &ServerContext) -> Response {
    let fingers = ctx
        .state
        .fingers()
        .into_iter()
        .map(|f| FingerEntry {
            slot: f.slot,
            name: f.name,
        })
        .collect();
    Response::Ok(ResponseData::finger_list(fingers))
}

/// Hand the enrollment to the run loop; completion is reported through the
/// event feed, as the doorbell's own UI consumes it.
fn stage_enrollment(ctx: &ServerContext, slot: i32, name: String) -> Response {
    ctx.state.stage_enrollment(EnrollRequest { slot, name });
    Response::ok_string("Enrollment staged")
}

/// Acquire exclusive sensor access or report why not
fn maintenance_window(ctx: &ServerContext) -> Result<MaintenanceGuard, Response> {
    ctx.state
        .modes
        .request_maintenance(MAINTENANCE_WAIT_TIMEOUT)
        .ok_or_else(|| Response::error("Controller busy: no maintenance window granted"))
}

fn delete_finger(ctx: &ServerContext, slot: i32) -> Response {
    let guard = match maintenance_window(ctx) {
        Ok(guard) => guard,
        Err(resp) => return resp,
    };

    // Validation pinned the slot into the template range already
    let slot = slot as u16;
    let response = {
        let mut sensor = ctx.sensor.lock();
        if sensor.delete(slot) {
            refresh_fingers(ctx, sensor.as_mut());
            ctx.state
                .events
                .notify(format!("Finger in slot {} deleted", slot));
            Response::ok()
        } else {
            Response::error(format!("Sensor refused to delete slot {}", slot))
        }
    };

    guard.release();
    response
}

fn delete_all_fingers(ctx: &ServerContext) -> Response {
    let guard = match maintenance_window(ctx) {
        Ok(guard) => guard,
        Err(resp) => return resp,
    };

    let response = {
        let mut sensor = ctx.sensor.lock();
        if sensor.delete_all() {
            refresh_fingers(ctx, sensor.as_mut());
            ctx.state.events.notify("All fingers deleted");
            Response::ok()
        } else {
            Response::error("Sensor refused to clear the template library")
        }
    };

    guard.release();
    response
}

fn pair_sensor(ctx: &ServerContext) -> Response {
    let guard = match maintenance_window(ctx) {
        Ok(guard) => guard,
        Err(resp) => return resp,
    };

    // Lock order: sensor, then store (same as the controller)
    let response = {
        let mut sensor = ctx.sensor.lock();
        let mut store = ctx.store.lock();
        if fb_core::pair(&mut store, sensor.as_mut(), &ctx.state.events) {
            ctx.state.set_pairing_valid(true);
            Response::ok_string("Sensor paired")
        } else {
            ctx.state.set_pairing_valid(false);
            Response::error("Pairing failed")
        }
    };

    guard.release();
    response
}

/// Clear persisted app settings; the next trust check re-runs first-boot
/// pairing against whatever sensor is attached.
fn factory_reset(ctx: &ServerContext) -> Response {
    let mut store = ctx.store.lock();
    match store.clear_app() {
        Ok(()) => {
            ctx.state.set_pairing_valid(false);
            ctx.state
                .events
                .notify("Factory reset: settings cleared, pairing re-armed");
            Response::ok_string("Settings cleared")
        }
        Err(e) => Response::error(format!("Factory reset failed: {}", e)),
    }
}

fn refresh_fingers(ctx: &ServerContext, sensor: &mut dyn FingerprintSensor) {
    ctx.state.set_fingers(sensor.templates());
}
