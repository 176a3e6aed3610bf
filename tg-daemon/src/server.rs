//! Unix Socket Server (Hardened)
//!
//! Serves the runtime config surface to `tgctl` and other local clients.
//!
//! # Security Features
//! - **Socket permissions**: World-connectable socket, symlink attack prevention
//! - **Peer credentials**: Audit logging of UID/GID/PID for every write
//! - **Authorization**: Only root may change governor parameters
//! - **Connection limits**: Maximum concurrent connections enforced
//! - **Rate limiting**: Per-uid request rate limiting
//! - **Timeouts**: Read/write timeouts prevent resource exhaustion
//! - **Message limits**: Maximum message size prevents memory exhaustion

use anyhow::{bail, Context};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use tg_core::{GovernorError, GovernorState, HotplugTransition, RuntimeConfig};
use tg_protocol::{Request, RequestEnvelope, Response, ResponseEnvelope};

// ============================================================================
// Security Constants
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = tg_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rate limit: maximum requests per uid per window
const RATE_LIMIT_REQUESTS: u32 = 300;

/// Rate limit window
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// Socket file mode; reads are open to everyone, writes are checked per request
const SOCKET_MODE: u32 = 0o666;

/// Only this uid may change governor parameters
const WRITER_UID: u32 = 0;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Everything a request handler needs
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<RuntimeConfig>,
    pub state: Arc<GovernorState>,
}

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

/// Rate limiter state per client (keyed by UID)
struct RateLimiter {
    clients: HashMap<u32, ClientState>,
    max_requests: u32,
}

struct ClientState {
    request_count: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new(max_requests: u32) -> Self {
        Self {
            clients: HashMap::new(),
            max_requests,
        }
    }

    /// Returns true if allowed, false if limited
    fn check_and_increment(&mut self, uid: u32) -> bool {
        let now = Instant::now();

        let state = self.clients.entry(uid).or_insert(ClientState {
            request_count: 0,
            window_start: now,
        });

        if now.duration_since(state.window_start) > RATE_LIMIT_WINDOW {
            state.request_count = 0;
            state.window_start = now;
        }

        if state.request_count >= self.max_requests {
            return false;
        }

        state.request_count += 1;
        true
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.clients
            .retain(|_, state| now.duration_since(state.window_start) < RATE_LIMIT_WINDOW * 2);
    }
}

// ============================================================================
// Server
// ============================================================================

/// Run the Unix socket server until `shutdown` fires
pub async fn run_server(
    socket_path: &Path,
    ctx: ServerContext,
    shutdown: Arc<crate::shutdown::Shutdown>,
) -> anyhow::Result<()> {
    // SECURITY: Remove existing socket only if it is not a symlink
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            bail!("Socket path {} is a symlink - refusing for security", socket_path.display());
        }
        std::fs::remove_file(socket_path)
            .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("setting mode on {}", socket_path.display()))?;

    info!("Listening on {} (mode {:o})", socket_path.display(), SOCKET_MODE);
    info!(
        "Security: max_conn={}, max_msg={}, rate_limit={}/{:?}",
        MAX_CONNECTIONS, MAX_MESSAGE_SIZE, RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW
    );

    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(RATE_LIMIT_REQUESTS)));

    let rate_limiter_cleanup = rate_limiter.clone();
    let cleanup_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RATE_LIMIT_WINDOW) => {
                    rate_limiter_cleanup.lock().await.cleanup();
                }
                _ = cleanup_shutdown.wait() => break,
            }
        }
    });

    let mut accepted: u64 = 0;

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
                        accepted += 1;
                        let rate_limiter = rate_limiter.clone();
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            handle_client(stream, rate_limiter, ctx).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.wait() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped (handled {} total connections)", accepted);

    Ok(())
}

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

impl PeerCredentials {
    fn may_write(&self) -> bool {
        self.uid == WRITER_UID
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, rate_limiter: Arc<Mutex<RateLimiter>>, ctx: ServerContext) {
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };

    debug!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

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
                    cred.uid,
                    cred.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check_and_increment(cred.uid) {
                        warn!("Rate limit exceeded for uid={}, pid={}", cred.uid, cred.pid);
                        let envelope = ResponseEnvelope::new(0, Response::error("Rate limit exceeded"));
                        let _ = send_response(&mut writer, &envelope).await;
                        continue;
                    }
                }

                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request from uid={}: {}", cred.uid, e);
                        let envelope = ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let envelope = process_request(line_str, &cred, &ctx).await;

                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, cred.uid, cred.pid
                    );
                    let envelope = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
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

/// Get peer credentials (uid, gid, pid) from Unix socket
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    #[cfg(target_os = "linux")]
    {
        // SAFETY: ucred is a plain C struct with no pointers; all-zero is a valid value.
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: fd is a live socket owned by `stream`, `cred` is initialized
        // and `len` matches its size.
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
            return Some(PeerCredentials {
                uid: cred.uid,
                gid: cred.gid,
                pid: cred.pid,
            });
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = fd;
    }

    None
}

fn error_response(e: &GovernorError) -> Response {
    Response::error(e.to_string())
}

/// Process a single request and return the response envelope
pub async fn process_request(line: &str, cred: &PeerCredentials, ctx: &ServerContext) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", cred.uid, e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    // Clients validate too; the daemon never trusts that
    if let Err(e) = request.validate() {
        warn!("Request validation failed from uid={}: {}", cred.uid, e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    let request_type = request.type_name();
    debug!(
        "Processing {} (id={}) from uid={}, pid={}",
        request_type, request_id, cred.uid, cred.pid
    );

    if request.is_write() && !cred.may_write() {
        warn!(
            "AUDIT: denied {} for uid={}, pid={}",
            request_type, cred.uid, cred.pid
        );
        let denied = GovernorError::PermissionDenied(format!("{} requires root", request_type));
        return ResponseEnvelope::new(request_id, error_response(&denied));
    }

    let config = &ctx.config;

    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::GetStatus => {
            let mut status = ctx.state.status();
            status.warm_frequency_khz = config.warm_frequency();
            Response::ok_status(status)
        }

        Request::GetHotplugEnabled => Response::ok_toggle(config.hotplug_enabled()),

        Request::SetHotplugEnabled { enabled } => {
            info!(
                "AUDIT: SetHotplugEnabled enabled={} by uid={}, pid={}",
                enabled, cred.uid, cred.pid
            );
            // The disable sweep touches sysfs and waits on the hotplug section
            let config = Arc::clone(config);
            match tokio::task::spawn_blocking(move || config.set_hotplug_enabled(enabled)).await {
                Ok(HotplugTransition::Disabled { failures }) if !failures.is_empty() => {
                    Response::ok_string(format!(
                        "hotplug disabled; {} core(s) did not come back online",
                        failures.len()
                    ))
                }
                Ok(_) => Response::ok(),
                Err(e) => {
                    error!("Hotplug toggle panicked: {}", e);
                    Response::error("Internal error")
                }
            }
        }

        Request::GetThreshold => Response::ok_temp(config.threshold()),

        Request::SetThreshold { celsius } => {
            info!(
                "AUDIT: SetThreshold celsius={} by uid={}, pid={}",
                celsius, cred.uid, cred.pid
            );
            match config.set_threshold(celsius) {
                Ok(()) => Response::ok(),
                Err(e) => error_response(&e),
            }
        }

        Request::GetWarmFrequency => Response::ok_freq(config.warm_frequency()),

        Request::SetWarmFrequency { khz } => {
            info!(
                "AUDIT: SetWarmFrequency khz={} by uid={}, pid={}",
                khz, cred.uid, cred.pid
            );
            match config.set_warm_frequency(khz) {
                Ok(()) => Response::ok(),
                Err(e) => error_response(&e),
            }
        }

        Request::GetCore0Permission => Response::ok_permission(config.core0_permission()),

        Request::SetCore0Permission { value } => {
            info!(
                "AUDIT: SetCore0Permission value={} by uid={}, pid={}",
                value, cred.uid, cred.pid
            );
            match config.set_core0_permission(value) {
                Ok(()) => Response::ok(),
                Err(e) => error_response(&e),
            }
        }
    };

    if let Response::Error { ref message } = response {
        warn!(
            "Request {} (id={}) failed for uid={}: {}",
            request_type, request_id, cred.uid, message
        );
    }

    ResponseEnvelope::new(request_id, response)
}
