//! Thermal Governor Daemon (thermgovd)
//!
//! Privileged service that follows one thermal zone and keeps the SoC inside
//! its thermal envelope by hotplugging cores and capping the CPU frequency.
//! Operators adjust it at runtime through a Unix domain socket (`tgctl`).
//!
//! # Security Model
//! - **Privilege**: Runs as root for /sys hardware access only
//! - **Socket**: Reads open to everyone, writes only from uid 0
//! - **Audit**: Peer credential logging (UID/GID/PID) for every write
//! - **Limits**: Connection limits, message size limits, rate limiting
//! - **Isolation**: Restrictive umask, working directory set to /
//! - **Signals**: Graceful shutdown with resource cleanup
//!
//! # Hardening Measures
//! - Environment sanitization (clear dangerous env vars)
//! - Resource limits (RLIMIT_NOFILE, RLIMIT_CORE)
//! - Restrictive umask (0077)
//! - Symlink attack prevention on socket creation

mod governor_loop;
mod policy_watch;
mod server;
mod shutdown;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use tg_core::constants::{paths, timing};
use tg_core::{
    load_settings, CoreControl, FrequencyControl, Governor, GovernorState, PlatformBinding,
    RuntimeConfig, ThrottleParams,
};

use crate::server::ServerContext;
use crate::shutdown::Shutdown;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter environment variable
const LOG_ENV: &str = "THERMGOV_LOG";

// ============================================================================
// Security Hardening
// ============================================================================

/// Sanitize the process environment by removing dangerous variables
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "LD_PROFILE",
        "MALLOC_CHECK_",
        "HOSTALIASES",
        "LOCALDOMAIN",
        "RES_OPTIONS",
        "TMPDIR",
        "IFS",
        "PATH",
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }

    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("LC_ALL", "C");
    std::env::set_var("LANG", "C");
}

/// Set restrictive resource limits
fn set_resource_limits() {
    // No core dumps
    set_rlimit(libc::RLIMIT_CORE as i32, 0, 0);

    // Socket, a handful of connections and the sysfs attributes of at most eight cores
    set_rlimit(libc::RLIMIT_NOFILE as i32, 256, 256);
}

fn set_rlimit(resource: i32, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: resource is one of the RLIMIT_* constants above and limit is fully initialized.
    unsafe {
        #[allow(clippy::useless_conversion)]
        if libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) != 0 {
            eprintln!("Failed to set rlimit for resource {}", resource);
        }
    }
}

fn set_secure_umask() {
    // SAFETY: umask only replaces the process file creation mask.
    unsafe { libc::umask(0o077) };
}

fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        eprintln!("Could not chdir to /");
    }
}

/// Verify we're running as root
fn verify_privileges() -> Result<(), &'static str> {
    // SAFETY: geteuid and getuid have no preconditions.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        return Err("Daemon must run as root (euid=0) for hotplug and cpufreq access");
    }

    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }

    info!("Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

/// Validate socket path for security
fn validate_socket_path(path: &Path) -> Result<(), String> {
    let text = path.to_string_lossy();

    if !path.is_absolute() {
        return Err("Socket path must be absolute".into());
    }

    if text.contains("..") {
        return Err("Socket path contains path traversal".into());
    }

    let safe_dirs = ["/run/", "/var/run/", "/tmp/"];
    if !safe_dirs.iter().any(|d| text.starts_with(d)) {
        return Err(format!("Socket path must be under {:?}", safe_dirs));
    }

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            return Err(format!("Parent directory does not exist: {:?}", parent));
        }

        use std::os::unix::fs::MetadataExt;
        if let Ok(meta) = parent.metadata() {
            if meta.uid() != 0 {
                warn!("Socket parent directory not owned by root: {:?}", parent);
            }
        }
    }

    if path
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        return Err("Socket path is a symlink - refusing for security".into());
    }

    Ok(())
}

// ============================================================================
// PID File Management
// ============================================================================

/// Write PID file, refusing to start next to a live instance
fn write_pid_file(path: &Path) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: signal 0 only probes for the process.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("Another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        let _ = std::fs::remove_file(path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;

    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", path.display());
    Ok(())
}

fn cleanup(socket_path: &Path, pid_file: &Path) {
    for path in [socket_path, pid_file] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
    info!("Cleanup complete");
}

// ============================================================================
// CLI
// ============================================================================

struct Args {
    socket_path: PathBuf,
    settings_path: PathBuf,
    sensor_id: Option<u32>,
}

fn print_help() {
    eprintln!("thermgovd {} - thermal governor daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    thermgovd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -f, --foreground      Run in foreground (don't daemonize)");
    eprintln!("    -s, --socket PATH     Socket path (default {})", paths::socket_path().display());
    eprintln!("    -c, --config PATH     Settings file (default {})", paths::settings_path().display());
    eprintln!("        --sensor-id ID    Thermal zone to follow (overrides settings)");
    eprintln!("    -v, --version         Print version");
    eprintln!("    -h, --help            Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}          Log filter (trace, debug, info, warn, error)", LOG_ENV);
}

fn print_version() {
    println!("thermgovd {}", VERSION);
}

/// Parse arguments; `Ok(None)` means help or version was printed
fn parse_args() -> Result<Option<Args>, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        socket_path: paths::socket_path(),
        settings_path: paths::settings_path(),
        sensor_id: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                print_version();
                return Ok(None);
            }
            "-f" | "--foreground" => {
                // Always foreground; supervision is left to the init system
            }
            "-s" | "--socket" => {
                i += 1;
                let value = args.get(i).ok_or("--socket requires a path argument")?;
                parsed.socket_path = PathBuf::from(value);
            }
            "-c" | "--config" => {
                i += 1;
                let value = args.get(i).ok_or("--config requires a path argument")?;
                parsed.settings_path = PathBuf::from(value);
            }
            "--sensor-id" => {
                i += 1;
                let value = args.get(i).ok_or("--sensor-id requires a numeric argument")?;
                let id = value
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid sensor id: {}", value))?;
                parsed.sensor_id = Some(id);
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    Ok(Some(parsed))
}

/// Journald when the journal socket exists, stdout otherwise
fn init_logging(filter: &str) -> bool {
    use tracing_subscriber::prelude::*;

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(filter))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
    false
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Route SIGINT, SIGTERM and SIGHUP into `shutdown`
fn install_signal_handler(shutdown: Arc<Shutdown>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM/SIGHUP - initiating shutdown");
        shutdown.trigger();
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: Panic hook
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    // PHASE 1: Pre-initialization hardening
    sanitize_environment();
    set_secure_umask();
    set_resource_limits();
    secure_working_directory();

    // PHASE 2: Arguments
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // PHASE 3: Logging
    let log_filter = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_filter);

    info!("STARTUP: thermgovd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    // PHASE 4: Privilege and socket checks
    if let Err(e) = verify_privileges() {
        error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = validate_socket_path(&args.socket_path) {
        error!("Invalid socket path: {}", e);
        std::process::exit(1);
    }

    // PHASE 5: Settings and platform binding; any failure here refuses to start
    let settings = match load_settings(&args.settings_path).and_then(|s| s.validate().map(|_| s)) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid settings in {}: {}", args.settings_path.display(), e);
            std::process::exit(1);
        }
    };

    let binding = match PlatformBinding::resolve(&settings, args.sensor_id) {
        Ok(binding) => binding,
        Err(e) => {
            error!("Refusing to start: {}", e);
            std::process::exit(1);
        }
    };

    // PHASE 6: PID file
    let pid_file = paths::pid_file_path();
    if let Err(e) = write_pid_file(&pid_file) {
        error!("Could not write PID file: {}", e);
        std::process::exit(1);
    }

    // PHASE 7: Signal handling
    let shutdown = Arc::new(Shutdown::new());
    if let Err(e) = install_signal_handler(Arc::clone(&shutdown)) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    info!("STARTUP: Socket path: {}", args.socket_path.display());
    info!("STARTUP: PID: {}", std::process::id());
    info!("STARTUP: Log level: {}", log_filter);

    // PHASE 8: Governor state and ports
    let topology = binding.topology;
    let state = Arc::new(GovernorState::new(settings.initial_tunables(topology)));
    let cores: Arc<dyn CoreControl> = Arc::new(binding.core_control());
    let frequency: Arc<dyn FrequencyControl> = Arc::new(binding.frequency_control());
    let warm_freq_khz = settings.warm_freq_khz();

    match frequency.hardware_max_khz() {
        Ok(max) if max < warm_freq_khz => warn!(
            hw_max_khz = max,
            warm_freq_khz, "Warm frequency exceeds the hardware ceiling; the cap will never bite"
        ),
        Ok(max) => debug!(hw_max_khz = max, "Hardware ceiling"),
        Err(e) => warn!("Could not read hardware ceiling: {}", e),
    }

    let governor = Governor::new(
        topology,
        Box::new(binding.sensor()),
        Arc::clone(&cores),
        Arc::clone(&frequency),
        Arc::clone(&state),
        ThrottleParams {
            warm_freq_khz,
            hysteresis_margin: settings.hysteresis_margin,
        },
    );
    let config = Arc::new(RuntimeConfig::new(
        topology,
        Arc::clone(&state),
        Arc::clone(&cores),
        warm_freq_khz,
    ));

    info!(
        topology = %topology,
        sensor_id = binding.sensor_id,
        threshold = settings.threshold,
        warm_freq_khz,
        hotplug = state.snapshot().hotplug_enabled,
        "Governor configured"
    );

    // PHASE 9: Background tasks
    let constraint = governor.constraint();
    let governor_handle = tokio::spawn(governor_loop::run_governor_loop(
        governor,
        Duration::from_millis(settings.poll_interval_ms),
        Arc::clone(&shutdown),
    ));
    let watch_handle = tokio::spawn(policy_watch::run_policy_watch(
        Arc::clone(&frequency),
        timing::ENFORCE_INTERVAL,
        Arc::clone(&shutdown),
    ));

    // PHASE 10: Serve until shutdown
    let result = server::run_server(
        &args.socket_path,
        ServerContext {
            config,
            state: Arc::clone(&state),
        },
        Arc::clone(&shutdown),
    )
    .await;

    // PHASE 11: Stop the tasks; an in-flight tick completes first
    shutdown.trigger();
    let _ = governor_handle.await;
    let _ = watch_handle.await;
    governor_loop::release_cap(&constraint, frequency.as_ref());

    cleanup(&args.socket_path, &pid_file);

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: Daemon terminated gracefully");
    Ok(())
}
