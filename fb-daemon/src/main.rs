//! Fingerbell Daemon (fingerbelld)
//!
//! Privileged service that owns the fingerprint sensor, runs the doorbell
//! controller loop, and answers admin requests over a Unix domain socket.
//!
//! # Security Model
//! - **Socket**: Unix domain socket, mode 0660, symlink refusal on bind
//! - **Audit**: peer credential logging (UID/GID/PID) for every request
//! - **Validation**: requests are re-validated server-side before dispatch
//! - **Limits**: connection cap, message size cap, read/write timeouts
//! - **Isolation**: restrictive umask, working directory set to /
//! - **Signals**: graceful shutdown with socket and PID file cleanup
//!
//! The sensor is reached only through the `FingerprintSensor` trait. This
//! build ships the simulated driver; without `--simulate` the daemon refuses
//! to start rather than pretend a serial transport exists.

mod control_loop;
mod door;
mod server;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fb_core::constants::paths;
use fb_core::{ControlState, Controller, DoorSignal, EventLog, SettingsStore, SimulatedSensor};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Security Hardening
// ============================================================================

/// Strip loader-override variables before anything else runs
fn sanitize_environment() {
    const DANGEROUS_VARS: &[&str] = &[
        "LD_PRELOAD",
        "LD_LIBRARY_PATH",
        "LD_AUDIT",
        "LD_DEBUG",
        "IFS",
    ];

    for var in DANGEROUS_VARS {
        std::env::remove_var(var);
    }

    std::env::set_var("PATH", "/usr/sbin:/usr/bin:/sbin:/bin");

    debug!("Environment sanitized");
}

/// Set restrictive umask
fn set_secure_umask() {
    // 0077 = owner has all permissions, group/other have none.
    // The socket gets its 0660 mode set explicitly after bind.
    // SAFETY: umask only sets the file creation mask for this process.
    unsafe { libc::umask(0o077) };
    debug!("Umask set to 0077");
}

/// Change to root directory (prevent directory-based attacks)
fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
    debug!("Working directory set to /");
}

/// Validate socket path for security
fn validate_socket_path(path: &str) -> Result<(), String> {
    let p = Path::new(path);

    if !p.is_absolute() {
        return Err("Socket path must be absolute".into());
    }

    if path.contains("..") {
        return Err("Socket path contains path traversal".into());
    }

    if path.contains('\0') {
        return Err("Socket path contains null byte".into());
    }

    let safe_dirs = ["/run/", "/var/run/", "/tmp/"];
    if !safe_dirs.iter().any(|d| path.starts_with(d)) {
        return Err(format!("Socket path must be under {:?}", safe_dirs));
    }

    if let Some(parent) = p.parent() {
        if !parent.exists() {
            return Err(format!("Parent directory does not exist: {:?}", parent));
        }
    }

    // Refuse to reuse an existing path that is a symlink
    if p.exists()
        && p.symlink_metadata()
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

fn pid_file_path() -> PathBuf {
    // SAFETY: geteuid has no failure modes.
    if unsafe { libc::geteuid() } == 0 {
        return PathBuf::from("/run/fingerbelld.pid");
    }
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return Path::new(&dir).join("fingerbelld.pid");
        }
    }
    PathBuf::from("/tmp/fingerbelld.pid")
}

/// Write PID file, taking over from a stale instance if the old PID is dead
fn write_pid_file() -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let path = pid_file_path();

    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(old_pid) = content.trim().parse::<i32>() {
                // SAFETY: kill with signal 0 only probes for process existence.
                if unsafe { libc::kill(old_pid, 0) } == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("Another instance is running (PID {})", old_pid),
                    ));
                }
            }
        }
        // Stale PID file, remove it
        let _ = std::fs::remove_file(&path);
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(&path)?;

    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;

    debug!("PID file written: {}", path.display());
    Ok(())
}

// ============================================================================
// Settings
// ============================================================================

/// Open the settings store; an unreadable record is quarantined rather than
/// bricking the doorbell, so the device falls back to defaults and re-arms
/// first-boot pairing.
fn open_settings(dir: &Path) -> fb_core::Result<SettingsStore> {
    match SettingsStore::open(dir) {
        Ok(store) => Ok(store),
        Err(err) => {
            warn!("STARTUP: settings unreadable ({}), quarantining records", err);
            quarantine_record(&dir.join(paths::APP_SETTINGS_FILE));
            quarantine_record(&dir.join(paths::WIFI_SETTINGS_FILE));
            SettingsStore::open(dir)
        }
    }
}

fn quarantine_record(path: &Path) {
    if !path.exists() {
        return;
    }
    let aside = path.with_extension("json.corrupt");
    match std::fs::rename(path, &aside) {
        Ok(()) => warn!("STARTUP: moved unreadable record to {}", aside.display()),
        Err(err) => warn!("STARTUP: could not move {} aside: {}", path.display(), err),
    }
}

// ============================================================================
// Cleanup
// ============================================================================

fn cleanup(socket_path: &str) {
    debug!("Starting cleanup...");

    if Path::new(socket_path).exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket: {}", e);
        }
    }

    let pid_file = pid_file_path();
    if pid_file.exists() {
        if let Err(e) = std::fs::remove_file(&pid_file) {
            warn!("Failed to remove PID file: {}", e);
        }
    }

    info!("Cleanup complete");
}

// ============================================================================
// CLI
// ============================================================================

struct Options {
    socket_path: String,
    config_dir: PathBuf,
    simulate: bool,
    door_gpio: Option<u32>,
}

fn print_help() {
    eprintln!("fingerbelld {} - Fingerbell doorbell controller daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    fingerbelld [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -s, --socket PATH      Admin socket path (default per user/runtime dir)");
    eprintln!("    -c, --config-dir DIR   Settings directory (default per XDG config dir)");
    eprintln!("        --simulate         Run against the simulated fingerprint sensor");
    eprintln!("        --door-gpio N      Drive the door strike on sysfs GPIO pin N");
    eprintln!("    -v, --version          Print version");
    eprintln!("    -h, --help             Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    FINGERBELL_LOG         Log level (trace, debug, info, warn, error)");
    eprintln!("    FINGERBELL_SOCKET      Overrides the default socket path");
}

fn print_version() {
    println!("fingerbelld {}", VERSION);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: Panic hook so controller bugs land in the journal instead of
    // silently killing a thread
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

    // PHASE 1: Pre-initialization hardening, before any other code runs
    sanitize_environment();
    set_secure_umask();
    secure_working_directory();

    // PHASE 2: Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options {
        socket_path: paths::default_socket_path(),
        config_dir: paths::default_settings_dir()
            .unwrap_or_else(|| PathBuf::from("/etc/fingerbell")),
        simulate: false,
        door_gpio: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                print_version();
                return Ok(());
            }
            "-s" | "--socket" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --socket requires a path argument");
                    std::process::exit(1);
                }
                opts.socket_path = args[i].clone();
            }
            "-c" | "--config-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config-dir requires a directory argument");
                    std::process::exit(1);
                }
                opts.config_dir = PathBuf::from(&args[i]);
            }
            "--simulate" => {
                opts.simulate = true;
            }
            "--door-gpio" => {
                i += 1;
                let pin = args.get(i).and_then(|a| a.parse::<u32>().ok());
                match pin {
                    Some(pin) => opts.door_gpio = Some(pin),
                    None => {
                        eprintln!("Error: --door-gpio requires a pin number");
                        std::process::exit(1);
                    }
                }
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    // PHASE 3: Initialize logging (journald when present, stdout otherwise)
    let log_level = std::env::var("FINGERBELL_LOG").unwrap_or_else(|_| "info".to_string());

    let mut use_journald = Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                use_journald = false;
                tracing_subscriber::fmt()
                    .with_target(false)
                    .with_level(true)
                    .with_env_filter(&log_level)
                    .init();
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .with_env_filter(&log_level)
            .init();
    }

    info!("STARTUP: fingerbelld {} starting", VERSION);
    info!(
        "STARTUP: Logging to {}",
        if use_journald { "systemd journal" } else { "stdout" }
    );

    // PHASE 4: Path and driver checks
    if let Err(e) = validate_socket_path(&opts.socket_path) {
        tracing::error!("Invalid socket path: {}", e);
        std::process::exit(1);
    }

    if !opts.simulate {
        tracing::error!(
            "No hardware sensor transport in this build; start with --simulate"
        );
        std::process::exit(2);
    }

    // PHASE 5: PID file (detect other instances)
    if let Err(e) = write_pid_file() {
        tracing::error!("Could not write PID file: {}", e);
        std::process::exit(1);
    }

    // PHASE 6: Signal handlers
    let socket_path_clone = opts.socket_path.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        cleanup(&socket_path_clone);
        info!("SHUTDOWN: Daemon terminated gracefully");
        std::process::exit(0);
    }) {
        warn!(
            "Failed to set signal handler: {}. Shutdown via signals may not clean up.",
            e
        );
    }

    info!("STARTUP: Socket path: {}", opts.socket_path);
    info!("STARTUP: Settings dir: {}", opts.config_dir.display());
    info!("STARTUP: PID: {}", std::process::id());
    info!("STARTUP: Log level: {}", log_level);

    // PHASE 7: Settings store
    let store = match open_settings(&opts.config_dir) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Could not open settings store: {}", e);
            std::process::exit(1);
        }
    };

    // PHASE 8: Sensor, door seam, shared state
    let pin = store.app().sensor_pin;
    let sensor = fb_core::share_sensor(SimulatedSensor::new(pin));
    let store = Arc::new(Mutex::new(store));

    let door: Box<dyn DoorSignal> = match opts.door_gpio {
        Some(pin) => match door::GpioDoor::new(pin) {
            Ok(gpio) => {
                info!("STARTUP: door strike on GPIO {}", pin);
                Box::new(gpio)
            }
            Err(e) => {
                warn!(
                    "STARTUP: GPIO {} unavailable ({}), door signals will only be logged",
                    pin, e
                );
                Box::new(door::LogDoor)
            }
        },
        None => Box::new(door::LogDoor),
    };

    let state = ControlState::new(EventLog::new());

    // PHASE 9: Controller loop on its own thread (the sensor and settings
    // I/O are blocking by nature)
    let controller = Controller::new(
        Arc::clone(&sensor),
        Arc::clone(&store),
        Arc::clone(&state),
        door,
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let loop_shutdown = Arc::clone(&shutdown);
    let control_handle = std::thread::Builder::new()
        .name("fb-control".into())
        .spawn(move || control_loop::run(controller, loop_shutdown))?;

    info!("STARTUP: controller loop started");

    // PHASE 10: Admin server
    let ctx = server::ServerContext {
        state: Arc::clone(&state),
        sensor: Arc::clone(&sensor),
        store: Arc::clone(&store),
    };
    let result = server::run_server(&opts.socket_path, ctx).await;

    // PHASE 11: Shutdown and cleanup
    shutdown.store(true, Ordering::SeqCst);
    if control_handle.join().is_err() {
        warn!("SHUTDOWN: controller thread panicked");
    }
    cleanup(&opts.socket_path);

    result
}
