//! Constants and configuration values for Fingerbell
//!
//! Centralizes magic numbers, paths, and configuration defaults.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// Filesystem paths and name resolution
pub mod paths {

    /// Directory name under the user config base
    pub const CONFIG_DIR_NAME: &str = "fingerbell";

    /// Persisted application settings record (pairing state, sensor credential)
    pub const APP_SETTINGS_FILE: &str = "app_settings.json";

    /// Persisted wifi settings record (owned by the network-setup collaborator)
    pub const WIFI_SETTINGS_FILE: &str = "wifi_settings.json";

    /// Environment variable overriding the daemon socket path
    pub const SOCKET_ENV: &str = "FINGERBELL_SOCKET";

    /// Resolve the daemon socket path.
    ///
    /// Order: `FINGERBELL_SOCKET` env var, `/run` when root,
    /// `XDG_RUNTIME_DIR`, then `/tmp`.
    pub fn default_socket_path() -> String {
        if let Ok(path) = std::env::var(SOCKET_ENV) {
            if !path.is_empty() {
                return path;
            }
        }

        // SAFETY: geteuid is always safe - it just returns the effective user ID.
        if unsafe { libc::geteuid() } == 0 {
            return "/run/fingerbelld.sock".to_string();
        }

        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            if !runtime_dir.is_empty() {
                return format!("{}/fingerbelld.sock", runtime_dir);
            }
        }

        "/tmp/fingerbelld.sock".to_string()
    }

    /// Default settings directory for the invoking user.
    ///
    /// Handles the daemon-runs-as-root case: SUDO_USER points at the
    /// operator who installed the service, and their config is the one
    /// that holds the pairing record.
    pub fn default_settings_dir() -> Option<std::path::PathBuf> {
        let config_base = if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            get_user_home(&sudo_user).map(|h| h.join(".config"))
        } else {
            None
        };

        let config_base = config_base.or_else(|| {
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                Some(std::path::PathBuf::from(xdg))
            } else if let Ok(home) = std::env::var("HOME") {
                Some(std::path::PathBuf::from(home).join(".config"))
            } else {
                dirs::config_dir()
            }
        });

        config_base.map(|p| p.join(CONFIG_DIR_NAME))
    }

    /// Get home directory for a username from /etc/passwd
    fn get_user_home(username: &str) -> Option<std::path::PathBuf> {
        if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
            for line in passwd.lines() {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() >= 6 && parts[0] == username {
                    return Some(std::path::PathBuf::from(parts[5]));
                }
            }
        }
        None
    }
}

/// Pairing protocol parameters
pub mod pairing {
    /// Number of SHA-256 digest bytes rendered into the pairing code.
    ///
    /// 16 bytes hex-encode to 32 characters, which comfortably exceeds the
    /// sensor's notepad page while staying cheap to compare every scan.
    /// Widening the code is a one-constant change.
    pub const PAIRING_CODE_DIGEST_BYTES: usize = 16;

    /// Length of a rendered pairing code in hex characters
    pub const PAIRING_CODE_HEX_LEN: usize = PAIRING_CODE_DIGEST_BYTES * 2;

    /// Seed component used when no trusted wall-clock source is available
    pub const NO_TIME_SENTINEL: &str = "no time";
}

/// Sensor driver parameters
pub mod sensor {
    /// Lowest template slot the sensor accepts
    pub const MIN_TEMPLATE_SLOT: u16 = fb_protocol::MIN_TEMPLATE_SLOT;

    /// Highest template slot the sensor accepts
    pub const MAX_TEMPLATE_SLOT: u16 = fb_protocol::MAX_TEMPLATE_SLOT;

    /// Factory-default credential forwarded to the driver
    pub const DEFAULT_SENSOR_PIN: &str = "00000000";

    /// Display name staged for scan-triggered enrollments
    pub const DEFAULT_ENROLL_NAME: &str = "new finger";
}

/// Timing constants for the run loop and maintenance handshake
pub mod timing {
    use super::*;

    /// How long a maintenance requester waits for the run loop to yield
    pub const MAINTENANCE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Pace between uneventful scan cycles
    pub const SCAN_POLL: Duration = Duration::from_millis(100);

    /// Settle time after a handled match before scanning again
    pub const MATCH_SETTLE: Duration = Duration::from_millis(3000);

    /// Settle time while the same unmatched finger stays on the sensor
    pub const REPEAT_NO_MATCH_SETTLE: Duration = Duration::from_millis(1000);

    /// Pace while the sensor driver is disconnected
    pub const DISCONNECTED_RETRY: Duration = Duration::from_secs(5);

    /// Pace while an external actor holds the sensor in maintenance
    pub const MAINTENANCE_IDLE: Duration = Duration::from_millis(200);
}

/// Event feed parameters
pub mod events {
    /// Fixed capacity of the recent-event ring
    pub const EVENT_LOG_CAPACITY: usize = 16;
}

/// Resource limits
pub mod limits {
    /// Maximum size of a settings record file (sanity check before parsing)
    pub const MAX_SETTINGS_FILE_SIZE: u64 = 64 * 1024;
}
