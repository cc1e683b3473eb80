//! Fingerbell Core Library
//!
//! Controller core for a fingerprint-reader doorbell: scan for fingers,
//! open the door for trusted matches, ring the bell for strangers.
//!
//! # Features
//!
//! - **Mode State Machine**: scan / enroll / maintenance cycle with a
//!   cooperative maintenance handshake for external sensor access
//! - **Sensor Pairing**: random-code pairing between controller and sensor
//!   that detects a swapped-in replacement reader before the door opens
//! - **Persisted Settings**: atomic whole-record JSON settings with
//!   last-known-good semantics
//! - **Driver Seam**: narrow sensor trait with an in-tree simulated driver
//! - **Event Feed**: fixed ring of recent events for UI collaborators
//!
//! # Module Structure
//!
//! - `controller` - per-tick scan/enroll logic and shared control state
//! - `mode` - mode enum and the maintenance handshake
//! - `pairing` - pairing-code generation and validity checks
//! - `sensor` - driver trait, scan data model, simulated driver
//! - `settings` - persisted configuration records
//! - `events` - recent-event ring
//! - `daemon_client` - sync client for the fingerbelld socket

// Grouped modules
pub mod sensor;

// Standalone modules
pub mod constants;
pub mod controller;
pub mod daemon_client;
pub mod events;
pub mod mode;
pub mod pairing;
pub mod settings;

// Re-export primary controller types
pub use controller::{ControlState, Controller, DoorSignal, EnrollRequest};

// Re-export mode types
pub use mode::{MaintenanceGuard, Mode, ModeControl};

// Re-export pairing operations
pub use pairing::{check_valid, generate_pairing_code, pair};

// Re-export sensor types and the simulated driver
pub use sensor::{
    share_sensor, EnrollOutcome, FingerRecord, FingerprintSensor, Match, SharedSensor, SimHandle,
    SimLed, SimulatedSensor,
};

// Re-export settings types
pub use settings::{AppSettings, SettingsStore, WifiSettings};

// Re-export event feed types
pub use events::{EventLog, EventRecord};

// Re-export daemon client
pub use daemon_client::{is_daemon_available, DaemonClient};

// Re-export error types
pub use fb_error::{FingerbellError, Result};
