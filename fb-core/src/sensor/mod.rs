//! Fingerprint sensor driver interface and scan data model
//!
//! The controller consumes the sensor exclusively through the
//! [`FingerprintSensor`] trait; the physical UART transport lives behind it
//! and is replaceable. [`SimulatedSensor`] is the in-tree implementation
//! used by `--simulate` runs and by tests.

mod sim;

pub use sim::{SimHandle, SimLed, SimulatedSensor};

use std::sync::Arc;

use parking_lot::Mutex;

/// Result of one scan cycle.
///
/// Drivers never panic out of a scan; every failure surfaces as
/// [`Match::Error`] with the sensor's own return code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// Nothing on the sensor window
    NoFinger,
    /// A stored template matched the presented finger
    Found {
        slot: u16,
        name: String,
        confidence: u16,
    },
    /// A finger was read but matched no stored template
    NoMatch { code: u8 },
    /// The driver could not complete the cycle
    Error { code: u8 },
}

impl Match {
    /// Debounce key: same kind and, for matches, the same identity.
    ///
    /// A finger held on the window produces the same event every cycle;
    /// the controller acts only when this changes.
    pub fn same_event(&self, other: &Match) -> bool {
        match (self, other) {
            (Match::NoFinger, Match::NoFinger) => true,
            (Match::Found { slot: a, .. }, Match::Found { slot: b, .. }) => a == b,
            (Match::NoMatch { .. }, Match::NoMatch { .. }) => true,
            (Match::Error { .. }, Match::Error { .. }) => true,
            _ => false,
        }
    }
}

/// Result of one enrollment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// Template captured and stored in the requested slot
    Success,
    /// Driver aborted with a sensor-specific return code
    Failed { code: u8 },
}

/// One enrolled identity as reported by the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerRecord {
    pub slot: u16,
    pub name: String,
}

/// Narrow interface the controller consumes.
///
/// Multi-step call sequences (pairing check, enrollment, deletes) are not
/// synchronized here; callers coordinate through the maintenance handshake.
pub trait FingerprintSensor: Send {
    /// Establish the serial session, presenting the configured credential
    fn connect(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Whether a finger is resting on the window right now
    fn finger_present(&mut self) -> bool;

    /// Run one capture-and-match cycle
    fn scan(&mut self) -> Match;

    /// Capture a new template into `slot` under `name`
    fn enroll(&mut self, slot: u16, name: &str) -> EnrollOutcome;

    fn delete(&mut self, slot: u16) -> bool;

    fn delete_all(&mut self) -> bool;

    /// Enumerate stored templates
    fn templates(&mut self) -> Vec<FingerRecord>;

    /// Read the pairing code from the sensor notepad.
    ///
    /// An empty string means the sensor holds no code or the read failed;
    /// the two are indistinguishable at this interface and callers must
    /// treat empty as "no trustworthy answer".
    fn pairing_code(&mut self) -> String;

    /// Write a pairing code to the sensor notepad
    fn set_pairing_code(&mut self, code: &str) -> bool;

    // LED ring signalling, fire-and-forget
    fn led_ready(&mut self);
    fn led_error(&mut self);
    fn led_wifi_config(&mut self);
    fn led_off(&mut self);
}

/// Driver handle shared between the run loop and the admin server.
///
/// The mutex serializes individual calls; the maintenance handshake keeps
/// multi-call sequences from interleaving.
pub type SharedSensor = Arc<Mutex<Box<dyn FingerprintSensor>>>;

/// Wrap a driver for shared use
pub fn share_sensor(sensor: impl FingerprintSensor + 'static) -> SharedSensor {
    Arc::new(Mutex::new(Box::new(sensor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_event_compares_kind_and_identity() {
        let a = Match::Found { slot: 3, name: "thumb".into(), confidence: 90 };
        let b = Match::Found { slot: 3, name: "thumb".into(), confidence: 55 };
        let c = Match::Found { slot: 4, name: "index".into(), confidence: 90 };

        assert!(a.same_event(&b));
        assert!(!a.same_event(&c));
        assert!(!a.same_event(&Match::NoFinger));
        assert!(Match::NoMatch { code: 9 }.same_event(&Match::NoMatch { code: 2 }));
        assert!(Match::Error { code: 1 }.same_event(&Match::Error { code: 7 }));
        assert!(!Match::NoMatch { code: 9 }.same_event(&Match::Error { code: 9 }));
    }
}
