//! Sensor-pairing security protocol
//!
//! The sensor stores fingerprint templates, so swapping in a same-model
//! sensor with attacker templates would open the door. To detect that,
//! a random pairing code is written to the sensor's notepad and mirrored
//! in the settings store; before the door is ever opened the two copies
//! are compared.
//!
//! # Security
//!
//! - A non-empty code that differs from the stored one means substituted
//!   hardware: pairing is invalidated once and stays invalid until an
//!   operator re-pairs explicitly.
//! - An empty answer is a serial glitch or an unprovisioned sensor; it
//!   blocks the door for this cycle but never invalidates the pairing.
//! - The comparison is a plain equality check; a bus-level replay attacker
//!   is outside this design's threat model.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::constants::pairing::{NO_TIME_SENTINEL, PAIRING_CODE_DIGEST_BYTES};
use crate::events::EventLog;
use crate::sensor::FingerprintSensor;
use crate::settings::SettingsStore;

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the controller process started
fn uptime_ms() -> u128 {
    BOOT.get_or_init(Instant::now).elapsed().as_millis()
}

/// Best-effort wall-clock seed; a fixed sentinel when the clock is unusable
fn wall_clock_seed() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs().to_string(),
        Err(_) => NO_TIME_SENTINEL.to_string(),
    }
}

/// Generate a fresh pairing code.
///
/// SHA-256 over a random word, a boot-relative timer sample, and the
/// wall-clock seed; the first [`PAIRING_CODE_DIGEST_BYTES`] digest bytes
/// are rendered as lowercase hex.
pub fn generate_pairing_code() -> String {
    let mut hasher = Sha256::new();
    hasher.update(rand::random::<u32>().to_string());
    hasher.update(uptime_ms().to_string());
    hasher.update(wall_clock_seed());

    let digest = hasher.finalize();
    digest
        .iter()
        .take(PAIRING_CODE_DIGEST_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Install a fresh pairing code on both sides.
///
/// The sensor is written first; the settings record is only updated once
/// the sensor holds the new code. Returns false with an event when either
/// side refuses. A persistence failure after a successful sensor write
/// leaves the two sides disagreeing, which later checks treat as a
/// mismatch - fail closed.
pub fn pair(
    store: &mut SettingsStore,
    sensor: &mut dyn FingerprintSensor,
    events: &EventLog,
) -> bool {
    let code = generate_pairing_code();

    if !sensor.set_pairing_code(&code) {
        events.notify("Sensor pairing failed: sensor refused the new code");
        return false;
    }

    if let Err(e) = store.update_app(|app| {
        app.sensor_pairing_code = code;
        app.sensor_pairing_valid = true;
    }) {
        warn!("SECURITY: failed to persist new pairing code: {}", e);
        events.notify("Sensor pairing failed: could not persist the new code");
        return false;
    }

    events.notify("Sensor pairing successful");
    true
}

/// Decide whether the connected sensor is still the trusted one.
///
/// Never fails: every outcome folds to a bool so the scan loop can gate
/// the door without unwinding.
pub fn check_valid(
    store: &mut SettingsStore,
    sensor: &mut dyn FingerprintSensor,
    events: &EventLog,
) -> bool {
    let app = store.app();

    if !app.sensor_pairing_valid {
        if app.sensor_pairing_code.is_empty() {
            // Never paired (first boot or factory reset): pair now.
            info!("SECURITY: no pairing on record, pairing with sensor");
            return pair(store, sensor, events);
        }
        // A mismatch is already on record; stay locked out without
        // touching the sensor until an operator re-pairs.
        return false;
    }

    let sensor_code = sensor.pairing_code();
    if sensor_code == app.sensor_pairing_code {
        return true;
    }

    if !sensor_code.is_empty() {
        // The sensor answered with a different code: substituted hardware.
        // Keep the stored code on record for forensics.
        warn!("SECURITY: sensor pairing code mismatch, invalidating pairing");
        events.notify("Security warning: sensor pairing code mismatch");
        if let Err(e) = store.update_app(|app| app.sensor_pairing_valid = false) {
            warn!("SECURITY: failed to persist pairing invalidation: {}", e);
            events.notify("Failed to persist pairing invalidation");
        }
        return false;
    }

    // Empty answer: glitch or unreadable notepad. Nothing is persisted;
    // the next cycle simply retries.
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::pairing::PAIRING_CODE_HEX_LEN;
    use crate::constants::sensor::DEFAULT_SENSOR_PIN;
    use crate::sensor::SimulatedSensor;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, SettingsStore, SimulatedSensor, EventLog) {
        let tmp = TempDir::new().unwrap();
        let store = SettingsStore::open(tmp.path().join("cfg")).unwrap();
        let sensor = SimulatedSensor::new(DEFAULT_SENSOR_PIN);
        (tmp, store, sensor, EventLog::new())
    }

    fn app_record_bytes(store: &SettingsStore) -> Vec<u8> {
        fs::read(store.dir().join("app_settings.json")).unwrap()
    }

    #[test]
    fn generated_codes_are_hex_and_unique() {
        let a = generate_pairing_code();
        let b = generate_pairing_code();

        assert_eq!(a.len(), PAIRING_CODE_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn pair_installs_the_same_code_on_both_sides() {
        let (_tmp, mut store, mut sensor, events) = fixture();

        assert!(pair(&mut store, &mut sensor, &events));

        let app = store.app();
        assert!(app.sensor_pairing_valid);
        assert_eq!(app.sensor_pairing_code.len(), PAIRING_CODE_HEX_LEN);
        assert_eq!(sensor.handle().pairing_code(), app.sensor_pairing_code);
    }

    #[test]
    fn first_boot_auto_pairs_through_check_valid() {
        let (_tmp, mut store, mut sensor, events) = fixture();

        assert!(check_valid(&mut store, &mut sensor, &events));
        assert!(store.app().sensor_pairing_valid);
        assert_eq!(store.app().sensor_pairing_code.len(), PAIRING_CODE_HEX_LEN);
    }

    #[test]
    fn refused_driver_write_keeps_the_store_untouched() {
        let (_tmp, mut store, mut sensor, events) = fixture();
        sensor.handle().refuse_pairing_writes(true);

        assert!(!pair(&mut store, &mut sensor, &events));
        assert_eq!(store.app().sensor_pairing_code, "");
        assert!(!store.app().sensor_pairing_valid);
    }

    #[test]
    fn substituted_sensor_invalidates_once_and_keeps_the_code() {
        let (_tmp, mut store, mut sensor, events) = fixture();
        let handle = sensor.handle();

        assert!(check_valid(&mut store, &mut sensor, &events));
        let paired_code = store.app().sensor_pairing_code;

        // Attacker swaps in a replacement sensor with its own notepad.
        handle.swap_notepad("f".repeat(PAIRING_CODE_HEX_LEN));

        assert!(!check_valid(&mut store, &mut sensor, &events));
        let app = store.app();
        assert!(!app.sensor_pairing_valid);
        assert_eq!(app.sensor_pairing_code, paired_code);

        // Second check short-circuits on the persisted flag: no sensor
        // contact, no further writes.
        let record_after_first = app_record_bytes(&store);
        let reads_after_first = handle.counts().pairing_reads;
        assert!(!check_valid(&mut store, &mut sensor, &events));
        assert_eq!(handle.counts().pairing_reads, reads_after_first);
        assert_eq!(app_record_bytes(&store), record_after_first);
    }

    #[test]
    fn matching_code_checks_never_touch_the_record() {
        let (_tmp, mut store, mut sensor, events) = fixture();

        assert!(check_valid(&mut store, &mut sensor, &events));
        let before = app_record_bytes(&store);

        // Steady state: the sensor keeps answering with the paired code.
        assert!(check_valid(&mut store, &mut sensor, &events));
        assert!(check_valid(&mut store, &mut sensor, &events));

        assert_eq!(app_record_bytes(&store), before);
        assert_eq!(sensor.handle().counts().pairing_writes, 1);
    }

    #[test]
    fn transient_read_glitch_changes_nothing_on_disk() {
        let (_tmp, mut store, mut sensor, events) = fixture();
        let handle = sensor.handle();

        assert!(check_valid(&mut store, &mut sensor, &events));
        let before = app_record_bytes(&store);

        handle.fail_pairing_reads(true);
        assert!(!check_valid(&mut store, &mut sensor, &events));

        assert_eq!(app_record_bytes(&store), before);
        assert!(store.app().sensor_pairing_valid);

        // Glitch clears: trust is restored without any re-pair.
        handle.fail_pairing_reads(false);
        assert!(check_valid(&mut store, &mut sensor, &events));
    }
}
