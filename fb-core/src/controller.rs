//! Scan/enroll cycle driver
//!
//! One [`Controller::tick`] runs the current mode's work to completion and
//! returns a pacing hint; the daemon drives it from a dedicated thread.
//! State shared with the admin server lives in [`ControlState`].
//!
//! # Security
//!
//! - The door only opens after a fresh pairing check on a *new* match;
//!   a finger resting on the window does not re-trigger it.
//! - While an external actor holds maintenance, ticks touch neither the
//!   sensor nor the settings store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::constants::sensor::{DEFAULT_ENROLL_NAME, MAX_TEMPLATE_SLOT, MIN_TEMPLATE_SLOT};
use crate::constants::timing;
use crate::events::EventLog;
use crate::mode::{Mode, ModeControl};
use crate::pairing;
use crate::sensor::{EnrollOutcome, FingerRecord, FingerprintSensor, Match, SharedSensor};
use crate::settings::SettingsStore;

/// Door and bell actuation seam; implementations are fire-and-forget and
/// must not block the scan loop for long
pub trait DoorSignal: Send {
    /// Fire the door opener for a trusted match
    fn open_door(&mut self);

    /// Ring the bell for an unrecognized visitor
    fn ring_bell(&mut self);
}

/// One staged enrollment.
///
/// The slot stays signed until the local range check so that out-of-range
/// operator input (including negatives) is rejected here, not by the
/// driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollRequest {
    pub slot: i32,
    pub name: String,
}

/// State shared between the run loop and the admin server
pub struct ControlState {
    pub modes: ModeControl,
    pub events: EventLog,
    staged_enroll: Mutex<Option<EnrollRequest>>,
    fingers: RwLock<Vec<FingerRecord>>,
    sensor_connected: AtomicBool,
    pairing_valid: AtomicBool,
}

impl ControlState {
    pub fn new(events: EventLog) -> Arc<Self> {
        Arc::new(Self {
            modes: ModeControl::new(),
            events,
            staged_enroll: Mutex::new(None),
            fingers: RwLock::new(Vec::new()),
            sensor_connected: AtomicBool::new(false),
            pairing_valid: AtomicBool::new(false),
        })
    }

    /// Stage an enrollment for the next tick, replacing any pending one
    pub fn stage_enrollment(&self, request: EnrollRequest) {
        debug!(
            "CONTROL: staged enrollment slot={} name={:?}",
            request.slot, request.name
        );
        *self.staged_enroll.lock() = Some(request);
    }

    pub(crate) fn take_staged_enrollment(&self) -> Option<EnrollRequest> {
        self.staged_enroll.lock().take()
    }

    pub(crate) fn has_staged_enrollment(&self) -> bool {
        self.staged_enroll.lock().is_some()
    }

    /// Cached identity listing, refreshed by the run loop
    pub fn fingers(&self) -> Vec<FingerRecord> {
        self.fingers.read().clone()
    }

    /// Replace the cached listing. The run loop refreshes it after
    /// enrollments; the admin server refreshes it after deletes.
    pub fn set_fingers(&self, fingers: Vec<FingerRecord>) {
        *self.fingers.write() = fingers;
    }

    pub fn sensor_connected(&self) -> bool {
        self.sensor_connected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sensor_connected(&self, connected: bool) {
        self.sensor_connected.store(connected, Ordering::Relaxed);
    }

    pub fn pairing_valid(&self) -> bool {
        self.pairing_valid.load(Ordering::Relaxed)
    }

    pub fn set_pairing_valid(&self, valid: bool) {
        self.pairing_valid.store(valid, Ordering::Relaxed);
    }
}

/// Owns the per-tick logic and the actuation seam
pub struct Controller {
    sensor: SharedSensor,
    store: Arc<Mutex<SettingsStore>>,
    state: Arc<ControlState>,
    door: Box<dyn DoorSignal>,
    last_scan: Option<Match>,
}

impl Controller {
    pub fn new(
        sensor: SharedSensor,
        store: Arc<Mutex<SettingsStore>>,
        state: Arc<ControlState>,
        door: Box<dyn DoorSignal>,
    ) -> Self {
        Self {
            sensor,
            store,
            state,
            door,
            last_scan: None,
        }
    }

    pub fn state(&self) -> Arc<ControlState> {
        Arc::clone(&self.state)
    }

    /// Boot sequence: connect the driver, surface pairing problems before
    /// the first visitor, and prime the identity cache.
    pub fn startup(&mut self) {
        let mut sensor = self.sensor.lock();

        let connected = sensor.connect();
        self.state.set_sensor_connected(connected);
        if !connected {
            warn!("STARTUP: fingerprint sensor not reachable");
            self.state.events.notify("Sensor connection failed");
            sensor.led_error();
            return;
        }
        info!("STARTUP: fingerprint sensor connected");

        // A finger held on the window during boot asks for network setup;
        // the wifi-config collaborator takes over out of process.
        if sensor.finger_present() {
            info!("STARTUP: finger on sensor, signalling wifi config");
            self.state
                .events
                .notify("Finger on sensor at boot: wifi config requested");
            sensor.led_wifi_config();
        }

        let trusted = {
            let mut store = self.store.lock();
            pairing::check_valid(&mut store, sensor.as_mut(), &self.state.events)
        };
        self.state.set_pairing_valid(trusted);
        if trusted {
            sensor.led_ready();
        } else {
            warn!("SECURITY: sensor pairing not trusted at startup");
            self.state
                .events
                .notify("Security warning: sensor pairing mismatch detected at startup");
            sensor.led_error();
        }

        self.refresh_fingers(sensor.as_mut());
        info!(
            "STARTUP: {} enrolled fingers on record",
            self.state.fingers().len()
        );
    }

    /// Run one cycle of the current mode and return the pacing hint.
    ///
    /// A pending maintenance request is applied after the mode work, the
    /// same tick it arrives in.
    pub fn tick(&mut self) -> Duration {
        let pace = match self.state.modes.current() {
            // An external actor owns the sensor; stay completely off it.
            Mode::Maintenance => timing::MAINTENANCE_IDLE,
            Mode::Enroll => {
                self.run_enroll();
                timing::SCAN_POLL
            }
            Mode::Scan => self.run_scan(),
        };

        self.state.modes.apply_pending_maintenance();
        pace
    }

    fn run_scan(&mut self) -> Duration {
        // An externally staged enrollment takes effect between cycles.
        if self.state.has_staged_enrollment() {
            self.state.modes.set_mode(Mode::Enroll);
            return timing::SCAN_POLL;
        }

        let mut sensor = self.sensor.lock();
        if !sensor.is_connected() {
            self.state.set_sensor_connected(false);
            debug!("CONTROL: sensor disconnected, skipping scan cycle");
            return timing::DISCONNECTED_RETRY;
        }

        let scan = sensor.scan();
        let changed = match &self.last_scan {
            Some(prev) => !scan.same_event(prev),
            None => true,
        };

        let pace = match &scan {
            Match::NoFinger => timing::SCAN_POLL,

            Match::Found {
                slot,
                name,
                confidence,
            } => {
                self.state.events.notify(format!(
                    "Match found: #{} {} (confidence {})",
                    slot, name, confidence
                ));
                if changed {
                    let trusted = {
                        let mut store = self.store.lock();
                        pairing::check_valid(&mut store, sensor.as_mut(), &self.state.events)
                    };
                    self.state.set_pairing_valid(trusted);
                    if trusted {
                        info!("ACTION: opening door for #{} {}", slot, name);
                        self.door.open_door();
                        self.state.events.notify(format!("Open door for {}", name));
                    } else {
                        self.state.events.notify(
                            "Security warning: door stays closed, sensor pairing is not trusted",
                        );
                    }
                }
                timing::MATCH_SETTLE
            }

            Match::NoMatch { code } => {
                self.state
                    .events
                    .notify(format!("No match found (code {})", code));
                if changed {
                    self.door.ring_bell();
                    self.state.events.notify("Ring the bell");
                    match self.next_free_slot() {
                        Some(slot) => {
                            self.state.stage_enrollment(EnrollRequest {
                                slot: slot as i32,
                                name: DEFAULT_ENROLL_NAME.to_string(),
                            });
                            self.state.modes.set_mode(Mode::Enroll);
                        }
                        None => {
                            self.state
                                .events
                                .notify("Enrollment not staged: no free template slot");
                        }
                    }
                    timing::SCAN_POLL
                } else {
                    // Same unmatched finger still on the window.
                    timing::REPEAT_NO_MATCH_SETTLE
                }
            }

            Match::Error { code } => {
                self.state
                    .events
                    .notify(format!("Sensor error (code {})", code));
                timing::SCAN_POLL
            }
        };

        self.last_scan = Some(scan);
        pace
    }

    fn run_enroll(&mut self) {
        if let Some(request) = self.state.take_staged_enrollment() {
            self.execute_enrollment(request);
        } else {
            debug!("CONTROL: enroll mode with nothing staged");
        }
        self.state.modes.set_mode(Mode::Scan);
    }

    fn execute_enrollment(&mut self, request: EnrollRequest) {
        let min = MIN_TEMPLATE_SLOT as i32;
        let max = MAX_TEMPLATE_SLOT as i32;
        if request.slot < min || request.slot > max {
            // Rejected here; the driver never sees an out-of-range slot.
            self.state.events.notify(format!(
                "Enrollment rejected: slot {} out of range ({}-{})",
                request.slot, min, max
            ));
            return;
        }
        let slot = request.slot as u16;

        let mut sensor = self.sensor.lock();
        if !sensor.is_connected() {
            self.state
                .events
                .notify("Enrollment failed: sensor not connected");
            return;
        }

        self.state.events.notify(format!(
            "Enrolling finger '{}' into slot {}",
            request.name, slot
        ));
        match sensor.enroll(slot, &request.name) {
            EnrollOutcome::Success => {
                self.state.events.notify(format!(
                    "Enrollment successful: slot {} '{}'",
                    slot, request.name
                ));
                self.refresh_fingers(sensor.as_mut());
            }
            EnrollOutcome::Failed { code } => {
                self.state
                    .events
                    .notify(format!("Enrollment failed (code {})", code));
            }
        }
    }

    fn refresh_fingers(&self, sensor: &mut dyn FingerprintSensor) {
        let fingers = sensor.templates();
        self.state.set_fingers(fingers);
    }

    /// Lowest template slot not present in the identity cache
    fn next_free_slot(&self) -> Option<u16> {
        let used: HashSet<u16> = self.state.fingers().iter().map(|f| f.slot).collect();
        (MIN_TEMPLATE_SLOT..=MAX_TEMPLATE_SLOT).find(|slot| !used.contains(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::sensor::DEFAULT_SENSOR_PIN;
    use crate::sensor::{share_sensor, SimHandle, SimLed, SimulatedSensor};
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    struct CountingDoor {
        opens: Arc<AtomicU32>,
        rings: Arc<AtomicU32>,
    }

    impl DoorSignal for CountingDoor {
        fn open_door(&mut self) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }
        fn ring_bell(&mut self) {
            self.rings.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        _tmp: TempDir,
        controller: Controller,
        state: Arc<ControlState>,
        sim: SimHandle,
        opens: Arc<AtomicU32>,
        rings: Arc<AtomicU32>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Mutex::new(
            SettingsStore::open(tmp.path().join("cfg")).unwrap(),
        ));
        let sensor = SimulatedSensor::new(DEFAULT_SENSOR_PIN);
        let sim = sensor.handle();
        let shared = share_sensor(sensor);
        let state = ControlState::new(EventLog::new());
        let opens = Arc::new(AtomicU32::new(0));
        let rings = Arc::new(AtomicU32::new(0));
        let door = Box::new(CountingDoor {
            opens: Arc::clone(&opens),
            rings: Arc::clone(&rings),
        });
        let mut controller = Controller::new(shared, store, Arc::clone(&state), door);
        controller.startup();

        Fixture {
            _tmp: tmp,
            controller,
            state,
            sim,
            opens,
            rings,
        }
    }

    fn found(slot: u16) -> Match {
        Match::Found {
            slot,
            name: format!("finger {}", slot),
            confidence: 80,
        }
    }

    #[test]
    fn startup_pairs_and_turns_the_ring_ready() {
        let f = fixture();
        assert!(f.state.sensor_connected());
        assert!(f.state.pairing_valid());
        assert_eq!(f.sim.led(), SimLed::Ready);
        assert_eq!(f.sim.pairing_code().len(), 32);
    }

    #[test]
    fn repeated_match_opens_the_door_once() {
        let mut f = fixture();
        f.sim.push_scan(found(3));
        f.sim.push_scan(found(3));

        f.controller.tick();
        f.controller.tick();

        assert_eq!(f.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lifting_and_rematching_opens_again() {
        let mut f = fixture();
        f.sim.push_scan(found(3));
        f.sim.push_scan(Match::NoFinger);
        f.sim.push_scan(found(3));

        f.controller.tick();
        f.controller.tick();
        f.controller.tick();

        assert_eq!(f.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_different_finger_overrides_the_debounce() {
        let mut f = fixture();
        f.sim.push_scan(found(3));
        f.sim.push_scan(found(4));

        f.controller.tick();
        f.controller.tick();

        assert_eq!(f.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn untrusted_pairing_keeps_the_door_closed() {
        let mut f = fixture();
        f.sim.swap_notepad("0".repeat(32));
        f.sim.push_scan(found(3));

        f.controller.tick();

        assert_eq!(f.opens.load(Ordering::SeqCst), 0);
        assert!(!f.state.pairing_valid());
        let messages: Vec<String> = f
            .state
            .events
            .recent()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages
            .iter()
            .any(|m| m.contains("pairing code mismatch")));
    }

    #[test]
    fn unknown_finger_rings_and_stages_an_enrollment() {
        let mut f = fixture();
        f.sim.push_scan(Match::NoMatch { code: 9 });

        f.controller.tick();
        assert_eq!(f.rings.load(Ordering::SeqCst), 1);
        assert_eq!(f.state.modes.current(), Mode::Enroll);

        f.controller.tick();
        assert_eq!(f.state.modes.current(), Mode::Scan);
        let fingers = f.state.fingers();
        assert_eq!(fingers.len(), 1);
        assert_eq!(fingers[0].slot, 1);
        assert_eq!(fingers[0].name, DEFAULT_ENROLL_NAME);
    }

    #[test]
    fn same_unknown_finger_rings_only_once() {
        let mut f = fixture();
        f.sim.push_scan(Match::NoMatch { code: 9 });
        f.sim.push_scan(Match::NoMatch { code: 9 });

        f.controller.tick();
        f.controller.tick(); // enroll tick
        f.controller.tick(); // second no-match, same finger

        assert_eq!(f.rings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_range_slots_never_reach_the_driver() {
        let mut f = fixture();
        let enrolls_before = f.sim.counts().enrolls;

        for slot in [0, 201, -1] {
            f.state.stage_enrollment(EnrollRequest {
                slot,
                name: "bad".into(),
            });
            f.controller.tick(); // scan tick flips to enroll
            f.controller.tick(); // enroll tick rejects locally
            assert_eq!(f.state.modes.current(), Mode::Scan);
        }

        assert_eq!(f.sim.counts().enrolls, enrolls_before);
        let messages: Vec<String> = f
            .state
            .events
            .recent()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.iter().any(|m| m.contains("out of range")));
    }

    #[test]
    fn boundary_slots_are_forwarded() {
        let mut f = fixture();

        for slot in [1, 200] {
            f.state.stage_enrollment(EnrollRequest {
                slot,
                name: format!("slot {}", slot),
            });
            f.controller.tick();
            f.controller.tick();
        }

        assert_eq!(f.sim.counts().enrolls, 2);
        let slots: Vec<u16> = f.state.fingers().iter().map(|r| r.slot).collect();
        assert_eq!(slots, vec![1, 200]);
    }

    #[test]
    fn failed_enrollment_reports_the_code_and_returns_to_scan() {
        let mut f = fixture();
        f.sim.fail_next_enroll(7);
        f.state.stage_enrollment(EnrollRequest {
            slot: 5,
            name: "left thumb".into(),
        });

        f.controller.tick();
        f.controller.tick();

        assert_eq!(f.state.modes.current(), Mode::Scan);
        assert!(f.state.fingers().is_empty());
        let messages: Vec<String> = f
            .state
            .events
            .recent()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.iter().any(|m| m.contains("failed (code 7)")));
    }

    #[test]
    fn auto_enroll_picks_the_lowest_free_slot() {
        let mut f = fixture();
        // Occupy slots 1 and 2 directly on the driver, then refresh.
        f.state.stage_enrollment(EnrollRequest { slot: 1, name: "a".into() });
        f.controller.tick();
        f.controller.tick();
        f.state.stage_enrollment(EnrollRequest { slot: 2, name: "b".into() });
        f.controller.tick();
        f.controller.tick();

        f.sim.push_scan(Match::NoMatch { code: 2 });
        f.controller.tick();
        f.controller.tick();

        let slots: Vec<u16> = f.state.fingers().iter().map(|r| r.slot).collect();
        assert_eq!(slots, vec![1, 2, 3]);
    }

    #[test]
    fn sensor_error_is_reported_but_not_acted_on() {
        let mut f = fixture();
        f.sim.push_scan(Match::Error { code: 33 });

        f.controller.tick();

        assert_eq!(f.opens.load(Ordering::SeqCst), 0);
        assert_eq!(f.rings.load(Ordering::SeqCst), 0);
        assert_eq!(f.state.modes.current(), Mode::Scan);
    }
}
