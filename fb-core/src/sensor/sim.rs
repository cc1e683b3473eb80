//! Software stand-in for the fingerprint sensor.
//!
//! Backs `--simulate` runs and the test suite. Behavior is scripted through
//! a [`SimHandle`]: queue scan outcomes, swap the notepad contents to model
//! a substituted sensor, fail reads to model serial glitches, and inspect
//! call counts afterwards.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{EnrollOutcome, FingerRecord, FingerprintSensor, Match};
use crate::constants::sensor::DEFAULT_SENSOR_PIN;

/// LED ring state last commanded by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimLed {
    Off,
    Ready,
    Error,
    WifiConfig,
}

/// Per-method call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorCallCounts {
    pub scans: u32,
    pub enrolls: u32,
    pub deletes: u32,
    pub pairing_reads: u32,
    pub pairing_writes: u32,
    pub template_lists: u32,
}

struct SimState {
    expected_pin: String,
    accept_connect: bool,
    connected: bool,
    pairing_code: String,
    refuse_pairing_writes: bool,
    fail_pairing_reads: bool,
    templates: BTreeMap<u16, String>,
    scans: VecDeque<Match>,
    idle_scan: Match,
    finger_on_window: bool,
    enroll_fail_code: Option<u8>,
    led: SimLed,
    counts: SensorCallCounts,
}

impl SimState {
    fn new() -> Self {
        Self {
            expected_pin: DEFAULT_SENSOR_PIN.to_string(),
            accept_connect: true,
            connected: false,
            pairing_code: String::new(),
            refuse_pairing_writes: false,
            fail_pairing_reads: false,
            templates: BTreeMap::new(),
            scans: VecDeque::new(),
            idle_scan: Match::NoFinger,
            finger_on_window: false,
            enroll_fail_code: None,
            led: SimLed::Off,
            counts: SensorCallCounts::default(),
        }
    }
}

/// Simulated driver honoring the credential it is constructed with
pub struct SimulatedSensor {
    pin: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSensor {
    /// Create a sensor that will be connected with `pin`
    pub fn new(pin: impl Into<String>) -> Self {
        Self {
            pin: pin.into(),
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Scripting/inspection handle sharing this sensor's state
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl FingerprintSensor for SimulatedSensor {
    fn connect(&mut self) -> bool {
        let mut state = self.state.lock();
        state.connected = state.accept_connect && state.expected_pin == self.pin;
        if !state.connected {
            debug!("SIM: connect refused (pin or link)");
        }
        state.connected
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn finger_present(&mut self) -> bool {
        self.state.lock().finger_on_window
    }

    fn scan(&mut self) -> Match {
        let mut state = self.state.lock();
        state.counts.scans += 1;
        match state.scans.pop_front() {
            Some(outcome) => outcome,
            None => state.idle_scan.clone(),
        }
    }

    fn enroll(&mut self, slot: u16, name: &str) -> EnrollOutcome {
        let mut state = self.state.lock();
        state.counts.enrolls += 1;
        if let Some(code) = state.enroll_fail_code.take() {
            return EnrollOutcome::Failed { code };
        }
        state.templates.insert(slot, name.to_string());
        EnrollOutcome::Success
    }

    fn delete(&mut self, slot: u16) -> bool {
        let mut state = self.state.lock();
        state.counts.deletes += 1;
        state.templates.remove(&slot).is_some()
    }

    fn delete_all(&mut self) -> bool {
        let mut state = self.state.lock();
        state.counts.deletes += 1;
        state.templates.clear();
        true
    }

    fn templates(&mut self) -> Vec<FingerRecord> {
        let mut state = self.state.lock();
        state.counts.template_lists += 1;
        state
            .templates
            .iter()
            .map(|(&slot, name)| FingerRecord {
                slot,
                name: name.clone(),
            })
            .collect()
    }

    fn pairing_code(&mut self) -> String {
        let mut state = self.state.lock();
        state.counts.pairing_reads += 1;
        if state.fail_pairing_reads {
            return String::new();
        }
        state.pairing_code.clone()
    }

    fn set_pairing_code(&mut self, code: &str) -> bool {
        let mut state = self.state.lock();
        state.counts.pairing_writes += 1;
        if state.refuse_pairing_writes {
            return false;
        }
        state.pairing_code = code.to_string();
        true
    }

    fn led_ready(&mut self) {
        self.state.lock().led = SimLed::Ready;
    }

    fn led_error(&mut self) {
        self.state.lock().led = SimLed::Error;
    }

    fn led_wifi_config(&mut self) {
        self.state.lock().led = SimLed::WifiConfig;
    }

    fn led_off(&mut self) {
        self.state.lock().led = SimLed::Off;
    }
}

/// Cloneable scripting handle; stays valid after the sensor is boxed away
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Queue one scan outcome
    pub fn push_scan(&self, outcome: Match) {
        self.state.lock().scans.push_back(outcome);
    }

    /// Outcome returned when the scan queue is empty (default `NoFinger`)
    pub fn set_idle_scan(&self, outcome: Match) {
        self.state.lock().idle_scan = outcome;
    }

    /// Overwrite the notepad behind the controller's back, as a swapped-in
    /// replacement sensor would present
    pub fn swap_notepad(&self, code: impl Into<String>) {
        self.state.lock().pairing_code = code.into();
    }

    /// Make notepad reads return empty, as a serial glitch would
    pub fn fail_pairing_reads(&self, fail: bool) {
        self.state.lock().fail_pairing_reads = fail;
    }

    pub fn refuse_pairing_writes(&self, refuse: bool) {
        self.state.lock().refuse_pairing_writes = refuse;
    }

    pub fn set_finger_on_window(&self, present: bool) {
        self.state.lock().finger_on_window = present;
    }

    /// Change the credential the sensor expects at connect
    pub fn set_expected_pin(&self, pin: impl Into<String>) {
        self.state.lock().expected_pin = pin.into();
    }

    /// Refuse the next connect attempt
    pub fn set_link_down(&self, down: bool) {
        let mut state = self.state.lock();
        state.accept_connect = !down;
        if down {
            state.connected = false;
        }
    }

    /// Fail the next enrollment with `code`
    pub fn fail_next_enroll(&self, code: u8) {
        self.state.lock().enroll_fail_code = Some(code);
    }

    pub fn pairing_code(&self) -> String {
        self.state.lock().pairing_code.clone()
    }

    pub fn template_names(&self) -> Vec<(u16, String)> {
        self.state
            .lock()
            .templates
            .iter()
            .map(|(&slot, name)| (slot, name.clone()))
            .collect()
    }

    pub fn led(&self) -> SimLed {
        self.state.lock().led
    }

    pub fn counts(&self) -> SensorCallCounts {
        self.state.lock().counts
    }
}
