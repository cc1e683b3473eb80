//! Controller mode and the maintenance handshake
//!
//! The run loop owns transitions between `Scan` and `Enroll`, and is the
//! only writer for the *entry* into `Maintenance`. An external actor asks
//! for the sensor with [`ModeControl::request_maintenance`]; the returned
//! [`MaintenanceGuard`] is the exclusive hold and ends it on drop. While
//! the hold exists the run loop makes no sensor, store, or pairing calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

/// Current controller mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Poll the sensor for fingers and gate the door
    Scan,
    /// Execute one staged enrollment, then return to scan
    Enroll,
    /// An external actor holds exclusive sensor access
    Maintenance,
}

struct ModeState {
    mode: Mode,
    /// Requests waiting for the run loop to yield; requesters remove
    /// their own entry on acquire or timeout
    pending_requests: u32,
    held: bool,
}

struct Shared {
    state: Mutex<ModeState>,
    changed: Condvar,
}

/// Cloneable handle over the shared mode state
#[derive(Clone)]
pub struct ModeControl {
    shared: Arc<Shared>,
}

impl ModeControl {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ModeState {
                    mode: Mode::Scan,
                    pending_requests: 0,
                    held: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn current(&self) -> Mode {
        self.shared.state.lock().mode
    }

    /// Number of maintenance requests not yet acquired or withdrawn
    pub fn pending_requests(&self) -> u32 {
        self.shared.state.lock().pending_requests
    }

    /// Ask the run loop to yield the sensor.
    ///
    /// Blocks until the loop parks in maintenance or `timeout` passes.
    /// On timeout the request is withdrawn and `None` returned, so the
    /// loop never parks for a requester that has given up.
    pub fn request_maintenance(&self, timeout: Duration) -> Option<MaintenanceGuard> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        state.pending_requests += 1;
        debug!(
            "CONTROL: maintenance requested (pending={})",
            state.pending_requests
        );

        loop {
            if state.mode == Mode::Maintenance && !state.held {
                state.held = true;
                state.pending_requests = state.pending_requests.saturating_sub(1);
                info!("CONTROL: maintenance hold acquired");
                return Some(MaintenanceGuard {
                    control: self.clone(),
                    released: false,
                });
            }

            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                state.pending_requests = state.pending_requests.saturating_sub(1);
                debug!("CONTROL: maintenance request timed out, withdrawn");
                return None;
            }
        }
    }

    /// Run-loop side: park in maintenance when a request is pending.
    ///
    /// Called once per tick after the mode work; returns true when the
    /// transition happened.
    pub(crate) fn apply_pending_maintenance(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.pending_requests > 0 && state.mode != Mode::Maintenance {
            state.mode = Mode::Maintenance;
            info!("CONTROL: entering maintenance mode");
            self.shared.changed.notify_all();
            return true;
        }
        false
    }

    /// Run-loop side: scan/enroll transitions
    pub(crate) fn set_mode(&self, mode: Mode) {
        let mut state = self.shared.state.lock();
        if state.mode != mode {
            debug!("CONTROL: mode {:?} -> {:?}", state.mode, mode);
            state.mode = mode;
        }
    }
}

impl Default for ModeControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive maintenance hold; ends on drop
pub struct MaintenanceGuard {
    control: ModeControl,
    released: bool,
}

impl MaintenanceGuard {
    /// End the hold and return the machine to scan
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.control.shared.state.lock();
        state.held = false;
        if state.mode == Mode::Maintenance {
            state.mode = Mode::Scan;
        }
        info!("CONTROL: maintenance hold released");
        // Queued requesters re-arm on the next run-loop tick.
        self.control.shared.changed.notify_all();
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Minimal stand-in for the run loop: applies pending requests until
    /// stopped.
    fn spawn_driver(control: ModeControl, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                control.apply_pending_maintenance();
                thread::sleep(Duration::from_millis(5));
            }
        })
    }

    #[test]
    fn request_times_out_and_withdraws_without_a_driver() {
        let control = ModeControl::new();
        let guard = control.request_maintenance(Duration::from_millis(50));
        assert!(guard.is_none());
        assert_eq!(control.pending_requests(), 0);
        assert_eq!(control.current(), Mode::Scan);
    }

    #[test]
    fn handshake_acquires_and_release_returns_to_scan() {
        let control = ModeControl::new();
        let stop = Arc::new(AtomicBool::new(false));
        let driver = spawn_driver(control.clone(), Arc::clone(&stop));

        let guard = control
            .request_maintenance(Duration::from_secs(2))
            .expect("driver should grant the hold");
        assert_eq!(control.current(), Mode::Maintenance);
        assert_eq!(control.pending_requests(), 0);

        drop(guard);
        assert_eq!(control.current(), Mode::Scan);

        stop.store(true, Ordering::Relaxed);
        driver.join().unwrap();
    }

    #[test]
    fn queued_requester_acquires_after_release() {
        let control = ModeControl::new();
        let stop = Arc::new(AtomicBool::new(false));
        let driver = spawn_driver(control.clone(), Arc::clone(&stop));

        let first = control
            .request_maintenance(Duration::from_secs(2))
            .expect("first hold");

        let second_control = control.clone();
        let second = thread::spawn(move || {
            second_control
                .request_maintenance(Duration::from_secs(2))
                .is_some()
        });

        thread::sleep(Duration::from_millis(50));
        drop(first);

        assert!(second.join().unwrap());
        stop.store(true, Ordering::Relaxed);
        driver.join().unwrap();
        assert_eq!(control.current(), Mode::Scan);
    }

    #[test]
    fn explicit_release_behaves_like_drop() {
        let control = ModeControl::new();
        let stop = Arc::new(AtomicBool::new(false));
        let driver = spawn_driver(control.clone(), Arc::clone(&stop));

        let guard = control
            .request_maintenance(Duration::from_secs(2))
            .expect("hold");
        guard.release();
        assert_eq!(control.current(), Mode::Scan);

        stop.store(true, Ordering::Relaxed);
        driver.join().unwrap();
    }
}
