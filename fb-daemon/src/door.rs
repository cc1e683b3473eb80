//! Door actuation
//!
//! The controller reaches the physical world through the `DoorSignal` trait.
//! Two implementations ship here: a sysfs GPIO driver for a wired door
//! strike, and a log-only fallback for hosts without one. The chime and any
//! remote notification ride on the event feed, not on a wire.

use std::path::PathBuf;
use std::time::Duration;

use fb_core::DoorSignal;
use tracing::{info, warn};

/// How long the strike relay is held energized per visitor
const STRIKE_PULSE: Duration = Duration::from_millis(800);

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Door strike on a sysfs GPIO pin
pub struct GpioDoor {
    pin: u32,
    value_path: PathBuf,
}

impl GpioDoor {
    pub fn new(pin: u32) -> std::io::Result<Self> {
        let dir = PathBuf::from(format!("{}/gpio{}", GPIO_ROOT, pin));
        if !dir.exists() {
            std::fs::write(format!("{}/export", GPIO_ROOT), pin.to_string())?;
            // The gpioN directory appears asynchronously after export
            std::thread::sleep(Duration::from_millis(50));
        }

        std::fs::write(dir.join("direction"), "out")?;
        let value_path = dir.join("value");
        std::fs::write(&value_path, "0")?;

        Ok(Self { pin, value_path })
    }
}

impl DoorSignal for GpioDoor {
    fn open_door(&mut self) {
        info!("ACTION: open door (GPIO {}, {:?} pulse)", self.pin, STRIKE_PULSE);
        if let Err(e) = std::fs::write(&self.value_path, "1") {
            warn!("GPIO {} write failed: {}", self.pin, e);
            return;
        }
        std::thread::sleep(STRIKE_PULSE);
        if let Err(e) = std::fs::write(&self.value_path, "0") {
            warn!("GPIO {} release failed: {}", self.pin, e);
        }
    }

    fn ring_bell(&mut self) {
        // The chime is not wired through GPIO; the visitor announcement
        // rides on the event feed.
        info!("ACTION: ring bell");
    }
}

/// Log-only door for development hosts
pub struct LogDoor;

impl DoorSignal for LogDoor {
    fn open_door(&mut self) {
        info!("ACTION: open door (log only)");
    }

    fn ring_bell(&mut self) {
        info!("ACTION: ring bell (log only)");
    }
}
