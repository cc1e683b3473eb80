//! Controller loop host
//!
//! The controller is synchronous: sensor traffic and settings writes are
//! blocking, so the loop runs on a dedicated thread instead of the async
//! runtime. Each tick returns the pace until the next one; the pause is
//! sliced so shutdown stays responsive even during the long disconnected
//! retry backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fb_core::Controller;
use tracing::info;

/// Largest single sleep between shutdown checks
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

pub fn run(mut controller: Controller, shutdown: Arc<AtomicBool>) {
    controller.startup();
    info!("CONTROL: run loop started");

    while !shutdown.load(Ordering::SeqCst) {
        let pace = controller.tick();
        pause(pace, &shutdown);
    }

    info!("CONTROL: run loop stopped");
}

fn pause(total: Duration, shutdown: &AtomicBool) {
    let mut left = total;
    while !left.is_zero() && !shutdown.load(Ordering::SeqCst) {
        let nap = left.min(SHUTDOWN_POLL);
        std::thread::sleep(nap);
        left = left.saturating_sub(nap);
    }
}
