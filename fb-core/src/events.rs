//! Controller event feed
//!
//! Fixed-capacity ring of the most recent human-readable events. UI
//! collaborators (web panel, MQTT bridge) consume this over IPC; every
//! entry is also echoed through `tracing` for the journal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::events::EVENT_LOG_CAPACITY;

/// One feed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts_ms: u64,
    pub message: String,
}

/// Cloneable handle over the shared ring
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Mutex<VecDeque<EventRecord>>>,
    capacity: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append an event, evicting the oldest entry when the ring is full
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        info!("EVENT: {}", message);

        let mut ring = self.inner.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(EventRecord {
            ts_ms: now_ms(),
            message,
        });
    }

    /// Recent events, newest first
    pub fn recent(&self) -> Vec<EventRecord> {
        self.inner.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
