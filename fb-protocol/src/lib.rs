use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Lowest template slot the sensor accepts
pub const MIN_TEMPLATE_SLOT: u16 = 1;

/// Highest template slot the sensor accepts
pub const MAX_TEMPLATE_SLOT: u16 = 200;

/// Maximum length of a finger display name
pub const MAX_FINGER_NAME_LENGTH: usize = 32;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    GetStatus,
    GetRecentEvents,
    ListFingers,
    /// Stage an enrollment; completion is reported through the event feed
    EnrollFinger { slot: i32, name: String },
    DeleteFinger { slot: i32 },
    DeleteAllFingers,
    /// Generate a fresh pairing code and push it to the sensor
    PairSensor,
    /// Clear persisted app settings and re-arm first-boot pairing
    FactoryReset,
}

/// Controller mode as reported over IPC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    /// Normal operation: the run loop polls the sensor for fingers
    Scan,
    /// One staged enrollment is being executed
    Enroll,
    /// An external actor holds exclusive sensor access
    Maintenance,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::GetStatus
            | Request::GetRecentEvents
            | Request::ListFingers
            | Request::DeleteAllFingers
            | Request::PairSensor
            | Request::FactoryReset => Ok(()),

            Request::EnrollFinger { slot, name } => {
                validate_template_slot(*slot)?;
                validate_finger_name(name)?;
                Ok(())
            }

            Request::DeleteFinger { slot } => validate_template_slot(*slot),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::GetStatus => "GetStatus",
            Request::GetRecentEvents => "GetRecentEvents",
            Request::ListFingers => "ListFingers",
            Request::EnrollFinger { .. } => "EnrollFinger",
            Request::DeleteFinger { .. } => "DeleteFinger",
            Request::DeleteAllFingers => "DeleteAllFingers",
            Request::PairSensor => "PairSensor",
            Request::FactoryReset => "FactoryReset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data - optional fields, only the relevant one is populated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Renamed on the wire: the envelope's `status` tag ("ok"/"error")
    /// already owns that key once the data is flattened in.
    #[serde(rename = "daemon_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<DaemonStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingers: Option<Vec<FingerEntry>>,
}

impl ResponseData {
    pub fn none() -> Self {
        Self::default()
    }
    pub fn string(v: String) -> Self {
        Self { value: Some(v), ..Self::default() }
    }
    pub fn daemon_status(s: DaemonStatus) -> Self {
        Self { status: Some(s), ..Self::default() }
    }
    pub fn event_list(e: Vec<EventEntry>) -> Self {
        Self { events: Some(e), ..Self::default() }
    }
    pub fn finger_list(f: Vec<FingerEntry>) -> Self {
        Self { fingers: Some(f), ..Self::default() }
    }
}

/// Snapshot of the controller state for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub mode: ControllerMode,
    pub sensor_connected: bool,
    pub pairing_valid: bool,
    pub finger_count: u32,
}

/// One entry from the controller event feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub ts_ms: u64,
    pub message: String,
}

/// One enrolled finger as reported by the sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerEntry {
    pub slot: u16,
    pub name: String,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

pub fn validate_template_slot(slot: i32) -> Result<(), String> {
    if slot < MIN_TEMPLATE_SLOT as i32 || slot > MAX_TEMPLATE_SLOT as i32 {
        return Err(format!(
            "Template slot out of range: {} (must be {}-{})",
            slot, MIN_TEMPLATE_SLOT, MAX_TEMPLATE_SLOT
        ));
    }
    Ok(())
}

pub fn validate_finger_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Finger name cannot be empty".into());
    }

    if name.len() > MAX_FINGER_NAME_LENGTH {
        return Err(format!(
            "Finger name too long: {} > {} chars",
            name.len(),
            MAX_FINGER_NAME_LENGTH
        ));
    }

    for c in name.chars() {
        if c.is_control() {
            return Err(format!("Finger name contains control character: {:?}", c));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_bounds_are_enforced() {
        assert!(validate_template_slot(0).is_err());
        assert!(validate_template_slot(-1).is_err());
        assert!(validate_template_slot(201).is_err());
        assert!(validate_template_slot(1).is_ok());
        assert!(validate_template_slot(200).is_ok());
    }

    #[test]
    fn finger_names_are_checked() {
        assert!(validate_finger_name("front door thumb").is_ok());
        assert!(validate_finger_name("").is_err());
        assert!(validate_finger_name("   ").is_err());
        assert!(validate_finger_name("bad\nname").is_err());
        assert!(validate_finger_name(&"x".repeat(MAX_FINGER_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn enroll_request_validates_both_fields() {
        assert!(Request::EnrollFinger { slot: 3, name: "thumb".into() }.validate().is_ok());
        assert!(Request::EnrollFinger { slot: 0, name: "thumb".into() }.validate().is_err());
        assert!(Request::EnrollFinger { slot: 3, name: "".into() }.validate().is_err());
    }

    fn response_round_trip(data: ResponseData) -> ResponseData {
        let env = ResponseEnvelope::new(5, Response::Ok(data));
        let json = serde_json::to_string(&env).unwrap();
        let back: ResponseEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 5);
        match back.response {
            Response::Ok(data) => data,
            Response::Error { message } => panic!("unexpected error response: {}", message),
        }
    }

    #[test]
    fn empty_and_string_responses_round_trip() {
        let back = response_round_trip(ResponseData::none());
        assert!(back.value.is_none() && back.status.is_none());

        let back = response_round_trip(ResponseData::string("pong".into()));
        assert_eq!(back.value.as_deref(), Some("pong"));
    }

    #[test]
    fn status_response_round_trips_alongside_the_ok_tag() {
        let env = ResponseEnvelope::new(
            8,
            Response::Ok(ResponseData::daemon_status(DaemonStatus {
                mode: ControllerMode::Maintenance,
                sensor_connected: true,
                pairing_valid: false,
                finger_count: 3,
            })),
        );
        let json = serde_json::to_string(&env).unwrap();

        // The envelope's "status" key carries the ok/error tag; the payload
        // rides under its own key.
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"daemon_status\""));

        let back: ResponseEnvelope = serde_json::from_str(&json).unwrap();
        match back.response {
            Response::Ok(data) => {
                let status = data.status.expect("status payload");
                assert_eq!(status.mode, ControllerMode::Maintenance);
                assert!(status.sensor_connected);
                assert!(!status.pairing_valid);
                assert_eq!(status.finger_count, 3);
            }
            Response::Error { message } => panic!("unexpected error response: {}", message),
        }
    }

    #[test]
    fn event_and_finger_lists_round_trip() {
        let back = response_round_trip(ResponseData::event_list(vec![EventEntry {
            ts_ms: 1234,
            message: "Ring the bell".into(),
        }]));
        let events = back.events.expect("events payload");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ts_ms, 1234);
        assert_eq!(events[0].message, "Ring the bell");

        let back = response_round_trip(ResponseData::finger_list(vec![FingerEntry {
            slot: 7,
            name: "front door thumb".into(),
        }]));
        let fingers = back.fingers.expect("fingers payload");
        assert_eq!(fingers.len(), 1);
        assert_eq!(fingers[0].slot, 7);
        assert_eq!(fingers[0].name, "front door thumb");
    }

    #[test]
    fn error_response_round_trips() {
        let env = ResponseEnvelope::new(3, Response::error("Controller busy"));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"status\":\"error\""));

        let back: ResponseEnvelope = serde_json::from_str(&json).unwrap();
        match back.response {
            Response::Error { message } => assert_eq!(message, "Controller busy"),
            Response::Ok(_) => panic!("expected an error response"),
        }
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let env = RequestEnvelope::with_id(Request::EnrollFinger { slot: 7, name: "left index".into() }, 42);
        let json = serde_json::to_string(&env).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 42);
        match back.request {
            Request::EnrollFinger { slot, name } => {
                assert_eq!(slot, 7);
                assert_eq!(name, "left index");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }
}
