//! Daemon client
//!
//! Communicates with fingerbelld over its Unix socket. UI collaborators
//! (web panel, provisioning tooling) drive the daemon through this; the
//! integration tests use it to exercise the full IPC path.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use fb_error::{FingerbellError, Result};
use fb_protocol::{Request, RequestEnvelope, Response, ResponseEnvelope, MAX_MESSAGE_SIZE};

use crate::constants::paths;

const TIMEOUT_MS: u64 = 5000;

/// Synchronous client for the daemon socket
pub struct DaemonClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    /// Connect to the daemon at `socket_path`
    pub fn connect(socket_path: &str) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).map_err(|e| {
            FingerbellError::DaemonConnection(format!(
                "Failed to connect to daemon at {}: {}",
                socket_path, e
            ))
        })?;

        let reader_stream = stream.try_clone().map_err(|e| {
            FingerbellError::DaemonConnection(format!(
                "Failed to clone daemon socket for reader: {}",
                e
            ))
        })?;

        for s in [&stream, &reader_stream] {
            s.set_read_timeout(Some(Duration::from_millis(TIMEOUT_MS)))
                .map_err(|e| {
                    FingerbellError::DaemonConnection(format!("Failed to set read timeout: {}", e))
                })?;
            s.set_write_timeout(Some(Duration::from_millis(TIMEOUT_MS)))
                .map_err(|e| {
                    FingerbellError::DaemonConnection(format!("Failed to set write timeout: {}", e))
                })?;
        }

        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    /// Connect using the resolved default socket path
    pub fn connect_default() -> Result<Self> {
        Self::connect(&paths::default_socket_path())
    }

    /// Send one request and wait for the matching response
    pub fn request(&mut self, request: Request) -> Result<Response> {
        request.validate().map_err(FingerbellError::DaemonRequest)?;

        let envelope = RequestEnvelope::new(request);
        let expected_id = envelope.id;

        let mut payload = serde_json::to_string(&envelope)?;
        payload.push('\n');
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(FingerbellError::MessageTooLarge {
                size: payload.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.writer.write_all(payload.as_bytes()).map_err(|e| {
            FingerbellError::DaemonConnection(format!("Failed to send request: {}", e))
        })?;
        self.writer.flush().map_err(|e| {
            FingerbellError::DaemonConnection(format!("Failed to flush request: {}", e))
        })?;

        let mut line = String::with_capacity(256);
        let n = self.reader.read_line(&mut line).map_err(|e| {
            FingerbellError::DaemonResponse(format!("Failed to read response: {}", e))
        })?;
        if n == 0 {
            return Err(FingerbellError::DaemonResponse(
                "Daemon closed the connection".into(),
            ));
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(FingerbellError::MessageTooLarge {
                size: line.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        let envelope: ResponseEnvelope = serde_json::from_str(line.trim())?;
        if envelope.id != expected_id {
            return Err(FingerbellError::DaemonResponse(format!(
                "Response id {} does not match request id {}",
                envelope.id, expected_id
            )));
        }

        Ok(envelope.response)
    }

    /// Quick liveness probe
    pub fn ping(&mut self) -> bool {
        matches!(self.request(Request::Ping), Ok(Response::Ok(_)))
    }
}

/// Whether a daemon is answering on `socket_path`
pub fn is_daemon_available(socket_path: &str) -> bool {
    match DaemonClient::connect(socket_path) {
        Ok(mut client) => client.ping(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_missing_socket_fails_cleanly() {
        let result = DaemonClient::connect("/nonexistent/fingerbelld.sock");
        assert!(matches!(
            result.err(),
            Some(FingerbellError::DaemonConnection(_))
        ));
    }

    #[test]
    fn daemon_unavailable_on_missing_socket() {
        assert!(!is_daemon_available("/nonexistent/fingerbelld.sock"));
    }
}
