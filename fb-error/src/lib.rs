//! Unified error handling for Fingerbell
//!
//! This crate provides a single error type used across all Fingerbell components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FingerbellError
pub type Result<T> = std::result::Result<T, FingerbellError>;

/// Unified error type for all Fingerbell operations
#[derive(thiserror::Error, Debug)]
pub enum FingerbellError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Settings Store Errors
    // ============================================================================
    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid settings value for {field}: {reason}")]
    InvalidSetting {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Sensor Driver Errors
    // ============================================================================
    #[error("Sensor not connected")]
    SensorNotConnected,

    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Sensor pairing failed: {0}")]
    Pairing(String),

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Invalid template slot: {slot} (must be 1-200)")]
    InvalidSlot {
        slot: i32,
    },

    #[error("Invalid finger name: {0}")]
    InvalidFingerName(String),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon not available")]
    DaemonNotAvailable,

    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon request failed: {0}")]
    DaemonRequest(String),

    #[error("Daemon response error: {0}")]
    DaemonResponse(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl FingerbellError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a settings error from a string
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Create a sensor error from a string
    pub fn sensor(msg: impl Into<String>) -> Self {
        Self::Sensor(msg.into())
    }

    /// Create a daemon error from a string
    pub fn daemon(msg: impl Into<String>) -> Self {
        Self::DaemonRequest(msg.into())
    }

    /// Create a timeout error from a string
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}

// Allow converting from String to FingerbellError
impl From<String> for FingerbellError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FingerbellError
impl From<&str> for FingerbellError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
