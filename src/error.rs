//! # Error Taxonomy and Status Codes
//!
//! This module defines the uniform status enum shared by the wire protocol and
//! the client-facing error type. Every non-success reply a server ever sends,
//! and every failure a client proxy ever raises, is described by exactly one
//! `Status` plus a human message.
//!
//! ## Design
//!
//! - **Status** mirrors the terminal status values carried on the wire in a
//!   reply envelope's `status` byte (see the envelope module).
//! - **RpcError** is the boundary type: the client proxy, the component
//!   runtime, and CRM method implementations all communicate failures through
//!   it. Internal plumbing (I/O, encoding) uses `anyhow::Result` with `?` and
//!   is converted to an `RpcError` only at the points that cross a protocol
//!   boundary.

use thiserror::Error;

/// Terminal status values exchanged on the wire and surfaced to callers.
///
/// Values 1-4 are used in call replies. `BUSY` (5) is reserved for CRMs that
/// opt into reporting backpressure. `IDLE` (6) and `PENDING` (7) describe
/// long-lived server states and never appear in a call reply produced by this
/// crate, but are reserved by the wire format so future server introspection
/// calls can reuse the same byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Unknown = 0,
    Success = 1,
    ErrorInvalid = 2,
    ErrorTimeout = 3,
    ErrorUnavailable = 4,
    Busy = 5,
    Idle = 6,
    Pending = 7,
}

impl Status {
    /// Decode a wire byte into a `Status`, defaulting to `Unknown` for any
    /// value outside the terminal enum rather than failing -- an unrecognized
    /// status from a newer peer should not itself become a hard decode error.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            1 => Status::Success,
            2 => Status::ErrorInvalid,
            3 => Status::ErrorTimeout,
            4 => Status::ErrorUnavailable,
            5 => Status::Busy,
            6 => Status::Idle,
            7 => Status::Pending,
            _ => Status::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Unknown => "UNKNOWN",
            Status::Success => "SUCCESS",
            Status::ErrorInvalid => "ERROR_INVALID",
            Status::ErrorTimeout => "ERROR_TIMEOUT",
            Status::ErrorUnavailable => "ERROR_UNAVAILABLE",
            Status::Busy => "BUSY",
            Status::Idle => "IDLE",
            Status::Pending => "PENDING",
        };
        write!(f, "{}", s)
    }
}

/// Structured error carried across the client/server boundary.
///
/// Every non-success status a caller observes -- whether it originated on the
/// wire as a reply or was raised locally (pool exhaustion, unknown scheme) --
/// is represented by this single type, per the error taxonomy's "no partial
/// results" rule.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message} (address={address}, method={method_name})")]
pub struct RpcError {
    pub status: Status,
    pub message: String,
    pub address: String,
    pub method_name: String,
}

impl RpcError {
    pub fn new(
        status: Status,
        message: impl Into<String>,
        address: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            address: address.into(),
            method_name: method_name.into(),
        }
    }

    /// Construct an `ERROR_INVALID` with no address/method context, for use
    /// during registration and decode paths that run before any call exists.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(Status::ErrorInvalid, message, "", "")
    }

    pub fn timeout(message: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(Status::ErrorTimeout, message, address, "")
    }

    pub fn unavailable(message: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(Status::ErrorUnavailable, message, address, "")
    }

    /// Attach address/method context to an error that was constructed
    /// without it (e.g. by the envelope codec, which has no notion of the
    /// call's address).
    pub fn with_context(mut self, address: &str, method_name: &str) -> Self {
        if self.address.is_empty() {
            self.address = address.to_string();
        }
        if self.method_name.is_empty() {
            self.method_name = method_name.to_string();
        }
        self
    }
}

/// Converts a transport-layer I/O failure into the uniform taxonomy.
///
/// Per the failure policy, a transport error while sending or receiving
/// always surfaces to the caller as `ERROR_UNAVAILABLE`, never as a raw I/O
/// error.
impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::new(Status::ErrorUnavailable, e.to_string(), "", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_round_trip_for_terminal_values() {
        for &status in &[
            Status::Success,
            Status::ErrorInvalid,
            Status::ErrorTimeout,
            Status::ErrorUnavailable,
            Status::Busy,
            Status::Idle,
            Status::Pending,
        ] {
            assert_eq!(Status::from_wire(status.to_wire()), status);
        }
    }

    #[test]
    fn unrecognized_wire_byte_becomes_unknown() {
        assert_eq!(Status::from_wire(200), Status::Unknown);
    }

    #[test]
    fn rpc_error_display_includes_all_fields() {
        let e = RpcError::new(Status::ErrorInvalid, "interface mismatch", "tcp://h:1", "echo");
        let rendered = e.to_string();
        assert!(rendered.contains("ERROR_INVALID"));
        assert!(rendered.contains("interface mismatch"));
        assert!(rendered.contains("tcp://h:1"));
        assert!(rendered.contains("echo"));
    }
}
