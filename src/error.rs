//! Error types for the receiver selector.
//!
//! This module defines all error types used throughout the crate, and the
//! coarse [`ErrorKind`] taxonomy every error is normalized to before it
//! reaches the manager's event surface.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use receiver_selector::{Result, SelectorManager};
//!
//! async fn example(manager: &SelectorManager, receivers: Vec<Receiver>) -> Result<()> {
//!     let selection = manager.open(receivers).await?;
//!     let outcome = selection.outcome().await;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Kind | Variants |
//! |------|----------|
//! | Config | [`Error::Config`] |
//! | LaunchFailure | [`Error::LaunchFailed`], [`Error::HandshakeTimeout`] |
//! | Disconnect | [`Error::ConnectionClosed`], [`Error::Backend`], [`Error::Io`], [`Error::ChannelClosed`] |
//! | InvalidMessage | [`Error::Protocol`], [`Error::StaleReceiver`], [`Error::Json`] |
//! | Misuse | [`Error::SessionActive`], [`Error::InvalidTransition`], [`Error::NoActiveSession`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::ReceiverId;
use crate::selector::SessionStatus;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ErrorKind
// ============================================================================

/// Coarse error taxonomy surfaced to callers.
///
/// The `Display` form is the bare kind name, which is what
/// [`SelectorEvent::Error`](crate::SelectorEvent::Error) listeners see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid option values.
    Config,
    /// The backend could not start or never acknowledged the handshake.
    LaunchFailure,
    /// The backend went away mid-session.
    Disconnect,
    /// Malformed or stale inbound message. Logged and dropped.
    InvalidMessage,
    /// Caller bug, e.g. opening a session that is still live.
    Misuse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "Config",
            Self::LaunchFailure => "LaunchFailure",
            Self::Disconnect => "Disconnect",
            Self::InvalidMessage => "InvalidMessage",
            Self::Misuse => "Misuse",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when selector options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Launch Errors
    // ========================================================================
    /// Backend failed to start.
    ///
    /// Returned when the popup cannot be rendered or the native host
    /// process cannot be spawned.
    #[error("Failed to launch selector: {message}")]
    LaunchFailed {
        /// Description of the launch failure.
        message: String,
    },

    /// Native host did not acknowledge the handshake in time.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Native channel closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The backend reported an error of its own.
    #[error("Backend error: {message}")]
    Backend {
        /// Message reported by the backend.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or malformed payload.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Inbound message referenced a receiver that is not in the active list.
    #[error("Unknown receiver: {receiver_id}")]
    StaleReceiver {
        /// The unknown receiver id.
        receiver_id: ReceiverId,
    },

    // ========================================================================
    // Misuse Errors
    // ========================================================================
    /// `open()` was called on a session that has not terminated.
    #[error("Session is still active (status: {status})")]
    SessionActive {
        /// Status of the live session.
        status: SessionStatus,
    },

    /// Event is not allowed from the current status.
    #[error("Invalid transition: {event} while {from}")]
    InvalidTransition {
        /// Status the session was in.
        from: SessionStatus,
        /// Name of the rejected event.
        event: &'static str,
    },

    /// Operation requires an active session.
    #[error("No active session")]
    NoActiveSession,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a launch failure error.
    #[inline]
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates a backend error.
    #[inline]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a stale receiver error.
    #[inline]
    pub fn stale_receiver(receiver_id: ReceiverId) -> Self {
        Self::StaleReceiver { receiver_id }
    }

    /// Creates an invalid transition error.
    #[inline]
    pub fn invalid_transition(from: SessionStatus, event: &'static str) -> Self {
        Self::InvalidTransition { from, event }
    }
}

// ============================================================================
// Error Classification
// ============================================================================

impl Error {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::LaunchFailed { .. } | Self::HandshakeTimeout { .. } => ErrorKind::LaunchFailure,
            Self::ConnectionClosed
            | Self::Backend { .. }
            | Self::Io(_)
            | Self::ChannelClosed(_) => ErrorKind::Disconnect,
            Self::Protocol { .. } | Self::StaleReceiver { .. } | Self::Json(_) => {
                ErrorKind::InvalidMessage
            }
            Self::SessionActive { .. }
            | Self::InvalidTransition { .. }
            | Self::NoActiveSession => ErrorKind::Misuse,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. })
    }

    /// Returns `true` if this error means the backend is gone.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Disconnect
    }

    /// Returns `true` if this is a caller bug.
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        self.kind() == ErrorKind::Misuse
    }
}

// ============================================================================
// Tests
// ============================================================================
