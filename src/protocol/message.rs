//! Native message envelope and typed subjects.
//!
//! Every unit exchanged with the native host is a [`NativeMessage`]:
//!
//! ```json
//! { "subject": "receiverSelector:selected", "data": "r1" }
//! ```
//!
//! Outbound messages are built from [`OutboundMessage`]; inbound envelopes
//! are parsed into [`InboundMessage`]. Unknown inbound subjects parse to
//! `None` so newer hosts can add subjects without breaking older extensions.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::ReceiverId;
use crate::receiver::Receiver;

// ============================================================================
// Subjects
// ============================================================================

/// Subject names used by the receiver selector.
pub mod subject {
    /// Extension → host: receiver list and localized labels.
    pub const INITIALIZE: &str = "receiverSelector:initialize";
    /// Host → extension: handshake acknowledgment.
    pub const READY: &str = "receiverSelector:ready";
    /// Extension → host: replacement receiver list.
    pub const UPDATE: &str = "receiverSelector:update";
    /// Host → extension: user picked a receiver.
    pub const SELECTED: &str = "receiverSelector:selected";
    /// Host → extension: user pressed cast.
    pub const CAST: &str = "receiverSelector:cast";
    /// Both directions: selector closed.
    pub const CLOSE: &str = "receiverSelector:close";
    /// Host → extension: host-side failure.
    pub const ERROR: &str = "receiverSelector:error";
}

// ============================================================================
// NativeMessage
// ============================================================================

/// Wire envelope exchanged with the native host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeMessage {
    /// Message subject.
    pub subject: String,

    /// Subject-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl NativeMessage {
    /// Creates a message with a payload.
    #[inline]
    #[must_use]
    pub fn new(subject: impl Into<String>, data: Value) -> Self {
        Self {
            subject: subject.into(),
            data,
        }
    }

    /// Creates a message without payload.
    #[inline]
    #[must_use]
    pub fn bare(subject: impl Into<String>) -> Self {
        Self::new(subject, Value::Null)
    }
}

// ============================================================================
// OutboundMessage
// ============================================================================

/// Messages the extension sends to the native host.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Handshake carrying the full receiver list.
    Initialize {
        /// Receivers to show.
        receivers: Vec<Receiver>,
        /// Localized cast button label.
        cast_button_title: String,
    },
    /// Replacement receiver list.
    Update {
        /// Receivers to show.
        receivers: Vec<Receiver>,
    },
    /// Ask the host to close its UI.
    Close,
}

impl OutboundMessage {
    /// Returns the wire subject.
    #[must_use]
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => subject::INITIALIZE,
            Self::Update { .. } => subject::UPDATE,
            Self::Close => subject::CLOSE,
        }
    }

    /// Converts into a wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a receiver fails to serialize.
    pub fn into_message(self) -> Result<NativeMessage> {
        let subject = self.subject();
        let data = match self {
            Self::Initialize {
                receivers,
                cast_button_title,
            } => json!({
                "receivers": serde_json::to_value(receivers)?,
                "i18n_castButtonTitle": cast_button_title,
            }),
            Self::Update { receivers } => serde_json::to_value(receivers)?,
            Self::Close => Value::Null,
        };

        Ok(NativeMessage::new(subject, data))
    }
}

// ============================================================================
// InboundMessage
// ============================================================================

/// Messages the native host sends to the extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Handshake acknowledged; the UI is showing.
    Ready,
    /// User picked a receiver.
    Selected(ReceiverId),
    /// User pressed cast on a receiver.
    Cast(ReceiverId),
    /// User closed the UI.
    Close,
    /// Host-side failure.
    Error(String),
}

impl InboundMessage {
    /// Parses an inbound envelope.
    ///
    /// Returns `Ok(None)` for subjects this crate does not know.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a known subject carries a payload of
    /// the wrong shape.
    pub fn parse(message: &NativeMessage) -> Result<Option<Self>> {
        let parsed = match message.subject.as_str() {
            subject::READY => Self::Ready,
            subject::SELECTED => Self::Selected(receiver_id_from(&message.data)?),
            subject::CAST => Self::Cast(receiver_id_from(&message.data)?),
            subject::CLOSE => Self::Close,
            subject::ERROR => Self::Error(
                message
                    .data
                    .as_str()
                    .ok_or_else(|| Error::protocol("Error payload must be a string"))?
                    .to_string(),
            ),
            _ => return Ok(None),
        };

        Ok(Some(parsed))
    }

    /// Returns the receiver id this message refers to, if any.
    #[inline]
    #[must_use]
    pub fn receiver_id(&self) -> Option<&ReceiverId> {
        match self {
            Self::Selected(id) | Self::Cast(id) => Some(id),
            _ => None,
        }
    }
}

/// Extracts a receiver id from a bare string or a receiver-shaped object.
fn receiver_id_from(data: &Value) -> Result<ReceiverId> {
    let id = match data {
        Value::String(id) => Some(id.as_str()),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        _ => None,
    };

    match id {
        Some(id) if !id.is_empty() => Ok(ReceiverId::new(id)),
        _ => Err(Error::protocol("Expected receiver id in payload")),
    }
}

// ============================================================================
// Tests
// ============================================================================
