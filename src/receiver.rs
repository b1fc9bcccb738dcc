//! Castable receiver records.
//!
//! Receivers are produced by the discovery collaborator and handed to a
//! selector session as a ready list. A [`Receiver`] is immutable once
//! constructed; the port is validated on construction and on deserialization.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "r1",
//!   "friendlyName": "Living Room TV",
//!   "host": "10.0.0.5",
//!   "port": 8009,
//!   "capabilities": { ... }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::ReceiverId;

// ============================================================================
// Receiver
// ============================================================================

/// A discoverable device that media can be cast to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReceiverRecord", into = "ReceiverRecord")]
pub struct Receiver {
    id: ReceiverId,
    friendly_name: String,
    host: String,
    port: u16,
    capabilities: Value,
}

impl Receiver {
    /// Creates a receiver with no capability metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `port` is zero.
    pub fn new(
        id: impl Into<ReceiverId>,
        friendly_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self> {
        if port == 0 {
            return Err(Error::protocol("Receiver port must be in 1..=65535"));
        }

        Ok(Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            host: host.into(),
            port,
            capabilities: Value::Null,
        })
    }

    /// Attaches opaque capability metadata.
    #[inline]
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Returns the receiver id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ReceiverId {
        &self.id
    }

    /// Returns the human-readable name.
    #[inline]
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Returns the network host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the network port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the `host:port` address string shown under the name.
    #[inline]
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the capability metadata.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Value {
        &self.capabilities
    }
}

// ============================================================================
// ReceiverRecord
// ============================================================================

/// Wire form of a receiver, validated into [`Receiver`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiverRecord {
    id: ReceiverId,
    friendly_name: String,
    host: String,
    port: u32,
    #[serde(default)]
    capabilities: Value,
}

impl TryFrom<ReceiverRecord> for Receiver {
    type Error = Error;

    fn try_from(record: ReceiverRecord) -> Result<Self> {
        let port = u16::try_from(record.port)
            .map_err(|_| Error::protocol(format!("Receiver port out of range: {}", record.port)))?;

        Ok(Self::new(record.id, record.friendly_name, record.host, port)?
            .with_capabilities(record.capabilities))
    }
}

impl From<Receiver> for ReceiverRecord {
    fn from(receiver: Receiver) -> Self {
        Self {
            id: receiver.id,
            friendly_name: receiver.friendly_name,
            host: receiver.host,
            port: u32::from(receiver.port),
            capabilities: receiver.capabilities,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
