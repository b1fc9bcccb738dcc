//! Native messaging protocol types.
//!
//! This module defines the message format exchanged between the extension
//! (local end) and the native selector application (remote end).
//!
//! # Protocol Overview
//!
//! | Subject | Direction | Payload |
//! |---------|-----------|---------|
//! | `receiverSelector:initialize` | Local → Remote | receivers + cast button label |
//! | `receiverSelector:ready` | Remote → Local | none (handshake ack) |
//! | `receiverSelector:update` | Local → Remote | receiver list |
//! | `receiverSelector:selected` | Remote → Local | receiver id |
//! | `receiverSelector:cast` | Remote → Local | receiver id |
//! | `receiverSelector:close` | Both | none |
//! | `receiverSelector:error` | Remote → Local | message string |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Length-prefixed JSON framing |
//! | `message` | Envelope and typed subjects |

// ============================================================================
// Submodules
// ============================================================================

/// Length-prefixed JSON framing.
pub mod codec;

/// Envelope and typed subjects.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{MAX_INBOUND_FRAME, decode_body, encode_frame, read_frame, write_frame};
pub use message::{InboundMessage, NativeMessage, OutboundMessage, subject};
