//! Cast receiver selector - receiver selection for cast extensions.
//!
//! This library drives the UI in which a user picks a cast receiver. The UI
//! is either an in-process popup or a platform-native application reached
//! over native messaging; callers never depend on which one is active.
//!
//! # Architecture
//!
//! - **Manager**: Reads options on every `open()`, owns the one live session
//! - **Session**: Immutable snapshots moved through a small state machine
//! - **Backends**: Popup (direct calls) or native host (framed JSON over stdio)
//!
//! Key design principles:
//!
//! - At most one session per manager; a new `open()` closes the old one
//! - Selection and cast are separate signals
//! - Backend faults are normalized to an [`ErrorKind`] before they are published
//! - Every wait is bounded (handshake timeout, close grace period)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use receiver_selector::{OptionsStore, Receiver, SelectionOutcome, SelectorManager};
//!
//! #[tokio::main]
//! async fn main() -> receiver_selector::Result<()> {
//!     let manager = SelectorManager::new(Arc::new(OptionsStore::default()))
//!         .with_renderer(Arc::new(MyPopup::default()));
//!
//!     manager.on_cast_requested(|signal| println!("cast to {}", signal.receiver_id));
//!
//!     let tv = Receiver::new("r1", "TV", "10.0.0.5", 8009)?;
//!     let selection = manager.open(vec![tv]).await?;
//!
//!     if let SelectionOutcome::Selected(receiver) = selection.outcome().await {
//!         println!("Selected {}", receiver.friendly_name());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`selector`] | Manager, sessions and backends |
//! | [`options`] | Selector options and option store |
//! | [`receiver`] | Receiver records |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Native messaging envelope and framing |
//! | [`transport`] | Native host channel and process management |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions and receivers.
pub mod identifiers;

/// Selector options and the in-memory option store.
pub mod options;

/// Native messaging envelope and length-prefixed framing.
pub mod protocol;

/// Receiver records.
pub mod receiver;

/// Receiver selector manager, sessions and backends.
///
/// - [`SelectorManager`] - Single entry point
/// - [`SelectorSession`] - Session snapshot
/// - [`PopupSelector`] / [`NativeSelector`] - Backends
pub mod selector;

/// Native host transport.
///
/// Internal module handling the framed stdio channel and host processes.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, ErrorKind, Result};

// Identifier types
pub use identifiers::{ReceiverId, SessionId};

// Option types
pub use options::{
    CastPolicy, OptionsSource, OptionsStore, OptionsUpdated, SelectorKind, SelectorOptions,
};

// Receiver types
pub use receiver::Receiver;

// Selector types
pub use selector::{
    CastSignal, NativeSelector, PopupActions, PopupRenderer, PopupSelector, PopupView, Selection,
    SelectionOutcome, SelectorBackend, SelectorEvent, SelectorManager, SelectorSession,
    SessionStatus,
};

// Transport types
pub use transport::{HostLauncher, ProcessLauncher};
