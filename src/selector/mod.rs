//! Receiver selector sessions and backends.
//!
//! This module owns the selection lifecycle: a [`SelectorManager`] opens
//! one [`SelectorSession`] at a time on either the in-process popup or the
//! native host backend.
//!
//! # Session Lifecycle
//!
//! ```text
//! Closed ─open─► Opening ─ready─► Open ─select─► Selecting ─cast─► Casting ─ack─► Closed
//!                   │               │                │
//!                   └──fail──► Errored ◄──disconnect─┘
//!                                   Open/Selecting ─cancel─► Cancelled
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `session` | Immutable session snapshots and transitions |
//! | `backend` | Backend contract and action validation |
//! | `popup` | In-process popup backend |
//! | `native` | Native host backend |
//! | `manager` | Single entry point and event surface |

// ============================================================================
// Submodules
// ============================================================================

/// Backend contract and action validation.
pub mod backend;

/// Session manager and event surface.
pub mod manager;

/// Native host backend.
pub mod native;

/// In-process popup backend.
pub mod popup;

/// Session state machine.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{ActionGate, BackendEvent, EventSink, SelectorBackend};
pub use manager::{Selection, SelectionOutcome, SelectorEvent, SelectorManager};
pub use native::NativeSelector;
pub use popup::{PopupActions, PopupRenderer, PopupSelector, PopupView};
pub use session::{CastSignal, SelectorSession, SessionStatus};
