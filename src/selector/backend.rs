//! Backend capability contract.
//!
//! Both the in-process popup and the native host implement
//! [`SelectorBackend`]. User actions flow back to the session as
//! [`BackendEvent`]s on an unbounded queue, which serializes them with the
//! owner's commands.
//!
//! [`ActionGate`] is the shared debounce/validation point at the backend
//! boundary: it rejects ids outside the current receiver list and drops a
//! second selection or cast once the first was accepted.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::ReceiverId;
use crate::options::SelectorKind;
use crate::receiver::Receiver;

use super::session::SessionStatus;

// ============================================================================
// BackendEvent
// ============================================================================

/// User action or fault reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// User picked a receiver.
    Selected(ReceiverId),
    /// User dropped the pending selection.
    Deselected,
    /// User pressed cast.
    CastRequested(ReceiverId),
    /// User dismissed the UI.
    Cancelled,
    /// Backend went away or reported a fault.
    Disconnected {
        /// Backend-provided detail, for logs only.
        reason: Option<String>,
    },
}

/// Queue backends report events on.
pub type EventSink = mpsc::UnboundedSender<BackendEvent>;

// ============================================================================
// SelectorBackend
// ============================================================================

/// A concrete receiver selector UI.
///
/// The session never depends on which implementation is active.
#[async_trait]
pub trait SelectorBackend: Send {
    /// Returns which backend this is.
    fn kind(&self) -> SelectorKind;

    /// Shows the UI with `receivers`.
    ///
    /// Resolves once the UI is ready. Events are reported on `events` from
    /// then on.
    ///
    /// # Errors
    ///
    /// Returns an error of kind
    /// [`LaunchFailure`](crate::ErrorKind::LaunchFailure) if the UI
    /// could not be shown.
    async fn launch(&mut self, receivers: &[Receiver], events: EventSink) -> Result<()>;

    /// Replaces the receivers shown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the backend is gone.
    async fn update_receivers(&mut self, receivers: &[Receiver]) -> Result<()>;

    /// Re-arms selection after the session returned to Open.
    fn release_selection(&mut self);

    /// Tears down the UI. Safe to call more than once.
    async fn close(&mut self);
}

// ============================================================================
// ActionGate
// ============================================================================

/// Validates and debounces user actions for one backend instance.
#[derive(Debug, Default)]
pub struct ActionGate {
    /// Ids in the list most recently pushed to the UI.
    known: FxHashSet<ReceiverId>,
    /// Accepted selection.
    selected: Option<ReceiverId>,
    /// Accepted cast.
    cast: Option<ReceiverId>,
    /// Whether the UI is accepting actions at all.
    open: bool,
}

impl ActionGate {
    /// Arms the gate for a freshly launched UI.
    pub fn arm(&mut self, receivers: &[Receiver]) {
        *self = Self::default();
        self.replace(receivers);
        self.open = true;
    }

    /// Stops accepting actions.
    pub fn shut(&mut self) {
        self.open = false;
    }

    /// Returns `true` while actions are accepted.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Replaces the known ids. A selection whose id vanished is released.
    pub fn replace(&mut self, receivers: &[Receiver]) {
        self.known = receivers.iter().map(|r| r.id().clone()).collect();

        if self.cast.is_none()
            && let Some(ref id) = self.selected
            && !self.known.contains(id)
        {
            self.selected = None;
        }
    }

    /// Clears the accepted selection and cast.
    pub fn release(&mut self) {
        self.selected = None;
        self.cast = None;
    }

    /// Checks a selection.
    ///
    /// Returns `Ok(false)` if it must be ignored (gate shut or a selection
    /// was already accepted).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleReceiver`] if `id` is not known.
    pub fn accept_select(&mut self, id: &ReceiverId) -> Result<bool> {
        if !self.open {
            return Ok(false);
        }
        self.expect_known(id)?;

        if self.selected.is_some() {
            return Ok(false);
        }
        self.selected = Some(id.clone());
        Ok(true)
    }

    /// Checks a cast. Casting with nothing selected also selects `id`.
    ///
    /// Returns `Ok(false)` if it must be ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::StaleReceiver`] if `id` is not known
    /// - [`Error::InvalidTransition`] if another receiver is selected
    pub fn accept_cast(&mut self, id: &ReceiverId) -> Result<bool> {
        if !self.open {
            return Ok(false);
        }
        self.expect_known(id)?;

        if self.cast.is_some() {
            return Ok(false);
        }
        if self.selected.as_ref().is_some_and(|selected| selected != id) {
            return Err(Error::invalid_transition(SessionStatus::Selecting, "cast"));
        }
        self.selected = Some(id.clone());
        self.cast = Some(id.clone());
        Ok(true)
    }

    /// Checks a deselection. Only a selection without a cast can be dropped.
    pub fn accept_deselect(&mut self) -> bool {
        if !self.open || self.cast.is_some() || self.selected.is_none() {
            return false;
        }
        self.selected = None;
        true
    }

    /// Checks a dismissal. The gate shuts either way.
    pub fn accept_cancel(&mut self) -> bool {
        let was_open = self.open;
        self.open = false;
        was_open
    }

    fn expect_known(&self, id: &ReceiverId) -> Result<()> {
        if self.known.contains(id) {
            Ok(())
        } else {
            Err(Error::stale_receiver(id.clone()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
