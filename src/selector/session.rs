//! Selector session state machine.
//!
//! A [`SelectorSession`] is an immutable snapshot. Every transition consumes
//! a reference to the current snapshot and returns the next one, so the
//! session driver can publish each state as-is.
//!
//! # Transitions
//!
//! | From | Event | To |
//! |------|-------|----|
//! | Closed | `open` | Opening |
//! | Opening | `ready` | Open |
//! | Opening | `fail` | Errored |
//! | Open | `update_receivers` | Open |
//! | Open | `select` | Selecting |
//! | Open, Selecting | `cancel` | Cancelled |
//! | Open, Selecting | `fail` | Errored |
//! | Selecting | `deselect` | Open |
//! | Open, Selecting | `cast` | Casting |
//! | Casting | `acknowledge_cast` | Closed / Casting / Open (per [`CastPolicy`]) |
//! | any live | `close` | Closed |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use rustc_hash::FxHashSet;
use tracing::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::identifiers::{ReceiverId, SessionId};
use crate::options::{CastPolicy, SelectorKind};
use crate::receiver::Receiver;

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle status of a selector session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// No UI; the only state `open` is accepted in.
    #[default]
    Closed,
    /// Backend is launching.
    Opening,
    /// UI is showing the receiver list.
    Open,
    /// User picked a receiver but has not cast yet.
    Selecting,
    /// User pressed cast.
    Casting,
    /// User dismissed the UI.
    Cancelled,
    /// Backend failed to launch or went away.
    Errored,
}

impl SessionStatus {
    /// Returns `true` for states that end a session occupancy.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled | Self::Errored)
    }

    /// Returns `true` for states that hold the UI surface.
    #[inline]
    #[must_use]
    pub const fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// CastSignal
// ============================================================================

/// The user's explicit intent to cast to a selected receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastSignal {
    /// Receiver to cast to.
    pub receiver_id: ReceiverId,
    /// When the cast was requested.
    pub timestamp: SystemTime,
}

impl CastSignal {
    /// Creates a signal stamped with the current time.
    #[inline]
    #[must_use]
    pub fn now(receiver_id: ReceiverId) -> Self {
        Self {
            receiver_id,
            timestamp: SystemTime::now(),
        }
    }
}

// ============================================================================
// SelectorSession
// ============================================================================

/// Immutable snapshot of one selector session.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSession {
    /// Session identity.
    id: SessionId,
    /// Backend this session runs on.
    backend: SelectorKind,
    /// Lifecycle status.
    status: SessionStatus,
    /// Receivers most recently pushed to the backend.
    receivers: Arc<[Receiver]>,
    /// Selected receiver.
    active_receiver_id: Option<ReceiverId>,
    /// Why the session errored.
    error: Option<ErrorKind>,
}

// ============================================================================
// SelectorSession - Accessors
// ============================================================================

impl SelectorSession {
    /// Creates a closed session.
    #[must_use]
    pub fn new(id: SessionId, backend: SelectorKind) -> Self {
        Self {
            id,
            backend,
            status: SessionStatus::Closed,
            receivers: Arc::from(Vec::new()),
            active_receiver_id: None,
            error: None,
        }
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the backend kind.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> SelectorKind {
        self.backend
    }

    /// Returns the status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Returns the current receiver list.
    #[inline]
    #[must_use]
    pub fn receivers(&self) -> &[Receiver] {
        &self.receivers
    }

    /// Returns the selected receiver id.
    #[inline]
    #[must_use]
    pub fn active_receiver_id(&self) -> Option<&ReceiverId> {
        self.active_receiver_id.as_ref()
    }

    /// Returns the selected receiver record.
    #[must_use]
    pub fn active_receiver(&self) -> Option<&Receiver> {
        let id = self.active_receiver_id.as_ref()?;
        self.find(id)
    }

    /// Returns the error kind for an errored session.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Looks up a receiver by id.
    #[must_use]
    pub fn find(&self, id: &ReceiverId) -> Option<&Receiver> {
        self.receivers.iter().find(|r| r.id() == id)
    }

    /// Returns `true` if `id` is in the current receiver list.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &ReceiverId) -> bool {
        self.find(id).is_some()
    }
}

// ============================================================================
// SelectorSession - Transitions
// ============================================================================

impl SelectorSession {
    /// Closed → Opening with `receivers`.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionActive`] if the session is live
    /// - [`Error::InvalidTransition`] if the session already ended
    pub fn open(&self, receivers: Vec<Receiver>) -> Result<Self> {
        match self.status {
            SessionStatus::Closed => Ok(Self {
                status: SessionStatus::Opening,
                receivers: dedupe(receivers),
                active_receiver_id: None,
                error: None,
                ..self.clone()
            }),
            status if status.is_live() => Err(Error::SessionActive { status }),
            status => Err(Error::invalid_transition(status, "open")),
        }
    }

    /// Opening → Open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless Opening.
    pub fn ready(&self) -> Result<Self> {
        self.expect(&[SessionStatus::Opening], "ready")?;
        Ok(self.with_status(SessionStatus::Open))
    }

    /// Any live state → Errored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the session already ended.
    pub fn fail(&self, kind: ErrorKind) -> Result<Self> {
        self.expect_live("fail")?;
        Ok(Self {
            status: SessionStatus::Errored,
            error: Some(kind),
            ..self.clone()
        })
    }

    /// Replaces the receiver list.
    ///
    /// The selection survives if its id is still present. A Selecting
    /// session whose receiver disappeared returns to Open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the session already ended.
    pub fn update_receivers(&self, receivers: Vec<Receiver>) -> Result<Self> {
        self.expect_live("update_receivers")?;

        let receivers = dedupe(receivers);
        let still_present = self
            .active_receiver_id
            .as_ref()
            .is_some_and(|id| receivers.iter().any(|r| r.id() == id));

        let (status, active_receiver_id) = match self.status {
            SessionStatus::Selecting if !still_present => (SessionStatus::Open, None),
            // A cast in flight keeps its target.
            SessionStatus::Casting => (self.status, self.active_receiver_id.clone()),
            status if still_present => (status, self.active_receiver_id.clone()),
            status => (status, None),
        };

        Ok(Self {
            status,
            receivers,
            active_receiver_id,
            ..self.clone()
        })
    }

    /// Open → Selecting.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] unless Open
    /// - [`Error::StaleReceiver`] if `id` is not in the receiver list
    pub fn select(&self, id: &ReceiverId) -> Result<Self> {
        self.expect(&[SessionStatus::Open], "select")?;
        self.expect_member(id)?;

        Ok(Self {
            status: SessionStatus::Selecting,
            active_receiver_id: Some(id.clone()),
            ..self.clone()
        })
    }

    /// Selecting → Open, dropping the selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless Selecting.
    pub fn deselect(&self) -> Result<Self> {
        self.expect(&[SessionStatus::Selecting], "deselect")?;
        Ok(Self {
            status: SessionStatus::Open,
            active_receiver_id: None,
            ..self.clone()
        })
    }

    /// User dismissed the UI.
    ///
    /// Opening/Open/Selecting → Cancelled. After a cast the UI closing is
    /// not a cancellation, so Casting → Closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the session already ended.
    pub fn cancel(&self) -> Result<Self> {
        self.expect_live("cancel")?;
        let status = match self.status {
            SessionStatus::Casting => SessionStatus::Closed,
            _ => SessionStatus::Cancelled,
        };
        Ok(self.with_status(status))
    }

    /// Open/Selecting → Casting, producing the cast signal.
    ///
    /// Casting from Open selects `id` implicitly. While Selecting, only the
    /// selected receiver can be cast to.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] unless Open or Selecting, or if `id`
    ///   is not the selected receiver
    /// - [`Error::StaleReceiver`] if `id` is not in the receiver list
    pub fn cast(&self, id: &ReceiverId) -> Result<(Self, CastSignal)> {
        self.expect(&[SessionStatus::Open, SessionStatus::Selecting], "cast")?;
        self.expect_member(id)?;
        if self.status == SessionStatus::Selecting
            && self.active_receiver_id.as_ref() != Some(id)
        {
            return Err(Error::invalid_transition(self.status, "cast"));
        }

        let next = Self {
            status: SessionStatus::Casting,
            active_receiver_id: Some(id.clone()),
            ..self.clone()
        };
        Ok((next, CastSignal::now(id.clone())))
    }

    /// Casting → next state per `policy`, once the signal was delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless Casting.
    pub fn acknowledge_cast(&self, policy: CastPolicy) -> Result<Self> {
        self.expect(&[SessionStatus::Casting], "acknowledge_cast")?;
        Ok(match policy {
            CastPolicy::CloseOnAcknowledge => self.with_status(SessionStatus::Closed),
            CastPolicy::RemainCasting => self.clone(),
            CastPolicy::ReturnToOpen => Self {
                status: SessionStatus::Open,
                active_receiver_id: None,
                ..self.clone()
            },
        })
    }

    /// Casting → Closed after an external completion signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless Casting.
    pub fn complete_cast(&self) -> Result<Self> {
        self.expect(&[SessionStatus::Casting], "complete_cast")?;
        Ok(self.with_status(SessionStatus::Closed))
    }

    /// Any live state → Closed. Closing an ended session is a no-op.
    #[must_use]
    pub fn close(&self) -> Self {
        if self.status.is_terminal() {
            return self.clone();
        }
        self.with_status(SessionStatus::Closed)
    }
}

// ============================================================================
// SelectorSession - Helpers
// ============================================================================

impl SelectorSession {
    fn with_status(&self, status: SessionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    fn expect(&self, allowed: &[SessionStatus], event: &'static str) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(Error::invalid_transition(self.status, event))
        }
    }

    fn expect_live(&self, event: &'static str) -> Result<()> {
        if self.status.is_live() {
            Ok(())
        } else {
            Err(Error::invalid_transition(self.status, event))
        }
    }

    fn expect_member(&self, id: &ReceiverId) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(Error::stale_receiver(id.clone()))
        }
    }
}

/// Drops repeated ids, keeping the first occurrence.
fn dedupe(receivers: Vec<Receiver>) -> Arc<[Receiver]> {
    let mut seen = FxHashSet::default();
    let total = receivers.len();
    let unique: Vec<Receiver> = receivers
        .into_iter()
        .filter(|r| seen.insert(r.id().clone()))
        .collect();

    if unique.len() != total {
        warn!(dropped = total - unique.len(), "Duplicate receiver ids in list");
    }

    Arc::from(unique)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn receiver(id: &str) -> Receiver {
        Receiver::new(id, format!("TV {id}"), "10.0.0.5", 8009).expect("valid receiver")
    }

    fn list(ids: &[&str]) -> Vec<Receiver> {
        ids.iter().map(|id| receiver(id)).collect()
    }

    fn open_session(ids: &[&str]) -> SelectorSession {
        SelectorSession::new(SessionId::generate(), SelectorKind::Popup)
            .open(list(ids))
            .expect("open")
            .ready()
            .expect("ready")
    }

    fn id(s: &str) -> ReceiverId {
        ReceiverId::new(s)
    }

    #[test]
    fn test_new_session_is_closed() {
        let session = SelectorSession::new(SessionId::generate(), SelectorKind::NativeMac);
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(session.receivers().is_empty());
        assert_eq!(session.backend(), SelectorKind::NativeMac);
    }

    #[test]
    fn test_open_on_live_session_is_misuse() {
        let session = open_session(&["r1"]);
        let err = session.open(list(&["r2"])).expect_err("live");
        assert!(matches!(err, Error::SessionActive { status: SessionStatus::Open }));
        assert!(err.is_misuse());
    }

    #[test]
    fn test_open_after_cancel_is_rejected() {
        let session = open_session(&["r1"]).cancel().expect("cancel");
        assert!(session.open(list(&["r1"])).is_err());
    }

    #[test]
    fn test_launch_failure() {
        let session = SelectorSession::new(SessionId::generate(), SelectorKind::NativeMac)
            .open(list(&["r1"]))
            .expect("open")
            .fail(ErrorKind::LaunchFailure)
            .expect("fail");

        assert_eq!(session.status(), SessionStatus::Errored);
        assert_eq!(session.error(), Some(ErrorKind::LaunchFailure));
        assert!(session.ready().is_err());
    }

    #[test]
    fn test_select_then_cast_closes_by_default() {
        let session = open_session(&["r1", "r2"]);
        let selecting = session.select(&id("r1")).expect("select");
        assert_eq!(selecting.status(), SessionStatus::Selecting);
        assert_eq!(selecting.active_receiver().map(Receiver::friendly_name), Some("TV r1"));

        let (casting, signal) = selecting.cast(&id("r1")).expect("cast");
        assert_eq!(casting.status(), SessionStatus::Casting);
        assert_eq!(signal.receiver_id, id("r1"));

        let done = casting
            .acknowledge_cast(CastPolicy::CloseOnAcknowledge)
            .expect("ack");
        assert_eq!(done.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_cast_policies() {
        let (casting, _) = open_session(&["r1"]).cast(&id("r1")).expect("cast");

        let remain = casting.acknowledge_cast(CastPolicy::RemainCasting).expect("ack");
        assert_eq!(remain.status(), SessionStatus::Casting);
        assert_eq!(
            remain.complete_cast().expect("complete").status(),
            SessionStatus::Closed
        );

        let reopened = casting.acknowledge_cast(CastPolicy::ReturnToOpen).expect("ack");
        assert_eq!(reopened.status(), SessionStatus::Open);
        assert!(reopened.active_receiver_id().is_none());
    }

    #[test]
    fn test_cast_from_open_selects_implicitly() {
        let (casting, signal) = open_session(&["r1"]).cast(&id("r1")).expect("cast");
        assert_eq!(casting.active_receiver_id(), Some(&id("r1")));
        assert_eq!(signal.receiver_id, id("r1"));
    }

    #[test]
    fn test_cast_while_selecting_must_target_selection() {
        let selecting = open_session(&["r1", "r2"]).select(&id("r1")).expect("select");

        let err = selecting.cast(&id("r2")).expect_err("other receiver");
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(selecting.active_receiver_id(), Some(&id("r1")));

        let (_, signal) = selecting.cast(&id("r1")).expect("cast");
        assert_eq!(signal.receiver_id, id("r1"));
    }

    #[test]
    fn test_stale_selection_rejected() {
        let session = open_session(&["r1"]);
        let err = session.select(&id("ghost")).expect_err("unknown id");
        assert_eq!(err.kind(), ErrorKind::InvalidMessage);
        assert!(session.cast(&id("ghost")).is_err());
    }

    #[test]
    fn test_second_select_rejected() {
        let selecting = open_session(&["r1", "r2"]).select(&id("r1")).expect("select");
        assert!(selecting.select(&id("r2")).is_err());
    }

    #[test]
    fn test_deselect_returns_to_open() {
        let open = open_session(&["r1"])
            .select(&id("r1"))
            .expect("select")
            .deselect()
            .expect("deselect");
        assert_eq!(open.status(), SessionStatus::Open);
        assert!(open.active_receiver_id().is_none());
    }

    #[test]
    fn test_update_keeps_selection_when_present() {
        let selecting = open_session(&["r1", "r2"]).select(&id("r1")).expect("select");
        let updated = selecting
            .update_receivers(list(&["r1", "r2"]))
            .expect("update");
        assert_eq!(updated.status(), SessionStatus::Selecting);
        assert_eq!(updated.active_receiver_id(), Some(&id("r1")));
    }

    #[test]
    fn test_update_drops_vanished_selection() {
        let selecting = open_session(&["r1", "r2"]).select(&id("r1")).expect("select");
        let updated = selecting.update_receivers(list(&["r2"])).expect("update");
        assert_eq!(updated.status(), SessionStatus::Open);
        assert!(updated.active_receiver_id().is_none());
        assert_eq!(updated.receivers().len(), 1);
    }

    #[test]
    fn test_cancel_and_close() {
        let cancelled = open_session(&["r1"]).cancel().expect("cancel");
        assert_eq!(cancelled.status(), SessionStatus::Cancelled);
        assert!(cancelled.cancel().is_err());
        assert_eq!(cancelled.close().status(), SessionStatus::Cancelled);

        let closed = open_session(&["r1"]).close();
        assert_eq!(closed.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_cancel_while_casting_closes() {
        let (casting, _) = open_session(&["r1"]).cast(&id("r1")).expect("cast");
        assert_eq!(casting.cancel().expect("cancel").status(), SessionStatus::Closed);
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let session = open_session(&["r1", "r1", "r2"]);
        assert_eq!(session.receivers().len(), 2);
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Step {
        Ready,
        Fail,
        Update(Vec<u8>),
        Select(u8),
        Deselect,
        Cancel,
        Cast(u8),
        Ack(u8),
        Close,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Ready),
            Just(Step::Fail),
            proptest::collection::vec(0u8..6, 0..5).prop_map(Step::Update),
            (0u8..6).prop_map(Step::Select),
            Just(Step::Deselect),
            Just(Step::Cancel),
            (0u8..6).prop_map(Step::Cast),
            (0u8..3).prop_map(Step::Ack),
            Just(Step::Close),
        ]
    }

    fn ids(raw: &[u8]) -> Vec<Receiver> {
        raw.iter().map(|n| receiver(&format!("r{n}"))).collect()
    }

    fn apply(session: &SelectorSession, step: &Step) -> Result<SelectorSession> {
        match step {
            Step::Ready => session.ready(),
            Step::Fail => session.fail(ErrorKind::Disconnect),
            Step::Update(raw) => session.update_receivers(ids(raw)),
            Step::Select(n) => session.select(&id(&format!("r{n}"))),
            Step::Deselect => session.deselect(),
            Step::Cancel => session.cancel(),
            Step::Cast(n) => session.cast(&id(&format!("r{n}"))).map(|(s, _)| s),
            Step::Ack(p) => session.acknowledge_cast(match p {
                0 => CastPolicy::CloseOnAcknowledge,
                1 => CastPolicy::RemainCasting,
                _ => CastPolicy::ReturnToOpen,
            }),
            Step::Close => Ok(session.close()),
        }
    }

    proptest! {
        #[test]
        fn prop_terminal_states_absorb(initial in proptest::collection::vec(0u8..6, 0..5),
                                       steps in proptest::collection::vec(step(), 0..40)) {
            let mut session = SelectorSession::new(SessionId::generate(), SelectorKind::Popup)
                .open(ids(&initial))
                .expect("open");

            for step in &steps {
                let before = session.status();
                if let Ok(next) = apply(&session, step) {
                    if before.is_terminal() {
                        prop_assert_eq!(next.status(), before);
                    }
                    session = next;
                }
            }
        }

        #[test]
        fn prop_active_receiver_is_member(initial in proptest::collection::vec(0u8..6, 0..5),
                                          steps in proptest::collection::vec(step(), 0..40)) {
            let mut session = SelectorSession::new(SessionId::generate(), SelectorKind::NativeMac)
                .open(ids(&initial))
                .expect("open");

            for step in &steps {
                if let Ok(next) = apply(&session, step) {
                    session = next;
                }
                // A cast in flight keeps its target through updates, so only
                // pre-cast states are checked.
                if matches!(session.status(), SessionStatus::Open | SessionStatus::Selecting)
                    && let Some(active) = session.active_receiver_id()
                {
                    prop_assert!(session.contains(active));
                }
                if session.status() == SessionStatus::Selecting {
                    prop_assert!(session.active_receiver_id().is_some());
                }
            }
        }
    }
}
