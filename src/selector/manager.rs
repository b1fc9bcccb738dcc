//! Selector manager: the single entry point for receiver selection.
//!
//! The manager reads the configured backend on every `open()`, owns the one
//! active session, and exposes a broadcast event surface.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use receiver_selector::{OptionsStore, SelectionOutcome, SelectorManager};
//!
//! let manager = SelectorManager::new(Arc::new(OptionsStore::default()))
//!     .with_renderer(Arc::new(MyPopup::default()));
//!
//! manager.on_cast_requested(|signal| start_casting(signal.receiver_id));
//!
//! let selection = manager.open(receivers).await?;
//! match selection.outcome().await {
//!     SelectionOutcome::Selected(receiver) => println!("{}", receiver.friendly_name()),
//!     other => println!("no selection: {other:?}"),
//! }
//! ```
//!
//! # Session Driver
//!
//! Each session runs on its own task. Backend events and owner commands are
//! serialized through that task, so session state is never mutated
//! concurrently. Opening a new session closes the previous one and waits for
//! its driver to finish before the new backend is launched.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::identifiers::{ReceiverId, SessionId};
use crate::options::{CastPolicy, OptionsSource, SelectorKind};
use crate::receiver::Receiver;
use crate::transport::{HostLauncher, ProcessLauncher};

use super::backend::{BackendEvent, SelectorBackend};
use super::native::NativeSelector;
use super::popup::{PopupRenderer, PopupSelector};
use super::session::{CastSignal, SelectorSession, SessionStatus};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the selector event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// SelectorEvent
// ============================================================================

/// Notification published to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorEvent {
    /// User selected a receiver.
    Selected(Receiver),
    /// User asked to cast.
    CastRequested(CastSignal),
    /// User dismissed the selector.
    Cancelled,
    /// Backend failed.
    Error(ErrorKind),
}

// ============================================================================
// SelectionOutcome
// ============================================================================

/// How a session's selection request resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// User selected a receiver.
    Selected(Receiver),
    /// User dismissed the selector.
    Cancelled,
    /// Backend failed to launch or went away.
    Errored(ErrorKind),
    /// Owner closed the session, or a newer `open()` replaced it.
    Closed,
}

// ============================================================================
// Selection
// ============================================================================

/// Pending result of one `open()` call.
#[derive(Debug)]
pub struct Selection {
    /// Session this selection belongs to.
    session_id: SessionId,
    /// Resolved exactly once by the driver.
    outcome_rx: oneshot::Receiver<SelectionOutcome>,
}

impl Selection {
    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Waits for the selection to resolve.
    pub async fn outcome(self) -> SelectionOutcome {
        self.outcome_rx.await.unwrap_or(SelectionOutcome::Closed)
    }
}

// ============================================================================
// Control
// ============================================================================

/// Owner commands for the session driver.
enum Control {
    /// Replace the receiver list.
    UpdateReceivers {
        receivers: Vec<Receiver>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Finish a cast left in Casting.
    CompleteCast { reply: oneshot::Sender<Result<()>> },
    /// Close the session.
    Close,
}

// ============================================================================
// ActiveSession
// ============================================================================

/// Handle to the running session driver.
struct ActiveSession {
    /// Session id.
    id: SessionId,
    /// Commands to the driver.
    control_tx: mpsc::UnboundedSender<Control>,
    /// Driver task.
    task: JoinHandle<()>,
}

impl ActiveSession {
    /// Closes the session and waits for the driver to finish.
    async fn shut_down(self) {
        let _ = self.control_tx.send(Control::Close);
        if let Err(e) = self.task.await {
            warn!(session_id = %self.id, error = %e, "Session driver failed");
        }
    }
}

// ============================================================================
// SelectorManager
// ============================================================================

/// Owns the active selector session.
///
/// # Thread Safety
///
/// `SelectorManager` is `Send + Sync`; calls may come from any task.
pub struct SelectorManager {
    /// Option source, read once per `open()`.
    options: Arc<dyn OptionsSource>,
    /// Popup surface, required for the popup backend.
    renderer: Option<Arc<dyn PopupRenderer>>,
    /// Native host launcher.
    launcher: Arc<dyn HostLauncher>,
    /// Event broadcast.
    events_tx: broadcast::Sender<SelectorEvent>,
    /// Latest snapshot of the current or last session.
    snapshots: Arc<watch::Sender<SelectorSession>>,
    /// The one active session.
    active: Mutex<Option<ActiveSession>>,
}

impl fmt::Debug for SelectorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorManager")
            .field("session", &*self.snapshots.borrow())
            .field("has_renderer", &self.renderer.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SelectorManager - Construction
// ============================================================================

impl SelectorManager {
    /// Creates a manager reading options from `options`.
    ///
    /// Native hosts are spawned with [`ProcessLauncher`] unless another
    /// launcher is set.
    #[must_use]
    pub fn new(options: Arc<dyn OptionsSource>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshots, _) = watch::channel(SelectorSession::new(
            SessionId::generate(),
            SelectorKind::default(),
        ));

        Self {
            options,
            renderer: None,
            launcher: Arc::new(ProcessLauncher::new()),
            events_tx,
            snapshots: Arc::new(snapshots),
            active: Mutex::new(None),
        }
    }

    /// Sets the popup surface.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn PopupRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Sets the native host launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn HostLauncher>) -> Self {
        self.launcher = launcher;
        self
    }
}

// ============================================================================
// SelectorManager - Sessions
// ============================================================================

impl SelectorManager {
    /// Opens a selector for `receivers`.
    ///
    /// Any session still running is closed first and resolves as
    /// [`SelectionOutcome::Closed`]. The backend is chosen from the options
    /// at this moment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid or the popup
    /// backend has no renderer. Launch failures are reported through the
    /// returned [`Selection`] and [`SelectorEvent::Error`].
    pub async fn open(&self, receivers: Vec<Receiver>) -> Result<Selection> {
        let options = self.options.selector_options();
        options.validate()?;

        let backend: Box<dyn SelectorBackend> = match options.receiver_selector {
            SelectorKind::Popup => {
                let renderer = self
                    .renderer
                    .as_ref()
                    .ok_or_else(|| Error::config("No popup renderer configured"))?;
                Box::new(PopupSelector::new(
                    Arc::clone(renderer),
                    options.receiver_selector_popup_uses_photon_theme,
                ))
            }
            SelectorKind::NativeMac => Box::new(NativeSelector::new(
                Arc::clone(&self.launcher),
                options.clone(),
            )),
        };

        let mut active = self.active.lock().await;
        if let Some(prior) = active.take() {
            debug!(session_id = %prior.id, "Closing superseded session");
            prior.shut_down().await;
        }

        let session = SelectorSession::new(SessionId::generate(), backend.kind()).open(receivers)?;
        let session_id = session.id();
        let initial = session.receivers().to_vec();
        self.snapshots.send_replace(session.clone());

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let driver = Driver {
            backend,
            tracker: Tracker {
                session,
                policy: options.cast_policy,
                snapshots: Arc::clone(&self.snapshots),
                events: self.events_tx.clone(),
                outcome: Some(outcome_tx),
            },
        };
        let task = tokio::spawn(driver.run(initial, control_rx));

        info!(
            session_id = %session_id,
            backend = ?options.receiver_selector,
            "Selector session opened"
        );

        *active = Some(ActiveSession {
            id: session_id,
            control_tx,
            task,
        });

        Ok(Selection {
            session_id,
            outcome_rx,
        })
    }

    /// Replaces the receivers shown by the active session.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveSession`] if no session is live
    /// - [`Error::ConnectionClosed`] if the backend is gone
    /// - [`Error::Backend`] if the native host stopped reading; the session
    ///   then ends with [`ErrorKind::Disconnect`]
    pub async fn update_receivers(&self, receivers: Vec<Receiver>) -> Result<()> {
        let control_tx = self.control_tx().await?;
        let (reply, reply_rx) = oneshot::channel();
        control_tx
            .send(Control::UpdateReceivers { receivers, reply })
            .map_err(|_| Error::NoActiveSession)?;
        reply_rx.await.map_err(|_| Error::NoActiveSession)?
    }

    /// Finishes a session left in Casting.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveSession`] if no session is live
    /// - [`Error::InvalidTransition`] unless the session is Casting
    pub async fn complete_cast(&self) -> Result<()> {
        let control_tx = self.control_tx().await?;
        let (reply, reply_rx) = oneshot::channel();
        control_tx
            .send(Control::CompleteCast { reply })
            .map_err(|_| Error::NoActiveSession)?;
        reply_rx.await.map_err(|_| Error::NoActiveSession)?
    }

    /// Closes the active session, if any.
    ///
    /// Waits at most the configured grace period for a native host.
    pub async fn close(&self) {
        let prior = self.active.lock().await.take();
        if let Some(prior) = prior {
            info!(session_id = %prior.id, "Closing selector session");
            prior.shut_down().await;
        }
    }

    async fn control_tx(&self) -> Result<mpsc::UnboundedSender<Control>> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|active| !active.task.is_finished())
            .map(|active| active.control_tx.clone())
            .ok_or(Error::NoActiveSession)
    }
}

// ============================================================================
// SelectorManager - Observation
// ============================================================================

impl SelectorManager {
    /// Returns the status of the current or last session.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.snapshots.borrow().status()
    }

    /// Returns a snapshot of the current or last session.
    #[must_use]
    pub fn session(&self) -> SelectorSession {
        self.snapshots.borrow().clone()
    }

    /// Returns a receiver that observes every session snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SelectorSession> {
        self.snapshots.subscribe()
    }

    /// Subscribes to selector events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SelectorEvent> {
        self.events_tx.subscribe()
    }

    /// Calls `callback` for every cast request until the manager is dropped.
    pub fn on_cast_requested<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(CastSignal) + Send + 'static,
    {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SelectorEvent::CastRequested(signal)) => callback(signal),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cast listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Session state plus everything that observes it.
struct Tracker {
    /// Current snapshot.
    session: SelectorSession,
    /// Post-cast behavior.
    policy: CastPolicy,
    /// Snapshot publisher.
    snapshots: Arc<watch::Sender<SelectorSession>>,
    /// Event broadcast.
    events: broadcast::Sender<SelectorEvent>,
    /// Pending outcome.
    outcome: Option<oneshot::Sender<SelectionOutcome>>,
}

impl Tracker {
    fn commit(&mut self, next: SelectorSession) {
        if next.status() != self.session.status() {
            debug!(
                session_id = %next.id(),
                from = %self.session.status(),
                to = %next.status(),
                "Session transition"
            );
        }
        self.session = next;
        self.snapshots.send_replace(self.session.clone());
    }

    fn emit(&self, event: SelectorEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn resolve(&mut self, outcome: SelectionOutcome) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }

    fn fail(&mut self, kind: ErrorKind) {
        if let Ok(next) = self.session.fail(kind) {
            self.commit(next);
            self.emit(SelectorEvent::Error(kind));
            self.resolve(SelectionOutcome::Errored(kind));
        }
    }

    fn select(&mut self, id: &ReceiverId) -> bool {
        let next = match self.session.select(id) {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "Ignoring selection");
                return false;
            }
        };

        let receiver = next.active_receiver().cloned();
        self.commit(next);

        if let Some(receiver) = receiver {
            info!(receiver_id = %receiver.id(), "Receiver selected");
            self.emit(SelectorEvent::Selected(receiver.clone()));
            self.resolve(SelectionOutcome::Selected(receiver));
        }
        true
    }

    fn update(&mut self, receivers: Vec<Receiver>) -> Result<()> {
        let next = self.session.update_receivers(receivers)?;
        self.commit(next);
        Ok(())
    }

    fn complete_cast(&mut self) -> Result<()> {
        let next = self.session.complete_cast()?;
        self.commit(next);
        Ok(())
    }

    fn close(&mut self) {
        let next = self.session.close();
        self.commit(next);
    }

    /// Resolves the outcome from the final status, if nothing did earlier.
    fn finish(&mut self) {
        let outcome = match self.session.status() {
            SessionStatus::Cancelled => SelectionOutcome::Cancelled,
            SessionStatus::Errored => {
                SelectionOutcome::Errored(self.session.error().unwrap_or(ErrorKind::Disconnect))
            }
            _ => SelectionOutcome::Closed,
        };
        self.resolve(outcome);
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Runs one session from launch to a terminal state.
struct Driver {
    backend: Box<dyn SelectorBackend>,
    tracker: Tracker,
}

impl Driver {
    async fn run(mut self, receivers: Vec<Receiver>, mut control_rx: mpsc::UnboundedReceiver<Control>) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut pending_update = false;

        let launched = {
            let mut launch = self.backend.launch(&receivers, event_tx);

            loop {
                tokio::select! {
                    result = &mut launch => break Some(result),
                    command = control_rx.recv() => match command {
                        Some(Control::UpdateReceivers { receivers, reply }) => {
                            let result = self.tracker.update(receivers);
                            pending_update |= result.is_ok();
                            let _ = reply.send(result);
                        }
                        Some(Control::CompleteCast { reply }) => {
                            let _ = reply.send(self.tracker.complete_cast());
                        }
                        Some(Control::Close) | None => break None,
                    },
                }
            }
        };

        match launched {
            Some(Ok(())) => {
                if let Ok(next) = self.tracker.session.ready() {
                    self.tracker.commit(next);
                }
                if pending_update && let Err(e) = self.push_receivers().await {
                    warn!(error = %e, "Failed to push receivers queued during launch");
                }
                self.drive(&mut event_rx, &mut control_rx).await;
            }
            Some(Err(e)) => {
                warn!(session_id = %self.tracker.session.id(), error = %e, "Selector launch failed");
                self.tracker.fail(ErrorKind::LaunchFailure);
            }
            None => {
                debug!(session_id = %self.tracker.session.id(), "Closed during launch");
                self.tracker.close();
            }
        }

        self.backend.close().await;
        self.tracker.finish();
        debug!(
            session_id = %self.tracker.session.id(),
            status = %self.tracker.session.status(),
            "Session driver finished"
        );
    }

    /// Processes events and commands until the session ends.
    async fn drive(
        &mut self,
        event_rx: &mut mpsc::UnboundedReceiver<BackendEvent>,
        control_rx: &mut mpsc::UnboundedReceiver<Control>,
    ) {
        let mut events_open = true;

        while self.tracker.session.status().is_live() {
            tokio::select! {
                event = event_rx.recv(), if events_open => match event {
                    Some(event) => self.on_backend_event(event),
                    None => {
                        debug!("Backend dropped its event sink");
                        events_open = false;
                    }
                },
                command = control_rx.recv() => match command {
                    Some(Control::UpdateReceivers { receivers, reply }) => {
                        let result = match self.tracker.update(receivers) {
                            Ok(()) => self.push_receivers().await,
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    Some(Control::CompleteCast { reply }) => {
                        let _ = reply.send(self.tracker.complete_cast());
                    }
                    Some(Control::Close) | None => self.tracker.close(),
                },
            }
        }
    }

    /// Sends the session's receiver list to the backend.
    ///
    /// A backend that can no longer take updates ends the session.
    async fn push_receivers(&mut self) -> Result<()> {
        let result = self
            .backend
            .update_receivers(self.tracker.session.receivers())
            .await;
        if let Err(ref e) = result
            && e.kind() == ErrorKind::Disconnect
        {
            warn!(error = %e, "Selector backend stopped taking updates");
            self.tracker.fail(ErrorKind::Disconnect);
        }
        result
    }

    fn on_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Selected(id) => {
                self.tracker.select(&id);
            }

            BackendEvent::Deselected => match self.tracker.session.deselect() {
                Ok(next) => self.tracker.commit(next),
                Err(e) => debug!(error = %e, "Ignoring deselection"),
            },

            BackendEvent::CastRequested(id) => self.on_cast(&id),

            BackendEvent::Cancelled => match self.tracker.session.cancel() {
                Ok(next) => {
                    let cancelled = next.status() == SessionStatus::Cancelled;
                    self.tracker.commit(next);
                    if cancelled {
                        info!(session_id = %self.tracker.session.id(), "Selector cancelled");
                        self.tracker.emit(SelectorEvent::Cancelled);
                        self.tracker.resolve(SelectionOutcome::Cancelled);
                    }
                }
                Err(e) => debug!(error = %e, "Ignoring cancellation"),
            },

            BackendEvent::Disconnected { reason } => {
                let kind = match self.tracker.session.status() {
                    SessionStatus::Opening => ErrorKind::LaunchFailure,
                    _ => ErrorKind::Disconnect,
                };
                warn!(reason = ?reason, %kind, "Selector backend disconnected");
                self.tracker.fail(kind);
            }
        }
    }

    fn on_cast(&mut self, id: &ReceiverId) {
        if self.tracker.session.status() == SessionStatus::Open && !self.tracker.select(id) {
            return;
        }

        let (casting, signal) = match self.tracker.session.cast(id) {
            Ok(cast) => cast,
            Err(e) => {
                warn!(error = %e, "Ignoring cast");
                return;
            }
        };

        self.tracker.commit(casting);
        info!(receiver_id = %id, "Cast requested");
        self.tracker.emit(SelectorEvent::CastRequested(signal));

        let policy = self.tracker.policy;
        if let Ok(next) = self.tracker.session.acknowledge_cast(policy) {
            self.tracker.commit(next);
        }
        if policy == CastPolicy::ReturnToOpen {
            self.backend.release_selection();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    use crate::options::SelectorOptions;
    use crate::protocol::{NativeMessage, subject};
    use crate::selector::native::tests::DuplexLauncher;
    use crate::selector::popup::{PopupActions, PopupView};

    /// Renderer that hands the test the popup's action handle.
    #[derive(Default)]
    struct TestPopup {
        actions: SyncMutex<Option<PopupActions>>,
        torn_down: SyncMutex<usize>,
    }

    impl TestPopup {
        fn actions(&self) -> PopupActions {
            self.actions.lock().clone().expect("popup rendered")
        }
    }

    impl PopupRenderer for TestPopup {
        fn render(&self, view: PopupView) -> Result<()> {
            *self.actions.lock() = Some(view.actions);
            Ok(())
        }

        fn update(&self, _receivers: &[Receiver]) {}

        fn tear_down(&self) {
            *self.torn_down.lock() += 1;
        }
    }

    fn receiver(id: &str) -> Receiver {
        Receiver::new(id, "TV", "10.0.0.5", 8009).expect("valid receiver")
    }

    fn receivers(ids: &[&str]) -> Vec<Receiver> {
        ids.iter().map(|id| receiver(id)).collect()
    }

    fn popup_manager(options: SelectorOptions) -> (SelectorManager, Arc<TestPopup>) {
        let popup = Arc::new(TestPopup::default());
        let manager = SelectorManager::new(Arc::new(options)).with_renderer(popup.clone());
        (manager, popup)
    }

    fn native_manager() -> (SelectorManager, Arc<DuplexLauncher>) {
        native_manager_with(DuplexLauncher::default())
    }

    fn native_manager_with(launcher: DuplexLauncher) -> (SelectorManager, Arc<DuplexLauncher>) {
        let launcher = Arc::new(launcher);
        let options = SelectorOptions::new()
            .with_kind(SelectorKind::NativeMac)
            .with_close_grace(Duration::from_millis(50));
        let manager = SelectorManager::new(Arc::new(options)).with_launcher(launcher.clone());
        (manager, launcher)
    }

    async fn wait_for(manager: &SelectorManager, status: SessionStatus) {
        let mut watch = manager.watch();
        watch
            .wait_for(|session| session.status() == status)
            .await
            .expect("manager alive");
    }

    #[tokio::test]
    async fn test_popup_select_then_cast() {
        let (manager, popup) = popup_manager(SelectorOptions::default());
        let mut events = manager.subscribe();

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;

        let actions = popup.actions();
        assert!(actions.select("r1"));
        assert!(actions.cast("r1"));

        assert_eq!(
            selection.outcome().await,
            SelectionOutcome::Selected(receiver("r1"))
        );
        assert_eq!(
            events.recv().await.expect("event"),
            SelectorEvent::Selected(receiver("r1"))
        );
        match events.recv().await.expect("event") {
            SelectorEvent::CastRequested(signal) => {
                assert_eq!(signal.receiver_id, ReceiverId::new("r1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        wait_for(&manager, SessionStatus::Closed).await;
        assert_eq!(manager.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_cast_from_open_selects_first() {
        let (manager, popup) = popup_manager(SelectorOptions::default());
        let mut events = manager.subscribe();

        manager.open(receivers(&["r1", "r2"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;
        assert!(popup.actions().cast("r2"));

        assert_eq!(
            events.recv().await.expect("event"),
            SelectorEvent::Selected(receiver("r2"))
        );
        assert!(matches!(
            events.recv().await.expect("event"),
            SelectorEvent::CastRequested(_)
        ));
    }

    #[tokio::test]
    async fn test_cast_cannot_switch_selected_receiver() {
        let (manager, popup) = popup_manager(SelectorOptions::default());
        let mut events = manager.subscribe();

        let selection = manager.open(receivers(&["r1", "r2"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;

        let actions = popup.actions();
        assert!(actions.select("r1"));
        assert!(!actions.cast("r2"));
        assert!(actions.cast("r1"));

        assert_eq!(
            selection.outcome().await,
            SelectionOutcome::Selected(receiver("r1"))
        );
        assert_eq!(
            events.recv().await.expect("event"),
            SelectorEvent::Selected(receiver("r1"))
        );
        match events.recv().await.expect("event") {
            SelectorEvent::CastRequested(signal) => {
                assert_eq!(signal.receiver_id, ReceiverId::new("r1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_selection_after_cancel() {
        let (manager, popup) = popup_manager(SelectorOptions::default());
        let mut events = manager.subscribe();

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;

        let actions = popup.actions();
        assert!(actions.cancel());
        assert!(!actions.select("r1"));

        assert_eq!(selection.outcome().await, SelectionOutcome::Cancelled);
        assert_eq!(events.recv().await.expect("event"), SelectorEvent::Cancelled);
        assert!(events.try_recv().is_err());

        manager.close().await;
        assert_eq!(manager.status(), SessionStatus::Cancelled);
        assert_eq!(*popup.torn_down.lock(), 1);
    }

    #[tokio::test]
    async fn test_open_supersedes_previous_session() {
        let (manager, popup) = popup_manager(SelectorOptions::default());

        let first = manager.open(receivers(&["r1"])).await.expect("first");
        wait_for(&manager, SessionStatus::Open).await;
        let second = manager.open(receivers(&["r2"])).await.expect("second");

        assert_eq!(first.outcome().await, SelectionOutcome::Closed);
        assert_eq!(manager.session().id(), second.session_id());
        assert_eq!(*popup.torn_down.lock(), 1);

        wait_for(&manager, SessionStatus::Open).await;
        assert!(popup.actions().select("r2"));
        assert_eq!(
            second.outcome().await,
            SelectionOutcome::Selected(receiver("r2"))
        );
    }

    #[tokio::test]
    async fn test_update_keeps_present_selection() {
        let (manager, popup) = popup_manager(SelectorOptions::default());

        manager.open(receivers(&["r1", "r2"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;
        assert!(popup.actions().select("r1"));
        wait_for(&manager, SessionStatus::Selecting).await;

        manager
            .update_receivers(receivers(&["r1", "r2"]))
            .await
            .expect("update");
        let session = manager.session();
        assert_eq!(session.status(), SessionStatus::Selecting);
        assert_eq!(session.active_receiver_id(), Some(&ReceiverId::new("r1")));
    }

    #[tokio::test]
    async fn test_return_to_open_policy_allows_another_cast() {
        let options = SelectorOptions::new().with_cast_policy(CastPolicy::ReturnToOpen);
        let (manager, popup) = popup_manager(options);
        let mut events = manager.subscribe();
        let cast_count = Arc::new(SyncMutex::new(0usize));
        let counter = Arc::clone(&cast_count);
        let listener = manager.on_cast_requested(move |_| *counter.lock() += 1);

        manager.open(receivers(&["r1"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;

        let actions = popup.actions();
        for _ in 0..2 {
            assert!(actions.cast("r1"));
            loop {
                if let SelectorEvent::CastRequested(_) = events.recv().await.expect("event") {
                    break;
                }
            }
        }
        assert_eq!(manager.status(), SessionStatus::Open);

        tokio::time::timeout(Duration::from_secs(1), async {
            while *cast_count.lock() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener saw both casts");

        manager.close().await;
        listener.abort();
    }

    #[tokio::test]
    async fn test_remain_casting_until_completed() {
        let options = SelectorOptions::new().with_cast_policy(CastPolicy::RemainCasting);
        let (manager, popup) = popup_manager(options);

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;
        assert!(popup.actions().cast("r1"));
        wait_for(&manager, SessionStatus::Casting).await;

        manager.complete_cast().await.expect("complete");
        wait_for(&manager, SessionStatus::Closed).await;
        assert_eq!(
            selection.outcome().await,
            SelectionOutcome::Selected(receiver("r1"))
        );
    }

    #[tokio::test]
    async fn test_operations_without_session() {
        let (manager, _popup) = popup_manager(SelectorOptions::default());
        assert!(matches!(
            manager.update_receivers(Vec::new()).await,
            Err(Error::NoActiveSession)
        ));
        assert!(manager.complete_cast().await.is_err());
        manager.close().await;
        assert_eq!(manager.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_popup_without_renderer_is_config_error() {
        let manager = SelectorManager::new(Arc::new(SelectorOptions::default()));
        let err = manager.open(receivers(&["r1"])).await.expect_err("no renderer");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_owner_close_resolves_closed() {
        let (manager, popup) = popup_manager(SelectorOptions::default());
        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        wait_for(&manager, SessionStatus::Open).await;

        manager.close().await;
        assert_eq!(selection.outcome().await, SelectionOutcome::Closed);
        assert_eq!(*popup.torn_down.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_handshake_timeout_then_reopen() {
        let (manager, launcher) = native_manager();
        let mut events = manager.subscribe();

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        assert_eq!(
            selection.outcome().await,
            SelectionOutcome::Errored(ErrorKind::LaunchFailure)
        );
        assert_eq!(
            events.recv().await.expect("event"),
            SelectorEvent::Error(ErrorKind::LaunchFailure)
        );
        assert!(events.try_recv().is_err());
        assert_eq!(manager.status(), SessionStatus::Errored);

        // A late acknowledgment to the dead session changes nothing.
        let mut stale_host = launcher.take_host().await;
        let _ = stale_host.try_send(NativeMessage::bare(subject::READY)).await;

        let _selection = manager.open(receivers(&["r1"])).await.expect("reopen");
        let mut host = launcher.take_host().await;
        host.ready().await;
        wait_for(&manager, SessionStatus::Open).await;

        assert_eq!(launcher.launches(), 2);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_native_stale_selection_changes_nothing() {
        let (manager, launcher) = native_manager();
        let mut events = manager.subscribe();

        manager.open(receivers(&["r1"])).await.expect("open");
        let mut host = launcher.take_host().await;
        host.ready().await;
        wait_for(&manager, SessionStatus::Open).await;

        host.send(NativeMessage::new(subject::SELECTED, json!("ghost"))).await;
        host.send(NativeMessage::new(subject::SELECTED, json!("r1"))).await;

        assert_eq!(
            events.recv().await.expect("event"),
            SelectorEvent::Selected(receiver("r1"))
        );
        assert_eq!(manager.session().active_receiver_id(), Some(&ReceiverId::new("r1")));
    }

    #[tokio::test]
    async fn test_native_disconnect_is_error() {
        let (manager, launcher) = native_manager();

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        let mut host = launcher.take_host().await;
        host.ready().await;
        wait_for(&manager, SessionStatus::Open).await;

        drop(host);
        assert_eq!(
            selection.outcome().await,
            SelectionOutcome::Errored(ErrorKind::Disconnect)
        );
        assert_eq!(manager.session().error(), Some(ErrorKind::Disconnect));
    }

    #[tokio::test]
    async fn test_native_update_is_pushed() {
        let (manager, launcher) = native_manager();

        manager.open(receivers(&["r1"])).await.expect("open");
        let mut host = launcher.take_host().await;
        host.ready().await;
        wait_for(&manager, SessionStatus::Open).await;

        manager
            .update_receivers(receivers(&["r1", "r2"]))
            .await
            .expect("update");
        let update = host.recv().await.expect("update");
        assert_eq!(update.subject, subject::UPDATE);
        assert_eq!(update.data.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_close_during_native_handshake() {
        let (manager, launcher) = native_manager();
        let mut events = manager.subscribe();

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        let mut host = launcher.take_host().await;
        let initialize = host.recv().await.expect("initialize");
        assert_eq!(initialize.subject, subject::INITIALIZE);
        assert_eq!(manager.status(), SessionStatus::Opening);

        manager.close().await;
        assert_eq!(
            host.recv().await.map(|m| m.subject).as_deref(),
            Some(subject::CLOSE)
        );
        assert_eq!(selection.outcome().await, SelectionOutcome::Closed);

        // Acknowledging after the close does not revive the session.
        let _ = host.try_send(NativeMessage::bare(subject::READY)).await;
        tokio::task::yield_now().await;
        assert_eq!(manager.status(), SessionStatus::Closed);
        assert!(events.try_recv().is_err());
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_open_during_native_handshake_closes_host() {
        let (manager, launcher) = native_manager();

        let first = manager.open(receivers(&["r1"])).await.expect("first");
        let mut first_host = launcher.take_host().await;
        first_host.recv().await.expect("initialize");

        let _second = manager.open(receivers(&["r2"])).await.expect("second");
        assert_eq!(first.outcome().await, SelectionOutcome::Closed);
        assert_eq!(
            first_host.recv().await.map(|m| m.subject).as_deref(),
            Some(subject::CLOSE)
        );

        let mut host = launcher.take_host().await;
        let initialize = host.ready().await;
        assert_eq!(initialize.data["receivers"][0]["id"], "r2");
        wait_for(&manager, SessionStatus::Open).await;
        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_stalled_update_ends_session() {
        let (manager, launcher) = native_manager_with(DuplexLauncher::with_capacity(64));
        let mut events = manager.subscribe();

        let selection = manager.open(receivers(&["r1"])).await.expect("open");
        let mut host = launcher.take_host().await;
        host.ready().await;
        wait_for(&manager, SessionStatus::Open).await;

        // The host stops reading; the update cannot be written.
        let err = tokio::time::timeout(
            Duration::from_secs(60),
            manager.update_receivers(receivers(&["r1", "r2", "r3", "r4"])),
        )
        .await
        .expect("update bounded")
        .expect_err("stalled host");
        assert_eq!(err.kind(), ErrorKind::Disconnect);

        assert_eq!(
            selection.outcome().await,
            SelectionOutcome::Errored(ErrorKind::Disconnect)
        );
        assert_eq!(
            events.recv().await.expect("event"),
            SelectorEvent::Error(ErrorKind::Disconnect)
        );

        tokio::time::timeout(Duration::from_secs(60), manager.close())
            .await
            .expect("close bounded");
        drop(host);
    }
}
