//! In-process popup backend.
//!
//! The popup lives on the extension's own event loop. The crate does not
//! render anything: a [`PopupRenderer`] supplied by the extension draws the
//! surface, and the UI reports user actions by calling [`PopupActions`]
//! directly. No serialization is involved.
//!
//! # Example
//!
//! ```ignore
//! struct MyPopup;
//!
//! impl PopupRenderer for MyPopup {
//!     fn render(&self, view: PopupView) -> Result<()> {
//!         // draw view.receivers, wire buttons to view.actions
//!         Ok(())
//!     }
//!     fn update(&self, receivers: &[Receiver]) {}
//!     fn tear_down(&self) {}
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::identifiers::ReceiverId;
use crate::options::SelectorKind;
use crate::receiver::Receiver;

use super::backend::{ActionGate, BackendEvent, EventSink, SelectorBackend};

// ============================================================================
// PopupRenderer
// ============================================================================

/// Extension-provided popup surface.
pub trait PopupRenderer: Send + Sync {
    /// Shows the popup. Returns once the surface is visibly ready.
    ///
    /// # Errors
    ///
    /// Any error is reported as a launch failure.
    fn render(&self, view: PopupView) -> Result<()>;

    /// Replaces the receivers shown.
    fn update(&self, receivers: &[Receiver]);

    /// Removes the popup. Must complete synchronously.
    fn tear_down(&self);
}

// ============================================================================
// PopupView
// ============================================================================

/// Everything the popup needs to draw itself.
#[derive(Debug, Clone)]
pub struct PopupView {
    /// Receivers to list.
    pub receivers: Vec<Receiver>,
    /// Whether to use the Photon theme.
    pub uses_photon_theme: bool,
    /// Callbacks for user actions.
    pub actions: PopupActions,
}

// ============================================================================
// PopupActions
// ============================================================================

/// Handle the popup UI calls when the user acts.
///
/// Every method returns `true` if the action was accepted. Actions naming an
/// unknown receiver, repeated actions, and actions after the popup closed
/// are ignored.
#[derive(Clone)]
pub struct PopupActions {
    /// Shared with the backend.
    gate: Arc<Mutex<ActionGate>>,
    /// Session event queue.
    events: EventSink,
}

impl fmt::Debug for PopupActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopupActions")
            .field("open", &self.gate.lock().is_open())
            .finish_non_exhaustive()
    }
}

impl PopupActions {
    /// User picked a receiver.
    pub fn select(&self, receiver_id: impl Into<ReceiverId>) -> bool {
        let receiver_id = receiver_id.into();
        match self.gate.lock().accept_select(&receiver_id) {
            Ok(true) => self.emit(BackendEvent::Selected(receiver_id)),
            Ok(false) => {
                debug!(receiver_id = %receiver_id, "Ignoring repeated selection");
                false
            }
            Err(e) => {
                warn!(error = %e, "Rejected popup selection");
                false
            }
        }
    }

    /// User dropped the pending selection.
    pub fn deselect(&self) -> bool {
        let accepted = self.gate.lock().accept_deselect();
        accepted && self.emit(BackendEvent::Deselected)
    }

    /// User pressed cast.
    pub fn cast(&self, receiver_id: impl Into<ReceiverId>) -> bool {
        let receiver_id = receiver_id.into();
        match self.gate.lock().accept_cast(&receiver_id) {
            Ok(true) => self.emit(BackendEvent::CastRequested(receiver_id)),
            Ok(false) => {
                debug!(receiver_id = %receiver_id, "Ignoring repeated cast");
                false
            }
            Err(e) => {
                warn!(error = %e, "Rejected popup cast");
                false
            }
        }
    }

    /// User closed the popup.
    pub fn cancel(&self) -> bool {
        let accepted = self.gate.lock().accept_cancel();
        accepted && self.emit(BackendEvent::Cancelled)
    }

    fn emit(&self, event: BackendEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

// ============================================================================
// PopupSelector
// ============================================================================

/// [`SelectorBackend`] that drives an in-process popup.
pub struct PopupSelector {
    /// Extension-provided surface.
    renderer: Arc<dyn PopupRenderer>,
    /// Theme flag from options.
    uses_photon_theme: bool,
    /// Action validation, shared with [`PopupActions`].
    gate: Arc<Mutex<ActionGate>>,
    /// Whether the surface is currently shown.
    rendered: bool,
}

impl PopupSelector {
    /// Creates a popup backend over `renderer`.
    #[must_use]
    pub fn new(renderer: Arc<dyn PopupRenderer>, uses_photon_theme: bool) -> Self {
        Self {
            renderer,
            uses_photon_theme,
            gate: Arc::new(Mutex::new(ActionGate::default())),
            rendered: false,
        }
    }
}

#[async_trait]
impl SelectorBackend for PopupSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Popup
    }

    async fn launch(&mut self, receivers: &[Receiver], events: EventSink) -> Result<()> {
        self.gate.lock().arm(receivers);

        let view = PopupView {
            receivers: receivers.to_vec(),
            uses_photon_theme: self.uses_photon_theme,
            actions: PopupActions {
                gate: Arc::clone(&self.gate),
                events,
            },
        };

        if let Err(e) = self.renderer.render(view) {
            self.gate.lock().shut();
            return Err(match e.kind() {
                ErrorKind::LaunchFailure => e,
                _ => Error::launch_failed(e.to_string()),
            });
        }

        self.rendered = true;
        debug!(count = receivers.len(), "Popup rendered");
        Ok(())
    }

    async fn update_receivers(&mut self, receivers: &[Receiver]) -> Result<()> {
        self.gate.lock().replace(receivers);
        if self.rendered {
            self.renderer.update(receivers);
        }
        Ok(())
    }

    fn release_selection(&mut self) {
        self.gate.lock().release();
    }

    async fn close(&mut self) {
        self.gate.lock().shut();
        if std::mem::take(&mut self.rendered) {
            self.renderer.tear_down();
            debug!("Popup torn down");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    /// Renderer that records calls and keeps the last view.
    #[derive(Default)]
    struct RecordingRenderer {
        view: Mutex<Option<PopupView>>,
        updates: Mutex<Vec<usize>>,
        torn_down: Mutex<usize>,
        fail: bool,
    }

    impl PopupRenderer for RecordingRenderer {
        fn render(&self, view: PopupView) -> Result<()> {
            if self.fail {
                return Err(Error::config("no window"));
            }
            *self.view.lock() = Some(view);
            Ok(())
        }

        fn update(&self, receivers: &[Receiver]) {
            self.updates.lock().push(receivers.len());
        }

        fn tear_down(&self) {
            *self.torn_down.lock() += 1;
        }
    }

    fn receivers(ids: &[&str]) -> Vec<Receiver> {
        ids.iter()
            .map(|id| Receiver::new(*id, "TV", "10.0.0.5", 8009).expect("valid"))
            .collect()
    }

    #[tokio::test]
    async fn test_actions_flow_to_event_queue() {
        let renderer = Arc::new(RecordingRenderer::default());
        let mut popup = PopupSelector::new(renderer.clone(), true);
        let (tx, mut rx) = mpsc::unbounded_channel();

        popup.launch(&receivers(&["r1"]), tx).await.expect("launch");
        let view = renderer.view.lock().clone().expect("rendered");
        assert!(view.uses_photon_theme);
        assert_eq!(view.receivers.len(), 1);

        assert!(view.actions.select("r1"));
        assert!(!view.actions.select("r1"));
        assert!(view.actions.cast("r1"));

        assert_eq!(rx.recv().await, Some(BackendEvent::Selected(ReceiverId::new("r1"))));
        assert_eq!(
            rx.recv().await,
            Some(BackendEvent::CastRequested(ReceiverId::new("r1")))
        );
    }

    #[tokio::test]
    async fn test_stale_action_emits_nothing() {
        let renderer = Arc::new(RecordingRenderer::default());
        let mut popup = PopupSelector::new(renderer.clone(), false);
        let (tx, mut rx) = mpsc::unbounded_channel();

        popup.launch(&receivers(&["r1"]), tx).await.expect("launch");
        let actions = renderer.view.lock().clone().expect("rendered").actions;

        assert!(!actions.select("ghost"));
        assert!(actions.cancel());
        assert_eq!(rx.recv().await, Some(BackendEvent::Cancelled));
    }

    #[tokio::test]
    async fn test_render_failure_is_launch_failure() {
        let renderer = Arc::new(RecordingRenderer {
            fail: true,
            ..Default::default()
        });
        let mut popup = PopupSelector::new(renderer, true);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = popup
            .launch(&receivers(&["r1"]), tx)
            .await
            .expect_err("render fails");
        assert_eq!(err.kind(), ErrorKind::LaunchFailure);
    }

    #[tokio::test]
    async fn test_close_tears_down_once_and_silences_actions() {
        let renderer = Arc::new(RecordingRenderer::default());
        let mut popup = PopupSelector::new(renderer.clone(), true);
        let (tx, _rx) = mpsc::unbounded_channel();

        popup.launch(&receivers(&["r1"]), tx).await.expect("launch");
        let actions = renderer.view.lock().clone().expect("rendered").actions;

        popup.update_receivers(&receivers(&["r1", "r2"])).await.expect("update");
        assert_eq!(*renderer.updates.lock(), vec![2]);

        popup.close().await;
        popup.close().await;
        assert_eq!(*renderer.torn_down.lock(), 1);
        assert!(!actions.select("r1"));
    }
}
