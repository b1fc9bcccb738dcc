//! Native host backend.
//!
//! Launches the native selector application through a [`HostLauncher`] and
//! talks to it over a [`NativeChannel`].
//!
//! # Handshake
//!
//! ```text
//! extension                          native host
//!     │ ── receiverSelector:initialize ──► │
//!     │ ◄──── receiverSelector:ready ───── │   (within handshake timeout)
//!     │ ── receiverSelector:update ──────► │   (zero or more)
//!     │ ◄─ receiverSelector:selected/cast  │
//!     │ ── receiverSelector:close ───────► │
//! ```
//!
//! After the handshake a forwarder task validates inbound messages against
//! the current receiver list and reports them as [`BackendEvent`]s. A stream
//! that ends without a local close is reported as
//! [`BackendEvent::Disconnected`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::options::{SelectorKind, SelectorOptions};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::receiver::Receiver;
use crate::transport::{ChannelEvent, HostLauncher, NativeChannel};

use super::backend::{ActionGate, BackendEvent, EventSink, SelectorBackend};

// ============================================================================
// NativeSelector
// ============================================================================

/// [`SelectorBackend`] that drives an out-of-process native selector.
pub struct NativeSelector {
    /// Starts a host per launch.
    launcher: Arc<dyn HostLauncher>,
    /// Options read when the session opened.
    options: SelectorOptions,
    /// Channel to the running host.
    channel: Option<Arc<NativeChannel>>,
    /// Inbound validation.
    gate: Arc<Mutex<ActionGate>>,
    /// Set while closing locally; suppresses the disconnect report.
    closing: Arc<AtomicBool>,
    /// Inbound forwarder task.
    forwarder: Option<JoinHandle<()>>,
}

impl NativeSelector {
    /// Creates a native backend.
    #[must_use]
    pub fn new(launcher: Arc<dyn HostLauncher>, options: SelectorOptions) -> Self {
        Self {
            launcher,
            options,
            channel: None,
            gate: Arc::new(Mutex::new(ActionGate::default())),
            closing: Arc::new(AtomicBool::new(false)),
            forwarder: None,
        }
    }

    /// Starts the host and performs the handshake.
    async fn handshake(
        &mut self,
        receivers: &[Receiver],
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        let channel = Arc::new(self.launcher.launch(&self.options)?);
        let mut inbound = channel
            .take_inbound()
            .ok_or_else(|| Error::launch_failed("Native channel inbound already taken"))?;
        self.channel = Some(Arc::clone(&channel));

        let initialize = OutboundMessage::Initialize {
            receivers: receivers.to_vec(),
            cast_button_title: self.options.cast_button_title.clone(),
        }
        .into_message()?;

        // The initialize write is bounded by the handshake timeout as well.
        let exchange = async {
            channel.send(initialize).await?;
            await_ready(&mut inbound).await
        };
        match timeout(self.options.handshake_timeout(), exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_ms = self.options.handshake_timeout_ms,
                    "Native host did not acknowledge initialize"
                );
                return Err(Error::handshake_timeout(self.options.handshake_timeout_ms));
            }
        }

        Ok(inbound)
    }
}

#[async_trait]
impl SelectorBackend for NativeSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::NativeMac
    }

    async fn launch(&mut self, receivers: &[Receiver], events: EventSink) -> Result<()> {
        self.closing.store(false, Ordering::Release);
        self.gate.lock().arm(receivers);

        let inbound = match self.handshake(receivers).await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.close().await;
                return Err(as_launch_failure(e));
            }
        };

        info!(count = receivers.len(), "Native selector ready");

        self.forwarder = Some(tokio::spawn(forward_inbound(
            inbound,
            events,
            Arc::clone(&self.gate),
            Arc::clone(&self.closing),
        )));
        Ok(())
    }

    async fn update_receivers(&mut self, receivers: &[Receiver]) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(Error::ConnectionClosed)?;
        self.gate.lock().replace(receivers);

        let update = OutboundMessage::Update {
            receivers: receivers.to_vec(),
        }
        .into_message()?;
        match timeout(self.options.handshake_timeout(), channel.send(update)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.options.handshake_timeout_ms,
                    "Native host stopped reading"
                );
                Err(Error::backend("Native host did not accept receiver update"))
            }
        }
    }

    fn release_selection(&mut self) {
        self.gate.lock().release();
    }

    async fn close(&mut self) {
        self.closing.store(true, Ordering::Release);
        self.gate.lock().shut();

        let Some(channel) = self.channel.take() else {
            return;
        };

        let grace = self.options.close_grace();
        match OutboundMessage::Close.into_message() {
            Ok(message) => match timeout(grace, channel.send(message)).await {
                Ok(Ok(())) => trace!("Close sent to native host"),
                Ok(Err(e)) => debug!(error = %e, "Native host did not take close"),
                Err(_) => debug!("Timed out sending close to native host"),
            },
            Err(e) => debug!(error = %e, "Failed to build close message"),
        }

        channel.shutdown(grace).await;

        if let Some(task) = self.forwarder.take() {
            task.abort();
        }

        debug!("Native selector closed");
    }
}

impl Drop for NativeSelector {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Waits for the handshake acknowledgment.
///
/// Unknown and premature messages are ignored; a close, an error or the
/// stream ending fails the launch.
async fn await_ready(inbound: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Result<()> {
    while let Some(event) = inbound.recv().await {
        let message = match event {
            ChannelEvent::Message(message) => message,
            ChannelEvent::Closed { reason } => {
                return Err(Error::launch_failed(format!(
                    "Native host exited during handshake{}",
                    reason.map(|r| format!(": {r}")).unwrap_or_default()
                )));
            }
        };

        match InboundMessage::parse(&message) {
            Ok(Some(InboundMessage::Ready)) => return Ok(()),
            Ok(Some(InboundMessage::Close)) => {
                return Err(Error::launch_failed("Native host closed during handshake"));
            }
            Ok(Some(InboundMessage::Error(reason))) => {
                return Err(Error::launch_failed(reason));
            }
            Ok(_) => {
                debug!(subject = %message.subject, "Ignoring message before handshake");
            }
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "Invalid message before handshake");
            }
        }
    }

    Err(Error::launch_failed("Native channel closed during handshake"))
}

/// Forwards validated host messages to the session.
async fn forward_inbound(
    mut inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    events: EventSink,
    gate: Arc<Mutex<ActionGate>>,
    closing: Arc<AtomicBool>,
) {
    while let Some(event) = inbound.recv().await {
        let message = match event {
            ChannelEvent::Message(message) => message,
            ChannelEvent::Closed { reason } => {
                gate.lock().shut();
                if !closing.load(Ordering::Acquire) {
                    info!(reason = ?reason, "Native host disconnected");
                    let _ = events.send(BackendEvent::Disconnected { reason });
                }
                return;
            }
        };

        let parsed = match InboundMessage::parse(&message) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!(subject = %message.subject, "Ignoring unknown subject");
                continue;
            }
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "Dropping invalid message");
                continue;
            }
        };

        let Some(event) = admit(&mut gate.lock(), parsed) else {
            continue;
        };

        if events.send(event).is_err() {
            debug!("Session gone; stopping native forwarder");
            return;
        }
    }
}

/// Validates one host message against the gate.
fn admit(gate: &mut ActionGate, message: InboundMessage) -> Option<BackendEvent> {
    match message {
        InboundMessage::Ready => {
            debug!("Ignoring late handshake acknowledgment");
            None
        }

        InboundMessage::Selected(id) => match gate.accept_select(&id) {
            Ok(true) => Some(BackendEvent::Selected(id)),
            Ok(false) => {
                debug!(receiver_id = %id, "Ignoring repeated selection");
                None
            }
            Err(e) => {
                warn!(error = %e, "Rejected native selection");
                None
            }
        },

        InboundMessage::Cast(id) => match gate.accept_cast(&id) {
            Ok(true) => Some(BackendEvent::CastRequested(id)),
            Ok(false) => {
                debug!(receiver_id = %id, "Ignoring repeated cast");
                None
            }
            Err(e) => {
                warn!(error = %e, "Rejected native cast");
                None
            }
        },

        InboundMessage::Close => gate.accept_cancel().then_some(BackendEvent::Cancelled),

        InboundMessage::Error(reason) => {
            warn!(reason = %reason, "Native host reported an error");
            gate.shut();
            Some(BackendEvent::Disconnected {
                reason: Some(reason),
            })
        }
    }
}

/// Normalizes any launch-time error to the launch failure kind.
fn as_launch_failure(error: Error) -> Error {
    match error.kind() {
        ErrorKind::LaunchFailure => error,
        _ => Error::launch_failed(error.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
