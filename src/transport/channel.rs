//! Native messaging channel and event loop.
//!
//! This module handles the byte-stream connection to the native host,
//! including framing, inbound routing and liveness tracking.
//!
//! # Event Loop
//!
//! The channel spawns two tokio tasks:
//!
//! - A reader that decodes inbound frames and forwards them as
//!   [`ChannelEvent::Message`], ending with one [`ChannelEvent::Closed`]
//!   when the stream ends or breaks
//! - A writer that serializes outbound messages and performs shutdown
//!
//! Malformed frames are logged and dropped; they never end the channel.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{NativeMessage, decode_body, read_frame, write_frame};

use super::host::ProcessGuard;

// ============================================================================
// ChannelEvent
// ============================================================================

/// Notification from the channel's reader.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A well-formed envelope arrived.
    Message(NativeMessage),
    /// The stream ended or broke. Sent exactly once, last.
    Closed {
        /// Why the stream ended, if it was not a clean EOF.
        reason: Option<String>,
    },
}

// ============================================================================
// ChannelCommand
// ============================================================================

/// Internal commands for the writer loop.
enum ChannelCommand {
    /// Write a message and report the result.
    Send {
        message: NativeMessage,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Close the stream and stop the host.
    Shutdown {
        grace: Duration,
        done_tx: oneshot::Sender<()>,
    },
}

// ============================================================================
// NativeChannel
// ============================================================================

/// Framed connection to one native host instance.
///
/// A channel is never reused: once closed, a new launch creates a new one.
///
/// # Thread Safety
///
/// `NativeChannel` is `Send + Sync`; sends are serialized by the writer loop.
pub struct NativeChannel {
    /// Channel for sending commands to the writer loop.
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Inbound events, handed out once.
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    /// Set once the stream has ended or been shut down.
    closed: Arc<AtomicBool>,
    /// Reader task, aborted on shutdown.
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Writer task, aborted if it cannot finish a shutdown in time.
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl NativeChannel {
    /// Creates a channel over a reader/writer pair.
    ///
    /// Spawns the reader and writer tasks internally. `process` is the
    /// host process that owns the other ends, if any.
    pub fn new<R, W>(reader: R, writer: W, process: Option<ProcessGuard>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(Self::run_reader(reader, inbound_tx, Arc::clone(&closed)));
        let reader = Arc::new(Mutex::new(Some(reader_task)));

        let writer_task = tokio::spawn(Self::run_writer(
            writer,
            command_rx,
            process,
            Arc::clone(&closed),
            Arc::clone(&reader),
        ));

        Self {
            command_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed,
            reader,
            writer: Mutex::new(Some(writer_task)),
        }
    }

    /// Takes the inbound event stream.
    ///
    /// Returns `None` after the first call.
    #[must_use]
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.inbound_rx.lock().take()
    }

    /// Sends a message to the host.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel is closed
    /// - [`Error::Io`] if the write fails
    pub async fn send(&self, message: NativeMessage) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();
        self.command_tx
            .send(ChannelCommand::Send { message, result_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        result_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Returns `true` once the host's stream has ended or the channel was shut down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the stream and stops the host.
    ///
    /// Waits at most `grace` for the host process to exit before killing it.
    /// A writer stuck on a host that no longer reads is abandoned after a
    /// further `grace`, which drops the pipes and kills the host.
    /// No [`ChannelEvent::Closed`] is emitted for a local shutdown.
    pub async fn shutdown(&self, grace: Duration) {
        self.closed.store(true, Ordering::Release);

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ChannelCommand::Shutdown { grace, done_tx })
            .is_err()
        {
            // Writer already gone.
            self.abort_reader();
            return;
        }

        if timeout(grace.saturating_mul(2), done_rx).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Writer stuck; abandoning native host");
            self.abort_writer();
            self.abort_reader();
        }
    }

    /// Stops the writer without waiting.
    fn abort_writer(&self) {
        if let Some(task) = self.writer.lock().take() {
            task.abort();
        }
    }

    /// Stops the reader without waiting.
    fn abort_reader(&self) {
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
    }

    /// Reader loop: frames in, events out.
    async fn run_reader<R>(
        mut reader: R,
        inbound_tx: mpsc::UnboundedSender<ChannelEvent>,
        closed: Arc<AtomicBool>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let reason = loop {
            match read_frame(&mut reader).await {
                Ok(Some(body)) => match decode_body(&body) {
                    Ok(message) => {
                        trace!(subject = %message.subject, "Inbound message");
                        if inbound_tx.send(ChannelEvent::Message(message)).is_err() {
                            // Nobody listens any more; the writer side may still be in use.
                            debug!("Inbound receiver dropped");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, len = body.len(), "Dropping malformed frame");
                    }
                },

                Ok(None) => {
                    debug!("Native host stream ended");
                    break None;
                }

                Err(e) => {
                    debug!(error = %e, "Native host stream failed");
                    break Some(e.to_string());
                }
            }
        };

        closed.store(true, Ordering::Release);
        let _ = inbound_tx.send(ChannelEvent::Closed { reason });
    }

    /// Writer loop: commands in, frames out.
    async fn run_writer<W>(
        mut writer: W,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        mut process: Option<ProcessGuard>,
        closed: Arc<AtomicBool>,
        reader: Arc<Mutex<Option<JoinHandle<()>>>>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut shutdown_ack = None;
        let mut grace = Duration::ZERO;

        while let Some(command) = command_rx.recv().await {
            match command {
                ChannelCommand::Send { message, result_tx } => {
                    let result = write_frame(&mut writer, &message).await;
                    if let Err(ref e) = result {
                        warn!(subject = %message.subject, error = %e, "Failed to write frame");
                    }
                    let _ = result_tx.send(result);
                }

                ChannelCommand::Shutdown {
                    grace: requested,
                    done_tx,
                } => {
                    debug!("Shutdown command received");
                    grace = requested;
                    shutdown_ack = Some(done_tx);
                    break;
                }
            }
        }

        closed.store(true, Ordering::Release);
        let _ = writer.shutdown().await;
        drop(writer);

        if let Some(task) = reader.lock().take() {
            task.abort();
        }

        if let Some(ref mut guard) = process {
            guard.wait_or_kill(grace).await;
        }

        if let Some(done_tx) = shutdown_ack {
            let _ = done_tx.send(());
        }

        debug!("Writer loop terminated");
    }
}

impl Drop for NativeChannel {
    fn drop(&mut self) {
        // Dropping the command sender ends the writer loop, which kills the host.
        self.abort_reader();
    }
}

// ============================================================================
// Tests
// ============================================================================
