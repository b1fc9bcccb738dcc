//! Native messaging framing.
//!
//! Each frame is a 32-bit unsigned length in native byte order followed by
//! that many bytes of UTF-8 JSON.
//!
//! ```text
//! ┌──────────────┬───────────────────────────────┐
//! │ len: u32 (ne)│ {"subject": ..., "data": ...} │
//! └──────────────┴───────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};

use super::NativeMessage;

// ============================================================================
// Constants
// ============================================================================

/// Largest frame accepted from the native host (1 MiB).
pub const MAX_INBOUND_FRAME: usize = 1024 * 1024;

/// Size of the length prefix.
const HEADER_LEN: usize = 4;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a message into a length-prefixed frame.
///
/// # Errors
///
/// - [`Error::Json`] if serialization fails
/// - [`Error::Protocol`] if the payload does not fit the length prefix
pub fn encode_frame(message: &NativeMessage) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::protocol(format!("Frame too large: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_ne_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a frame body (without length prefix) into a message.
///
/// # Errors
///
/// Returns [`Error::Json`] if the body is not a valid envelope.
pub fn decode_body(body: &[u8]) -> Result<NativeMessage> {
    Ok(serde_json::from_slice(body)?)
}

// ============================================================================
// Stream I/O
// ============================================================================

/// Writes one framed message and flushes.
///
/// # Errors
///
/// - [`Error::Io`] if the stream is broken
/// - see [`encode_frame`]
pub async fn write_frame<W>(writer: &mut W, message: &NativeMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    trace!(subject = %message.subject, len = frame.len(), "Frame written");
    Ok(())
}

/// Reads one frame body.
///
/// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
///
/// # Errors
///
/// - [`Error::Io`] if the stream fails or ends inside a frame body
/// - [`Error::Protocol`] if the stream ends inside the length prefix or the
///   length exceeds [`MAX_INBOUND_FRAME`]
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    match reader.read_exact(&mut header[1..]).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(Error::protocol("Stream ended inside a frame header"));
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INBOUND_FRAME {
        return Err(Error::protocol(format!(
            "Inbound frame too large: {len} > {MAX_INBOUND_FRAME}"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    trace!(len, "Frame read");
    Ok(Some(body))
}

// ============================================================================
// Tests
// ============================================================================
