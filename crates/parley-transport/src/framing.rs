//! Length-prefixed framing over byte streams.
//!
//! ```text
//! frame := length:u32 (big-endian) || payload (length bytes)
//! ```
//!
//! The reader checks the declared length against a caller-supplied maximum
//! before allocating, so a hostile prefix cannot force a large allocation.
//! The writer builds the complete frame in one buffer and hands it to the
//! stream with a single `write_all`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default inbound frame limit (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Framing errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Declared length exceeds the configured maximum
    #[error("frame of {declared} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Length from the prefix (or of the outbound payload)
        declared: usize,
        /// Configured limit
        max: usize,
    },

    /// Stream ended inside a frame
    #[error("stream closed mid-frame: expected {expected} bytes, got {received}")]
    Truncated {
        /// Bytes the frame still needed
        expected: usize,
        /// Bytes actually read
        received: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Build `length || payload` in one buffer.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if `payload` exceeds `max_frame_size` or
/// cannot be described by a 32-bit length.
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        declared: payload.len(),
        max: max_frame_size,
    })?;
    if payload.len() > max_frame_size {
        return Err(FrameError::TooLarge {
            declared: payload.len(),
            max: max_frame_size,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] for an oversized payload (nothing is
/// written) or [`FrameError::Io`] if the stream fails.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    max_frame_size: usize,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(payload, max_frame_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` if the stream ends cleanly on a frame boundary.
///
/// # Errors
///
/// - [`FrameError::TooLarge`] if the prefix declares more than `max_frame_size`
/// - [`FrameError::Truncated`] if the stream ends inside the prefix or payload
/// - [`FrameError::Io`] on any other read failure
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_SIZE,
                received: filled,
            });
        }
        filled += n;
    }

    let declared = u32::from_be_bytes(prefix) as usize;
    if declared > max_frame_size {
        return Err(FrameError::TooLarge {
            declared,
            max: max_frame_size,
        });
    }

    let mut payload = vec![0u8; declared];
    let mut received = 0;
    while received < declared {
        let n = reader.read(&mut payload[received..]).await?;
        if n == 0 {
            return Err(FrameError::Truncated {
                expected: declared,
                received,
            });
        }
        received += n;
    }

    Ok(Some(payload))
}
