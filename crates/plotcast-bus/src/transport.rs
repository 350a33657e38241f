//! Length-prefixed multi-frame messages over a byte stream.
//!
//! A message is a big-endian `u32` frame count followed by each frame as a
//! big-endian `u32` length and that many bytes. Frames are opaque; empty
//! frames are allowed and preserved.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BusError;

/// Most frames one message may carry.
pub const MAX_FRAMES: u32 = 64;

/// Largest single frame in bytes.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode `frames` as one message.
pub fn encode_message(frames: &[Bytes]) -> Result<Bytes, BusError> {
    let count = u32::try_from(frames.len()).unwrap_or(u32::MAX);
    if count == 0 || count > MAX_FRAMES {
        return Err(BusError::FrameCount(count));
    }
    let capacity = frames
        .iter()
        .map(|frame| frame.len().saturating_add(4))
        .fold(4_usize, usize::saturating_add);
    let mut buf = BytesMut::with_capacity(capacity);
    buf.put_u32(count);
    for frame in frames {
        if frame.len() > MAX_FRAME_LEN {
            return Err(BusError::FrameTooLarge(frame.len()));
        }
        buf.put_u32(u32::try_from(frame.len()).unwrap_or(u32::MAX));
        buf.put_slice(frame);
    }
    Ok(buf.freeze())
}

/// Write an already encoded message and flush.
pub async fn write_encoded<W>(writer: &mut W, encoded: &[u8]) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode and write one message.
pub async fn write_message<W>(writer: &mut W, frames: &[Bytes]) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_message(frames)?;
    write_encoded(writer, &encoded).await
}

/// Read one message.
///
/// Returns `Ok(None)` when the stream ends cleanly between messages. A
/// stream that ends inside a message is an I/O error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<Bytes>>, BusError>
where
    R: AsyncRead + Unpin,
{
    let count = match reader.read_u32().await {
        Ok(count) => count,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if count == 0 || count > MAX_FRAMES {
        return Err(BusError::FrameCount(count));
    }

    let mut frames = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for _ in 0..count {
        let len = usize::try_from(reader.read_u32().await?).unwrap_or(usize::MAX);
        if len > MAX_FRAME_LEN {
            return Err(BusError::FrameTooLarge(len));
        }
        let mut frame = vec![0_u8; len];
        reader.read_exact(&mut frame).await?;
        frames.push(Bytes::from(frame));
    }
    Ok(Some(frames))
}
