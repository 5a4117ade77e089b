//! Length-prefixed postcard framing.
//!
//! Each frame is a 4-byte big-endian payload length followed by the
//! postcard-encoded [`Message`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;
use crate::message::Message;

/// Maximum frame payload: 16 MB. Backup batches are the largest messages.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode a message as a complete frame (length prefix included).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, NetError> {
    let payload = postcard::to_allocvec(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame payload (without its length prefix).
pub fn decode_payload(payload: &[u8]) -> Result<Message, NetError> {
    Ok(postcard::from_bytes(payload)?)
}

/// Write one message frame to `writer`.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame payload from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
/// The payload is returned undecoded so that the caller can skip frames it
/// does not understand without dropping the connection.
pub async fn read_payload<R>(reader: &mut R) -> Result<Option<Vec<u8>>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
