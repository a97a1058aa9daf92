//! Length-prefixed message framing for the dispatcher protocol
//!
//! Each frame is a little-endian u32 payload length followed by the
//! serde-encoded [`MwMessage`]. The schema version inside the envelope is
//! checked on decode; a mismatch or malformed frame is a protocol error and
//! the caller drops the connection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{MwMessage, PROTOCOL_VERSION};

/// Upper bound on one message frame
pub const MAX_FRAME: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame too large: {0} bytes")]
    TooLarge(u32),

    #[error("unsupported protocol version {0} (expected {PROTOCOL_VERSION})")]
    Version(u8),
}

impl WireError {
    /// True when the peer is simply gone rather than misbehaving
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            )
        )
    }
}

/// Write one framed message
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &MwMessage) -> Result<(), WireError> {
    let body = serde_json::to_vec(message)?;
    let len = body.len() as u32;
    if len > MAX_FRAME {
        return Err(WireError::TooLarge(len));
    }

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message, enforcing the size guard and schema version
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<MwMessage, WireError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME {
        return Err(WireError::TooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let message: MwMessage = serde_json::from_slice(&body)?;
    let version = message.header().version;
    if version != PROTOCOL_VERSION {
        return Err(WireError::Version(version));
    }
    Ok(message)
}
