use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single encoded message. A strip of a few thousand LEDs
/// stays far below this.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("channel io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {limit} byte limit", limit = MAX_FRAME_LEN)]
    FrameTooLarge(usize),
    #[error("channel closed in the middle of a frame")]
    Truncated,
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Whether the underlying channel is unusable after this error. Decode
    /// failures leave the stream positioned at the next frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Decode(_))
    }
}

/// Reads length-prefixed JSON frames: a big-endian `u32` byte count followed
/// by the payload.
pub struct FrameReader<R> {
    inner: R,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns `Ok(None)` when the channel closes cleanly between frames.
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.inner.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(ProtocolError::Truncated)
                };
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::Truncated
            } else {
                ProtocolError::Io(err)
            }
        })?;
        serde_json::from_slice(&buf)
            .map(Some)
            .map_err(ProtocolError::Decode)
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let bytes = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(bytes.len()));
        }
        let len = bytes.len() as u32;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
