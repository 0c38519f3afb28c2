//! Length-prefixed frames over a reliable stream
//!
//! Each frame is a little-endian `u32` payload length followed by the bincode
//! payload. Frames above `MAX_MESSAGE_SIZE` are refused in both directions.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_MESSAGE_SIZE;
use crate::net::protocol::{encode, EncodeError};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame of {0} bytes is over the size limit")]
    TooLarge(usize),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FramingError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => FramingError::ConnectionClosed,
            _ => FramingError::Io(e),
        }
    }
}

/// Reads frames into one reusable buffer
pub struct FrameReader<R> {
    stream: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Next payload; valid until the following call
    pub async fn next_frame(&mut self) -> Result<&[u8], FramingError> {
        let len = self.stream.read_u32_le().await? as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(FramingError::TooLarge(len));
        }

        self.buf.resize(len, 0);
        self.stream.read_exact(&mut self.buf).await?;
        Ok(&self.buf)
    }
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> Result<(), FramingError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::TooLarge(payload.len()));
    }

    stream.write_u32_le(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Encode `message` and write it as one frame; returns the payload size
pub async fn send<W: AsyncWrite + Unpin, T: Serialize>(
    stream: &mut W,
    message: &T,
) -> Result<usize, FramingError> {
    let bytes = encode(message)?;
    write_frame(stream, &bytes).await?;
    Ok(bytes.len())
}
