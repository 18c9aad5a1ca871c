//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed JSON-RPC messages, plus the pure
//! [`encode`] used by both the writer and tests.

use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::FramingError;

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Serialize `msg` and prepend the `Content-Length` header.
///
/// The length is the UTF-8 byte count of the payload, not a character count.
pub fn encode(msg: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads JSON-RPC frames from an async reader.
///
/// Parses headers and reads exactly `Content-Length` bytes of payload. The
/// payload is returned undecoded so that a malformed JSON body can be dropped
/// by the caller without losing stream synchronization.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame's payload bytes.
    ///
    /// Returns `Ok(None)` on EOF between frames (clean shutdown).
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(FramingError::FrameTooLarge {
                len: content_length,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => FramingError::EofInBody,
                _ => FramingError::Io(e),
            })?;

        Ok(Some(body))
    }

    /// Read the next frame and decode it as JSON.
    ///
    /// Convenience for callers that treat an invalid body as fatal.
    pub async fn read_json(&mut self) -> Result<Option<serde_json::Value>, FramingError> {
        match self.read_frame().await? {
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| FramingError::Io(std::io::Error::new(ErrorKind::InvalidData, e))),
            None => Ok(None),
        }
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>, FramingError> {
        let mut content_length: Option<usize> = None;
        let mut line = Vec::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut line).await?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte of a frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FramingError::EofInHeaders);
            }
            saw_any_header_bytes = true;

            if line.last() != Some(&b'\n') {
                return Err(FramingError::EofInHeaders);
            }

            let text = std::str::from_utf8(&line).map_err(|_| FramingError::InvalidHeaderEncoding)?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are matched case-insensitively; unknown headers
            // (e.g. Content-Type) are ignored.
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                let len = value
                    .parse::<usize>()
                    .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(FramingError::MissingContentLength),
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header and flush it.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> std::io::Result<()> {
        let frame = encode(msg).map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }

    /// Shut down the underlying writer, closing the pipe.
    pub async fn close(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}
