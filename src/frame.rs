//! Length-prefixed frame codec.
//!
//! Each chat message travels as one frame: a 4-byte big-endian length
//! followed by exactly that many bytes of UTF-8 text.
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  UTF-8 payload   |
//! +----------------+------------------+
//! ```
//!
//! A zero-length frame carries no message and is read as end of stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult};

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Checks `len` against `max` and returns it as a wire length.
fn frame_len(len: usize, max: u32) -> AppResult<u32> {
    u32::try_from(len)
        .ok()
        .filter(|len| *len <= max)
        .ok_or(AppError::FrameTooLarge { size: len, max })
}

/// Encodes `text` as a complete frame.
pub fn encode_frame(text: &str, max: u32) -> AppResult<Vec<u8>> {
    let len = frame_len(text.len(), max)?;

    let mut buffer = Vec::with_capacity(FRAME_HEADER_LEN + text.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(text.as_bytes());
    Ok(buffer)
}

/// Reads frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_frame_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_size: u32) -> Self {
        Self {
            reader,
            max_frame_size,
        }
    }

    /// Reads a single frame.
    ///
    /// Returns `Ok(None)` when the peer shuts down before or during a frame,
    /// or sends a zero-length frame. The declared length is checked against
    /// the maximum before any buffer is allocated.
    pub async fn read_frame(&mut self) -> AppResult<Option<String>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(header);
        if len == 0 {
            return Ok(None);
        }
        if len > self.max_frame_size {
            return Err(AppError::FrameTooLarge {
                size: len as usize,
                max: self.max_frame_size,
            });
        }

        let mut payload = vec![0u8; len as usize];
        match self.reader.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        Ok(Some(String::from_utf8(payload)?))
    }
}

/// Writes frames to an async byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
    max_frame_size: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, max_frame_size: u32) -> Self {
        Self {
            writer,
            max_frame_size,
        }
    }

    /// Writes the whole frame, then flushes.
    pub async fn write_frame(&mut self, text: &str) -> AppResult<()> {
        let frame = encode_frame(text, self.max_frame_size)?;

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write direction of the stream.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_FRAME_SIZE;
    use std::io::Cursor;

    #[test]
    fn encode_sets_big_endian_length() {
        let bytes = encode_frame("hello", MAX_FRAME_SIZE).unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
        assert_eq!(&bytes[4..], b"hello");
    }

    #[test]
    fn encode_rejects_oversized_text() {
        let result = encode_frame("too long", 4);
        assert!(matches!(
            result,
            Err(AppError::FrameTooLarge { size: 8, max: 4 })
        ));
    }

    #[tokio::test]
    async fn reader_multiple_frames() {
        let mut bytes = encode_frame("first", MAX_FRAME_SIZE).unwrap();
        bytes.extend(encode_frame("second", MAX_FRAME_SIZE).unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes), MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.read_frame().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_empty_stream_is_end() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()), MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_zero_length_frame_is_end() {
        let bytes = 0u32.to_be_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(bytes), MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_truncated_header_is_end() {
        let mut reader = FrameReader::new(Cursor::new(vec![0, 0]), MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_truncated_payload_is_end() {
        // Claim 100 bytes but only provide 10
        let mut bytes = vec![0, 0, 0, 100];
        bytes.extend_from_slice(&[b'x'; 10]);

        let mut reader = FrameReader::new(Cursor::new(bytes), MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_rejects_oversized_header() {
        // Only the header is present: a reader that tried to allocate and
        // fill the payload would report end of stream instead.
        let bytes = u32::MAX.to_be_bytes().to_vec();
        let mut reader = FrameReader::new(Cursor::new(bytes), MAX_FRAME_SIZE);

        let result = reader.read_frame().await;
        assert!(matches!(
            result,
            Err(AppError::FrameTooLarge { size, max: MAX_FRAME_SIZE }) if size == u32::MAX as usize
        ));
    }

    #[tokio::test]
    async fn reader_rejects_invalid_utf8() {
        let bytes = vec![0, 0, 0, 2, 0xff, 0xfe];
        let mut reader = FrameReader::new(Cursor::new(bytes), MAX_FRAME_SIZE);
        assert!(matches!(
            reader.read_frame().await,
            Err(AppError::InvalidUtf8(_))
        ));
    }

    #[tokio::test]
    async fn reassembles_partial_writes() {
        // A tiny duplex buffer forces both sides through many partial
        // reads and writes.
        let (client, server) = tokio::io::duplex(7);
        let text = "héllo wörld, this frame spans many small chunks".repeat(20);

        let expected = text.clone();
        let writer = tokio::spawn(async move {
            let mut writer = FrameWriter::new(client, MAX_FRAME_SIZE);
            writer.write_frame(&text).await.unwrap();
            writer.write_frame("tail").await.unwrap();
        });

        let mut reader = FrameReader::new(server, MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), Some(expected));
        assert_eq!(reader.read_frame().await.unwrap().as_deref(), Some("tail"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn writer_emits_encoded_frame() {
        let mut writer = FrameWriter::new(Vec::new(), MAX_FRAME_SIZE);
        writer.write_frame("hi there").await.unwrap();
        assert_eq!(writer.writer, encode_frame("hi there", MAX_FRAME_SIZE).unwrap());
    }

    #[tokio::test]
    async fn writer_rejects_oversized_text() {
        let mut writer = FrameWriter::new(Vec::new(), 3);
        assert!(matches!(
            writer.write_frame("four").await,
            Err(AppError::FrameTooLarge { size: 4, max: 3 })
        ));
        assert!(writer.writer.is_empty());
    }
}
