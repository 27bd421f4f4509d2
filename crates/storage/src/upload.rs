//! Upload source handed in by the transport layer.

use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A named, readable upload body.
///
/// The body is consumed by reading; an `UploadedFile` is therefore moved into the ingestion
/// call that stores it.
pub struct UploadedFile {
    filename: String,
    body: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadedFile {
    /// Wraps a streaming body.
    pub fn new(filename: impl Into<String>, body: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            filename: filename.into(),
            body: Box::new(body),
        }
    }

    /// Wraps a fully buffered body.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(filename, Cursor::new(bytes.into()))
    }

    /// The client-supplied filename, used only for format classification.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Reads the remaining body into memory.
    pub async fn read_all(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.body.read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    /// Reads at most `buf.len()` bytes. Returns 0 once the body is exhausted.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.body.read(buf).await
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}
