use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
    #[error("line exceeds {0} bytes")]
    TooLong(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads CRLF-terminated lines with a per-read deadline and a hard cap on
/// line length. Bytes received past the returned line stay buffered.
pub struct LineReader {
    max_line: usize,
    read_timeout: Duration,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new(max_line: usize, read_timeout: Duration) -> Self {
        Self {
            max_line,
            read_timeout,
            buf: Vec::new(),
        }
    }

    pub async fn read_line<T: AsyncRead + Unpin>(
        &mut self,
        stream: &mut T,
    ) -> Result<Vec<u8>, ReadError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let rest = self.buf.split_off(pos + 1);
                let line = std::mem::replace(&mut self.buf, rest);
                return Ok(line);
            }
            if self.buf.len() >= self.max_line {
                return Err(ReadError::TooLong(self.max_line));
            }

            let mut chunk = [0u8; 512];
            let want = chunk.len().min(self.max_line - self.buf.len());
            let n = match timeout(self.read_timeout, stream.read(&mut chunk[..want])).await {
                Ok(Ok(0)) => return Err(ReadError::Closed),
                Ok(Ok(n)) => n,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(ReadError::Timeout(self.read_timeout)),
            };
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Bytes already received but not yet handed out as a line.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }
}

/// Fills `buf` completely or fails, each read bounded by `read_timeout`.
pub async fn read_exact_timeout<T: AsyncRead + Unpin>(
    stream: &mut T,
    buf: &mut [u8],
    read_timeout: Duration,
) -> Result<(), ReadError> {
    match timeout(read_timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(ReadError::Closed),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ReadError::Timeout(read_timeout)),
    }
}
