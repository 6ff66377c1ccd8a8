//! Stream accessor traits for the transport layer
//!
//! A pull model: `read` returning `n > 0` delivers data, `read` returning
//! `0` means the peer ended the stream, an `Err` from `read` or `write` is
//! a transport failure, and timeouts are driven by the caller's own timers.

use async_trait::async_trait;
use parley_core::{ParleyError, ParleyResult};
use std::time::Duration;

/// Stream accessor interface over an open byte stream
#[async_trait]
pub trait StreamAccessor: Send + Sync {
    /// Set the read/write timeout
    ///
    /// # Arguments
    ///
    /// * `timeout` - The timeout duration. None means infinite timeout.
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> ParleyResult<()>;

    /// Read data from the stream
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 if the peer closed the stream
    async fn read(&mut self, buf: &mut [u8]) -> ParleyResult<usize>;

    /// Read exact number of bytes from the stream
    async fn read_exact(&mut self, mut buf: &mut [u8]) -> ParleyResult<()> {
        while !buf.is_empty() {
            let n = self.read(buf).await?;
            if n == 0 {
                return Err(ParleyError::Connection(
                    "unexpected end of stream".to_string(),
                ));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Write data to the stream
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(&mut self, buf: &[u8]) -> ParleyResult<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> ParleyResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(ParleyError::Connection("failed to write all data".to_string()));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered data
    async fn flush(&mut self) -> ParleyResult<()>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream gracefully (send end-of-stream to the peer)
    async fn close(&mut self) -> ParleyResult<()>;

    /// Tear the stream down immediately, without a graceful shutdown
    fn abort(&mut self);
}

/// Transport layer trait that extends StreamAccessor with connection setup
#[async_trait]
pub trait TransportLayer: StreamAccessor {
    /// Open a connection to the given host and port
    async fn open(&mut self, host: &str, port: u16) -> ParleyResult<()>;
}
