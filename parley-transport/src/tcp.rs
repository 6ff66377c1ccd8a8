//! TCP transport implementation

use crate::stream::{StreamAccessor, TransportLayer};
use async_trait::async_trait;
use log::debug;
use parley_core::{ParleyError, ParleyResult};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream").finish()
    }
}

impl Deref for DebugTcpStream {
    type Target = TcpStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugTcpStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// TCP transport layer implementation
///
/// The transport carries no timeout of its own by default; the connection
/// dispatcher owns the single connection-wide idle timeout and bounds the
/// connect attempt itself. An optional per-I/O timeout is still available
/// through [`StreamAccessor::set_timeout`] for standalone use.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<DebugTcpStream>,
    timeout: Option<Duration>,
    closed: bool,
}

impl TcpTransport {
    /// Create a new, unconnected TCP transport
    pub fn new() -> Self {
        Self {
            stream: None,
            timeout: None,
            closed: true,
        }
    }

    /// Create a TCP transport with a per-I/O timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            stream: None,
            timeout: Some(timeout),
            closed: true,
        }
    }

    fn stream_mut(&mut self) -> ParleyResult<&mut DebugTcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ParleyError::Connection("TCP stream not connected".to_string()))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self, host: &str, port: u16) -> ParleyResult<()> {
        if !self.closed {
            return Err(ParleyError::Connection(
                "connection has already been opened".to_string(),
            ));
        }

        debug!("opening TCP connection to {}:{}", host, port);
        let stream = if let Some(timeout) = self.timeout {
            tokio::time::timeout(timeout, TcpStream::connect((host, port)))
                .await
                .map_err(|_| ParleyError::Timeout(format!("connect to {}:{}", host, port)))?
                .map_err(ParleyError::from)?
        } else {
            TcpStream::connect((host, port))
                .await
                .map_err(ParleyError::from)?
        };

        self.stream = Some(DebugTcpStream(stream));
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> ParleyResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> ParleyResult<usize> {
        let timeout = self.timeout;
        let stream = self.stream_mut()?;

        let result = if let Some(timeout) = timeout {
            tokio::time::timeout(timeout, stream.read(buf))
                .await
                .map_err(|_| ParleyError::Timeout("read".to_string()))?
                .map_err(ParleyError::from)
        } else {
            stream.read(buf).await.map_err(ParleyError::from)
        };

        match result {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> ParleyResult<usize> {
        let timeout = self.timeout;
        let stream = self.stream_mut()?;

        if let Some(timeout) = timeout {
            tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| ParleyError::Timeout("write".to_string()))?
                .map_err(ParleyError::from)
        } else {
            stream.write(buf).await.map_err(ParleyError::from)
        }
    }

    async fn flush(&mut self) -> ParleyResult<()> {
        self.stream_mut()?.flush().await.map_err(ParleyError::from)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> ParleyResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }

    fn abort(&mut self) {
        // dropping the stream resets the socket without a shutdown exchange
        self.stream = None;
        self.closed = true;
    }
}
