//! Client façade for the parley messaging protocol
//!
//! [`Client`] composes the framer, correlator, transport, and connection
//! state machine behind a small set of async operations: `connect`,
//! `handshake`, `send`, `close`. Results are delivered through the futures
//! these methods return; there is no separate error channel.
//!
//! # Usage example
//!
//! ```rust,no_run
//! use parley_client::{Client, ClientBuilder};
//! use parley_core::Command;
//! use serde_json::json;
//!
//! # async fn example() -> parley_core::ParleyResult<()> {
//! let mut client = ClientBuilder::new()
//!     .name("my-client")
//!     .server("localhost", 7007)
//!     .build();
//!
//! client.connect_default().await?;
//! client.handshake(None, None).await?;
//!
//! let reply = client.send(Command::Call, json!([{ "fname": "get_version" }])).await?;
//! println!("{:?}", reply.data);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::dispatch::{self, DispatcherConfig, Op, Status};
use crate::state::ConnectionState;
use parley_core::{Command, Envelope, ParleyError, ParleyResult, ServerInfo};
use parley_transport::{TcpTransport, TransportLayer};
use parley_wire::{JsonSerializer, Serializer, DELIMITER};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Default client display name
pub const DEFAULT_NAME: &str = "parley-client";
/// Default server port
pub const DEFAULT_PORT: u16 = 7007;
/// Default connection-wide idle timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sentinel payload the server uses to accept a handshake
const AUTHENTICATED: &str = "Authenticated";

#[derive(Debug, Clone)]
struct Credentials {
    user: String,
    password: Option<String>,
}

/// Builder for [`Client`]
///
/// # Default settings
/// - Name: `parley-client`
/// - Server: `localhost:7007`
/// - Idle timeout: 10 seconds
/// - No preset session, no initial credentials
/// - JSON codec, `<EOF>` delimiter, TCP transport
#[derive(Clone)]
pub struct ClientBuilder {
    name: String,
    host: String,
    port: u16,
    session: String,
    timeout: Duration,
    user: Option<String>,
    password: Option<String>,
    delimiter: Vec<u8>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl ClientBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            session: String::new(),
            timeout: DEFAULT_TIMEOUT,
            user: None,
            password: None,
            delimiter: DELIMITER.to_vec(),
            serializer: None,
        }
    }

    /// Set the client display name sent in every envelope
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the server address
    pub fn server(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    /// Preset a session token from an earlier authenticated session
    ///
    /// A client connecting with a preset token skips the handshake and
    /// starts in the Authenticated state.
    pub fn session(mut self, session: &str) -> Self {
        self.session = session.to_string();
        self
    }

    /// Set the connection-wide idle timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Store credentials to be used by [`Client::request_auth`]
    pub fn credentials(mut self, user: &str, password: Option<&str>) -> Self {
        self.user = Some(user.to_string());
        self.password = password.map(str::to_string);
        self
    }

    /// Override the frame delimiter
    pub fn delimiter(mut self, delimiter: &[u8]) -> Self {
        self.delimiter = delimiter.to_vec();
        self
    }

    /// Override the payload codec
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Build a client backed by a TCP transport
    pub fn build(self) -> Client {
        self.build_with_transport(TcpTransport::new())
    }

    /// Build a client over a custom transport implementation
    pub fn build_with_transport<T>(self, transport: T) -> Client
    where
        T: TransportLayer + 'static,
    {
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonSerializer::new()));
        let credentials = self.user.map(|user| Credentials {
            user,
            password: self.password,
        });
        let (ops, status) = dispatch::spawn(
            transport,
            serializer,
            DispatcherConfig {
                name: self.name.clone(),
                host: self.host,
                port: self.port,
                session: self.session,
                idle_timeout: self.timeout,
                delimiter: self.delimiter,
            },
        );
        Client {
            name: self.name,
            ops,
            status,
            credentials,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A parley protocol client over one persistent connection
///
/// All operations are non-blocking; many [`Client::send`] calls may be
/// outstanding at once and responses are routed back purely by correlation
/// id, never by dispatch order. A fatal transport failure rejects every
/// outstanding future and the client must [`Client::connect`] again.
pub struct Client {
    name: String,
    ops: mpsc::UnboundedSender<Op>,
    status: watch::Receiver<Status>,
    credentials: Option<Credentials>,
}

impl Client {
    /// Start building a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client with default settings for the given server
    pub fn new(host: &str, port: u16) -> Self {
        ClientBuilder::new().server(host, port).build()
    }

    /// Client display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Check if the client is connected to the server
    pub fn is_connected(&self) -> bool {
        self.state().is_live()
    }

    /// Check if the client holds an authenticated session
    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Current session token, empty when unauthenticated
    pub fn session(&self) -> String {
        self.status.borrow().session.clone()
    }

    /// Server capabilities captured from the first exchange
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.status.borrow().server_info.clone()
    }

    /// Change the server address used by the next `connect_default`
    pub fn set_server(&self, host: &str, port: u16) {
        let _ = self.ops.send(Op::SetServer {
            host: host.to_string(),
            port,
        });
    }

    /// Change the connection-wide idle timeout
    pub fn set_timeout(&self, timeout: Duration) {
        let _ = self.ops.send(Op::SetTimeout(timeout));
    }

    /// Connect to the server at `host:port`
    ///
    /// Resolves with the server's greeting envelope once it arrives; the
    /// greeting also populates [`Client::server_info`].
    ///
    /// # Errors
    /// Rejects with [`ParleyError::Client`] if a connect is already in
    /// progress or the connection is already up, with
    /// [`ParleyError::Timeout`] if the attempt exceeds the configured
    /// timeout, and with [`ParleyError::Connection`] on transport failure.
    pub async fn connect(&self, host: &str, port: u16) -> ParleyResult<Envelope> {
        self.connect_inner(Some((host.to_string(), port))).await
    }

    /// Connect to the configured server address
    pub async fn connect_default(&self) -> ParleyResult<Envelope> {
        self.connect_inner(None).await
    }

    async fn connect_inner(&self, target: Option<(String, u16)>) -> ParleyResult<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(Op::Connect { target, reply: tx })
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Send a command and await the correlated reply
    ///
    /// Builds the envelope with a fresh correlation id, the current session
    /// token, and the client name. Responses may arrive in any order; each
    /// caller receives exactly the reply to its own request.
    ///
    /// # Errors
    /// Fails synchronously with a "not connected" [`ParleyError::Client`]
    /// when the connection is down, without touching the network.
    pub async fn send(&self, command: Command, data: Value) -> ParleyResult<Envelope> {
        self.check_connected()?;
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(Op::Send {
                command,
                data,
                reply: tx,
            })
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Send a caller-built envelope and await the correlated reply
    ///
    /// The caller controls session and name; the correlation id is still
    /// assigned at send time.
    pub async fn send_raw(&self, envelope: Envelope) -> ParleyResult<Envelope> {
        self.check_connected()?;
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(Op::SendRaw {
                envelope,
                reply: tx,
            })
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Perform the authentication handshake
    ///
    /// Pass `None` for both arguments to request an anonymous guest
    /// session. On success the server-issued session token is stored and
    /// the connection moves to the Authenticated state.
    ///
    /// # Errors
    /// Each of the four fixed auth failure codes maps to its own error
    /// kind: [`ParleyError::AuthWrongCredentials`],
    /// [`ParleyError::AuthRequired`], [`ParleyError::AuthMissingCredentials`],
    /// or the generic [`ParleyError::Auth`].
    pub async fn handshake(
        &mut self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> ParleyResult<()> {
        self.check_connected()?;
        if let Some(user) = user {
            self.credentials = Some(Credentials {
                user: user.to_string(),
                password: password.map(str::to_string),
            });
        }

        let mut payload = Map::new();
        if let Some(user) = user {
            payload.insert("user".to_string(), Value::String(user.to_string()));
            payload.insert(
                "password".to_string(),
                password.map_or(Value::Null, |p| Value::String(p.to_string())),
            );
        }
        let request = Envelope::request("", self.name.clone(), Command::Handshake, payload.into());
        let reply = self.send_raw(request).await?;

        if let Some(wire_err) = reply.error {
            return Err(map_auth_error(wire_err.code, wire_err.msg));
        }
        match &reply.data {
            Value::String(s) if s == AUTHENTICATED => {
                let _ = self.ops.send(Op::Authenticated {
                    session: reply.session,
                });
                Ok(())
            }
            _ => Err(ParleyError::Auth(
                "handshake was not accepted by the server".to_string(),
            )),
        }
    }

    /// Re-authenticate on the open connection
    ///
    /// The local session token is cleared immediately, before the server
    /// responds; the stored credentials from the last [`Client::handshake`]
    /// (or the builder) are replayed.
    pub async fn request_auth(&mut self) -> ParleyResult<()> {
        self.check_connected()?;
        let _ = self.ops.send(Op::ClearSession);
        let reply = self.send(Command::RequestAuth, Value::Null).await?;
        if let Some(info) = ServerInfo::from_payload(&reply.data) {
            let _ = self.ops.send(Op::ServerInfo(info));
        }
        match self.credentials.clone() {
            Some(creds) => {
                self.handshake(Some(&creds.user), creds.password.as_deref())
                    .await
            }
            None => self.handshake(None, None).await,
        }
    }

    /// Drop the authenticated session without closing the socket
    ///
    /// The local session token is cleared immediately.
    pub async fn drop_auth(&mut self) -> ParleyResult<()> {
        self.check_connected()?;
        let _ = self.ops.send(Op::ClearSession);
        self.send(Command::DropAuth, Value::Null).await?;
        Ok(())
    }

    /// Ask the server process to quit
    pub async fn server_quit(&self) -> ParleyResult<Envelope> {
        self.send(Command::ServerQuit, Value::Null).await
    }

    /// Ask the server process to restart
    pub async fn server_restart(&self) -> ParleyResult<Envelope> {
        self.send(Command::ServerRestart, Value::Null).await
    }

    /// Close the connection
    ///
    /// Idempotent, and guaranteed to resolve: graceful shutdown is bounded
    /// by a fallback delay, after which teardown is forced. Every still
    /// outstanding request is rejected with a disconnect error.
    pub async fn close(&self) -> ParleyResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.ops.send(Op::Close { reply: tx }).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    fn check_connected(&self) -> ParleyResult<()> {
        if !self.state().can_send() {
            return Err(ParleyError::Client(format!(
                "client '{}' is not connected to server",
                self.name
            )));
        }
        Ok(())
    }

    fn gone(&self) -> ParleyError {
        ParleyError::Client(format!(
            "connection dispatcher for client '{}' is gone",
            self.name
        ))
    }
}

/// Map a handshake wire error to its auth error kind
///
/// Codes outside the fixed auth table collapse into the generic auth error
/// with the code prepended.
fn map_auth_error(code: u16, msg: String) -> ParleyError {
    let mapped = ParleyError::from_wire(code, msg.clone());
    if mapped.is_auth() {
        mapped
    } else {
        ParleyError::Auth(format!("{}: {}", code, msg))
    }
}
