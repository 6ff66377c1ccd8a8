//! Connection dispatcher task
//!
//! One task owns everything mutable about a connection: the transport, the
//! frame buffer, the pending-request table, the lifecycle state, and the
//! session token. The façade talks to it through an op mailbox and observes
//! a published status snapshot, so no state is ever mutated from more than
//! one dispatch context.

use crate::correlator::{Completion, Correlator};
use crate::state::ConnectionState;
use log::{debug, warn};
use parley_core::{Command, Envelope, ParleyError, ParleyResult, ServerInfo};
use parley_transport::TransportLayer;
use parley_wire::{Framer, Serializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

/// Upper bound on how long a graceful close may take before the close
/// future is force-resolved.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Observable snapshot of the connection, published on every change
#[derive(Debug, Clone, Default)]
pub struct Status {
    /// Current lifecycle state
    pub state: ConnectionState,
    /// Current session token, empty when unauthenticated
    pub session: String,
    /// Server capabilities, once the first exchange delivered them
    pub server_info: Option<ServerInfo>,
}

/// Requests from the façade to the dispatcher
pub(crate) enum Op {
    Connect {
        target: Option<(String, u16)>,
        reply: Completion,
    },
    Send {
        command: Command,
        data: Value,
        reply: Completion,
    },
    SendRaw {
        envelope: Envelope,
        reply: Completion,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Authenticated {
        session: String,
    },
    ClearSession,
    ServerInfo(ServerInfo),
    SetServer {
        host: String,
        port: u16,
    },
    SetTimeout(Duration),
}

/// Static configuration handed to the dispatcher at spawn time
pub(crate) struct DispatcherConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub session: String,
    pub idle_timeout: Duration,
    pub delimiter: Vec<u8>,
}

/// Spawn the dispatcher task for one client
pub(crate) fn spawn<T>(
    transport: T,
    serializer: Arc<dyn Serializer>,
    config: DispatcherConfig,
) -> (mpsc::UnboundedSender<Op>, watch::Receiver<Status>)
where
    T: TransportLayer + 'static,
{
    let (ops_tx, ops_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(Status {
        state: ConnectionState::Idle,
        session: config.session.clone(),
        server_info: None,
    });

    let idle_timeout = config.idle_timeout;
    let dispatcher = Dispatcher {
        transport,
        serializer,
        framer: Framer::with_delimiter(&config.delimiter),
        delimiter: config.delimiter,
        correlator: Correlator::new(),
        state: ConnectionState::Idle,
        session: config.session,
        server_info: None,
        name: config.name,
        host: config.host,
        port: config.port,
        idle_timeout,
        idle_deadline: Instant::now() + idle_timeout,
        first_message: true,
        connect_pending: None,
        ops: ops_rx,
        status: status_tx,
    };
    tokio::spawn(dispatcher.run());

    (ops_tx, status_rx)
}

enum Event {
    Op(Option<Op>),
    Read(ParleyResult<usize>),
    IdleTimeout,
}

struct Dispatcher<T: TransportLayer> {
    transport: T,
    serializer: Arc<dyn Serializer>,
    framer: Framer,
    delimiter: Vec<u8>,
    correlator: Correlator,
    state: ConnectionState,
    session: String,
    server_info: Option<ServerInfo>,
    name: String,
    host: String,
    port: u16,
    idle_timeout: Duration,
    idle_deadline: Instant,
    first_message: bool,
    connect_pending: Option<Completion>,
    ops: mpsc::UnboundedReceiver<Op>,
    status: watch::Sender<Status>,
}

impl<T: TransportLayer> Dispatcher<T> {
    async fn run(mut self) {
        let mut read_buf = vec![0u8; 8192];
        loop {
            let event = if self.state.is_live() {
                let deadline = self.idle_deadline;
                let Self { ops, transport, .. } = &mut self;
                tokio::select! {
                    op = ops.recv() => Event::Op(op),
                    res = transport.read(&mut read_buf) => Event::Read(res),
                    _ = time::sleep_until(deadline) => Event::IdleTimeout,
                }
            } else {
                Event::Op(self.ops.recv().await)
            };

            match event {
                Event::Op(Some(op)) => self.handle_op(op).await,
                Event::Op(None) => {
                    // every client handle is gone; tear down and stop
                    self.disconnect(ParleyError::Connection(
                        "client handle dropped".to_string(),
                    ));
                    break;
                }
                Event::Read(res) => self.handle_read(res, &read_buf),
                Event::IdleTimeout => self.handle_idle_timeout(),
            }
        }
    }

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::Connect { target, reply } => self.handle_connect(target, reply).await,
            Op::Send {
                command,
                data,
                reply,
            } => {
                let envelope =
                    Envelope::request(self.session.clone(), self.name.clone(), command, data);
                self.handle_send(envelope, reply).await;
            }
            Op::SendRaw { envelope, reply } => self.handle_send(envelope, reply).await,
            Op::Close { reply } => self.handle_close(reply).await,
            Op::Authenticated { session } => {
                debug!("session established for client '{}'", self.name);
                self.session = session;
                if self.state == ConnectionState::Connected {
                    self.state = ConnectionState::Authenticated;
                }
                self.publish();
            }
            Op::ClearSession => {
                // the token is invalid the instant a new auth flow starts,
                // before the server has confirmed anything
                self.session.clear();
                if self.state == ConnectionState::Authenticated {
                    self.state = ConnectionState::Connected;
                }
                self.publish();
            }
            Op::ServerInfo(info) => {
                self.server_info = Some(info);
                self.publish();
            }
            Op::SetServer { host, port } => {
                self.host = host;
                self.port = port;
            }
            Op::SetTimeout(timeout) => {
                self.idle_timeout = timeout;
                self.touch();
            }
        }
    }

    async fn handle_connect(&mut self, target: Option<(String, u16)>, reply: Completion) {
        if !self.state.can_connect() {
            let _ = reply.send(Err(ParleyError::Client(format!(
                "client '{}' is already connecting or connected",
                self.name
            ))));
            return;
        }

        if let Some((host, port)) = target {
            self.host = host;
            self.port = port;
        }
        self.framer.reset();
        self.first_message = true;
        self.state = ConnectionState::Connecting;
        self.publish();

        debug!(
            "client '{}' connecting to server at {}:{}",
            self.name, self.host, self.port
        );
        match time::timeout(self.idle_timeout, self.transport.open(&self.host, self.port)).await {
            Ok(Ok(())) => {
                // the connect future resolves once the server greeting
                // arrives; a preconfigured session token skips the handshake
                self.connect_pending = Some(reply);
                self.state = if self.session.is_empty() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Authenticated
                };
                self.touch();
                self.publish();
            }
            Ok(Err(e)) => {
                let _ = reply.send(Err(e));
                self.state = ConnectionState::Disconnected;
                self.publish();
            }
            Err(_) => {
                self.transport.abort();
                let _ = reply.send(Err(ParleyError::Timeout(format!(
                    "connect to {}:{}",
                    self.host, self.port
                ))));
                self.state = ConnectionState::Disconnected;
                self.publish();
            }
        }
    }

    async fn handle_send(&mut self, mut envelope: Envelope, reply: Completion) {
        if !self.state.can_send() {
            let _ = reply.send(Err(ParleyError::Client(format!(
                "client '{}' is not connected to server",
                self.name
            ))));
            return;
        }

        let id = self.correlator.next_id();
        envelope.id = Some(id.clone());
        let bytes = match self.serializer.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        if let Err(reply) = self.correlator.register(id.clone(), reply) {
            let _ = reply.send(Err(ParleyError::Client(format!(
                "correlation id {} wrapped into a still-outstanding request",
                id
            ))));
            return;
        }

        debug!(
            "sending {} bytes to server {}:{}",
            bytes.len() + self.delimiter.len(),
            self.host,
            self.port
        );
        if let Err(e) = self.write_frame(&bytes).await {
            // the sweep also rejects the request registered just above
            self.disconnect(e);
            return;
        }
        self.touch();
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> ParleyResult<()> {
        self.transport.write_all(bytes).await?;
        self.transport.write_all(&self.delimiter).await?;
        self.transport.flush().await
    }

    async fn handle_close(&mut self, reply: oneshot::Sender<()>) {
        if matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Disconnected
        ) {
            // second close after teardown resolves without touching anything
            let _ = reply.send(());
            return;
        }

        debug!("closing connection to server for client '{}'", self.name);
        self.state = ConnectionState::Closing;
        self.publish();

        // graceful end, bounded so the close future can never hang
        let _ = time::timeout(CLOSE_GRACE, self.transport.close()).await;
        self.disconnect(ParleyError::ServerDisconnect(format!(
            "connection closed by client '{}'",
            self.name
        )));
        let _ = reply.send(());
    }

    fn handle_read(&mut self, res: ParleyResult<usize>, buf: &[u8]) {
        match res {
            Ok(0) => self.disconnect(ParleyError::ServerDisconnect(format!(
                "server disconnected for client '{}'",
                self.name
            ))),
            Ok(n) => {
                debug!("received {} bytes from server", n);
                self.touch();
                match self.framer.feed(&buf[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            self.dispatch_frame(&frame);
                        }
                    }
                    Err(e) => self.disconnect(e),
                }
            }
            Err(e) => self.disconnect(e),
        }
    }

    fn dispatch_frame(&mut self, payload: &[u8]) {
        let envelope = match self.serializer.decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // a corrupted payload cannot reliably carry its own id;
                // fail the oldest caller and keep the connection alive
                warn!("dropping undecodable frame: {}", e);
                self.correlator.reject_earliest(e);
                return;
            }
        };

        if self.first_message {
            self.first_message = false;
            if let Some(info) = ServerInfo::from_payload(&envelope.data) {
                self.server_info = Some(info);
                self.publish();
            }
        }

        if let Some(pending) = self.connect_pending.take() {
            let _ = pending.send(Ok(envelope));
            return;
        }

        match envelope.id.clone() {
            Some(id) => {
                if !self.correlator.resolve(&id, envelope) {
                    debug!("reply for unknown correlation id {}", id);
                }
            }
            None => {
                if !self.correlator.resolve_earliest(envelope) {
                    debug!("unsolicited message with no pending request");
                }
            }
        }
    }

    fn handle_idle_timeout(&mut self) {
        let err = ParleyError::Timeout(format!(
            "no server activity within {:?}",
            self.idle_timeout
        ));
        if let Some(pending) = self.connect_pending.take() {
            let _ = pending.send(Err(err));
        } else if !self.correlator.reject_earliest(err) {
            debug!("idle timeout with no pending requests");
        }

        if self.state != ConnectionState::Authenticated {
            // a connection that never authenticated gets torn down outright
            self.disconnect(ParleyError::Timeout(
                "connection timed out before authentication".to_string(),
            ));
            return;
        }
        self.touch();
    }

    /// Fatal teardown: sweep every pending completion, reset per-connection
    /// state, and move to Disconnected. Idempotent.
    fn disconnect(&mut self, err: ParleyError) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if let Some(pending) = self.connect_pending.take() {
            let _ = pending.send(Err(err.clone()));
        }
        self.correlator.drain(&err);
        self.correlator.reset_counter();
        self.transport.abort();
        self.framer.reset();
        self.session.clear();
        self.first_message = true;
        self.state = ConnectionState::Disconnected;
        self.publish();
    }

    fn touch(&mut self) {
        self.idle_deadline = Instant::now() + self.idle_timeout;
    }

    fn publish(&self) {
        self.status.send_replace(Status {
            state: self.state,
            session: self.session.clone(),
            server_info: self.server_info.clone(),
        });
    }
}
