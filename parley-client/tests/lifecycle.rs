//! End-to-end connection lifecycle tests against scripted servers
//!
//! Each test spins up a local TCP listener that speaks the wire protocol
//! (JSON payloads terminated by `<EOF>`) according to a small script, and
//! drives a real client against it.

use async_trait::async_trait;
use parley_client::{Client, ClientBuilder, ConnectionState};
use parley_core::{Command, ParleyError, ParleyResult};
use parley_transport::{StreamAccessor, TransportLayer};
use serde_json::{json, Value};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_test::{assert_pending, task};

const DELIMITER: &[u8] = b"<EOF>";

/// Server side of one scripted connection
struct ServerConn {
    sock: TcpStream,
    buf: Vec<u8>,
}

impl ServerConn {
    fn new(sock: TcpStream) -> Self {
        Self {
            sock,
            buf: Vec::new(),
        }
    }

    async fn recv(&mut self) -> Option<Value> {
        loop {
            if let Some(pos) = self
                .buf
                .windows(DELIMITER.len())
                .position(|window| window == DELIMITER)
            {
                let frame: Vec<u8> = self.buf.drain(..pos).collect();
                self.buf.drain(..DELIMITER.len());
                return Some(serde_json::from_slice(&frame).unwrap());
            }
            let mut tmp = [0u8; 4096];
            match self.sock.read(&mut tmp).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&tmp[..n]),
            }
        }
    }

    async fn send(&mut self, value: &Value) {
        let mut bytes = serde_json::to_vec(value).unwrap();
        bytes.extend_from_slice(DELIMITER);
        self.sock.write_all(&bytes).await.unwrap();
    }

    async fn greet(&mut self) {
        self.send(&greeting()).await;
    }
}

fn greeting() -> Value {
    json!({
        "session": "",
        "name": "test-server",
        "command": "handshake",
        "data": {
            "version": { "core": [1, 0, 0], "db": [1, 0, 0], "torrent": [0, 1, 0] },
            "guest_allowed": true,
        },
    })
}

async fn spawn_server<F, Fut>(script: F) -> (String, u16)
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        script(ServerConn::new(sock)).await;
    });
    (addr.ip().to_string(), addr.port())
}

fn test_client() -> Client {
    ClientBuilder::new()
        .name("test-client")
        .timeout(Duration::from_secs(5))
        .build()
}

/// Poll until `cond` holds; status snapshots are published by the
/// dispatcher task, so façade observations can lag one scheduler pass.
async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within one second");
}

#[tokio::test]
async fn test_connect_and_idempotent_close() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        // stay open until the client hangs up
        while conn.recv().await.is_some() {}
    })
    .await;

    let client = test_client();
    let greeting = client.connect(&host, port).await.unwrap();
    assert_eq!(greeting.session, "");
    assert!(client.is_connected());
    assert!(!client.is_authenticated());

    let info = client.server_info().unwrap();
    assert!(info.guest_allowed);
    assert_eq!(info.version.unwrap().core, [1, 0, 0]);

    client.close().await.unwrap();
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // second close resolves without a second teardown
    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_before_connect_is_noop() {
    let client = test_client();
    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_second_connect_rejected_while_connected() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        while conn.recv().await.is_some() {}
    })
    .await;

    let client = test_client();
    client.connect(&host, port).await.unwrap();
    let err = client.connect(&host, port).await.unwrap_err();
    assert!(matches!(err, ParleyError::Client(_)));
    // the established connection is untouched
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_handshake_success_stores_session() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        while let Some(msg) = conn.recv().await {
            match msg["command"].as_str() {
                Some("handshake") => {
                    conn.send(&json!({
                        "id": msg["id"],
                        "session": "tok-1",
                        "name": "test-server",
                        "command": "handshake",
                        "data": "Authenticated",
                    }))
                    .await;
                }
                _ => {
                    // echo, asserting the client attached its session
                    assert_eq!(msg["session"], "tok-1");
                    conn.send(&json!({
                        "id": msg["id"],
                        "session": "tok-1",
                        "name": "test-server",
                        "command": msg["command"],
                        "data": msg["data"],
                    }))
                    .await;
                }
            }
        }
    })
    .await;

    let mut client = test_client();
    client.connect(&host, port).await.unwrap();
    client.handshake(None, None).await.unwrap();
    wait_until(|| client.is_authenticated()).await;
    assert_eq!(client.session(), "tok-1");

    let reply = client.send(Command::Call, json!("ping")).await.unwrap();
    assert_eq!(reply.data, json!("ping"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_handshake_maps_each_auth_code() {
    for (code, check) in [
        (411u16, (|e: &ParleyError| {
            matches!(e, ParleyError::AuthWrongCredentials(_))
        }) as fn(&ParleyError) -> bool),
        (407, |e| matches!(e, ParleyError::AuthRequired(_))),
        (412, |e| matches!(e, ParleyError::AuthMissingCredentials(_))),
        (406, |e| matches!(e, ParleyError::Auth(_))),
    ] {
        let (host, port) = spawn_server(move |mut conn| async move {
            conn.greet().await;
            if let Some(msg) = conn.recv().await {
                conn.send(&json!({
                    "id": msg["id"],
                    "session": "",
                    "name": "test-server",
                    "command": "handshake",
                    "data": {},
                    "error": { "code": code, "msg": "denied" },
                }))
                .await;
            }
        })
        .await;

        let mut client = test_client();
        client.connect(&host, port).await.unwrap();
        let err = client.handshake(Some("user"), Some("pass")).await.unwrap_err();
        assert!(check(&err), "code {} mapped to {:?}", code, err);
        assert_eq!(err.code(), code);
        // an auth failure is not fatal to the connection
        assert!(client.is_connected());
        client.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_responses_correlated_under_reordering() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(conn.recv().await.unwrap());
        }
        // reply in reverse arrival order
        for msg in requests.iter().rev() {
            conn.send(&json!({
                "id": msg["id"],
                "session": "",
                "name": "test-server",
                "command": msg["command"],
                "data": msg["data"],
            }))
            .await;
        }
        while conn.recv().await.is_some() {}
    })
    .await;

    let client = test_client();
    client.connect(&host, port).await.unwrap();

    let (a, b, c) = tokio::join!(
        client.send(Command::Call, json!("a")),
        client.send(Command::Call, json!("b")),
        client.send(Command::Call, json!("c")),
    );
    // each caller gets exactly its own response, none cross-wired
    assert_eq!(a.unwrap().data, json!("a"));
    assert_eq!(b.unwrap().data, json!("b"));
    assert_eq!(c.unwrap().data, json!("c"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_idless_response_resolves_oldest_pending() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        conn.recv().await.unwrap();
        conn.recv().await.unwrap();
        // no id: the FIFO fallback must route this to the oldest caller
        conn.send(&json!({
            "session": "",
            "name": "test-server",
            "command": "call",
            "data": "first-wins",
        }))
        .await;
        while conn.recv().await.is_some() {}
    })
    .await;

    let client = test_client();
    client.connect(&host, port).await.unwrap();

    let first = client.send(Command::Call, json!("one"));
    let second = client.send(Command::Call, json!("two"));
    let (first, second, _) = tokio::join!(first, second, async {
        sleep(Duration::from_millis(400)).await;
        client.close().await.unwrap();
    });

    assert_eq!(first.unwrap().data, json!("first-wins"));
    // the younger request stayed pending until close swept it
    assert!(matches!(
        second.unwrap_err(),
        ParleyError::ServerDisconnect(_)
    ));
}

#[tokio::test]
async fn test_disconnect_sweep_rejects_all_pending() {
    let (host, port) = spawn_server(|mut conn| async move {
        // no greeting: the connect future stays pending too; drain the
        // requests so the eventual drop is a clean FIN, not a reset
        let _ = tokio::time::timeout(Duration::from_millis(250), async {
            while conn.recv().await.is_some() {}
        })
        .await;
    })
    .await;

    let client = test_client();
    let (connected, sends) = tokio::join!(client.connect(&host, port), async {
        // wait for the transport to be open so sends are accepted
        sleep(Duration::from_millis(100)).await;
        assert!(client.is_connected());
        tokio::join!(
            client.send(Command::Call, json!(1)),
            client.send(Command::Call, json!(2)),
            client.send(Command::Call, json!(3)),
        )
    });

    assert!(matches!(
        connected.unwrap_err(),
        ParleyError::ServerDisconnect(_)
    ));
    let (s1, s2, s3) = sends;
    for res in [s1, s2, s3] {
        assert!(matches!(
            res.unwrap_err(),
            ParleyError::ServerDisconnect(_)
        ));
    }

    assert!(!client.is_connected());
    // every later send fails synchronously, without touching the network
    let err = client.send(Command::Call, json!(4)).await.unwrap_err();
    assert!(matches!(err, ParleyError::Client(_)));
}

#[tokio::test]
async fn test_connect_stays_pending_until_greeting() {
    let (host, port) = spawn_server(|mut conn| async move {
        sleep(Duration::from_millis(150)).await;
        conn.greet().await;
        while conn.recv().await.is_some() {}
    })
    .await;

    let client = test_client();
    let mut connect = task::spawn(client.connect(&host, port));
    assert_pending!(connect.poll());

    // the transport opens well before the greeting; the future must not
    // resolve on TCP establishment alone
    sleep(Duration::from_millis(50)).await;
    assert!(client.is_connected());
    assert_pending!(connect.poll());

    let greeting = connect.await.unwrap();
    assert_eq!(greeting.name, "test-server");
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_request_auth_clears_session_before_server_confirms() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;

        let msg = conn.recv().await.unwrap();
        assert_eq!(msg["command"], "handshake");
        conn.send(&json!({
            "id": msg["id"],
            "session": "tok-1",
            "name": "test-server",
            "command": "handshake",
            "data": "Authenticated",
        }))
        .await;

        // the re-auth request must already have shed the old token
        let msg = conn.recv().await.unwrap();
        assert_eq!(msg["command"], "requestauth");
        assert_eq!(msg["session"], "");
        conn.send(&json!({
            "id": msg["id"],
            "session": "",
            "name": "test-server",
            "command": "requestauth",
            "data": null,
        }))
        .await;

        // so must the replayed handshake
        let msg = conn.recv().await.unwrap();
        assert_eq!(msg["command"], "handshake");
        assert_eq!(msg["session"], "");
        assert_eq!(msg["data"]["user"], "user");
        conn.send(&json!({
            "id": msg["id"],
            "session": "tok-2",
            "name": "test-server",
            "command": "handshake",
            "data": "Authenticated",
        }))
        .await;

        while conn.recv().await.is_some() {}
    })
    .await;

    let mut client = test_client();
    client.connect(&host, port).await.unwrap();
    client.handshake(Some("user"), Some("pass")).await.unwrap();
    wait_until(|| client.session() == "tok-1").await;

    client.request_auth().await.unwrap();
    wait_until(|| client.session() == "tok-2").await;
    assert!(client.is_authenticated());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_drop_auth_clears_session_before_server_confirms() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;

        let msg = conn.recv().await.unwrap();
        assert_eq!(msg["command"], "handshake");
        conn.send(&json!({
            "id": msg["id"],
            "session": "tok-1",
            "name": "test-server",
            "command": "handshake",
            "data": "Authenticated",
        }))
        .await;

        let msg = conn.recv().await.unwrap();
        assert_eq!(msg["command"], "dropauth");
        assert_eq!(msg["session"], "");
        conn.send(&json!({
            "id": msg["id"],
            "session": "",
            "name": "test-server",
            "command": "dropauth",
            "data": true,
        }))
        .await;

        while conn.recv().await.is_some() {}
    })
    .await;

    let mut client = test_client();
    client.connect(&host, port).await.unwrap();
    client.handshake(Some("user"), Some("pass")).await.unwrap();
    wait_until(|| client.is_authenticated()).await;

    client.drop_auth().await.unwrap();
    wait_until(|| !client.is_authenticated()).await;
    assert_eq!(client.session(), "");
    // the socket stays open; only the session is gone
    assert!(client.is_connected());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_ids_restart_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for _ in 0..2 {
            let (sock, _) = listener.accept().await.unwrap();
            let mut conn = ServerConn::new(sock);
            conn.greet().await;
            while let Some(msg) = conn.recv().await {
                conn.send(&json!({
                    "id": msg["id"],
                    "session": "",
                    "name": "test-server",
                    "command": msg["command"],
                    "data": msg["data"],
                }))
                .await;
            }
        }
    });
    let (host, port) = (addr.ip().to_string(), addr.port());

    let client = test_client();
    client.connect(&host, port).await.unwrap();
    let reply = client.send(Command::Call, json!("first")).await.unwrap();
    assert_eq!(reply.id.as_deref(), Some("1"));
    client.close().await.unwrap();

    // the id counter is scoped to one connection
    client.connect(&host, port).await.unwrap();
    let reply = client.send(Command::Call, json!("again")).await.unwrap();
    assert_eq!(reply.id.as_deref(), Some("1"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_preset_session_skips_handshake() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        while conn.recv().await.is_some() {}
    })
    .await;

    let client = ClientBuilder::new()
        .name("test-client")
        .session("tok-9")
        .timeout(Duration::from_secs(5))
        .build();
    client.connect(&host, port).await.unwrap();
    assert!(client.is_authenticated());
    assert_eq!(client.session(), "tok-9");
    client.close().await.unwrap();
    // the token does not survive the disconnect
    assert_eq!(client.session(), "");
}

#[tokio::test]
async fn test_connect_timeout() {
    let client = ClientBuilder::new()
        .name("test-client")
        .timeout(Duration::from_millis(200))
        .build_with_transport(StallTransport);

    let started = Instant::now();
    let err = client.connect("198.51.100.1", 7007).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ParleyError::Timeout(_)));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_idle_timeout_rejects_earliest_pending() {
    let (host, port) = spawn_server(|mut conn| async move {
        conn.greet().await;
        // swallow the request and go silent
        conn.recv().await;
        sleep(Duration::from_secs(10)).await;
    })
    .await;

    let client = ClientBuilder::new()
        .name("test-client")
        .timeout(Duration::from_millis(300))
        .build();
    client.connect(&host, port).await.unwrap();

    let started = Instant::now();
    let err = client.send(Command::Call, json!("slow")).await.unwrap_err();
    assert!(matches!(err, ParleyError::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(250));
    // the connection never authenticated, so the timeout tore it down
    assert!(!client.is_connected());
}

/// Transport whose connect attempt never completes
struct StallTransport;

#[async_trait]
impl StreamAccessor for StallTransport {
    async fn set_timeout(&mut self, _timeout: Option<Duration>) -> ParleyResult<()> {
        Ok(())
    }

    async fn read(&mut self, _buf: &mut [u8]) -> ParleyResult<usize> {
        std::future::pending().await
    }

    async fn write(&mut self, buf: &[u8]) -> ParleyResult<usize> {
        Ok(buf.len())
    }

    async fn flush(&mut self) -> ParleyResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&mut self) -> ParleyResult<()> {
        Ok(())
    }

    fn abort(&mut self) {}
}

#[async_trait]
impl TransportLayer for StallTransport {
    async fn open(&mut self, _host: &str, _port: u16) -> ParleyResult<()> {
        std::future::pending().await
    }
}
