// Minimal NATS client: text protocol over TCP, enough for request fan-out and reply inboxes.
//
// Wire ops used: INFO / CONNECT / PING / PONG / SUB / UNSUB / PUB / MSG / +OK / -ERR.
// One reader task routes MSG frames to subscriptions by sid and answers server PINGs.
// Flush = PING + wait for the matching PONG; the server replies in order, so every MSG
// sent before that PONG has already been routed when the flush resolves.

use super::{Message, Subscription, Transport};
use crate::error::TransportError;
use crate::version;
use bytes::Bytes;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const DEFAULT_PORT: u16 = 4222;
const INBOX_PREFIX: &str = "_INBOX.";
const INBOX_ID_LEN: usize = 22;
/// Frame size cap when the server does not announce `max_payload`.
const FALLBACK_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct NatsOptions {
    /// `nats://[user:password@|token@]host[:port]`
    pub url: String,
    /// Client name reported to the server.
    pub name: String,
    pub connect_timeout: Duration,
}

/// Subset of the server's INFO banner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerHello {
    pub server_id: String,
    pub server_name: String,
    pub version: String,
    pub max_payload: usize,
    pub auth_required: bool,
}

#[derive(Debug, Serialize)]
struct ConnectFrame<'a> {
    verbose: bool,
    pedantic: bool,
    name: &'a str,
    lang: &'a str,
    version: &'a str,
    protocol: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pass: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    user: Option<String>,
    pass: Option<String>,
    token: Option<String>,
}

fn parse_url(raw: &str) -> Result<Endpoint, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("nats://{raw}")
    };
    let url = url::Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "nats" | "tcp") {
        return Err(invalid("scheme must be nats:// or tcp://"));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?
        .to_string();
    let port = url.port().unwrap_or(DEFAULT_PORT);

    let username = (!url.username().is_empty()).then(|| url.username().to_string());
    let (user, pass, token) = match (username, url.password()) {
        (Some(user), Some(pass)) => (Some(user), Some(pass.to_string()), None),
        (Some(token), None) => (None, None, Some(token)),
        _ => (None, None, None),
    };
    Ok(Endpoint {
        host,
        port,
        user,
        pass,
        token,
    })
}

/// One protocol op read from the server.
#[derive(Debug, PartialEq, Eq)]
enum ServerOp {
    Msg {
        subject: String,
        sid: u64,
        reply: Option<String>,
        len: usize,
    },
    Info(String),
    Ping,
    Pong,
    Ok,
    Err(String),
}

fn parse_op(line: &str) -> Result<ServerOp, TransportError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
    match op.to_ascii_uppercase().as_str() {
        "MSG" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            let (subject, sid, reply, len) = match args.as_slice() {
                [subject, sid, len] => (subject, sid, None, len),
                [subject, sid, reply, len] => (subject, sid, Some(reply.to_string()), len),
                _ => return Err(TransportError::Protocol(format!("malformed MSG: {line}"))),
            };
            let sid = sid
                .parse()
                .map_err(|_| TransportError::Protocol(format!("bad sid in MSG: {line}")))?;
            let len = len
                .parse()
                .map_err(|_| TransportError::Protocol(format!("bad size in MSG: {line}")))?;
            Ok(ServerOp::Msg {
                subject: subject.to_string(),
                sid,
                reply,
                len,
            })
        }
        "INFO" => Ok(ServerOp::Info(rest.to_string())),
        "PING" => Ok(ServerOp::Ping),
        "PONG" => Ok(ServerOp::Pong),
        "+OK" => Ok(ServerOp::Ok),
        "-ERR" => Ok(ServerOp::Err(rest.trim().trim_matches('\'').to_string())),
        _ => Err(TransportError::Protocol(format!("unknown op: {line}"))),
    }
}

#[derive(Debug, Default)]
struct Routes {
    subs: HashMap<u64, mpsc::UnboundedSender<Message>>,
    pongs: VecDeque<oneshot::Sender<()>>,
    closed: bool,
}

type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

pub struct NatsTransport {
    writer: Writer,
    routes: Arc<Mutex<Routes>>,
    next_sid: AtomicU64,
    hello: ServerHello,
    reader: tokio::task::JoinHandle<()>,
}

impl NatsTransport {
    /// Connect, authenticate, and confirm the session with a PING/PONG round trip.
    pub async fn connect(options: &NatsOptions) -> Result<Self, TransportError> {
        let endpoint = parse_url(&options.url)?;
        timeout(options.connect_timeout, Self::handshake(endpoint, options))
            .await
            .map_err(|_| TransportError::Timeout(options.connect_timeout))?
    }

    async fn handshake(endpoint: Endpoint, options: &NatsOptions) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let hello = match read_op(&mut reader).await? {
            ServerOp::Info(json) => serde_json::from_str::<ServerHello>(&json)
                .map_err(|e| TransportError::Protocol(format!("bad INFO: {e}")))?,
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected INFO, got {other:?}"
                )));
            }
        };

        let connect = ConnectFrame {
            verbose: false,
            pedantic: false,
            name: &options.name,
            lang: "rust",
            version: version::VERSION,
            protocol: 1,
            user: endpoint.user.as_deref(),
            pass: endpoint.pass.as_deref(),
            auth_token: endpoint.token.as_deref(),
        };
        let connect = serde_json::to_string(&connect)
            .map_err(|e| TransportError::Protocol(format!("encode CONNECT: {e}")))?;
        write_half
            .write_all(format!("CONNECT {connect}\r\nPING\r\n").as_bytes())
            .await?;
        write_half.flush().await?;

        loop {
            match read_op(&mut reader).await? {
                ServerOp::Pong => break,
                ServerOp::Err(e) => return Err(TransportError::Protocol(e)),
                ServerOp::Ping => write_half.write_all(b"PONG\r\n").await?,
                ServerOp::Ok | ServerOp::Info(_) => {}
                ServerOp::Msg { .. } => {
                    return Err(TransportError::Protocol("MSG before handshake".into()));
                }
            }
        }

        tracing::debug!(
            server = %hello.server_name,
            version = %hello.version,
            host = %endpoint.host,
            port = endpoint.port,
            "connected"
        );

        let writer: Writer = Arc::new(tokio::sync::Mutex::new(write_half));
        let routes = Arc::new(Mutex::new(Routes::default()));
        let max_payload = if hello.max_payload > 0 {
            hello.max_payload
        } else {
            FALLBACK_MAX_PAYLOAD
        };
        let reader = tokio::spawn(read_loop(
            reader,
            writer.clone(),
            routes.clone(),
            max_payload,
        ));

        Ok(Self {
            writer,
            routes,
            next_sid: AtomicU64::new(1),
            hello,
            reader,
        })
    }

    pub fn server(&self) -> &ServerHello {
        &self.hello
    }

    /// Round trip a PING; resolves once every earlier server frame has been routed.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = lock(&self.routes);
            if routes.closed {
                return Err(TransportError::Closed);
            }
            routes.pongs.push_back(tx);
        }
        self.write(b"PING\r\n").await?;
        rx.await.map_err(|_| TransportError::Closed)
    }

    async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for NatsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Transport for NatsTransport {
    fn new_inbox(&self) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(INBOX_ID_LEN)
            .map(char::from)
            .collect();
        format!("{INBOX_PREFIX}{id}")
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut routes = lock(&self.routes);
            if routes.closed {
                return Err(TransportError::Closed);
            }
            routes.subs.insert(sid, tx);
        }
        if let Err(e) = self.write(format!("SUB {subject} {sid}\r\n").as_bytes()).await {
            lock(&self.routes).subs.remove(&sid);
            return Err(e);
        }
        Ok(Subscription::new(sid, subject.to_string(), rx))
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        if self.hello.max_payload > 0 && payload.len() > self.hello.max_payload {
            return Err(TransportError::Protocol(format!(
                "payload of {} bytes exceeds server max_payload {}",
                payload.len(),
                self.hello.max_payload
            )));
        }
        let mut frame = format!("PUB {subject} {reply} {}\r\n", payload.len()).into_bytes();
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(b"\r\n");
        self.write(&frame).await
    }

    async fn drain(&self, sid: u64) -> Result<(), TransportError> {
        let result = match self.write(format!("UNSUB {sid}\r\n").as_bytes()).await {
            Ok(()) => self.flush().await,
            Err(e) => Err(e),
        };
        lock(&self.routes).subs.remove(&sid);
        result
    }
}

fn lock(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_op(reader: &mut BufReader<OwnedReadHalf>) -> Result<ServerOp, TransportError> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(TransportError::Closed);
    }
    parse_op(&line)
}

/// Marks the routes closed however the reader stops (error, panic, or abort),
/// so pending flushes fail and new subscriptions are refused.
struct CloseOnExit(Arc<Mutex<Routes>>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        let mut routes = lock(&self.0);
        routes.closed = true;
        routes.subs.clear();
        routes.pongs.clear();
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    writer: Writer,
    routes: Arc<Mutex<Routes>>,
    max_payload: usize,
) {
    let _close = CloseOnExit(routes.clone());
    let result: Result<(), TransportError> = async {
        loop {
            match read_op(&mut reader).await? {
                ServerOp::Msg {
                    subject,
                    sid,
                    reply,
                    len,
                } => {
                    if len > max_payload {
                        return Err(TransportError::Protocol(format!(
                            "MSG of {len} bytes exceeds max_payload {max_payload}"
                        )));
                    }
                    let mut payload = vec![0u8; len + 2];
                    reader.read_exact(&mut payload).await?;
                    payload.truncate(len);
                    let msg = Message {
                        subject,
                        reply,
                        payload: Bytes::from(payload),
                    };
                    if let Some(tx) = lock(&routes).subs.get(&sid) {
                        let _ = tx.send(msg);
                    }
                }
                ServerOp::Ping => {
                    let mut writer = writer.lock().await;
                    writer.write_all(b"PONG\r\n").await?;
                    writer.flush().await?;
                }
                ServerOp::Pong => {
                    if let Some(tx) = lock(&routes).pongs.pop_front() {
                        let _ = tx.send(());
                    }
                }
                ServerOp::Err(e) => tracing::warn!(error = %e, "server error"),
                ServerOp::Ok | ServerOp::Info(_) => {}
            }
        }
    }
    .await;

    if let Err(e) = result {
        match e {
            TransportError::Closed => tracing::debug!("connection closed by server"),
            e => tracing::warn!(error = %e, "connection reader stopped"),
        }
    }
}
