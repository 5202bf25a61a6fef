//! # TCP Broker Transport
//!
//! Newline-delimited JSON frames over plain TCP. A client opens with a
//! `connect` frame carrying its credentials and waits for `connected`; after
//! that it may `subscribe` to topics and `publish` envelopes, and the server
//! pushes `deliver` frames for every envelope published to a subscribed topic.
//!
//! ```text
//! {"frame":"connect","username":"admin","password":"secret"}
//! {"frame":"connected"}
//! {"frame":"subscribe","topic":"collaboration/request"}
//! {"frame":"publish","topic":"collaboration/request","envelope":{...}}
//! {"frame":"deliver","topic":"collaboration/request","envelope":{...}}
//! ```
//!
//! Lines longer than [`MAX_FRAME_BYTES`] and lines that do not decode are
//! skipped; only I/O failures end a connection.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BrokerConnection, BrokerConnector, BrokerEndpoint, Credentials, Subscription};
use crate::constants::system::MAX_FRAME_BYTES;
use crate::messaging::envelope::Envelope;
use crate::messaging::errors::{MessagingError, MessagingResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum Frame {
    Connect {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Connected,
    Subscribe {
        topic: String,
    },
    Publish {
        topic: String,
        envelope: Envelope,
    },
    Deliver {
        topic: String,
        envelope: Envelope,
    },
    Error {
        message: String,
    },
}

impl Frame {
    fn to_line(&self) -> MessagingResult<String> {
        let mut line =
            serde_json::to_string(self).map_err(|e| MessagingError::serialization(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    fn from_line(line: &str) -> MessagingResult<Self> {
        serde_json::from_str(line.trim()).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}

/// Result of reading one line off the wire
#[derive(Debug)]
enum Incoming {
    Frame(Frame),
    /// Oversized or undecodable; the connection stays usable
    Malformed(MessagingError),
    Closed,
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> MessagingResult<Incoming> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(Incoming::Closed);
        }

        if line.len() > MAX_FRAME_BYTES && line.last() != Some(&b'\n') {
            if !discard_line(reader).await? {
                return Ok(Incoming::Closed);
            }
            return Ok(Incoming::Malformed(MessagingError::protocol(format!(
                "frame exceeds {MAX_FRAME_BYTES} bytes"
            ))));
        }

        let text = match std::str::from_utf8(&line) {
            Ok(text) => text,
            Err(e) => return Ok(Incoming::Malformed(MessagingError::deserialization(e.to_string()))),
        };
        if text.trim().is_empty() {
            continue;
        }
        return Ok(match Frame::from_line(text) {
            Ok(frame) => Incoming::Frame(frame),
            Err(e) => Incoming::Malformed(e),
        });
    }
}

/// Skip the rest of the current line; false when the stream ended first
async fn discard_line(reader: &mut BufReader<OwnedReadHalf>) -> MessagingResult<bool> {
    loop {
        let (newline, available) = {
            let buf = reader.fill_buf().await?;
            (buf.iter().position(|b| *b == b'\n'), buf.len())
        };
        match newline {
            Some(position) => {
                reader.consume(position + 1);
                return Ok(true);
            }
            None if available == 0 => return Ok(false),
            None => reader.consume(available),
        }
    }
}

type TopicSenders<T> = Mutex<HashMap<String, Vec<T>>>;

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Connects to [`TcpBrokerServer`]s (or anything speaking the same frames)
#[derive(Debug, Clone, Default)]
pub struct TcpBrokerConnector;

impl TcpBrokerConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for TcpBrokerConnector {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        credentials: &Credentials,
    ) -> MessagingResult<Arc<dyn BrokerConnection>> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| MessagingError::connection(endpoint, e.to_string()))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let hello = Frame::Connect {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };
        writer.write_all(hello.to_line()?.as_bytes()).await?;

        match read_frame(&mut reader).await? {
            Incoming::Frame(Frame::Connected) => {}
            Incoming::Frame(Frame::Error { message }) => {
                return Err(MessagingError::authentication(endpoint, message))
            }
            Incoming::Frame(other) => {
                return Err(MessagingError::protocol(format!(
                    "expected connected frame, got {other:?}"
                )))
            }
            Incoming::Malformed(e) => return Err(e),
            Incoming::Closed => return Err(MessagingError::closed(endpoint)),
        }

        let shared = Arc::new(ClientShared {
            subscribers: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });
        let reader_task = tokio::spawn(client_read_loop(
            endpoint.clone(),
            reader,
            Arc::clone(&shared),
        ));

        debug!(endpoint = %endpoint, "Connected to TCP broker");

        Ok(Arc::new(TcpBrokerConnection {
            endpoint: endpoint.clone(),
            writer: tokio::sync::Mutex::new(writer),
            shared,
            reader_task,
        }))
    }
}

#[derive(Debug)]
struct ClientShared {
    subscribers: TopicSenders<mpsc::UnboundedSender<Envelope>>,
    connected: AtomicBool,
}

async fn client_read_loop(
    endpoint: BrokerEndpoint,
    mut reader: BufReader<OwnedReadHalf>,
    shared: Arc<ClientShared>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Incoming::Frame(Frame::Deliver { topic, envelope })) => {
                if let Err(e) = envelope.validate() {
                    warn!(endpoint = %endpoint, topic = %topic, error = %e, "Dropping invalid envelope");
                    continue;
                }
                let mut subscribers = shared.subscribers.lock();
                if let Some(senders) = subscribers.get_mut(&topic) {
                    senders.retain(|sender| sender.send(envelope.clone()).is_ok());
                }
            }
            Ok(Incoming::Frame(Frame::Error { message })) => {
                warn!(endpoint = %endpoint, message = %message, "Broker reported an error");
            }
            Ok(Incoming::Frame(other)) => {
                debug!(endpoint = %endpoint, frame = ?other, "Ignoring unexpected frame");
            }
            Ok(Incoming::Malformed(e)) => {
                warn!(endpoint = %endpoint, error = %e, "Skipping malformed frame");
            }
            Ok(Incoming::Closed) => {
                debug!(endpoint = %endpoint, "Broker closed the connection");
                break;
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Broker connection failed");
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    // Dropping the senders ends every subscription on this connection
    shared.subscribers.lock().clear();
}

#[derive(Debug)]
struct TcpBrokerConnection {
    endpoint: BrokerEndpoint,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    shared: Arc<ClientShared>,
    reader_task: JoinHandle<()>,
}

impl TcpBrokerConnection {
    async fn send(&self, frame: &Frame) -> MessagingResult<()> {
        if !self.is_connected() {
            return Err(MessagingError::closed(&self.endpoint));
        }
        let line = frame.to_line()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for TcpBrokerConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl BrokerConnection for TcpBrokerConnection {
    fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, envelope: &Envelope) -> MessagingResult<()> {
        self.send(&Frame::Publish {
            topic: topic.to_string(),
            envelope: envelope.clone(),
        })
        .await
        .map_err(|e| MessagingError::publish(topic, e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> MessagingResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(sender);

        self.send(&Frame::Subscribe {
            topic: topic.to_string(),
        })
        .await
        .map_err(|e| MessagingError::subscribe(topic, e.to_string()))?;

        Ok(Subscription::new(topic, receiver))
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ServerState {
    topics: TopicSenders<(u64, mpsc::UnboundedSender<String>)>,
    next_connection_id: AtomicU64,
}

/// Minimal topic broker speaking the frame protocol above
#[derive(Debug)]
pub struct TcpBrokerServer {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl TcpBrokerServer {
    /// Bind and start accepting connections.
    ///
    /// With `credentials` set, clients presenting anything else are refused.
    pub async fn bind(addr: &str, credentials: Option<Credentials>) -> MessagingResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MessagingError::connection(addr, e.to_string()))?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(16);
        let state = Arc::new(ServerState::default());

        let accept_task = tokio::spawn(accept_connections(
            listener,
            state,
            credentials.map(Arc::new),
            shutdown_tx.clone(),
        ));

        info!(address = %local_addr, "TCP broker listening");

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint::new(self.local_addr.ip().to_string(), self.local_addr.port())
    }

    /// Stop accepting and close every client connection
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.accept_task.await;
        info!(address = %self.local_addr, "TCP broker stopped");
    }
}

async fn accept_connections(
    listener: TcpListener,
    state: Arc<ServerState>,
    credentials: Option<Arc<Credentials>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted broker client");
                        tokio::spawn(serve_connection(
                            stream,
                            Arc::clone(&state),
                            credentials.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Broker accept loop shutting down");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    credentials: Option<Arc<Credentials>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let connection_id = state.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Outbound lines go through a channel so no lock is held across a write
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let reply = |frame: Frame| match frame.to_line() {
        Ok(line) => out_tx.send(line).is_ok(),
        Err(_) => false,
    };

    let authenticated = match read_frame(&mut reader).await {
        Ok(Incoming::Frame(Frame::Connect { username, password })) => {
            let presented = Credentials { username, password };
            match credentials.as_deref() {
                Some(required) if *required != presented => {
                    reply(Frame::Error {
                        message: "bad username or password".to_string(),
                    });
                    false
                }
                _ => reply(Frame::Connected),
            }
        }
        _ => false,
    };

    if authenticated {
        loop {
            tokio::select! {
                frame = read_frame(&mut reader) => {
                    match frame {
                        Ok(Incoming::Frame(Frame::Subscribe { topic })) => {
                            state
                                .topics
                                .lock()
                                .entry(topic)
                                .or_default()
                                .push((connection_id, out_tx.clone()));
                        }
                        Ok(Incoming::Frame(Frame::Publish { topic, envelope })) => {
                            let line = match (Frame::Deliver { topic: topic.clone(), envelope }).to_line() {
                                Ok(line) => line,
                                Err(e) => {
                                    warn!(error = %e, "Dropping unserializable envelope");
                                    continue;
                                }
                            };
                            let mut topics = state.topics.lock();
                            if let Some(subscribers) = topics.get_mut(&topic) {
                                subscribers.retain(|(_, sender)| sender.send(line.clone()).is_ok());
                            }
                        }
                        Ok(Incoming::Frame(other)) => {
                            reply(Frame::Error {
                                message: format!("unexpected frame {other:?}"),
                            });
                        }
                        Ok(Incoming::Malformed(e)) => {
                            warn!(connection_id, error = %e, "Skipping malformed frame");
                            reply(Frame::Error {
                                message: e.to_string(),
                            });
                        }
                        Ok(Incoming::Closed) => break,
                        Err(e) => {
                            debug!(connection_id, error = %e, "Client connection failed");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    for subscribers in state.topics.lock().values_mut() {
        subscribers.retain(|(id, _)| *id != connection_id);
    }
    drop(reply);
    drop(out_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::MessageType;
    use crate::models::CorrelationId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_subscribe_over_tcp() {
        let server = TcpBrokerServer::bind("127.0.0.1:0", None).await.unwrap();
        let endpoint = server.endpoint();
        let connector = TcpBrokerConnector::new();

        let subscriber = connector
            .connect(&endpoint, &Credentials::anonymous())
            .await
            .unwrap();
        let mut subscription = subscriber.subscribe("collaboration/response").await.unwrap();

        let publisher = connector
            .connect(&endpoint, &Credentials::anonymous())
            .await
            .unwrap();

        // Give the server a moment to register the subscription
        tokio::time::sleep(Duration::from_millis(50)).await;

        let envelope =
            Envelope::headers_only(&CorrelationId::new("tcp-1"), MessageType::InvocationResponse);
        publisher
            .publish("collaboration/response", &envelope)
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, envelope);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_and_oversized_frames_are_skipped() {
        let server = TcpBrokerServer::bind("127.0.0.1:0", None).await.unwrap();
        let endpoint = server.endpoint();

        let subscriber = TcpBrokerConnector::new()
            .connect(&endpoint, &Credentials::anonymous())
            .await
            .unwrap();
        let mut subscription = subscriber.subscribe("collaboration/response").await.unwrap();

        // Raw client so garbage can be written to the server
        let mut raw = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .unwrap();
        let hello = Frame::Connect {
            username: None,
            password: None,
        };
        raw.write_all(hello.to_line().unwrap().as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        raw.write_all(b"this is not a frame\n").await.unwrap();
        let mut oversized = vec![b'x'; MAX_FRAME_BYTES + 16];
        oversized.push(b'\n');
        raw.write_all(&oversized).await.unwrap();

        let envelope =
            Envelope::headers_only(&CorrelationId::new("tcp-2"), MessageType::InvocationResponse);
        let publish = Frame::Publish {
            topic: "collaboration/response".to_string(),
            envelope: envelope.clone(),
        };
        raw.write_all(publish.to_line().unwrap().as_bytes()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, envelope);
        assert!(subscriber.is_connected());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_refuses_bad_credentials() {
        let server = TcpBrokerServer::bind("127.0.0.1:0", Some(Credentials::new("admin", "secret")))
            .await
            .unwrap();
        let connector = TcpBrokerConnector::new();

        let denied = connector
            .connect(&server.endpoint(), &Credentials::new("admin", "nope"))
            .await;
        assert!(matches!(denied, Err(MessagingError::Authentication { .. })));

        let allowed = connector
            .connect(&server.endpoint(), &Credentials::new("admin", "secret"))
            .await;
        assert!(allowed.is_ok());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let server = TcpBrokerServer::bind("127.0.0.1:0", None).await.unwrap();
        let endpoint = server.endpoint();
        server.shutdown().await;

        let result = TcpBrokerConnector::new()
            .connect(&endpoint, &Credentials::anonymous())
            .await;
        assert!(result.is_err());
    }
}
