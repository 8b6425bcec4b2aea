//! TCP relay — a shared bus for agents in different processes.
//!
//! A [`RelayNode`] listens for client connections and fans every
//! published frame out to the channel's subscribers. A
//! [`RelayTransport`] is the client side: it implements [`Transport`]
//! over one authenticated connection.
//!
//! Frames are JSON prefixed with a 4-byte big-endian length header.
//! Clients authenticate with an HMAC-SHA256 handshake over a pre-shared
//! secret before any other frame is accepted. Delivery is best-effort:
//! a backlogged subscriber drops frames rather than stalling the relay.

use crate::error::BusError;
use crate::transport::{Subscription, Transport};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for handshake authentication.
fn hmac_sign(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify HMAC-SHA256 signature using constant-time comparison.
fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Outbound frames buffered per connection before drops kick in.
const CONNECTION_BACKLOG: usize = 256;

/// Relay protocol frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RelayFrame {
    /// Client handshake with HMAC-SHA256(secret, nonce + client_id).
    Hello {
        client_id: String,
        nonce: String,
        auth_hmac: String,
    },
    /// Relay handshake acknowledgement with
    /// HMAC-SHA256(secret, nonce + "relay").
    HelloAck { nonce: String, auth_hmac: String },
    /// Handshake or protocol rejection.
    Denied { message: String },
    /// Join channels; subsequent publishes there are delivered here.
    Subscribe { channels: Vec<String> },
    /// Publish base64 payload bytes to a channel.
    Publish { channel: String, payload: String },
    /// A published frame delivered to a subscriber.
    Deliver { channel: String, payload: String },
}

/// Encode a frame to bytes (4-byte big-endian length + JSON).
fn encode_frame(frame: &RelayFrame) -> Result<Vec<u8>, BusError> {
    let json = serde_json::to_vec(frame)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Write a framed message to a TCP stream.
async fn write_frame(writer: &mut OwnedWriteHalf, frame: &RelayFrame) -> Result<(), BusError> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message from a TCP stream.
async fn read_frame(reader: &mut OwnedReadHalf) -> Result<RelayFrame, BusError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(BusError::ConnectionClosed);
        }
        Err(e) => return Err(BusError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(BusError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// channel name -> (connection id -> encoded outbound frames)
type ChannelMap = DashMap<String, HashMap<u64, mpsc::Sender<Vec<u8>>>>;

/// The relay server.
pub struct RelayNode {
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl RelayNode {
    /// Bind the listener and start accepting clients.
    ///
    /// Refuses to start without a shared secret — an open relay would
    /// let anyone inject envelopes.
    pub async fn start(
        listen_addr: SocketAddr,
        shared_secret: impl Into<String>,
    ) -> Result<(Self, JoinHandle<()>), BusError> {
        let secret = shared_secret.into();
        if secret.is_empty() {
            return Err(BusError::HandshakeFailed(
                "relay requires a shared secret".into(),
            ));
        }

        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Relay listening");

        let subscribers: Arc<ChannelMap> = Arc::new(DashMap::new());
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, secret, subscribers).await;
        });

        Ok((Self { local_addr }, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn accept_loop(listener: TcpListener, secret: String, subscribers: Arc<ChannelMap>) {
        let next_conn_id = AtomicU64::new(0);
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                    debug!(%addr, conn_id, "Relay accepted connection");
                    let secret = secret.clone();
                    let subscribers = Arc::clone(&subscribers);
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, conn_id, secret, subscribers).await
                        {
                            debug!(%addr, conn_id, error = %e, "Relay connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Relay accept error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Serve one client: authenticate, then subscribe/fan-out until hangup.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    secret: String,
    subscribers: Arc<ChannelMap>,
) -> Result<(), BusError> {
    let (mut reader, mut writer) = stream.into_split();

    // Clients MUST authenticate before any other frame is honored.
    let frame = read_frame(&mut reader).await?;
    let client_id = match frame {
        RelayFrame::Hello {
            client_id,
            nonce,
            auth_hmac,
        } => {
            let auth_data = format!("{nonce}{client_id}");
            if !hmac_verify(&secret, auth_data.as_bytes(), &auth_hmac) {
                let denied = RelayFrame::Denied {
                    message: "HMAC authentication failed".to_string(),
                };
                write_frame(&mut writer, &denied).await?;
                return Err(BusError::HandshakeFailed(
                    "HMAC verification failed on incoming Hello".into(),
                ));
            }

            let ack_nonce = uuid::Uuid::new_v4().to_string();
            let ack_hmac = hmac_sign(&secret, format!("{ack_nonce}relay").as_bytes());
            write_frame(
                &mut writer,
                &RelayFrame::HelloAck {
                    nonce: ack_nonce,
                    auth_hmac: ack_hmac,
                },
            )
            .await?;
            client_id
        }
        _ => {
            warn!(%addr, "Relay rejected unauthenticated frame");
            let denied = RelayFrame::Denied {
                message: "Authentication required: send Hello first".to_string(),
            };
            write_frame(&mut writer, &denied).await?;
            return Err(BusError::HandshakeFailed(
                "Rejected unauthenticated frame".into(),
            ));
        }
    };
    info!(client = %client_id, %addr, "Relay client connected");

    // Writes to this client go through a queue so one slow client only
    // drops its own frames.
    let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BACKLOG);
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut joined: Vec<String> = Vec::new();
    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(BusError::ConnectionClosed) => break Ok(()),
            Err(e) => break Err(e),
        };

        match frame {
            RelayFrame::Subscribe { channels } => {
                for channel in channels {
                    subscribers
                        .entry(channel.clone())
                        .or_default()
                        .insert(conn_id, outbound.clone());
                    joined.push(channel);
                }
            }
            RelayFrame::Publish { channel, payload } => {
                let deliver = RelayFrame::Deliver {
                    channel: channel.clone(),
                    payload,
                };
                match encode_frame(&deliver) {
                    Ok(bytes) => fan_out(&subscribers, &channel, &bytes),
                    Err(e) => warn!(error = %e, channel, "Failed to encode deliver frame"),
                }
            }
            other => {
                debug!(client = %client_id, ?other, "Ignoring unexpected frame");
            }
        }
    };

    for channel in joined {
        if let Some(mut entry) = subscribers.get_mut(&channel) {
            entry.remove(&conn_id);
        }
    }
    writer_task.abort();
    info!(client = %client_id, "Relay client disconnected");
    result
}

/// Queue a frame for every subscriber of a channel. Best-effort: a full
/// backlog drops the frame for that subscriber only.
fn fan_out(subscribers: &ChannelMap, channel: &str, bytes: &[u8]) {
    if let Some(entry) = subscribers.get(channel) {
        for (conn_id, sink) in entry.iter() {
            if sink.try_send(bytes.to_vec()).is_err() {
                debug!(conn_id, channel, "Subscriber backlogged, frame dropped");
            }
        }
    }
}

/// Client side of the relay: one authenticated connection implementing
/// [`Transport`].
pub struct RelayTransport {
    client_id: String,
    writer: Mutex<OwnedWriteHalf>,
    routes: Arc<DashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
    reader_task: JoinHandle<()>,
}

impl RelayTransport {
    /// Connect to a relay and perform the HMAC handshake.
    pub async fn connect(
        addr: SocketAddr,
        shared_secret: &str,
        client_id: impl Into<String>,
    ) -> Result<Self, BusError> {
        let client_id = client_id.into();
        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        let nonce = uuid::Uuid::new_v4().to_string();
        let auth_hmac = hmac_sign(shared_secret, format!("{nonce}{client_id}").as_bytes());
        write_frame(
            &mut writer,
            &RelayFrame::Hello {
                client_id: client_id.clone(),
                nonce,
                auth_hmac,
            },
        )
        .await?;

        match read_frame(&mut reader).await? {
            RelayFrame::HelloAck { nonce, auth_hmac } => {
                let expected = format!("{nonce}relay");
                if !hmac_verify(shared_secret, expected.as_bytes(), &auth_hmac) {
                    return Err(BusError::HandshakeFailed(
                        "HMAC verification failed on HelloAck".into(),
                    ));
                }
            }
            RelayFrame::Denied { message } => {
                return Err(BusError::HandshakeFailed(message));
            }
            _ => {
                return Err(BusError::HandshakeFailed(
                    "Unexpected response to Hello".into(),
                ));
            }
        }
        info!(client = %client_id, %addr, "Connected to relay");

        let routes: Arc<DashMap<String, Vec<mpsc::Sender<Vec<u8>>>>> = Arc::new(DashMap::new());
        let reader_routes = Arc::clone(&routes);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(RelayFrame::Deliver { channel, payload }) => {
                        let Ok(bytes) = BASE64.decode(&payload) else {
                            warn!(channel, "Undecodable deliver payload, skipping");
                            continue;
                        };
                        if let Some(sinks) = reader_routes.get(&channel) {
                            for sink in sinks.iter() {
                                let _ = sink.try_send(bytes.clone());
                            }
                        }
                    }
                    Ok(other) => {
                        debug!(?other, "Ignoring unexpected frame from relay");
                    }
                    Err(BusError::ConnectionClosed) => {
                        info!("Relay connection closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Relay read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            client_id,
            writer: Mutex::new(writer),
            routes,
            reader_task,
        })
    }

    /// The identity this client presented to the relay.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send_frame(&self, frame: &RelayFrame) -> Result<(), BusError> {
        let bytes = encode_frame(frame)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> Result<(), BusError> {
        self.send_frame(&RelayFrame::Publish {
            channel: channel.to_string(),
            payload: BASE64.encode(&bytes),
        })
        .await
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(CONNECTION_BACKLOG);
        for channel in channels {
            self.routes.entry(channel.clone()).or_default().push(tx.clone());
        }
        self.send_frame(&RelayFrame::Subscribe {
            channels: channels.to_vec(),
        })
        .await?;
        Ok(Subscription::new(rx))
    }
}
