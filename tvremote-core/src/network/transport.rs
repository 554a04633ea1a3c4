//! Transport channel between the connection manager and a device.
//!
//! A [`Connector`] opens a [`TransportChannel`]: an outbound queue of text
//! frames and an inbound, ordered stream of [`TransportEvent`]s. One pump
//! task per connection multiplexes writes and reads, so a write
//! confirmation is always delivered before any frame read after it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{Connector as TlsConnector, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, info, trace, warn};

use crate::error::RemoteError;
use crate::network::tls::{self, CertificateValidator};

// ── Messages ─────────────────────────────────────────────────────

/// Manager → transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text frame tagged with the ledger sequence number.
    Frame { seq: u64, text: String },
    /// Close the channel gracefully.
    Close,
}

/// Transport → manager, in the order things happened on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The frame with this sequence number was written.
    Written(u64),
    /// A text frame arrived.
    Frame(String),
    /// The channel ended. `clean` is `true` when the device sent a close frame.
    Closed { clean: bool },
    /// Read or write failed; nothing follows.
    Failed(RemoteError),
}

// ── TransportChannel ─────────────────────────────────────────────

/// The manager's end of an open channel.
#[derive(Debug)]
pub struct TransportChannel {
    tx: mpsc::UnboundedSender<Outgoing>,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The transport's end of an open channel.
#[derive(Debug)]
pub struct PeerChannel {
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

pub type ChannelSender = mpsc::UnboundedSender<Outgoing>;

impl TransportChannel {
    /// Create a connected pair of channel ends.
    pub fn pair() -> (TransportChannel, PeerChannel) {
        let (tx, outgoing) = mpsc::unbounded_channel();
        let (events, rx) = mpsc::unbounded_channel();
        (TransportChannel { tx, rx }, PeerChannel { outgoing, events })
    }

    /// Separate the write half from the event stream.
    pub fn split(self) -> (ChannelSender, mpsc::UnboundedReceiver<TransportEvent>) {
        (self.tx, self.rx)
    }
}

// ── Connector ────────────────────────────────────────────────────

/// What a connector needs to open one control channel.
#[derive(Clone)]
pub struct ChannelRequest {
    pub url: String,
    pub host: String,
    pub secure: bool,
    pub certificate_validator: Option<Arc<dyn CertificateValidator>>,
}

impl std::fmt::Debug for ChannelRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRequest")
            .field("host", &self.host)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Opens transport channels. The seam between the state machine and the
/// network.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: &ChannelRequest) -> Result<TransportChannel, RemoteError>;
}

// ── WebSocketConnector ───────────────────────────────────────────

/// Production connector: WebSocket over TCP, TLS when `secure`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, request: &ChannelRequest) -> Result<TransportChannel, RemoteError> {
        let tls = if request.secure {
            let config = tls::client_config(&request.host, request.certificate_validator.clone())?;
            Some(TlsConnector::Rustls(config))
        } else {
            None
        };

        let ws_request = request.url.as_str().into_client_request()?;
        info!(host = %request.host, secure = request.secure, "opening control channel");
        let (ws, response) = connect_async_tls_with_config(ws_request, None, true, tls).await?;
        debug!(status = %response.status(), "control channel upgraded");

        let (channel, peer) = TransportChannel::pair();
        tokio::spawn(pump(ws, peer));
        Ok(channel)
    }
}

/// Move frames between the socket and the channel until either side ends.
async fn pump<S>(ws: WebSocketStream<S>, mut peer: PeerChannel)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outgoing = peer.outgoing.recv() => match outgoing {
                Some(Outgoing::Frame { seq, text }) => {
                    trace!(seq, frame = %text, "writing frame");
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!("control channel write error: {e}");
                        let _ = peer.events.send(TransportEvent::Failed(e.into()));
                        break;
                    }
                    if peer.events.send(TransportEvent::Written(seq)).is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => {
                        TransportEvent::Frame(text.as_str().to_owned())
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        TransportEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "device closed the control channel");
                        let _ = peer.events.send(TransportEvent::Closed { clean: true });
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("control channel read error: {e}");
                        let _ = peer.events.send(TransportEvent::Failed(e.into()));
                        break;
                    }
                    None => {
                        let _ = peer.events.send(TransportEvent::Closed { clean: false });
                        break;
                    }
                };
                trace!(?event, "read frame");
                if peer.events.send(event).is_err() {
                    break;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
