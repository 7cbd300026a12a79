use async_trait::async_trait;
use convo_core::{ConnectionHandle, SessionError, SessionErrorKind};
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::history::endpoint_url;

const LIVE_PATH: [&str; 4] = ["api", "v1", "chat", "ws"];
const LINK_BUFFER: usize = 64;

/// Something the transport observed on a live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One raw inbound text frame.
    Frame(String),
    /// The remote side closed the channel.
    Closed,
    /// The transport failed.
    Error(String),
}

/// Runtime side of an open live channel.
#[derive(Debug)]
pub struct LiveLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
    /// Cancelling closes the channel.
    pub stop: CancellationToken,
}

/// Transport side of an open live channel.
#[derive(Debug)]
pub struct LinkPeer {
    pub outbound: mpsc::Receiver<String>,
    pub inbound: mpsc::Sender<LinkEvent>,
    pub stop: CancellationToken,
}

/// Create the two connected ends of a live channel.
pub fn link_pair(buffer: usize) -> (LiveLink, LinkPeer) {
    let (outbound_tx, outbound_rx) = mpsc::channel(buffer.max(1));
    let (inbound_tx, inbound_rx) = mpsc::channel(buffer.max(1));
    let stop = CancellationToken::new();

    (
        LiveLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            stop: stop.clone(),
        },
        LinkPeer {
            outbound: outbound_rx,
            inbound: inbound_tx,
            stop,
        },
    )
}

/// Opens duplex text channels for conversations.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open the channel described by `handle`. Resolves once the channel
    /// accepts sends.
    async fn connect(&self, handle: &ConnectionHandle) -> Result<LiveLink, SessionError>;
}

/// Live transport over the workspace chat WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: Url,
}

impl WsTransport {
    /// `ws_base` is the ws/wss origin (plus optional path prefix).
    pub fn new(ws_base: &Url) -> Result<Self, SessionError> {
        match ws_base.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(SessionError::new(
                    SessionErrorKind::Internal,
                    format!("live channel url must use ws or wss, got '{other}'"),
                ));
            }
        }

        Ok(Self {
            endpoint: endpoint_url(ws_base, &LIVE_PATH)?,
        })
    }

    fn connect_url(&self, handle: &ConnectionHandle) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("user_id", &handle.self_id.to_string())
            .append_pair("room", handle.key.as_str());
        url
    }
}

/// Map an http(s) service url onto its ws(s) counterpart.
pub fn derive_ws_url(base: &Url) -> Result<Url, SessionError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SessionError::new(
                SessionErrorKind::Internal,
                format!("cannot derive a live channel url from scheme '{other}'"),
            ));
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme).map_err(|()| {
        SessionError::new(
            SessionErrorKind::Internal,
            format!("cannot switch '{base}' to scheme '{scheme}'"),
        )
    })?;
    Ok(url)
}

#[async_trait]
impl LiveTransport for WsTransport {
    async fn connect(&self, handle: &ConnectionHandle) -> Result<LiveLink, SessionError> {
        let url = self.connect_url(handle);
        debug!(handle_id = handle.id, %url, "opening live channel");

        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| SessionError::channel(format!("websocket connection failed: {err}")))?;

        let (link, peer) = link_pair(LINK_BUFFER);
        tokio::spawn(pump(stream, peer, handle.id));
        Ok(link)
    }
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut peer: LinkPeer,
    handle_id: u64,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = peer.stop.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            outbound = peer.outbound.recv() => {
                let Some(text) = outbound else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(err) = write.send(Message::Text(text.into())).await {
                    let _ = peer.inbound.send(LinkEvent::Error(err.to_string())).await;
                    break;
                }
            }
            incoming = read.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => LinkEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => {
                        LinkEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Some(Ok(Message::Close(_))) | None => LinkEvent::Closed,
                    // ping/pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(handle_id, error = %err, "live channel read failed");
                        LinkEvent::Error(err.to_string())
                    }
                };

                let terminal = !matches!(event, LinkEvent::Frame(_));
                if peer.inbound.send(event).await.is_err() || terminal {
                    break;
                }
            }
        }
    }

    info!(handle_id, "live channel pump stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use convo_core::{ParticipantId, compute_key};
    use tokio::{net::TcpListener, sync::oneshot, time::timeout};
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn handle() -> ConnectionHandle {
        ConnectionHandle {
            id: 7,
            key: compute_key(&1.into(), &2.into()).expect("key"),
            self_id: ParticipantId::Numeric(1),
        }
    }

    #[test]
    fn derives_ws_urls_from_http_bases() {
        let http = Url::parse("http://localhost:8000").expect("url");
        let https = Url::parse("https://work.example.org/gw").expect("url");
        assert_eq!(derive_ws_url(&http).expect("ws").as_str(), "ws://localhost:8000/");
        assert_eq!(
            derive_ws_url(&https).expect("wss").as_str(),
            "wss://work.example.org/gw"
        );
        assert!(derive_ws_url(&Url::parse("ftp://example.org").expect("url")).is_err());
    }

    #[test]
    fn rejects_non_websocket_base() {
        let base = Url::parse("http://localhost:8000").expect("url");
        assert!(WsTransport::new(&base).is_err());
    }

    #[test]
    fn connect_url_carries_viewer_and_room() {
        let base = Url::parse("ws://localhost:8000").expect("url");
        let transport = WsTransport::new(&base).expect("transport");
        assert_eq!(
            transport.connect_url(&handle()).as_str(),
            "ws://localhost:8000/api/v1/chat/ws?user_id=1&room=dm_1_2"
        );
    }

    #[tokio::test]
    async fn exchanges_frames_with_server_and_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (uri_tx, uri_rx) = oneshot::channel::<String>();
        let (received_tx, received_rx) = oneshot::channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_hdr_async(
                stream,
                move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = uri_tx.send(req.uri().to_string());
                    Ok(resp)
                },
            )
            .await
            .expect("handshake");

            ws.send(Message::Text("User 2: hi".into()))
                .await
                .expect("server send");
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let _ = received_tx.send(text.as_str().to_owned());
                    break;
                }
            }
            let _ = ws.close(None).await;
        });

        let base = Url::parse(&format!("ws://{addr}")).expect("url");
        let transport = WsTransport::new(&base).expect("transport");
        let mut link = transport.connect(&handle()).await.expect("connect");

        let uri = timeout(Duration::from_secs(2), uri_rx)
            .await
            .expect("uri timeout")
            .expect("uri");
        assert_eq!(uri, "/api/v1/chat/ws?user_id=1&room=dm_1_2");

        let first = timeout(Duration::from_secs(2), link.inbound.recv())
            .await
            .expect("frame timeout")
            .expect("frame");
        assert_eq!(first, LinkEvent::Frame("User 2: hi".into()));

        link.outbound
            .send("hello".to_owned())
            .await
            .expect("client send");
        let echoed = timeout(Duration::from_secs(2), received_rx)
            .await
            .expect("server receive timeout")
            .expect("server receive");
        assert_eq!(echoed, "hello");

        let closed = timeout(Duration::from_secs(2), link.inbound.recv())
            .await
            .expect("close timeout")
            .expect("close event");
        assert_eq!(closed, LinkEvent::Closed);
    }

    #[tokio::test]
    async fn refused_connection_is_a_channel_error() {
        let base = Url::parse("ws://127.0.0.1:9").expect("url");
        let transport = WsTransport::new(&base).expect("transport");
        let err = transport.connect(&handle()).await.expect_err("must fail");
        assert_eq!(err.kind, SessionErrorKind::Channel);
    }
}
