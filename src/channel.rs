//! Connection channel
//!
//! The session only needs three things from a transport: send a text frame,
//! read the inbound frames once, and close. [`Connector`] opens such a
//! channel; [`WsConnector`] does it over tokio-tungstenite and
//! [`memory::MemoryConnector`] does it in memory.

use crate::error::{LiveError, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

/// Inbound frame kinds the session distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<String>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Anything else the transport surfaced, by name.
    Other(String),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Text(_) => FrameKind::Text,
            Frame::Binary(_) => FrameKind::Binary,
            Frame::Close(_) => FrameKind::Close,
            Frame::Ping(_) => FrameKind::Ping,
            Frame::Pong(_) => FrameKind::Pong,
            Frame::Other(_) => FrameKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Other,
}

/// Inbound frames of one connection. Consumed once.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Write half of a connection.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, text: String) -> Result<()>;
    async fn close(&self, reason: &str) -> Result<()>;
}

/// An open connection: shared write half plus the inbound frames.
pub struct Channel {
    pub sink: Arc<dyn ChannelSink>,
    pub frames: FrameStream,
}

/// Opens connections to the live endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Channel>;
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket write half, wrapped in a mutex so concurrent senders never interleave.
pub struct WsSink {
    inner: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl ChannelSink for WsSink {
    async fn send(&self, text: String) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&self, reason: &str) -> Result<()> {
        let mut writer = self.inner.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        writer.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}

/// Connector for the real service over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Channel> {
        let (ws_stream, resp) = connect_async(url).await?;
        debug!("WebSocket connection response: {:?}", resp.status());
        info!("WebSocket connection established");

        let (sink, stream) = ws_stream.split();
        let frames = stream.map(|msg| match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text.as_str().to_string())),
            Ok(Message::Binary(bytes)) => Ok(Frame::Binary(bytes.to_vec())),
            Ok(Message::Close(frame)) => Ok(Frame::Close(frame.map(|f| f.reason.as_str().to_string()))),
            Ok(Message::Ping(bytes)) => Ok(Frame::Ping(bytes.to_vec())),
            Ok(Message::Pong(bytes)) => Ok(Frame::Pong(bytes.to_vec())),
            Ok(Message::Frame(_)) => Ok(Frame::Other("raw frame".to_string())),
            Err(e) => Err(LiveError::WebSocket(e)),
        });

        Ok(Channel {
            sink: Arc::new(WsSink {
                inner: Mutex::new(sink),
            }),
            frames: Box::pin(frames),
        })
    }
}

/// In-memory channel for driving a session without a network.
pub mod memory {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type Inbound = mpsc::UnboundedSender<Result<Frame>>;

    /// Connector side handed to the client. Can be opened once.
    pub struct MemoryConnector {
        frames: SyncMutex<Option<mpsc::UnboundedReceiver<Result<Frame>>>>,
        inbound: Inbound,
        outbound: mpsc::UnboundedSender<String>,
        opens: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        fail_open: bool,
    }

    /// Peer side kept by the test: injects frames, observes sends.
    pub struct MemoryPeer {
        inbound: Inbound,
        outbound: mpsc::UnboundedReceiver<String>,
        opens: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    /// Create a connected connector/peer pair.
    pub fn pair() -> (MemoryConnector, MemoryPeer) {
        let (inbound, frames) = mpsc::unbounded_channel();
        let (outbound, sent) = mpsc::unbounded_channel();
        let opens = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let connector = MemoryConnector {
            frames: SyncMutex::new(Some(frames)),
            inbound: inbound.clone(),
            outbound,
            opens: opens.clone(),
            closed: closed.clone(),
            fail_open: false,
        };
        let peer = MemoryPeer {
            inbound,
            outbound: sent,
            opens,
            closed,
        };
        (connector, peer)
    }

    impl MemoryConnector {
        /// Make every `open` fail with a transport error.
        pub fn failing(mut self) -> Self {
            self.fail_open = true;
            self
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn open(&self, _url: &str) -> Result<Channel> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(LiveError::transport("connection refused"));
            }
            let frames = self
                .frames
                .lock()
                .take()
                .ok_or_else(|| LiveError::transport("memory channel already consumed"))?;
            Ok(Channel {
                sink: Arc::new(MemorySink {
                    inbound: self.inbound.clone(),
                    outbound: self.outbound.clone(),
                    closed: self.closed.clone(),
                }),
                frames: Box::pin(UnboundedReceiverStream::new(frames)),
            })
        }
    }

    struct MemorySink {
        inbound: Inbound,
        outbound: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ChannelSink for MemorySink {
        async fn send(&self, text: String) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(LiveError::transport("channel closed"));
            }
            self.outbound
                .send(text)
                .map_err(|_| LiveError::transport("peer dropped"))
        }

        async fn close(&self, reason: &str) -> Result<()> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                // Echo the close back like a well-behaved server.
                let _ = self.inbound.send(Ok(Frame::Close(Some(reason.to_string()))));
            }
            Ok(())
        }
    }

    impl MemoryPeer {
        pub fn push(&self, frame: Frame) {
            let _ = self.inbound.send(Ok(frame));
        }

        pub fn push_text<S: Into<String>>(&self, text: S) {
            self.push(Frame::Text(text.into()));
        }

        pub fn push_error(&self, err: LiveError) {
            let _ = self.inbound.send(Err(err));
        }

        pub async fn recv(&mut self) -> Option<String> {
            self.outbound.recv().await
        }

        /// Everything sent so far, without waiting.
        pub fn drain(&mut self) -> Vec<String> {
            let mut sent = Vec::new();
            while let Ok(text) = self.outbound.try_recv() {
                sent.push(text);
            }
            sent
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory;
    use super::*;

    #[tokio::test]
    async fn test_memory_channel_round_trip() {
        let (connector, mut peer) = memory::pair();
        let mut channel = connector.open("mem://").await.unwrap();
        assert_eq!(peer.open_count(), 1);

        channel.sink.send("hello".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        peer.push_text("{}");
        assert_eq!(channel.frames.next().await.unwrap().unwrap(), Frame::Text("{}".into()));

        channel.sink.close("bye").await.unwrap();
        assert!(peer.is_closed());
        assert_eq!(
            channel.frames.next().await.unwrap().unwrap(),
            Frame::Close(Some("bye".into()))
        );
        assert!(channel.sink.send("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_connector_opens_once() {
        let (connector, peer) = memory::pair();
        assert!(connector.open("mem://").await.is_ok());
        assert!(matches!(connector.open("mem://").await, Err(LiveError::Transport(_))));
        assert_eq!(peer.open_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_connector() {
        let (connector, peer) = memory::pair();
        let connector = connector.failing();
        assert!(matches!(connector.open("mem://").await, Err(e) if e.is_transport()));
        assert_eq!(peer.open_count(), 1);
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::Text("x".into()).kind(), FrameKind::Text);
        assert_eq!(Frame::Close(None).kind(), FrameKind::Close);
        assert_eq!(Frame::Other("cont".into()).kind(), FrameKind::Other);
    }
}
