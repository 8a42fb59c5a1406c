//! The duplex-channel seam between the controller and the wire.
//!
//! The controller only sees [`Transport`], [`FrameSink`] and [`FrameStream`];
//! production uses the `tokio-tungstenite` implementation below, tests use an
//! in-memory pair.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::Message as WsMessage,
};

/// One frame on the duplex channel: JSON control text or raw audio bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

/// Opens duplex channels. One implementation per wire technology.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

/// The outbound half of an open channel.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: WireFrame) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// The inbound half of an open channel. `None` means the channel is closed.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<Result<WireFrame>>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// The production transport: one WebSocket per connection attempt.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("connecting to {}", url))?;
        let (tx, rx) = ws_stream.split();
        Ok((
            Box::new(WsFrameSink { inner: tx }),
            Box::new(WsFrameStream { inner: rx }),
        ))
    }
}

struct WsFrameSink {
    inner: WsSink,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: WireFrame) -> Result<()> {
        let msg = match frame {
            WireFrame::Text(text) => WsMessage::Text(text.into()),
            WireFrame::Binary(data) => WsMessage::Binary(data),
        };
        self.inner.send(msg).await.context("sending frame")
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await.context("closing channel")
    }
}

struct WsFrameStream {
    inner: WsStream,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<WireFrame>> {
        loop {
            match self.inner.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(WireFrame::Text(text.to_string()))),
                Ok(WsMessage::Binary(data)) => return Some(Ok(WireFrame::Binary(data))),
                Ok(WsMessage::Close(_)) => return None,
                // Protocol-level ping/pong is handled by tungstenite itself;
                // application liveness uses JSON control frames instead.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
