//! WebSocket channel.
//!
//! One protocol envelope per text frame. Binary frames are accepted if they
//! hold UTF-8; ping/pong is answered by tungstenite underneath.

use std::io;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mup_core::transport::{CLOSE_ABNORMAL, Channel, ChannelConnection, ChannelEvent};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, warn};

/// Close code reported for a close frame that carried no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketChannel;

impl WebSocketChannel {
    /// Create the channel factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    type Connection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

    async fn open(&self, url: &str) -> io::Result<Self::Connection> {
        let (stream, response) = connect_async(url).await.map_err(io::Error::other)?;
        debug!(url, status = %response.status(), "websocket connected");
        Ok(WebSocketConnection::new(stream))
    }
}

/// An open WebSocket, over any byte stream.
///
/// `recv` polls the stream directly, which is cancel-safe.
pub struct WebSocketConnection<S> {
    stream: WebSocketStream<S>,
    finished: bool,
}

impl<S> WebSocketConnection<S> {
    /// Wrap a stream that has completed the WebSocket handshake.
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream, finished: false }
    }
}

#[async_trait]
impl<S> ChannelConnection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: String) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "websocket closed"));
        }
        self.stream.send(Message::Text(frame)).await.map_err(io::Error::other)
    }

    async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }
        loop {
            let event = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => ChannelEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => ChannelEvent::Message(text),
                    Err(_) => {
                        warn!("dropping non-UTF-8 binary frame");
                        continue;
                    },
                },
                Some(Ok(Message::Close(frame))) => {
                    self.finished = true;
                    let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                        (u16::from(f.code), f.reason.into_owned())
                    });
                    ChannelEvent::Closed { code, reason }
                },
                Some(Ok(_)) => continue,
                Some(Err(error)) => {
                    self.finished = true;
                    ChannelEvent::Error(error.to_string())
                },
                None => {
                    self.finished = true;
                    ChannelEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() }
                },
            };
            return Some(event);
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.finished = true;
        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
        if let Err(error) = self.stream.close(Some(frame)).await {
            debug!(%error, "websocket close failed");
        }
    }
}
