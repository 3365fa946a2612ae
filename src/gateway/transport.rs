//! TLS WebSocket transport for the gateway connection.
//!
//! The connection splits into a write half and a read half so the protocol
//! engine can send while a receive is pending. Binary frames are
//! zlib-inflated and surfaced as text, so the engine only ever sees JSON
//! payloads.

use std::io::Read;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame-level events surfaced to the protocol engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text payload (possibly inflated from a binary frame).
    Text(String),
    /// The peer closed the connection.
    Closed { code: u16, reason: String },
    /// The stream ended without a close frame.
    Disconnected,
}

/// An open gateway WebSocket, not yet split.
pub struct Transport {
    stream: WsStream,
}

impl Transport {
    /// Open the WebSocket at `ws_url`.
    ///
    /// # Errors
    ///
    /// `Error::WebSocket` when the handshake fails.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, response) = connect_async(ws_url).await?;
        debug!(status = %response.status(), "websocket open");
        Ok(Self { stream })
    }

    /// Split into independently usable write and read halves.
    #[must_use]
    pub fn split(self) -> (TransportWriter, TransportReader) {
        let (sink, stream) = self.stream.split();
        (TransportWriter { sink }, TransportReader { stream })
    }
}

/// Write half: outbound frames and close.
pub struct TransportWriter {
    sink: SplitSink<WsStream, Message>,
}

impl TransportWriter {
    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// `Error::WebSocket` when the send fails.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Close the connection with a code and empty reason.
    ///
    /// # Errors
    ///
    /// `Error::WebSocket` when the close frame cannot be sent.
    pub async fn close(&mut self, code: u16) -> Result<()> {
        self.sink
            .send(Message::Close(Some(CloseFrame {
                code: code.into(),
                reason: "".into(),
            })))
            .await?;
        Ok(())
    }
}

/// Read half: inbound frames with binary inflation.
pub struct TransportReader {
    stream: SplitStream<WsStream>,
}

impl TransportReader {
    /// Receive the next frame, inflating binary payloads.
    ///
    /// # Errors
    ///
    /// `Error::WebSocket` for protocol failures, `Error::Transport` when a
    /// binary frame does not inflate to UTF-8 text.
    pub async fn next(&mut self) -> Result<TransportEvent> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(TransportEvent::Text(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    let mut inflated = String::new();
                    flate2::read::ZlibDecoder::new(&bytes[..])
                        .read_to_string(&mut inflated)
                        .map_err(|err| Error::Transport(format!("zlib inflate failed: {err}")))?;
                    return Ok(TransportEvent::Text(inflated));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Ok(TransportEvent::Closed { code, reason });
                }
                Some(Ok(_)) => {
                    // Ping/pong and raw frames are handled by tungstenite.
                }
                Some(Err(err)) => return Err(Error::WebSocket(err)),
                None => return Ok(TransportEvent::Disconnected),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn zlib_frames_inflate_to_text() {
        let payload = r#"{"op":11}"#;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut inflated = String::new();
        std::io::Read::read_to_string(
            &mut flate2::read::ZlibDecoder::new(&compressed[..]),
            &mut inflated,
        )
        .unwrap();
        assert_eq!(inflated, payload);
    }
}
