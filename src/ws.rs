//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves that implement the crate's transport traits.
//! Nothing else in the crate touches `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! A single [`connect`] function handles URL→request building, header
//! insertion, and TLS negotiation. It returns a ([`WsWriter`], [`WsReader`])
//! pair; [`WsConnector`] exposes the same thing as a
//! [`Connector`](crate::transport::Connector) for the connection manager.
//!
//! The URL helpers at the bottom derive the `<ws|wss>://host/ws` endpoint
//! from the REST base URL and validate endpoints before a handshake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::constants::WS_PATH;
use crate::error::ConnectionError;
use crate::transport::{Connector, Duplex, Frame, FrameSink, FrameSource};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => tungstenite::Message::Text(text),
            Frame::Binary(data) => tungstenite::Message::Binary(data),
            Frame::Ping(data) => tungstenite::Message::Ping(data),
            Frame::Pong(data) => tungstenite::Message::Pong(data),
            Frame::Close { code, reason } => {
                tungstenite::Message::Close(Some(tungstenite::protocol::CloseFrame {
                    code: code.into(),
                    reason: reason.into(),
                }))
            }
        };
        self.sink.send(message).await.context("WebSocket send failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(Frame::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(Frame::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(Frame::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(Frame::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(Frame::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    // Raw frames, skip
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// Builds an HTTP request from `url`, inserts each `(name, value)` header,
/// then performs the WebSocket handshake. Returns split (writer, reader)
/// halves for independent use by the writer slot and the receive loop.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are malformed,
/// or the WebSocket handshake fails.
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, headers: &[(&str, &str)]) -> Result<Duplex> {
        let (writer, reader) = connect(url, headers).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Build the WebSocket endpoint from a REST base URL.
///
/// Maps the scheme and appends `/ws`, tolerating a trailing slash on the
/// base. `https://api.example.com/` becomes `wss://api.example.com/ws`.
#[must_use]
pub fn build_ws_url(base_url: &str) -> String {
    let ws = http_to_ws_scheme(base_url.trim());
    format!("{}{}", ws.trim_end_matches('/'), WS_PATH)
}

/// Check that `url` is a usable WebSocket endpoint.
///
/// Requires a `ws` or `wss` scheme and a host.
///
/// # Errors
///
/// Returns [`ConnectionError::InvalidEndpoint`] describing the problem.
pub fn validate_endpoint(url: &str) -> Result<(), ConnectionError> {
    let uri: tungstenite::http::Uri = url
        .parse()
        .map_err(|e| ConnectionError::InvalidEndpoint(format!("{url}: {e}")))?;

    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        Some(other) => {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "{url}: unsupported scheme '{other}'"
            )))
        }
        None => {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "{url}: missing scheme"
            )))
        }
    }

    match uri.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ConnectionError::InvalidEndpoint(format!(
            "{url}: missing host"
        ))),
    }
}
