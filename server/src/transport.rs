//! The framed-message transport boundary and its WebSocket adapter.
//!
//! The serving core only sees streams and sinks of byte frames; this module
//! defines those bounds and adapts WebSocket connections onto them. The
//! upgrade request carries the connection parameters in its query string:
//! `client_id` (required), `game_name`, `name` and `session_id` (optional).

use crate::hub::Hub;
use crate::shutdown::ShutdownToken;
use futures_util::{future, SinkExt, Sink, Stream, StreamExt};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// One framed transport message.
pub type Frame = Vec<u8>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(String),
}

/// Inbound half of a framed connection.
pub trait FrameReader:
    Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static
{
}
impl<T> FrameReader for T where
    T: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static
{
}

/// Outbound half of a framed connection.
pub trait FrameWriter: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}
impl<T> FrameWriter for T where T: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}

/// Connection parameters presented during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub client_id: String,
    pub game_name: String,
    pub name: String,
    pub session_id: String,
}

impl ConnectParams {
    /// Parses a query string, applying the protocol defaults. Fails only
    /// when `client_id` is missing.
    pub fn from_query(query: &str) -> Result<Self, TransportError> {
        let params = parse_query(query);

        let client_id = params
            .get("client_id")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| TransportError::Io("client_id is required".to_string()))?;

        let game_name = params
            .get("game_name")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| crate::hub::DEFAULT_ROOM_NAME.to_string());
        let name = params
            .get("name")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| client_id.clone());
        let session_id = params.get("session_id").cloned().unwrap_or_default();

        Ok(Self {
            client_id,
            game_name,
            name,
            session_id,
        })
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

/// Minimal percent decoding: `%XX` escapes and `+` as space.
fn percent_decode(raw: &str) -> String {
    fn hex_value(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(high), Some(low)) => {
                        out.push(high << 4 | low);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Accept loop: upgrades each TCP connection to WebSocket and hands it to
/// the hub. Runs until the token cancels or the listener fails.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, token: ShutdownToken) {
    info!("websocket listener started");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!("connection accepted from {addr}");
                        let hub = Arc::clone(&hub);
                        tokio::spawn(handle_connection(stream, hub));
                    }
                    Err(e) => {
                        error!("accept failed: {e}");
                        break;
                    }
                }
            }
            _ = token.cancelled() => break,
        }
    }
    info!("websocket listener stopped");
}

async fn handle_connection(stream: TcpStream, hub: Arc<Hub>) {
    let mut params: Option<Result<ConnectParams, TransportError>> = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let query = request.uri().query().unwrap_or("");
        params = Some(ConnectParams::from_query(query));
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket handshake failed: {e}");
            return;
        }
    };

    let params = match params {
        Some(Ok(params)) => params,
        Some(Err(e)) => {
            warn!("rejecting connection: {e}");
            return;
        }
        None => return,
    };

    let (sink, stream) = ws.split();

    let reader = stream.filter_map(|item| {
        future::ready(match item {
            Ok(Message::Binary(data)) => Some(Ok(data)),
            Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
            Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
            Ok(_) => None, // ping/pong are handled by the protocol layer
            Err(e) => Some(Err(TransportError::Io(e.to_string()))),
        })
    });
    let writer = sink
        .sink_map_err(|e| TransportError::Io(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<Message, TransportError>(Message::Binary(frame))));

    if let Err(e) = hub.dispatch_connection(reader, writer, params).await {
        warn!("connection rejected: {e}");
    }
}
