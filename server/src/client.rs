//! Per-connection client handle.
//!
//! A handle owns two background pumps: the read pump decodes incoming
//! frames into typed commands and fans them out to subscriptions, and the
//! write pump encodes queued response envelopes and writes them. Both exit
//! when the handle's token cancels or the connection errors. `send` never
//! blocks the caller -- the room's tick loop sits upstream of it.

use crate::subscription::SubscriptionManager;
use crate::shutdown::ShutdownToken;
use crate::transport::{FrameReader, FrameWriter};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use shared::{
    Codec, PlayerInput, RequestJoinPayload, RequestType, ResponseEnvelope, ResponseType,
    SystemSetSessionPayload,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the per-client outbound response queue.
pub const RESPONSE_QUEUE_CAPACITY: usize = 100;
/// Capacity of the error channel; only the first report matters.
const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Send outcomes. `NotServing` is the backpressure signal: the queue is
/// full and the message was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("client connection is closed")]
    Closed,
    #[error("client is not serving, response queue full")]
    NotServing,
}

/// A decoded request from one client.
#[derive(Debug, Clone)]
pub struct Command {
    pub client_id: String,
    pub kind: RequestKind,
    pub received_at: Instant,
}

/// The request payload, parsed against the schema its envelope tag selects.
#[derive(Debug, Clone)]
pub enum RequestKind {
    PlayerInput(PlayerInput),
    ListRooms,
    RequestJoin(RequestJoinPayload),
    /// Unrecognized tag; the hub logs and ignores these.
    Unknown,
}

pub struct ClientHandle {
    id: String,
    name: String,
    session_id: RwLock<String>,
    response_tx: mpsc::Sender<ResponseEnvelope>,
    subscriptions: SubscriptionManager<Command>,
    token: ShutdownToken,
    errors: Mutex<Option<mpsc::Receiver<String>>>,
}

impl ClientHandle {
    /// Builds the handle and spawns its read and write pumps on the given
    /// transport halves.
    pub fn spawn<R, W>(
        token: ShutdownToken,
        id: impl Into<String>,
        name: impl Into<String>,
        reader: R,
        writer: W,
        codec: Arc<dyn Codec>,
    ) -> Arc<ClientHandle>
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let id = id.into();
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let handle = Arc::new(ClientHandle {
            id: id.clone(),
            name: name.into(),
            session_id: RwLock::new(String::new()),
            response_tx,
            subscriptions: SubscriptionManager::new(format!("c{id}-sub-")),
            token: token.clone(),
            errors: Mutex::new(Some(error_rx)),
        });

        tokio::spawn(read_pump(
            Arc::clone(&handle),
            reader,
            Arc::clone(&codec),
            error_tx.clone(),
        ));
        tokio::spawn(write_pump(
            token,
            id,
            writer,
            response_rx,
            codec,
            error_tx,
        ));

        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .expect("session id lock poisoned")
            .clone()
    }

    /// Stores the session id and signals it to the client.
    pub fn set_session_id(&self, session_id: impl Into<String>) -> Result<(), SendError> {
        let session_id = session_id.into();
        *self.session_id.write().expect("session id lock poisoned") = session_id.clone();

        let envelope = match ResponseEnvelope::new(
            ResponseType::SystemSetSession,
            &SystemSetSessionPayload {
                client_id: self.id.clone(),
                session_id,
            },
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("failed to encode session payload for client {}: {e}", self.id);
                return Ok(());
            }
        };
        self.send(envelope)
    }

    /// Non-blocking enqueue onto the response queue.
    pub fn send(&self, envelope: ResponseEnvelope) -> Result<(), SendError> {
        if self.token.is_cancelled() {
            return Err(SendError::Closed);
        }
        match self.response_tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::NotServing),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Registers a handler invoked for every decoded command. The returned
    /// subscription id is process-unique per client.
    pub fn subscribe<F>(&self, handler: F) -> String
    where
        F: Fn(Command) + Send + 'static,
    {
        self.subscriptions.subscribe(handler)
    }

    pub fn unsubscribe(&self, subscription_id: &str) {
        self.subscriptions.unsubscribe(subscription_id);
    }

    /// The error channel; the first receiver to take it owns it.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<String>> {
        self.errors.lock().expect("error channel lock poisoned").take()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Idempotent: cancels the lifecycle token (which stops both pumps and
    /// closes the connection) and removes all subscriptions.
    pub fn close(&self) {
        self.token.cancel();
        self.subscriptions.clear();
    }
}

fn report_error(error_tx: &mpsc::Sender<String>, message: String) {
    // Only the first error matters; drop the rest instead of blocking.
    let _ = error_tx.try_send(message);
}

async fn read_pump<R: FrameReader>(
    handle: Arc<ClientHandle>,
    mut reader: R,
    codec: Arc<dyn Codec>,
    error_tx: mpsc::Sender<String>,
) {
    loop {
        let frame = tokio::select! {
            frame = reader.next() => frame,
            _ = handle.token.cancelled() => break,
        };

        let data = match frame {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                report_error(&error_tx, format!("read pump error: {e}"));
                break;
            }
            None => {
                report_error(&error_tx, "read pump error: connection closed".to_string());
                break;
            }
        };

        // A peer that sends undecodable frames is not trusted further.
        let envelope = match codec.decode_request(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                report_error(&error_tx, format!("read pump decoding error: {e}"));
                break;
            }
        };

        let kind = match envelope.envelope_type {
            RequestType::PlayerInput => {
                match serde_json::from_value::<PlayerInput>(envelope.payload) {
                    Ok(input) => RequestKind::PlayerInput(input),
                    Err(e) => {
                        report_error(&error_tx, format!("read pump decoding error: {e}"));
                        break;
                    }
                }
            }
            RequestType::ListRooms => RequestKind::ListRooms,
            RequestType::RequestJoin => {
                match serde_json::from_value::<RequestJoinPayload>(envelope.payload) {
                    Ok(payload) => RequestKind::RequestJoin(payload),
                    Err(e) => {
                        report_error(&error_tx, format!("read pump decoding error: {e}"));
                        break;
                    }
                }
            }
            RequestType::Unknown => RequestKind::Unknown,
        };

        handle.subscriptions.publish(Command {
            client_id: handle.id.clone(),
            kind,
            received_at: Instant::now(),
        });
    }
    debug!("read pump for client {} exited", handle.id);
}

async fn write_pump<W: FrameWriter>(
    token: ShutdownToken,
    client_id: String,
    mut writer: W,
    mut response_rx: mpsc::Receiver<ResponseEnvelope>,
    codec: Arc<dyn Codec>,
    error_tx: mpsc::Sender<String>,
) {
    loop {
        let envelope = tokio::select! {
            envelope = response_rx.recv() => envelope,
            _ = token.cancelled() => break,
        };
        let Some(envelope) = envelope else { break };

        let data = match codec.encode_response(&envelope) {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to encode message for client {client_id}: {e}");
                continue;
            }
        };

        if let Err(e) = writer.send(data).await {
            report_error(&error_tx, format!("write pump error: {e}"));
            break;
        }
    }
    let _ = writer.close().await;
    debug!("write pump for client {client_id} exited");
}
