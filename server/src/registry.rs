//! Session-aware registry of live clients.
//!
//! The registry enforces the admission rules: one live connection per
//! session, takeover for a matching `client_id`/`session_id` pair, fresh
//! sessions for empty ids, and rejection of unknown or mismatched session
//! ids. Removing a client preserves its session until the TTL sweep so the
//! same client can reconnect and adopt its old entity.

use crate::client::ClientHandle;
use crate::utils::{IdGenerator, SequentialIdGenerator};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("client {0} is already closed")]
    ClientClosed(String),
    #[error("client {0} already connected with a different session id")]
    DuplicateClient(String),
    #[error("session validation failed: session_id={session_id}, client_id={client_id}")]
    SessionValidationFailed {
        session_id: String,
        client_id: String,
    },
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub session_id: String,
    /// True when an existing session was adopted rather than created.
    pub reconnected: bool,
}

struct SessionInfo {
    session_id: String,
    client_id: String,
    client: Arc<ClientHandle>,
    last_seen: Instant,
}

#[derive(Default)]
struct RegistryMaps {
    /// client_id -> live client
    clients: HashMap<String, Arc<ClientHandle>>,
    /// session_id -> session (live or awaiting reconnection)
    sessions: HashMap<String, SessionInfo>,
    /// client_id -> session_id for live clients
    client_sessions: HashMap<String, String>,
}

pub struct ClientRegistry {
    maps: RwLock<RegistryMaps>,
    id_gen: SequentialIdGenerator,
}

impl ClientRegistry {
    pub fn new(session_prefix: impl Into<String>) -> Self {
        Self {
            maps: RwLock::new(RegistryMaps::default()),
            id_gen: SequentialIdGenerator::new(session_prefix),
        }
    }

    /// Admits a connection under the rules above. On success the assigned
    /// session id has been signalled to the client.
    pub fn add(
        &self,
        client: Arc<ClientHandle>,
        provided_session_id: &str,
    ) -> Result<Admission, AdmissionError> {
        if client.is_closed() {
            return Err(AdmissionError::ClientClosed(client.id().to_string()));
        }

        // A live connection under the same client id only yields to a
        // connection presenting the same session.
        let existing = self.get(client.id());
        if let Some(existing) = existing {
            if existing.session_id() != provided_session_id {
                return Err(AdmissionError::DuplicateClient(client.id().to_string()));
            }
            info!(
                "client {} replacing its live connection, closing the old one",
                client.id()
            );
            self.remove(existing.id());
            existing.close();
        }

        let admission = {
            let mut maps = self.maps.write().expect("client registry lock poisoned");

            let (session_id, reconnected) = if provided_session_id.is_empty() {
                let session_id = self.id_gen.generate_id();
                maps.sessions.insert(
                    session_id.clone(),
                    SessionInfo {
                        session_id: session_id.clone(),
                        client_id: client.id().to_string(),
                        client: Arc::clone(&client),
                        last_seen: Instant::now(),
                    },
                );
                (session_id, false)
            } else {
                match maps.sessions.get_mut(provided_session_id) {
                    Some(info) if info.client_id == client.id() => {
                        info.client.close();
                        info.client = Arc::clone(&client);
                        info.last_seen = Instant::now();
                        (info.session_id.clone(), true)
                    }
                    _ => {
                        return Err(AdmissionError::SessionValidationFailed {
                            session_id: provided_session_id.to_string(),
                            client_id: client.id().to_string(),
                        });
                    }
                }
            };

            maps.clients
                .insert(client.id().to_string(), Arc::clone(&client));
            maps.client_sessions
                .insert(client.id().to_string(), session_id.clone());

            Admission {
                session_id,
                reconnected,
            }
        };

        if client.set_session_id(admission.session_id.clone()).is_err() {
            // The connection is already going away; the error watcher will
            // clean up shortly.
            warn!(
                "failed to signal session {} to client {}",
                admission.session_id,
                client.id()
            );
        }

        Ok(admission)
    }

    /// Removes a client from the live set, keeping its session for the TTL
    /// window so reconnection stays possible.
    pub fn remove(&self, client_id: &str) {
        let mut maps = self.maps.write().expect("client registry lock poisoned");
        maps.clients.remove(client_id);
        if let Some(session_id) = maps.client_sessions.remove(client_id) {
            if let Some(info) = maps.sessions.get_mut(&session_id) {
                // TTL counts from disconnect.
                info.last_seen = Instant::now();
            }
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        self.maps
            .read()
            .expect("client registry lock poisoned")
            .clients
            .get(client_id)
            .cloned()
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<Arc<ClientHandle>> {
        self.maps
            .read()
            .expect("client registry lock poisoned")
            .sessions
            .get(session_id)
            .map(|info| Arc::clone(&info.client))
    }

    pub fn session_of(&self, client_id: &str) -> Option<String> {
        self.maps
            .read()
            .expect("client registry lock poisoned")
            .client_sessions
            .get(client_id)
            .cloned()
    }

    /// Whether a session exists (live or awaiting reconnection).
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.maps
            .read()
            .expect("client registry lock poisoned")
            .sessions
            .contains_key(session_id)
    }

    /// Removes sessions idle past the TTL and returns their ids. Sessions
    /// with a live connection are refreshed instead of reaped.
    pub fn cleanup_expired_sessions(&self, ttl: Duration) -> Vec<String> {
        let mut maps = self.maps.write().expect("client registry lock poisoned");
        let maps = &mut *maps;
        let now = Instant::now();

        let clients = &maps.clients;
        let mut expired = Vec::new();
        maps.sessions.retain(|session_id, info| {
            if clients.contains_key(&info.client_id) {
                info.last_seen = now;
                return true;
            }
            if now.duration_since(info.last_seen) > ttl {
                expired.push(session_id.clone());
                return false;
            }
            true
        });

        for session_id in &expired {
            info!("session {session_id} expired");
        }
        expired
    }

    pub fn all(&self) -> Vec<Arc<ClientHandle>> {
        self.maps
            .read()
            .expect("client registry lock poisoned")
            .clients
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.maps
            .read()
            .expect("client registry lock poisoned")
            .clients
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut maps = self.maps.write().expect("client registry lock poisoned");
        maps.clients.clear();
        maps.sessions.clear();
        maps.client_sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownToken;
    use crate::transport::{Frame, FrameReader, FrameWriter, TransportError};
    use futures::channel::mpsc as futures_mpsc;
    use futures_util::{future, SinkExt, StreamExt};
    use shared::JsonCodec;

    fn spawn_client(id: &str) -> (Arc<ClientHandle>, ShutdownToken) {
        let (_incoming_tx, incoming_rx) = futures_mpsc::channel::<Frame>(64);
        let (outgoing_tx, _outgoing_rx) = futures_mpsc::channel::<Frame>(64);

        let reader: Box<dyn FrameReader> =
            Box::new(incoming_rx.map(Ok::<Frame, TransportError>));
        let writer: Box<dyn FrameWriter> = Box::new(
            outgoing_tx
                .sink_map_err(|e| TransportError::Io(e.to_string()))
                .with(|frame: Frame| future::ready(Ok::<Frame, TransportError>(frame))),
        );

        let token = ShutdownToken::new();
        let handle = ClientHandle::spawn(
            token.child(),
            id,
            id,
            reader,
            writer,
            std::sync::Arc::new(JsonCodec),
        );
        (handle, token)
    }

    #[tokio::test]
    async fn empty_session_id_allocates_a_fresh_session() {
        let registry = ClientRegistry::new("session-");
        let (client, _t) = spawn_client("c1");

        let admission = registry.add(client.clone(), "").unwrap();
        assert!(!admission.reconnected);
        assert_eq!(admission.session_id, "session-1");
        assert_eq!(client.session_id(), "session-1");
        assert!(registry.get_by_session("session-1").is_some());
    }

    #[tokio::test]
    async fn disconnect_then_reconnect_adopts_the_session() {
        let registry = ClientRegistry::new("session-");
        let (first, _t1) = spawn_client("c1");
        let admission = registry.add(first.clone(), "").unwrap();

        // Transport drops; the client leaves the live set but the session
        // stays for the TTL window.
        registry.remove("c1");
        first.close();
        assert!(registry.get("c1").is_none());
        assert!(registry.session_exists(&admission.session_id));

        let (second, _t2) = spawn_client("c1");
        let readmission = registry.add(second.clone(), &admission.session_id).unwrap();
        assert!(readmission.reconnected);
        assert_eq!(readmission.session_id, admission.session_id);
        assert_eq!(
            registry.get_by_session(&admission.session_id).unwrap().id(),
            "c1"
        );
    }

    #[tokio::test]
    async fn foreign_session_id_is_rejected() {
        let registry = ClientRegistry::new("session-");
        let (owner, _t1) = spawn_client("c1");
        let admission = registry.add(owner, "").unwrap();
        registry.remove("c1");

        // A different client presents c1's session.
        let (intruder, _t2) = spawn_client("c2");
        let err = registry
            .add(intruder, &admission.session_id)
            .unwrap_err();
        assert!(matches!(err, AdmissionError::SessionValidationFailed { .. }));

        // The session is untouched.
        assert!(registry.session_exists(&admission.session_id));
    }

    #[tokio::test]
    async fn unknown_session_id_is_rejected() {
        let registry = ClientRegistry::new("session-");
        let (client, _t) = spawn_client("c1");
        let err = registry.add(client, "session-404").unwrap_err();
        assert!(matches!(err, AdmissionError::SessionValidationFailed { .. }));
    }

    #[tokio::test]
    async fn duplicate_live_client_with_other_session_is_rejected() {
        let registry = ClientRegistry::new("session-");
        let (first, _t1) = spawn_client("c1");
        registry.add(first, "").unwrap();

        let (second, _t2) = spawn_client("c1");
        let err = registry.add(second, "").unwrap_err();
        assert_eq!(err, AdmissionError::DuplicateClient("c1".to_string()));
    }

    #[tokio::test]
    async fn matching_takeover_closes_the_old_connection() {
        let registry = ClientRegistry::new("session-");
        let (first, _t1) = spawn_client("c1");
        let admission = registry.add(first.clone(), "").unwrap();

        let (second, _t2) = spawn_client("c1");
        let takeover = registry
            .add(second.clone(), &admission.session_id)
            .unwrap();

        assert!(takeover.reconnected);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(
            registry.get("c1").unwrap().session_id(),
            admission.session_id
        );
    }

    #[tokio::test]
    async fn closed_client_cannot_be_admitted() {
        let registry = ClientRegistry::new("session-");
        let (client, _t) = spawn_client("c1");
        client.close();
        let err = registry.add(client, "").unwrap_err();
        assert_eq!(err, AdmissionError::ClientClosed("c1".to_string()));
    }

    #[tokio::test]
    async fn sweep_reaps_only_idle_expired_sessions() {
        let registry = ClientRegistry::new("session-");
        let (live, _t1) = spawn_client("c1");
        registry.add(live, "").unwrap();

        let (gone, _t2) = spawn_client("c2");
        let admission = registry.add(gone.clone(), "").unwrap();
        registry.remove("c2");
        gone.close();

        // Nothing has expired with a generous TTL.
        assert!(registry.cleanup_expired_sessions(Duration::from_secs(300)).is_empty());
        tokio::time::sleep(Duration::from_millis(5)).await;

        // With a zero TTL the idle session is reaped, the live one stays.
        let expired = registry.cleanup_expired_sessions(Duration::ZERO);
        assert_eq!(expired, vec![admission.session_id.clone()]);
        assert!(!registry.session_exists(&admission.session_id));
        assert!(registry.session_of("c1").is_some());
    }
}
