//! The hub: top-level admission and control routing over all rooms.
//!
//! One hub owns the room map (a single default room in this design), the
//! session-aware client registry and a bounded control channel. Client
//! connections are dispatched here; control envelopes (`list_rooms`,
//! `request_join`) flow through the control loop while `player_input` is
//! routed straight to the room a session has joined.

use crate::client::{ClientHandle, Command, RequestKind};
use crate::map::{default_map, JsonMapLoader, MapConfig};
use crate::registry::{Admission, AdmissionError, ClientRegistry};
use crate::room::Room;
use crate::shutdown::ShutdownToken;
use crate::transport::{ConnectParams, FrameReader, FrameWriter};
use log::{error, info, warn};
use shared::{
    Codec, ErrorPayload, InvalidSessionPayload, JsonCodec, ListRoomsResponse, ResponseEnvelope,
    ResponseType, RoomInfo,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_ROOM_NAME: &str = "default_room";
/// Capacity of the hub control channel.
const CONTROL_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub tick_rate: u32,
    pub maps_directory: PathBuf,
    pub map_id: String,
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            maps_directory: PathBuf::from("./maps"),
            map_id: "office_floor_01".to_string(),
            session_ttl: Duration::from_secs(300),
            session_sweep_interval: Duration::from_secs(30),
        }
    }
}

pub struct Hub {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    clients: Arc<ClientRegistry>,
    control_tx: mpsc::Sender<Command>,
    control_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    codec: Arc<dyn Codec>,
    token: ShutdownToken,
    shutdown_done: AtomicBool,
}

impl Hub {
    /// Builds the hub with its default room and starts the session sweep.
    /// Call [`run`](Self::run) to process control traffic.
    pub fn new(parent: &ShutdownToken, config: HubConfig) -> Arc<Hub> {
        let token = parent.child();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let hub = Arc::new(Hub {
            rooms: RwLock::new(HashMap::new()),
            clients: Arc::new(ClientRegistry::new("session-")),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            codec: Arc::new(JsonCodec),
            token,
            shutdown_done: AtomicBool::new(false),
        });

        hub.initialize_default_room(&config);
        hub.spawn_session_sweeper(config.session_ttl, config.session_sweep_interval);
        hub
    }

    fn initialize_default_room(&self, config: &HubConfig) {
        let map = load_map_or_default(config);
        let room = match Room::spawn(&self.token, DEFAULT_ROOM_NAME, map, config.tick_rate) {
            Ok(room) => room,
            Err(e) => {
                error!("failed to create default room: {e}");
                return;
            }
        };

        // Fan room output to whichever live connection owns each session.
        let clients = Arc::clone(&self.clients);
        room.subscribe_updates(move |msg| {
            for session_id in &msg.to_sessions {
                let Some(client) = clients.get_by_session(session_id) else {
                    continue;
                };
                if let Err(e) = client.send(msg.envelope.clone()) {
                    warn!("failed to send to session {session_id}: {e}");
                }
            }
        });

        self.rooms
            .write()
            .expect("rooms lock poisoned")
            .insert(DEFAULT_ROOM_NAME.to_string(), room);
    }

    fn spawn_session_sweeper(&self, ttl: Duration, sweep_interval: Duration) {
        let clients = Arc::clone(&self.clients);
        let token = self.token.clone();
        let rooms = self.room_list();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for session_id in clients.cleanup_expired_sessions(ttl) {
                            for room in &rooms {
                                room.remove_player(&session_id);
                            }
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    /// Admission path for a new framed connection.
    ///
    /// Builds the client handle, wires control forwarding, applies the
    /// session rules, and on reconnection re-attaches input routing to the
    /// room the session had joined.
    pub async fn dispatch_connection<R, W>(
        &self,
        reader: R,
        writer: W,
        params: ConnectParams,
    ) -> Result<(), AdmissionError>
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let client = ClientHandle::spawn(
            self.token.child(),
            params.client_id.clone(),
            params.name.clone(),
            reader,
            writer,
            Arc::clone(&self.codec),
        );

        // Control envelopes go to the hub loop; player_input is attached to
        // a room at join time.
        let control_tx = self.control_tx.clone();
        client.subscribe(move |cmd: Command| {
            if matches!(cmd.kind, RequestKind::PlayerInput(_)) {
                return;
            }
            if control_tx.try_send(cmd).is_err() {
                warn!("hub control channel full, dropping command");
            }
        });

        let admission = match self.clients.add(Arc::clone(&client), &params.session_id) {
            Ok(admission) => admission,
            Err(err @ AdmissionError::SessionValidationFailed { .. }) => {
                if let Ok(envelope) = ResponseEnvelope::new(
                    ResponseType::ErrorInvalidSession,
                    &InvalidSessionPayload {
                        message: err.to_string(),
                    },
                ) {
                    let _ = client.send(envelope);
                }
                // Give the write pump a moment to flush before tearing down.
                tokio::time::sleep(Duration::from_millis(10)).await;
                client.close();
                return Err(err);
            }
            Err(err) => {
                client.close();
                return Err(err);
            }
        };

        info!(
            "client {} connected (session {}, reconnected: {})",
            client.id(),
            admission.session_id,
            admission.reconnected
        );

        self.restore_room_routing(&client, &admission);
        self.spawn_error_watcher(Arc::clone(&client));

        Ok(())
    }

    /// On reconnection, re-attach the new connection's inputs to the room
    /// the session is still registered in and resend the static data.
    fn restore_room_routing(&self, client: &Arc<ClientHandle>, admission: &Admission) {
        if !admission.reconnected {
            return;
        }
        for room in self.room_list() {
            if room.has_session(&admission.session_id) {
                attach_input_routing(client, &room);
                if let Err(e) = room.resend_static_data(admission.session_id.clone()) {
                    warn!("failed to resend static data: {e}");
                }
                info!(
                    "session {} re-attached to room {}",
                    admission.session_id,
                    room.id()
                );
            }
        }
    }

    fn spawn_error_watcher(&self, client: Arc<ClientHandle>) {
        let clients = Arc::clone(&self.clients);
        let Some(mut errors) = client.take_errors() else {
            return;
        };
        tokio::spawn(async move {
            if let Some(err) = errors.recv().await {
                warn!("client {} error: {err}", client.id());
            }
            // The session stays registered for reconnection until TTL.
            clients.remove(client.id());
            client.close();
            info!("client {} left, session kept for reconnection", client.id());
        });
    }

    /// Control loop: `list_rooms` and `request_join`. Runs until shutdown.
    pub async fn run(&self) {
        let Some(mut control_rx) = self
            .control_rx
            .lock()
            .expect("control receiver lock poisoned")
            .take()
        else {
            warn!("hub control loop already running");
            return;
        };

        info!("hub is running");
        loop {
            tokio::select! {
                cmd = control_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_control(cmd);
                }
                _ = self.token.cancelled() => break,
            }
        }
        info!("hub control loop stopped");
    }

    fn handle_control(&self, cmd: Command) {
        match cmd.kind {
            RequestKind::ListRooms => {
                let rooms: Vec<RoomInfo> = self
                    .rooms
                    .read()
                    .expect("rooms lock poisoned")
                    .iter()
                    .map(|(room_id, room)| RoomInfo {
                        room_id: room_id.clone(),
                        name: room.name().to_string(),
                        player_count: room.player_count(),
                        max_players: room.max_players(),
                    })
                    .collect();

                match ResponseEnvelope::new(
                    ResponseType::ListRoomsResponse,
                    &ListRoomsResponse { rooms },
                ) {
                    Ok(envelope) => self.reply(&cmd.client_id, envelope),
                    Err(e) => warn!("failed to encode room list: {e}"),
                }
            }
            RequestKind::RequestJoin(_payload) => {
                // Only the default room is joinable in this design; the
                // requested room id is accepted but not honoured.
                let envelope = match self.join_room(&cmd.client_id, DEFAULT_ROOM_NAME) {
                    Ok(()) => ResponseEnvelope {
                        envelope_type: ResponseType::JoinRoomSuccess,
                        payload: serde_json::json!({}),
                    },
                    Err(e) => {
                        warn!("join failed for client {}: {e}", cmd.client_id);
                        match ResponseEnvelope::new(
                            ResponseType::Error,
                            &ErrorPayload {
                                code: 500,
                                message: format!("failed to join room: {e}"),
                            },
                        ) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!("failed to encode join error: {e}");
                                return;
                            }
                        }
                    }
                };
                self.reply(&cmd.client_id, envelope);
            }
            RequestKind::PlayerInput(_) => {
                // Filtered before the control channel; nothing to do.
            }
            RequestKind::Unknown => {
                warn!(
                    "unhandled envelope type from client {}, ignoring",
                    cmd.client_id
                );
            }
        }
    }

    fn join_room(&self, client_id: &str, room_id: &str) -> Result<(), String> {
        let room = self
            .rooms
            .read()
            .expect("rooms lock poisoned")
            .get(room_id)
            .cloned()
            .ok_or_else(|| format!("room '{room_id}' not found"))?;

        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| format!("client '{client_id}' not found in registry"))?;

        let session_id = client.session_id();
        if session_id.is_empty() {
            return Err(format!("client '{client_id}' has no session"));
        }

        room.add_player(session_id)
            .map_err(|e| e.to_string())?;
        attach_input_routing(&client, &room);
        Ok(())
    }

    fn reply(&self, client_id: &str, envelope: ResponseEnvelope) {
        match self.clients.get(client_id) {
            Some(client) => {
                if let Err(e) = client.send(envelope) {
                    warn!("failed to reply to client {client_id}: {e}");
                }
            }
            None => warn!("client {client_id} not found for reply"),
        }
    }

    fn room_list(&self) -> Vec<Arc<Room>> {
        self.rooms
            .read()
            .expect("rooms lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Cooperative shutdown: close every client, clear the registry, stop
    /// every room. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("hub shutdown initiated");
        self.token.cancel();

        for client in self.clients.all() {
            client.close();
        }
        self.clients.clear();

        for room in self.room_list() {
            room.shutdown();
        }
        info!("hub shutdown complete");
    }
}

/// Subscribes a handler forwarding this client's `player_input` commands to
/// the room under its current session.
fn attach_input_routing(client: &Arc<ClientHandle>, room: &Arc<Room>) {
    let session_id = client.session_id();
    let room = Arc::clone(room);
    client.subscribe(move |cmd: Command| {
        if let RequestKind::PlayerInput(input) = cmd.kind {
            room.send_input(session_id.clone(), input);
        }
    });
}

fn load_map_or_default(config: &HubConfig) -> MapConfig {
    let loader = JsonMapLoader::new(config.maps_directory.clone());
    match loader.load_map(&config.map_id) {
        Ok(map) => map,
        Err(e) => {
            warn!(
                "failed to load map '{}': {e}, using built-in default map",
                config.map_id
            );
            default_map()
        }
    }
}
