//! A room: one world, one tick loop, bounded queues in and out.
//!
//! The run loop is a single task selecting over join requests, inbound
//! inputs, the ticker and cancellation. Every enqueue toward it and away
//! from it is non-blocking with drop-on-full semantics, so the tick cadence
//! never depends on I/O. A separate response pump fans finished snapshots
//! out to subscribers, decoupling tick latency from delivery latency.

use crate::game::{Game, GameError};
use crate::map::MapConfig;
use crate::session::SessionRegistry;
use crate::shutdown::ShutdownToken;
use crate::subscription::SubscriptionManager;
use crate::utils::timestamp_ms;
use log::{error, info, warn};
use shared::{
    ErrorPayload, GameUpdatePayload, PlayerInfo, PlayerInput, ResponseEnvelope, ResponseType,
    StaticDataPayload,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Queue bounds. Dropping under load is the contract; the sim never waits.
pub const JOIN_QUEUE_CAPACITY: usize = 100;
pub const INPUT_QUEUE_CAPACITY: usize = 200;
pub const OUTGOING_QUEUE_CAPACITY: usize = 400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room {0} join queue is full")]
    JoinQueueFull(String),
}

/// A snapshot or notice addressed to specific sessions. An empty list means
/// broadcast.
#[derive(Debug, Clone)]
pub struct UpdateMessage {
    pub to_sessions: Vec<String>,
    pub envelope: ResponseEnvelope,
}

enum JoinRequest {
    NewPlayer { session_id: String },
    ResendStatic { session_id: String },
}

pub struct Room {
    id: String,
    name: String,
    sessions: Arc<SessionRegistry>,
    subscribers: Arc<SubscriptionManager<UpdateMessage>>,
    join_tx: mpsc::Sender<JoinRequest>,
    input_tx: mpsc::Sender<(String, PlayerInput)>,
    outgoing_tx: mpsc::Sender<UpdateMessage>,
    token: ShutdownToken,
}

impl Room {
    /// Builds the game from the map and spawns the run loop and response
    /// pump. The returned handle is shared between the hub and the loops.
    pub fn spawn(
        parent: &ShutdownToken,
        id: impl Into<String>,
        map: MapConfig,
        tick_rate: u32,
    ) -> Result<Arc<Room>, GameError> {
        let id = id.into();
        let name = map.name.clone();
        let game = Game::new(map)?;

        let (join_tx, join_rx) = mpsc::channel(JOIN_QUEUE_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_CAPACITY);

        let room = Arc::new(Room {
            id: id.clone(),
            name,
            sessions: Arc::new(SessionRegistry::new()),
            subscribers: Arc::new(SubscriptionManager::new(format!("room{id}-sub-"))),
            join_tx,
            input_tx,
            outgoing_tx,
            token: parent.child(),
        });

        tokio::spawn(response_pump(
            Arc::clone(&room.subscribers),
            outgoing_rx,
            room.token.clone(),
        ));
        tokio::spawn(run_loop(
            Arc::clone(&room),
            game,
            join_rx,
            input_rx,
            tick_rate,
        ));

        Ok(room)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `max_players` reported to clients; 0 means unbounded and no
    /// enforcement happens.
    pub fn max_players(&self) -> usize {
        0
    }

    pub fn player_count(&self) -> usize {
        self.sessions.count()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.entity_id(session_id).is_some()
    }

    /// Queues a join. The player is created at the next loop iteration and
    /// static data is pushed to the session implicitly.
    pub fn add_player(&self, session_id: impl Into<String>) -> Result<(), RoomError> {
        self.join_tx
            .try_send(JoinRequest::NewPlayer {
                session_id: session_id.into(),
            })
            .map_err(|_| RoomError::JoinQueueFull(self.id.clone()))
    }

    /// Queues a fresh static-data push, used when a session reconnects.
    pub fn resend_static_data(&self, session_id: impl Into<String>) -> Result<(), RoomError> {
        self.join_tx
            .try_send(JoinRequest::ResendStatic {
                session_id: session_id.into(),
            })
            .map_err(|_| RoomError::JoinQueueFull(self.id.clone()))
    }

    /// Routes an input toward the tick loop. Full queue drops with a
    /// warning; the sim continues.
    pub fn send_input(&self, session_id: impl Into<String>, input: PlayerInput) {
        let session_id = session_id.into();
        if self.input_tx.try_send((session_id, input)).is_err() {
            warn!("room {} input queue full, dropping input", self.id);
        }
    }

    /// Registers a handler for everything the room emits.
    pub fn subscribe_updates<F>(&self, handler: F) -> String
    where
        F: Fn(UpdateMessage) + Send + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Unbinds a session from its entity. The entity itself stays in the
    /// world; only the routing is removed.
    pub fn remove_player(&self, session_id: &str) {
        if let Some(entity_id) = self.sessions.entity_id(session_id) {
            self.sessions.unregister(session_id);
            info!(
                "player {entity_id} (session {session_id}) removed from room {}",
                self.id
            );
        }
    }

    /// Cancels the lifecycle token, clears sessions and subscriptions.
    /// Queued messages are dropped, not drained.
    pub fn shutdown(&self) {
        info!("room {} shutdown initiated", self.id);
        self.token.cancel();
        self.sessions.clear();
        self.subscribers.clear();
    }
}

async fn response_pump(
    subscribers: Arc<SubscriptionManager<UpdateMessage>>,
    mut outgoing_rx: mpsc::Receiver<UpdateMessage>,
    token: ShutdownToken,
) {
    loop {
        tokio::select! {
            msg = outgoing_rx.recv() => {
                let Some(msg) = msg else { break };
                subscribers.publish(msg);
            }
            _ = token.cancelled() => break,
        }
    }
}

async fn run_loop(
    room: Arc<Room>,
    mut game: Game,
    mut join_rx: mpsc::Receiver<JoinRequest>,
    mut input_rx: mpsc::Receiver<(String, PlayerInput)>,
    tick_rate: u32,
) {
    let dt = 1.0 / f64::from(tick_rate);
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("room {} started at {tick_rate} Hz", room.id);

    loop {
        tokio::select! {
            request = join_rx.recv() => {
                let Some(request) = request else { break };
                handle_join(&room, &mut game, request);
            }
            input = input_rx.recv() => {
                let Some((session_id, input)) = input else { break };
                match room.sessions.entity_id(&session_id) {
                    Some(entity_id) => game.set_player_input(entity_id, input),
                    // Unknown session: dropped silently, this is the grace
                    // window during reconnect handling.
                    None => {}
                }
            }
            _ = ticker.tick() => {
                // A panicking tick ends this room but not the server.
                let tick = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    game.update(dt);
                }));
                match tick {
                    Ok(()) => broadcast_game_update(&room, &game),
                    Err(panic) => {
                        error!("room {} tick panicked: {panic:?}, stopping room", room.id);
                        break;
                    }
                }
            }
            _ = room.token.cancelled() => break,
        }
    }

    info!("room {} stopped", room.id);
}

fn handle_join(room: &Arc<Room>, game: &mut Game, request: JoinRequest) {
    match request {
        JoinRequest::NewPlayer { session_id } => {
            if room.sessions.entity_id(&session_id).is_some() {
                warn!(
                    "session {session_id} already registered in room {}, resending static data",
                    room.id
                );
                send_static_data(room, game, &session_id);
                return;
            }

            match game.join_player() {
                Ok(entity_id) => {
                    room.sessions.register(session_id.clone(), entity_id);
                    info!(
                        "player {entity_id} joined room {} as session {session_id} ({} players)",
                        room.id,
                        room.player_count()
                    );
                    send_static_data(room, game, &session_id);
                }
                Err(e) => {
                    error!("failed to join session {session_id} to room {}: {e}", room.id);
                    let envelope = ResponseEnvelope::new(
                        ResponseType::Error,
                        &ErrorPayload {
                            code: 500,
                            message: format!("failed to join room: {e}"),
                        },
                    );
                    match envelope {
                        Ok(envelope) => push_outgoing(
                            room,
                            UpdateMessage {
                                to_sessions: vec![session_id],
                                envelope,
                            },
                        ),
                        Err(e) => error!("failed to encode error payload: {e}"),
                    }
                }
            }
        }
        JoinRequest::ResendStatic { session_id } => {
            send_static_data(room, game, &session_id);
        }
    }
}

fn send_static_data(room: &Arc<Room>, game: &Game, session_id: &str) {
    let statics = game.statics();
    let map_info = game.map_info();

    let colliders: Vec<shared::Collider> = statics
        .iter()
        .map(|entity| shared::Collider {
            id: entity.id.to_raw(),
            x: entity.collider.center.x,
            y: entity.collider.center.y,
            half_x: entity.collider.half_size.x,
            half_y: entity.collider.half_size.y,
            radius: entity.collider.radius,
            shape_type: entity.collider.shape.as_u8(),
            rotation: 0.0,
            height: entity.vertical_body.map_or(0.0, |v| v.height),
            base_elevation: entity.vertical_body.map_or(0.0, |v| v.base_elevation),
        })
        .collect();

    let envelope = match ResponseEnvelope::new(
        ResponseType::StaticData,
        &StaticDataPayload {
            colliders,
            map_width: map_info.width,
            map_height: map_info.height,
        },
    ) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("failed to encode static data: {e}");
            return;
        }
    };

    info!(
        "room {} sending static data ({} colliders) to session {session_id}",
        room.id,
        statics.len()
    );
    push_outgoing(
        room,
        UpdateMessage {
            to_sessions: vec![session_id.to_string()],
            envelope,
        },
    );
}

fn broadcast_game_update(room: &Arc<Room>, game: &Game) {
    for (entity_id, session_id) in room.sessions.pairs() {
        let Some(snapshot) = game.player_snapshot_with_view(entity_id) else {
            warn!(
                "no snapshot for entity {entity_id} (session {session_id}) in room {}",
                room.id
            );
            continue;
        };

        let views = snapshot
            .views
            .iter()
            .map(|view| PlayerInfo {
                id: view.id.to_raw(),
                x: view.position.x,
                y: view.position.y,
                dir: view.direction,
            })
            .collect();

        let envelope = match ResponseEnvelope::new(
            ResponseType::GameUpdate,
            &GameUpdatePayload {
                me: PlayerInfo {
                    id: snapshot.player.id.to_raw(),
                    x: snapshot.player.position.x,
                    y: snapshot.player.position.y,
                    dir: snapshot.player.direction,
                },
                views,
                timestamp: timestamp_ms(),
            },
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("failed to encode game update: {e}");
                continue;
            }
        };

        push_outgoing(
            room,
            UpdateMessage {
                to_sessions: vec![session_id],
                envelope,
            },
        );
    }
}

/// Non-blocking push to the outgoing queue; a full queue drops the snapshot
/// rather than stalling the tick.
fn push_outgoing(room: &Arc<Room>, msg: UpdateMessage) {
    if room.outgoing_tx.try_send(msg).is_err() {
        warn!("room {} outgoing queue full, dropping message", room.id);
    }
}
