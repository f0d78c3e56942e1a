//! # Shared Wire Protocol
//!
//! Everything the game client and server need to agree on: the envelope
//! framing, the payload schemas for every envelope tag, and the JSON codec
//! that turns envelopes into transport frames.
//!
//! Every transport message is a JSON document with exactly two fields:
//!
//! ```json
//! { "envelope_type": "player_input", "payload": { ... } }
//! ```
//!
//! The `envelope_type` tag selects the payload schema. Client-to-server tags
//! are [`RequestType`], server-to-client tags are [`ResponseType`]. Payloads
//! are kept as raw JSON values inside the envelope and parsed against the
//! schema the tag selects, so unknown tags can still be routed (and then
//! logged and ignored) without tearing down the connection.
//!
//! The server is authoritative: clients send intent (`player_input`) and
//! render whatever snapshots (`game_update`) arrive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Client-to-server envelope tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    PlayerInput,
    ListRooms,
    RequestJoin,
    /// Any tag this build does not understand. Routed to the hub, which logs
    /// and ignores it.
    #[serde(other)]
    Unknown,
}

/// Server-to-client envelope tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    GameUpdate,
    StaticData,
    SystemNotify,
    SystemSetSession,
    #[serde(rename = "error_invalid_session")]
    ErrorInvalidSession,
    ListRoomsResponse,
    Error,
    JoinRoomSuccess,
}

/// A framed client-to-server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub envelope_type: RequestType,
    #[serde(default)]
    pub payload: Value,
}

/// A framed server-to-client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub envelope_type: ResponseType,
    #[serde(default)]
    pub payload: Value,
}

impl ResponseEnvelope {
    /// Builds an envelope from a typed payload.
    pub fn new<T: Serialize>(envelope_type: ResponseType, payload: &T) -> Result<Self, CodecError> {
        Ok(Self {
            envelope_type,
            payload: serde_json::to_value(payload).map_err(CodecError::Encode)?,
        })
    }
}

/// How a `player_input` translation vector is interpreted.
///
/// Absolute input moves in world axes; relative input moves in the basis of
/// the player's current facing. On the wire this is the integer 0 or 1; any
/// other value falls back to absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MovementType {
    #[default]
    Absolute,
    Relative,
}

impl From<u8> for MovementType {
    fn from(raw: u8) -> Self {
        match raw {
            1 => MovementType::Relative,
            _ => MovementType::Absolute,
        }
    }
}

impl From<MovementType> for u8 {
    fn from(mt: MovementType) -> u8 {
        match mt {
            MovementType::Absolute => 0,
            MovementType::Relative => 1,
        }
    }
}

/// Payload of `player_input`.
///
/// Analog axes are clamped to [-1, 1] by the sender; the server samples the
/// most recent record at each tick. Field names are PascalCase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlayerInput {
    pub move_vertical: f64,
    pub move_horizontal: f64,
    pub look_horizontal: f64,
    pub movement_type: MovementType,
    pub fire: bool,
    pub switch_weapon: bool,
    pub reload: bool,
    pub fast_reload: bool,
    pub timestamp: i64,
}

/// Payload of `request_join`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestJoinPayload {
    pub room_id: String,
}

/// Payload of `system_set_session`, assigning or confirming a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSetSessionPayload {
    pub client_id: String,
    pub session_id: String,
}

/// Payload of `system_notify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotifyPayload {
    pub message: String,
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

/// Payload of `error_invalid_session`. The client should retry its connection
/// with an empty session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidSessionPayload {
    pub message: String,
}

/// One visible entity inside a `game_update`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub dir: f64,
}

/// Payload of `game_update`: the per-recipient snapshot for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameUpdatePayload {
    pub me: PlayerInfo,
    pub views: Vec<PlayerInfo>,
    /// Server wall-clock at snapshot time, unix milliseconds.
    pub timestamp: i64,
}

/// One static collider inside a `static_data` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub half_x: f64,
    pub half_y: f64,
    pub radius: f64,
    pub shape_type: u8,
    pub rotation: f64,
    pub height: f64,
    pub base_elevation: f64,
}

/// Payload of `static_data`, sent once when a player joins a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticDataPayload {
    pub colliders: Vec<Collider>,
    pub map_width: f64,
    pub map_height: f64,
}

/// One room inside a `list_rooms_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub name: String,
    pub player_count: usize,
    /// 0 means unbounded.
    pub max_players: usize,
}

/// Payload of `list_rooms_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRoomsResponse {
    pub rooms: Vec<RoomInfo>,
}

/// Encode/decode pair between envelopes and transport frames.
///
/// The serving core only sees this trait; the concrete wire format lives
/// behind it.
pub trait Codec: Send + Sync {
    fn encode_response(&self, envelope: &ResponseEnvelope) -> Result<Vec<u8>, CodecError>;
    fn decode_request(&self, data: &[u8]) -> Result<RequestEnvelope, CodecError>;
}

/// The production codec: one JSON document per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_response(&self, envelope: &ResponseEnvelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(CodecError::Encode)
    }

    fn decode_request(&self, data: &[u8]) -> Result<RequestEnvelope, CodecError> {
        serde_json::from_slice(data).map_err(CodecError::Decode)
    }
}
