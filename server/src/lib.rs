//! # Authoritative Game Server
//!
//! The server core of a real-time multiplayer survival game. It accepts
//! many concurrent framed connections, binds each to a durable session and
//! an in-game entity inside a room, aggregates inputs on a fixed simulation
//! tick, advances a deterministic ECS world, and fans per-recipient
//! snapshots back out.
//!
//! ## Layers
//!
//! The simulation half is an ECS:
//!
//! - [`entity`] -- generational entity handles and their manager
//! - [`component`] -- dense component stores with sparse indices
//! - [`components`] -- the component schema and the `Meta` bitset
//! - [`grid`] -- the uniform spatial grid
//! - [`command`] -- the deferred command buffer
//! - [`world`] -- the aggregate of all of the above
//! - [`system`] / [`movement`] -- per-tick systems; movement is the only
//!   fully implemented one
//! - [`game`] -- map loading, player spawn, the tick entry point
//!
//! The serving half wires connections to rooms:
//!
//! - [`client`] -- per-connection handle with read/write pumps
//! - [`registry`] -- session-aware admission and reconnection
//! - [`session`] -- per-room session-to-entity binding
//! - [`room`] -- the tick loop and snapshot fan-out
//! - [`hub`] -- admission and control routing over all rooms
//! - [`transport`] -- the framed-connection boundary and WebSocket adapter
//!
//! ## Concurrency model
//!
//! One task per room tick loop, one per room response pump, a read and a
//! write pump per client, one delivery task per subscription, plus the hub
//! control loop and session sweeper. Every queue between them is bounded
//! and every producer-side send is non-blocking: under load messages are
//! dropped with a warning rather than stalling the simulation. Shutdown is
//! cooperative through a tree of [`shutdown::ShutdownToken`]s.

pub mod client;
pub mod command;
pub mod component;
pub mod components;
pub mod entity;
pub mod game;
pub mod grid;
pub mod hub;
pub mod map;
pub mod movement;
pub mod registry;
pub mod room;
pub mod session;
pub mod shutdown;
pub mod subscription;
pub mod system;
pub mod transport;
pub mod utils;
pub mod vector;
pub mod world;
