//! The world: entity manager, component stores, spatial grid, input buffer
//! and command buffer under one roof.
//!
//! The world is a single-writer resource. Only its room's tick task mutates
//! it -- systems stage writes through the command buffer and the apply pass
//! at the tick boundary is the sole mutation path. Synchronous spawn helpers
//! exist for the cases where the caller needs the new `EntityId` right away;
//! they still route the component writes through the command buffer and
//! apply immediately.

use crate::command::{CommandBuffer, WorldCommand};
use crate::component::ComponentStore;
use crate::components::{
    Collider, ColliderShape, GridCells, Hitbox, Input, LayerMask, Meta, VerticalBody, ViewIds,
    DEFAULT_WALL_HEIGHT, PLAYER_META, WALL_META,
};
use crate::entity::{EntityId, EntityManager};
use crate::grid::SpatialGrid;
use crate::vector::Vec2;
use log::debug;
use std::collections::HashMap;

/// Initial values for a player entity.
#[derive(Debug, Clone, Copy)]
pub struct PlayerSpawn {
    pub position: Vec2,
    pub direction: f64,
    pub movement_speed: f64,
    pub rotation_speed: f64,
    pub radius: f64,
    pub health: i32,
}

/// Initial values for a static wall entity.
#[derive(Debug, Clone, Copy)]
pub struct WallSpawn {
    pub center: Vec2,
    pub half_size: Vec2,
    pub rotation: f64,
    pub height: f64,
    pub base_elevation: f64,
}

/// Position and facing of one live player, as sent to clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    pub id: EntityId,
    pub position: Vec2,
    pub direction: f64,
}

/// A player snapshot plus the snapshots of everything in its view.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshotWithView {
    pub player: PlayerSnapshot,
    pub views: Vec<PlayerSnapshot>,
}

/// One static collider for the one-shot static broadcast.
#[derive(Debug, Clone, Copy)]
pub struct StaticEntity {
    pub id: EntityId,
    pub collider: Collider,
    pub vertical_body: Option<VerticalBody>,
}

pub struct World {
    pub entities: EntityManager,

    pub meta: ComponentStore<Meta>,
    pub position: ComponentStore<Vec2>,
    pub pre_position: ComponentStore<Vec2>,
    pub direction: ComponentStore<f64>,
    pub movement_speed: ComponentStore<f64>,
    pub rotation_speed: ComponentStore<f64>,
    pub hitbox: ComponentStore<Hitbox>,
    pub health: ComponentStore<i32>,
    pub collider: ComponentStore<Collider>,
    pub vertical_body: ComponentStore<VerticalBody>,
    pub input: ComponentStore<Input>,
    pub view_ids: ComponentStore<ViewIds>,
    pub grid_cells: ComponentStore<GridCells>,

    pub grid: SpatialGrid,

    /// Latest input per entity since the last tick; overwritten on arrival.
    input_slots: HashMap<EntityId, Input>,
    commands: CommandBuffer,

    width: f64,
    height: f64,
}

impl World {
    pub fn new(cell_size: f64, grid_width: usize, grid_height: usize) -> Self {
        Self {
            entities: EntityManager::new(),
            meta: ComponentStore::new(),
            position: ComponentStore::new(),
            pre_position: ComponentStore::new(),
            direction: ComponentStore::new(),
            movement_speed: ComponentStore::new(),
            rotation_speed: ComponentStore::new(),
            hitbox: ComponentStore::new(),
            health: ComponentStore::new(),
            collider: ComponentStore::new(),
            vertical_body: ComponentStore::new(),
            input: ComponentStore::new(),
            view_ids: ComponentStore::new(),
            grid_cells: ComponentStore::new(),
            grid: SpatialGrid::new(cell_size, grid_width, grid_height),
            input_slots: HashMap::new(),
            commands: CommandBuffer::new(),
            width: 0.0,
            height: 0.0,
        }
    }

    pub fn set_dimensions(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Stages a deferred mutation.
    pub fn push(&self, cmd: WorldCommand) {
        self.commands.push(cmd);
    }

    /// Allocates a player with all player components, applied immediately,
    /// and indexes it in the grid on the player layer. Returns `None` when
    /// the entity budget is exhausted.
    pub fn create_player(&mut self, spawn: PlayerSpawn) -> Option<EntityId> {
        let id = self.entities.alloc()?;
        debug!("allocated player entity {id}");

        self.push(WorldCommand {
            entity: id,
            update_mask: Meta::META
                | Meta::POSITION
                | Meta::DIRECTION
                | Meta::MOVEMENT_SPEED
                | Meta::ROTATION_SPEED
                | Meta::HITBOX
                | Meta::HEALTH,
            meta: PLAYER_META,
            position: spawn.position,
            direction: spawn.direction,
            movement_speed: spawn.movement_speed,
            rotation_speed: spawn.rotation_speed,
            hitbox: Hitbox {
                center: spawn.position,
                radius: spawn.radius,
            },
            health: spawn.health,
            ..Default::default()
        });
        self.apply_commands();

        self.view_ids.add(id, ViewIds::new());

        let bounds = Hitbox {
            center: spawn.position,
            radius: spawn.radius,
        }
        .bounds();
        let cells = self.grid.add(id, bounds, LayerMask::PLAYER);
        self.grid_cells.add(
            id,
            GridCells {
                cells,
                layer: LayerMask::PLAYER,
            },
        );

        Some(id)
    }

    /// Allocates a static wall, applied immediately, and indexes it in the
    /// grid on the static layer.
    pub fn create_wall(&mut self, spawn: WallSpawn) -> Option<EntityId> {
        let id = self.entities.alloc()?;

        let collider = Collider {
            shape: ColliderShape::Box,
            center: spawn.center,
            half_size: spawn.half_size,
            radius: 0.0,
        };
        let height = if spawn.height == 0.0 {
            DEFAULT_WALL_HEIGHT
        } else {
            spawn.height
        };

        self.push(WorldCommand {
            entity: id,
            update_mask: Meta::META | Meta::POSITION | Meta::COLLIDER | Meta::VERTICAL_BODY,
            meta: WALL_META,
            position: spawn.center,
            collider,
            vertical_body: VerticalBody {
                base_elevation: spawn.base_elevation,
                height,
            },
            ..Default::default()
        });
        self.apply_commands();

        let (min, max) = collider.bounding_box();
        let cells = self.grid.add(
            id,
            crate::grid::Bounds {
                min_x: min.x,
                min_y: min.y,
                max_x: max.x,
                max_y: max.y,
            },
            LayerMask::STATIC,
        );
        self.grid_cells.add(
            id,
            GridCells {
                cells,
                layer: LayerMask::STATIC,
            },
        );

        Some(id)
    }

    /// Overwrites the entity's input slot. Inputs are a current intent, not
    /// a queue; the latest record wins.
    pub fn set_input(&mut self, id: EntityId, input: Input) {
        self.input_slots.insert(id, input);
    }

    /// Copies every live input slot into the entity's Input component via
    /// the command buffer and applies, so systems running this tick observe
    /// the freshest intent. Slots for dead entities are dropped.
    pub fn sync_input_buffer(&mut self) {
        let entities = &self.entities;
        self.input_slots.retain(|&id, _| entities.is_alive(id));

        for (&id, &input) in &self.input_slots {
            self.commands.push(WorldCommand {
                entity: id,
                update_mask: Meta::INPUT,
                input,
                ..Default::default()
            });
        }
        self.apply_commands();
    }

    /// Drains the command buffer, applying each command to its entity if it
    /// is still alive. Field application order is fixed so reads within one
    /// command batch are deterministic: meta, position, direction, movement
    /// speed, rotation speed, hitbox, health, collider, vertical body,
    /// input, pre-position.
    pub fn apply_commands(&mut self) {
        while let Some(cmd) = self.commands.pop() {
            let id = cmd.entity;
            if !self.entities.is_alive(id) {
                debug!("skipping command for dead entity {id}");
                continue;
            }

            let mask = cmd.update_mask;
            if mask.has(Meta::META) {
                let merged = self
                    .meta
                    .get(id)
                    .copied()
                    .unwrap_or(Meta::NONE)
                    .with(cmd.meta);
                self.meta.upsert(id, merged);
            }
            if mask.has(Meta::POSITION) {
                self.position.upsert(id, cmd.position);
            }
            if mask.has(Meta::DIRECTION) {
                self.direction.upsert(id, cmd.direction);
            }
            if mask.has(Meta::MOVEMENT_SPEED) {
                self.movement_speed.upsert(id, cmd.movement_speed);
            }
            if mask.has(Meta::ROTATION_SPEED) {
                self.rotation_speed.upsert(id, cmd.rotation_speed);
            }
            if mask.has(Meta::HITBOX) {
                self.hitbox.upsert(id, cmd.hitbox);
            }
            if mask.has(Meta::HEALTH) {
                self.health.upsert(id, cmd.health);
            }
            if mask.has(Meta::COLLIDER) {
                self.collider.upsert(id, cmd.collider);
            }
            if mask.has(Meta::VERTICAL_BODY) {
                self.vertical_body.upsert(id, cmd.vertical_body);
            }
            if mask.has(Meta::INPUT) {
                self.input.upsert(id, cmd.input);
            }
            if mask.has(Meta::PRE_POSITION) {
                self.pre_position.upsert(id, cmd.pre_position);
            }

            if mask.has(Meta::POSITION) {
                self.reindex_in_grid(id);
            }
        }
    }

    /// Re-establishes the grid invariant after a position change: every cell
    /// entry must still overlap the entity's bounds.
    fn reindex_in_grid(&mut self, id: EntityId) {
        let Some(tracked) = self.grid_cells.get(id).cloned() else {
            return;
        };
        let Some(hitbox) = self.hitbox.get(id).copied() else {
            return;
        };

        self.grid.remove(&tracked.cells, id);
        let cells = self.grid.add(id, hitbox.bounds(), tracked.layer);
        self.grid_cells.set(
            id,
            GridCells {
                cells,
                layer: tracked.layer,
            },
        );
    }

    /// `{id, position, direction}` of a live player.
    pub fn player_snapshot(&self, id: EntityId) -> Option<PlayerSnapshot> {
        if !self.entities.is_alive(id) {
            return None;
        }
        let meta = self.meta.get(id).copied()?;

        let mut snapshot = PlayerSnapshot {
            id,
            position: Vec2::ZERO,
            direction: 0.0,
        };
        if meta.has(Meta::POSITION) {
            snapshot.position = self.position.get(id).copied().unwrap_or(Vec2::ZERO);
        }
        if meta.has(Meta::DIRECTION) {
            snapshot.direction = self.direction.get(id).copied().unwrap_or(0.0);
        }
        Some(snapshot)
    }

    /// Player snapshot plus the snapshots of everything in its view list.
    /// Missing views are skipped, not reported as errors.
    pub fn player_snapshot_with_view(&self, id: EntityId) -> Option<PlayerSnapshotWithView> {
        let player = self.player_snapshot(id)?;

        let views = match self.view_ids.get(id) {
            Some(view_ids) => view_ids
                .iter()
                .filter_map(|&view_id| self.player_snapshot(view_id))
                .collect(),
            None => Vec::new(),
        };

        Some(PlayerSnapshotWithView { player, views })
    }

    /// Enumerates every collider for the one-shot static broadcast.
    pub fn static_entities(&self) -> Vec<StaticEntity> {
        self.collider
            .iter()
            .map(|(id, collider)| StaticEntity {
                id,
                collider: *collider,
                vertical_body: self.vertical_body.get(id).copied(),
            })
            .collect()
    }
}
