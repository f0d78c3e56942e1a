//! The game facade: one map loaded into one world, plus the registered
//! systems and the tick entry point the room drives.

use crate::components::Input;
use crate::entity::EntityId;
use crate::map::MapConfig;
use crate::movement::MovementSystem;
use crate::system::SystemRegistry;
use crate::vector::Vec2;
use crate::world::{PlayerSnapshotWithView, PlayerSpawn, StaticEntity, WallSpawn, World};
use log::info;
use shared::PlayerInput;
use thiserror::Error;

pub const DEFAULT_PLAYER_MOVEMENT_SPEED: f64 = 5.0;
pub const DEFAULT_PLAYER_ROTATION_SPEED: f64 = 2.0;
pub const DEFAULT_PLAYER_RADIUS: f64 = 0.5;
pub const DEFAULT_PLAYER_HEALTH: i32 = 100;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("invalid map: {0}")]
    InvalidMap(String),
    #[error("no spawn point available")]
    NoSpawnPoint,
    #[error("entity budget exhausted")]
    WorldFull,
}

/// Width and height of the playable area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapInfo {
    pub width: f64,
    pub height: f64,
}

pub struct Game {
    world: World,
    map: MapConfig,
    systems: SystemRegistry,
}

impl Game {
    /// Builds the world from a map configuration and registers the simulation
    /// systems. Wall entities are created up front.
    pub fn new(map: MapConfig) -> Result<Self, GameError> {
        map.validate()
            .map_err(|err| GameError::InvalidMap(err.to_string()))?;

        let grid_width = (map.dimensions.x / map.grid_size) as usize;
        let grid_height = (map.dimensions.y / map.grid_size) as usize;

        let mut world = World::new(map.grid_size, grid_width, grid_height);
        world.set_dimensions(map.dimensions.x, map.dimensions.y);

        let mut systems = SystemRegistry::new();
        systems.register(Box::new(MovementSystem::new()));

        let mut game = Self {
            world,
            map,
            systems,
        };
        game.load_map_entities()?;
        Ok(game)
    }

    fn load_map_entities(&mut self) -> Result<(), GameError> {
        for wall in self.map.walls.clone() {
            self.world
                .create_wall(WallSpawn {
                    center: wall.center,
                    half_size: wall.half_size,
                    rotation: wall.rotation,
                    height: wall.height,
                    base_elevation: wall.base_elevation,
                })
                .ok_or(GameError::WorldFull)?;
        }
        info!(
            "loaded map '{}': {} walls, {}x{}",
            self.map.id,
            self.map.walls.len(),
            self.map.dimensions.x,
            self.map.dimensions.y
        );
        Ok(())
    }

    /// Creates a player entity at the map's spawn point.
    pub fn join_player(&mut self) -> Result<EntityId, GameError> {
        let spawn = self
            .map
            .first_spawn_point()
            .ok_or(GameError::NoSpawnPoint)?
            .position;

        self.world
            .create_player(PlayerSpawn {
                position: Vec2::new(spawn.x, spawn.y),
                direction: 0.0,
                movement_speed: DEFAULT_PLAYER_MOVEMENT_SPEED,
                rotation_speed: DEFAULT_PLAYER_ROTATION_SPEED,
                radius: DEFAULT_PLAYER_RADIUS,
                health: DEFAULT_PLAYER_HEALTH,
            })
            .ok_or(GameError::WorldFull)
    }

    /// One simulation tick: latest inputs into components, systems in
    /// registration order, then the deferred command batch.
    pub fn update(&mut self, dt: f64) {
        self.world.sync_input_buffer();
        self.systems.update(&self.world, dt);
        self.world.apply_commands();
    }

    /// Overwrites the entity's input slot with the latest wire record.
    pub fn set_player_input(&mut self, entity: EntityId, input: PlayerInput) {
        self.world.set_input(entity, Input::from(input));
    }

    pub fn player_snapshot_with_view(&self, entity: EntityId) -> Option<PlayerSnapshotWithView> {
        self.world.player_snapshot_with_view(entity)
    }

    pub fn statics(&self) -> Vec<StaticEntity> {
        self.world.static_entities()
    }

    pub fn map_info(&self) -> MapInfo {
        MapInfo {
            width: self.world.width(),
            height: self.world.height(),
        }
    }

    #[cfg(test)]
    pub(crate) fn world(&self) -> &World {
        &self.world
    }
}
