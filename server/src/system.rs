//! Per-tick systems.
//!
//! A system declares the component sets it reads and writes and stages all
//! of its writes through the world's command buffer; it never mutates
//! components directly. Systems run in registration order.

use crate::components::Meta;
use crate::world::World;

pub trait System: Send {
    /// Components an entity must participate in for this system to touch it.
    fn read_meta(&self) -> Meta;
    /// Components this system stages writes for.
    fn write_meta(&self) -> Meta;
    fn update(&self, world: &World, dt: f64);
}

/// Ordered collection of registered systems.
#[derive(Default)]
pub struct SystemRegistry {
    systems: Vec<Box<dyn System>>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
        }
    }

    pub fn register(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    /// Runs every system in registration order.
    pub fn update(&self, world: &World, dt: f64) {
        for system in &self.systems {
            system.update(world, dt);
        }
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}
