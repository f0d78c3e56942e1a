//! Deferred world mutations.
//!
//! Systems never write components directly; they stage a [`WorldCommand`]
//! describing the write, and the world applies the whole batch between
//! ticks. The buffer is internally synchronized so systems may one day run
//! on multiple threads without changing the contract.

use crate::components::{Collider, Hitbox, Input, Meta, VerticalBody};
use crate::entity::EntityId;
use crate::vector::Vec2;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A staged mutation of one entity.
///
/// `update_mask` selects which fields are meaningful; everything else is
/// ignored on apply. The mask uses the same bits as [`Meta`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldCommand {
    pub entity: EntityId,
    pub update_mask: Meta,

    pub meta: Meta,
    pub position: Vec2,
    pub direction: f64,
    pub movement_speed: f64,
    pub rotation_speed: f64,
    pub hitbox: Hitbox,
    pub health: i32,
    pub collider: Collider,
    pub vertical_body: VerticalBody,
    pub input: Input,
    pub pre_position: Vec2,
}

/// FIFO of staged commands. Pushes may come from any thread; the sole
/// consumer is the world's apply pass at the tick boundary.
pub struct CommandBuffer {
    queue: Mutex<VecDeque<WorldCommand>>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }

    pub fn push(&self, cmd: WorldCommand) {
        self.queue
            .lock()
            .expect("command buffer lock poisoned")
            .push_back(cmd);
    }

    pub fn pop(&self) -> Option<WorldCommand> {
        self.queue
            .lock()
            .expect("command buffer lock poisoned")
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("command buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.queue
            .lock()
            .expect("command buffer lock poisoned")
            .clear();
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cmd(index: u32) -> WorldCommand {
        WorldCommand {
            entity: EntityId::new(index, 0),
            update_mask: Meta::POSITION,
            position: Vec2::new(index as f64, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn pop_order_matches_push_order() {
        let buf = CommandBuffer::new();
        for i in 0..10 {
            buf.push(cmd(i));
        }
        for i in 0..10 {
            let c = buf.pop().unwrap();
            assert_eq!(c.entity.index(), i as usize);
        }
        assert!(buf.pop().is_none());
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let buf = CommandBuffer::new();
        assert!(buf.pop().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn len_and_clear() {
        let buf = CommandBuffer::new();
        buf.push(cmd(1));
        buf.push(cmd(2));
        assert_eq!(buf.len(), 2);
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let buf = Arc::new(CommandBuffer::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let buf = Arc::clone(&buf);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    buf.push(cmd(t * 100 + i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.len(), 400);
    }
}
