//! Per-room session bookkeeping: which durable session drives which entity.

use crate::entity::EntityId;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct SessionMaps {
    session_to_entity: HashMap<String, EntityId>,
    entity_to_session: HashMap<EntityId, String>,
}

/// Bidirectional `session_id <-> entity_id` map.
///
/// Invariant: the two directions are mutual inverses after every operation.
/// Guarded by a readers-writer lock so the tick task and off-tick queries
/// can read concurrently.
pub struct SessionRegistry {
    maps: RwLock<SessionMaps>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(SessionMaps::default()),
        }
    }

    /// Binds a session to an entity, silently replacing any existing binding
    /// on either side so the inverse invariant holds.
    pub fn register(&self, session_id: impl Into<String>, entity_id: EntityId) {
        let session_id = session_id.into();
        let mut maps = self.maps.write().expect("session registry lock poisoned");

        if let Some(old_entity) = maps.session_to_entity.remove(&session_id) {
            maps.entity_to_session.remove(&old_entity);
        }
        if let Some(old_session) = maps.entity_to_session.remove(&entity_id) {
            maps.session_to_entity.remove(&old_session);
        }

        maps.session_to_entity.insert(session_id.clone(), entity_id);
        maps.entity_to_session.insert(entity_id, session_id);
    }

    pub fn unregister(&self, session_id: &str) {
        let mut maps = self.maps.write().expect("session registry lock poisoned");
        if let Some(entity_id) = maps.session_to_entity.remove(session_id) {
            maps.entity_to_session.remove(&entity_id);
        }
    }

    pub fn entity_id(&self, session_id: &str) -> Option<EntityId> {
        self.maps
            .read()
            .expect("session registry lock poisoned")
            .session_to_entity
            .get(session_id)
            .copied()
    }

    pub fn session_id(&self, entity_id: EntityId) -> Option<String> {
        self.maps
            .read()
            .expect("session registry lock poisoned")
            .entity_to_session
            .get(&entity_id)
            .cloned()
    }

    pub fn all_session_ids(&self) -> Vec<String> {
        self.maps
            .read()
            .expect("session registry lock poisoned")
            .session_to_entity
            .keys()
            .cloned()
            .collect()
    }

    /// Every `(entity_id, session_id)` pair, for snapshot fan-out.
    pub fn pairs(&self) -> Vec<(EntityId, String)> {
        self.maps
            .read()
            .expect("session registry lock poisoned")
            .entity_to_session
            .iter()
            .map(|(&entity, session)| (entity, session.clone()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.maps
            .read()
            .expect("session registry lock poisoned")
            .session_to_entity
            .len()
    }

    pub fn clear(&self) {
        let mut maps = self.maps.write().expect("session registry lock poisoned");
        maps.session_to_entity.clear();
        maps.entity_to_session.clear();
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
