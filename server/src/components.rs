//! Component records and the `Meta` participation bitset.
//!
//! Each component is a plain record; presence per entity is independent. The
//! `Meta` bitset is the authoritative answer to "does this entity participate
//! in component X during the tick" -- systems gate on `Meta`, not on whether a
//! value happens to exist in a store.

use crate::entity::EntityId;
use crate::vector::Vec2;
use shared::{MovementType, PlayerInput};
use std::ops::BitOr;

/// Bitset of the components an entity logically has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta(u32);

impl Meta {
    pub const NONE: Meta = Meta(0);
    pub const META: Meta = Meta(1 << 0);
    pub const POSITION: Meta = Meta(1 << 1);
    pub const DIRECTION: Meta = Meta(1 << 2);
    pub const MOVEMENT_SPEED: Meta = Meta(1 << 3);
    pub const ROTATION_SPEED: Meta = Meta(1 << 4);
    pub const HITBOX: Meta = Meta(1 << 5);
    pub const HEALTH: Meta = Meta(1 << 6);
    pub const COLLIDER: Meta = Meta(1 << 7);
    pub const VIEW_IDS: Meta = Meta(1 << 8);
    pub const VERTICAL_BODY: Meta = Meta(1 << 9);
    pub const INPUT: Meta = Meta(1 << 10);
    pub const PRE_POSITION: Meta = Meta(1 << 11);

    /// True when every bit of `mask` is set.
    pub fn has(self, mask: Meta) -> bool {
        self.0 & mask.0 == mask.0
    }

    pub fn with(self, mask: Meta) -> Meta {
        Meta(self.0 | mask.0)
    }

    pub fn without(self, mask: Meta) -> Meta {
        Meta(self.0 & !mask.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Meta {
    type Output = Meta;
    fn bitor(self, rhs: Meta) -> Meta {
        self.with(rhs)
    }
}

/// Components every player entity participates in.
pub const PLAYER_META: Meta = Meta(
    Meta::META.0
        | Meta::POSITION.0
        | Meta::DIRECTION.0
        | Meta::MOVEMENT_SPEED.0
        | Meta::ROTATION_SPEED.0
        | Meta::HITBOX.0
        | Meta::HEALTH.0
        | Meta::VIEW_IDS.0
        | Meta::INPUT.0
        | Meta::PRE_POSITION.0,
);

/// Components every static wall entity participates in.
pub const WALL_META: Meta =
    Meta(Meta::META.0 | Meta::POSITION.0 | Meta::VERTICAL_BODY.0 | Meta::COLLIDER.0);

/// Spatial-grid layers used to filter queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerMask(u16);

impl LayerMask {
    pub const NONE: LayerMask = LayerMask(0);
    pub const PLAYER: LayerMask = LayerMask(1 << 0);
    pub const STATIC: LayerMask = LayerMask(1 << 1);
    pub const LIGHT: LayerMask = LayerMask(1 << 2);

    /// True when any bit of `layer` is set.
    pub fn has(self, layer: LayerMask) -> bool {
        self.0 & layer.0 != 0
    }

    pub fn with(self, layer: LayerMask) -> LayerMask {
        LayerMask(self.0 | layer.0)
    }

    pub fn without(self, layer: LayerMask) -> LayerMask {
        LayerMask(self.0 & !layer.0)
    }
}

pub const DEFAULT_WALL_HEIGHT: f64 = 3.0;
pub const DEFAULT_WALL_BASE_ELEVATION: f64 = 0.0;

/// Player collision circle. The center is tracked in world space and follows
/// the entity's position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hitbox {
    pub center: Vec2,
    pub radius: f64,
}

impl Hitbox {
    /// AABB covering the circle, used for grid indexing and queries.
    pub fn bounds(&self) -> crate::grid::Bounds {
        crate::grid::Bounds {
            min_x: self.center.x - self.radius,
            min_y: self.center.y - self.radius,
            max_x: self.center.x + self.radius,
            max_y: self.center.y + self.radius,
        }
    }
}

/// Shape discriminator for static colliders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColliderShape {
    #[default]
    None,
    Circle,
    Box,
}

impl ColliderShape {
    /// Wire representation (`shape_type` field of `static_data`).
    pub fn as_u8(self) -> u8 {
        match self {
            ColliderShape::None => 0,
            ColliderShape::Circle => 1,
            ColliderShape::Box => 2,
        }
    }
}

/// Static obstacle shape. Box colliders use `center`/`half_size`; circle
/// colliders use `center`/`radius`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Collider {
    pub shape: ColliderShape,
    pub center: Vec2,
    pub half_size: Vec2,
    pub radius: f64,
}

impl Collider {
    /// Axis-aligned bounding box of the shape.
    pub fn bounding_box(&self) -> (Vec2, Vec2) {
        match self.shape {
            ColliderShape::Box => (
                Vec2::new(self.center.x - self.half_size.x, self.center.y - self.half_size.y),
                Vec2::new(self.center.x + self.half_size.x, self.center.y + self.half_size.y),
            ),
            ColliderShape::Circle => (
                Vec2::new(self.center.x - self.radius, self.center.y - self.radius),
                Vec2::new(self.center.x + self.radius, self.center.y + self.radius),
            ),
            ColliderShape::None => (Vec2::ZERO, Vec2::ZERO),
        }
    }
}

/// Vertical extent of an entity, used by view and occlusion queries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VerticalBody {
    pub base_elevation: f64,
    pub height: f64,
}

/// Latest player intent, consumed by systems each tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Input {
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

impl From<PlayerInput> for Input {
    fn from(wire: PlayerInput) -> Self {
        Self {
            move_vertical: wire.move_vertical,
            move_horizontal: wire.move_horizontal,
            look_horizontal: wire.look_horizontal,
            movement_type: wire.movement_type,
            fire: wire.fire,
            switch_weapon: wire.switch_weapon,
            reload: wire.reload,
            fast_reload: wire.fast_reload,
            timestamp: wire.timestamp,
        }
    }
}

/// Entities currently visible to this entity.
pub type ViewIds = Vec<EntityId>;

/// The spatial-grid cells that currently reference this entity, plus the
/// layer its entries were inserted with. Kept so removal is O(cells).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GridCells {
    pub cells: Vec<usize>,
    pub layer: LayerMask,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_has_requires_all_bits() {
        let m = Meta::POSITION | Meta::DIRECTION;
        assert!(m.has(Meta::POSITION));
        assert!(m.has(Meta::POSITION | Meta::DIRECTION));
        assert!(!m.has(Meta::POSITION | Meta::INPUT));
    }

    #[test]
    fn meta_with_and_without() {
        let m = Meta::NONE.with(Meta::HEALTH);
        assert!(m.has(Meta::HEALTH));
        assert!(m.without(Meta::HEALTH).is_empty());
    }

    #[test]
    fn player_meta_covers_movement_requirements() {
        let required = Meta::INPUT
            | Meta::POSITION
            | Meta::DIRECTION
            | Meta::MOVEMENT_SPEED
            | Meta::ROTATION_SPEED
            | Meta::HITBOX;
        assert!(PLAYER_META.has(required));
        assert!(!WALL_META.has(Meta::INPUT));
    }

    #[test]
    fn layer_mask_has_is_any_bit() {
        let m = LayerMask::PLAYER.with(LayerMask::LIGHT);
        assert!(m.has(LayerMask::PLAYER));
        assert!(m.has(LayerMask::PLAYER.with(LayerMask::STATIC)));
        assert!(!m.has(LayerMask::STATIC));
    }

    #[test]
    fn box_collider_bounding_box() {
        let c = Collider {
            shape: ColliderShape::Box,
            center: Vec2::new(20.0, 10.0),
            half_size: Vec2::new(5.0, 5.0),
            radius: 0.0,
        };
        let (min, max) = c.bounding_box();
        assert_eq!(min, Vec2::new(15.0, 5.0));
        assert_eq!(max, Vec2::new(25.0, 15.0));
    }

    #[test]
    fn circle_collider_bounding_box() {
        let c = Collider {
            shape: ColliderShape::Circle,
            center: Vec2::new(1.0, 2.0),
            half_size: Vec2::ZERO,
            radius: 3.0,
        };
        let (min, max) = c.bounding_box();
        assert_eq!(min, Vec2::new(-2.0, -1.0));
        assert_eq!(max, Vec2::new(4.0, 5.0));
    }

    #[test]
    fn input_from_wire_preserves_fields() {
        let wire = PlayerInput {
            move_vertical: 1.0,
            move_horizontal: -1.0,
            look_horizontal: 0.5,
            movement_type: MovementType::Relative,
            fire: true,
            timestamp: 99,
            ..Default::default()
        };
        let input = Input::from(wire);
        assert_eq!(input.move_vertical, 1.0);
        assert_eq!(input.movement_type, MovementType::Relative);
        assert!(input.fire);
        assert_eq!(input.timestamp, 99);
    }
}
