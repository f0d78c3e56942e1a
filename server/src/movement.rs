//! Player movement and collision resolution.
//!
//! The only fully implemented system. Per tick it turns each player's latest
//! input into a proposed translation and rotation, resolves the proposed
//! position against static geometry, and stages the result as a command.
//! Separating propose-then-resolve keeps the world free of temporally
//! incoherent states mid-tick, and the preserved pre-position lets later
//! systems reason about the segment traversed this tick.

use crate::command::WorldCommand;
use crate::components::{Hitbox, Input, LayerMask, Meta};
use crate::grid::Bounds;
use crate::system::System;
use crate::vector::Vec2;
use crate::world::World;
use shared::MovementType;

pub struct MovementSystem;

impl MovementSystem {
    pub fn new() -> Self {
        Self
    }

    /// Proposed position from analog input. Screen coordinates: Y grows
    /// downward, angle 0 points up (-Y), positive angles turn clockwise.
    fn proposed_position(pos: Vec2, dir: f64, speed: f64, input: &Input, dt: f64) -> Vec2 {
        let (move_x, move_y) = match input.movement_type {
            MovementType::Relative => {
                let forward = input.move_vertical;
                let strafe = input.move_horizontal;

                let (sin_dir, cos_dir) = dir.sin_cos();
                let (fwd_x, fwd_y) = (sin_dir, -cos_dir);
                let (right_x, right_y) = (cos_dir, sin_dir);

                (
                    forward * fwd_x + strafe * right_x,
                    forward * fwd_y + strafe * right_y,
                )
            }
            MovementType::Absolute => (input.move_horizontal, input.move_vertical),
        };

        let mut movement = Vec2::new(move_x, move_y);
        if movement.x != 0.0 || movement.y != 0.0 {
            movement = movement.normalized().scale(speed * dt);
        }
        pos + movement
    }

    /// Positive look input rotates clockwise (toward +angle).
    fn proposed_direction(dir: f64, rotation_speed: f64, input: &Input, dt: f64) -> f64 {
        dir + input.look_horizontal * rotation_speed * dt
    }

    /// Pushes the player circle out of every overlapping static AABB, one
    /// pass, in cell iteration order.
    fn resolve_collisions(world: &World, proposed: Vec2, radius: f64) -> Vec2 {
        let mut result = proposed;

        let query = Bounds {
            min_x: result.x - radius,
            min_y: result.y - radius,
            max_x: result.x + radius,
            max_y: result.y + radius,
        };

        for (_, cell) in world.grid.cells_in_bounds(query) {
            for entry in &cell.entries {
                if !entry.layer.has(LayerMask::STATIC) {
                    continue;
                }
                let Some(collider) = world.collider.get(entry.entity) else {
                    continue;
                };
                let (min, max) = collider.bounding_box();
                if let Some(push_out) = circle_aabb_push_out(result, radius, min, max) {
                    result += push_out;
                }
            }
        }

        result
    }
}

impl Default for MovementSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for MovementSystem {
    fn read_meta(&self) -> Meta {
        Meta::INPUT
            | Meta::POSITION
            | Meta::DIRECTION
            | Meta::MOVEMENT_SPEED
            | Meta::ROTATION_SPEED
            | Meta::HITBOX
    }

    fn write_meta(&self) -> Meta {
        Meta::POSITION | Meta::DIRECTION | Meta::PRE_POSITION | Meta::HITBOX
    }

    fn update(&self, world: &World, dt: f64) {
        let required = self.read_meta();

        for (id, meta) in world.meta.iter() {
            if !meta.has(required) {
                continue;
            }

            let Some(input) = world.input.get(id) else {
                continue;
            };
            let Some(&speed) = world.movement_speed.get(id) else {
                continue;
            };
            let (Some(&pos), Some(&dir), Some(&rot_speed), Some(hitbox)) = (
                world.position.get(id),
                world.direction.get(id),
                world.rotation_speed.get(id),
                world.hitbox.get(id),
            ) else {
                continue;
            };

            let pre_position = pos;
            let new_pos = Self::resolve_collisions(
                world,
                Self::proposed_position(pos, dir, speed, input, dt),
                hitbox.radius,
            );
            let new_dir = Self::proposed_direction(dir, rot_speed, input, dt);

            let mut update_mask = Meta::PRE_POSITION;
            if new_pos != pos {
                update_mask = update_mask | Meta::POSITION;
            }
            if new_dir != dir {
                update_mask = update_mask | Meta::DIRECTION;
            }
            update_mask = update_mask | Meta::HITBOX;

            world.push(WorldCommand {
                entity: id,
                update_mask,
                position: new_pos,
                direction: new_dir,
                hitbox: Hitbox {
                    center: new_pos,
                    radius: hitbox.radius,
                },
                pre_position,
                ..Default::default()
            });
        }
    }
}

/// Push-out vector separating a circle from an AABB, or `None` when they do
/// not overlap.
///
/// Normal case: push along the contact normal by the penetration depth.
/// Degenerate case (center inside the box): push along the axis of
/// shallowest penetration by that distance plus the radius.
fn circle_aabb_push_out(center: Vec2, radius: f64, min: Vec2, max: Vec2) -> Option<Vec2> {
    let closest = Vec2::new(center.x.clamp(min.x, max.x), center.y.clamp(min.y, max.y));

    let diff = center - closest;
    let dist = diff.magnitude();

    if dist >= radius {
        return None;
    }

    if dist > 0.0 {
        let penetration = radius - dist;
        return Some(diff.normalized().scale(penetration));
    }

    // Center inside the AABB: find the nearest face.
    let to_left = center.x - min.x;
    let to_right = max.x - center.x;
    let to_top = center.y - min.y;
    let to_bottom = max.y - center.y;

    let mut nearest = to_left;
    let mut push_out = Vec2::new(-(to_left + radius), 0.0);

    if to_right < nearest {
        nearest = to_right;
        push_out = Vec2::new(to_right + radius, 0.0);
    }
    if to_top < nearest {
        nearest = to_top;
        push_out = Vec2::new(0.0, -(to_top + radius));
    }
    if to_bottom < nearest {
        push_out = Vec2::new(0.0, to_bottom + radius);
    }

    Some(push_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{PlayerSpawn, WallSpawn};
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::FRAC_PI_2;

    const DT: f64 = 1.0 / 60.0;

    fn world() -> World {
        let mut w = World::new(10.0, 10, 10);
        w.set_dimensions(100.0, 100.0);
        w
    }

    fn spawn_at(x: f64, y: f64) -> PlayerSpawn {
        PlayerSpawn {
            position: Vec2::new(x, y),
            direction: 0.0,
            movement_speed: 5.0,
            rotation_speed: 2.0,
            radius: 0.5,
            health: 100,
        }
    }

    fn step(world: &mut World, system: &MovementSystem) {
        system.update(world, DT);
        world.apply_commands();
    }

    #[test]
    fn absolute_input_moves_along_world_axes() {
        let mut w = world();
        let id = w.create_player(spawn_at(10.0, 10.0)).unwrap();
        w.set_input(
            id,
            Input {
                move_horizontal: 1.0,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        let pos = *w.position.get(id).unwrap();
        assert_approx_eq!(pos.x, 10.0 + 5.0 * DT, 1e-9);
        assert_approx_eq!(pos.y, 10.0, 1e-9);
    }

    #[test]
    fn relative_forward_follows_facing() {
        let mut w = world();
        let id = w.create_player(spawn_at(50.0, 50.0)).unwrap();
        w.direction.set(id, FRAC_PI_2);
        w.set_input(
            id,
            Input {
                move_vertical: 1.0,
                movement_type: MovementType::Relative,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        // Facing pi/2: forward basis is (sin, -cos) = (1, 0).
        let pos = *w.position.get(id).unwrap();
        assert_approx_eq!(pos.x - 50.0, 5.0 * DT, 1e-9);
        assert_approx_eq!(pos.y - 50.0, 0.0, 1e-9);
    }

    #[test]
    fn diagonal_input_is_normalized() {
        let mut w = world();
        let id = w.create_player(spawn_at(50.0, 50.0)).unwrap();
        w.set_input(
            id,
            Input {
                move_horizontal: 1.0,
                move_vertical: 1.0,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        let pos = *w.position.get(id).unwrap();
        let moved = (pos - Vec2::new(50.0, 50.0)).magnitude();
        assert_approx_eq!(moved, 5.0 * DT, 1e-9);
    }

    #[test]
    fn positive_look_rotates_toward_positive_angle() {
        let mut w = world();
        let id = w.create_player(spawn_at(50.0, 50.0)).unwrap();
        w.set_input(
            id,
            Input {
                look_horizontal: 1.0,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        assert_approx_eq!(*w.direction.get(id).unwrap(), 2.0 * DT, 1e-9);
    }

    #[test]
    fn pre_position_records_start_of_tick() {
        let mut w = world();
        let id = w.create_player(spawn_at(10.0, 10.0)).unwrap();
        w.set_input(
            id,
            Input {
                move_horizontal: 1.0,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        assert_eq!(*w.pre_position.get(id).unwrap(), Vec2::new(10.0, 10.0));
        assert!(w.position.get(id).unwrap().x > 10.0);
    }

    #[test]
    fn idle_entity_still_commits_pre_position_and_hitbox() {
        let mut w = world();
        let id = w.create_player(spawn_at(10.0, 10.0)).unwrap();
        w.set_input(id, Input::default());
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        assert_eq!(*w.pre_position.get(id).unwrap(), Vec2::new(10.0, 10.0));
        assert_eq!(*w.position.get(id).unwrap(), Vec2::new(10.0, 10.0));
        assert_eq!(w.hitbox.get(id).unwrap().center, Vec2::new(10.0, 10.0));
    }

    #[test]
    fn entity_without_input_meta_is_skipped() {
        let mut w = world();
        let wall = w
            .create_wall(WallSpawn {
                center: Vec2::new(30.0, 30.0),
                half_size: Vec2::new(1.0, 1.0),
                rotation: 0.0,
                height: 3.0,
                base_elevation: 0.0,
            })
            .unwrap();

        let system = MovementSystem::new();
        step(&mut w, &system);

        assert!(w.pre_position.get(wall).is_none());
    }

    #[test]
    fn wall_blocks_movement() {
        let mut w = world();
        // Wall spanning x in [15, 25], y in [5, 15].
        w.create_wall(WallSpawn {
            center: Vec2::new(20.0, 10.0),
            half_size: Vec2::new(5.0, 5.0),
            rotation: 0.0,
            height: 3.0,
            base_elevation: 0.0,
        })
        .unwrap();
        let id = w.create_player(spawn_at(10.0, 10.0)).unwrap();
        w.set_input(
            id,
            Input {
                move_horizontal: 1.0,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        for _ in 0..180 {
            step(&mut w, &system);
        }

        let pos = *w.position.get(id).unwrap();
        // Pushed out to the wall's left edge minus the player radius.
        assert!(pos.x <= 15.0 - 0.5 + 1e-6, "final x = {}", pos.x);
        assert_approx_eq!(pos.y, 10.0, 1e-6);
    }

    #[test]
    fn hitbox_no_longer_overlaps_wall_after_resolution() {
        let mut w = world();
        w.create_wall(WallSpawn {
            center: Vec2::new(20.0, 10.0),
            half_size: Vec2::new(5.0, 5.0),
            rotation: 0.0,
            height: 3.0,
            base_elevation: 0.0,
        })
        .unwrap();
        let id = w.create_player(spawn_at(14.4, 10.0)).unwrap();
        w.set_input(
            id,
            Input {
                move_horizontal: 1.0,
                ..Default::default()
            },
        );
        w.sync_input_buffer();

        let system = MovementSystem::new();
        step(&mut w, &system);

        let pos = *w.position.get(id).unwrap();
        let closest_x = pos.x.clamp(15.0, 25.0);
        let closest_y = pos.y.clamp(5.0, 15.0);
        let dist = (Vec2::new(closest_x, closest_y) - pos).magnitude();
        assert!(dist >= 0.5 - 1e-9, "circle still overlaps: dist = {dist}");
    }

    #[test]
    fn push_out_normal_case() {
        // Circle just left of a box, overlapping by 0.2.
        let push = circle_aabb_push_out(
            Vec2::new(9.7, 5.0),
            0.5,
            Vec2::new(10.0, 0.0),
            Vec2::new(20.0, 10.0),
        )
        .unwrap();
        assert_approx_eq!(push.x, -0.2, 1e-9);
        assert_approx_eq!(push.y, 0.0, 1e-9);
    }

    #[test]
    fn push_out_center_inside_picks_shallowest_axis() {
        // Center inside, nearest to the left face.
        let push = circle_aabb_push_out(
            Vec2::new(10.5, 5.0),
            0.5,
            Vec2::new(10.0, 0.0),
            Vec2::new(20.0, 10.0),
        )
        .unwrap();
        assert_approx_eq!(push.x, -(0.5 + 0.5), 1e-9);
        assert_approx_eq!(push.y, 0.0, 1e-9);
    }

    #[test]
    fn push_out_none_when_separated() {
        assert!(circle_aabb_push_out(
            Vec2::new(0.0, 0.0),
            0.5,
            Vec2::new(10.0, 10.0),
            Vec2::new(20.0, 20.0),
        )
        .is_none());
    }
}
