//! Deterministic Physics
//!
//! Integer-only physics for the lockstep simulation: gravity, friction,
//! velocity saturation, boundary clamping and AABB collision over a spatial
//! grid. The engine owns tuning and scratch space; the entity map itself is
//! owned by [`GameState`](crate::game::state::GameState) and borrowed for
//! each update.
//!
//! Determinism rules baked in here:
//! - entities are always visited in ascending id order (`BTreeMap`)
//! - the spatial grid is rebuilt from scratch every update, so its content
//!   never depends on motion history
//! - all arithmetic is widened integer math with arithmetic shifts

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::PhysicsConfig;
use crate::core::fixed::{fixed_clamp, Fixed, FIXED_MAX, FIXED_MIN, FRACTION_BITS};
use crate::game::entity::Entity;
use crate::game::input::PlayerInput;

/// Grid cell coordinate.
type Cell = (i64, i64);

/// Entity pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The id is already checked out.
    #[error("entity {0} already active")]
    AlreadyActive(u32),
}

/// Deterministic physics engine.
pub struct PhysicsEngine {
    gravity: Fixed,
    friction_q: Fixed,
    max_velocity: Fixed,
    world_width: Fixed,
    world_height: Fixed,
    cell_size: Fixed,
    /// Scratch: grid rebuilt each update, cell -> entity ids.
    spatial_grid: BTreeMap<Cell, Vec<u32>>,
    /// Colliding pairs found by the last update, (low id, high id).
    collision_pairs: Vec<(u32, u32)>,
}

impl PhysicsEngine {
    /// Create an engine from physics tuning.
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            gravity: config.gravity_fixed(),
            friction_q: config.friction_q(),
            max_velocity: config.max_velocity_fixed(),
            world_width: config.world_width_fixed(),
            world_height: config.world_height_fixed(),
            cell_size: config.grid_cell_size_fixed(),
            spatial_grid: BTreeMap::new(),
            collision_pairs: Vec::new(),
        }
    }

    /// World bounds in Q form, (width, height).
    pub fn world_bounds(&self) -> (Fixed, Fixed) {
        (self.world_width, self.world_height)
    }

    /// Pairs that collided during the last `update`.
    pub fn collision_pairs(&self) -> &[(u32, u32)] {
        &self.collision_pairs
    }

    /// Advance every entity by `dt_ms` milliseconds.
    ///
    /// Per entity, in ascending id order: gravity, velocity saturation,
    /// position integration, friction. Then boundary clamping, then
    /// collision detection and resolution. `dt <= 0` is a no-op.
    pub fn update(&mut self, entities: &mut BTreeMap<u32, Entity>, dt_ms: i32) {
        if dt_ms <= 0 {
            return;
        }

        for entity in entities.values_mut() {
            // Gravity
            let dv = ((self.gravity as i64 * dt_ms as i64) / 1000)
                .clamp(FIXED_MIN as i64, FIXED_MAX as i64) as Fixed;
            entity.vy = entity.vy.saturating_add(dv);

            // Velocity saturation
            entity.vx = fixed_clamp(entity.vx, -self.max_velocity, self.max_velocity);
            entity.vy = fixed_clamp(entity.vy, -self.max_velocity, self.max_velocity);

            // Position integration
            entity.update_position(dt_ms);

            // Friction, Q form: (vx * FRICTION_Q) >> B with an arithmetic
            // shift, so negative velocities decay identically on all peers
            entity.vx = ((entity.vx as i64 * self.friction_q as i64) >> FRACTION_BITS) as Fixed;
        }

        self.clamp_to_bounds(entities);
        self.detect_and_resolve(entities);
    }

    /// Snap entities back inside the world, zeroing velocity on the axis
    /// that hit the wall.
    fn clamp_to_bounds(&self, entities: &mut BTreeMap<u32, Entity>) {
        for entity in entities.values_mut() {
            if entity.x < 0 {
                entity.x = 0;
                entity.vx = 0;
            }
            if entity.x + entity.width > self.world_width {
                entity.x = self.world_width - entity.width;
                entity.vx = 0;
            }
            if entity.y < 0 {
                entity.y = 0;
                entity.vy = 0;
            }
            if entity.y + entity.height > self.world_height {
                entity.y = self.world_height - entity.height;
                entity.vy = 0;
            }
        }
    }

    /// Cell containing an entity's centre. Floor division keeps a negative
    /// centre in the correct cell.
    fn cell_of(&self, entity: &Entity) -> Cell {
        let cx = (entity.x as i64 + entity.width as i64 / 2).div_euclid(self.cell_size as i64);
        let cy = (entity.y as i64 + entity.height as i64 / 2).div_euclid(self.cell_size as i64);
        (cx, cy)
    }

    /// Rebuild the spatial grid from scratch.
    fn rebuild_grid(&mut self, entities: &BTreeMap<u32, Entity>) {
        self.spatial_grid.clear();
        for (id, entity) in entities {
            let cell = self.cell_of(entity);
            self.spatial_grid.entry(cell).or_default().push(*id);
        }
    }

    /// AABB overlap test on entity copies.
    #[inline]
    fn aabb_overlap(a: &Entity, b: &Entity) -> bool {
        a.x < b.x + b.width
            && a.x + a.width > b.x
            && a.y < b.y + b.height
            && a.y + a.height > b.y
    }

    /// Separate an overlapping pair along the shallow axis, half the
    /// overlap each (integer halving: both peers shift by the same amount),
    /// zeroing both velocities on that axis.
    fn resolve(a: &mut Entity, b: &mut Entity) {
        let overlap_x = (a.x + a.width - b.x).min(b.x + b.width - a.x);
        let overlap_y = (a.y + a.height - b.y).min(b.y + b.height - a.y);

        if overlap_x < overlap_y {
            let shift = overlap_x / 2;
            if a.x < b.x {
                a.x -= shift;
                b.x += shift;
            } else {
                a.x += shift;
                b.x -= shift;
            }
            a.vx = 0;
            b.vx = 0;
        } else {
            let shift = overlap_y / 2;
            if a.y < b.y {
                a.y -= shift;
                b.y += shift;
            } else {
                a.y += shift;
                b.y -= shift;
            }
            a.vy = 0;
            b.vy = 0;
        }
    }

    /// Find and resolve all colliding pairs.
    ///
    /// Candidates are pairs sharing a cell plus pairs across the four
    /// directional neighbours (-1,0), (0,-1), (-1,-1), (1,-1): that exact
    /// mask covers every adjacent pair exactly once over all iteration
    /// orders. A visited set keyed by the ordered id pair deduplicates.
    fn detect_and_resolve(&mut self, entities: &mut BTreeMap<u32, Entity>) {
        const NEIGHBOURS: [(i64, i64); 4] = [(-1, 0), (0, -1), (-1, -1), (1, -1)];

        self.collision_pairs.clear();
        self.rebuild_grid(entities);

        let mut checked: BTreeSet<(u32, u32)> = BTreeSet::new();
        let mut candidates: Vec<(u32, u32)> = Vec::new();

        for (&(cx, cy), ids) in &self.spatial_grid {
            // Pairs inside the cell
            for (i, &id1) in ids.iter().enumerate() {
                for &id2 in &ids[i + 1..] {
                    let pair = (id1.min(id2), id1.max(id2));
                    if checked.insert(pair) {
                        candidates.push(pair);
                    }
                }
            }

            // Pairs across the directional neighbour cells
            for (dx, dy) in NEIGHBOURS {
                let Some(neighbour_ids) = self.spatial_grid.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &id1 in ids {
                    for &id2 in neighbour_ids {
                        let pair = (id1.min(id2), id1.max(id2));
                        if checked.insert(pair) {
                            candidates.push(pair);
                        }
                    }
                }
            }
        }

        for (id1, id2) in candidates {
            let (Some(&e1), Some(&e2)) = (entities.get(&id1), entities.get(&id2)) else {
                continue;
            };
            if Self::aabb_overlap(&e1, &e2) {
                self.collision_pairs.push((id1, id2));
                let (mut a, mut b) = (e1, e2);
                Self::resolve(&mut a, &mut b);
                entities.insert(id1, a);
                entities.insert(id2, b);
            }
        }
    }

    /// Translate input flags into entity velocity.
    ///
    /// Velocity is reset each frame, then each held direction adds ±speed.
    /// Unknown entity ids are ignored.
    pub fn apply_input(
        &self,
        entities: &mut BTreeMap<u32, Entity>,
        entity_id: u32,
        flags: u8,
        speed: Fixed,
    ) {
        let Some(entity) = entities.get_mut(&entity_id) else {
            return;
        };

        let mut vx = 0;
        let mut vy = 0;
        if flags & PlayerInput::MOVE_LEFT != 0 {
            vx -= speed;
        }
        if flags & PlayerInput::MOVE_RIGHT != 0 {
            vx += speed;
        }
        if flags & PlayerInput::MOVE_UP != 0 {
            vy -= speed;
        }
        if flags & PlayerInput::MOVE_DOWN != 0 {
            vy += speed;
        }

        entity.vx = vx;
        entity.vy = vy;
    }
}

// =============================================================================
// ENTITY POOL
// =============================================================================

/// Capacity-bounded free list of entities.
///
/// `acquire`/`release` are O(1); the pool hands out reset entities and
/// refuses to hand the same id out twice.
pub struct EntityPool {
    pool: Vec<Entity>,
    active: BTreeSet<u32>,
}

impl EntityPool {
    /// Create a pool pre-filled with `initial_size` entities.
    pub fn new(initial_size: usize) -> Self {
        Self {
            pool: (0..initial_size as u32).map(|i| Entity::new(i, 0, 0)).collect(),
            active: BTreeSet::new(),
        }
    }

    /// Take an entity out of the pool under the given id.
    pub fn acquire(&mut self, entity_id: u32) -> Result<Entity, PoolError> {
        if self.active.contains(&entity_id) {
            return Err(PoolError::AlreadyActive(entity_id));
        }

        let mut entity = self.pool.pop().unwrap_or_else(|| Entity::new(entity_id, 0, 0));
        entity.id = entity_id;
        entity.reset();
        self.active.insert(entity_id);
        Ok(entity)
    }

    /// Return an entity to the pool. Unknown entities are ignored.
    pub fn release(&mut self, entity: Entity) {
        if self.active.remove(&entity.id) {
            self.pool.push(entity);
        }
    }

    /// Number of entities currently checked out.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of entities waiting in the pool.
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
