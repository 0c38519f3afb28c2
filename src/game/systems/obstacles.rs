//! Obstacle field: procedural generation, collision primitives and destruction
//!
//! Obstacles are center-anchored rectangles. The field keeps them in a spatial
//! grid so circle and segment tests only touch local candidates.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game::constants::{arena, obstacle};
use crate::game::spatial::{Aabb, SpatialGrid};
use crate::util::vec2::Vec2;

/// Unique identifier for obstacles
pub type ObstacleId = u32;

/// Parallel-segment threshold for the line-line test
const PARALLEL_EPSILON: f32 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleKind {
    Wall,
    Box,
    Rock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub center: Vec2,
    pub width: f32,
    pub height: f32,
    pub kind: ObstacleKind,
    pub destructible: bool,
    pub health: Option<f32>,
}

impl Obstacle {
    pub fn bounds(&self) -> Aabb {
        Aabb::new(
            self.center.x - self.width / 2.0,
            self.center.y - self.height / 2.0,
            self.width,
            self.height,
        )
    }

    /// Point on (or in) the rectangle nearest to `point`
    pub fn closest_point(&self, point: Vec2) -> Vec2 {
        let half = Vec2::new(self.width / 2.0, self.height / 2.0);
        point.clamp(self.center - half, self.center + half)
    }

    /// Circle-vs-rectangle overlap (strict)
    pub fn intersects_circle(&self, point: Vec2, radius: f32) -> bool {
        point.distance_sq_to(self.closest_point(point)) < radius * radius
    }

    /// True when segment `a`-`b` crosses any of the four edges
    pub fn intersects_segment(&self, a: Vec2, b: Vec2) -> bool {
        let b_box = self.bounds();
        let top_left = Vec2::new(b_box.x, b_box.y);
        let top_right = Vec2::new(b_box.x + b_box.width, b_box.y);
        let bottom_right = Vec2::new(b_box.x + b_box.width, b_box.y + b_box.height);
        let bottom_left = Vec2::new(b_box.x, b_box.y + b_box.height);

        segments_intersect(a, b, top_left, top_right)
            || segments_intersect(a, b, top_right, bottom_right)
            || segments_intersect(a, b, bottom_right, bottom_left)
            || segments_intersect(a, b, bottom_left, top_left)
    }

    /// Vector that moves a circle at `point` out of this rectangle
    pub fn pushback(&self, point: Vec2, radius: f32) -> Vec2 {
        let closest = self.closest_point(point);
        let offset = point - closest;
        let distance = offset.length();

        if distance == 0.0 {
            // Center is inside the rectangle: push away from its middle
            let from_center = (point - self.center).normalize();
            if from_center == Vec2::ZERO {
                return Vec2::new(0.0, -radius);
            }
            return from_center * radius;
        }

        offset * ((radius - distance) / distance)
    }
}

/// Segment-segment intersection, endpoints inclusive
pub fn segments_intersect(p1: Vec2, p2: Vec2, p3: Vec2, p4: Vec2) -> bool {
    let denom = (p1.x - p2.x) * (p3.y - p4.y) - (p1.y - p2.y) * (p3.x - p4.x);
    if denom.abs() < PARALLEL_EPSILON {
        return false;
    }

    let t = ((p1.x - p3.x) * (p3.y - p4.y) - (p1.y - p3.y) * (p3.x - p4.x)) / denom;
    let u = -((p1.x - p2.x) * (p1.y - p3.y) - (p1.y - p2.y) * (p1.x - p3.x)) / denom;

    (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
}

/// All obstacles in the arena plus their spatial index
pub struct ObstacleField {
    obstacles: BTreeMap<ObstacleId, Obstacle>,
    index: SpatialGrid<ObstacleId>,
    next_id: ObstacleId,
}

impl ObstacleField {
    /// Field with no obstacles at all
    pub fn empty() -> Self {
        Self {
            obstacles: BTreeMap::new(),
            index: SpatialGrid::new(obstacle::GRID_CELL_SIZE),
            next_id: 0,
        }
    }

    /// Procedurally generate the arena layout
    pub fn generate<R: Rng>(width: f32, height: f32, rng: &mut R) -> Self {
        let mut field = Self::empty();
        let thickness = arena::WALL_THICKNESS;

        // Boundary walls
        field.add_wall(Vec2::new(width / 2.0, thickness / 2.0), width, thickness);
        field.add_wall(Vec2::new(width / 2.0, height - thickness / 2.0), width, thickness);
        field.add_wall(Vec2::new(thickness / 2.0, height / 2.0), thickness, height);
        field.add_wall(Vec2::new(width - thickness / 2.0, height / 2.0), thickness, height);

        // Coarse lattice, one roll per point
        let start = obstacle::GRID_START;
        let mut x = start;
        while x < width - start {
            let mut y = start;
            while y < height - start {
                let roll: f32 = rng.gen();
                if roll < obstacle::WALL_CHANCE {
                    let w = if rng.gen_bool(0.5) { 200.0 } else { 100.0 };
                    let h = if rng.gen_bool(0.5) { 40.0 } else { 100.0 };
                    field.add_wall(Vec2::new(x, y), w, h);
                } else if roll < obstacle::BOX_CHANCE {
                    let center = Vec2::new(x + rng.gen_range(-50.0..50.0), y + rng.gen_range(-50.0..50.0));
                    field.add_box(center, rng.gen_range(60.0..100.0), rng.gen_range(60.0..100.0));
                } else if roll < obstacle::ROCK_CHANCE {
                    field.add(
                        Vec2::new(x, y),
                        rng.gen_range(80.0..120.0),
                        rng.gen_range(80.0..120.0),
                        ObstacleKind::Rock,
                        None,
                    );
                }
                y += obstacle::GRID_SPACING;
            }
            x += obstacle::GRID_SPACING;
        }

        // Large walls
        for _ in 0..obstacle::LARGE_WALL_COUNT {
            let center = Vec2::new(
                300.0 + rng.gen::<f32>() * (width - 600.0),
                300.0 + rng.gen::<f32>() * (height - 600.0),
            );
            let length = rng.gen_range(300.0..500.0);
            if rng.gen_bool(0.5) {
                field.add_wall(center, length, thickness);
            } else {
                field.add_wall(center, thickness, length);
            }
        }

        // Box clusters
        for _ in 0..obstacle::BOX_CLUSTER_COUNT {
            let cluster = Vec2::new(
                200.0 + rng.gen::<f32>() * (width - 400.0),
                200.0 + rng.gen::<f32>() * (height - 400.0),
            );
            let count = rng.gen_range(3..=6);
            for _ in 0..count {
                let center = cluster + Vec2::new(rng.gen_range(-75.0..75.0), rng.gen_range(-75.0..75.0));
                field.add_box(center, rng.gen_range(50.0..80.0), rng.gen_range(50.0..80.0));
            }
        }

        field
    }

    fn add_wall(&mut self, center: Vec2, width: f32, height: f32) -> ObstacleId {
        self.add(center, width, height, ObstacleKind::Wall, None)
    }

    fn add_box(&mut self, center: Vec2, width: f32, height: f32) -> ObstacleId {
        self.add(center, width, height, ObstacleKind::Box, Some(obstacle::BOX_HEALTH))
    }

    /// Insert an obstacle. A `health` makes it destructible.
    pub fn add(
        &mut self,
        center: Vec2,
        width: f32,
        height: f32,
        kind: ObstacleKind,
        health: Option<f32>,
    ) -> ObstacleId {
        let id = self.next_id;
        self.next_id += 1;

        let obstacle = Obstacle {
            id,
            center,
            width,
            height,
            kind,
            destructible: health.is_some(),
            health,
        };
        self.index.insert(id, obstacle.bounds());
        self.obstacles.insert(id, obstacle);
        id
    }

    /// Lowest-id obstacle overlapping the circle
    pub fn check_collision(&self, point: Vec2, radius: f32) -> Option<&Obstacle> {
        self.index
            .query_area(&Aabb::around(point, radius))
            .into_iter()
            .filter_map(|id| self.obstacles.get(&id))
            .find(|o| o.intersects_circle(point, radius))
    }

    /// Lowest-id obstacle whose edges the segment crosses
    pub fn check_line_collision(&self, a: Vec2, b: Vec2) -> Option<&Obstacle> {
        let area = Aabb::new(
            a.x.min(b.x),
            a.y.min(b.y),
            (a.x - b.x).abs(),
            (a.y - b.y).abs(),
        );
        self.index
            .query_area(&area)
            .into_iter()
            .filter_map(|id| self.obstacles.get(&id))
            .find(|o| o.intersects_segment(a, b))
    }

    /// Position of a circle after pushing it out of every obstacle it overlaps
    pub fn resolve_circle(&self, point: Vec2, radius: f32) -> Vec2 {
        let mut resolved = point;
        for id in self.index.query_area(&Aabb::around(point, radius)) {
            let Some(obstacle) = self.obstacles.get(&id) else {
                continue;
            };
            if obstacle.intersects_circle(resolved, radius) {
                resolved += obstacle.pushback(resolved, radius);
            }
        }
        resolved
    }

    /// Apply damage. Returns true exactly once: when the obstacle is destroyed.
    pub fn damage_obstacle(&mut self, id: ObstacleId, amount: f32) -> bool {
        let Some(obstacle) = self.obstacles.get_mut(&id) else {
            return false;
        };
        if !obstacle.destructible {
            return false;
        }
        let Some(health) = obstacle.health.as_mut() else {
            return false;
        };

        *health -= amount;
        if *health <= 0.0 {
            self.obstacles.remove(&id);
            self.index.remove(id);
            return true;
        }
        false
    }

    pub fn get(&self, id: ObstacleId) -> Option<&Obstacle> {
        self.obstacles.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.values()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }
}
