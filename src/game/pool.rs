//! Bounded object pool for high-churn entities
//!
//! Bullets live for a handful of ticks; recycling their backing objects keeps
//! allocation flat under sustained fire.

use crate::game::constants::weapon;
use crate::game::state::{Bullet, BulletId, SessionId};
use crate::util::vec2::Vec2;

/// Reuse allocator with a hard cap on retained objects
pub struct ObjectPool<T> {
    available: Vec<T>,
    max_size: usize,
    create: fn() -> T,
    reset: fn(&mut T),
    /// Acquisitions that found the pool empty and had to construct
    fresh_allocations: u64,
}

impl<T> ObjectPool<T> {
    /// Create a pool holding `initial` prebuilt objects (capped at `max_size`)
    pub fn new(initial: usize, max_size: usize, create: fn() -> T, reset: fn(&mut T)) -> Self {
        let prefill = initial.min(max_size);
        let mut available = Vec::with_capacity(max_size);
        available.extend((0..prefill).map(|_| create()));

        Self {
            available,
            max_size,
            create,
            reset,
            fresh_allocations: 0,
        }
    }

    /// Take a recycled object, or construct one when the pool is empty
    pub fn acquire(&mut self) -> T {
        match self.available.pop() {
            Some(obj) => obj,
            None => {
                self.fresh_allocations += 1;
                (self.create)()
            }
        }
    }

    /// Reset `obj` and keep it for reuse unless the pool is already full
    pub fn release(&mut self, mut obj: T) {
        if self.available.len() >= self.max_size {
            return;
        }
        (self.reset)(&mut obj);
        self.available.push(obj);
    }

    /// Objects ready for reuse
    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn fresh_allocations(&self) -> u64 {
        self.fresh_allocations
    }
}

/// Bullet pool with an id counter independent of object recycling
pub struct BulletPool {
    pool: ObjectPool<Bullet>,
    next_id: BulletId,
}

impl BulletPool {
    pub fn new(initial: usize, max_size: usize) -> Self {
        Self {
            pool: ObjectPool::new(initial, max_size, Bullet::default, Bullet::reset),
            next_id: 0,
        }
    }

    /// Obtain a bullet with a fresh id
    pub fn create(&mut self, owner: SessionId, position: Vec2, velocity: Vec2, damage: f32) -> Bullet {
        let mut bullet = self.pool.acquire();
        bullet.id = self.next_id;
        bullet.owner = owner;
        bullet.position = position;
        bullet.velocity = velocity;
        bullet.damage = damage;

        self.next_id += 1;
        bullet
    }

    pub fn release(&mut self, bullet: Bullet) {
        self.pool.release(bullet);
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    pub fn fresh_allocations(&self) -> u64 {
        self.pool.fresh_allocations()
    }
}

impl Default for BulletPool {
    fn default() -> Self {
        Self::new(weapon::POOL_INITIAL, weapon::POOL_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ids_continue_after_recycling() {
        let mut pool = BulletPool::new(10, 50);
        let owner = Uuid::new_v4();

        let bullets: Vec<Bullet> = (0..10)
            .map(|_| pool.create(owner, Vec2::ZERO, Vec2::new(10.0, 0.0), 20.0))
            .collect();
        let ids: Vec<BulletId> = bullets.iter().map(|b| b.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert_eq!(pool.available(), 0);

        for bullet in bullets {
            pool.release(bullet);
        }
        assert_eq!(pool.available(), 10);

        let next = pool.create(owner, Vec2::ZERO, Vec2::ZERO, 20.0);
        assert_eq!(next.id, 10);
        assert_eq!(pool.available(), 9);
    }

    #[test]
    fn test_pool_never_exceeds_max() {
        let mut pool: ObjectPool<Vec<u8>> = ObjectPool::new(2, 3, Vec::new, Vec::clear);
        let objects: Vec<Vec<u8>> = (0..6).map(|_| pool.acquire()).collect();
        assert_eq!(pool.fresh_allocations(), 4);

        for obj in objects {
            pool.release(obj);
        }
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_release_resets_fields() {
        let mut pool = BulletPool::new(0, 4);
        let bullet = pool.create(Uuid::new_v4(), Vec2::new(5.0, 5.0), Vec2::new(1.0, 0.0), 35.0);
        pool.release(bullet);

        let mut inner = pool.pool.acquire();
        assert_eq!(inner.damage, 0.0);
        assert_eq!(inner.position, Vec2::ZERO);
        inner.reset();
        assert!(inner.owner.is_nil());
    }

    #[test]
    fn test_initial_capped_by_max() {
        let pool = BulletPool::new(500, 200);
        assert_eq!(pool.available(), 200);
    }
}
