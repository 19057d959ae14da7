//! Object pools for scratch collections
//!
//! Traversal and propagation need short-lived lists, sets and maps. Renting
//! them from a pool avoids re-allocating on every step of a large graph.
//! A rented container comes back empty inside a [`Pooled`] guard and goes
//! back to its pool when the guard drops, unless it grew past the pool's
//! capacity limit or the pool is already full, in which case it is freed.
//!
//! One shared pool exists per container type, created on first use.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

/// Default number of idle containers a pool keeps
pub const DEFAULT_MAX_RETAINED: usize = 32;

/// Containers with a larger capacity are dropped instead of returned
pub const DEFAULT_MAX_CAPACITY: usize = 1024;

/// A container that can be cleared and reused
pub trait Poolable: Default + Send + 'static {
    fn clear(&mut self);

    fn capacity(&self) -> usize;
}

impl<T: Send + 'static> Poolable for Vec<T> {
    fn clear(&mut self) {
        Vec::clear(self)
    }

    fn capacity(&self) -> usize {
        Vec::capacity(self)
    }
}

impl<T: Send + 'static> Poolable for VecDeque<T> {
    fn clear(&mut self) {
        VecDeque::clear(self)
    }

    fn capacity(&self) -> usize {
        VecDeque::capacity(self)
    }
}

impl<T: Send + 'static> Poolable for HashSet<T> {
    fn clear(&mut self) {
        HashSet::clear(self)
    }

    fn capacity(&self) -> usize {
        HashSet::capacity(self)
    }
}

impl<K: Send + 'static, V: Send + 'static> Poolable for HashMap<K, V> {
    fn clear(&mut self) {
        HashMap::clear(self)
    }

    fn capacity(&self) -> usize {
        HashMap::capacity(self)
    }
}

/// Thread-safe free list of containers
pub struct ObjectPool<C: Poolable> {
    free: Mutex<Vec<C>>,
    max_retained: usize,
    max_capacity: usize,
}

impl<C: Poolable> ObjectPool<C> {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_RETAINED, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_limits(max_retained: usize, max_capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_retained,
            max_capacity,
        }
    }

    /// Take an empty container, reusing an idle one when available
    pub fn rent(self: &Arc<Self>) -> Pooled<C> {
        let value = self.free.lock().pop().unwrap_or_default();
        Pooled {
            value,
            pool: Arc::clone(self),
        }
    }

    /// Number of idle containers
    pub fn retained(&self) -> usize {
        self.free.lock().len()
    }

    fn give_back(&self, mut value: C) {
        let capacity = value.capacity();
        if capacity == 0 {
            return;
        }
        if capacity > self.max_capacity {
            log::trace!(
                "Discarding pooled {} with capacity {}",
                std::any::type_name::<C>(),
                capacity
            );
            return;
        }
        value.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(value);
        }
    }
}

impl<C: Poolable> Default for ObjectPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A rented container, returned to its pool on drop
pub struct Pooled<C: Poolable> {
    value: C,
    pool: Arc<ObjectPool<C>>,
}

impl<C: Poolable> Pooled<C> {
    /// Keep the container instead of returning it
    pub fn into_inner(mut self) -> C {
        std::mem::take(&mut self.value)
    }
}

impl<C: Poolable> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.value
    }
}

impl<C: Poolable> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.value
    }
}

impl<C: Poolable> Drop for Pooled<C> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.value));
    }
}

impl<C: Poolable + fmt::Debug> fmt::Debug for Pooled<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

static POOLS: Lazy<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// The shared pool for container type `C`
pub fn shared_pool<C: Poolable>() -> Arc<ObjectPool<C>> {
    let key = TypeId::of::<C>();
    if let Some(pool) = POOLS.read().get(&key) {
        if let Ok(pool) = Arc::clone(pool).downcast::<ObjectPool<C>>() {
            return pool;
        }
    }

    let mut pools = POOLS.write();
    let entry = pools
        .entry(key)
        .or_insert_with(|| Arc::new(ObjectPool::<C>::new()) as Arc<dyn Any + Send + Sync>);
    match Arc::clone(entry).downcast::<ObjectPool<C>>() {
        Ok(pool) => pool,
        // The key is the container's own TypeId, so this arm is unreachable.
        Err(_) => Arc::new(ObjectPool::new()),
    }
}

/// Rent from the shared pool for `C`
pub fn rent<C: Poolable>() -> Pooled<C> {
    shared_pool::<C>().rent()
}

pub fn rent_vec<T: Send + 'static>() -> Pooled<Vec<T>> {
    rent()
}

pub fn rent_set<T: Eq + Hash + Send + 'static>() -> Pooled<HashSet<T>> {
    rent()
}

pub fn rent_map<K: Eq + Hash + Send + 'static, V: Send + 'static>() -> Pooled<HashMap<K, V>> {
    rent()
}
