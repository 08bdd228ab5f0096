//! Reference-counted store for objects shared across concurrent scopes.
//!
//! An object lives in the store for as long as at least one [`ObjectRef`]
//! to it is alive. The first acquisition constructs it, later acquisitions
//! under the same key receive the same instance, and dropping the last
//! reference evicts the entry so that the next acquisition builds a fresh one.
//!
//! ```ignore
//! let store = RefObjectStore::new();
//! let outer = store.get_or_create("broker", || connect(url));
//! let inner = store.get("broker")?;
//! assert!(ObjectRef::ptr_eq(&outer, &inner));
//! ```

use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::error::{RuntimeError, RuntimeResult};

struct Entry<V> {
    count: usize,
    object: Arc<V>,
}

type Objects<K, V> = Arc<Mutex<FxHashMap<K, Entry<V>>>>;

fn lock_objects<K, V>(objects: &Objects<K, V>) -> MutexGuard<'_, FxHashMap<K, Entry<V>>> {
    // The map is left consistent after every critical section, so a panic in
    // another holder does not invalidate it.
    objects.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A store of shared objects with scoped reference counting.
///
/// The existence check, construction and count updates for a key all happen
/// under one lock, so concurrent acquisitions never construct twice.
/// Constructors run while that lock is held and must not call back into the
/// same store.
pub struct RefObjectStore<K, V> {
    objects: Objects<K, V>,
}

impl<K, V> RefObjectStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Acquire the object under `key`, constructing it when absent.
    ///
    /// Fails with [`RuntimeError::NotFound`] when the key is unknown and no
    /// constructor is given.
    pub fn acquire<F>(&self, key: K, constructor: Option<F>) -> RuntimeResult<ObjectRef<K, V>>
    where
        F: FnOnce() -> V,
    {
        match constructor {
            Some(constructor) => Ok(self.get_or_create(key, constructor)),
            None => self.get(key),
        }
    }

    /// Acquire an existing object.
    pub fn get(&self, key: K) -> RuntimeResult<ObjectRef<K, V>> {
        let mut objects = lock_objects(&self.objects);
        let Some(entry) = objects.get_mut(&key) else {
            return Err(RuntimeError::NotFound(format!("{key:?}")));
        };
        entry.count += 1;
        let object = Arc::clone(&entry.object);
        drop(objects);

        Ok(self.reference(key, object))
    }

    /// Acquire the object under `key`, calling `constructor` only if no
    /// reference to it is currently alive.
    pub fn get_or_create<F>(&self, key: K, constructor: F) -> ObjectRef<K, V>
    where
        F: FnOnce() -> V,
    {
        let mut objects = lock_objects(&self.objects);
        let entry = objects.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(key = ?key, "constructing shared object");
            Entry {
                count: 0,
                object: Arc::new(constructor()),
            }
        });
        entry.count += 1;
        let object = Arc::clone(&entry.object);
        drop(objects);

        self.reference(key, object)
    }

    /// Number of live references to the object under `key` (0 if absent).
    pub fn ref_count(&self, key: &K) -> usize {
        lock_objects(&self.objects)
            .get(key)
            .map_or(0, |entry| entry.count)
    }

    /// Whether an object is currently registered under `key`.
    pub fn contains(&self, key: &K) -> bool {
        lock_objects(&self.objects).contains_key(key)
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        lock_objects(&self.objects).len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reference(&self, key: K, object: Arc<V>) -> ObjectRef<K, V> {
        ObjectRef {
            key,
            object,
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<K, V> Default for RefObjectStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for RefObjectStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<K, V> fmt::Debug for RefObjectStore<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let objects = lock_objects(&self.objects);
        f.debug_map()
            .entries(objects.iter().map(|(key, entry)| (key, entry.count)))
            .finish()
    }
}

/// A scoped reference to an object held in a [`RefObjectStore`].
///
/// Dropping the reference decrements the count; the last drop evicts the
/// entry. Cloning counts as a new acquisition.
pub struct ObjectRef<K: Eq + Hash, V> {
    key: K,
    object: Arc<V>,
    objects: Objects<K, V>,
}

impl<K: Eq + Hash, V> ObjectRef<K, V> {
    /// The key this reference was acquired under.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether two references point at the same underlying instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.object, &b.object)
    }
}

impl<K: Eq + Hash, V> Deref for ObjectRef<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.object
    }
}

impl<K: Eq + Hash + Clone, V> Clone for ObjectRef<K, V> {
    fn clone(&self) -> Self {
        let mut objects = lock_objects(&self.objects);
        if let Some(entry) = objects.get_mut(&self.key) {
            entry.count += 1;
        }
        drop(objects);

        Self {
            key: self.key.clone(),
            object: Arc::clone(&self.object),
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<K: Eq + Hash, V> Drop for ObjectRef<K, V> {
    fn drop(&mut self) {
        let mut objects = lock_objects(&self.objects);
        let evict = match objects.get_mut(&self.key) {
            Some(entry) => {
                entry.count = entry.count.saturating_sub(1);
                entry.count == 0
            }
            None => false,
        };
        if evict {
            objects.remove(&self.key);
        }
    }
}

impl<K: Eq + Hash + fmt::Debug, V: fmt::Debug> fmt::Debug for ObjectRef<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("key", &self.key)
            .field("object", &self.object)
            .finish()
    }
}
