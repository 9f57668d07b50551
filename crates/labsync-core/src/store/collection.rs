// ── Generic reactive entity collection ──
//
// Insertion-ordered storage with push-based change notification via
// `watch` channels, plus per-entity feeds for time-series consumers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};

use crate::error::PatchError;
use crate::model::{Entity, EntityFactory, PathMutable};
use crate::stream::{EntityStream, ItemStream};

const ITEM_FEED_CAPACITY: usize = 64;

/// Type-erased view of a collection, used by the category registry.
pub trait Collection: PathMutable + Send + Sync {
    fn category(&self) -> &str;

    /// Whole-entity merge; creates the entity if `id` is unknown.
    fn update_item(&mut self, id: &str, data: &Value) -> Result<(), PatchError>;

    /// Path-addressed mutation; creates the entity if `id` is unknown.
    fn update_item_property(
        &mut self,
        id: &str,
        path: &[String],
        value: &Value,
    ) -> Result<(), PatchError>;

    /// Returns `true` if something was removed.
    fn remove(&mut self, id: &str) -> bool;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> Vec<String>;

    fn to_json(&self) -> Value;

    fn as_any(&self) -> &dyn Any;
}

/// Per-entity notification channel. Delivery is suppressed unless the
/// entity's `last_updated` is strictly newer than the last one delivered.
struct ItemFeed<T> {
    tx: broadcast::Sender<Arc<T>>,
    last_delivered: Option<DateTime<Utc>>,
}

/// A reactive, insertion-ordered collection for a single entity type.
///
/// Entities are held behind `Arc` and mutated copy-on-write, so snapshots
/// handed to subscribers are never torn. Every mutation bumps a version
/// counter and rebuilds the snapshot that subscribers receive.
pub struct EntityCollection<T: Entity> {
    category: String,
    items: IndexMap<String, Arc<T>>,
    factory: EntityFactory<T>,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
    feeds: HashMap<String, ItemFeed<T>>,
}

impl<T: Entity> EntityCollection<T> {
    pub fn new(category: impl Into<String>, factory: EntityFactory<T>) -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            category: category.into(),
            items: IndexMap::new(),
            factory,
            version,
            snapshot,
            feeds: HashMap::new(),
        }
    }

    // ── Map-like access ──────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Insert or replace by the entity's own id. An existing entry keeps
    /// its position.
    pub fn set(&mut self, entity: impl Into<Arc<T>>) {
        let entity = entity.into();
        let id = entity.id().to_owned();
        self.items.insert(id.clone(), Arc::clone(&entity));
        self.committed(&id, &entity);
    }

    pub fn delete(&mut self, id: &str) -> Option<Arc<T>> {
        let removed = self.items.shift_remove(id);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Remove all entities. Per-entity subscriptions survive so a
    /// re-hydrated entity keeps feeding its listeners.
    pub fn clear(&mut self) {
        self.items.clear();
        self.changed();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Arc<T>> {
        self.items.values().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ── Patch-oriented operations ────────────────────────────────────

    /// Merge `data` into the entity, constructing it through the factory
    /// if `id` is unknown. A failed update leaves the entity untouched.
    pub fn update_item(&mut self, id: &str, data: &Value) -> Result<Arc<T>, PatchError> {
        let next = match self.items.get(id) {
            Some(current) => {
                let mut next = T::clone(current);
                next.update(data)?;
                next
            }
            None => {
                tracing::debug!(category = %self.category, id, "creating entity");
                self.create(id, data)?
            }
        };
        Ok(self.commit(id, next))
    }

    /// Apply a path-addressed mutation, lazily creating the entity.
    pub fn update_item_property(
        &mut self,
        id: &str,
        path: &[String],
        value: &Value,
    ) -> Result<Arc<T>, PatchError> {
        let mut next = match self.items.get(id) {
            Some(current) => T::clone(current),
            None => {
                tracing::debug!(category = %self.category, id, "creating entity from property patch");
                self.create(id, &Value::Object(Map::new()))?
            }
        };
        next.update_property(path, value)?;
        Ok(self.commit(id, next))
    }

    /// Mutate an existing entity in place. `None` if `id` is unknown.
    pub fn modify<R>(&mut self, id: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut next = T::clone(self.items.get(id)?);
        let out = f(&mut next);
        self.commit(id, next);
        Some(out)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> EntityStream<T> {
        EntityStream::new(self.snapshot.subscribe())
    }

    /// Follow one entity. Dropping the stream unsubscribes.
    pub fn subscribe_item(&mut self, id: &str) -> ItemStream<T> {
        let feed = self.feeds.entry(id.to_owned()).or_insert_with(|| ItemFeed {
            tx: broadcast::channel(ITEM_FEED_CAPACITY).0,
            last_delivered: None,
        });
        ItemStream::new(feed.tx.subscribe())
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn create(&self, id: &str, data: &Value) -> Result<T, PatchError> {
        (self.factory)(id, data).map_err(|e| PatchError::InvalidEntity {
            category: self.category.clone(),
            id: id.to_owned(),
            reason: e.to_string(),
        })
    }

    fn commit(&mut self, id: &str, next: T) -> Arc<T> {
        let entity = Arc::new(next);
        self.items.insert(id.to_owned(), Arc::clone(&entity));
        self.committed(id, &entity);
        entity
    }

    fn committed(&mut self, id: &str, entity: &Arc<T>) {
        self.changed();
        self.publish(id, entity);
    }

    fn changed(&self) {
        let values: Vec<Arc<T>> = self.items.values().cloned().collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }

    fn publish(&mut self, id: &str, entity: &Arc<T>) {
        let Some(feed) = self.feeds.get_mut(id) else {
            return;
        };
        if feed.tx.receiver_count() == 0 {
            self.feeds.remove(id);
            return;
        }

        let stamp = entity.last_updated();
        if feed.last_delivered.is_some_and(|last| stamp <= last) {
            tracing::trace!(category = %self.category, id, "suppressing out-of-order update");
            return;
        }
        feed.last_delivered = Some(stamp);
        let _ = feed.tx.send(Arc::clone(entity));
    }
}

// ── Type-erased access ───────────────────────────────────────────────

impl<T: Entity> PathMutable for EntityCollection<T> {
    /// `path[0]` names the item; the rest addresses into it.
    fn update_property(&mut self, path: &[String], value: &Value) -> Result<(), PatchError> {
        let Some((id, rest)) = path.split_first() else {
            return Ok(());
        };
        if rest.is_empty() {
            EntityCollection::update_item(self, id, value).map(drop)
        } else {
            EntityCollection::update_item_property(self, id, rest, value).map(drop)
        }
    }
}

impl<T: Entity> Collection for EntityCollection<T> {
    fn category(&self) -> &str {
        &self.category
    }

    fn update_item(&mut self, id: &str, data: &Value) -> Result<(), PatchError> {
        EntityCollection::update_item(self, id, data).map(drop)
    }

    fn update_item_property(
        &mut self,
        id: &str,
        path: &[String],
        value: &Value,
    ) -> Result<(), PatchError> {
        EntityCollection::update_item_property(self, id, path, value).map(drop)
    }

    fn remove(&mut self, id: &str) -> bool {
        self.delete(id).is_some()
    }

    fn clear(&mut self) {
        EntityCollection::clear(self);
    }

    fn len(&self) -> usize {
        EntityCollection::len(self)
    }

    fn keys(&self) -> Vec<String> {
        EntityCollection::keys(self)
    }

    fn to_json(&self) -> Value {
        Value::Object(
            self.items
                .iter()
                .map(|(id, entity)| (id.clone(), entity.to_json()))
                .collect(),
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────────
