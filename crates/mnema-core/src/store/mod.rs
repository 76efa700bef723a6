//! Item store: authoritative in-memory item map fronted by bounded LRU
//! caches, plus the due-time side index.
//!
//! The map, the caches, and the due-time index live under a single mutex so
//! they move atomically (the scheduler reads due times while the session
//! writes items). The lock is never held across an await. The store itself
//! never writes to [`Storage`]; durable mutation is the batch writer's job.

use crate::config::CoreConfig;
use crate::domain::{
    parse_item_id, CoreError, IdCounter, Item, ReviewRecord, StorageResult, StoreStats,
};
use crate::ports::Storage;
use chrono::{DateTime, TimeZone, Utc};
use lru::LruCache;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

pub struct ItemStore {
    storage: Arc<dyn Storage>,
    ids: IdCounter,
    history_max: usize,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    items: HashMap<String, Item>,
    hot: LruCache<String, Item>,
    history: LruCache<String, Vec<ReviewRecord>>,
    /// next_review_time millis -> IDs due at that instant.
    due_index: BTreeMap<i64, BTreeSet<String>>,
}

impl ItemStore {
    /// Hydrate the store from the backing storage: load every item, build
    /// the due-time index, and seed the ID counter past the highest
    /// canonical ID seen.
    pub async fn load(storage: Arc<dyn Storage>, config: &CoreConfig) -> StorageResult<Self> {
        let store = Self::empty(storage, config);
        let items = store.storage.load_all_items().await?;
        {
            let mut inner = store.inner.lock().expect("store mutex poisoned");
            for item in items {
                if let Some(n) = parse_item_id(&item.id) {
                    store.ids.seed(n);
                }
                index_insert(&mut inner.due_index, &item);
                inner.items.insert(item.id.clone(), item);
            }
        }
        tracing::info!(total = store.total_count(), "item store hydrated");
        Ok(store)
    }

    /// An empty store over the given storage; items arrive via `add_item`.
    pub fn empty(storage: Arc<dyn Storage>, config: &CoreConfig) -> Self {
        let hot_cap = nonzero(config.hot_cache_capacity);
        let history_cap = nonzero(config.history_cache_capacity);
        Self {
            storage,
            ids: IdCounter::new(),
            history_max: config.history_max_per_item,
            inner: Mutex::new(StoreInner {
                items: HashMap::new(),
                hot: LruCache::new(hot_cap),
                history: LruCache::new(history_cap),
                due_index: BTreeMap::new(),
            }),
        }
    }

    /// Issue a fresh canonical item ID.
    pub fn issue_id(&self) -> Result<String, CoreError> {
        self.ids.issue()
    }

    /// Current ID-counter maximum, for persisting across restarts.
    pub fn id_counter_snapshot(&self) -> u64 {
        self.ids.snapshot()
    }

    pub fn add_item(&self, item: Item) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if inner.items.contains_key(&item.id) {
            return Err(CoreError::DuplicateItemId(item.id));
        }
        if let Some(n) = parse_item_id(&item.id) {
            self.ids.seed(n);
        }
        index_insert(&mut inner.due_index, &item);
        inner.hot.put(item.id.clone(), item.clone());
        inner.items.insert(item.id.clone(), item);
        Ok(())
    }

    pub fn get_item(&self, id: &str) -> Option<Item> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if let Some(item) = inner.hot.get(id) {
            return Some(item.clone());
        }
        let item = inner.items.get(id).cloned()?;
        inner.hot.put(id.to_string(), item.clone());
        Some(item)
    }

    /// Replace an item, keeping the due-time index in step.
    pub fn update_item(&self, item: Item) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let old_due = inner.items.get(&item.id).map(|old| old.next_review_time);
        if let Some(due) = old_due {
            index_remove(&mut inner.due_index, &item.id, due);
        }
        index_insert(&mut inner.due_index, &item);
        inner.hot.put(item.id.clone(), item.clone());
        inner.items.insert(item.id.clone(), item);
    }

    pub fn remove_item(&self, id: &str) -> Option<Item> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let item = inner.items.remove(id)?;
        index_remove(&mut inner.due_index, id, item.next_review_time);
        inner.hot.pop(id);
        inner.history.pop(id);
        Some(item)
    }

    pub fn all_items(&self) -> Vec<Item> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.items.values().cloned().collect()
    }

    pub fn total_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").items.len()
    }

    /// Review history, oldest first, at most `history_max_per_item`
    /// entries. Cache misses read through to storage.
    pub async fn get_history(&self, id: &str) -> StorageResult<Vec<ReviewRecord>> {
        {
            let mut inner = self.inner.lock().expect("store mutex poisoned");
            if let Some(history) = inner.history.get(id) {
                return Ok(history.clone());
            }
        }
        let mut loaded = self.storage.load_history(id).await?;
        trim_oldest(&mut loaded, self.history_max);
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.history.put(id.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Append a record to the cached history, dropping the oldest entry
    /// beyond the per-item cap.
    pub async fn add_record(&self, id: &str, record: ReviewRecord) -> StorageResult<()> {
        let mut history = self.get_history(id).await?;
        history.push(record);
        trim_oldest(&mut history, self.history_max);
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.history.put(id.to_string(), history);
        Ok(())
    }

    /// IDs due at `now`, ascending by next review time; equal instants
    /// break by item ID ascending.
    pub fn due_item_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .due_index
            .range(..=now.timestamp_millis())
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Earliest future due instant, if any. Feeds the idle-wait timer.
    pub fn next_due_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .due_index
            .range(now.timestamp_millis() + 1..)
            .next()
            .and_then(|(millis, _)| Utc.timestamp_millis_opt(*millis).single())
    }

    pub fn stats(&self, now: DateTime<Utc>) -> StoreStats {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let due_count = inner
            .due_index
            .range(..=now.timestamp_millis())
            .map(|(_, ids)| ids.len())
            .sum();
        let item_bytes: usize = inner
            .items
            .values()
            .map(|i| std::mem::size_of::<Item>() + i.id.len() + i.word.len() + i.meaning.len())
            .sum();
        let history_bytes: usize = inner
            .history
            .iter()
            .map(|(_, h)| h.len() * std::mem::size_of::<ReviewRecord>())
            .sum();
        StoreStats {
            total_count: inner.items.len(),
            due_count,
            memory_usage_estimate: item_bytes + history_bytes,
        }
    }
}

fn nonzero(cap: usize) -> NonZeroUsize {
    NonZeroUsize::new(cap.max(1)).unwrap_or(NonZeroUsize::MIN)
}

fn trim_oldest(history: &mut Vec<ReviewRecord>, max: usize) {
    if history.len() > max {
        let excess = history.len() - max;
        history.drain(..excess);
    }
}

fn index_insert(index: &mut BTreeMap<i64, BTreeSet<String>>, item: &Item) {
    index
        .entry(item.next_review_time.timestamp_millis())
        .or_default()
        .insert(item.id.clone());
}

fn index_remove(index: &mut BTreeMap<i64, BTreeSet<String>>, id: &str, due: DateTime<Utc>) {
    let millis = due.timestamp_millis();
    if let Some(ids) = index.get_mut(&millis) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(&millis);
        }
    }
}
