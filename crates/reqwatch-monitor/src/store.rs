//! Record storage: the backend trait, the in-memory store and backend lookup.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{MonitorConfig, DEFAULT_STORAGE};
use crate::error::StoreError;
use crate::query::Query;
use crate::record::Record;

/// Persistence and query backend for request records.
///
/// Implementations must be safe for concurrent use from request threads,
/// enrichment workers and query callers.
pub trait MonitorStore: Send + Sync {
    /// Backend name used for selection in configuration.
    fn name(&self) -> &str;

    /// Applies monitor configuration.
    fn configure(&self, _config: &MonitorConfig) -> Result<(), StoreError> {
        Ok(())
    }

    /// Assigns a fresh identifier to `record`.
    fn init(&self, record: Record) -> Result<Record, StoreError>;

    /// Makes an in-flight record visible.
    fn add(&self, record: &Record) -> Result<(), StoreError>;

    /// Replaces the stored copy of a record.
    fn update(&self, record: &Record) -> Result<(), StoreError>;

    /// Moves a completed record into durable history.
    fn save(&self, record: &Record) -> Result<(), StoreError>;

    /// Retrieves a record by ID.
    fn get_request(&self, id: i64) -> Result<Option<Record>, StoreError>;

    /// All stored records, in-flight first.
    fn get_requests(&self) -> Result<Vec<Record>, StoreError>;

    /// Records matching `query`, paged and sorted.
    fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Calls `visitor` once per matching record, in result order.
    fn visit(&self, query: &Query, visitor: &mut dyn FnMut(&Record)) -> Result<(), StoreError> {
        for record in self.query(query)? {
            visitor(&record);
        }
        Ok(())
    }

    /// Iterator over matching records.
    fn iter(&self, query: &Query) -> Result<Box<dyn Iterator<Item = Record> + Send>, StoreError> {
        Ok(Box::new(self.query(query)?.into_iter()))
    }

    /// Number of records `query` selects.
    fn count(&self, query: &Query) -> Result<u64, StoreError> {
        Ok(self.query(query)?.len() as u64)
    }

    /// Removes all records.
    fn clear(&self) -> Result<(), StoreError>;

    /// Releases resources; the store starts over if used again.
    fn dispose(&self);
}

/// Completed records kept by [`MemoryStore`].
pub const HISTORY_CAPACITY: usize = 100;

/// In-memory reference store: a live set of in-flight records and a bounded
/// history of the most recently saved ones.
pub struct MemoryStore {
    live: Mutex<VecDeque<Record>>,
    history: Mutex<VecDeque<Record>>,
    next_id: AtomicI64,
    capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub const NAME: &'static str = DEFAULT_STORAGE;

    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// A store keeping `capacity` completed records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            live: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
            capacity,
        }
    }

    pub fn live_len(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Completed records, oldest first.
    pub fn history(&self) -> Result<Vec<Record>, StoreError> {
        let history = self.history.lock().map_err(|_| StoreError::Lock)?;
        Ok(history.iter().cloned().collect())
    }

    /// Locks the live set, then the history. Every path needing both takes
    /// them in this order.
    fn lock_both(
        &self,
    ) -> Result<(MutexGuard<'_, VecDeque<Record>>, MutexGuard<'_, VecDeque<Record>>), StoreError> {
        let live = self.live.lock().map_err(|_| StoreError::Lock)?;
        let history = self.history.lock().map_err(|_| StoreError::Lock)?;
        Ok((live, history))
    }

    fn replace(records: &mut VecDeque<Record>, record: &Record) -> bool {
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(slot) => {
                *slot = record.clone();
                true
            }
            None => false,
        }
    }
}

impl MonitorStore for MemoryStore {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(&self, mut record: Record) -> Result<Record, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if !record.assign_id(id) {
            return Err(StoreError::Backend(format!(
                "record already has id {}",
                record.id()
            )));
        }
        Ok(record)
    }

    fn add(&self, record: &Record) -> Result<(), StoreError> {
        let mut live = self.live.lock().map_err(|_| StoreError::Lock)?;
        live.push_back(record.clone());
        Ok(())
    }

    fn update(&self, record: &Record) -> Result<(), StoreError> {
        let (mut live, mut history) = self.lock_both()?;
        if !Self::replace(&mut live, record) {
            Self::replace(&mut history, record);
        }
        Ok(())
    }

    fn save(&self, record: &Record) -> Result<(), StoreError> {
        let (mut live, mut history) = self.lock_both()?;
        live.retain(|r| r.id() != record.id());
        history.push_back(record.clone());
        while history.len() > self.capacity {
            history.pop_front();
        }
        Ok(())
    }

    fn get_request(&self, id: i64) -> Result<Option<Record>, StoreError> {
        let (live, history) = self.lock_both()?;
        let found = live.iter().chain(history.iter()).find(|r| r.id() == id).cloned();
        Ok(found)
    }

    fn get_requests(&self) -> Result<Vec<Record>, StoreError> {
        let (live, history) = self.lock_both()?;
        let records = live.iter().chain(history.iter()).cloned().collect();
        Ok(records)
    }

    fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let records = self.get_requests()?;
        Ok(query.apply(records)?)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let (mut live, mut history) = self.lock_both()?;
        live.clear();
        history.clear();
        Ok(())
    }

    fn dispose(&self) {
        if let Err(e) = self.clear() {
            tracing::warn!("Failed to clear memory store on dispose: {}", e);
        }
        self.next_id.store(1, Ordering::SeqCst);
    }
}

/// Record stores available for selection by name.
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn MonitorStore>>,
    fallback: Arc<dyn MonitorStore>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreRegistry {
    /// A registry holding only the in-memory store.
    pub fn new() -> Self {
        let memory: Arc<dyn MonitorStore> = Arc::new(MemoryStore::new());
        let mut stores = HashMap::new();
        stores.insert(MemoryStore::NAME.to_string(), memory.clone());
        Self {
            stores,
            fallback: memory,
        }
    }

    /// Registers `store` under its own name, replacing any previous one.
    pub fn register(&mut self, store: Arc<dyn MonitorStore>) {
        self.stores.insert(store.name().to_string(), store);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// The store registered as `name`, or the in-memory store.
    pub fn resolve(&self, name: &str) -> Arc<dyn MonitorStore> {
        match self.stores.get(name) {
            Some(store) => store.clone(),
            None => {
                tracing::warn!(
                    store = name,
                    "Record store not found, falling back to in-memory store"
                );
                self.fallback.clone()
            }
        }
    }

    /// Resolves the store named by `config` and configures it.
    pub fn open(&self, config: &MonitorConfig) -> Result<Arc<dyn MonitorStore>, StoreError> {
        let store = self.resolve(&config.storage);
        store.configure(config)?;
        Ok(store)
    }
}
