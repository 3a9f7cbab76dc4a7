//! Request lifecycle manager.

use std::sync::{Arc, RwLock};

use crate::config::{ConfigWatcher, MonitorConfig, StorageMode};
use crate::error::{MonitorError, StoreError};
use crate::query::Query;
use crate::record::Record;
use crate::store::{MonitorStore, StoreRegistry};

/// Observer of record lifecycle events.
///
/// Hooks run synchronously on the calling thread, in registration order, and
/// may see records in any status.
pub trait RequestListener: Send + Sync {
    fn started(&self, _record: &Record) {}
    fn updated(&self, _record: &Record) {}
    fn completed(&self, _record: &Record) {}
    fn post_processed(&self, _record: &Record) {}
}

/// Execution context of one in-flight exchange: holds the record bound to
/// it. Pass it along the request-handling path.
#[derive(Debug, Default)]
pub struct MonitorContext {
    record: Option<Record>,
}

impl MonitorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.record.is_some()
    }

    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn record_mut(&mut self) -> Option<&mut Record> {
        self.record.as_mut()
    }
}

/// Creates records, tracks them through their lifecycle, notifies listeners
/// and hands records to the store.
pub struct Monitor {
    store: Arc<dyn MonitorStore>,
    config: Arc<ConfigWatcher>,
    listeners: RwLock<Vec<Arc<dyn RequestListener>>>,
}

impl Monitor {
    pub fn new(store: Arc<dyn MonitorStore>, config: Arc<ConfigWatcher>) -> Self {
        Self {
            store,
            config,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Builds a monitor over the store named by the current configuration.
    pub fn open(registry: &StoreRegistry, config: Arc<ConfigWatcher>) -> Result<Self, StoreError> {
        let store = registry.open(&config.current())?;
        tracing::info!(store = store.name(), "Request monitor started");
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &Arc<dyn MonitorStore> {
        &self.store
    }

    /// Current configuration, reloaded if the backing file changed.
    pub fn config(&self) -> MonitorConfig {
        self.config.current()
    }

    pub fn add_listener(&self, listener: Arc<dyn RequestListener>) {
        let Ok(mut listeners) = self.listeners.write() else {
            tracing::warn!("Failed to acquire listener lock");
            return;
        };
        listeners.push(listener);
    }

    fn live(&self) -> bool {
        self.config.current().mode == StorageMode::Live
    }

    fn notify(&self, hook: impl Fn(&dyn RequestListener)) {
        let listeners = {
            let Ok(guard) = self.listeners.read() else {
                tracing::warn!("Failed to acquire listener lock");
                return;
            };
            guard.clone()
        };
        for listener in &listeners {
            hook(listener.as_ref());
        }
    }

    /// Creates a record, binds it to `ctx` and returns it.
    pub fn start<'c>(&self, ctx: &'c mut MonitorContext) -> Result<&'c mut Record, MonitorError> {
        if let Some(bound) = &ctx.record {
            return Err(MonitorError::AlreadyBound(bound.id()));
        }

        let record = self.store.init(Record::new())?;
        self.notify(|l| l.updated(&record));
        if self.live() {
            if let Err(e) = self.store.add(&record) {
                tracing::warn!(id = record.id(), "Failed to add request: {}", e);
            }
        }
        tracing::debug!(id = record.id(), "Request started");

        Ok(ctx.record.insert(record))
    }

    /// The record bound to `ctx`.
    pub fn current<'c>(&self, ctx: &'c MonitorContext) -> Option<&'c Record> {
        ctx.record()
    }

    /// Fires the `started` hook once request attributes are filled in.
    pub fn started(&self, ctx: &MonitorContext) -> Result<(), MonitorError> {
        let record = ctx.record().ok_or(MonitorError::NotStarted)?;
        self.notify(|l| l.started(record));
        Ok(())
    }

    /// Publishes the bound record's current field values.
    pub fn update(&self, ctx: &MonitorContext) -> Result<(), MonitorError> {
        let record = ctx.record().ok_or(MonitorError::NotStarted)?;
        self.notify(|l| l.updated(record));
        if self.live() {
            if let Err(e) = self.store.update(record) {
                tracing::warn!(id = record.id(), "Failed to update request: {}", e);
            }
        }
        Ok(())
    }

    /// Saves the bound record into history and unbinds it.
    ///
    /// Returns the completed record, or `None` when nothing was bound.
    pub fn complete(&self, ctx: &mut MonitorContext) -> Option<Record> {
        let record = ctx.record.take()?;
        self.notify(|l| l.completed(&record));
        if let Err(e) = self.store.save(&record) {
            tracing::warn!(id = record.id(), "Failed to save request: {}", e);
        }
        tracing::debug!(
            id = record.id(),
            status = record.status().as_str(),
            total_time = ?record.total_time,
            "Request completed"
        );
        Some(record)
    }

    /// Publishes a record after enrichment.
    pub fn post_processed(&self, record: &Record) {
        self.notify(|l| l.post_processed(record));
        if let Err(e) = self.store.update(record) {
            tracing::warn!(id = record.id(), "Failed to update post-processed request: {}", e);
        }
    }

    /// Calls `visitor` once per record matching `query`.
    pub fn query(&self, query: &Query, visitor: &mut dyn FnMut(&Record)) -> Result<(), StoreError> {
        self.store.visit(query, visitor)
    }

    pub fn requests(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        self.store.query(query)
    }

    pub fn request(&self, id: i64) -> Result<Option<Record>, StoreError> {
        self.store.get_request(id)
    }
}
