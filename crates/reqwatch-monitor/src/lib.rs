//! Request telemetry for servers: records every request/response exchange,
//! tracks it through its lifecycle, stores completed records and enriches
//! them in the background.

mod capture;
mod config;
mod enrich;
mod error;
mod exchange;
mod filter;
mod monitor;
pub mod property;
mod query;
mod queue;
mod record;
mod store;

pub use capture::{CaptureReader, CaptureWriter};
pub use config::{
    BboxMode, BodyLimit, ConfigWatcher, MonitorConfig, StorageMode, DEFAULT_BBOX_CRS,
    DEFAULT_MAX_BODY_SIZE, DEFAULT_STORAGE,
};
pub use enrich::{CacheResultEnricher, Enricher, PostProcessor, DEFAULT_POOL_SIZE};
pub use error::{ConfigError, EnrichError, MonitorError, QueryError, StoreError};
pub use exchange::{Exchange, ExchangeSnapshot, RequestHead};
pub use filter::{Comparison, ComparisonOp, CompositeKind, Filter, FilterVisitor, Operand};
pub use monitor::{Monitor, MonitorContext, RequestListener};
pub use property::PropertyValue;
pub use query::{sort_by_property, Query, SortOrder};
pub use queue::{PipeliningTaskQueue, QueueConfig, DEFAULT_POLL_INTERVAL};
pub use record::{BoundingBox, Record, RequestCategory, RequestStatus};
pub use store::{MemoryStore, MonitorStore, StoreRegistry, HISTORY_CAPACITY};
