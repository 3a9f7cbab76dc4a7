//! # reqwatch
//!
//! Request telemetry for servers. Every inbound exchange becomes a
//! [`Record`](prelude::Record) that is tracked from start to completion,
//! kept in a queryable store and enriched in the background.
//!
//! ```no_run
//! use reqwatch::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Arc::new(ConfigWatcher::fixed(MonitorConfig::default()));
//! let monitor = Monitor::open(&StoreRegistry::new(), config).unwrap();
//!
//! let exchange = monitor.begin(RequestHead::new("GET", "/wms")).unwrap();
//! let response = exchange.respond(std::io::sink());
//! let (record, _snapshot) = exchange.finish(&response).unwrap();
//! assert_eq!(record.status(), RequestStatus::Finished);
//! ```

pub use reqwatch_monitor as monitor;

pub mod prelude {
    pub use reqwatch_monitor::{
        BboxMode, BodyLimit, BoundingBox, CacheResultEnricher, CaptureReader, CaptureWriter,
        ConfigWatcher, Enricher, EnrichError, Exchange, ExchangeSnapshot, Filter, FilterVisitor,
        MemoryStore, Monitor, MonitorConfig, MonitorContext, MonitorError, MonitorStore,
        PipeliningTaskQueue, PostProcessor, PropertyValue, Query, QueueConfig, Record,
        RequestCategory, RequestHead, RequestListener, RequestStatus, SortOrder, StorageMode,
        StoreError, StoreRegistry,
    };
}
