//! Monitors a handful of simulated exchanges, enriches them and queries
//! the results.
//!
//! Run with: cargo run --example monitored_exchange

use anyhow::Result;
use reqwatch::prelude::*;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

struct StdoutListener;

impl RequestListener for StdoutListener {
    fn completed(&self, record: &Record) {
        println!(
            "#{} {} {} -> {:?} ({} bytes, {:?} ms)",
            record.id(),
            record.http_method.as_deref().unwrap_or("-"),
            record.path.as_deref().unwrap_or("-"),
            record.response_status,
            record.response_length,
            record.total_time,
        );
    }
}

fn serve(monitor: &Monitor, head: RequestHead, body: &[u8], tile_hit: bool) -> Result<(Record, ExchangeSnapshot)> {
    let mut exchange = monitor.begin(head)?;
    exchange.set_service("WMS", "GetMap", Some("1.3.0".into()));
    exchange.add_resource("topp:states");
    exchange.set_bbox([-124.73, 24.96, -66.97, 49.37]);

    let mut reader = exchange.capture_body(Cursor::new(body.to_vec()));
    let mut request = Vec::new();
    reader.read_to_end(&mut request)?;
    exchange.record_body(&reader);

    let mut response = exchange.respond(Vec::new());
    response.set_content_type("image/png");
    response.set_header(
        CacheResultEnricher::CACHE_RESULT_HEADER,
        if tile_hit { "HIT" } else { "MISS" },
    );
    response.write_all(&[0u8; 512])?;
    response.flush()?;

    Ok(exchange.finish(&response)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .compact()
        .init();

    let config = Arc::new(ConfigWatcher::fixed(
        MonitorConfig::default()
            .with_mode(StorageMode::Live)
            .with_max_body_size(16),
    ));
    let monitor = Arc::new(Monitor::open(&StoreRegistry::new(), config)?);
    monitor.add_listener(Arc::new(StdoutListener));

    let processor = PostProcessor::new(monitor.clone(), tokio::runtime::Handle::current())
        .with_enricher(Arc::new(CacheResultEnricher));

    let mut handles = Vec::new();
    for (i, path) in ["/geoserver/wms", "/geoserver/gwc/service/wmts", "/geoserver/wms"]
        .into_iter()
        .enumerate()
    {
        let head = RequestHead::new("GET", path)
            .with_query(format!("request=GetMap&tile={i}"))
            .with_header("User-Agent", "reqwatch-example")
            .with_remote_addr("127.0.0.1");
        let (record, snapshot) = serve(&monitor, head, b"layers=topp:states&format=png", i % 2 == 0)?;
        handles.push(processor.submit(record, snapshot));
    }
    for handle in handles {
        handle.await?;
    }

    let query = Query::new()
        .filter(Filter::eq("path", "/geoserver/wms"))
        .and(Filter::eq("cacheResult", "HIT"))
        .sort("id", SortOrder::Desc);
    println!("filter: {}", query.filter.as_ref().map(|f| f.to_string()).unwrap_or_default());
    monitor.query(&query, &mut |record| {
        println!(
            "  #{} cache={:?} bbox={:?} body={}/{} bytes",
            record.id(),
            record.cache_result,
            record.bbox.as_ref().map(ToString::to_string),
            record.body.len(),
            record.body_content_length,
        );
    })?;

    Ok(())
}
