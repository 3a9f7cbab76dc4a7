use reqwatch::prelude::*;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn memory_monitor(config: MonitorConfig) -> Arc<Monitor> {
    let watcher = Arc::new(ConfigWatcher::fixed(config));
    Arc::new(Monitor::open(&StoreRegistry::new(), watcher).unwrap())
}

fn get(path: &str) -> RequestHead {
    RequestHead::new("GET", path).with_remote_addr("192.0.2.10")
}

fn serve(monitor: &Monitor, head: RequestHead, body: &[u8], status: u16) -> (Record, ExchangeSnapshot) {
    let mut exchange = monitor.begin(head).unwrap();
    let mut reader = exchange.capture_body(Cursor::new(body.to_vec()));
    io::copy(&mut reader, &mut io::sink()).unwrap();
    exchange.record_body(&reader);

    let mut response = exchange.respond(Vec::new());
    response.set_status(status);
    response.write_all(b"payload").unwrap();
    exchange.finish(&response).unwrap()
}

struct GeoStub;

#[async_trait::async_trait]
impl Enricher for GeoStub {
    fn name(&self) -> &str {
        "geo-stub"
    }

    async fn run(&self, record: &mut Record, exchange: &ExchangeSnapshot) -> Result<(), EnrichError> {
        match exchange.remote_addr.as_deref() {
            Some(addr) if addr.starts_with("192.0.2.") => {
                record.remote_country = Some("IT".into());
                record.remote_lat = Some(43.77);
                record.remote_lon = Some(11.25);
                Ok(())
            }
            other => Err(EnrichError::new(self.name(), format!("no location for {:?}", other))),
        }
    }
}

#[derive(Default)]
struct Counter {
    completed: AtomicUsize,
    post_processed: AtomicUsize,
}

impl RequestListener for Counter {
    fn completed(&self, _record: &Record) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn post_processed(&self, _record: &Record) {
        self.post_processed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_exchange_enrich_and_query() {
    let monitor = memory_monitor(MonitorConfig::default());
    let counter = Arc::new(Counter::default());
    monitor.add_listener(counter.clone());

    let processor = PostProcessor::new(monitor.clone(), tokio::runtime::Handle::current())
        .with_enricher(Arc::new(GeoStub))
        .with_enricher(Arc::new(CacheResultEnricher));

    let mut handles = Vec::new();
    for (path, status) in [("/wms", 200), ("/wfs", 500), ("/wms", 200)] {
        let (record, snapshot) = serve(&monitor, get(path), b"", status);
        handles.push(processor.submit(record, snapshot));
    }
    let (record, snapshot) = serve(&monitor, RequestHead::new("GET", "/wcs").with_remote_addr("198.51.100.1"), b"", 200);
    handles.push(processor.submit(record, snapshot));
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(counter.completed.load(Ordering::SeqCst), 4);
    assert_eq!(counter.post_processed.load(Ordering::SeqCst), 4);

    let located = monitor
        .requests(&Query::new().filter(Filter::eq("remoteCountry", "IT")).sort("id", SortOrder::Asc))
        .unwrap();
    assert_eq!(located.len(), 3);
    assert!(located.windows(2).all(|w| w[0].id() < w[1].id()));

    let errors = monitor
        .requests(&Query::new().filter(Filter::gte("responseStatus", 400)))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path.as_deref(), Some("/wfs"));

    let unlocated = monitor
        .requests(&Query::new().filter(Filter::eq("remoteCountry", PropertyValue::Null)))
        .unwrap();
    assert_eq!(unlocated.len(), 1);
    assert_eq!(unlocated[0].path.as_deref(), Some("/wcs"));
}

#[test]
fn test_in_and_or_filters_over_store() {
    let monitor = memory_monitor(MonitorConfig::default());
    for path in ["/wms", "/wfs", "/wcs", "/rest/layers"] {
        serve(&monitor, get(path), b"", 200);
    }

    let ows = Query::new().filter(Filter::is_in("path", vec!["/wms", "/wfs", "/wcs"]));
    assert_eq!(monitor.store().count(&ows).unwrap(), 3);

    let either = Query::new()
        .filter(Filter::eq("path", "/wms"))
        .or(Filter::eq("path", "/rest/layers"));
    assert_eq!(monitor.store().count(&either).unwrap(), 2);

    let bad = Query::new().filter(Filter::is_in("path", "/wms"));
    assert!(matches!(monitor.requests(&bad), Err(StoreError::Query(_))));
}

#[test]
fn test_history_bound_through_monitor() {
    let monitor = memory_monitor(MonitorConfig::default());
    let ids: Vec<i64> = (0..150)
        .map(|i| serve(&monitor, get(&format!("/r/{i}")), b"", 200).0.id())
        .collect();

    let all = monitor.store().get_requests().unwrap();
    assert_eq!(all.len(), 100);
    assert_eq!(all.iter().map(Record::id).collect::<Vec<_>>(), ids[50..].to_vec());
}

#[test]
fn test_live_mode_shows_in_flight_records() {
    let monitor = memory_monitor(MonitorConfig::default().with_mode(StorageMode::Live));
    let exchange = monitor.begin(get("/slow")).unwrap();

    let running = monitor
        .requests(&Query::new().filter(Filter::eq("status", RequestStatus::Running)))
        .unwrap();
    assert_eq!(running.len(), 1);

    let response = exchange.respond(io::sink());
    exchange.finish(&response).unwrap();
    let running = monitor
        .requests(&Query::new().filter(Filter::eq("status", RequestStatus::Running)))
        .unwrap();
    assert!(running.is_empty());
}

fn config_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reqwatch-it-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("monitor.json");
    fs::write(&path, content).unwrap();
    path
}

fn rewrite(path: &Path, content: &str) {
    let before = fs::metadata(path).unwrap().modified().unwrap();
    fs::write(path, content).unwrap();
    while fs::metadata(path).unwrap().modified().unwrap() == before {
        std::thread::sleep(Duration::from_millis(20));
        fs::write(path, content).unwrap();
    }
}

#[test]
fn test_body_limit_follows_config_reload() {
    let path = config_file("reload", r#"{"maxBodySize": 4}"#);
    let watcher = Arc::new(ConfigWatcher::watch(&path));
    let monitor = Monitor::open(&StoreRegistry::new(), watcher).unwrap();

    let (record, _) = serve(&monitor, get("/a"), b"0123456789", 200);
    assert_eq!(record.body, b"0123".to_vec());
    assert_eq!(record.body_content_length, 10);

    rewrite(&path, r#"{"maxBodySize": 0}"#);
    let (record, _) = serve(&monitor, get("/b"), b"0123456789", 200);
    assert!(record.body.is_empty());
    assert_eq!(record.body_content_length, 10);

    rewrite(&path, "{ not json");
    let (record, _) = serve(&monitor, get("/c"), b"0123456789", 200);
    assert!(record.body.is_empty());

    rewrite(&path, r#"{"maxBodySize": -1}"#);
    let (record, _) = serve(&monitor, get("/d"), b"0123456789", 200);
    assert_eq!(record.body, b"0123456789".to_vec());

    fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_unknown_storage_falls_back_to_memory() {
    let config = MonitorConfig::default().with_storage("jdbc");
    let monitor = Monitor::open(&StoreRegistry::new(), Arc::new(ConfigWatcher::fixed(config))).unwrap();
    assert_eq!(monitor.store().name(), "memory");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipelined_updates_per_client() {
    let queue: PipeliningTaskQueue<String> = PipeliningTaskQueue::with_config(
        tokio::runtime::Handle::current(),
        QueueConfig {
            workers: 4,
            poll_interval: Duration::from_millis(2),
        },
    );
    let seen: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    for client in ["alpha", "beta"] {
        for n in 0..5 {
            let seen = seen.clone();
            queue.execute(client.to_string(), async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                seen.lock().unwrap().push((client.to_string(), n));
            });
        }
    }
    queue.start();

    for _ in 0..1_000 {
        if queue.pending(&"alpha".to_string()) == 0 && queue.pending(&"beta".to_string()) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.stop();

    let seen = seen.lock().unwrap().clone();
    for client in ["alpha", "beta"] {
        let order: Vec<usize> = seen.iter().filter(|(c, _)| c == client).map(|(_, n)| *n).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}

#[test]
fn test_request_body_reads_pass_through() {
    let monitor = memory_monitor(MonitorConfig::default().with_max_body_size(3));
    let mut exchange = monitor.begin(RequestHead::new("POST", "/wfs")).unwrap();

    let mut reader = exchange.capture_body(Cursor::new(b"<Transaction/>".to_vec()));
    let mut seen = String::new();
    reader.read_to_string(&mut seen).unwrap();
    assert_eq!(seen, "<Transaction/>");
    exchange.record_body(&reader);

    let response = exchange.respond(io::sink());
    let (record, _) = exchange.finish(&response).unwrap();
    assert_eq!(record.body, b"<Tr".to_vec());
    assert_eq!(record.body_content_length, 14);
}

#[test]
fn test_query_json_keeps_meaning() {
    let config = MonitorConfig::default().with_bbox_mode(BboxMode::Full);
    let monitor = memory_monitor(config);
    for (service, bbox) in [("WMS", true), ("WFS", true), ("WCS", false)] {
        let mut exchange = monitor.begin(get("/ows")).unwrap();
        exchange.set_service(service, "RUNNING", None);
        if bbox {
            assert!(exchange.set_bbox([0.0, 0.0, 10.0, 10.0]));
        }
        let response = exchange.respond(io::sink());
        exchange.finish(&response).unwrap();
    }

    let query = Query::new()
        .filter(Filter::eq("category", "OWS"))
        .and(Filter::eq("operation", "RUNNING"))
        .and(Filter::neq("bbox", PropertyValue::Null))
        .sort("service", SortOrder::Desc);
    let direct = monitor.requests(&query).unwrap();

    let json = serde_json::to_string(&query).unwrap();
    let back: Query = serde_json::from_str(&json).unwrap();
    let read_back = monitor.requests(&back).unwrap();

    assert_eq!(direct.len(), 2);
    assert_eq!(direct, read_back);
    assert_eq!(
        direct[0].bbox.as_ref().map(|b| b.to_string()).as_deref(),
        Some("0,0,10,10 EPSG:4326")
    );
}
