//! Glue between an inbound exchange and the lifecycle manager.

use std::fmt;
use std::io::{Read, Write};

use crate::capture::{CaptureReader, CaptureWriter};
use crate::config::{BboxMode, BodyLimit};
use crate::error::MonitorError;
use crate::monitor::{Monitor, MonitorContext};
use crate::record::{now_ms, BoundingBox, Record, RequestCategory, RequestStatus};

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Request line, headers and connection details of an inbound exchange.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: Vec<(String, String)>,
    pub remote_addr: Option<String>,
    pub remote_user: Option<String>,
    /// Host name the server answers on.
    pub host: Option<String>,
}

impl RequestHead {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = Some(user.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Originating client address: the first `X-Forwarded-For` hop when a
    /// proxy supplied one, else the socket peer.
    pub fn client_addr(&self) -> Option<String> {
        self.header("X-Forwarded-For")
            .and_then(|forwarded| forwarded.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_string)
            .or_else(|| self.remote_addr.clone())
    }
}

/// What enrichers may inspect about a completed exchange.
#[derive(Debug, Clone, Default)]
pub struct ExchangeSnapshot {
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub remote_addr: Option<String>,
    pub response_status: u16,
}

impl ExchangeSnapshot {
    pub fn request_header(&self, name: &str) -> Option<&str> {
        find_header(&self.request_headers, name)
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        find_header(&self.response_headers, name)
    }
}

/// One monitored exchange, from [`Monitor::begin`] to [`Exchange::finish`]
/// or [`Exchange::fail`].
///
/// Dropping an exchange that was never finished completes its record as
/// `INTERRUPTED`.
pub struct Exchange<'m> {
    monitor: &'m Monitor,
    ctx: MonitorContext,
    request_headers: Vec<(String, String)>,
    limit: BodyLimit,
    bbox_mode: BboxMode,
    bbox_crs: String,
}

impl Monitor {
    /// Starts monitoring an exchange and fills the record from `head`.
    pub fn begin(&self, head: RequestHead) -> Result<Exchange<'_>, MonitorError> {
        let config = self.config();
        let limit = config.body_limit();
        let mut ctx = MonitorContext::new();
        let remote_addr = head.client_addr();

        let record = self.start(&mut ctx)?;
        record.http_method = Some(head.method.clone());
        record.path = Some(head.path.clone());
        record.query_string = head.query_string.clone();
        record.remote_host = remote_addr.clone();
        record.remote_addr = remote_addr;
        record.remote_user = head.remote_user.clone();
        record.remote_user_agent = head.header("User-Agent").map(str::to_string);
        record.http_referer = head.header("Referer").map(str::to_string);
        record.body_content_type = head.header("Content-Type").map(str::to_string);
        record.host = head
            .host
            .clone()
            .or_else(|| head.header("Host").map(str::to_string));
        record.set_status(RequestStatus::Running);

        self.started(&ctx)?;
        self.update(&ctx)?;

        Ok(Exchange {
            monitor: self,
            ctx,
            request_headers: head.headers,
            limit,
            bbox_mode: config.bbox_mode,
            bbox_crs: config.bbox_crs,
        })
    }
}

impl<'m> Exchange<'m> {
    pub fn record(&self) -> Option<&Record> {
        self.ctx.record()
    }

    pub fn record_mut(&mut self) -> Option<&mut Record> {
        self.ctx.record_mut()
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    pub fn set_category(&mut self, category: RequestCategory) {
        if let Some(record) = self.ctx.record_mut() {
            record.category = category;
        }
    }

    /// Records the service request this exchange dispatched to.
    pub fn set_service(
        &mut self,
        service: impl Into<String>,
        operation: impl Into<String>,
        version: Option<String>,
    ) {
        if let Some(record) = self.ctx.record_mut() {
            record.category = RequestCategory::Service;
            record.service = Some(service.into());
            record.operation = Some(operation.into());
            record.ows_version = version;
        }
    }

    pub fn add_resource(&mut self, resource: impl Into<String>) {
        if let Some(record) = self.ctx.record_mut() {
            record.resources.push(resource.into());
        }
    }

    /// Records the extent `[min_x, min_y, max_x, max_y]` the service request
    /// asked for, labelled with the configured CRS. Returns `false` when the
    /// bbox mode excludes this request: `none` never records and `no_wfs`
    /// skips WFS requests.
    pub fn set_bbox(&mut self, extent: [f64; 4]) -> bool {
        let Some(record) = self.ctx.record_mut() else {
            return false;
        };
        let capture = match self.bbox_mode {
            BboxMode::None => false,
            BboxMode::NoWfs => !record
                .service
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("WFS")),
            BboxMode::Full => true,
        };
        if !capture {
            return false;
        }
        let [min_x, min_y, max_x, max_y] = extent;
        record.bbox = Some(BoundingBox::new(min_x, min_y, max_x, max_y, self.bbox_crs.clone()));
        true
    }

    /// Publishes the record's current values.
    pub fn update(&self) -> Result<(), MonitorError> {
        self.monitor.update(&self.ctx)
    }

    /// Wraps the request body, buffering up to the configured size.
    pub fn capture_body<R: Read>(&self, reader: R) -> CaptureReader<R> {
        CaptureReader::new(reader, self.limit)
    }

    /// Copies what `reader` captured into the record.
    pub fn record_body<R>(&mut self, reader: &CaptureReader<R>) {
        if let Some(record) = self.ctx.record_mut() {
            record.body = reader.data().to_vec();
            record.body_content_length = reader.bytes_read();
        }
    }

    /// Wraps the response body.
    pub fn respond<W: Write>(&self, writer: W) -> CaptureWriter<W> {
        CaptureWriter::new(writer)
    }

    /// Completes the exchange as `FINISHED`.
    pub fn finish<W>(self, response: &CaptureWriter<W>) -> Result<(Record, ExchangeSnapshot), MonitorError> {
        self.close(response, RequestStatus::Finished, None)
    }

    /// Completes the exchange as `FAILED` with `error` as its message.
    pub fn fail<W>(
        self,
        response: &CaptureWriter<W>,
        error: impl fmt::Display,
    ) -> Result<(Record, ExchangeSnapshot), MonitorError> {
        self.close(response, RequestStatus::Failed, Some(error.to_string()))
    }

    fn close<W>(
        mut self,
        response: &CaptureWriter<W>,
        status: RequestStatus,
        error: Option<String>,
    ) -> Result<(Record, ExchangeSnapshot), MonitorError> {
        let record = self.ctx.record_mut().ok_or(MonitorError::NotStarted)?;
        record.response_status = Some(response.status());
        record.response_content_type = response.content_type().map(str::to_string);
        record.response_length = response.bytes_written();
        if error.is_some() {
            record.error_message = error;
        }
        record.finish(now_ms());
        record.set_status(status);

        let snapshot = ExchangeSnapshot {
            request_headers: std::mem::take(&mut self.request_headers),
            response_headers: response.headers().to_vec(),
            remote_addr: record.remote_addr.clone(),
            response_status: response.status(),
        };

        let record = self
            .monitor
            .complete(&mut self.ctx)
            .ok_or(MonitorError::NotStarted)?;
        Ok((record, snapshot))
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        let Some(record) = self.ctx.record_mut() else {
            return;
        };
        tracing::warn!(id = record.id(), "Exchange dropped before completion");
        record.finish(now_ms());
        record.set_status(RequestStatus::Interrupted);
        self.monitor.complete(&mut self.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BboxMode, ConfigWatcher, MonitorConfig, StorageMode};
    use crate::store::MemoryStore;
    use std::io::{self, Cursor};
    use std::sync::Arc;

    fn monitor(config: MonitorConfig) -> Monitor {
        Monitor::new(Arc::new(MemoryStore::new()), Arc::new(ConfigWatcher::fixed(config)))
    }

    fn head() -> RequestHead {
        RequestHead::new("POST", "/geoserver/wfs")
            .with_query("service=WFS")
            .with_header("User-Agent", "curl/8.0")
            .with_header("Content-Type", "text/xml")
            .with_header("Host", "maps.example.com")
            .with_remote_addr("10.0.0.5")
    }

    #[test]
    fn test_client_addr_prefers_forwarded_for() {
        let head = RequestHead::new("GET", "/")
            .with_remote_addr("10.0.0.1")
            .with_header("X-Forwarded-For", " 203.0.113.9, 10.0.0.1");
        assert_eq!(head.client_addr().as_deref(), Some("203.0.113.9"));
        assert_eq!(
            RequestHead::new("GET", "/").with_remote_addr("10.0.0.1").client_addr().as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_begin_fills_request_attributes() {
        let monitor = monitor(MonitorConfig::default());
        let exchange = monitor.begin(head()).unwrap();
        let record = exchange.record().unwrap();

        assert_eq!(record.status(), RequestStatus::Running);
        assert_eq!(record.http_method.as_deref(), Some("POST"));
        assert_eq!(record.query_string.as_deref(), Some("service=WFS"));
        assert_eq!(record.remote_addr.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.remote_user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(record.body_content_type.as_deref(), Some("text/xml"));
        assert_eq!(record.host.as_deref(), Some("maps.example.com"));
    }

    #[test]
    fn test_finish_copies_body_and_response() {
        let monitor = monitor(MonitorConfig::default().with_max_body_size(4));
        let mut exchange = monitor.begin(head()).unwrap();
        exchange.set_service("WFS", "GetFeature", Some("2.0.0".into()));
        exchange.add_resource("topp:states");

        let mut body = exchange.capture_body(Cursor::new(b"<GetFeature/>".to_vec()));
        io::copy(&mut body, &mut io::sink()).unwrap();
        exchange.record_body(&body);

        let mut response = exchange.respond(Vec::new());
        response.set_content_type("application/json");
        response.set_header("geowebcache-cache-result", "HIT");
        response.write_all(b"{}").unwrap();

        let (record, snapshot) = exchange.finish(&response).unwrap();
        assert_eq!(record.status(), RequestStatus::Finished);
        assert_eq!(record.body, b"<Get".to_vec());
        assert_eq!(record.body_content_length, 13);
        assert!(record.body_truncated());
        assert_eq!(record.response_status, Some(200));
        assert_eq!(record.response_length, 2);
        assert_eq!(record.response_content_type.as_deref(), Some("application/json"));
        assert_eq!(record.category, RequestCategory::Service);
        assert_eq!(record.resources, vec!["topp:states".to_string()]);
        assert_eq!(
            record.end_time.unwrap() - record.start_time,
            record.total_time.unwrap()
        );
        assert_eq!(snapshot.response_header("GeoWebCache-Cache-Result"), Some("HIT"));
        assert_eq!(snapshot.request_header("user-agent"), Some("curl/8.0"));

        let stored = monitor.request(record.id()).unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Finished);
    }

    #[test]
    fn test_fail_records_error() {
        let monitor = monitor(MonitorConfig::default());
        let exchange = monitor.begin(head()).unwrap();
        let mut response = exchange.respond(io::sink());
        response.send_error(500, Some("boom".into()));

        let (record, snapshot) = exchange.fail(&response, "renderer crashed").unwrap();
        assert_eq!(record.status(), RequestStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("renderer crashed"));
        assert_eq!(record.response_status, Some(500));
        assert_eq!(snapshot.response_status, 500);
    }

    fn bbox_for(config: MonitorConfig, service: &str) -> Option<BoundingBox> {
        let monitor = monitor(config);
        let mut exchange = monitor.begin(head()).unwrap();
        exchange.set_service(service, "GetMap", None);
        exchange.set_bbox([-130.0, 24.0, -66.0, 50.0]);
        let response = exchange.respond(io::sink());
        exchange.finish(&response).unwrap().0.bbox
    }

    #[test]
    fn test_bbox_skips_wfs_by_default() {
        let config = MonitorConfig::default();
        assert!(bbox_for(config.clone(), "WFS").is_none());

        let bbox = bbox_for(config, "WMS").unwrap();
        assert_eq!(bbox, BoundingBox::new(-130.0, 24.0, -66.0, 50.0, "EPSG:4326"));
    }

    #[test]
    fn test_bbox_full_and_none_modes() {
        let full = MonitorConfig::default()
            .with_bbox_mode(BboxMode::Full)
            .with_bbox_crs("EPSG:3857");
        assert_eq!(bbox_for(full.clone(), "wfs").map(|b| b.crs), Some("EPSG:3857".into()));
        assert!(bbox_for(full, "WCS").is_some());

        let none = MonitorConfig::default().with_bbox_mode(BboxMode::None);
        assert!(bbox_for(none.clone(), "WMS").is_none());
        assert!(bbox_for(none, "WCS").is_none());
    }

    #[test]
    fn test_dropped_exchange_is_interrupted() {
        let monitor = monitor(MonitorConfig::default().with_mode(StorageMode::Live));
        let id = {
            let exchange = monitor.begin(head()).unwrap();
            exchange.record().unwrap().id()
        };

        let stored = monitor.request(id).unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Interrupted);
        assert!(stored.total_time.is_some());
    }
}
