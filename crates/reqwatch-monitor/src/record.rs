//! Request record types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle status of a monitored request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    /// Created, dispatch has not begun.
    Waiting,
    /// Being dispatched.
    Running,
    /// Cancellation requested, not yet honoured.
    Cancelling,
    /// Ended with an error.
    Failed,
    /// Ended normally.
    Finished,
    /// Ended by cancellation.
    Cancelled,
    /// Ended because the worker was interrupted.
    Interrupted,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Waiting => "WAITING",
            RequestStatus::Running => "RUNNING",
            RequestStatus::Cancelling => "CANCELLING",
            RequestStatus::Failed => "FAILED",
            RequestStatus::Finished => "FINISHED",
            RequestStatus::Cancelled => "CANCELLED",
            RequestStatus::Interrupted => "INTERRUPTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Some(RequestStatus::Waiting),
            "RUNNING" => Some(RequestStatus::Running),
            "CANCELLING" => Some(RequestStatus::Cancelling),
            "FAILED" => Some(RequestStatus::Failed),
            "FINISHED" => Some(RequestStatus::Finished),
            "CANCELLED" => Some(RequestStatus::Cancelled),
            "INTERRUPTED" => Some(RequestStatus::Interrupted),
            _ => None,
        }
    }

    /// Terminal statuses are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Failed
                | RequestStatus::Finished
                | RequestStatus::Cancelled
                | RequestStatus::Interrupted
        )
    }
}

/// Kind of exchange a record describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequestCategory {
    /// Service-protocol request (map, feature, coverage services).
    #[serde(rename = "OWS")]
    Service,
    /// Administrative request.
    #[serde(rename = "REST")]
    Admin,
    #[default]
    #[serde(rename = "OTHER")]
    Other,
}

impl RequestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCategory::Service => "OWS",
            RequestCategory::Admin => "REST",
            RequestCategory::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OWS" => Some(RequestCategory::Service),
            "REST" => Some(RequestCategory::Admin),
            "OTHER" => Some(RequestCategory::Other),
            _ => None,
        }
    }
}

/// Spatial extent a service request asked for, labelled with the coordinate
/// reference system its ordinates are expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub crs: String,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: impl Into<String>) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs: crs.into(),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{} {}",
            self.min_x, self.min_y, self.max_x, self.max_y, self.crs
        )
    }
}

/// Metadata about one monitored request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Store-assigned identifier, `0` until assigned.
    id: i64,
    status: RequestStatus,
    pub category: RequestCategory,

    /// Unix timestamp (milliseconds) when the exchange started.
    pub start_time: i64,
    /// Unix timestamp (milliseconds) when the exchange ended.
    pub end_time: Option<i64>,
    /// `end_time - start_time` in milliseconds.
    pub total_time: Option<i64>,

    pub path: Option<String>,
    pub query_string: Option<String>,
    pub http_method: Option<String>,
    /// Captured request body, possibly truncated.
    pub body: Vec<u8>,
    /// Untruncated request body length.
    pub body_content_length: u64,
    pub body_content_type: Option<String>,
    pub remote_addr: Option<String>,
    pub remote_host: Option<String>,
    pub remote_user: Option<String>,
    pub remote_user_agent: Option<String>,
    pub http_referer: Option<String>,

    /// Public host name of the server that handled the exchange.
    pub host: Option<String>,
    pub internal_host: Option<String>,

    pub service: Option<String>,
    pub operation: Option<String>,
    pub sub_operation: Option<String>,
    pub ows_version: Option<String>,

    pub response_status: Option<u16>,
    pub response_content_type: Option<String>,
    /// Bytes actually written to the client.
    pub response_length: u64,
    pub error_message: Option<String>,

    // Filled by enrichers.
    pub remote_country: Option<String>,
    pub remote_city: Option<String>,
    pub remote_lat: Option<f64>,
    pub remote_lon: Option<f64>,
    pub cache_result: Option<String>,
    pub miss_reason: Option<String>,

    /// Resources (layers, collections) touched by the exchange.
    pub resources: Vec<String>,
    pub bbox: Option<BoundingBox>,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    /// Creates an unassigned record in `WAITING` status, started now.
    pub fn new() -> Self {
        Self::started_at(now_ms())
    }

    /// Creates an unassigned record with an explicit start timestamp.
    pub fn started_at(start_time: i64) -> Self {
        Self {
            id: 0,
            status: RequestStatus::Waiting,
            category: RequestCategory::default(),
            start_time,
            end_time: None,
            total_time: None,
            path: None,
            query_string: None,
            http_method: None,
            body: Vec::new(),
            body_content_length: 0,
            body_content_type: None,
            remote_addr: None,
            remote_host: None,
            remote_user: None,
            remote_user_agent: None,
            http_referer: None,
            host: None,
            internal_host: None,
            service: None,
            operation: None,
            sub_operation: None,
            ows_version: None,
            response_status: None,
            response_content_type: None,
            response_length: 0,
            error_message: None,
            remote_country: None,
            remote_city: None,
            remote_lat: None,
            remote_lon: None,
            cache_result: None,
            miss_reason: None,
            resources: Vec::new(),
            bbox: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Assigns the store identifier. Returns `false` (and leaves the id
    /// untouched) when an id was already assigned.
    pub fn assign_id(&mut self, id: i64) -> bool {
        if self.id != 0 {
            return false;
        }
        self.id = id;
        true
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Moves the record to `status`. A terminal status is final: the call is
    /// ignored and `false` returned when the record already terminated.
    pub fn set_status(&mut self, status: RequestStatus) -> bool {
        if self.status.is_terminal() && self.status != status {
            tracing::debug!(
                id = self.id,
                from = self.status.as_str(),
                to = status.as_str(),
                "Ignoring status change on terminated request"
            );
            return false;
        }
        self.status = status;
        true
    }

    /// Stamps the end time and derives the total time from it.
    pub fn finish(&mut self, end_time: i64) {
        self.end_time = Some(end_time);
        self.total_time = Some(end_time - self.start_time);
    }

    /// Whether the captured body is shorter than what the client sent.
    pub fn body_truncated(&self) -> bool {
        (self.body.len() as u64) < self.body_content_length
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = Record::started_at(1_700_000_000_000);
        assert_eq!(record.id(), 0);
        assert_eq!(record.status(), RequestStatus::Waiting);
        assert_eq!(record.category, RequestCategory::Other);
        assert!(record.end_time.is_none());
    }

    #[test]
    fn test_id_is_assigned_once() {
        let mut record = Record::new();
        assert!(record.assign_id(7));
        assert!(!record.assign_id(8));
        assert_eq!(record.id(), 7);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut record = Record::new();
        assert!(record.set_status(RequestStatus::Running));
        assert!(record.set_status(RequestStatus::Finished));
        assert!(!record.set_status(RequestStatus::Running));
        assert!(!record.set_status(RequestStatus::Failed));
        assert_eq!(record.status(), RequestStatus::Finished);
    }

    #[test]
    fn test_cancelling_precedes_cancelled() {
        let mut record = Record::new();
        record.set_status(RequestStatus::Running);
        assert!(record.set_status(RequestStatus::Cancelling));
        assert!(!record.status().is_terminal());
        assert!(record.set_status(RequestStatus::Cancelled));
        assert!(record.status().is_terminal());
    }

    #[test]
    fn test_finish_derives_total_time() {
        let mut record = Record::started_at(1_000);
        record.finish(1_250);
        assert_eq!(record.end_time, Some(1_250));
        assert_eq!(record.total_time, Some(250));
        assert_eq!(record.end_time.unwrap() - record.start_time, record.total_time.unwrap());
    }

    #[test]
    fn test_serializes_camel_case() {
        let record = Record::started_at(5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["startTime"], 5);
        assert_eq!(json["status"], "WAITING");
        assert_eq!(json["category"], "OTHER");
        assert!(json.get("queryString").is_some());
    }

    #[test]
    fn test_bbox_serializes_with_crs() {
        let mut record = Record::new();
        assert!(serde_json::to_value(&record).unwrap()["bbox"].is_null());

        record.bbox = Some(BoundingBox::new(-180.0, -90.0, 180.0, 90.0, "EPSG:4326"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["bbox"]["minX"], -180.0);
        assert_eq!(json["bbox"]["crs"], "EPSG:4326");
        assert_eq!(record.bbox.unwrap().to_string(), "-180,-90,180,90 EPSG:4326");
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(RequestCategory::parse("ows"), Some(RequestCategory::Service));
        assert_eq!(RequestCategory::parse("REST"), Some(RequestCategory::Admin));
        assert_eq!(RequestCategory::parse("WMS"), None);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(RequestStatus::parse("finished"), Some(RequestStatus::Finished));
        assert_eq!(RequestStatus::parse("bogus"), None);
    }
}
