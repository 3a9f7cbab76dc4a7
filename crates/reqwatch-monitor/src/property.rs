//! Named record properties used by filters and sorting.
//!
//! Queries address record fields by their camelCase name. Each name maps to
//! a plain getter in a table built once on first use.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::record::{Record, RequestCategory, RequestStatus};

/// A record property value, or a literal compared against one.
///
/// Serialized literals carry no kind tag, so every JSON string reads back as
/// `Text`. Comparisons match `Text` against `Status` and `Category` by wire
/// name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Status(RequestStatus),
    Category(RequestCategory),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Status(_) => "status",
            PropertyValue::Category(_) => "category",
            PropertyValue::Text(_) => "text",
            PropertyValue::List(_) => "list",
        }
    }

    pub fn is_orderable(&self) -> bool {
        !matches!(self, PropertyValue::Null | PropertyValue::List(_))
    }

    /// Total order over values of the same kind. Ints and floats compare
    /// numerically with each other.
    pub fn compare(&self, other: &PropertyValue) -> Result<Ordering, QueryError> {
        use PropertyValue::*;

        match (self, other) {
            (Int(a), Int(b)) => Ok(a.cmp(b)),
            (Float(a), Float(b)) => Ok(a.total_cmp(b)),
            (Int(a), Float(b)) => Ok((*a as f64).total_cmp(b)),
            (Float(a), Int(b)) => Ok(a.total_cmp(&(*b as f64))),
            (Text(a), Text(b)) => Ok(a.cmp(b)),
            (Bool(a), Bool(b)) => Ok(a.cmp(b)),
            (Status(a), Status(b)) => Ok(a.cmp(b)),
            (Category(a), Category(b)) => Ok(a.cmp(b)),
            (Status(a), Text(b)) => match RequestStatus::parse(b) {
                Some(b) => Ok(a.cmp(&b)),
                None => Err(self.incomparable(other)),
            },
            (Text(a), Status(b)) => match RequestStatus::parse(a) {
                Some(a) => Ok(a.cmp(b)),
                None => Err(self.incomparable(other)),
            },
            (Category(a), Text(b)) => match RequestCategory::parse(b) {
                Some(b) => Ok(a.cmp(&b)),
                None => Err(self.incomparable(other)),
            },
            (Text(a), Category(b)) => match RequestCategory::parse(a) {
                Some(a) => Ok(a.cmp(b)),
                None => Err(self.incomparable(other)),
            },
            _ => Err(self.incomparable(other)),
        }
    }

    /// Equality used by `EQ`, `NEQ` and `IN`. Numbers compare by value,
    /// statuses and categories match their wire name.
    pub fn equals(&self, other: &PropertyValue) -> bool {
        use PropertyValue::*;

        match (self, other) {
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
            (Status(s), Text(t)) | (Text(t), Status(s)) => {
                RequestStatus::parse(t).is_some_and(|t| t == *s)
            }
            (Category(c), Text(t)) | (Text(t), Category(c)) => {
                RequestCategory::parse(t).is_some_and(|t| t == *c)
            }
            (List(a), List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y)),
            _ => self == other,
        }
    }

    fn incomparable(&self, other: &PropertyValue) -> QueryError {
        QueryError::Incomparable {
            left: self.kind().to_string(),
            right: other.kind().to_string(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Status(s) => write!(f, "{}", s.as_str()),
            PropertyValue::Category(c) => write!(f, "{}", c.as_str()),
            PropertyValue::Text(s) => write!(f, "{s}"),
            PropertyValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<RequestStatus> for PropertyValue {
    fn from(v: RequestStatus) -> Self {
        PropertyValue::Status(v)
    }
}

impl From<RequestCategory> for PropertyValue {
    fn from(v: RequestCategory) -> Self {
        PropertyValue::Category(v)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PropertyValue::Null)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(v: Vec<T>) -> Self {
        PropertyValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Reads one property off a record.
pub type Getter = fn(&Record) -> PropertyValue;

fn text(v: &Option<String>) -> PropertyValue {
    v.clone().into()
}

static PROPERTIES: LazyLock<HashMap<&'static str, Getter>> = LazyLock::new(|| {
    let entries: [(&'static str, Getter); 36] = [
        ("id", |r: &Record| r.id().into()),
        ("status", |r: &Record| r.status().into()),
        ("category", |r: &Record| r.category.into()),
        ("startTime", |r: &Record| r.start_time.into()),
        ("endTime", |r: &Record| r.end_time.into()),
        ("totalTime", |r: &Record| r.total_time.into()),
        ("path", |r: &Record| text(&r.path)),
        ("queryString", |r: &Record| text(&r.query_string)),
        ("httpMethod", |r: &Record| text(&r.http_method)),
        ("body", |r: &Record| String::from_utf8_lossy(&r.body).into_owned().into()),
        ("bodyContentLength", |r: &Record| r.body_content_length.into()),
        ("bodyContentType", |r: &Record| text(&r.body_content_type)),
        ("remoteAddr", |r: &Record| text(&r.remote_addr)),
        ("remoteHost", |r: &Record| text(&r.remote_host)),
        ("remoteUser", |r: &Record| text(&r.remote_user)),
        ("remoteUserAgent", |r: &Record| text(&r.remote_user_agent)),
        ("httpReferer", |r: &Record| text(&r.http_referer)),
        ("host", |r: &Record| text(&r.host)),
        ("internalHost", |r: &Record| text(&r.internal_host)),
        ("service", |r: &Record| text(&r.service)),
        ("operation", |r: &Record| text(&r.operation)),
        ("subOperation", |r: &Record| text(&r.sub_operation)),
        ("owsVersion", |r: &Record| text(&r.ows_version)),
        ("responseStatus", |r: &Record| r.response_status.into()),
        ("responseContentType", |r: &Record| text(&r.response_content_type)),
        ("responseLength", |r: &Record| r.response_length.into()),
        ("errorMessage", |r: &Record| text(&r.error_message)),
        ("remoteCountry", |r: &Record| text(&r.remote_country)),
        ("remoteCity", |r: &Record| text(&r.remote_city)),
        ("remoteLat", |r: &Record| r.remote_lat.into()),
        ("remoteLon", |r: &Record| r.remote_lon.into()),
        ("cacheResult", |r: &Record| text(&r.cache_result)),
        ("missReason", |r: &Record| text(&r.miss_reason)),
        ("resources", |r: &Record| r.resources.clone().into()),
        ("bodyTruncated", |r: &Record| r.body_truncated().into()),
        ("bbox", |r: &Record| r.bbox.as_ref().map(|b| b.to_string()).into()),
    ];
    entries.into_iter().collect()
});

/// Looks up the getter registered for `name`.
pub fn getter(name: &str) -> Option<Getter> {
    PROPERTIES.get(name).copied()
}

/// Resolves property `name` on `record`.
pub fn resolve(record: &Record, name: &str) -> Result<PropertyValue, QueryError> {
    getter(name)
        .map(|get| get(record))
        .ok_or_else(|| QueryError::UnknownProperty(name.to_string()))
}

/// All queryable property names.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = PROPERTIES.keys().copied().collect();
    names.sort_unstable();
    names
}
