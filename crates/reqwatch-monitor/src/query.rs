//! Query descriptors: filter, sort, paging and date range.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::filter::Filter;
use crate::property::{self, PropertyValue};
use crate::record::Record;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A request against a record store.
///
/// `properties`, `aggregates` and `group_by` are carried for backends that
/// can project and aggregate; the in-memory store ignores them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub filter: Option<Filter>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    pub offset: Option<usize>,
    pub count: Option<usize>,
    /// Inclusive lower bound on `startTime` (unix ms).
    pub from_date: Option<i64>,
    /// Inclusive upper bound on `startTime` (unix ms).
    pub to_date: Option<i64>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub aggregates: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the filter.
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// ANDs `filter` onto the current filter.
    pub fn and(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter.into(),
        });
        self
    }

    /// ORs `filter` onto the current filter.
    pub fn or(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.or(filter),
            None => filter.into(),
        });
        self
    }

    pub fn sort(mut self, property: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(property.into());
        self.sort_order = order;
        self
    }

    pub fn page(mut self, offset: usize, count: usize) -> Self {
        self.offset = Some(offset);
        self.count = Some(count);
        self
    }

    pub fn between(mut self, from: i64, to: i64) -> Self {
        self.from_date = Some(from);
        self.to_date = Some(to);
        self
    }

    pub fn from_date(mut self, from: i64) -> Self {
        self.from_date = Some(from);
        self
    }

    pub fn to_date(mut self, to: i64) -> Self {
        self.to_date = Some(to);
        self
    }

    pub fn properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn aggregate<I, S>(mut self, aggregates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregates = aggregates.into_iter().map(Into::into).collect();
        self
    }

    pub fn group<I, S>(mut self, group_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = group_by.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_date_range(&self) -> bool {
        self.from_date.is_some() || self.to_date.is_some()
    }

    pub fn has_page(&self) -> bool {
        self.offset.is_some() || self.count.is_some()
    }

    /// Whether `record` starts inside the date range (inclusive).
    pub fn in_date_range(&self, record: &Record) -> bool {
        self.from_date.is_none_or(|from| record.start_time >= from)
            && self.to_date.is_none_or(|to| record.start_time <= to)
    }

    /// Evaluates the query over `records` (in store order): filter and date
    /// range in one pass, then the page window, then sorting.
    pub fn apply(&self, records: Vec<Record>) -> Result<Vec<Record>, QueryError> {
        let mut matched = Vec::with_capacity(records.len());
        for record in records {
            if let Some(filter) = &self.filter {
                if !filter.matches(&record)? {
                    continue;
                }
            }
            if self.has_date_range() && !self.in_date_range(&record) {
                continue;
            }
            matched.push(record);
        }

        if self.has_page() {
            let offset = self.offset.unwrap_or(0);
            let count = self.count.unwrap_or(usize::MAX);
            matched = matched.into_iter().skip(offset).take(count).collect();
        }

        if let Some(name) = &self.sort_by {
            sort_by_property(&mut matched, name, self.sort_order)?;
        } else if self.has_date_range() {
            sort_by_property(&mut matched, "startTime", SortOrder::Desc)?;
        }

        Ok(matched)
    }
}

/// Places unset values after set ones, then applies the direction. Under
/// `Desc` the reversal therefore moves unset values to the front.
fn compare_keys(a: &PropertyValue, b: &PropertyValue, order: SortOrder) -> Ordering {
    let ordering = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    };
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Stable sort on a named property. Fails when the property is unknown or
/// its values cannot be ordered against each other.
pub fn sort_by_property(records: &mut Vec<Record>, name: &str, order: SortOrder) -> Result<(), QueryError> {
    let get = property::getter(name).ok_or_else(|| QueryError::UnknownProperty(name.to_string()))?;

    let mut keyed: Vec<(PropertyValue, Record)> = records.drain(..).map(|r| (get(&r), r)).collect();

    let mut first: Option<&PropertyValue> = None;
    for (key, _) in &keyed {
        if key.is_null() {
            continue;
        }
        if !key.is_orderable() {
            return Err(QueryError::NotOrderable(name.to_string()));
        }
        match first {
            Some(f) => {
                f.compare(key)?;
            }
            None => first = Some(key),
        }
    }

    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, order));
    records.extend(keyed.into_iter().map(|(_, r)| r));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;

    fn records(n: i64) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record::started_at(1_000 + i);
                r.assign_id(i + 1);
                r
            })
            .collect()
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(Record::id).collect()
    }

    #[test]
    fn test_page_window() {
        let result = Query::new().page(2, 3).apply(records(10)).unwrap();
        assert_eq!(ids(&result), vec![3, 4, 5]);
    }

    #[test]
    fn test_page_past_end() {
        let result = Query::new().page(8, 5).apply(records(10)).unwrap();
        assert_eq!(ids(&result), vec![9, 10]);
    }

    #[test]
    fn test_sort_descending() {
        let result = Query::new()
            .sort("startTime", SortOrder::Desc)
            .apply(records(4))
            .unwrap();
        assert_eq!(ids(&result), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_paging_happens_before_sorting() {
        let result = Query::new()
            .sort("startTime", SortOrder::Desc)
            .page(0, 2)
            .apply(records(4))
            .unwrap();
        assert_eq!(ids(&result), vec![2, 1]);
    }

    #[test]
    fn test_nulls_last_ascending_first_descending() {
        let mut rs = records(3);
        rs[0].response_status = Some(500);
        rs[2].response_status = Some(200);

        let asc = Query::new()
            .sort("responseStatus", SortOrder::Asc)
            .apply(rs.clone())
            .unwrap();
        assert_eq!(ids(&asc), vec![3, 1, 2]);

        let desc = Query::new()
            .sort("responseStatus", SortOrder::Desc)
            .apply(rs)
            .unwrap();
        assert_eq!(ids(&desc), vec![2, 1, 3]);
    }

    #[test]
    fn test_date_range_inclusive_and_sorted_descending() {
        let result = Query::new().between(1_002, 1_005).apply(records(10)).unwrap();
        assert_eq!(ids(&result), vec![6, 5, 4, 3]);
    }

    #[test]
    fn test_open_ended_date_range() {
        let result = Query::new().from_date(1_008).apply(records(10)).unwrap();
        assert_eq!(ids(&result), vec![10, 9]);
    }

    #[test]
    fn test_filter_then_sort() {
        let result = Query::new()
            .filter(Filter::gte("startTime", 1_005))
            .and(Filter::lt("startTime", 1_008))
            .sort("id", SortOrder::Desc)
            .apply(records(10))
            .unwrap();
        assert_eq!(ids(&result), vec![8, 7, 6]);
    }

    #[test]
    fn test_sort_on_list_property_fails() {
        let mut rs = records(2);
        rs[0].resources = vec!["a".into()];
        let err = Query::new()
            .sort("resources", SortOrder::Asc)
            .apply(rs)
            .unwrap_err();
        assert_eq!(err, QueryError::NotOrderable("resources".into()));
    }

    #[test]
    fn test_sort_unknown_property_fails() {
        let err = Query::new()
            .sort("nope", SortOrder::Asc)
            .apply(records(2))
            .unwrap_err();
        assert_eq!(err, QueryError::UnknownProperty("nope".into()));
    }

    #[test]
    fn test_minimal_query_json() {
        let query: Query = serde_json::from_str(
            r#"{"filter":{"comparison":{"left":{"property":"startTime"},"right":{"literal":1003},"op":"GTE"}},
                "sortBy":"id"}"#,
        )
        .unwrap();
        assert_eq!(query.sort_order, SortOrder::Asc);
        assert!(query.properties.is_empty());
        assert_eq!(ids(&query.apply(records(5)).unwrap()), vec![4, 5]);

        let empty: Query = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Query::new());
    }

    #[test]
    fn test_query_or_builds_composite() {
        let query = Query::new()
            .filter(Filter::eq("path", "/a"))
            .or(Filter::eq("path", "/b"))
            .or(Filter::eq("path", "/c"));
        assert_eq!(
            query.filter.unwrap().composite().map(|(_, c)| c.len()),
            Some(3)
        );
    }
}
