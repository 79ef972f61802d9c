use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::ApiError;
use crate::filters::{FilterField, FilterSet, FilterValue, Lookup, Predicate};
use crate::geometry::{
    bbox_from_polygon, map_to_zone, polygon_from_json, GeometryError, Xyxy, Zone, DEFAULT_ZONE,
};
use crate::models::{
    meta_str, parse_datetime, AlarmLogRecord, EventKind, EventRecord, FeedbackState,
    SegmentRecord,
};

/// Items per page when the caller does not ask for a size
pub const DEFAULT_ITEMS_PER_PAGE: i64 = 15;

/// Severity applied to the alarm listing when no severity filter is given
pub const DEFAULT_MIN_SEVERITY: i64 = 2;

const NO_DELIVERY: &str = "Keine Zuordnung";

/// Inclusive `created_at` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Resolve the `from_date`/`to_date` query pair.
    ///
    /// `from` defaults to today 00:00 UTC and `to` to one day later. With
    /// `extend_end` the end moves one more day so that a plain end date is
    /// fully covered.
    pub fn resolve(
        from: Option<&str>,
        to: Option<&str>,
        extend_end: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        let from = match non_empty(from) {
            Some(raw) => parse_date_param("from_date", raw)?,
            None => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
        };
        let to = match non_empty(to) {
            Some(raw) => parse_date_param("to_date", raw)?,
            None => next_day("from_date", from)?,
        };
        let to = if extend_end { next_day("to_date", to)? } else { to };

        Ok(Self { from, to })
    }
}

fn next_day(name: &str, at: DateTime<Utc>) -> Result<DateTime<Utc>, ApiError> {
    at.checked_add_signed(Duration::days(1))
        .ok_or_else(|| ApiError::BadRequest(format!("{} is out of range", name)))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date_param(name: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_datetime(raw).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "invalid {} '{}', expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
            name, raw
        ))
    })
}

/// Page request after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub items_per_page: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, items_per_page: Option<i64>) -> Result<Self, ApiError> {
        let items_per_page = items_per_page.unwrap_or(DEFAULT_ITEMS_PER_PAGE);
        if items_per_page <= 0 {
            return Err(ApiError::BadRequest(format!(
                "items_per_page must be positive, got {}",
                items_per_page
            )));
        }

        Ok(Self {
            page: page.unwrap_or(1).max(1),
            items_per_page,
        })
    }

    pub fn pages(&self, total: usize) -> i64 {
        let total = total as i64;
        total / self.items_per_page + i64::from(total % self.items_per_page != 0)
    }

    /// Items of the requested page; empty past the end
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let start = (self.page - 1).saturating_mul(self.items_per_page);
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        items
            .into_iter()
            .skip(start)
            .take(self.items_per_page as usize)
            .collect()
    }
}

/// Paginated listing returned inside the success envelope
#[derive(Debug, Serialize)]
pub struct Collection<T> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub total_record: usize,
    pub filters: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event: Vec<EventKind>,
    pub pages: i64,
    pub items: Vec<T>,
}

impl<T> Collection<T> {
    pub fn new(
        items: Vec<T>,
        pagination: &Pagination,
        filters: Value,
        event: Vec<EventKind>,
    ) -> Self {
        let total_record = items.len();
        Self {
            kind: "collection",
            total_record,
            filters,
            event,
            pages: pagination.pages(total_record),
            items: pagination.slice(items),
        }
    }
}

/// Dashboard row for one alarm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmRow {
    pub event_uid: String,
    pub event: EventKind,
    pub event_name: &'static str,
    pub date: String,
    pub start: String,
    pub end: String,
    pub description: Option<String>,
    pub location: String,
    pub severity_level: i32,
    pub severity_flag: &'static str,
    pub image: Option<String>,
    pub image_id: Option<String>,
    pub delivery_id: String,
    pub timestamp: String,
    pub has_video: bool,
    pub ack_status: bool,
    #[serde(skip)]
    sort_key: DateTime<Utc>,
}

/// Event kinds selected by the `event` predicates; none or `all` selects every kind
pub fn select_events(filters: &FilterSet) -> Result<Vec<EventKind>, ApiError> {
    let mut requested = HashSet::new();
    for predicate in filters.for_field(FilterField::Event) {
        for name in predicate.text_values() {
            if name == "all" {
                return Ok(EventKind::ALL.to_vec());
            }
            let kind = EventKind::from_name(&name)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown event '{}'", name)))?;
            requested.insert(kind);
        }
    }

    if requested.is_empty() {
        return Ok(EventKind::ALL.to_vec());
    }

    Ok(EventKind::ALL
        .into_iter()
        .filter(|k| requested.contains(k))
        .collect())
}

/// Add `severity_level >= 2` unless the caller filters on severity
pub fn with_default_severity(filters: &FilterSet) -> FilterSet {
    let mut filters = filters.clone();
    if !filters.has_field(FilterField::SeverityLevel) {
        filters.insert(Predicate::new(
            FilterField::SeverityLevel,
            Lookup::Gte,
            vec![FilterValue::Int(DEFAULT_MIN_SEVERITY)],
        ));
    }
    filters
}

/// Traffic-light marker for a severity level
pub fn severity_flag(level: i32) -> &'static str {
    match level {
        0 => "🟩",
        1 => "🟨",
        2 => "🟧",
        3 => "🟥",
        _ => "",
    }
}

/// Delivery label, with the detection region as a hint
pub fn format_delivery(delivery_id: Option<&str>, region: Option<&str>) -> String {
    let delivery_id = delivery_id.filter(|d| !d.is_empty() && *d != "null");
    match (delivery_id, region) {
        (Some(id), Some(region)) => format!("{}: {}", id, region),
        (Some(id), None) => id.to_string(),
        (None, Some(region)) => format!("{}: [Schätzung {}]", NO_DELIVERY, region),
        (None, None) => NO_DELIVERY.to_string(),
    }
}

/// Shape one event row, or `None` when its feedback rejects it
pub fn build_row(
    kind: EventKind,
    record: &EventRecord,
    feedback: Option<&FeedbackState>,
    display_offset: Duration,
) -> Option<AlarmRow> {
    let (ack_status, severity_level) = match feedback {
        Some(fb) if !fb.ack_status => return None,
        Some(fb) => (true, fb.rating),
        None => (false, record.severity_level),
    };

    let region = record.meta_str("region");
    let local = record.timestamp + display_offset;
    let time = local.format("%H:%M:%S").to_string();

    Some(AlarmRow {
        event_uid: record.event_uid.clone(),
        event: kind,
        event_name: kind.display_name(),
        date: local.format("%Y-%m-%d").to_string(),
        start: time.clone(),
        end: time,
        description: record.meta_str("description").map(str::to_string),
        location: format!("~{}", region.unwrap_or(DEFAULT_ZONE)),
        severity_level,
        severity_flag: severity_flag(severity_level),
        image: record.img_file.clone(),
        image_id: record.img_id.clone(),
        delivery_id: format_delivery(record.delivery_id.as_deref(), region),
        timestamp: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        has_video: kind.has_video(),
        ack_status,
        sort_key: record.timestamp,
    })
}

/// Merge per-kind results into one list, newest first.
///
/// Groups are expected in query order with each group newest first; the
/// first row seen for an `event_uid` wins.
pub fn merge_events(
    groups: Vec<(EventKind, Vec<EventRecord>)>,
    feedback: &HashMap<String, FeedbackState>,
    display_offset: Duration,
) -> Vec<AlarmRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for (kind, records) in groups {
        for record in records {
            if !seen.insert(record.event_uid.clone()) {
                continue;
            }
            if let Some(row) = build_row(
                kind,
                &record,
                feedback.get(&record.event_uid),
                display_offset,
            ) {
                rows.push(row);
            }
        }
    }

    // stable: ties keep impurity, dust, hotspot order
    rows.sort_by(|a, b| b.sort_key.cmp(&a.sort_key));
    rows
}

/// Row of the alarm log listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmLogRow {
    pub date: String,
    pub start: String,
    pub end: String,
    pub location: Option<String>,
    pub event: String,
    pub severity_level: i32,
}

/// Times are the row's `created_at` in UTC
pub fn log_row(record: &AlarmLogRecord) -> AlarmLogRow {
    let time = record.created_at.format("%H:%M:%S").to_string();

    AlarmLogRow {
        date: record.created_at.format("%Y-%m-%d").to_string(),
        start: time.clone(),
        end: time,
        location: meta_str(&record.meta_info, "location").map(str::to_string),
        event: record.event.clone(),
        severity_level: record.severity_level,
    }
}

/// Row of the per-kind event listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventListRow {
    pub event_uid: String,
    pub severity_level: i32,
    pub timestamp: DateTime<Utc>,
    pub image: Option<String>,
    pub image_id: Option<String>,
    pub delivery_id: Option<String>,
    pub description: Option<String>,
}

impl From<EventRecord> for EventListRow {
    fn from(record: EventRecord) -> Self {
        let description = record.meta_str("description").map(str::to_string);
        Self {
            event_uid: record.event_uid,
            severity_level: record.severity_level,
            timestamp: record.created_at,
            image: record.img_file,
            image_id: record.img_id,
            delivery_id: record.delivery_id,
            description,
        }
    }
}

/// Row of the segment listing with its bounding box and region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentRow {
    pub object_uid: String,
    pub timestamp: DateTime<Utc>,
    pub object_length: f64,
    pub object_area: f64,
    pub xyn: Vec<[f64; 2]>,
    pub xyxyn: Xyxy,
    pub region: String,
}

pub fn segment_row(record: SegmentRecord, zones: &[Zone]) -> Result<SegmentRow, GeometryError> {
    let xyn = polygon_from_json(&record.object_polygon)?;
    let xyxyn = bbox_from_polygon(&xyn)?;
    let region = map_to_zone(&xyxyn, zones).to_string();

    Ok(SegmentRow {
        object_uid: record.object_uid,
        timestamp: record.timestamp,
        object_length: record.object_length,
        object_area: record.object_area,
        xyn,
        xyxyn,
        region,
    })
}
