use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::fmt;

use crate::error::StoreError;

/// Alarm-producing event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Impurity,
    Dust,
    Hotspot,
}

impl EventKind {
    /// Kinds in the order they are queried and merged
    pub const ALL: [EventKind; 3] = [EventKind::Impurity, EventKind::Dust, EventKind::Hotspot];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "impurity" => Some(EventKind::Impurity),
            "dust" => Some(EventKind::Dust),
            "hotspot" => Some(EventKind::Hotspot),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Impurity => "impurity",
            EventKind::Dust => "dust",
            EventKind::Hotspot => "hotspot",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EventKind::Impurity => "waste_impurity",
            EventKind::Dust => "waste_dust",
            EventKind::Hotspot => "waste_hotspot",
        }
    }

    /// Dashboard label
    pub fn display_name(&self) -> &'static str {
        match self {
            EventKind::Impurity => "Störstoff",
            EventKind::Dust => "Staub",
            EventKind::Hotspot => "Hotspot",
        }
    }

    /// Only impurities are recorded with a video clip
    pub fn has_video(&self) -> bool {
        matches!(self, EventKind::Impurity)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Columns shared by the impurity, dust and hotspot tables
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub event_uid: String,
    pub delivery_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confidence_score: f64,
    pub severity_level: i32,
    pub img_id: Option<String>,
    pub img_file: Option<String>,
    pub model_name: Option<String>,
    pub model_tag: Option<String>,
    pub meta_info: Value,
}

impl EventRecord {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        meta_str(&self.meta_info, key)
    }
}

/// Latest feedback state of an event
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FeedbackState {
    pub event_uid: String,
    pub ack_status: bool,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

/// Stored feedback row for one (event_uid, user_id) pair
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FeedbackRecord {
    pub id: i64,
    pub event_uid: String,
    pub event: String,
    pub user_id: Option<String>,
    pub ack_status: bool,
    pub comment: Option<String>,
    pub rating: i32,
    pub meta_info: Value,
}

/// Feedback submitted by a dashboard user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackRequest {
    pub user_id: Option<String>,
    pub comment: Option<String>,
    pub rating: Option<i32>,
    pub meta_info: Option<Value>,
    pub ack_status: Option<bool>,
}

/// Row of the denormalized alarm table
#[derive(Debug, Clone, FromRow)]
pub struct AlarmLogRecord {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub severity_level: i32,
    pub meta_info: Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct SegmentRecord {
    pub object_uid: String,
    pub timestamp: DateTime<Utc>,
    pub object_length: f64,
    pub object_area: f64,
    pub object_polygon: Value,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlantInfo {
    pub id: i64,
    pub plant_id: String,
    pub plant_name: String,
    pub plant_location: Option<String>,
}

/// Segment detected by an edge box but not yet assigned to an impurity
#[derive(Debug, Clone, FromRow)]
pub struct SegmentRef {
    pub id: i64,
    pub object_tracker_id: i64,
    pub object_polygon: Value,
}

/// Tracked-object batch from an edge box
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentsPayload {
    #[serde(rename = "EDGE_BOX_ID", default)]
    pub edge_box_id: Option<String>,
    pub object_uid: Vec<String>,
    pub object_tracker_id: Vec<i64>,
    pub object_polygon: Vec<Vec<[f64; 2]>>,
    pub confidence_score: Vec<f64>,
    pub object_area: Vec<f64>,
    pub object_length: Vec<f64>,
    #[serde(default)]
    pub event_uid: Option<String>,
    #[serde(default)]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub img_id: Option<String>,
    #[serde(default)]
    pub img_file: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_tag: Option<String>,
    #[serde(default)]
    pub meta_info: Map<String, Value>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl SegmentsPayload {
    pub fn validate(&self) -> Result<(), StoreError> {
        let n = self.object_uid.len();
        let lengths = [
            ("object_tracker_id", self.object_tracker_id.len()),
            ("object_polygon", self.object_polygon.len()),
            ("confidence_score", self.confidence_score.len()),
            ("object_area", self.object_area.len()),
            ("object_length", self.object_length.len()),
        ];

        if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != n) {
            return Err(StoreError::Validation(format!(
                "{} has {} entries, object_uid has {}",
                name, len, n
            )));
        }

        let outside = self
            .object_polygon
            .iter()
            .flatten()
            .flatten()
            .find(|c| !(0.0..=1.0).contains(*c));
        match outside {
            Some(value) => Err(StoreError::Validation(format!(
                "object_polygon coordinate {} is outside [0, 1]",
                value
            ))),
            None => Ok(()),
        }
    }
}

/// Problematic objects flagged on previously reported segments
#[derive(Debug, Clone, Deserialize)]
pub struct ImpurityPayload {
    #[serde(rename = "EDGE_BOX_ID", default)]
    pub edge_box_id: Option<String>,
    pub object_uid: Vec<String>,
    pub confidence_score: Vec<f64>,
    pub severity_level: Vec<i32>,
    #[serde(default)]
    pub event_uid: Option<String>,
    #[serde(default)]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub img_id: Option<String>,
    #[serde(default)]
    pub img_file: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_tag: Option<String>,
    #[serde(default)]
    pub meta_info: Map<String, Value>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ImpurityPayload {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.object_uid.is_empty() {
            return Err(StoreError::Validation("object_uid is empty".to_string()));
        }
        if self.confidence_score.len() != self.object_uid.len()
            || self.severity_level.len() != self.object_uid.len()
        {
            return Err(StoreError::Validation(format!(
                "object_uid, confidence_score and severity_level lengths differ ({}, {}, {})",
                self.object_uid.len(),
                self.confidence_score.len(),
                self.severity_level.len()
            )));
        }
        Ok(())
    }

    /// Event uid for the object at `index`; a batch without one uses the object uid
    pub fn event_uid_for(&self, index: usize) -> &str {
        self.event_uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .unwrap_or(&self.object_uid[index])
    }
}

/// Single dust or hotspot measurement
#[derive(Debug, Clone, Deserialize)]
pub struct ScalarEventPayload {
    #[serde(rename = "EDGE_BOX_ID", default)]
    pub edge_box_id: Option<String>,
    #[serde(default)]
    pub event_uid: Option<String>,
    #[serde(default)]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub severity_level: i32,
    #[serde(default)]
    pub img_id: Option<String>,
    #[serde(default)]
    pub img_file: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_tag: Option<String>,
    #[serde(default)]
    pub meta_info: Map<String, Value>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ScalarEventPayload {
    pub fn validate(&self) -> Result<(), StoreError> {
        match self.event_uid.as_deref() {
            Some(uid) if !uid.is_empty() => Ok(()),
            _ => Err(StoreError::Validation("event_uid is required".to_string())),
        }
    }

    pub fn event_uid(&self) -> &str {
        self.event_uid.as_deref().unwrap_or_default()
    }
}

/// Parse a timestamp in any of the accepted API formats, interpreted as UTC
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Utc::now()),
        Some(raw) => parse_datetime(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw))),
    }
}

/// String field of a `meta_info` object
pub fn meta_str<'a>(meta_info: &'a Value, key: &str) -> Option<&'a str> {
    meta_info
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::from_name("dust"), Some(EventKind::Dust));
        assert_eq!(EventKind::from_name("all"), None);
        assert_eq!(EventKind::Impurity.table(), "waste_impurity");
        assert_eq!(EventKind::Impurity.display_name(), "Störstoff");
        assert!(EventKind::Impurity.has_video());
        assert!(!EventKind::Hotspot.has_video());
        assert_eq!(serde_json::to_value(EventKind::Hotspot).unwrap(), json!("hotspot"));
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_datetime("2024-03-01T12:30:00"), Some(expected));
        assert_eq!(parse_datetime("2024-03-01T14:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_datetime("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("01.03.2024"), None);
    }

    #[test]
    fn test_scalar_payload_requires_event_uid() {
        let payload: ScalarEventPayload = serde_json::from_value(json!({
            "EDGE_BOX_ID": "box-1",
            "severity_level": 2,
            "timestamp": "2024-03-01 12:30:00"
        }))
        .unwrap();
        assert!(matches!(payload.validate(), Err(StoreError::Validation(_))));

        let payload: ScalarEventPayload = serde_json::from_value(json!({
            "event_uid": "dust-1",
            "meta_info": {"region": "Tor06"}
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
        assert_eq!(payload.edge_box_id, None);
        assert_eq!(payload.severity_level, 0);
    }

    #[test]
    fn test_invalid_timestamp_fails_decode() {
        let result: Result<ScalarEventPayload, _> = serde_json::from_value(json!({
            "event_uid": "dust-1",
            "timestamp": "yesterday"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_segments_payload_length_mismatch() {
        let payload: SegmentsPayload = serde_json::from_value(json!({
            "object_uid": ["a", "b"],
            "object_tracker_id": [1, 2],
            "object_polygon": [[[0.1, 0.1], [0.2, 0.2]], [[0.3, 0.3]]],
            "confidence_score": [0.9],
            "object_area": [1.0, 2.0],
            "object_length": [1.0, 2.0]
        }))
        .unwrap();

        match payload.validate() {
            Err(StoreError::Validation(msg)) => assert!(msg.contains("confidence_score")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_segments_payload_rejects_unnormalized_polygon() {
        let payload: SegmentsPayload = serde_json::from_value(json!({
            "object_uid": ["a"],
            "object_tracker_id": [1],
            "object_polygon": [[[0.1, 0.1], [1e300, 0.2], [0.3, 0.3]]],
            "confidence_score": [0.9],
            "object_area": [1.0],
            "object_length": [1.0]
        }))
        .unwrap();

        match payload.validate() {
            Err(StoreError::Validation(msg)) => assert!(msg.contains("outside [0, 1]")),
            other => panic!("unexpected result: {:?}", other),
        }

        let mut valid = payload.clone();
        valid.object_polygon = vec![vec![[0.0, 0.0], [1.0, 0.5], [0.5, 1.0]]];
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_impurity_payload() {
        let payload: ImpurityPayload = serde_json::from_value(json!({
            "EDGE_BOX_ID": "box-1",
            "object_uid": ["obj-1", "obj-2"],
            "confidence_score": [0.8, 0.7],
            "severity_level": [2, 3],
            "timestamp": "2024-03-01 12:30:00"
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
        assert_eq!(payload.event_uid_for(1), "obj-2");

        let bad = ImpurityPayload {
            severity_level: vec![2],
            ..payload
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_meta_str() {
        let meta = json!({"region": "Tor06", "description": ""});
        assert_eq!(meta_str(&meta, "region"), Some("Tor06"));
        assert_eq!(meta_str(&meta, "description"), None);
        assert_eq!(meta_str(&Value::Null, "region"), None);
    }
}
