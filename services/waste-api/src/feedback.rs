use serde_json::{Map, Value};

use crate::models::{FeedbackRecord, FeedbackRequest};

/// Column values to write for a feedback upsert
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackWrite {
    pub ack_status: bool,
    pub comment: Option<String>,
    pub rating: i32,
    pub meta_info: Value,
}

fn request_comment(request: &FeedbackRequest) -> Option<&str> {
    request.comment.as_deref().filter(|c| !c.is_empty())
}

fn request_rating(request: &FeedbackRequest) -> Option<i32> {
    request.rating.filter(|r| *r != 0)
}

fn request_meta(request: &FeedbackRequest) -> Option<&Value> {
    request
        .meta_info
        .as_ref()
        .filter(|m| m.as_object().is_some_and(|o| !o.is_empty()))
}

/// Apply a request on top of an existing feedback row.
///
/// Absent, empty or zero request fields leave the stored value untouched.
pub fn merge_existing(existing: &FeedbackRecord, request: &FeedbackRequest) -> FeedbackWrite {
    FeedbackWrite {
        ack_status: request.ack_status.unwrap_or(existing.ack_status),
        comment: request_comment(request)
            .map(str::to_string)
            .or_else(|| existing.comment.clone()),
        rating: request_rating(request).unwrap_or(existing.rating),
        meta_info: request_meta(request)
            .cloned()
            .unwrap_or_else(|| existing.meta_info.clone()),
    }
}

/// First feedback for an event. Acknowledging without a rating keeps the
/// event's own severity.
pub fn new_feedback(request: &FeedbackRequest, event_severity: i32) -> FeedbackWrite {
    let ack_status = request.ack_status.unwrap_or(false);
    let base_rating = if ack_status { event_severity } else { 0 };

    FeedbackWrite {
        ack_status,
        comment: request_comment(request).map(str::to_string),
        rating: request_rating(request).unwrap_or(base_rating),
        meta_info: request_meta(request)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn existing() -> FeedbackRecord {
        FeedbackRecord {
            id: 7,
            event_uid: "e1".to_string(),
            event: "dust".to_string(),
            user_id: Some("u1".to_string()),
            ack_status: true,
            comment: Some("checked".to_string()),
            rating: 2,
            meta_info: json!({"source": "panel"}),
        }
    }

    #[test]
    fn test_new_feedback_defaults() {
        let write = new_feedback(&FeedbackRequest::default(), 3);
        assert!(!write.ack_status);
        assert_eq!(write.rating, 0);
        assert_eq!(write.comment, None);
        assert_eq!(write.meta_info, json!({}));
    }

    #[test]
    fn test_new_feedback_ack_uses_severity() {
        let request = FeedbackRequest {
            ack_status: Some(true),
            ..Default::default()
        };
        let write = new_feedback(&request, 3);
        assert!(write.ack_status);
        assert_eq!(write.rating, 3);

        let rated = FeedbackRequest {
            ack_status: Some(true),
            rating: Some(1),
            comment: Some("Fehlalarm".to_string()),
            ..Default::default()
        };
        let write = new_feedback(&rated, 3);
        assert_eq!(write.rating, 1);
        assert_eq!(write.comment.as_deref(), Some("Fehlalarm"));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let request = FeedbackRequest {
            comment: Some(String::new()),
            rating: Some(0),
            meta_info: Some(json!({})),
            ..Default::default()
        };
        let write = merge_existing(&existing(), &request);
        assert!(write.ack_status);
        assert_eq!(write.comment.as_deref(), Some("checked"));
        assert_eq!(write.rating, 2);
        assert_eq!(write.meta_info, json!({"source": "panel"}));
    }

    #[test]
    fn test_merge_applies_given_fields() {
        let request = FeedbackRequest {
            user_id: Some("u1".to_string()),
            ack_status: Some(false),
            comment: Some("kein Störstoff".to_string()),
            rating: Some(1),
            meta_info: Some(json!({"source": "mobile"})),
        };
        let write = merge_existing(&existing(), &request);
        assert!(!write.ack_status);
        assert_eq!(write.comment.as_deref(), Some("kein Störstoff"));
        assert_eq!(write.rating, 1);
        assert_eq!(write.meta_info, json!({"source": "mobile"}));
    }
}
