use crate::aggregator::DateRange;
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::feedback::{merge_existing, new_feedback, FeedbackWrite};
use crate::filters::{escape_like, FilterSet, FilterValue, Lookup, Predicate};
use crate::geometry::{bbox_from_polygon, map_to_zone, polygon_from_json, Zone};
use crate::models::{
    AlarmLogRecord, EventKind, EventRecord, FeedbackRecord, FeedbackRequest, FeedbackState,
    ImpurityPayload, PlantInfo, ScalarEventPayload, SegmentRecord, SegmentRef, SegmentsPayload,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

const EVENT_COLUMNS: &str = "id, event_uid, delivery_id, timestamp, created_at, \
     confidence_score, severity_level, img_id, img_file, model_name, model_tag, meta_info";

/// Selection for event and alarm-log listings
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Inclusive window on `created_at`
    pub created: Option<DateRange>,
    /// Column predicates
    pub filters: FilterSet,
}

/// Selection for the segment listing
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentQuery {
    Delivery(String),
    /// Inclusive window on the segment timestamp
    Window(DateRange),
}

/// Persistence operations used by the HTTP layer and the ingestion worker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Check database connectivity
    async fn ping(&self) -> Result<(), StoreError>;

    /// Names of the currently enabled alarm filters
    async fn active_filters(&self) -> Result<Vec<String>, StoreError>;

    /// Events of one kind, newest first; impurities are limited to problematic ones
    async fn query_events(
        &self,
        kind: EventKind,
        query: &EventQuery,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Latest feedback per event uid, from any user
    async fn latest_feedback(
        &self,
        event_uids: &[String],
    ) -> Result<HashMap<String, FeedbackState>, StoreError>;

    async fn query_alarm_log(&self, query: &EventQuery)
        -> Result<Vec<AlarmLogRecord>, StoreError>;

    async fn query_segments(&self, query: &SegmentQuery)
        -> Result<Vec<SegmentRecord>, StoreError>;

    async fn get_plant(&self, plant_id: &str) -> Result<Option<PlantInfo>, StoreError>;

    /// Insert or update the feedback of one user for an event.
    ///
    /// Returns the kind the event belongs to, or `NotFound` when no event
    /// carries the uid.
    async fn upsert_feedback(
        &self,
        event_uid: &str,
        request: &FeedbackRequest,
    ) -> Result<EventKind, StoreError>;

    /// Store tracked segments, skipping known object uids. Returns the number inserted.
    async fn insert_segments(
        &self,
        edge_box_id: &str,
        payload: &SegmentsPayload,
    ) -> Result<u64, StoreError>;

    /// Store impurities with their alarm rows. Returns the number inserted.
    async fn insert_impurities(
        &self,
        edge_box_id: &str,
        payload: &ImpurityPayload,
    ) -> Result<u64, StoreError>;

    /// Store a dust or hotspot event with its alarm row
    async fn insert_event(
        &self,
        kind: EventKind,
        edge_box_id: &str,
        payload: &ScalarEventPayload,
    ) -> Result<(), StoreError>;
}

/// Event columns written to a subtype table and mirrored into `waste_alarm`
struct NewEvent<'a> {
    event_uid: &'a str,
    delivery_id: Option<&'a str>,
    timestamp: DateTime<Utc>,
    confidence_score: f64,
    severity_level: i32,
    img_id: Option<&'a str>,
    img_file: Option<&'a str>,
    model_name: Option<&'a str>,
    model_tag: Option<&'a str>,
    meta_info: Value,
}

/// PostgreSQL-backed event store
pub struct PgEventStore {
    pool: PgPool,
    zones: Vec<Zone>,
}

impl PgEventStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig, zones: Vec<Zone>) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool, zones })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn edge_box_pk(
        tx: &mut Transaction<'_, Postgres>,
        edge_box_id: &str,
    ) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM edge_box_info WHERE edge_box_id = $1")
            .bind(edge_box_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("edge box id not found: {}", edge_box_id)))
    }

    async fn insert_alarm(
        tx: &mut Transaction<'_, Postgres>,
        kind: EventKind,
        edge_box: i64,
        event: &NewEvent<'_>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO waste_alarm (
                event, edge_box_id, timestamp, event_uid, delivery_id,
                confidence_score, severity_level, img_id, img_file,
                model_name, model_tag, meta_info, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW()
            )
            "#,
        )
        .bind(kind.name())
        .bind(edge_box)
        .bind(event.timestamp)
        .bind(event.event_uid)
        .bind(event.delivery_id)
        .bind(event.confidence_score)
        .bind(event.severity_level)
        .bind(event.img_id)
        .bind(event.img_file)
        .bind(event.model_name)
        .bind(event.model_tag)
        .bind(&event.meta_info)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Region of a segment polygon, or `None` when the polygon cannot be read
    fn segment_region(&self, polygon: &Value) -> Option<String> {
        let bbox = polygon_from_json(polygon).and_then(|points| bbox_from_polygon(&points));
        match bbox {
            Ok(bbox) => Some(map_to_zone(&bbox, &self.zones).to_string()),
            Err(e) => {
                warn!(error = %e, "Cannot derive region from segment polygon");
                None
            }
        }
    }
}

/// Append ` AND <predicate>` clauses; every value goes through a bind parameter
pub(crate) fn push_predicates(qb: &mut QueryBuilder<'_, Postgres>, filters: &FilterSet) {
    for predicate in filters.predicates() {
        push_predicate(qb, predicate);
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    let column = predicate.field.name();

    match predicate.lookup {
        Lookup::In => {
            qb.push(format!(" AND {} IN (", column));
            let mut list = qb.separated(", ");
            for value in &predicate.values {
                match value {
                    FilterValue::Int(v) => list.push_bind(*v),
                    FilterValue::Float(v) => list.push_bind(*v),
                    FilterValue::Text(v) => list.push_bind(v.clone()),
                };
            }
            list.push_unseparated(")");
        }
        Lookup::Contains => {
            qb.push(" AND (");
            for (i, value) in predicate.values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(format!("CAST({} AS TEXT) LIKE ", column));
                qb.push_bind(format!("%{}%", escape_like(&value.to_string())));
            }
            qb.push(")");
        }
        lookup => {
            let (Some(operator), Some(value)) = (lookup.sql_operator(), predicate.values.first())
            else {
                return;
            };
            qb.push(format!(" AND {} {} ", column, operator));
            match value {
                FilterValue::Int(v) => qb.push_bind(*v),
                FilterValue::Float(v) => qb.push_bind(*v),
                FilterValue::Text(v) => qb.push_bind(v.clone()),
            };
        }
    }
}

fn push_created_range(qb: &mut QueryBuilder<'_, Postgres>, range: Option<&DateRange>) {
    if let Some(range) = range {
        qb.push(" AND created_at >= ")
            .push_bind(range.from)
            .push(" AND created_at <= ")
            .push_bind(range.to);
    }
}

fn meta_object(meta_info: &Map<String, Value>) -> Value {
    Value::Object(meta_info.clone())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn active_filters(&self) -> Result<Vec<String>, StoreError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT filter_name FROM alarm_filter WHERE is_active ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    #[instrument(skip(self, query), fields(event = %kind))]
    async fn query_events(
        &self,
        kind: EventKind,
        query: &EventQuery,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {} WHERE TRUE",
            EVENT_COLUMNS,
            kind.table()
        ));

        if kind == EventKind::Impurity {
            qb.push(" AND is_problematic");
        }
        push_created_range(&mut qb, query.created.as_ref());
        push_predicates(&mut qb, &query.filters);
        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows = qb
            .build_query_as::<EventRecord>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), "Queried events");
        Ok(rows)
    }

    async fn latest_feedback(
        &self,
        event_uids: &[String],
    ) -> Result<HashMap<String, FeedbackState>, StoreError> {
        if event_uids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, FeedbackState>(
            r#"
            SELECT DISTINCT ON (event_uid) event_uid, ack_status, rating, created_at
            FROM waste_feedback
            WHERE event_uid = ANY($1)
            ORDER BY event_uid, created_at DESC, id DESC
            "#,
        )
        .bind(event_uids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|fb| (fb.event_uid.clone(), fb))
            .collect())
    }

    #[instrument(skip(self, query))]
    async fn query_alarm_log(
        &self,
        query: &EventQuery,
    ) -> Result<Vec<AlarmLogRecord>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT event, timestamp, created_at, severity_level, meta_info \
             FROM waste_alarm WHERE TRUE",
        );
        push_created_range(&mut qb, query.created.as_ref());
        push_predicates(&mut qb, &query.filters);
        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows = qb
            .build_query_as::<AlarmLogRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn query_segments(
        &self,
        query: &SegmentQuery,
    ) -> Result<Vec<SegmentRecord>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT object_uid, timestamp, object_length, object_area, object_polygon \
             FROM waste_segments WHERE ",
        );

        match query {
            SegmentQuery::Delivery(delivery_id) => {
                qb.push("delivery_id = ").push_bind(delivery_id.clone());
            }
            SegmentQuery::Window(range) => {
                qb.push("timestamp >= ")
                    .push_bind(range.from)
                    .push(" AND timestamp <= ")
                    .push_bind(range.to);
            }
        }
        qb.push(" ORDER BY timestamp ASC, id ASC");

        let rows = qb
            .build_query_as::<SegmentRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn get_plant(&self, plant_id: &str) -> Result<Option<PlantInfo>, StoreError> {
        let plant = sqlx::query_as::<_, PlantInfo>(
            "SELECT id, plant_id, plant_name, plant_location FROM plant_info WHERE plant_id = $1",
        )
        .bind(plant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plant)
    }

    #[instrument(skip(self, request), fields(event_uid = %event_uid))]
    async fn upsert_feedback(
        &self,
        event_uid: &str,
        request: &FeedbackRequest,
    ) -> Result<EventKind, StoreError> {
        let mut tx = self.pool.begin().await?;

        // the last kind carrying the uid wins
        let mut found: Option<(EventKind, i32)> = None;
        for kind in EventKind::ALL {
            let severity = sqlx::query_scalar::<_, i32>(&format!(
                "SELECT severity_level FROM {} WHERE event_uid = $1 \
                 ORDER BY created_at DESC LIMIT 1",
                kind.table()
            ))
            .bind(event_uid)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(severity) = severity {
                found = Some((kind, severity));
            }
        }

        let (kind, severity) = found.ok_or_else(|| {
            StoreError::NotFound(format!(
                "event_uid {} was not registered for any event",
                event_uid
            ))
        })?;

        let existing = sqlx::query_as::<_, FeedbackRecord>(
            r#"
            SELECT id, event_uid, event, user_id, ack_status, comment, rating, meta_info
            FROM waste_feedback
            WHERE event_uid = $1 AND user_id IS NOT DISTINCT FROM $2
            FOR UPDATE
            "#,
        )
        .bind(event_uid)
        .bind(request.user_id.as_deref())
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(record) => {
                let FeedbackWrite {
                    ack_status,
                    comment,
                    rating,
                    meta_info,
                } = merge_existing(&record, request);

                sqlx::query(
                    r#"
                    UPDATE waste_feedback
                    SET ack_status = $1, comment = $2, rating = $3, meta_info = $4,
                        updated_at = NOW()
                    WHERE id = $5
                    "#,
                )
                .bind(ack_status)
                .bind(comment)
                .bind(rating)
                .bind(meta_info)
                .bind(record.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                let FeedbackWrite {
                    ack_status,
                    comment,
                    rating,
                    meta_info,
                } = new_feedback(request, severity);

                sqlx::query(
                    r#"
                    INSERT INTO waste_feedback (
                        event_uid, event, user_id, ack_status, comment, rating,
                        meta_info, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                    "#,
                )
                .bind(event_uid)
                .bind(kind.name())
                .bind(request.user_id.as_deref())
                .bind(ack_status)
                .bind(comment)
                .bind(rating)
                .bind(meta_info)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        debug!(event = %kind, "Feedback stored");
        Ok(kind)
    }

    #[instrument(skip(self, payload), fields(edge_box_id = %edge_box_id, objects = payload.object_uid.len()))]
    async fn insert_segments(
        &self,
        edge_box_id: &str,
        payload: &SegmentsPayload,
    ) -> Result<u64, StoreError> {
        payload.validate()?;

        let mut tx = self.pool.begin().await?;
        let edge_box = Self::edge_box_pk(&mut tx, edge_box_id).await?;
        let meta_info = meta_object(&payload.meta_info);
        let mut inserted = 0;

        for (i, object_uid) in payload.object_uid.iter().enumerate() {
            let polygon = serde_json::to_value(&payload.object_polygon[i])?;

            let result = sqlx::query(
                r#"
                INSERT INTO waste_segments (
                    edge_box_id, timestamp, object_uid, event_uid, delivery_id,
                    object_tracker_id, object_polygon, confidence_score,
                    object_area, object_length, img_id, img_file,
                    model_name, model_tag, meta_info, created_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW()
                )
                ON CONFLICT (object_uid) DO NOTHING
                "#,
            )
            .bind(edge_box)
            .bind(payload.timestamp)
            .bind(object_uid)
            .bind(payload.event_uid.as_deref())
            .bind(payload.delivery_id.as_deref())
            .bind(payload.object_tracker_id[i])
            .bind(polygon)
            .bind(payload.confidence_score[i])
            .bind(payload.object_area[i])
            .bind(payload.object_length[i])
            .bind(payload.img_id.as_deref())
            .bind(payload.img_file.as_deref())
            .bind(payload.model_name.as_deref())
            .bind(payload.model_tag.as_deref())
            .bind(&meta_info)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;

        if inserted < payload.object_uid.len() as u64 {
            debug!(
                skipped = payload.object_uid.len() as u64 - inserted,
                "Skipped known segments"
            );
        }

        Ok(inserted)
    }

    #[instrument(skip(self, payload), fields(edge_box_id = %edge_box_id, objects = payload.object_uid.len()))]
    async fn insert_impurities(
        &self,
        edge_box_id: &str,
        payload: &ImpurityPayload,
    ) -> Result<u64, StoreError> {
        payload.validate()?;

        let mut tx = self.pool.begin().await?;
        let edge_box = Self::edge_box_pk(&mut tx, edge_box_id).await?;
        let mut inserted = 0;

        for (i, object_uid) in payload.object_uid.iter().enumerate() {
            let segment = sqlx::query_as::<_, SegmentRef>(
                r#"
                SELECT id, object_tracker_id, object_polygon
                FROM waste_segments
                WHERE object_uid = $1 AND edge_box_id = $2
                "#,
            )
            .bind(object_uid)
            .bind(edge_box)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("segment not found for object_uid {}", object_uid))
            })?;

            let mut meta_info = payload.meta_info.clone();
            if !meta_info.contains_key("region") {
                if let Some(region) = self.segment_region(&segment.object_polygon) {
                    meta_info.insert("region".to_string(), Value::String(region));
                }
            }

            let event = NewEvent {
                event_uid: payload.event_uid_for(i),
                delivery_id: payload.delivery_id.as_deref(),
                timestamp: payload.timestamp,
                confidence_score: payload.confidence_score[i],
                severity_level: payload.severity_level[i],
                img_id: payload.img_id.as_deref(),
                img_file: payload.img_file.as_deref(),
                model_name: payload.model_name.as_deref(),
                model_tag: payload.model_tag.as_deref(),
                meta_info: Value::Object(meta_info),
            };

            let result = sqlx::query(
                r#"
                INSERT INTO waste_impurity (
                    edge_box_id, segment_id, timestamp, event_uid, delivery_id,
                    object_tracker_id, is_long, is_problematic, confidence_score,
                    severity_level, img_id, img_file, model_name, model_tag,
                    meta_info, created_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, TRUE, TRUE, $7, $8, $9, $10, $11, $12, $13, NOW()
                )
                ON CONFLICT (segment_id) DO NOTHING
                "#,
            )
            .bind(edge_box)
            .bind(segment.id)
            .bind(event.timestamp)
            .bind(event.event_uid)
            .bind(event.delivery_id)
            .bind(segment.object_tracker_id)
            .bind(event.confidence_score)
            .bind(event.severity_level)
            .bind(event.img_id)
            .bind(event.img_file)
            .bind(event.model_name)
            .bind(event.model_tag)
            .bind(&event.meta_info)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(object_uid = %object_uid, "Impurity already stored");
                continue;
            }

            Self::insert_alarm(&mut tx, EventKind::Impurity, edge_box, &event).await?;

            sqlx::query("UPDATE waste_segments SET img_id = $1, img_file = $2 WHERE id = $3")
                .bind(event.img_id)
                .bind(event.img_file)
                .bind(segment.id)
                .execute(&mut *tx)
                .await?;

            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[instrument(skip(self, payload), fields(event = %kind, edge_box_id = %edge_box_id))]
    async fn insert_event(
        &self,
        kind: EventKind,
        edge_box_id: &str,
        payload: &ScalarEventPayload,
    ) -> Result<(), StoreError> {
        if kind == EventKind::Impurity {
            return Err(StoreError::Validation(
                "impurities are stored per segment".to_string(),
            ));
        }
        payload.validate()?;

        let mut tx = self.pool.begin().await?;
        let edge_box = Self::edge_box_pk(&mut tx, edge_box_id).await?;

        let event = NewEvent {
            event_uid: payload.event_uid(),
            delivery_id: payload.delivery_id.as_deref(),
            timestamp: payload.timestamp,
            confidence_score: payload.confidence_score,
            severity_level: payload.severity_level,
            img_id: payload.img_id.as_deref(),
            img_file: payload.img_file.as_deref(),
            model_name: payload.model_name.as_deref(),
            model_tag: payload.model_tag.as_deref(),
            meta_info: meta_object(&payload.meta_info),
        };

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                edge_box_id, timestamp, event_uid, delivery_id, confidence_score,
                severity_level, img_id, img_file, model_name, model_tag,
                meta_info, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW()
            )
            "#,
            kind.table()
        ))
        .bind(edge_box)
        .bind(event.timestamp)
        .bind(event.event_uid)
        .bind(event.delivery_id)
        .bind(event.confidence_score)
        .bind(event.severity_level)
        .bind(event.img_id)
        .bind(event.img_file)
        .bind(event.model_name)
        .bind(event.model_tag)
        .bind(&event.meta_info)
        .execute(&mut *tx)
        .await?;

        Self::insert_alarm(&mut tx, kind, edge_box, &event).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{AllowList, FilterField};
    use chrono::TimeZone;

    fn allow_all() -> AllowList {
        FilterField::ALL.iter().map(|f| f.name()).collect()
    }

    fn compile(filters: &str) -> String {
        let set = FilterSet::parse(filters, &allow_all()).unwrap();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM waste_alarm WHERE TRUE");
        push_predicates(&mut qb, &set);
        qb.sql().to_string()
    }

    #[test]
    fn test_compile_comparison() {
        assert_eq!(
            compile("severity_level__gte=2"),
            "SELECT 1 FROM waste_alarm WHERE TRUE AND severity_level >= $1"
        );
    }

    #[test]
    fn test_compile_in_list() {
        assert_eq!(
            compile("event=impurity,dust&severity_level=3"),
            "SELECT 1 FROM waste_alarm WHERE TRUE AND event IN ($1, $2) AND severity_level = $3"
        );
    }

    #[test]
    fn test_compile_contains() {
        assert_eq!(
            compile("delivery_id__contains=LKW,PKW"),
            "SELECT 1 FROM waste_alarm WHERE TRUE AND (CAST(delivery_id AS TEXT) LIKE $1 \
             OR CAST(delivery_id AS TEXT) LIKE $2)"
        );
    }

    #[test]
    fn test_compile_injection_stays_bound() {
        let sql = compile("delivery_id=x';DROP TABLE waste_alarm;--");
        assert_eq!(sql, "SELECT 1 FROM waste_alarm WHERE TRUE AND delivery_id = $1");
    }

    #[test]
    fn test_created_range() {
        let range = DateRange {
            from: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap(),
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM waste_dust WHERE TRUE");
        push_created_range(&mut qb, Some(&range));
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM waste_dust WHERE TRUE AND created_at >= $1 AND created_at <= $2"
        );
    }
}
