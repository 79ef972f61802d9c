use crate::aggregator::{
    log_row, merge_events, segment_row, select_events, with_default_severity, AlarmRow,
    Collection, DateRange, EventListRow, Pagination, SegmentRow,
};
use crate::config::{ApiConfig, DisplayConfig};
use crate::error::ApiError;
use crate::filters::{AllowList, FilterField, FilterSet, FilterValue, Lookup, Predicate};
use crate::geometry::Zone;
use crate::ingest::{IngestEvent, Ingestor, TaskStatus};
use crate::models::{EventKind, FeedbackRequest};
use crate::store::{EventQuery, EventStore, SegmentQuery};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

const DEFAULT_PLANT_ID: &str = "gml-luh-001";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub ingestor: Ingestor,
    pub zones: Arc<Vec<Zone>>,
    pub display: DisplayConfig,
}

impl AppState {
    fn display_offset(&self) -> Duration {
        Duration::hours(self.display.utc_offset_hours)
    }

    async fn allow_list(&self) -> Result<AllowList, ApiError> {
        Ok(self.store.active_filters().await?.into_iter().collect())
    }
}

/// Success envelope; the body's fields sit next to the status fields
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub body: T,
    pub status_code: &'static str,
    pub detail: &'static str,
    pub status_description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DataBody<T> {
    pub data: T,
}

fn ok<T>(body: T) -> Json<Envelope<T>> {
    Json(Envelope {
        body,
        status_code: "ok",
        detail: "data retrieved successfully",
        status_description: "OK",
    })
}

fn ok_data<T>(data: T) -> Json<Envelope<DataBody<T>>> {
    ok(DataBody { data })
}

/// Query string extractor that rejects with the error envelope
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// JSON body extractor that rejects with the error envelope
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Query parameters for the alarm listings
#[derive(Debug, Default, Deserialize)]
pub struct AlarmParams {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    /// Filter expression, e.g. `event=impurity,dust&severity_level__gte=2`
    pub filters: Option<String>,
    pub page: Option<i64>,
    pub items_per_page: Option<i64>,
}

/// Query parameters for the per-kind event and segment listings
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryParams {
    pub delivery_id: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

impl DeliveryParams {
    fn delivery_id(&self) -> Option<&str> {
        self.delivery_id.as_deref().filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct PlantParams {
    pub plant_id: Option<String>,
}

/// Ingestion body; the payload sits under `request`
#[derive(Debug, Deserialize)]
pub struct IngestBody {
    #[serde(default)]
    pub request: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub task_id: String,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub event_uid: String,
    pub exists: bool,
    pub event: EventKind,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/event/:event_type", post(ingest_event))
        .route("/api/v1/tasks/:task_id", get(task_status))
        .route("/api/v1/alarm", get(list_alarms))
        .route("/api/v1/alarm/:event_uid", get(get_alarm))
        .route("/api/v1/alarm-log", get(alarm_log))
        .route("/api/v1/events/:event", get(list_events))
        .route("/api/v1/segments", get(list_segments))
        .route("/api/v1/metadata/alarm", get(alarm_metadata))
        .route("/api/v1/metadata/:service", get(service_metadata))
        .route("/api/v1/feedback/:event_uid", post(post_feedback))
        .layer(middleware::from_fn(response_time))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Stamp every response with the handler duration in seconds
async fn response_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&started.elapsed().as_secs_f64().to_string()) {
        response.headers_mut().insert("x-response-time", value);
    }

    response
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "waste-api"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept an event for background persistence
#[instrument(skip(state, headers, body))]
async fn ingest_event(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<IngestBody>,
) -> Result<Json<IngestResponse>, ApiError> {
    let request = body.request.unwrap_or(Value::Null);
    let event = IngestEvent::decode(&event_type, request.clone())?;

    let task_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state.ingestor.submit(task_id.clone(), event)?;

    Ok(Json(IngestResponse {
        status: "success",
        task_id,
        data: request,
    }))
}

async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    state
        .ingestor
        .registry()
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", task_id)))
}

/// Query every selected kind, attach feedback and merge
async fn collect_alarms(
    state: &AppState,
    kinds: &[EventKind],
    query: &EventQuery,
) -> Result<Vec<AlarmRow>, ApiError> {
    let mut groups = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let records = state.store.query_events(*kind, query).await?;
        groups.push((*kind, records));
    }

    let event_uids: Vec<String> = groups
        .iter()
        .flat_map(|(_, records)| records.iter().map(|r| r.event_uid.clone()))
        .collect();
    let feedback = state.store.latest_feedback(&event_uids).await?;

    Ok(merge_events(groups, &feedback, state.display_offset()))
}

/// Unified alarm listing across impurity, dust and hotspot
#[instrument(skip(state))]
async fn list_alarms(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<AlarmParams>,
) -> Result<impl IntoResponse, ApiError> {
    let allowed = state.allow_list().await?;
    let filters = FilterSet::parse(params.filters.as_deref().unwrap_or_default(), &allowed)?;
    let pagination = Pagination::new(params.page, params.items_per_page)?;
    let range = DateRange::resolve(
        params.from_date.as_deref(),
        params.to_date.as_deref(),
        true,
        Utc::now(),
    )?;

    let kinds = select_events(&filters)?;
    let applied = with_default_severity(&filters);
    let query = EventQuery {
        created: Some(range),
        filters: applied.without(FilterField::Event),
    };

    let rows = collect_alarms(&state, &kinds, &query).await?;
    metrics::counter!("waste.alarm.queries").increment(1);

    Ok(ok_data(Collection::new(
        rows,
        &pagination,
        applied.to_json(),
        kinds,
    )))
}

/// One alarm by event uid, searched in every kind
#[instrument(skip(state))]
async fn get_alarm(
    State(state): State<AppState>,
    Path(event_uid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut filters = FilterSet::default();
    filters.insert(Predicate::new(
        FilterField::EventUid,
        Lookup::Exact,
        vec![FilterValue::Text(event_uid.clone())],
    ));
    let query = EventQuery {
        created: None,
        filters: filters.clone(),
    };

    let rows = collect_alarms(&state, &EventKind::ALL, &query).await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound(format!(
            "event_uid {} was not registered for any event",
            event_uid
        )));
    }

    Ok(ok_data(Collection {
        kind: "collection",
        total_record: rows.len(),
        filters: filters.to_json(),
        event: EventKind::ALL.to_vec(),
        pages: 1,
        items: rows,
    }))
}

/// Raw alarm table listing
#[instrument(skip(state))]
async fn alarm_log(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<AlarmParams>,
) -> Result<impl IntoResponse, ApiError> {
    let allowed = state.allow_list().await?;
    let filters = FilterSet::parse(params.filters.as_deref().unwrap_or_default(), &allowed)?;
    let pagination = Pagination::new(params.page, params.items_per_page)?;
    let range = DateRange::resolve(
        params.from_date.as_deref(),
        params.to_date.as_deref(),
        true,
        Utc::now(),
    )?;
    let kinds = select_events(&filters)?;

    let query = EventQuery {
        created: Some(range),
        filters: filters.clone(),
    };
    let rows: Vec<_> = state
        .store
        .query_alarm_log(&query)
        .await?
        .iter()
        .map(log_row)
        .collect();

    Ok(ok_data(Collection::new(
        rows,
        &pagination,
        filters.to_json(),
        kinds,
    )))
}

/// Listing of one event kind by delivery or date range
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Path(event): Path<String>,
    ApiQuery(params): ApiQuery<DeliveryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = EventKind::from_name(&event)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown event '{}'", event)))?;

    let query = match params.delivery_id() {
        Some(delivery_id) => {
            let mut filters = FilterSet::default();
            filters.insert(Predicate::new(
                FilterField::DeliveryId,
                Lookup::Exact,
                vec![FilterValue::Text(delivery_id.to_string())],
            ));
            EventQuery {
                created: None,
                filters,
            }
        }
        None => EventQuery {
            created: Some(DateRange::resolve(
                params.from_date.as_deref(),
                params.to_date.as_deref(),
                true,
                Utc::now(),
            )?),
            filters: FilterSet::default(),
        },
    };

    let rows: Vec<EventListRow> = state
        .store
        .query_events(kind, &query)
        .await?
        .into_iter()
        .map(EventListRow::from)
        .collect();

    let pages = Pagination::new(None, None)?.pages(rows.len());
    Ok(ok_data(Collection {
        kind: "collection",
        total_record: rows.len(),
        filters: query.filters.to_json(),
        event: vec![kind],
        pages,
        items: rows,
    }))
}

/// Tracked segments with their region
#[instrument(skip(state))]
async fn list_segments(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<DeliveryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = match params.delivery_id() {
        Some(delivery_id) => SegmentQuery::Delivery(delivery_id.to_string()),
        None => SegmentQuery::Window(DateRange::resolve(
            params.from_date.as_deref(),
            params.to_date.as_deref(),
            false,
            Utc::now(),
        )?),
    };

    let rows = state
        .store
        .query_segments(&query)
        .await?
        .into_iter()
        .map(|record| segment_row(record, &state.zones))
        .collect::<Result<Vec<SegmentRow>, _>>()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let filters = match &query {
        SegmentQuery::Delivery(delivery_id) => json!({ "delivery_id": delivery_id }),
        SegmentQuery::Window(range) => json!({
            "from_date": range.from.format("%Y-%m-%d %H:%M:%S").to_string(),
            "to_date": range.to.format("%Y-%m-%d %H:%M:%S").to_string(),
        }),
    };

    let pages = Pagination::new(None, None)?.pages(rows.len());
    Ok(ok_data(Collection {
        kind: "collection",
        total_record: rows.len(),
        filters,
        event: Vec::new(),
        pages,
        items: rows,
    }))
}

fn filter_metadata(name: &str) -> Option<Value> {
    match name {
        "event" => Some(json!({
            "title": "Auffälligkeit",
            "type": "enum",
            "description": "Filter nach der Art des Ereignisses, z.B. Störstoff",
            "items": {
                "all": "Alle",
                "impurity": "Störstoff",
                "dust": "Staub",
                "hotspot": "Hotspot"
            }
        })),
        "severity_level" => Some(json!({
            "title": "Auffälligkeitsgrad",
            "type": "enum",
            "description": "Filter nach der Grad des Ereignisses, z.B. Niedrig",
            "items": {
                "1": "Niedrig",
                "2": "Mittel",
                "3": "Hoch"
            }
        })),
        _ => None,
    }
}

/// Column and filter descriptions for the alarm table
async fn alarm_metadata(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let filters: serde_json::Map<String, Value> = state
        .store
        .active_filters()
        .await?
        .into_iter()
        .filter_map(|name| filter_metadata(&name).map(|meta| (name, meta)))
        .collect();

    Ok(ok(json!({
        "metadata": {
            "title": "Erkannte Auffälligkeiten",
            "column": {
                "date": {"title": "Datum", "type": "string", "description": "Datum der Anlieferung"},
                "start": {"title": "Beginn", "type": "string", "description": "Beginn der Anlieferung"},
                "end": {"title": "Ende", "type": "string", "description": "Ende der Anlieferung"},
                "location": {"title": "Ort", "type": "string", "description": "Ort der Auffälligkeit"},
                "event_name": {"title": "Ereignis", "type": "string", "description": "Art der Auffälligkeit"},
                "severity_level": {"title": "Grad", "type": "string", "description": "Grad der Auffälligkeit"}
            },
            "filters": filters,
            "primary_key": "event_uid"
        }
    })))
}

fn service_display_name(service: &str) -> Option<&'static str> {
    match service {
        "segments" => Some("Segmentation"),
        other => EventKind::from_name(other).map(|kind| kind.display_name()),
    }
}

/// Plant and service description for a dashboard panel
#[instrument(skip(state))]
async fn service_metadata(
    State(state): State<AppState>,
    Path(service): Path<String>,
    ApiQuery(params): ApiQuery<PlantParams>,
) -> Result<impl IntoResponse, ApiError> {
    let service_name = service_display_name(&service)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown service '{}'", service)))?;
    let plant_id = params.plant_id.as_deref().unwrap_or(DEFAULT_PLANT_ID);

    let plant = state
        .store
        .get_plant(plant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("plant {} not found", plant_id)))?;

    let mut metadata = serde_json::Map::new();
    metadata.insert(
        service,
        json!({
            "plant_id": plant.plant_id,
            "plant_name": plant.plant_name,
            "plant_location": plant.plant_location,
            "service_name": service_name
        }),
    );

    Ok(ok(json!({ "metadata": metadata })))
}

/// Acknowledge, rate or comment an event
#[instrument(skip(state, request))]
async fn post_feedback(
    State(state): State<AppState>,
    Path(event_uid): Path<String>,
    ApiJson(request): ApiJson<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state.store.upsert_feedback(&event_uid, &request).await?;

    info!(event = %event, "Feedback recorded");

    Ok(ok(FeedbackResponse {
        event_uid,
        exists: true,
        event,
    }))
}

/// Start the HTTP API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting waste API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
