use crate::config::IngestConfig;
use crate::error::{ApiError, StoreError};
use crate::models::{EventKind, ImpurityPayload, ScalarEventPayload, SegmentsPayload};
use crate::store::EventStore;
use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Decoded ingestion request
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Segments(SegmentsPayload),
    Impurity(ImpurityPayload),
    Dust(ScalarEventPayload),
    Hotspot(ScalarEventPayload),
}

impl IngestEvent {
    /// Decode and validate the `request` object posted for `event_type`
    pub fn decode(event_type: &str, request: Value) -> Result<Self, ApiError> {
        match &request {
            Value::Object(fields) if !fields.is_empty() => {}
            _ => return Err(ApiError::BadRequest("request is missing or empty".to_string())),
        }

        let event = match event_type {
            "waste_segments" => IngestEvent::Segments(parse(event_type, request)?),
            "waste_impurity" => IngestEvent::Impurity(parse(event_type, request)?),
            "waste_dust" => IngestEvent::Dust(parse(event_type, request)?),
            "waste_hotspot" => IngestEvent::Hotspot(parse(event_type, request)?),
            other => {
                return Err(ApiError::BadRequest(format!(
                    "unknown event type '{}'",
                    other
                )))
            }
        };

        event.validate()?;
        Ok(event)
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::Segments(_) => "waste_segments",
            IngestEvent::Impurity(_) => "waste_impurity",
            IngestEvent::Dust(_) => "waste_dust",
            IngestEvent::Hotspot(_) => "waste_hotspot",
        }
    }

    pub fn edge_box_id(&self) -> Option<&str> {
        let id = match self {
            IngestEvent::Segments(p) => p.edge_box_id.as_deref(),
            IngestEvent::Impurity(p) => p.edge_box_id.as_deref(),
            IngestEvent::Dust(p) | IngestEvent::Hotspot(p) => p.edge_box_id.as_deref(),
        };
        id.filter(|id| !id.is_empty())
    }

    fn validate(&self) -> Result<(), StoreError> {
        match self {
            IngestEvent::Segments(p) => p.validate(),
            IngestEvent::Impurity(p) => p.validate(),
            IngestEvent::Dust(p) | IngestEvent::Hotspot(p) => p.validate(),
        }
    }

    async fn persist(&self, store: &dyn EventStore, edge_box_id: &str) -> Result<u64, StoreError> {
        match self {
            IngestEvent::Segments(p) => store.insert_segments(edge_box_id, p).await,
            IngestEvent::Impurity(p) => store.insert_impurities(edge_box_id, p).await,
            IngestEvent::Dust(p) => store
                .insert_event(EventKind::Dust, edge_box_id, p)
                .await
                .map(|_| 1),
            IngestEvent::Hotspot(p) => store
                .insert_event(EventKind::Hotspot, edge_box_id, p)
                .await
                .map(|_| 1),
        }
    }
}

fn parse<T: DeserializeOwned>(event_type: &str, request: Value) -> Result<T, ApiError> {
    serde_json::from_value(request)
        .map_err(|e| ApiError::BadRequest(format!("invalid {} request: {}", event_type, e)))
}

/// Lifecycle of a background ingestion task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Received,
    Running,
    Done,
    Failed,
}

/// Status reported by `GET /api/v1/tasks/{task_id}`
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub event_type: &'static str,
    pub state: TaskState,
    pub attempts: u32,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<String, TaskStatus>,
    order: VecDeque<String>,
}

/// Bounded in-memory task status table; the oldest task is evicted first
pub struct TaskRegistry {
    capacity: usize,
    inner: RwLock<RegistryInner>,
}

impl TaskRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a task as received. A reused task id starts over.
    pub fn register(&self, task_id: &str, event_type: &'static str) {
        let status = TaskStatus {
            task_id: task_id.to_string(),
            event_type,
            state: TaskState::Received,
            attempts: 0,
            error: None,
            updated_at: Utc::now(),
        };

        let mut inner = self.inner.write();
        if inner.tasks.insert(task_id.to_string(), status).is_none() {
            inner.order.push_back(task_id.to_string());
        }

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.tasks.remove(&oldest);
            }
        }
    }

    fn update(&self, task_id: &str, state: TaskState, attempts: u32, error: Option<String>) {
        if let Some(status) = self.inner.write().tasks.get_mut(task_id) {
            status.state = state;
            status.attempts = attempts;
            status.error = error;
            status.updated_at = Utc::now();
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner.read().tasks.get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persists accepted events in the background with exponential backoff
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn EventStore>,
    registry: Arc<TaskRegistry>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(store: Arc<dyn EventStore>, config: IngestConfig) -> Self {
        let registry = Arc::new(TaskRegistry::new(config.task_registry_capacity));
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Resolve the edge box, register the task and spawn its persistence
    pub fn submit(&self, task_id: String, event: IngestEvent) -> Result<(), ApiError> {
        let edge_box_id = event
            .edge_box_id()
            .map(str::to_string)
            .or_else(|| self.config.default_edge_box_id.clone())
            .ok_or_else(|| {
                ApiError::BadRequest(
                    "EDGE_BOX_ID is missing and no default edge box is configured".to_string(),
                )
            })?;

        self.registry.register(&task_id, event.event_type());
        debug!(task_id = %task_id, event_type = event.event_type(), "Task received");

        let ingestor = self.clone();
        tokio::spawn(async move {
            ingestor.process(&task_id, &edge_box_id, &event).await;
        });

        Ok(())
    }

    /// Persist one event, retrying transient failures
    #[instrument(skip(self, event), fields(event_type = event.event_type()))]
    pub async fn process(&self, task_id: &str, edge_box_id: &str, event: &IngestEvent) -> TaskState {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.initial_backoff(),
            max_interval: self.config.max_backoff(),
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.registry
                .update(task_id, TaskState::Running, attempts, None);

            match event.persist(self.store.as_ref(), edge_box_id).await {
                Ok(rows) => {
                    self.registry.update(task_id, TaskState::Done, attempts, None);
                    metrics::counter!("waste.events.ingested", "event_type" => event.event_type())
                        .increment(1);
                    info!(rows = rows, attempts = attempts, "Event persisted");
                    return TaskState::Done;
                }
                Err(e) if e.is_permanent() || attempts > self.config.max_retries => {
                    self.registry
                        .update(task_id, TaskState::Failed, attempts, Some(e.to_string()));
                    metrics::counter!("waste.events.failed", "event_type" => event.event_type())
                        .increment(1);
                    error!(attempts = attempts, error = %e, "Event persistence failed");
                    return TaskState::Failed;
                }
                Err(e) => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.config.max_backoff());
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Event persistence failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockEventStore;
    use serde_json::json;

    fn test_config() -> IngestConfig {
        IngestConfig {
            default_edge_box_id: Some("box-default".to_string()),
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            task_registry_capacity: 16,
        }
    }

    fn dust_event() -> IngestEvent {
        IngestEvent::decode(
            "waste_dust",
            json!({"event_uid": "dust-1", "severity_level": 2, "EDGE_BOX_ID": "box-7"}),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_event_types() {
        let event = dust_event();
        assert_eq!(event.event_type(), "waste_dust");
        assert_eq!(event.edge_box_id(), Some("box-7"));

        let hotspot =
            IngestEvent::decode("waste_hotspot", json!({"event_uid": "hs-1"})).unwrap();
        assert!(matches!(hotspot, IngestEvent::Hotspot(_)));
        assert_eq!(hotspot.edge_box_id(), None);
    }

    #[test]
    fn test_decode_rejects_bad_requests() {
        assert!(matches!(
            IngestEvent::decode("waste_smoke", json!({"event_uid": "x"})),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            IngestEvent::decode("waste_dust", json!({})),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            IngestEvent::decode("waste_dust", Value::Null),
            Err(ApiError::BadRequest(_))
        ));
        // missing event_uid
        assert!(matches!(
            IngestEvent::decode("waste_hotspot", json!({"severity_level": 3})),
            Err(ApiError::BadRequest(_))
        ));
        // mismatched arrays
        assert!(matches!(
            IngestEvent::decode(
                "waste_impurity",
                json!({
                    "object_uid": ["a", "b"],
                    "confidence_score": [0.9],
                    "severity_level": [2, 3]
                })
            ),
            Err(ApiError::BadRequest(_))
        ));
        // wrong field type
        assert!(matches!(
            IngestEvent::decode("waste_segments", json!({"object_uid": "a"})),
            Err(ApiError::BadRequest(_))
        ));
        // polygon off the normalized canvas
        assert!(matches!(
            IngestEvent::decode(
                "waste_segments",
                json!({
                    "object_uid": ["a"],
                    "object_tracker_id": [1],
                    "object_polygon": [[[1e300, 1e300], [0.2, 0.2], [0.3, 0.1]]],
                    "confidence_score": [0.9],
                    "object_area": [1.0],
                    "object_length": [1.0]
                })
            ),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_registry_eviction() {
        let registry = TaskRegistry::new(2);
        registry.register("t1", "waste_dust");
        registry.register("t2", "waste_dust");
        registry.register("t3", "waste_hotspot");

        assert_eq!(registry.len(), 2);
        assert!(registry.get("t1").is_none());
        assert_eq!(registry.get("t3").unwrap().state, TaskState::Received);

        // re-registering keeps the original position
        registry.register("t2", "waste_dust");
        registry.register("t4", "waste_dust");
        assert!(registry.get("t2").is_none());
        assert!(registry.get("t3").is_some());
    }

    #[tokio::test]
    async fn test_process_retries_transient_errors() {
        let mut store = MockEventStore::new();
        let mut calls = 0;
        store
            .expect_insert_event()
            .times(3)
            .returning(move |kind, edge_box_id, _| {
                assert_eq!(kind, EventKind::Dust);
                assert_eq!(edge_box_id, "box-7");
                calls += 1;
                if calls < 3 {
                    Err(StoreError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(())
                }
            });

        let ingestor = Ingestor::new(Arc::new(store), test_config());
        ingestor.registry().register("task-1", "waste_dust");

        let state = ingestor.process("task-1", "box-7", &dust_event()).await;
        assert_eq!(state, TaskState::Done);

        let status = ingestor.registry().get("task-1").unwrap();
        assert_eq!(status.state, TaskState::Done);
        assert_eq!(status.attempts, 3);
    }

    #[tokio::test]
    async fn test_process_gives_up_after_max_retries() {
        let mut store = MockEventStore::new();
        store
            .expect_insert_event()
            .times(3)
            .returning(|_, _, _| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let ingestor = Ingestor::new(Arc::new(store), test_config());
        ingestor.registry().register("task-2", "waste_dust");

        let state = ingestor.process("task-2", "box-7", &dust_event()).await;
        assert_eq!(state, TaskState::Failed);
        assert!(ingestor.registry().get("task-2").unwrap().error.is_some());
    }

    #[tokio::test]
    async fn test_process_does_not_retry_validation_errors() {
        let mut store = MockEventStore::new();
        store
            .expect_insert_event()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Validation("bad".to_string())));

        let ingestor = Ingestor::new(Arc::new(store), test_config());
        let state = ingestor.process("task-3", "box-7", &dust_event()).await;
        assert_eq!(state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_submit_uses_default_edge_box() {
        let mut store = MockEventStore::new();
        store
            .expect_insert_event()
            .returning(|_, _, _| Ok(()));

        let ingestor = Ingestor::new(Arc::new(store), test_config());
        let event = IngestEvent::decode("waste_hotspot", json!({"event_uid": "hs-1"})).unwrap();
        ingestor.submit("task-4".to_string(), event).unwrap();
        assert!(ingestor.registry().get("task-4").is_some());

        let no_default = Ingestor::new(
            Arc::new(MockEventStore::new()),
            IngestConfig {
                default_edge_box_id: None,
                ..test_config()
            },
        );
        let event = IngestEvent::decode("waste_hotspot", json!({"event_uid": "hs-2"})).unwrap();
        assert!(matches!(
            no_default.submit("task-5".to_string(), event),
            Err(ApiError::BadRequest(_))
        ));
    }
}
