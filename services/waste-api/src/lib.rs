//! WasteAnt Telemetry Service
//!
//! Event ingestion and dashboard read API for a waste-sorting plant. Edge
//! boxes post detections (tracked segments, impurities, dust and hotspots),
//! which are persisted in the background with retries. Operators read a
//! unified, filtered and paginated alarm listing and leave acknowledgements
//! and ratings on individual events.
//!
//! ## Features
//!
//! - **Asynchronous Ingestion**: Payloads are validated on receipt and
//!   persisted by a background task with exponential backoff
//! - **Unified Alarm View**: Impurity, dust and hotspot rows merged newest
//!   first with their latest feedback
//! - **Filter Language**: `field__lookup=value` clauses checked against an
//!   allow-list kept in the database
//! - **Zone Localization**: Detections mapped to named plant regions
//!
//! ## Architecture
//!
//! ```text
//! Edge boxes                                  PostgreSQL
//! ┌──────────────┐    ┌──────────────┐       ┌──────────────┐
//! │ POST /event  │───▶│ Ingestor     │──────▶│ segments     │
//! └──────────────┘    │ (retry loop) │       │ impurity     │
//!                     └──────────────┘       │ dust/hotspot │
//!                                            │ alarm        │
//! Dashboard           ┌──────────────┐       │ feedback     │
//! ┌──────────────┐    │ Aggregator   │◀──────│              │
//! │ GET /alarm   │◀───│ + Filters    │       └──────────────┘
//! └──────────────┘    └──────────────┘
//! ```

pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod filters;
pub mod geometry;
pub mod ingest;
pub mod models;
pub mod store;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::{ApiError, StoreError};
pub use filters::{AllowList, FilterError, FilterSet};
pub use geometry::{map_to_zone, Zone};
pub use ingest::{IngestEvent, Ingestor, TaskRegistry, TaskState, TaskStatus};
pub use models::EventKind;
pub use store::{EventStore, PgEventStore};
