//! Event Ingest
//!
//! Persists the execution events emitted by running jobs:
//!
//! - **Front end**: reads the ordered intake stream, persists anchor events
//!   itself and resolves every event's parent without a query
//! - **Workers**: persist everything else in parallel from bounded queues and
//!   are replaced after a fixed number of messages
//! - **Stores**: the [`EventStore`] seam with in-memory and PostgreSQL backends

pub mod config;
pub mod error;
pub mod frontend;
pub mod intake;
pub mod model;
pub mod persist;
pub mod store;
pub mod worker;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use frontend::IngestFrontEnd;
pub use intake::NatsIntake;
pub use model::{EventId, EventKind, ExecutionEvent, InboundEvent, NewEvent};
pub use persist::persist_with_retry;
pub use store::{EventStore, MemoryEventStore, PgEventStore};
pub use worker::{WorkerPool, WorkerSettings};
