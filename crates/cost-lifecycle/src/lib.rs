#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

//! # Cost Lifecycle
//!
//! Local cancellation bookkeeping for a cost-reporting dashboard.
//!
//! This crate provides:
//! - Override rules deciding which services can be cancelled and which follow a parent
//! - A persisted store of cancellation requests keyed by service
//! - Time projection of pending cancellations against their ETA
//! - Reconciliation of a catalog into one display state per entry
//! - Commands to request, confirm and clear cancellations
//!
//! Nothing here verifies that a cancellation actually happened upstream.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cost_lifecycle::{JsonFileStore, LifecycleController, OverridePolicy};
//!
//! let store = Arc::new(JsonFileStore::open(".cost-lifecycle/cancellations.json", horizon));
//! let controller = LifecycleController::new(store, transport, policy, horizon)?;
//!
//! controller.request_cancellation(&service).await?;
//! for state in controller.reconcile(&catalog) {
//!     println!("{} {}", state.service.name, state.status_label());
//! }
//! ```

pub mod catalog;
pub mod clock;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod models;
pub mod policy;
pub mod projector;
pub mod store;
pub mod transport;

// Re-export key types for convenience
pub use catalog::load_catalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LifecycleConfig;
pub use controller::{CancellationPlan, LifecycleController};
pub use engine::{reconcile, LifecycleSummary};
pub use error::{
    CatalogError, ConfigError, InProgressReason, LifecycleError, PersistenceCorruptError,
    PolicyError, StoreError, TransportError,
};
pub use models::{
    CancellationRecord, DisplayState, LifecycleStatus, RequestId, Service, ServiceKey,
};
pub use policy::{ExemptionKind, OverridePolicy};
pub use projector::{Progress, ProjectedStatus, Projection};
pub use store::{CancellationStore, InMemoryStore, JsonFileStore};
pub use transport::{CancellationRequest, CancellationTransport, HttpCancellationTransport};
