//! Reconciliation of the catalog with stored cancellation state.
//!
//! For each catalog entry, in priority order:
//!
//! 1. an exemption rule yields `PayAsYouGo` / `Required`;
//! 2. a live record on the declared parent yields `PendingViaParent`; once the
//!    parent's ETA has passed, a child with no record of its own shows a
//!    derived `Completed`, otherwise it falls through to its own record;
//! 3. no own record yields `Active`;
//! 4. the own record is projected to `PendingOwn` or `Completed`.
//!
//! A child that was cancelled on its own before its parent was cancelled
//! therefore shows a single pending state, driven by the parent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{CancellationRecord, DisplayState, LifecycleStatus, Service};
use crate::policy::{ExemptionKind, OverridePolicy};
use crate::projector::{self, ProjectedStatus};
use crate::store::{CancellationStore, Entries};

/// Reconcile a catalog against the store.
///
/// Reads the store once. A store that cannot be read is logged and treated
/// as empty, so rendering never fails.
pub fn reconcile<S>(
    catalog: &[Service],
    store: &S,
    policy: &OverridePolicy,
    now: DateTime<Utc>,
) -> Vec<DisplayState>
where
    S: CancellationStore + ?Sized,
{
    let entries = store.all_entries().unwrap_or_else(|e| {
        warn!(error = %e, "Cancellation store unreadable, reconciling without records");
        Entries::new()
    });
    reconcile_entries(catalog, &entries, policy, now)
}

/// Reconcile a catalog against a snapshot of stored records.
#[must_use]
pub fn reconcile_entries(
    catalog: &[Service],
    entries: &Entries,
    policy: &OverridePolicy,
    now: DateTime<Utc>,
) -> Vec<DisplayState> {
    let states: Vec<DisplayState> = catalog
        .iter()
        .map(|service| reconcile_one(service, entries, policy, now))
        .collect();

    debug!(
        services = states.len(),
        records = entries.len(),
        "Reconciled catalog"
    );
    states
}

fn reconcile_one(
    service: &Service,
    entries: &Entries,
    policy: &OverridePolicy,
    now: DateTime<Utc>,
) -> DisplayState {
    if let Some(kind) = policy.exemption(&service.name) {
        let status = match kind {
            ExemptionKind::PayAsYouGo => LifecycleStatus::PayAsYouGo,
            ExemptionKind::Required => LifecycleStatus::Required,
        };
        return plain(service, status);
    }

    let own = entries.get(&service.key());

    if let Some(parent) = policy.parent_of(&service.name) {
        if let Some(record) = parent_record(entries, parent) {
            // An expired parent only speaks for children with no record of their own.
            let status = match projector::project(now, record).status {
                ProjectedStatus::Pending => Some(LifecycleStatus::PendingViaParent),
                ProjectedStatus::Completed if own.is_none() => Some(LifecycleStatus::Completed),
                ProjectedStatus::Completed => None,
            };
            if let Some(status) = status {
                return DisplayState {
                    service: service.clone(),
                    lifecycle_status: status,
                    progress: projector::progress(now, record),
                    source_record: Some(record.clone()),
                    is_derived: true,
                    derived_from: Some(parent.to_string()),
                };
            }
        }
    }

    let Some(record) = own else {
        return plain(service, LifecycleStatus::Active);
    };

    let status = match projector::project(now, record).status {
        ProjectedStatus::Pending => LifecycleStatus::PendingOwn,
        ProjectedStatus::Completed => LifecycleStatus::Completed,
    };
    DisplayState {
        service: service.clone(),
        lifecycle_status: status,
        progress: projector::progress(now, record),
        source_record: Some(record.clone()),
        is_derived: false,
        derived_from: None,
    }
}

fn plain(service: &Service, status: LifecycleStatus) -> DisplayState {
    DisplayState {
        service: service.clone(),
        lifecycle_status: status,
        progress: None,
        source_record: None,
        is_derived: false,
        derived_from: None,
    }
}

/// The record driving a parent's children, matched by name regardless of id.
///
/// When several exist, the one with the latest ETA wins.
pub(crate) fn parent_record<'a>(
    entries: &'a Entries,
    parent: &str,
) -> Option<&'a CancellationRecord> {
    entries
        .iter()
        .filter(|(key, _)| key.name() == parent)
        .map(|(_, record)| record)
        .max_by_key(|record| record.eta_time)
}

/// Cost totals over a reconciled catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifecycleSummary {
    /// Number of catalog entries.
    pub services: usize,
    /// Cost of every entry.
    pub total_cost: f64,
    /// Cost of entries with no cancellation.
    pub active_cost: f64,
    /// Cost of entries with a cancellation in flight.
    pub pending_cost: f64,
    /// Cost of entries whose cancellation completed.
    pub cancelled_cost: f64,
    /// Cost of exempt entries.
    pub exempt_cost: f64,
    /// Entries still offered for cancellation.
    pub cancellable: usize,
}

impl LifecycleSummary {
    /// Summarize reconciled states.
    #[must_use]
    pub fn from_states(states: &[DisplayState]) -> Self {
        let mut summary = Self {
            services: states.len(),
            ..Self::default()
        };

        for state in states {
            let cost = state.service.cost;
            summary.total_cost += cost;
            match state.lifecycle_status {
                LifecycleStatus::Active => summary.active_cost += cost,
                LifecycleStatus::PendingOwn | LifecycleStatus::PendingViaParent => {
                    summary.pending_cost += cost;
                }
                LifecycleStatus::Completed => summary.cancelled_cost += cost,
                LifecycleStatus::PayAsYouGo | LifecycleStatus::Required => {
                    summary.exempt_cost += cost;
                }
            }
            if state.is_cancellable() {
                summary.cancellable += 1;
            }
        }

        summary
    }
}
