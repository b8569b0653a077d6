//! Lifecycle commands: confirm, request and clear cancellations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::engine::{self, parent_record};
use crate::error::{ConfigError, InProgressReason, LifecycleError, StoreError};
use crate::models::{CancellationRecord, DisplayState, RequestId, Service, ServiceKey};
use crate::policy::OverridePolicy;
use crate::store::CancellationStore;
use crate::transport::{CancellationRequest, CancellationTransport};

/// What a confirmed cancellation would do, shown before the request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationPlan {
    /// The service to cancel.
    pub key: ServiceKey,
    /// Expected completion if the request were sent now.
    pub eta_time: DateTime<Utc>,
    /// Children whose status will follow this service.
    pub implicated_children: Vec<String>,
}

/// Command surface for cancellation bookkeeping.
///
/// The store, transport and clock are injected; several controllers (and the
/// engine) may share one store.
pub struct LifecycleController {
    store: Arc<dyn CancellationStore>,
    transport: Arc<dyn CancellationTransport>,
    policy: Arc<OverridePolicy>,
    clock: Arc<dyn Clock>,
    horizon: Duration,
    in_flight: Mutex<HashSet<ServiceKey>>,
}

impl LifecycleController {
    /// Create a controller.
    ///
    /// # Errors
    ///
    /// Returns an error if `horizon` is not positive.
    pub fn new(
        store: Arc<dyn CancellationStore>,
        transport: Arc<dyn CancellationTransport>,
        policy: Arc<OverridePolicy>,
        horizon: Duration,
    ) -> Result<Self, ConfigError> {
        if horizon <= Duration::zero() {
            return Err(ConfigError::Invalid(format!(
                "cancellation horizon must be positive, got {horizon}"
            )));
        }

        Ok(Self {
            store,
            transport,
            policy,
            clock: Arc::new(SystemClock),
            horizon,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Use a different time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &OverridePolicy {
        &self.policy
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CancellationStore> {
        &self.store
    }

    #[must_use]
    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Reconcile a catalog at the controller's current time.
    #[must_use]
    pub fn reconcile(&self, catalog: &[Service]) -> Vec<DisplayState> {
        engine::reconcile(catalog, self.store.as_ref(), &self.policy, self.clock.now())
    }

    /// Check a cancellation could be requested and describe its effect.
    ///
    /// Performs no I/O beyond reading the store.
    pub fn confirm_cancellation(
        &self,
        service: &Service,
    ) -> Result<CancellationPlan, LifecycleError> {
        let now = self.clock.now();
        self.preflight(service, now)?;

        Ok(CancellationPlan {
            key: service.key(),
            eta_time: self.eta_from(now)?,
            implicated_children: self
                .policy
                .children_of(&service.name)
                .into_iter()
                .map(ToString::to_string)
                .collect(),
        })
    }

    /// Request cancellation of a service and record it.
    ///
    /// Preconditions are checked before any I/O. Transport failures are
    /// returned as-is and leave the store untouched; no retry is attempted.
    #[instrument(skip(self, service), fields(service = %service.key()))]
    pub async fn request_cancellation(
        &self,
        service: &Service,
    ) -> Result<CancellationRecord, LifecycleError> {
        let key = service.key();
        let now = self.clock.now();
        self.preflight(service, now)?;
        self.eta_from(now)?;
        let _guard = self.lock_in_flight(&key)?;

        let request = CancellationRequest::from(service);
        let issued_id = self.transport.cancel(&request).await.map_err(|e| {
            warn!(transport = self.transport.name(), error = %e, "Cancellation request failed");
            LifecycleError::Transport(e)
        })?;

        let request_id = match issued_id {
            Some(id) => RequestId::new(id),
            None => {
                let local = RequestId::generate_local();
                info!(request_id = %local, "Backend issued no request id, tracking locally");
                local
            }
        };

        let request_time = self.clock.now();
        let record = CancellationRecord {
            request_time,
            eta_time: self.eta_from(request_time)?,
            request_id,
        };

        self.store.put(key, record.clone())?;
        info!(
            request_id = %record.request_id,
            eta = %record.eta_time,
            "Cancellation recorded"
        );
        Ok(record)
    }

    /// Delete every stored record for a service name.
    ///
    /// Used when a service has been reclassified as exempt after it was
    /// cancelled. Returns the removed keys.
    pub fn clear_override_tracking(&self, name: &str) -> Result<Vec<ServiceKey>, LifecycleError> {
        let keys: Vec<ServiceKey> = self
            .store
            .all_entries()?
            .into_keys()
            .filter(|key| key.name() == name)
            .collect();
        self.remove_all(keys)
    }

    /// Delete stored records for every service the policy now exempts.
    pub fn prune_exempt_records(&self) -> Result<Vec<ServiceKey>, LifecycleError> {
        let keys: Vec<ServiceKey> = self
            .store
            .all_entries()?
            .into_keys()
            .filter(|key| self.policy.is_exempt(key.name()))
            .collect();
        self.remove_all(keys)
    }

    fn eta_from(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>, LifecycleError> {
        start
            .checked_add_signed(self.horizon)
            .ok_or(LifecycleError::HorizonOutOfRange {
                horizon: self.horizon,
            })
    }

    fn remove_all(&self, keys: Vec<ServiceKey>) -> Result<Vec<ServiceKey>, LifecycleError> {
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if self.store.remove(&key)?.is_some() {
                info!(service = %key, "Cleared cancellation tracking");
                removed.push(key);
            }
        }
        Ok(removed)
    }

    fn preflight(&self, service: &Service, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        let key = service.key();

        if let Some(kind) = self.policy.exemption(&service.name) {
            return Err(LifecycleError::NotCancellable {
                name: service.name.clone(),
                kind,
            });
        }

        let in_progress = |reason| LifecycleError::AlreadyInProgress {
            key: key.clone(),
            reason,
        };

        if let Some(parent) = self.policy.parent_of(&service.name) {
            let entries = self.store.all_entries()?;
            if parent_record(&entries, parent).is_some_and(|r| r.is_live(now)) {
                return Err(in_progress(InProgressReason::ViaParent(parent.to_string())));
            }
        }

        if let Some(existing) = self.store.get(&key)? {
            if existing.is_live(now) {
                return Err(in_progress(InProgressReason::OwnRecord(existing.request_id)));
            }
        }

        let in_flight = self.in_flight.lock().map_err(|_| StoreError::Poisoned)?;
        if in_flight.contains(&key) {
            return Err(in_progress(InProgressReason::InFlight));
        }

        Ok(())
    }

    fn lock_in_flight(&self, key: &ServiceKey) -> Result<InFlightGuard<'_>, LifecycleError> {
        let mut in_flight = self.in_flight.lock().map_err(|_| StoreError::Poisoned)?;
        if !in_flight.insert(key.clone()) {
            return Err(LifecycleError::AlreadyInProgress {
                key: key.clone(),
                reason: InProgressReason::InFlight,
            });
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            key: key.clone(),
        })
    }
}

/// Releases a key's in-flight lock when the request finishes or is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<ServiceKey>>,
    key: ServiceKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.key);
        }
    }
}
