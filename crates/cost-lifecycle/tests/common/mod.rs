//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cost_lifecycle::{
    CancellationRequest, CancellationStore, CancellationTransport, LifecycleController,
    ManualClock, OverridePolicy, TransportError,
};

/// Fixed start instant for every scenario.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 21, 9, 0, 0).unwrap()
}

/// Transport replaying scripted outcomes and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<Option<String>, String>>>,
    pub requests: Mutex<Vec<CancellationRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response carrying `request_id`.
    pub fn accept(self, request_id: Option<&str>) -> Self {
        self.push(Ok(request_id.map(ToString::to_string)))
    }

    /// Queue a `success: false` response.
    pub fn reject(self, reason: &str) -> Self {
        self.push(Err(reason.to_string()))
    }

    fn push(self, outcome: Result<Option<String>, String>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CancellationTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn cancel(&self, request: &CancellationRequest) -> Result<Option<String>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(id)) => Ok(id),
            Some(Err(reason)) => Err(TransportError::Rejected(reason)),
            None => Ok(None),
        }
    }
}

/// A controller wired to the given store and transport, with a manual clock at [`t0`].
pub fn controller(
    store: Arc<dyn CancellationStore>,
    transport: Arc<ScriptedTransport>,
    policy: OverridePolicy,
) -> (LifecycleController, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let controller =
        LifecycleController::new(store, transport, Arc::new(policy), Duration::hours(24))
            .unwrap()
            .with_clock(clock.clone());
    (controller, clock)
}
