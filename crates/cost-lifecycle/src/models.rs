//! Catalog entries, cancellation records and display state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::projector::Progress;

/// Prefix for request ids synthesized locally when the backend issues none.
pub const LOCAL_REQUEST_PREFIX: &str = "local-";

/// Prefix for request ids assigned to records migrated from the legacy layout.
pub const LEGACY_REQUEST_PREFIX: &str = "legacy-";

const KEY_DELIMITER: char = '|';
const KEY_ESCAPE: char = '\\';

/// A billable entry from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Display name (e.g. "Amazon OpenSearch Service").
    pub name: String,
    /// Resource identifier, if the entry refers to a single resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub details: String,
    /// Cost for the reporting period.
    pub cost: f64,
}

impl Service {
    /// Create a service with no id or details.
    #[must_use]
    pub fn new(name: impl Into<String>, cost: f64) -> Self {
        Self {
            name: name.into(),
            id: None,
            details: String::new(),
            cost,
        }
    }

    /// Set the resource id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the details text.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// The identity key of this service.
    #[must_use]
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.name, self.id.as_deref())
    }

    /// Whether both entries refer to the same service.
    #[must_use]
    pub fn same_entity(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

/// Identity of a service: its name plus optional id.
///
/// An absent id is the empty string. The persisted form is `name|id` with
/// `\` and `|` escaped inside each component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ServiceKey {
    name: String,
    id: String,
}

impl ServiceKey {
    /// Create a key from a name and optional id.
    #[must_use]
    pub fn new(name: impl Into<String>, id: Option<&str>) -> Self {
        Self {
            name: name.into(),
            id: id.unwrap_or_default().to_string(),
        }
    }

    /// Service name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id component (empty when the service has no id).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encode into the persisted `name|id` form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + self.id.len() + 1);
        escape_into(&mut out, &self.name);
        out.push(KEY_DELIMITER);
        escape_into(&mut out, &self.id);
        out
    }

    /// Decode a persisted key.
    ///
    /// A key without a delimiter is treated as a bare name.
    #[must_use]
    pub fn decode(encoded: &str) -> Self {
        let mut name = String::new();
        let mut id = String::new();
        let mut in_id = false;
        let mut chars = encoded.chars();

        while let Some(c) = chars.next() {
            let target = if in_id { &mut id } else { &mut name };
            match c {
                KEY_ESCAPE => target.push(chars.next().unwrap_or(KEY_ESCAPE)),
                KEY_DELIMITER if !in_id => in_id = true,
                _ => target.push(c),
            }
        }

        Self { name, id }
    }
}

fn escape_into(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == KEY_DELIMITER || c == KEY_ESCAPE {
            out.push(KEY_ESCAPE);
        }
        out.push(c);
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

impl From<String> for ServiceKey {
    fn from(s: String) -> Self {
        Self::decode(&s)
    }
}

impl From<ServiceKey> for String {
    fn from(key: ServiceKey) -> Self {
        key.encode()
    }
}

impl From<&Service> for ServiceKey {
    fn from(service: &Service) -> Self {
        service.key()
    }
}

/// Opaque identifier of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a request id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a locally tracked id (no server confirmation).
    #[must_use]
    pub fn generate_local() -> Self {
        Self(format!("{LOCAL_REQUEST_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Whether this id was synthesized locally.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_REQUEST_PREFIX)
    }

    /// Whether this id came from the legacy persisted layout.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.0.starts_with(LEGACY_REQUEST_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A recorded cancellation request.
///
/// Whether the cancellation is pending or completed is never stored; it is
/// projected from `eta_time` at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRecord {
    /// When the request was accepted.
    pub request_time: DateTime<Utc>,
    /// When the cancellation is expected to have taken effect.
    pub eta_time: DateTime<Utc>,
    /// Request identifier.
    pub request_id: RequestId,
}

impl CancellationRecord {
    /// Create a record, returning `None` unless `eta_time` is after `request_time`.
    #[must_use]
    pub fn new(
        request_time: DateTime<Utc>,
        eta_time: DateTime<Utc>,
        request_id: impl Into<RequestId>,
    ) -> Option<Self> {
        (eta_time > request_time).then(|| Self {
            request_time,
            eta_time,
            request_id: request_id.into(),
        })
    }

    /// Whether the record is still pending at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.eta_time
    }
}

/// Lifecycle status shown for a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// No cancellation recorded.
    Active,
    /// Usage-billed service with nothing to cancel.
    PayAsYouGo,
    /// Mandatory charge that cannot be cancelled.
    Required,
    /// The service's own cancellation is in progress.
    PendingOwn,
    /// A parent service's cancellation covers this service.
    PendingViaParent,
    /// The cancellation ETA has passed.
    Completed,
}

impl LifecycleStatus {
    /// Human readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::PayAsYouGo => "Pay-As-You-Go",
            Self::Required => "Required",
            Self::PendingOwn => "Cancellation Pending",
            Self::PendingViaParent => "Cancellation Pending (via parent)",
            Self::Completed => "Cancelled",
        }
    }

    /// Whether a cancellation is in flight.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingOwn | Self::PendingViaParent)
    }

    /// Whether the status comes from an exemption rule.
    #[must_use]
    pub fn is_exempt(self) -> bool {
        matches!(self, Self::PayAsYouGo | Self::Required)
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Reconciled state of one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    /// The catalog entry.
    pub service: Service,
    /// Derived lifecycle status.
    pub lifecycle_status: LifecycleStatus,
    /// Remaining time for pending cancellations.
    pub progress: Option<Progress>,
    /// The record the status was derived from.
    pub source_record: Option<CancellationRecord>,
    /// Whether the status comes from another service's record.
    pub is_derived: bool,
    /// Parent whose record drives a derived status.
    pub derived_from: Option<String>,
}

impl DisplayState {
    /// Status label for presentation.
    #[must_use]
    pub fn status_label(&self) -> String {
        match (&self.derived_from, self.lifecycle_status) {
            (Some(parent), LifecycleStatus::PendingViaParent) => {
                format!("Cancellation Pending (via {parent})")
            }
            (Some(parent), LifecycleStatus::Completed) => format!("Cancelled (via {parent})"),
            (_, status) => status.label().to_string(),
        }
    }

    /// Remaining-time label, e.g. "23h 0m remaining".
    #[must_use]
    pub fn progress_label(&self) -> Option<String> {
        self.progress
            .as_ref()
            .map(|p| format!("{} remaining", p.format_remaining()))
    }

    /// Whether the entry can still be offered for cancellation.
    ///
    /// A child whose parent's cancellation has completed may be cancelled on
    /// its own.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.lifecycle_status,
            LifecycleStatus::Active | LifecycleStatus::Completed
        )
    }
}
