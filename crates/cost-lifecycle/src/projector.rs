//! Time projection of cancellation records.
//!
//! Pure functions only: the caller supplies `now`, so the same inputs always
//! project to the same status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CancellationRecord;

/// Projected status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectedStatus {
    Pending,
    Completed,
}

/// Result of projecting a record at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub status: ProjectedStatus,
    /// Time left until the ETA, floored to whole minutes, never negative.
    pub remaining: Duration,
}

/// Display-ready progress of a pending cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Whole minutes until the ETA.
    pub remaining_minutes: i64,
    /// Share of the request window already elapsed (0.0 to 1.0).
    pub elapsed_fraction: f64,
}

impl Progress {
    /// Format the remaining time, e.g. "23h 0m" or "45m".
    #[must_use]
    pub fn format_remaining(&self) -> String {
        format_remaining(Duration::minutes(self.remaining_minutes))
    }
}

/// Project a record at `now`.
#[must_use]
pub fn project(now: DateTime<Utc>, record: &CancellationRecord) -> Projection {
    if now >= record.eta_time {
        return Projection {
            status: ProjectedStatus::Completed,
            remaining: Duration::zero(),
        };
    }

    let remaining = record.eta_time - now;
    Projection {
        status: ProjectedStatus::Pending,
        remaining: Duration::minutes(remaining.num_minutes()),
    }
}

/// Share of the request window elapsed at `now`, clamped to 0.0..=1.0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn elapsed_fraction(now: DateTime<Utc>, record: &CancellationRecord) -> f64 {
    let total = (record.eta_time - record.request_time).num_seconds();
    if total <= 0 {
        return 1.0;
    }
    let elapsed = (now - record.request_time).num_seconds();
    (elapsed as f64 / total as f64).clamp(0.0, 1.0)
}

/// Progress for a record that is still pending at `now`.
#[must_use]
pub fn progress(now: DateTime<Utc>, record: &CancellationRecord) -> Option<Progress> {
    let projection = project(now, record);
    (projection.status == ProjectedStatus::Pending).then(|| Progress {
        remaining_minutes: projection.remaining.num_minutes(),
        elapsed_fraction: elapsed_fraction(now, record),
    })
}

/// Format a duration as hours and minutes.
#[must_use]
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes().max(0);
    let hours = minutes / 60;
    if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else {
        format!("{minutes}m")
    }
}
