//! Integration tests for the cancellation lifecycle.
//!
//! These drive the controller and reconciliation together against real
//! stores, with a scripted transport and a manual clock.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{controller, t0, ScriptedTransport};
use cost_lifecycle::{
    reconcile, CancellationRecord, CancellationStore, InMemoryStore, InProgressReason,
    JsonFileStore, LifecycleError, LifecycleStatus, OverridePolicy, Service, ServiceKey,
    TransportError,
};
use tempfile::TempDir;

fn record(id: &str, request_offset_hours: i64) -> CancellationRecord {
    let request_time = t0() + Duration::hours(request_offset_hours);
    CancellationRecord::new(request_time, request_time + Duration::hours(24), id).unwrap()
}

fn bedrock_policy() -> OverridePolicy {
    OverridePolicy::builder()
        .parent("Bedrock", ["Claude-A"])
        .build()
        .unwrap()
}

mod scenario_tests {
    use super::*;

    #[test]
    fn test_untracked_service_is_active() {
        let store = InMemoryStore::new();
        let catalog = vec![Service::new("X", 10.0)];

        let states = reconcile(&catalog, &store, &OverridePolicy::empty(), t0());

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].service, catalog[0]);
        assert_eq!(states[0].lifecycle_status, LifecycleStatus::Active);
        assert!(states[0].progress.is_none());
        assert!(states[0].is_cancellable());
    }

    #[tokio::test]
    async fn test_requested_service_pends_then_completes() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new().accept(Some("CAN-001")));
        let (controller, clock) = controller(store.clone(), transport, OverridePolicy::empty());
        let catalog = vec![Service::new("X", 10.0)];

        let record = controller.request_cancellation(&catalog[0]).await.unwrap();
        assert_eq!(record.request_id.as_str(), "CAN-001");
        assert_eq!(record.eta_time, t0() + Duration::hours(24));

        clock.advance(Duration::hours(1));
        let states = controller.reconcile(&catalog);
        assert_eq!(states[0].lifecycle_status, LifecycleStatus::PendingOwn);
        assert_eq!(states[0].progress.unwrap().remaining_minutes, 23 * 60);
        assert_eq!(states[0].progress_label().as_deref(), Some("23h 0m remaining"));

        clock.set(t0() + Duration::hours(25));
        let states = controller.reconcile(&catalog);
        assert_eq!(states[0].lifecycle_status, LifecycleStatus::Completed);
        assert_eq!(states[0].status_label(), "Cancelled");
    }

    #[tokio::test]
    async fn test_child_follows_cancelled_parent() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new().accept(Some("CAN-P")));
        let (controller, clock) = controller(store.clone(), transport, bedrock_policy());
        let catalog = vec![Service::new("Bedrock", 40.0), Service::new("Claude-A", 12.0)];

        controller.request_cancellation(&catalog[0]).await.unwrap();
        clock.advance(Duration::hours(2));
        let states = controller.reconcile(&catalog);

        assert_eq!(states[0].lifecycle_status, LifecycleStatus::PendingOwn);
        let child = &states[1];
        assert_eq!(child.lifecycle_status, LifecycleStatus::PendingViaParent);
        assert!(child.is_derived);
        assert!(!child.is_cancellable());
        assert_eq!(child.status_label(), "Cancellation Pending (via Bedrock)");
        assert!(store.get(&ServiceKey::new("Claude-A", None)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_child_cancelled_after_parent_completed() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(
            ScriptedTransport::new()
                .accept(Some("CAN-P"))
                .accept(Some("CAN-C")),
        );
        let (controller, clock) = controller(store.clone(), transport, bedrock_policy());
        let catalog = vec![Service::new("Claude-A", 12.0)];

        controller
            .request_cancellation(&Service::new("Bedrock", 40.0))
            .await
            .unwrap();
        clock.advance(Duration::hours(30));

        let states = controller.reconcile(&catalog);
        assert_eq!(states[0].status_label(), "Cancelled (via Bedrock)");
        assert!(states[0].is_cancellable());

        controller.request_cancellation(&catalog[0]).await.unwrap();
        clock.advance(Duration::hours(1));

        let state = &controller.reconcile(&catalog)[0];
        assert_eq!(state.lifecycle_status, LifecycleStatus::PendingOwn);
        assert_eq!(state.status_label(), "Cancellation Pending");
        assert!(!state.is_derived);
        assert_eq!(
            state.source_record.as_ref().unwrap().request_id.as_str(),
            "CAN-C"
        );
        assert_eq!(state.progress.unwrap().remaining_minutes, 23 * 60);
    }

    #[tokio::test]
    async fn test_stray_record_on_exempt_service_is_ignored() {
        let policy = OverridePolicy::builder()
            .pay_as_you_go("Rekognition")
            .build()
            .unwrap();
        let store = Arc::new(InMemoryStore::new());
        store
            .put(ServiceKey::new("Rekognition", None), record("CAN-OLD", 0))
            .unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let (controller, clock) = controller(store.clone(), transport.clone(), policy);
        let catalog = vec![Service::new("Rekognition", 3.0)];

        for hours in [0, 1, 30] {
            clock.set(t0() + Duration::hours(hours));
            let states = controller.reconcile(&catalog);
            assert_eq!(states[0].lifecycle_status, LifecycleStatus::PayAsYouGo);
            assert!(states[0].source_record.is_none());
        }

        let err = controller
            .request_cancellation(&catalog[0])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotCancellable { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_reconciles_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cancellations.json");
        std::fs::write(&path, "{\"X|\": {\"requestTime\": oops").unwrap();

        let store = Arc::new(JsonFileStore::open(&path, Duration::hours(24)));
        assert!(store.load_warning().is_some());

        let catalog = vec![Service::new("X", 10.0)];
        let transport = Arc::new(ScriptedTransport::new().accept(Some("CAN-002")));
        let (controller, _) = controller(store.clone(), transport, OverridePolicy::empty());

        let states = controller.reconcile(&catalog);
        assert_eq!(states[0].lifecycle_status, LifecycleStatus::Active);

        // The next write replaces the corrupt payload.
        controller.request_cancellation(&catalog[0]).await.unwrap();
        let reopened = JsonFileStore::open(&path, Duration::hours(24));
        assert!(reopened.load_warning().is_none());
        assert_eq!(
            reopened
                .get(&ServiceKey::new("X", None))
                .unwrap()
                .unwrap()
                .request_id
                .as_str(),
            "CAN-002"
        );
    }
}

mod property_tests {
    use super::*;

    #[test]
    fn test_reconcile_is_idempotent() {
        let store = InMemoryStore::new();
        store.put(ServiceKey::new("Bedrock", None), record("CAN-1", 0)).unwrap();
        store.put(ServiceKey::new("X", Some("i-1")), record("CAN-2", 0)).unwrap();
        let catalog = vec![
            Service::new("X", 1.0).with_id("i-1"),
            Service::new("Claude-A", 2.0),
            Service::new("Bedrock", 3.0),
            Service::new("Y", 4.0),
        ];
        let policy = bedrock_policy();
        let now = t0() + Duration::minutes(90);

        let first = reconcile(&catalog, &store, &policy, now);
        let second = reconcile(&catalog, &store, &policy, now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_exemption_dominates_every_record() {
        let policy = OverridePolicy::builder()
            .pay_as_you_go("Rekognition")
            .parent("AI Suite", ["Amazon Rekognition"])
            .build()
            .unwrap();
        let store = InMemoryStore::new();
        store.put(ServiceKey::new("AI Suite", None), record("CAN-P", 0)).unwrap();
        store
            .put(ServiceKey::new("Amazon Rekognition", None), record("CAN-C", 0))
            .unwrap();
        let catalog = vec![Service::new("Amazon Rekognition", 5.0)];

        for hours in [0, 12, 24, 48] {
            let states = reconcile(&catalog, &store, &policy, t0() + Duration::hours(hours));
            assert_eq!(states[0].lifecycle_status, LifecycleStatus::PayAsYouGo);
            assert!(!states[0].is_derived);
        }
    }

    #[test]
    fn test_parent_dominates_own_record() {
        let store = InMemoryStore::new();
        store.put(ServiceKey::new("Claude-A", None), record("CAN-C", 0)).unwrap();
        store.put(ServiceKey::new("Bedrock", None), record("CAN-P", 6)).unwrap();
        let catalog = vec![Service::new("Claude-A", 2.0)];

        let states = reconcile(&catalog, &store, &bedrock_policy(), t0() + Duration::hours(8));

        let state = &states[0];
        assert_eq!(state.lifecycle_status, LifecycleStatus::PendingViaParent);
        assert!(state.is_derived);
        assert_eq!(
            state.source_record.as_ref().unwrap().request_id.as_str(),
            "CAN-P"
        );
    }

    #[test]
    fn test_status_never_reverts_after_eta() {
        let store = InMemoryStore::new();
        let own = record("CAN-1", 0);
        store.put(ServiceKey::new("X", None), own.clone()).unwrap();
        let catalog = vec![Service::new("X", 1.0)];
        let policy = OverridePolicy::empty();

        let mut completed = false;
        for step in 0..=120 {
            let now = t0() + Duration::minutes(step * 17);
            let status = reconcile(&catalog, &store, &policy, now)[0].lifecycle_status;

            if now < own.eta_time {
                assert_eq!(status, LifecycleStatus::PendingOwn, "at {now}");
                assert!(!completed);
            } else {
                assert_eq!(status, LifecycleStatus::Completed, "at {now}");
                completed = true;
            }
        }
        assert!(completed);
    }

    #[tokio::test]
    async fn test_second_request_before_completion_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(
            ScriptedTransport::new()
                .accept(Some("CAN-1"))
                .accept(Some("CAN-2"))
                .accept(Some("CAN-3")),
        );
        let (controller, clock) =
            controller(store.clone(), transport.clone(), OverridePolicy::empty());
        let service = Service::new("X", 10.0).with_id("i-1");

        controller.request_cancellation(&service).await.unwrap();
        clock.advance(Duration::hours(23));

        let err = controller.request_cancellation(&service).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::AlreadyInProgress {
                reason: InProgressReason::OwnRecord(_),
                ..
            }
        ));
        assert_eq!(transport.request_count(), 1);

        // A different resource under the same name is a separate entity.
        let sibling = Service::new("X", 10.0).with_id("i-2");
        controller.request_cancellation(&sibling).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_one_key() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new().accept(Some("CAN-1")));
        let (controller, _) = controller(store.clone(), transport.clone(), OverridePolicy::empty());
        let service = Service::new("X", 10.0);

        let (first, second) = tokio::join!(
            controller.request_cancellation(&service),
            controller.request_cancellation(&service)
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LifecycleError::AlreadyInProgress { .. })));
        assert_eq!(transport.request_count(), 1);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_rejection_is_surfaced_and_not_recorded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(JsonFileStore::open(&path, Duration::hours(24)));
        let transport = Arc::new(ScriptedTransport::new().reject("AccessDenied"));
        let (controller, _) = controller(store.clone(), transport, OverridePolicy::empty());

        let err = controller
            .request_cancellation(&Service::new("X", 10.0))
            .await
            .unwrap_err();

        match err {
            LifecycleError::Transport(TransportError::Rejected(message)) => {
                assert_eq!(message, "AccessDenied");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.all_entries().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_request_id_is_tracked_locally() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new().accept(None));
        let (controller, _) = controller(store.clone(), transport.clone(), OverridePolicy::empty());

        let record = controller
            .request_cancellation(&Service::new("Amazon EC2", 61.0).with_id("i-0abc"))
            .await
            .unwrap();

        assert!(record.request_id.is_local());
        let sent = transport.requests.lock().unwrap();
        assert_eq!(sent[0].service_name, "Amazon EC2");
        assert_eq!(sent[0].service_id.as_deref(), Some("i-0abc"));
    }

    #[tokio::test]
    async fn test_clear_after_reclassification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(JsonFileStore::open(&path, Duration::hours(24)));
        store
            .put(ServiceKey::new("Amazon Polly", None), record("CAN-1", 0))
            .unwrap();
        let (controller, _) = controller(
            store.clone(),
            Arc::new(ScriptedTransport::new()),
            OverridePolicy::aws_defaults(),
        );

        let removed = controller.prune_exempt_records().unwrap();
        assert_eq!(removed, vec![ServiceKey::new("Amazon Polly", None)]);

        let reopened = JsonFileStore::open(&path, Duration::hours(24));
        assert!(reopened.all_entries().unwrap().is_empty());
    }
}
