//! Emergency preemption against the in-memory store, on paused time.

mod common;

use std::time::Duration;

use common::{bhubaneswar, Harness};
use traffic_common::{GeoPoint, JunctionId, LogSignal, Signal, TrafficError};
use traffic_engine::PreemptionRequest;
use traffic_store::EventLog;

const VANI_VIHAR: GeoPoint = GeoPoint {
    lat: 20.2871,
    lng: 85.8260,
};

fn request(origin: GeoPoint, radius_km: f64, max_count: usize, hold_seconds: i64) -> PreemptionRequest {
    PreemptionRequest {
        origin,
        radius_km,
        max_count,
        hold_seconds,
        vehicle: "ambulance".to_string(),
    }
}

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn picks_nearest_within_radius() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let outcome = h
        .preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();

    assert_eq!(outcome.affected, vec![1, 3, 11]);
    assert_eq!(outcome.hold_seconds, 20);
    assert!(outcome.revert_at.is_some());
    assert_eq!(h.scheduler.pending(), 1);
}

#[tokio::test(start_paused = true)]
async fn large_affect_count_stops_at_radius() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let outcome = h
        .preemption
        .preempt(request(VANI_VIHAR, 2.5, 12, 20))
        .await
        .unwrap();

    // Everything except Khandagiri Road (4.0 km) and Patia (6.5 km).
    assert_eq!(outcome.affected, vec![1, 3, 11, 7, 8, 9, 5, 10, 4, 2]);
    assert_eq!(h.signal(6).await, Signal::Red);
    assert_eq!(h.signal(12).await, Signal::Red);
}

#[tokio::test(start_paused = true)]
async fn single_junction_inside_radius_is_enough() {
    let h = Harness::new(bhubaneswar(), vec![]);

    // Bapuji Nagar is 2.04 km away, the next nearest 2.64 km.
    let outcome = h
        .preemption
        .preempt(request(GeoPoint::new(20.29, 85.80), 2.5, 3, 20))
        .await
        .unwrap();

    assert_eq!(outcome.affected, vec![9]);
}

#[tokio::test(start_paused = true)]
async fn falls_back_to_nearest_when_radius_is_empty() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let outcome = h
        .preemption
        .preempt(request(GeoPoint::new(21.0, 86.0), 2.5, 2, 20))
        .await
        .unwrap();

    assert_eq!(outcome.affected, vec![12, 10]);
    assert_eq!(h.signal(12).await, Signal::Green);
    assert_eq!(h.signal(10).await, Signal::Green);
}

#[tokio::test(start_paused = true)]
async fn zero_radius_off_junction_uses_fallback() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let outcome = h
        .preemption
        .preempt(request(GeoPoint::new(20.28, 85.82), 0.0, 3, 20))
        .await
        .unwrap();

    assert_eq!(outcome.affected, vec![1, 5, 2]);
}

#[tokio::test(start_paused = true)]
async fn forces_green_and_logs_override() {
    let h = Harness::new(bhubaneswar(), vec![]);

    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();

    for id in [1, 3, 11] {
        assert_eq!(h.signal(id).await, Signal::Green);
    }
    assert_eq!(h.signal(7).await, Signal::Red);

    let log = h.store.traffic_log(None, 100).await.unwrap();
    assert_eq!(log.len(), 3);
    assert!(log
        .iter()
        .all(|e| e.signal == LogSignal::GreenPreempt && e.vehicle_count == 0));
}

#[tokio::test(start_paused = true)]
async fn reverts_after_hold() {
    let h = Harness::new(bhubaneswar(), vec![]);

    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();

    sleep_secs(19).await;
    assert_eq!(h.signal(1).await, Signal::Green);
    assert_eq!(h.scheduler.pending(), 1);

    sleep_secs(2).await;
    for id in [1, 3, 11] {
        assert_eq!(h.signal(id).await, Signal::Red);
    }
    assert_eq!(h.scheduler.pending(), 0);

    let log = h.store.traffic_log(Some(1), 10).await.unwrap();
    assert_eq!(log[0].signal, LogSignal::Red);
    assert_eq!(log[0].vehicle_count, 0);
    assert_eq!(log[1].signal, LogSignal::GreenPreempt);
}

#[tokio::test(start_paused = true)]
async fn revert_restores_each_junction_to_its_own_snapshot() {
    let h = Harness::new(bhubaneswar(), vec![]);
    h.manual.set_signal(3, Signal::Green).await.unwrap();

    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();
    sleep_secs(21).await;

    assert_eq!(h.signal(1).await, Signal::Red);
    assert_eq!(h.signal(3).await, Signal::Green);
    assert_eq!(h.signal(11).await, Signal::Red);
}

#[tokio::test(start_paused = true)]
async fn zero_hold_reverts_on_next_scheduler_pass() {
    let h = Harness::new(bhubaneswar(), vec![]);

    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 1, 0))
        .await
        .unwrap();
    assert_eq!(h.signal(1).await, Signal::Green);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.signal(1).await, Signal::Red);
}

#[tokio::test(start_paused = true)]
async fn negative_hold_behaves_like_zero() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let outcome = h
        .preemption
        .preempt(request(VANI_VIHAR, 2.5, 1, -5))
        .await
        .unwrap();
    assert_eq!(outcome.hold_seconds, -5);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.signal(1).await, Signal::Red);
}

#[tokio::test(start_paused = true)]
async fn overlapping_hold_that_fires_last_wins() {
    let h = Harness::new(bhubaneswar(), vec![]);

    // Long hold first, then a short one over the same junction.
    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();
    sleep_secs(5).await;
    h.preemption
        .preempt(request(VANI_VIHAR, 0.0, 1, 5))
        .await
        .unwrap();

    // The short hold captured GREEN and restores it at t=10.
    sleep_secs(6).await;
    assert_eq!(h.signal(1).await, Signal::Green);

    // The long hold restores the pre-emergency RED at t=20.
    sleep_secs(10).await;
    assert_eq!(h.signal(1).await, Signal::Red);
}

#[tokio::test(start_paused = true)]
async fn overlapping_hold_can_leave_junction_green() {
    let h = Harness::new(bhubaneswar(), vec![]);

    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 10))
        .await
        .unwrap();
    sleep_secs(5).await;
    h.preemption
        .preempt(request(VANI_VIHAR, 0.0, 1, 20))
        .await
        .unwrap();

    sleep_secs(6).await;
    assert_eq!(h.signal(1).await, Signal::Red);

    // The second task's snapshot was GREEN, and it fires last.
    sleep_secs(20).await;
    assert_eq!(h.signal(1).await, Signal::Green);
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_positioned_junctions_is_a_no_op() {
    let junctions = bhubaneswar()
        .into_iter()
        .map(|mut j| {
            j.position = None;
            j
        })
        .collect();
    let h = Harness::new(junctions, vec![]);

    let outcome = h
        .preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();

    assert!(outcome.affected.is_empty());
    assert!(outcome.revert_at.is_none());
    assert_eq!(h.scheduler.pending(), 0);
    assert!(h.store.traffic_log(None, 10).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn revert_failure_is_dropped() {
    let h = Harness::new(bhubaneswar(), vec![]);

    h.preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap();

    h.store.set_unavailable(true);
    sleep_secs(21).await;
    h.store.set_unavailable(false);

    assert_eq!(h.scheduler.pending(), 0);
    assert_eq!(h.signal(1).await, Signal::Green);

    // Nothing retries it later.
    sleep_secs(600).await;
    assert_eq!(h.signal(1).await, Signal::Green);
}

#[tokio::test(start_paused = true)]
async fn store_failure_surfaces_as_persistence_error() {
    let h = Harness::new(bhubaneswar(), vec![]);
    h.store.set_unavailable(true);

    let err = h
        .preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap_err();

    assert!(matches!(err, TrafficError::Persistence(_)));
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn stopped_scheduler_reverts_inline_and_errors() {
    let mut h = Harness::new(bhubaneswar(), vec![]);
    h.worker.abort();
    let _ = (&mut h.worker).await;

    let err = h
        .preemption
        .preempt(request(VANI_VIHAR, 2.5, 3, 20))
        .await
        .unwrap_err();

    assert!(matches!(err, TrafficError::Persistence(_)));
    for id in [1, 3, 11] {
        assert_eq!(h.signal(id).await, Signal::Red);
    }

    let log = h.store.traffic_log(None, 100).await.unwrap();
    assert_eq!(log.len(), 6);
    assert_eq!(log.iter().filter(|e| e.signal == LogSignal::GreenPreempt).count(), 3);
    assert_eq!(log.iter().filter(|e| e.signal == LogSignal::Red).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn rejects_invalid_requests() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let cases = [
        (request(GeoPoint::new(91.0, 85.0), 2.5, 3, 20), "lat/lng out of range"),
        (request(GeoPoint::new(20.0, -181.0), 2.5, 3, 20), "lat/lng out of range"),
        (request(VANI_VIHAR, 2.5, 0, 20), "affect_count must be at least 1"),
        (
            request(VANI_VIHAR, 2.5, 3, 86_401),
            "duration must be at most 86400 seconds",
        ),
    ];

    for (req, expected) in cases {
        match h.preemption.preempt(req).await {
            Err(TrafficError::Validation(msg)) => assert_eq!(msg, expected),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
    assert_eq!(h.signal(1).await, Signal::Red);
}

#[tokio::test(start_paused = true)]
async fn concurrent_preemptions_each_schedule_a_revert() {
    let h = Harness::new(bhubaneswar(), vec![]);

    let requests = [
        request(VANI_VIHAR, 0.0, 1, 10),
        request(GeoPoint::new(21.0, 86.0), 0.0, 1, 10),
        request(GeoPoint::new(20.29, 85.80), 0.0, 1, 10),
    ];
    let outcomes = futures::future::join_all(requests.into_iter().map(|r| h.preemption.preempt(r))).await;

    let mut affected: Vec<JunctionId> = outcomes
        .into_iter()
        .flat_map(|o| o.unwrap().affected)
        .collect();
    affected.sort();
    assert_eq!(affected, vec![1, 9, 12]);
    assert_eq!(h.scheduler.pending(), 3);

    sleep_secs(11).await;
    for id in [1, 9, 12] {
        assert_eq!(h.signal(id).await, Signal::Red);
    }
}
