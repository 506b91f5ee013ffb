use futures::future::join_all;
use segment_client::test_utils::{requested_identifier, MockTransport};
use segment_client::{
    BatchConfig, Batcher, CheckError, IdentifierType, TransportError, TransportResponse,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DELAY: Duration = Duration::from_millis(100);

fn start(transport: &Arc<MockTransport>, config: BatchConfig) -> Batcher {
    Batcher::start(&config, Duration::from_secs(2), transport.clone())
}

#[tokio::test(start_paused = true)]
async fn concurrent_checks_for_one_identifier_share_one_request() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let segments: Vec<u32> = (100..110).collect();
    let results = join_all(
        segments
            .iter()
            .map(|&s| batcher.check("shared-uid", s, IdentifierType::DeviceId)),
    )
    .await;

    assert!(results.iter().all(|r| *r == Ok(true)));
    assert_eq!(transport.request_count(), 1);

    let request = &transport.requests()[0];
    let sent: HashSet<u32> = request
        .query_values("segment_id")
        .into_iter()
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(sent, segments.into_iter().collect());
    assert_eq!(request.query_values("device_id"), vec!["shared-uid"]);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_waits_for_delay() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(&transport, BatchConfig::new(50, DELAY));
    let started = Instant::now();

    let pending: Vec<_> = (0..49)
        .map(|s| batcher.enqueue("uid", s, IdentifierType::PartnerUid).unwrap())
        .collect();

    tokio::time::sleep(DELAY - Duration::from_millis(1)).await;
    assert_eq!(transport.request_count(), 0);
    assert_eq!(batcher.pending(), 49);

    let results = join_all(pending).await;
    assert!(results.iter().all(|r| *r == Ok(true)));
    assert!(started.elapsed() >= DELAY);

    let stats = batcher.stats();
    assert_eq!(stats.flushes_by_timer, 1);
    assert_eq!(stats.flushes_by_size, 0);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.requests()[0].query_values("segment_id").len(), 49);
}

#[tokio::test(start_paused = true)]
async fn full_batch_flushes_immediately() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(&transport, BatchConfig::new(50, DELAY));
    let started = Instant::now();

    let pending: Vec<_> = (0..50)
        .map(|s| batcher.enqueue("uid", s, IdentifierType::PartnerUid).unwrap())
        .collect();

    let results = join_all(pending).await;
    assert!(results.iter().all(|r| *r == Ok(true)));
    assert!(started.elapsed() < DELAY);

    let stats = batcher.stats();
    assert_eq!(stats.flushes_by_size, 1);
    assert_eq!(stats.flushes_by_timer, 0);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn batches_never_exceed_max_size() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(
        &transport,
        BatchConfig::new(4, DELAY).with_queue_capacity(100),
    );

    let pending: Vec<_> = (0..10)
        .map(|i| {
            batcher
                .enqueue(format!("uid-{i}"), 1, IdentifierType::Otp)
                .unwrap()
        })
        .collect();
    let results = join_all(pending).await;
    assert!(results.iter().all(|r| *r == Ok(true)));

    let stats = batcher.stats();
    // 4 + 4 by size, the last 2 by timer
    assert_eq!(stats.flushes_by_size, 2);
    assert_eq!(stats.flushes_by_timer, 1);
    assert_eq!(stats.groups_dispatched, 10);
}

#[tokio::test(start_paused = true)]
async fn capacity_forces_out_of_cycle_flush() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(
        &transport,
        BatchConfig::new(10, Duration::from_secs(60)).with_queue_capacity(20),
    );

    // no await between admissions, so only the capacity path can flush
    let pending: Vec<_> = (0..20)
        .map(|s| batcher.enqueue("uid", s, IdentifierType::DeviceId).unwrap())
        .collect();
    assert_eq!(batcher.pending(), 0);

    let results = join_all(pending).await;
    assert!(results.iter().all(|r| *r == Ok(true)));

    let stats = batcher.stats();
    assert_eq!(stats.flushes_forced, 2);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn segment_error_and_missing_segment_stay_isolated() {
    let transport = Arc::new(MockTransport::with_body(
        r#"{"10":{"ok":true},"11":{"error":"blocked"}}"#,
    ));
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let (ten, eleven, twelve) = tokio::join!(
        batcher.check("uid", 10, IdentifierType::DeviceId),
        batcher.check("uid", 11, IdentifierType::DeviceId),
        batcher.check("uid", 12, IdentifierType::DeviceId),
    );

    assert_eq!(ten, Ok(true));
    assert_eq!(
        eleven,
        Err(CheckError::CheckFailed {
            segment_id: 11,
            message: "blocked".to_string()
        })
    );
    assert_eq!(twelve, Err(CheckError::SegmentNotFound { segment_id: 12 }));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_only_fails_its_group() {
    let transport = Arc::new(MockTransport::new(|req| {
        match requested_identifier(req).as_deref() {
            Some("unreachable") => Err(TransportError::connect("connection reset")),
            _ => Ok(MockTransport::all_members(req)),
        }
    }));
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let (a, b, c, d) = tokio::join!(
        batcher.check("unreachable", 1, IdentifierType::DeviceId),
        batcher.check("healthy", 1, IdentifierType::DeviceId),
        batcher.check("unreachable", 2, IdentifierType::DeviceId),
        batcher.check("healthy", 2, IdentifierType::DeviceId),
    );

    for failed in [a, c] {
        let err = failed.unwrap_err();
        assert!(err.is_group_wide());
        assert!(matches!(err, CheckError::Transport(TransportError::Connect(_))));
    }
    assert_eq!(b, Ok(true));
    assert_eq!(d, Ok(true));

    let stats = batcher.stats();
    assert_eq!(stats.total_flushes(), 1);
    assert_eq!(stats.groups_dispatched, 2);
    assert_eq!(stats.groups_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn non_success_status_fails_whole_group() {
    let transport = Arc::new(MockTransport::new(|_| {
        Ok(TransportResponse::new(500, r#"{"10":{"ok":true}}"#))
    }));
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let (a, b) = tokio::join!(
        batcher.check("uid", 10, IdentifierType::Otp),
        batcher.check("uid", 11, IdentifierType::Otp),
    );

    assert!(matches!(a, Err(CheckError::Status { status: 500, .. })));
    assert!(matches!(b, Err(CheckError::Status { status: 500, .. })));
}

#[tokio::test(start_paused = true)]
async fn shutdown_fails_every_queued_check() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(&transport, BatchConfig::new(50, Duration::from_secs(60)));

    let pending: Vec<_> = (0..5)
        .map(|s| batcher.enqueue("uid", s, IdentifierType::DeviceId).unwrap())
        .collect();
    batcher.shutdown().await;

    let results = join_all(pending).await;
    assert!(results.iter().all(|r| *r == Err(CheckError::Shutdown)));
    assert_eq!(transport.request_count(), 0);
    assert_eq!(batcher.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_pairs_collapse_to_one_segment_parameter() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let results = join_all((0..3).map(|_| batcher.check("uid", 42, IdentifierType::ExternalUid))).await;

    assert!(results.iter().all(|r| *r == Ok(true)));
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.requests()[0].query_values("segment_id"), vec!["42"]);
}

#[tokio::test(start_paused = true)]
async fn mixed_identifier_types_are_rejected() {
    let transport = Arc::new(MockTransport::members());
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let (first, second) = tokio::join!(
        batcher.check("uid", 1, IdentifierType::DeviceId),
        batcher.check("uid", 2, IdentifierType::Otp),
    );

    assert_eq!(first, Ok(true));
    assert!(matches!(second, Err(CheckError::Admission(_))));
    assert_eq!(transport.requests()[0].query_values("segment_id"), vec!["1"]);

    let stats = batcher.stats();
    assert_eq!(stats.tasks_rejected, 1);
    assert_eq!(stats.tasks_dispatched, 1);
    assert_eq!(stats.coalescing_ratio(), 1.0);
    assert_eq!(stats.tasks_resolved(), stats.tasks_admitted);
}

#[tokio::test(start_paused = true)]
async fn checks_arriving_during_a_flush_start_a_new_window() {
    let transport = Arc::new(
        MockTransport::members().with_latency(Duration::from_millis(30)),
    );
    let batcher = start(&transport, BatchConfig::new(50, DELAY));

    let early = batcher.enqueue("uid", 1, IdentifierType::DeviceId).unwrap();
    tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
    let late = batcher.enqueue("uid", 2, IdentifierType::DeviceId).unwrap();

    assert_eq!(early.await, Ok(true));
    assert_eq!(late.await, Ok(true));
    assert_eq!(transport.request_count(), 2);
    assert_eq!(batcher.stats().flushes_by_timer, 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_holds_when_groups_wait_for_a_permit() {
    let transport = Arc::new(MockTransport::members().with_latency(Duration::from_secs(5)));
    let delay = Duration::from_millis(50);
    let deadline = Duration::from_millis(200);
    let batcher = Batcher::start(
        &BatchConfig::new(50, delay).with_max_concurrency(1),
        deadline,
        transport.clone(),
    );
    let started = Instant::now();

    let results = join_all(
        ["first", "second", "third"]
            .into_iter()
            .map(|uid| batcher.check(uid, 1, IdentifierType::DeviceId)),
    )
    .await;

    assert!(started.elapsed() <= delay + deadline + Duration::from_millis(5));
    for result in results {
        assert_eq!(
            result,
            Err(CheckError::Transport(TransportError::Timeout(deadline)))
        );
    }
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_producers_lose_no_checks() {
    const PRODUCERS: u32 = 8;
    const PER_PRODUCER: u32 = 500;

    let transport = Arc::new(MockTransport::members());
    let batcher = Arc::new(Batcher::start(
        &BatchConfig::new(50, Duration::from_millis(5)),
        Duration::from_secs(5),
        transport.clone(),
    ));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move {
                let checks = (0..PER_PRODUCER).map(|i| {
                    batcher.check(format!("uid-{}", i % 100), p * 1000 + i, IdentifierType::DeviceId)
                });
                join_all(checks).await
            })
        })
        .collect();

    let mut resolved = 0;
    for producer in producers {
        let results = producer.await.unwrap();
        assert!(results.iter().all(|r| *r == Ok(true)));
        resolved += results.len();
    }
    let total = (PRODUCERS * PER_PRODUCER) as usize;
    assert_eq!(resolved, total);

    // every (identifier, segment) pair went out in exactly one request
    let mut sent = HashSet::new();
    for request in transport.requests() {
        let uid = requested_identifier(&request).unwrap();
        for segment in request.query_values("segment_id") {
            let segment: u32 = segment.parse().unwrap();
            assert!(sent.insert((uid.clone(), segment)), "{uid}/{segment} sent twice");
        }
    }
    assert_eq!(sent.len(), total);

    let stats = batcher.stats();
    assert_eq!(stats.tasks_admitted as usize, total);
    assert_eq!(stats.tasks_resolved() as usize, total);
    assert_eq!(stats.tasks_dispatched as usize, total);
    assert_eq!(stats.groups_dispatched as usize, transport.request_count());
}
