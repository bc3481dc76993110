//! Runtime integration tests for conveyor workers.
//!
//! Covers lifecycle events, retry and failure paths, handler timeouts,
//! cancellation of in-flight jobs, resource limits and event jobs.

use std::sync::Arc;
use std::time::Duration;

use conveyor::{
    resident_memory_mb, ErrorKind, Event, EventBus, Job, JobDispatcher, JobLifecycleEvent,
    LifecycleBus, Mail, MailListener, QueueConfig, QueueSet, Scope, WorkerBuilder, WorkerOptions,
    WorkerProfiles, WorkerStopReason,
};
use conveyor_testkit::{MemoryMailSink, MockHandler, RecordingFailureSink, TestJob};
use tokio::sync::broadcast;
use tokio::time::timeout;

fn fast_options(id: &str) -> WorkerOptions {
    WorkerOptions::new(id)
        .with_sleep(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(5))
}

async fn collect_events(
    rx: &mut broadcast::Receiver<JobLifecycleEvent>,
) -> Vec<JobLifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = timeout(Duration::from_millis(50), rx.recv()).await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn worker_emits_lifecycle_for_successful_job() {
    let bus = Arc::new(LifecycleBus::new(64));
    let mut rx = bus.subscribe();
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues)).with_lifecycle(Arc::clone(&bus));
    let id = dispatcher.dispatch(TestJob::simple("report")).unwrap();

    let worker = WorkerBuilder::new(fast_options("w1").with_max_jobs(1))
        .with_queues(queues)
        .with_handler(Arc::new(MockHandler::new()))
        .with_lifecycle(Arc::clone(&bus))
        .build()
        .unwrap();
    let reason = timeout(Duration::from_secs(5), worker.run(&Scope::new())).await.unwrap();
    assert_eq!(reason, WorkerStopReason::MaxJobs);

    let events = collect_events(&mut rx).await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            JobLifecycleEvent::Enqueued { .. } => "enqueued",
            JobLifecycleEvent::Popped { .. } => "popped",
            JobLifecycleEvent::Completed { .. } => "completed",
            JobLifecycleEvent::Retried { .. } => "retried",
            JobLifecycleEvent::Failed { .. } => "failed",
            JobLifecycleEvent::WorkerStopped { .. } => "stopped",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["enqueued", "popped", "completed", "stopped"]);
    assert!(events[..3].iter().all(|e| e.meta().unwrap().job_id == id));
}

#[tokio::test]
async fn failing_job_is_retried_then_recorded() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues)).with_default_max_retries(2);
    let id = dispatcher.dispatch(TestJob::failing("charge", "card declined")).unwrap();

    let handler = MockHandler::always_failing();
    let failures = RecordingFailureSink::new();
    let worker = WorkerBuilder::new(fast_options("w1").with_max_jobs(3))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .with_failure_sink(Arc::new(failures.clone()))
        .build()
        .unwrap();
    worker.run(&Scope::new()).await;

    let attempts: Vec<u32> = handler.record().iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![0, 1, 2]);

    let records = failures.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, id);
    assert_eq!(records[0].name, "failing");
    assert_eq!(records[0].attempts, 2);
    assert_eq!(records[0].kind, ErrorKind::Handler);

    let queue = queues.get("default").unwrap();
    assert!(queue.is_empty());
    assert_eq!(queue.dead_letter_count(), 1);
}

#[tokio::test]
async fn flaky_job_succeeds_after_retry() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues));
    dispatcher.dispatch(TestJob::simple("sync-crm")).unwrap();

    let handler = MockHandler::new().failing_first(1);
    let failures = RecordingFailureSink::new();
    let worker = WorkerBuilder::new(fast_options("w1").with_max_jobs(2))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .with_failure_sink(Arc::new(failures.clone()))
        .build()
        .unwrap();
    worker.run(&Scope::new()).await;

    handler.assert_handle_count_eq(2);
    assert!(failures.is_empty());
    assert_eq!(queues.total_size(), 0);
}

#[tokio::test]
async fn handler_timeout_fails_with_deadline() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    queues
        .get_or_create("default")
        .push(Job::new(TestJob::simple("slow")).with_max_retries(0));

    let failures = RecordingFailureSink::new();
    let worker = WorkerBuilder::new(
        fast_options("w1")
            .with_max_jobs(1)
            .with_timeout(Duration::from_millis(20)),
    )
    .with_queues(Arc::clone(&queues))
    .with_handler(Arc::new(MockHandler::new().with_delay(Duration::from_secs(10))))
    .with_failure_sink(Arc::new(failures.clone()))
    .build()
    .unwrap();

    let reason = timeout(Duration::from_secs(5), worker.run(&Scope::new())).await.unwrap();
    assert_eq!(reason, WorkerStopReason::MaxJobs);

    let records = failures.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ErrorKind::Deadline);
}

#[tokio::test]
async fn cancellation_requeues_in_flight_job() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues));
    let id = dispatcher.dispatch(TestJob::simple("long")).unwrap();

    let handler = MockHandler::new().with_delay(Duration::from_secs(10));
    let worker = WorkerBuilder::new(fast_options("w1"))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .build()
        .unwrap();

    let scope = Scope::new();
    let run = worker.spawn(scope.clone());
    while handler.record().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    scope.cancel();

    let reason = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert_eq!(reason, WorkerStopReason::Cancelled);

    let queue = queues.get("default").unwrap();
    let requeued = queue.pop().expect("cancelled job should be retried");
    assert_eq!(requeued.id(), &id);
    assert_eq!(requeued.attempts(), 1);
}

#[tokio::test]
async fn scope_deadline_stops_worker() {
    let queues: Arc<QueueSet<TestJob>> = Arc::new(QueueSet::default());
    let worker = WorkerBuilder::new(fast_options("w1"))
        .with_queues(queues)
        .with_handler(Arc::new(MockHandler::new()))
        .build()
        .unwrap();

    let scope = Scope::with_timeout(Duration::from_millis(30));
    let reason = timeout(Duration::from_secs(5), worker.run(&scope)).await.unwrap();
    assert_eq!(reason, WorkerStopReason::Cancelled);
}

#[tokio::test]
async fn memory_limit_stops_worker() {
    if resident_memory_mb().is_none() {
        return;
    }
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues));
    for i in 0..3 {
        dispatcher.dispatch(TestJob::simple(format!("job-{i}"))).unwrap();
    }

    let worker = WorkerBuilder::new(fast_options("w1").with_memory_limit_mb(1))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(MockHandler::new()))
        .build()
        .unwrap();
    let reason = timeout(Duration::from_secs(5), worker.run(&Scope::new())).await.unwrap();

    assert_eq!(reason, WorkerStopReason::MemoryLimit);
    assert_eq!(worker.processed(), 1);
    assert_eq!(queues.total_size(), 2);
}

#[tokio::test]
async fn worker_drains_several_queues_from_profile() {
    let profiles = WorkerProfiles::from_json_str(
        r#"{"mixed": {"queues": ["default", "slow"], "max_jobs": 4, "sleep": 1}}"#,
    )
    .unwrap();
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues));
    dispatcher.dispatch(TestJob::simple("a")).unwrap();
    dispatcher.dispatch(TestJob::simple("b")).unwrap();
    dispatcher.dispatch(TestJob::slow("c", Duration::from_millis(1))).unwrap();
    dispatcher.dispatch(TestJob::slow("d", Duration::from_millis(1))).unwrap();

    let handler = MockHandler::new();
    let worker = WorkerBuilder::from_config("mixed-1", profiles.select("mixed").unwrap())
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .build()
        .unwrap();
    let reason = timeout(Duration::from_secs(5), worker.run(&Scope::new())).await.unwrap();

    assert_eq!(reason, WorkerStopReason::MaxJobs);
    let mut seen: Vec<String> = handler.record().into_iter().map(|r| r.queue).collect();
    seen.sort();
    assert_eq!(seen, vec!["default", "default", "slow", "slow"]);
}

#[tokio::test]
async fn profile_tries_sets_ceiling_for_undeclared_jobs() {
    let profiles = WorkerProfiles::from_json_str(
        r#"{"strict": {"queues": ["default"], "tries": 1, "max_jobs": 2, "sleep": 1}}"#,
    )
    .unwrap();
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues));
    let id = dispatcher.dispatch(TestJob::failing("charge", "card declined")).unwrap();

    let handler = MockHandler::always_failing();
    let failures = RecordingFailureSink::new();
    let worker = WorkerBuilder::from_config("strict-1", profiles.select("strict").unwrap())
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .with_failure_sink(Arc::new(failures.clone()))
        .build()
        .unwrap();
    let reason = timeout(Duration::from_secs(5), worker.run(&Scope::new())).await.unwrap();

    assert_eq!(reason, WorkerStopReason::MaxJobs);
    let attempts: Vec<u32> = handler.record().iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![0, 1]);

    let records = failures.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, id);
    assert_eq!(records[0].attempts, 1);

    let queue = queues.get("default").unwrap();
    assert!(queue.is_empty());
    assert_eq!(queue.dead_letters()[0].job.max_retries(), 1);
}

#[tokio::test]
async fn declared_ceiling_wins_over_profile_tries() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    queues
        .get_or_create("default")
        .push(Job::new(TestJob::failing("charge", "card declined")).with_max_retries(2));

    let handler = MockHandler::always_failing();
    let worker = WorkerBuilder::new(fast_options("w1").with_tries(1).with_max_jobs(3))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .with_failure_sink(Arc::new(RecordingFailureSink::new()))
        .build()
        .unwrap();
    worker.run(&Scope::new()).await;

    let attempts: Vec<u32> = handler.record().iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
}

#[tokio::test]
async fn limit_stop_returns_batch_ahead_of_later_dispatches() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let dispatcher = JobDispatcher::new(Arc::clone(&queues));
    let ids: Vec<_> = (0..5)
        .map(|i| dispatcher.dispatch(TestJob::simple(format!("job-{i}"))).unwrap())
        .collect();

    let handler = MockHandler::new();
    let worker = WorkerBuilder::new(fast_options("w1").with_batch_size(5).with_max_jobs(2))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::new(handler.clone()))
        .build()
        .unwrap();
    worker.run(&Scope::new()).await;
    let late = dispatcher.dispatch(TestJob::simple("late")).unwrap();

    let mut expected = ids[2..].to_vec();
    expected.push(late);
    assert_eq!(queues.get("default").unwrap().ids(), expected);
    assert_eq!(handler.handled_ids(), ids[..2].to_vec());
}

#[tokio::test]
async fn event_jobs_run_listeners_on_worker() {
    let queues = Arc::new(QueueSet::new(QueueConfig::default()));
    let bus = Arc::new(
        EventBus::new(JobDispatcher::new(Arc::clone(&queues)))
            .on_queue("events")
            .with_max_retries(1),
    );
    let mailer = MemoryMailSink::new();
    bus.listen(
        "user.registered",
        Arc::new(MailListener::new(Arc::new(mailer.clone()), |event: &Event<String>| {
            Some(Mail {
                to: event.data().clone(),
                subject: "Welcome".into(),
                body: "Thanks for signing up".into(),
            })
        })),
    );

    mailer.set_failing(true);
    bus.dispatch_async(Event::new("user.registered", "ada@example.com".to_string()))
        .unwrap();

    let failures = RecordingFailureSink::new();
    let worker = WorkerBuilder::new(fast_options("events").with_queues(["events"]).with_max_jobs(2))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::clone(&bus))
        .with_failure_sink(Arc::new(failures.clone()))
        .build()
        .unwrap();
    worker.run(&Scope::new()).await;

    let records = failures.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "user.registered");
    assert_eq!(records[0].queue, "events");
    assert!(records[0].reason.contains("mail transport unavailable"));

    mailer.set_failing(false);
    bus.dispatch_async(Event::new("user.registered", "grace@example.com".to_string()))
        .unwrap();
    let worker = WorkerBuilder::new(fast_options("events").with_queues(["events"]).with_max_jobs(1))
        .with_queues(Arc::clone(&queues))
        .with_handler(Arc::clone(&bus))
        .build()
        .unwrap();
    worker.run(&Scope::new()).await;

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "grace@example.com");
}
