//! Benchmarks for queue operations using criterion.
//!
//! Covers single and batch push, batch pop, the retry cycle and a worker
//! draining a dispatched backlog.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use conveyor::{Job, JobDispatcher, Queue, QueueSet, Scope, WorkerBuilder, WorkerOptions};
use conveyor_testkit::{MockHandler, TestJob};
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn bench_push_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_single");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        let queue = Queue::new("bench");
        let job = TestJob::simple("bench-job");
        b.iter(|| {
            queue.push(Job::new(job.clone()));
            if queue.size() > 10_000 {
                queue.clear();
            }
        });
    });

    group.bench_function("with_scope", |b| {
        let queue = Queue::new("bench");
        let scope = Scope::new();
        let job = TestJob::simple("bench-job");
        b.iter(|| {
            queue
                .push_with_scope(&scope, Job::new(job.clone()))
                .expect("push should succeed");
            if queue.size() > 10_000 {
                queue.clear();
            }
        });
    });

    group.finish();
}

fn bench_push_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_many");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let queue = Queue::new("bench");
            b.iter(|| {
                let jobs = (0..size)
                    .map(|i| Job::new(TestJob::simple(format!("job-{i}"))))
                    .collect();
                queue.push_many(jobs);
                queue.clear();
            });
        });
    }

    group.finish();
}

fn bench_pop_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("pop_many");

    for batch in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let queue = Queue::new("bench");
            b.iter(|| {
                if queue.size() < batch {
                    queue.push_many(
                        (0..1000)
                            .map(|i| Job::new(TestJob::simple(format!("job-{i}"))))
                            .collect(),
                    );
                }
                queue.pop_many(batch)
            });
        });
    }

    group.finish();
}

fn bench_retry_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_cycle");

    group.bench_function("pop_retry", |b| {
        let queue = Queue::new("bench");
        queue.push(Job::new(TestJob::simple("flaky")).with_max_retries(u32::MAX));
        b.iter(|| {
            let job = queue.pop().expect("job should be present");
            queue.retry(job).expect("retry should succeed");
        });
    });

    group.finish();
}

fn bench_worker_drain(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("worker_drain");
    group.sample_size(20);

    for jobs in [100u64, 1000] {
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.to_async(&rt).iter(|| async move {
                let queues = Arc::new(QueueSet::default());
                let dispatcher = JobDispatcher::new(Arc::clone(&queues));
                for i in 0..jobs {
                    dispatcher
                        .dispatch(TestJob::simple(format!("job-{i}")))
                        .expect("dispatch should succeed");
                }

                let worker = WorkerBuilder::new(
                    WorkerOptions::new("bench")
                        .with_batch_size(50)
                        .with_max_jobs(jobs)
                        .with_sleep(Duration::from_millis(1)),
                )
                .with_queues(queues)
                .with_handler(Arc::new(MockHandler::new()))
                .build()
                .expect("worker should build");
                worker.run(&Scope::new()).await
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_push_single,
    bench_push_many,
    bench_pop_many,
    bench_retry_cycle,
    bench_worker_drain
);
criterion_main!(benches);
