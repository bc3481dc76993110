/// Builder for constructing workers.
pub mod builder;
/// Worker loop draining queues through a handler.
pub mod supervisor;
/// Worker options and stop reasons.
pub mod worker;

pub use builder::WorkerBuilder;
pub use supervisor::Worker;
pub use worker::{resident_memory_mb, WorkerOptions, WorkerStopReason};
