//! Test doubles for conveyor.

mod capability;
mod job;
mod mock;

pub use capability::{LogLine, MemoryKvStore, MemoryLogSink, MemoryMailSink};
pub use job::{TestJob, TestJobKind};
pub use mock::{HandleRecord, MockHandler, RecordingFailureSink};
