//! bundlegate-ingest: from uploaded project to reviewable build
//!
//! Drives a submission through unpack, (opt-in) build, sandboxing and
//! manifest synthesis, then hands it to review by advancing the build
//! record and updating its listing.
//!
//! ## Key Components
//!
//! - `IngestWorker`: the per-job pipeline over a private scratch directory
//! - `ProjectBuilder` / `NodeProjectBuilder`: time-boxed install + build
//! - `WorkerPool` / `JobQueue`: bounded concurrency, retry with backoff
//! - `JobLog`: JSON-lines audit log per job
//! - `submit_inline`: single-document submissions without an archive

pub mod config;
mod error;
pub mod inline;
pub mod joblog;
pub mod pool;
pub mod project;
pub mod unpack;
pub mod worker;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use inline::{submit_inline, InlineOutcome, InlineSubmission};
pub use joblog::{JobLog, LogEntry};
pub use pool::{run_with_retries, JobQueue, JobReport, WorkerPool};
pub use project::{NodeProjectBuilder, PackageManager, ProjectBuilder};
pub use unpack::unpack_zip;
pub use worker::{IngestJob, IngestOutcome, IngestWorker, WORKER_OWNER};
