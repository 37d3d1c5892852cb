//! Bounded worker pool over an mpsc job queue.
//!
//! A dispatcher task drains the queue and spawns one task per job; a
//! semaphore caps how many run at once. Each job is retried with
//! exponential backoff, and a job that exhausts its attempts marks its
//! build `failed`.

use std::sync::Arc;
use std::time::Instant;

use bundlegate_core::obs;
use bundlegate_state::{advance, BuildPatch, BuildRecord, BuildState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, warn};

use crate::error::{IngestError, IngestResult};
use crate::worker::{IngestJob, IngestOutcome, IngestWorker, WORKER_OWNER};

const QUEUE_CAPACITY: usize = 256;

/// Final result of one job after all attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub build_id: String,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Cloneable submit side of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<IngestJob>,
}

impl JobQueue {
    pub async fn enqueue(&self, job: IngestJob) -> IngestResult<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| IngestError::QueueClosed)
    }
}

pub struct WorkerPool {
    queue: JobQueue,
    dispatcher: JoinHandle<Vec<JobReport>>,
}

impl WorkerPool {
    /// Spawn the dispatcher; must be called inside a tokio runtime.
    pub fn start(worker: Arc<IngestWorker>) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let dispatcher = tokio::spawn(dispatch(worker, receiver));
        Self {
            queue: JobQueue { sender },
            dispatcher,
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub async fn enqueue(&self, job: IngestJob) -> IngestResult<()> {
        self.queue.enqueue(job).await
    }

    /// Close the queue and wait for every accepted job to finish.
    ///
    /// Outstanding [`JobQueue`] clones keep the queue open; drop them first.
    pub async fn shutdown(self) -> Vec<JobReport> {
        drop(self.queue);
        match self.dispatcher.await {
            Ok(reports) => reports,
            Err(e) => {
                error!(event = "pool.dispatcher_failed", error = %e);
                Vec::new()
            }
        }
    }
}

async fn dispatch(worker: Arc<IngestWorker>, mut receiver: mpsc::Receiver<IngestJob>) -> Vec<JobReport> {
    let semaphore = Arc::new(Semaphore::new(worker.config().concurrency.max(1)));
    let mut tasks: JoinSet<JobReport> = JoinSet::new();
    let mut reports = Vec::new();

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(job) => {
                    let worker = worker.clone();
                    let semaphore = semaphore.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        run_with_retries(&worker, job).await
                    });
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                collect(joined, &mut reports);
            }
        }
    }
    while let Some(joined) = tasks.join_next().await {
        collect(joined, &mut reports);
    }
    reports
}

fn collect(joined: Result<JobReport, tokio::task::JoinError>, reports: &mut Vec<JobReport>) {
    match joined {
        Ok(report) => reports.push(report),
        Err(e) => error!(event = "pool.job_panicked", error = %e),
    }
}

/// Run `job` until it succeeds or runs out of attempts.
pub async fn run_with_retries(worker: &IngestWorker, job: IngestJob) -> JobReport {
    let max_attempts = worker.config().max_retries.saturating_add(1);
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        obs::emit_job_started(&job.job_id, &job.build_id, attempt);
        let attempt_started = Instant::now();
        match worker.process(&job, attempt).await {
            Ok(outcome) => {
                obs::emit_job_finished(
                    &job.job_id,
                    &job.build_id,
                    true,
                    attempt_started.elapsed().as_millis() as u64,
                );
                return JobReport {
                    job_id: job.job_id.clone(),
                    build_id: job.build_id.clone(),
                    attempts: attempt,
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome: Some(outcome),
                    error: None,
                };
            }
            Err(e) => {
                obs::emit_job_finished(
                    &job.job_id,
                    &job.build_id,
                    false,
                    attempt_started.elapsed().as_millis() as u64,
                );
                if attempt < max_attempts && e.is_retryable() {
                    let delay = worker.config().backoff_for(attempt);
                    warn!(
                        event = "job.retry_scheduled",
                        job_id = %job.job_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                mark_failed(worker, &job, &e, attempt).await;
                return JobReport {
                    job_id: job.job_id.clone(),
                    build_id: job.build_id.clone(),
                    attempts: attempt,
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome: None,
                    error: Some(format!("{}: {}", e.code(), e)),
                };
            }
        }
    }
}

async fn mark_failed(worker: &IngestWorker, job: &IngestJob, err: &IngestError, attempts: u32) {
    let builds = worker.builds();
    let from = match builds.get(&job.build_id).await {
        Ok(record) => record.state,
        Err(e) if e.is_not_found() => {
            if let Err(e) = builds.create(BuildRecord::new(&job.build_id, Utc::now())).await {
                warn!(event = "job.mark_failed_skipped", build_id = %job.build_id, error = %e);
                return;
            }
            BuildState::Queued
        }
        Err(e) => {
            warn!(event = "job.mark_failed_skipped", build_id = %job.build_id, error = %e);
            return;
        }
    };

    let mut patch = BuildPatch::failed(err.to_string(), err.public_message())
        .with_attempts(attempts)
        .with_reasons(vec![err.code().to_string()]);
    patch.retry_count = Some(attempts.saturating_sub(1));
    match advance(builds, &job.build_id, WORKER_OWNER, patch).await {
        Ok(_) => obs::emit_build_transition(&job.build_id, from.as_str(), BuildState::Failed.as_str()),
        Err(e) => warn!(event = "job.mark_failed_rejected", build_id = %job.build_id, error = %e),
    }
}
