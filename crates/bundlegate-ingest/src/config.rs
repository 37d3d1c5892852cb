//! Ingestion configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "on"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Root for builds, deployments, listings and job logs.
    pub data_root: PathBuf,
    /// Where per-job scratch directories are created.
    pub scratch_root: PathBuf,
    pub concurrency: usize,
    /// Wall-clock limit per install/build command (milliseconds).
    pub build_timeout_ms: u64,
    /// Global switch; a job must also ask for scripts to get them.
    pub allow_build_scripts: bool,
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff (milliseconds).
    pub backoff_ms: u64,
    /// Run the sandboxing transform over the bundle.
    pub autofix: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let data_root = PathBuf::from(".bundlegate");
        Self {
            scratch_root: data_root.join("tmp"),
            data_root,
            concurrency: 2,
            build_timeout_ms: 300_000,
            allow_build_scripts: false,
            max_retries: 2,
            backoff_ms: 1_000,
            autofix: true,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_root = bundlegate_core::data_root_from_env();
        Self {
            scratch_root: std::env::var("BUNDLEGATE_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_root.join("tmp")),
            data_root,
            concurrency: env_parse("CREATEX_WORKER_CONCURRENCY")
                .unwrap_or(defaults.concurrency)
                .max(1),
            build_timeout_ms: env_parse("BUILD_TIMEOUT_MS").unwrap_or(defaults.build_timeout_ms),
            allow_build_scripts: env_flag("ALLOW_BUILD_SCRIPTS")
                .unwrap_or(defaults.allow_build_scripts),
            max_retries: env_parse("JOB_MAX_RETRIES").unwrap_or(defaults.max_retries),
            backoff_ms: env_parse("JOB_BACKOFF_MS").unwrap_or(defaults.backoff_ms),
            autofix: env_flag("PUBLISH_CSP_AUTOFIX").unwrap_or(defaults.autofix),
        }
    }

    /// Point data and scratch at `root` (tests, CLI `--data-dir`).
    pub fn with_data_root(mut self, root: impl AsRef<Path>) -> Self {
        self.data_root = root.as_ref().to_path_buf();
        self.scratch_root = self.data_root.join("tmp");
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn with_build_scripts(mut self, allowed: bool) -> Self {
        self.allow_build_scripts = allowed;
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }

    pub fn deployment_dir(&self, listing_id: &str, build_id: &str) -> PathBuf {
        self.data_root
            .join("deployments")
            .join(listing_id)
            .join(build_id)
    }

    pub fn job_log_path(&self, listing_id: &str, job_id: &str) -> PathBuf {
        self.data_root
            .join("logs")
            .join(listing_id)
            .join(format!("{}.log", job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let config = IngestConfig::default().with_retries(3, 100);
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn paths_follow_data_root() {
        let config = IngestConfig::default().with_data_root("/srv/bg");
        assert_eq!(config.scratch_root, PathBuf::from("/srv/bg/tmp"));
        assert_eq!(
            config.deployment_dir("7", "b1"),
            PathBuf::from("/srv/bg/deployments/7/b1")
        );
        assert_eq!(config.job_log_path("7", "j1"), PathBuf::from("/srv/bg/logs/7/j1.log"));
    }

    #[test]
    fn concurrency_never_zero() {
        assert_eq!(IngestConfig::default().with_concurrency(0).concurrency, 1);
    }
}
