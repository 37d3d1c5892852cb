//! Module bundling seam.
//!
//! The transform hands a synthesized entry file to a [`ModuleBundler`] and
//! expects one browser-ready ES2018 `app.js` back. [`EsbuildBundler`] shells
//! out to the `esbuild` binary.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
    #[error("bundler not available: {0}")]
    Unavailable(String),

    #[error("bundler exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("bundler timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Working directory for resolution (the bundle root).
    pub root_dir: PathBuf,
    pub entry_file: PathBuf,
    pub outfile: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleOutput {
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

#[async_trait]
pub trait ModuleBundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundlerError>;
}

/// Runs `esbuild --bundle --format=esm --platform=browser --target=es2018`.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: PathBuf,
    timeout: Duration,
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self {
            program: PathBuf::from("esbuild"),
            timeout: Duration::from_secs(120),
        }
    }
}

impl EsbuildBundler {
    /// Binary from `ESBUILD_BINARY`, else `esbuild` on `PATH`.
    pub fn from_env() -> Self {
        let mut bundler = Self::default();
        if let Ok(bin) = std::env::var("ESBUILD_BINARY") {
            bundler.program = PathBuf::from(bin);
        }
        bundler
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(request: &BundleRequest) -> Vec<String> {
        vec![
            request.entry_file.display().to_string(),
            "--bundle".to_string(),
            "--format=esm".to_string(),
            "--platform=browser".to_string(),
            "--target=es2018".to_string(),
            format!("--outfile={}", request.outfile.display()),
            "--allow-overwrite".to_string(),
            "--log-level=warning".to_string(),
        ]
    }
}

/// Pull the message text out of esbuild's `▲ [WARNING] text [plugin]` lines.
pub(crate) fn parse_warnings(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .filter_map(|line| {
            let idx = line.find("[WARNING]")?;
            let text = line[idx + "[WARNING]".len()..].trim();
            (!text.is_empty()).then(|| text.to_string())
        })
        .collect()
}

#[async_trait]
impl ModuleBundler for EsbuildBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundlerError> {
        let start = Instant::now();

        let child = Command::new(&self.program)
            .args(Self::args(request))
            .current_dir(&request.root_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BundlerError::Unavailable(format!("{}: {}", self.program.display(), e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BundlerError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(BundlerError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(BundleOutput {
            warnings: parse_warnings(&stderr),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_lines_are_extracted() {
        let stderr = "▲ [WARNING] Import \"x\" will always be undefined [import-is-undefined]\n\n    src/a.js:1:9:\n";
        assert_eq!(
            parse_warnings(stderr),
            vec!["Import \"x\" will always be undefined [import-is-undefined]".to_string()]
        );
        assert!(parse_warnings("").is_empty());
    }

    #[test]
    fn args_target_browser_esm() {
        let request = BundleRequest {
            root_dir: PathBuf::from("/tmp/b"),
            entry_file: PathBuf::from("/tmp/b/__csp_bundle/__entry.js"),
            outfile: PathBuf::from("/tmp/b/app.js"),
        };
        let args = EsbuildBundler::args(&request);
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--target=es2018".to_string()));
        assert!(args.contains(&"--outfile=/tmp/b/app.js".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let bundler = EsbuildBundler::default().with_program("/nonexistent/esbuild-binary");
        let dir = tempfile::tempdir().expect("tempdir");
        let request = BundleRequest {
            root_dir: dir.path().to_path_buf(),
            entry_file: dir.path().join("entry.js"),
            outfile: dir.path().join("app.js"),
        };
        match bundler.bundle(&request).await {
            Err(BundlerError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }
}
