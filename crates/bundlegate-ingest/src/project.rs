//! Project builds: install + `build` script under a wall-clock limit, then
//! locate the static output.
//!
//! Running a submitter's scripts is opt-in twice over: the deployment must
//! allow build scripts and the job must ask for them. Dependency lifecycle
//! scripts never run; install always passes `--ignore-scripts`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::info;

use crate::error::{IngestError, IngestResult};
use crate::joblog::JobLog;

/// Candidate output directories, in search order.
pub const OUTPUT_DIRS: [&str; 4] = ["dist", "build", "out", "public"];

const INDEX_FILE: &str = "index.html";
const STDERR_TAIL: usize = 2_000;

/// Turns an unpacked project into a directory of static files.
#[async_trait]
pub trait ProjectBuilder: Send + Sync {
    /// Return the directory holding the built `index.html`.
    async fn build(&self, project_dir: &Path, allow_scripts: bool, log: &JobLog)
        -> IngestResult<PathBuf>;
}

// ---------------------------------------------------------------------------
// Package managers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
}

impl PackageManager {
    /// Pick by lockfile; npm when there is none.
    pub fn detect(project_dir: &Path) -> Self {
        if project_dir.join("pnpm-lock.yaml").is_file() {
            PackageManager::Pnpm
        } else if project_dir.join("yarn.lock").is_file() {
            PackageManager::Yarn
        } else {
            PackageManager::Npm
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
        }
    }

    pub fn install_args(&self) -> Vec<&'static str> {
        vec!["install", "--ignore-scripts"]
    }

    pub fn build_args(&self) -> Vec<&'static str> {
        vec!["run", "build"]
    }
}

/// Whether `package.json` declares a `build` script.
pub fn has_build_script(project_dir: &Path) -> bool {
    std::fs::read(project_dir.join("package.json"))
        .ok()
        .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok())
        .and_then(|pkg| pkg.get("scripts")?.get("build")?.as_str().map(str::to_string))
        .map(|script| !script.trim().is_empty())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Output discovery
// ---------------------------------------------------------------------------

/// `index.html` at the root, else in the first subdirectory (by name) that
/// has one.
pub fn find_static_root(project_dir: &Path) -> Option<PathBuf> {
    if project_dir.join(INDEX_FILE).is_file() {
        return Some(project_dir.to_path_buf());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(project_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            !name.starts_with('.') && name != "node_modules" && name != "__MACOSX"
        })
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs.into_iter().find(|d| d.join(INDEX_FILE).is_file())
}

/// Known output directories first, then the static root.
pub fn find_output_dir(project_dir: &Path) -> IngestResult<PathBuf> {
    OUTPUT_DIRS
        .iter()
        .map(|d| project_dir.join(d))
        .find(|d| d.join(INDEX_FILE).is_file())
        .or_else(|| find_static_root(project_dir))
        .ok_or(IngestError::IndexMissing)
}

// ---------------------------------------------------------------------------
// Step execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub step: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Run one command in `cwd`; non-zero exit and timeout are errors.
pub async fn run_step(
    step: &str,
    argv: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> IngestResult<StepOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| IngestError::InvalidInput(format!("step {} has empty command", step)))?;
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env("NODE_ENV", "development")
        .env("npm_config_production", "false")
        .env("npm_config_ignore_scripts", "true")
        .env("YARN_IGNORE_DEPENDENCY_SCRIPTS", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| IngestError::BuildTimeout {
            step: step.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })??;

    let result = StepOutput {
        step: step.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    if !output.status.success() {
        return Err(IngestError::BuildFailed {
            step: step.to_string(),
            code: result.exit_code,
            stderr: tail(&result.stderr, STDERR_TAIL),
        });
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// NodeProjectBuilder
// ---------------------------------------------------------------------------

/// Production builder: npm / pnpm / yarn by lockfile.
#[derive(Debug, Clone)]
pub struct NodeProjectBuilder {
    timeout: Duration,
}

impl NodeProjectBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run_logged(&self, step: &str, argv: &[&str], cwd: &Path, log: &JobLog) -> IngestResult<()> {
        log.record(step, &argv.join(" "), json!({ "cwd": cwd.display().to_string() }));
        match run_step(step, argv, cwd, self.timeout).await {
            Ok(out) => {
                log.record(
                    step,
                    "completed",
                    json!({ "exitCode": out.exit_code, "durationMs": out.duration_ms }),
                );
                Ok(())
            }
            Err(e) => {
                log.record(step, "failed", json!({ "error": e.to_string() }));
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ProjectBuilder for NodeProjectBuilder {
    async fn build(&self, project_dir: &Path, allow_scripts: bool, log: &JobLog) -> IngestResult<PathBuf> {
        let scripted = has_build_script(project_dir);
        if allow_scripts && scripted {
            let pm = PackageManager::detect(project_dir);
            info!(event = "ingest.build_started", package_manager = pm.program());

            let mut install = vec![pm.program()];
            install.extend(pm.install_args());
            self.run_logged("install", &install, project_dir, log).await?;

            let mut build = vec![pm.program()];
            build.extend(pm.build_args());
            self.run_logged("build", &build, project_dir, log).await?;
        } else if scripted {
            log.stage("build", "build script present but scripts are not allowed; using static files");
        }

        let output = find_output_dir(project_dir)?;
        log.record(
            "locate",
            "output directory found",
            json!({ "dir": output.display().to_string() }),
        );
        Ok(output)
    }
}
