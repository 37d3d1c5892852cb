//! bundlegate CLI - operate the bundle pipeline from a shell
//!
//! The `bundlegate` command drives every pipeline operation against a local
//! data directory.
//!
//! ## Commands
//!
//! - `transform`: sandbox one HTML document in place
//! - `headers`: show the security headers a build is served with
//! - `ingest` / `submit`: queue an archive or inline code for review
//! - `review`: approve or reject a build waiting for review
//! - `promote`: canonicalize (and optionally publish) a build
//! - `status` / `list` / `artifacts`: inspect builds

use anyhow::{Context, Result};
use bundlegate_core::fsutil::is_safe_relative;
use bundlegate_core::storage::content_type_for;
use bundlegate_core::{
    data_root_from_env, headers_for_build, init_tracing, BuildArtifacts, BuildLayout, CspConfig,
    HtmlTransformer, Promoter, PublishConfig, TransformOptions,
};
use bundlegate_ingest::{
    run_with_retries, submit_inline, IngestConfig, IngestJob, IngestWorker, InlineSubmission,
    NodeProjectBuilder,
};
use bundlegate_state::{
    review, BuildRecord, BuildStore, FsBuildStore, FsListingStore, ReviewDecision,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

/// Lease owner recorded for operator actions.
const CLI_OWNER: &str = "bundlegate-cli";

#[derive(Parser)]
#[command(name = "bundlegate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed, policy-enforced static bundles", long_about = None)]
struct Cli {
    /// Data directory holding builds, listings and logs
    #[arg(long, global = true, env = "BUNDLEGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sandboxing transform over an index document
    Transform {
        /// Path to index.html (rewritten in place)
        index: PathBuf,

        /// Fail on inline event handlers
        #[arg(long)]
        strict: bool,

        /// Leave remote scripts and stylesheets external
        #[arg(long)]
        no_vendor: bool,

        /// Move inline <style> blocks into files
        #[arg(long)]
        extract_styles: bool,

        /// Skip bundling module scripts into app.js
        #[arg(long)]
        no_bundle: bool,

        /// Write the transform report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the security headers for a build
    Headers {
        /// Build ID
        build_id: String,

        /// File under the build directory (adds Content-Type)
        #[arg(long)]
        path: Option<String>,
    },

    /// Canonicalize a build's output and hand it to storage
    Promote {
        /// Build ID
        build_id: String,

        /// Drive an approved build through publishing -> published
        #[arg(long)]
        publish: bool,
    },

    /// Ingest a zipped project
    Ingest {
        /// Path to the zip archive
        archive: PathBuf,

        /// Listing to attach the build to
        #[arg(long)]
        listing: String,

        /// Author user id
        #[arg(long)]
        author: String,

        /// Listing title (default: from metadata.json / package.json)
        #[arg(long)]
        title: Option<String>,

        /// Run the project's build script
        #[arg(long)]
        allow_scripts: bool,
    },

    /// Submit a single HTML document or module file
    Submit {
        /// File containing the code
        file: PathBuf,

        /// Listing title
        #[arg(long)]
        title: String,

        /// Author user id
        #[arg(long)]
        author: String,

        /// Existing listing to add a version to
        #[arg(long)]
        listing: Option<String>,
    },

    /// Approve or reject a build waiting for review
    Review {
        /// Build ID
        build_id: String,

        /// Approve the build
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,

        /// Reject the build with a reason
        #[arg(long)]
        reject: Option<String>,
    },

    /// Show a build record
    Status {
        /// Build ID
        build_id: String,
    },

    /// List builds, newest first
    List {
        /// Maximum number of builds to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Continue after this build id
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Show which side-files of a build exist
    Artifacts {
        /// Build ID
        build_id: String,
    },
}

/// Stores and configuration shared by the data-directory commands.
struct App {
    data_root: PathBuf,
    builds: Arc<FsBuildStore>,
    listings: Arc<FsListingStore>,
    transformer: HtmlTransformer,
    publish: PublishConfig,
    csp: CspConfig,
    ingest: IngestConfig,
}

impl App {
    fn open(data_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_root)
            .with_context(|| format!("Failed to create data directory {:?}", data_root))?;
        let builds = FsBuildStore::new(data_root).context("Failed to open build store")?;
        Ok(Self {
            data_root: data_root.to_path_buf(),
            builds: Arc::new(builds),
            listings: Arc::new(FsListingStore::new(data_root)),
            transformer: HtmlTransformer::new(TransformOptions::from_env()),
            publish: PublishConfig::from_env(),
            csp: CspConfig::from_env(),
            ingest: IngestConfig::from_env().with_data_root(data_root),
        })
    }

    fn layout(&self, build_id: &str) -> BuildLayout {
        BuildLayout::new(&self.data_root, build_id)
    }

    fn promoter(&self) -> Result<Promoter> {
        Promoter::from_config(&self.data_root, self.publish.clone(), self.transformer.clone())
            .context("Failed to configure promotion")
    }

    fn worker(&self, config: IngestConfig) -> IngestWorker {
        let builder = NodeProjectBuilder::new(config.build_timeout());
        IngestWorker::new(
            config,
            self.builds.clone(),
            self.listings.clone(),
            self.transformer.clone(),
            Arc::new(builder),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let data_root = cli.data_dir.clone().unwrap_or_else(data_root_from_env);

    match cli.command {
        Commands::Transform {
            index,
            strict,
            no_vendor,
            extract_styles,
            no_bundle,
            report,
        } => {
            let mut options = TransformOptions::from_env()
                .with_strict(strict)
                .with_module_bundling(!no_bundle);
            if extract_styles {
                options = options.with_style_extraction(true);
            }
            if no_vendor {
                options.vendor.enabled = false;
            }
            cmd_transform(&HtmlTransformer::new(options), &index, report.as_deref()).await
        }
        Commands::Headers { build_id, path } => {
            let app = App::open(&data_root)?;
            cmd_headers(&app, &build_id, path.as_deref())
        }
        Commands::Promote { build_id, publish } => {
            let app = App::open(&data_root)?;
            cmd_promote(&app, &build_id, publish).await
        }
        Commands::Ingest {
            archive,
            listing,
            author,
            title,
            allow_scripts,
        } => {
            let app = App::open(&data_root)?;
            cmd_ingest(&app, &archive, &listing, &author, title, allow_scripts).await
        }
        Commands::Submit {
            file,
            title,
            author,
            listing,
        } => {
            let app = App::open(&data_root)?;
            cmd_submit(&app, &file, &title, &author, listing).await
        }
        Commands::Review {
            build_id,
            approve,
            reject,
        } => {
            let app = App::open(&data_root)?;
            let decision = match (approve, reject) {
                (true, _) => ReviewDecision::Approve,
                (false, Some(reason)) => ReviewDecision::Reject { reason },
                (false, None) => anyhow::bail!("Pass --approve or --reject <reason>"),
            };
            cmd_review(&app, &build_id, decision).await
        }
        Commands::Status { build_id } => {
            let app = App::open(&data_root)?;
            cmd_status(&app, &build_id).await
        }
        Commands::List { limit, cursor } => {
            let app = App::open(&data_root)?;
            cmd_list(&app, limit, cursor.as_deref()).await
        }
        Commands::Artifacts { build_id } => {
            let app = App::open(&data_root)?;
            cmd_artifacts(&app, &build_id).await
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Sandbox one document in place
async fn cmd_transform(
    transformer: &HtmlTransformer,
    index: &Path,
    report_path: Option<&Path>,
) -> Result<()> {
    if !index.is_file() {
        anyhow::bail!("Index document not found: {:?}", index);
    }
    let report = transformer
        .transform(index)
        .await
        .with_context(|| format!("Transform of {:?} failed", index))?;

    if let Some(path) = report_path {
        report
            .write_to(path)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
    }

    println!("Transformed {:?}", index);
    println!("  changed:          {}", report.changed);
    println!("  base removed:     {}", report.base_removed);
    println!("  inline scripts:   {}", report.total_inline_scripts);
    println!("  inline handlers:  {}", report.inline_event_handlers.len());
    println!("  vendored:         {}", report.vendored.len());
    println!("  module bundle:    {}", report.module_bundle.created);
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}

/// Print the headers a build (or one of its files) is served with
fn cmd_headers(app: &App, build_id: &str, path: Option<&str>) -> Result<()> {
    if let Some(rel) = path {
        if !is_safe_relative(rel) {
            anyhow::bail!("Refusing unsafe path: {}", rel);
        }
        println!("Content-Type: {}", content_type_for(rel));
    }
    let headers = headers_for_build(&app.layout(build_id), &app.csp);
    for (name, value) in headers.pairs() {
        println!("{}: {}", name, value);
    }
    Ok(())
}

/// Canonicalize a build, or publish it when approved
async fn cmd_promote(app: &App, build_id: &str, publish: bool) -> Result<()> {
    let promoter = app.promoter()?;
    let outcome = if publish {
        promoter
            .publish_approved(app.builds.as_ref(), build_id, CLI_OWNER)
            .await
    } else {
        promoter.promote(build_id).await
    }
    .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))
    .with_context(|| format!("Promotion of build '{}' failed", build_id))?;

    println!("Promoted {} -> {}", outcome.build_id, outcome.public_url);
    if outcome.uploaded_files > 0 {
        println!("Uploaded {} object(s)", outcome.uploaded_files);
    }
    if let Some(report) = &outcome.report {
        for warning in &report.warnings {
            println!("  warning: {}", warning);
        }
    }
    Ok(())
}

/// Run one ingestion job in the foreground
async fn cmd_ingest(
    app: &App,
    archive: &Path,
    listing: &str,
    author: &str,
    title: Option<String>,
    allow_scripts: bool,
) -> Result<()> {
    let archive = archive
        .canonicalize()
        .with_context(|| format!("Archive not found: {:?}", archive))?;
    let mut job = IngestJob::new(archive, listing, author).with_scripts(allow_scripts);
    if let Some(title) = title {
        job = job.with_title(title);
    }
    app.builds
        .create(BuildRecord::new(&job.build_id, chrono::Utc::now()))
        .await
        .context("Failed to create build record")?;
    info!(build_id = %job.build_id, job_id = %job.job_id, "Ingesting archive");

    let config = app.ingest.clone().with_build_scripts(allow_scripts);
    let report = run_with_retries(&app.worker(config), job).await;
    match &report.outcome {
        Some(outcome) => {
            println!("Build {} is pending review", outcome.build_id);
            println!("Listing: {} ({}), version {}", outcome.listing_id, outcome.slug, outcome.version);
            println!("Network: {}", outcome.network_policy.as_str());
            for domain in &outcome.network_domains {
                println!("  {}", domain);
            }
            Ok(())
        }
        None => anyhow::bail!(
            "Ingestion of build {} failed after {} attempt(s): {}",
            report.build_id,
            report.attempts,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Submit a single file as an inline build
async fn cmd_submit(
    app: &App,
    file: &Path,
    title: &str,
    author: &str,
    listing: Option<String>,
) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {:?}", file))?;
    let worker = app.worker(app.ingest.clone());
    let outcome = submit_inline(
        &worker,
        InlineSubmission {
            code,
            title: title.to_string(),
            author_uid: author.to_string(),
            listing_id: listing,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("{}: {}", e.code(), e))
    .context("Inline submission failed")?;

    println!("Build {} is pending review", outcome.build_id);
    println!("Listing: {} ({})", outcome.listing_id, outcome.slug);
    Ok(())
}

/// Record a review decision
async fn cmd_review(app: &App, build_id: &str, decision: ReviewDecision) -> Result<()> {
    let record = review(app.builds.as_ref(), build_id, CLI_OWNER, decision)
        .await
        .with_context(|| format!("Review of build '{}' failed", build_id))?;
    println!("Build {} is now {}", record.id, record.state);
    Ok(())
}

/// Show one build record
async fn cmd_status(app: &App, build_id: &str) -> Result<()> {
    let record = app
        .builds
        .get(build_id)
        .await
        .with_context(|| format!("Build '{}' not found", build_id))?;
    print_json(&record)
}

/// List builds
async fn cmd_list(app: &App, limit: usize, cursor: Option<&str>) -> Result<()> {
    let page = app.builds.list(cursor, limit).await?;
    if page.items.is_empty() {
        println!("No builds found.");
        return Ok(());
    }
    for record in &page.items {
        println!(
            "{}  {:<16} {:>3}%  {}",
            record.id,
            record.state.as_str(),
            record.progress,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(next) = &page.next_cursor {
        println!();
        println!("More: --cursor {}", next);
    }
    Ok(())
}

/// Show side-file existence for a build
async fn cmd_artifacts(app: &App, build_id: &str) -> Result<()> {
    let promoter = app.promoter()?;
    let artifacts = BuildArtifacts::probe(&app.layout(build_id), promoter.store()).await;
    print_json(&artifacts)
}
