//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use auditdoc_core::manifest::ManifestRegistry;
use auditdoc_core::outcome::{RenderFailure, RenderResult, RenderSuccess};
use auditdoc_core::pipeline::{
    GenerateRequest, PipelineConfig, ProgressReporter, ReportPipeline, render_canonical,
};
use auditdoc_core::upload::LocalDirUploader;
use auditdoc_core::validator::{check_completeness, validate_schema};
use auditdoc_render::{DirTemplateSource, TemplateCache, TemplateRenderer};
use auditdoc_shared::{
    AppConfig, CanonicalDocument, expand_home, init_config, load_config, load_config_from,
    source_token,
};
use auditdoc_source::SourceClient;
use auditdoc_storage::CacheStore;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// auditdoc: assemble compliance review reports.
#[derive(Parser)]
#[command(
    name = "auditdoc",
    version,
    about = "Assemble compliance review reports from upstream review data and Word templates.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.auditdoc/auditdoc.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate a report for a project and upload it.
    Generate {
        /// Upstream project identifier.
        project: String,

        /// Template id, e.g. draft-audit-report.
        #[arg(short, long)]
        template: String,

        /// Ignore cached data and fetch from the source.
        #[arg(long)]
        force_refresh: bool,

        /// Override the source base URL.
        #[arg(long)]
        base_url: Option<String>,

        /// Override the output directory.
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Fetch (or read from cache) the canonical document for a project.
    Fetch {
        /// Upstream project identifier.
        project: String,

        /// Ignore cached data and fetch from the source.
        #[arg(long)]
        force_refresh: bool,

        /// Override the source base URL.
        #[arg(long)]
        base_url: Option<String>,

        /// Write the document here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Validate a canonical document file.
    Validate {
        /// Canonical document JSON.
        file: PathBuf,

        /// Also check completeness for this template.
        #[arg(short, long)]
        template: Option<String>,
    },

    /// Render a canonical document file without uploading.
    Render {
        /// Canonical document JSON.
        file: PathBuf,

        /// Template id.
        #[arg(short, long)]
        template: String,

        /// Destination .docx path.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Inspect the canonical document cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List cached generations for a project, newest first.
    History {
        /// Upstream project identifier.
        project: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "auditdoc=info",
        1 => "auditdoc=debug",
        _ => "auditdoc=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Generate {
            project,
            template,
            force_refresh,
            base_url,
            out,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(url) = base_url {
                config.source.base_url = url;
            }
            if let Some(dir) = out {
                config.output.dir = dir;
            }
            cmd_generate(&config, project, template, force_refresh).await
        }
        Command::Fetch {
            project,
            force_refresh,
            base_url,
            out,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(url) = base_url {
                config.source.base_url = url;
            }
            cmd_fetch(&config, &project, force_refresh, out.as_deref()).await
        }
        Command::Validate { file, template } => {
            let config = resolve_config(config_path)?;
            cmd_validate(&config, &file, template.as_deref())
        }
        Command::Render {
            file,
            template,
            out,
        } => {
            let config = resolve_config(config_path)?;
            cmd_render(&config, &file, &template, &out)
        }
        Command::Cache { action } => match action {
            CacheAction::History { project } => {
                let config = resolve_config(config_path)?;
                cmd_cache_history(&config, &project).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn template_renderer(config: &AppConfig) -> TemplateRenderer {
    TemplateRenderer::new(
        DirTemplateSource::new(expand_home(&config.templates.dir)),
        Arc::new(TemplateCache::new()),
    )
}

fn manifests(config: &AppConfig) -> Result<ManifestRegistry> {
    Ok(ManifestRegistry::load(&expand_home(&config.templates.dir))?)
}

async fn build_pipeline(config: &AppConfig) -> Result<ReportPipeline<LocalDirUploader>> {
    let token = source_token(config)?;
    let source = SourceClient::from_config(config, token)?;
    let cache = CacheStore::open(&expand_home(&config.cache.db_path)).await?;

    Ok(ReportPipeline::new(
        source,
        cache,
        template_renderer(config),
        manifests(config)?,
        LocalDirUploader::new(expand_home(&config.output.dir)),
        PipelineConfig::from(config),
    ))
}

fn read_document_value(file: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read {}: {e}", file.display()))?;
    serde_json::from_str(&content).map_err(|e| eyre!("{} is not JSON: {e}", file.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_generate(
    config: &AppConfig,
    project_id: String,
    template_id: String,
    force_refresh: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let request = GenerateRequest {
        project_id,
        template_id,
        force_refresh,
    };

    info!(
        project_id = %request.project_id,
        template_id = %request.template_id,
        force_refresh,
        "generating report"
    );

    let reporter = CliProgress::new();
    let outcome = pipeline.generate(&request, &reporter).await;
    reporter.spinner.finish_and_clear();

    match outcome {
        Ok(success) => print_json(&RenderResult::Success(success)),
        Err(err) => {
            print_json(&RenderResult::Failure(RenderFailure::from(&err)))?;
            Err(err.into())
        }
    }
}

async fn cmd_fetch(
    config: &AppConfig,
    project_id: &str,
    force_refresh: bool,
    out: Option<&Path>,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;

    let reporter = CliProgress::new();
    reporter.phase("Acquiring project data");
    let acquired = pipeline.acquire(project_id, force_refresh).await;
    reporter.spinner.finish_and_clear();
    let acquired = acquired?;

    info!(
        project_id,
        from_cache = acquired.from_cache,
        generated_at = %acquired.document.generated_at,
        unmapped = acquired.unmapped_controls.len(),
        "canonical document ready"
    );

    let json = serde_json::to_string_pretty(&acquired.document)?;
    match out {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;
            eprintln!("  Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_validate(config: &AppConfig, file: &Path, template_id: Option<&str>) -> Result<()> {
    let doc = read_document_value(file)?;
    let schema = validate_schema(&doc);

    let completeness = match template_id {
        Some(id) if schema.valid => {
            let registry = manifests(config)?;
            Some(check_completeness(&doc, registry.get(id)?))
        }
        _ => None,
    };

    print_json(&serde_json::json!({
        "schema": schema,
        "completeness": completeness,
    }))?;

    if !schema.valid {
        return Err(eyre!("{} failed schema validation", file.display()));
    }
    if completeness.as_ref().is_some_and(|c| !c.can_generate) {
        return Err(eyre!("{} is missing critical template fields", file.display()));
    }
    Ok(())
}

fn cmd_render(config: &AppConfig, file: &Path, template_id: &str, out: &Path) -> Result<()> {
    let value = read_document_value(file)?;
    let doc: CanonicalDocument = serde_json::from_value(value)
        .map_err(|e| eyre!("{} is not a canonical document: {e}", file.display()))?;

    let rendered = render_canonical(&template_renderer(config), &manifests(config)?, &doc, template_id)?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, &rendered.bytes).map_err(|e| eyre!("cannot write {}: {e}", out.display()))?;

    println!();
    println!("  Rendered {template_id}");
    println!("  Path:     {}", out.display());
    println!("  Size:     {} bytes", rendered.bytes.len());
    println!("  Quality:  {}/100", rendered.completeness.quality_score);
    for warning in &rendered.warnings {
        println!("  Warning:  {warning}");
    }
    println!();
    Ok(())
}

async fn cmd_cache_history(config: &AppConfig, project_id: &str) -> Result<()> {
    let path = expand_home(&config.cache.db_path);
    if !path.exists() {
        return Err(eyre!("no cache database at {}", path.display()));
    }
    let cache = CacheStore::open_readonly(&path).await?;
    let entries = cache.history(project_id).await?;

    if entries.is_empty() {
        println!("No cached documents for project {project_id}.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "  {}  schema {}  sha256 {}  stored {}",
            entry.key,
            entry.schema_version,
            &entry.content_hash[..entry.content_hash.len().min(12)],
            entry.stored_at
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, result: &RenderSuccess) {
        self.spinner
            .finish_with_message(format!("Uploaded {} ({} bytes)", result.report_id, result.size_bytes));
    }
}
