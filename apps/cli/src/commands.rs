//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use orgscope_core::classify::BridgeClassifier;
use orgscope_core::orgchart::{build_functional_chart, build_org_chart};
use orgscope_core::pipeline::{ProgressReporter, RunContext, run_collection};
use orgscope_crawler::{CrawlerConfig, SharedCrawl};
use orgscope_discovery::HttpRegistryClient;
use orgscope_shared::matching::normalize_unit_name;
use orgscope_shared::{
    AppConfig, BusinessUnit, Classifier, CollectionConfig, CollectionResult, NullClassifier,
    OrgNode, UnitId, UnitType, init_config, load_config,
};
use orgscope_sources::{EvidenceSource, FilingSource, NewsSource, WebLeadershipSource};
use orgscope_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// OrgScope — map who runs a company, unit by unit.
#[derive(Parser)]
#[command(
    name = "orgscope",
    version,
    about = "Discover corporate structure, track leadership, and build org charts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path (overrides the configured default).
    #[arg(long, global = true)]
    pub db: Option<String>,

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
    /// Discover a company's business units (structure only, no roster).
    Discover {
        /// Parent company name or unit id.
        unit: String,

        /// Company website (stored on first discovery).
        #[arg(long)]
        website: Option<String>,

        /// Registry id, e.g. an SEC CIK (enables the filings signal).
        #[arg(long)]
        registry_id: Option<String>,
    },

    /// Run a full collection: discovery, evidence, resolution, changes,
    /// org chart.
    Collect {
        /// Parent company name or unit id.
        unit: String,

        /// Company website (stored on first run).
        #[arg(long)]
        website: Option<String>,

        /// Registry id, e.g. an SEC CIK.
        #[arg(long)]
        registry_id: Option<String>,
    },

    /// Build and print a unit's org chart.
    Chart {
        /// Unit name or id.
        unit: String,
    },

    /// Build and print a cross-unit functional leadership chart.
    Functional {
        /// Parent company name or unit id.
        unit: String,

        /// Function to chart (e.g. technology, finance).
        function: String,
    },

    /// List recorded leadership changes for a unit.
    Changes {
        /// Unit name or id.
        unit: String,

        /// Minimum significance (1-10).
        #[arg(long, default_value_t = 1)]
        min_significance: u8,
    },

    /// List all tracked business units.
    Units,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // One directive per workspace crate; everything else stays quiet.
    let filter = [
        "cli", "core", "discovery", "crawler", "sources", "storage", "shared",
    ]
    .iter()
    .map(|c| format!("orgscope_{c}={level}"))
    .collect::<Vec<_>>()
    .join(",");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Discover {
            ref unit,
            ref website,
            ref registry_id,
        } => cmd_discover(&cli, unit, website.as_deref(), registry_id.as_deref()).await,
        Command::Collect {
            ref unit,
            ref website,
            ref registry_id,
        } => cmd_collect(&cli, unit, website.as_deref(), registry_id.as_deref()).await,
        Command::Chart { ref unit } => cmd_chart(&cli, unit).await,
        Command::Functional {
            ref unit,
            ref function,
        } => cmd_functional(&cli, unit, function).await,
        Command::Changes {
            ref unit,
            min_significance,
        } => cmd_changes(&cli, unit, min_significance).await,
        Command::Units => cmd_units(&cli).await,
        Command::Config { ref action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_storage(cli: &Cli, config: &AppConfig) -> Result<Arc<Storage>> {
    let path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.defaults.db_path.clone());
    let storage = Storage::open(&PathBuf::from(path)).await?;
    Ok(Arc::new(storage))
}

/// Resolve a unit argument: a UUID looks up directly, anything else is
/// treated as a root company name.
async fn find_unit(storage: &Storage, unit_arg: &str) -> Result<Option<BusinessUnit>> {
    if let Ok(id) = unit_arg.parse::<UnitId>() {
        return Ok(storage.get_unit(&id).await?);
    }
    Ok(storage
        .get_unit_by_key(None, &normalize_unit_name(unit_arg))
        .await?)
}

/// Find a root unit, creating it when the caller supplied enough identity.
async fn ensure_root_unit(
    storage: &Storage,
    unit_arg: &str,
    website: Option<&str>,
    registry_id: Option<&str>,
) -> Result<BusinessUnit> {
    if let Some(mut existing) = find_unit(storage, unit_arg).await? {
        // New identity flags enrich the stored row, never replace it.
        let mut changed = false;
        if existing.website.is_none() && website.is_some() {
            existing.website = website.map(String::from);
            changed = true;
        }
        if existing.registry_id.is_none() && registry_id.is_some() {
            existing.registry_id = registry_id.map(String::from);
            changed = true;
        }
        if changed {
            storage.upsert_unit(&existing).await?;
        }
        return Ok(existing);
    }

    if unit_arg.parse::<UnitId>().is_ok() {
        return Err(eyre!("unit id '{unit_arg}' not found"));
    }

    let unit = BusinessUnit {
        id: UnitId::new(),
        parent_id: None,
        name: unit_arg.to_string(),
        normalized_name: normalize_unit_name(unit_arg),
        website: website.map(String::from),
        domains: vec![],
        unit_type: UnitType::Subsidiary,
        is_public: registry_id.is_some(),
        registry_id: registry_id.map(String::from),
        jurisdiction: None,
        ownership_pct: None,
        description: None,
        discovery_sources: vec![],
    };
    let id = storage.upsert_unit(&unit).await?;
    info!(%id, name = %unit.name, "registered new root unit");
    Ok(storage
        .get_unit(&id)
        .await?
        .expect("root unit just upserted"))
}

/// Build the run context: crawl state, sources, classifier, registry.
fn build_run_context(
    storage: Arc<Storage>,
    app_config: &AppConfig,
) -> Result<RunContext> {
    let config = CollectionConfig::from(app_config);

    let crawl = Arc::new(SharedCrawl::new(CrawlerConfig {
        allowed_domains: vec![],
        max_pages: config.max_pages,
        max_depth: config.max_depth,
        concurrency: 4,
        rate_limit_ms: config.rate_limit_ms,
        cache_ttl_secs: config.cache_ttl_secs,
    }));

    let sources: Vec<Arc<dyn EvidenceSource>> = vec![
        Arc::new(WebLeadershipSource::new(crawl.clone())),
        Arc::new(FilingSource::new(&config.registry_base_url)?),
        Arc::new(NewsSource::new(crawl.clone(), config.max_searches)),
    ];

    let classifier: Arc<dyn Classifier> = if app_config.classifier.enabled {
        match BridgeClassifier::spawn(&app_config.classifier) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                warn!(error = %e, "classifier bridge unavailable, using fallbacks");
                Arc::new(NullClassifier)
            }
        }
    } else {
        Arc::new(NullClassifier)
    };

    let registry_client = Arc::new(HttpRegistryClient::new(&config.registry_base_url)?);

    Ok(RunContext {
        storage,
        crawl,
        sources,
        classifier,
        registry_client,
        model: app_config.classifier.model.clone(),
        config,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_discover(
    cli: &Cli,
    unit_arg: &str,
    website: Option<&str>,
    registry_id: Option<&str>,
) -> Result<()> {
    let app_config = load_config()?;
    let storage = open_storage(cli, &app_config).await?;
    let parent = ensure_root_unit(&storage, unit_arg, website, registry_id).await?;
    let ctx = build_run_context(storage.clone(), &app_config)?;

    info!(parent = %parent.name, "discovering structure");

    let crawler = ctx
        .crawl
        .scoped_for_hosts(parent.website.as_deref(), &parent.domains)?;
    let outcome = orgscope_discovery::discover_structure(
        &parent,
        &crawler,
        ctx.registry_client.as_ref(),
        ctx.classifier.as_ref(),
        &ctx.config,
    )
    .await?;

    for unit in &outcome.units {
        storage.upsert_unit(unit).await?;
    }

    println!();
    println!("  {} unit(s) under {}", outcome.units.len(), parent.name);
    for unit in &outcome.units {
        let sources: Vec<&str> = unit
            .discovery_sources
            .iter()
            .map(|s| s.as_str())
            .collect();
        println!(
            "  - {} [{}] ({})",
            unit.name,
            unit.unit_type.as_str(),
            sources.join(", ")
        );
    }
    for warning in &outcome.warnings {
        println!("  ! {warning}");
    }
    println!();

    Ok(())
}

async fn cmd_collect(
    cli: &Cli,
    unit_arg: &str,
    website: Option<&str>,
    registry_id: Option<&str>,
) -> Result<()> {
    let app_config = load_config()?;
    let storage = open_storage(cli, &app_config).await?;
    let parent = ensure_root_unit(&storage, unit_arg, website, registry_id).await?;
    let ctx = build_run_context(storage, &app_config)?;

    info!(parent = %parent.name, "starting collection run");

    let reporter = CliProgress::new();
    let result = run_collection(&ctx, &parent.id, &reporter).await?;

    print_result(&parent.name, &result);

    if result.success {
        Ok(())
    } else {
        Err(eyre!("collection failed: {}", result.errors.join("; ")))
    }
}

fn print_result(name: &str, result: &CollectionResult) {
    println!();
    println!("  Collection for {name} {}", if result.success { "succeeded" } else { "failed" });
    println!("  Units discovered: {}", result.units_discovered);
    println!("  People found:     {}", result.people_found);
    println!("  People created:   {}", result.people_created);
    println!("  People updated:   {}", result.people_updated);
    println!("  Changes detected: {}", result.changes_detected);
    for (phase, ms) in &result.phase_durations_ms {
        println!("  {phase:<12} {:.1}s", *ms as f64 / 1000.0);
    }
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {error}");
        }
    }
    if !result.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &result.warnings {
            println!("    - {warning}");
        }
    }
    println!();
}

async fn cmd_chart(cli: &Cli, unit_arg: &str) -> Result<()> {
    let app_config = load_config()?;
    let storage = open_storage(cli, &app_config).await?;
    let unit = find_unit(&storage, unit_arg)
        .await?
        .ok_or_else(|| eyre!("unit '{unit_arg}' not found"))?;
    let ctx = build_run_context(storage.clone(), &app_config)?;

    let snapshot = build_org_chart(
        storage.as_ref(),
        ctx.classifier.as_ref(),
        &ctx.model,
        &unit.id,
    )
    .await?;

    println!();
    println!(
        "  {} — {} ({} departments, depth {})",
        unit.name,
        snapshot.snapshot_date,
        snapshot.departments.len(),
        snapshot.max_depth
    );
    println!();
    print_node(&snapshot.tree, 1);
    println!();

    Ok(())
}

async fn cmd_functional(cli: &Cli, unit_arg: &str, function: &str) -> Result<()> {
    let app_config = load_config()?;
    let storage = open_storage(cli, &app_config).await?;
    let unit = find_unit(&storage, unit_arg)
        .await?
        .ok_or_else(|| eyre!("unit '{unit_arg}' not found"))?;

    let chart = build_functional_chart(storage.as_ref(), &unit.id, function).await?;

    println!();
    println!(
        "  {} leadership across {} ({} people)",
        chart.function, unit.name, chart.members
    );
    println!();
    print_node(&chart.tree, 1);
    println!();

    Ok(())
}

fn print_node(node: &OrgNode, indent: usize) {
    let pad = "  ".repeat(indent);
    if node.title.is_empty() {
        println!("{pad}{}", node.full_name);
    } else {
        println!("{pad}{} — {}", node.full_name, node.title);
    }
    for child in &node.reports {
        print_node(child, indent + 1);
    }
}

async fn cmd_changes(cli: &Cli, unit_arg: &str, min_significance: u8) -> Result<()> {
    let app_config = load_config()?;
    let storage = open_storage(cli, &app_config).await?;
    let unit = find_unit(&storage, unit_arg)
        .await?
        .ok_or_else(|| eyre!("unit '{unit_arg}' not found"))?;

    let changes = storage.list_changes(&unit.id, min_significance).await?;

    println!();
    println!("  {} change(s) for {}", changes.len(), unit.name);
    for change in &changes {
        let movement = match (&change.old_title, &change.new_title) {
            (Some(old), Some(new)) => format!("{old} → {new}"),
            (Some(old), None) => old.clone(),
            (None, Some(new)) => new.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  [{:>2}] {:<18} {} {}",
            change.significance,
            change.change_type.as_str(),
            change.person_name,
            if movement.is_empty() {
                String::new()
            } else {
                format!("({movement})")
            }
        );
    }
    println!();

    Ok(())
}

async fn cmd_units(cli: &Cli) -> Result<()> {
    let app_config = load_config()?;
    let storage = open_storage(cli, &app_config).await?;
    let units = storage.list_units().await?;

    println!();
    println!("  {} tracked unit(s)", units.len());
    for unit in &units {
        let marker = if unit.parent_id.is_none() { "*" } else { " " };
        println!(
            "  {marker} {}  {} [{}]",
            unit.id,
            unit.name,
            unit.unit_type.as_str()
        );
    }
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
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

    fn unit_started(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Collecting [{current}/{total}] {name}"));
    }

    fn unit_finished(&self, name: &str, people: usize, changes: usize) {
        self.spinner.set_message(format!(
            "Collected {name}: {people} people, {changes} changes"
        ));
    }

    fn done(&self, _result: &CollectionResult) {
        self.spinner.finish_and_clear();
    }
}
