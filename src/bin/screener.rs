//! Screening pipeline binary.
//!
//! Phases run as subcommands against the settings document: `collect`
//! loads primary hazard layers, `update` rebuilds buffered working tables,
//! `intersect` runs the per-hazard pipeline, `build` derives the output
//! tables, and `run` executes the settings' whole run plan in order.

use clap::Parser;
use clap::Subcommand;
use hazscreen::collect::SourceCatalog;
use hazscreen::config::IntersectionsConfig;
use hazscreen::config::PublishingConfig;
use hazscreen::config::Settings;
use hazscreen::config::SourcesConfig;
use hazscreen::intersect::IntersectionTablesManager;
use hazscreen::intersect::Stages;
use hazscreen::publish::PublishingManager;
use hazscreen::select::Selection;
use hazscreen::Error;
use hazscreen::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_postgres::Client;

#[derive(Parser)]
#[command(name = "screener", about = "Natural hazard screening pipeline")]
struct Args {
    /// Settings document.
    #[arg(long, default_value = "settings/settings.yaml")]
    settings: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect primary data sources. Defaults to every configured source.
    Collect { sources: Vec<String> },
    /// Rebuild buffered working tables. Defaults to every table.
    Update { tables: Vec<String> },
    /// Run intersections for tables and hazards. Defaults to everything.
    Intersect {
        tables: Vec<String>,
        #[arg(long)]
        hazards: Vec<String>,
        #[arg(long)]
        skip_intersect: bool,
        #[arg(long)]
        skip_filter: bool,
        #[arg(long)]
        skip_max: bool,
        #[arg(long)]
        skip_max_all: bool,
        #[arg(long)]
        skip_bool: bool,
    },
    /// Build derived output tables. Defaults to every configured table.
    Build { tables: Vec<String> },
    /// Execute the settings' run plan: collect, update, intersect, build.
    Run,
}

/// Empty argument lists mean "everything configured".
fn cli_selection(names: Vec<String>, sentinel: &str) -> Selection {
    if names.is_empty() {
        Selection::All
    } else {
        Selection::from_directive(Some(&names), sentinel)
    }
}

fn catalog(settings: &Settings) -> Result<Option<SourceCatalog>> {
    match &settings.configs.sources {
        Some(path) => Ok(Some(SourceCatalog::new(SourcesConfig::load(path)?))),
        None => Ok(None),
    }
}

fn intersections(settings: &Settings) -> Result<IntersectionTablesManager> {
    let config = IntersectionsConfig::load(&settings.configs.intersections)?;
    IntersectionTablesManager::new(config, settings.column_names.clone())
}

fn publishing(settings: &Settings) -> Result<Option<PublishingManager>> {
    match &settings.configs.publishing {
        Some(path) => Ok(Some(PublishingManager::new(PublishingConfig::load(path)?))),
        None => Ok(None),
    }
}

async fn collect(settings: &Settings, client: &Client, selection: &Selection) -> Result<()> {
    match catalog(settings)? {
        Some(catalog) => {
            catalog.collect(client, selection).await;
            Ok(())
        }
        None => Err(Error::Config(
            "no sources config path in settings".to_string(),
        )),
    }
}

async fn build(settings: &Settings, client: &Client, selection: &Selection) -> Result<()> {
    match publishing(settings)? {
        Some(manager) => {
            manager.build_tables(client, selection).await;
            Ok(())
        }
        None => Err(Error::Config(
            "no publishing config path in settings".to_string(),
        )),
    }
}

/// The settings-driven pipeline, in the order the phases depend on each
/// other: collect, rebuild sources, intersect, build.
async fn run_plan(settings: &Settings, client: &Client) -> Result<()> {
    let sources = Selection::from_directive(
        settings.run.collect.as_deref(),
        SourceCatalog::COLLECT_ALL,
    );
    if !sources.is_none() {
        collect(settings, client, &sources).await?;
    }
    let manager = intersections(settings)?;
    let updates = settings
        .run
        .intersection_tables
        .iter()
        .filter(|(_, run)| run.update_source)
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();
    if !updates.is_empty() {
        manager.update_sources(client, &Selection::Named(updates)).await;
    }
    for (name, table_run) in &settings.run.intersection_tables {
        let hazards = Selection::from_directive(
            table_run.hazards.as_deref(),
            IntersectionTablesManager::ALL_HAZARDS,
        );
        manager
            .run_intersections(
                client,
                &Selection::Named(vec![name.clone()]),
                &hazards,
                &Stages::default(),
            )
            .await;
    }
    let outputs = Selection::from_directive(
        settings.run.build_tables.as_deref(),
        PublishingManager::BUILD_ALL,
    );
    if !outputs.is_none() {
        build(settings, client, &outputs).await?;
    }
    Ok(())
}

async fn dispatch(args: Args, settings: &Settings, client: Arc<Client>) -> Result<()> {
    match args.command {
        Command::Collect { sources } => {
            let selection = cli_selection(sources, SourceCatalog::COLLECT_ALL);
            collect(settings, &client, &selection).await
        }
        Command::Update { tables } => {
            let manager = intersections(settings)?;
            let selection = cli_selection(tables, IntersectionTablesManager::UPDATE_ALL);
            manager.update_sources(&*client, &selection).await;
            Ok(())
        }
        Command::Intersect {
            tables,
            hazards,
            skip_intersect,
            skip_filter,
            skip_max,
            skip_max_all,
            skip_bool,
        } => {
            let manager = intersections(settings)?;
            let tables = cli_selection(tables, IntersectionTablesManager::INTERSECT_ALL);
            let hazards = cli_selection(hazards, IntersectionTablesManager::ALL_HAZARDS);
            let stages = Stages {
                intersect: !skip_intersect,
                filter: !skip_filter,
                max: !skip_max,
                max_all: !skip_max_all,
                flag: !skip_bool,
            };
            manager
                .run_intersections(&*client, &tables, &hazards, &stages)
                .await;
            Ok(())
        }
        Command::Build { tables } => {
            let selection = cli_selection(tables, PublishingManager::BUILD_ALL);
            build(settings, &client, &selection).await
        }
        Command::Run => run_plan(settings, &client).await,
    }
}

#[tokio::main]
async fn main() {
    hazscreen::log();
    let args = Args::parse();
    let settings = match Settings::load(&args.settings) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("failed to load settings: {}", e);
            std::process::exit(1);
        }
    };
    let url = match settings.database_url() {
        Ok(url) => url,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    let client = match hazscreen::db(&url).await {
        Ok(client) => client,
        Err(e) => {
            log::error!("could not connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = dispatch(args, &settings, client).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("done");
}
