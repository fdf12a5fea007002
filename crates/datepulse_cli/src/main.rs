mod catalog;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use datepulse_core::{DatepulseConfig, OpportunityStatus, Platform, RunStatus, Store};
use datepulse_perception::{Ingestor, JsonlSource, RssSource, Source};
use datepulse_pipeline::runner::all_succeeded;
use datepulse_pipeline::{render_table, PipelineRunner, Stage};
use datepulse_reasoning::{build_embedding_client, build_llm_client};
use datepulse_store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "datepulse", author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "DATEPULSE_CONFIG", default_value = "datepulse.toml")]
    config: PathBuf,

    /// Database path, overriding the config file
    #[arg(long)]
    db: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage 1: tag English content, delete the rest
    Clean,
    /// Stage 2: embed cleaned content
    Embed,
    /// Stage 3: group embedded content into clusters
    Cluster,
    /// Stage 4: label new clusters
    Label,
    /// Stage 5: link clusters to personas
    MapPersonas,
    /// Stage 6 and card curation
    #[command(subcommand)]
    Opportunities(OpportunityCommand),
    /// Run stages 1 to 6 and print a per-stage report
    Run,
    /// Fetch raw content from feeds or dump files
    Ingest(IngestArgs),
    /// Recent ingestion runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Persona catalog maintenance
    #[command(subcommand)]
    Personas(PersonaCommand),
}

#[derive(Subcommand, Debug)]
enum OpportunityCommand {
    /// Create or refresh cards for qualifying clusters
    Generate,
    /// Print all cards
    List {
        #[arg(long)]
        json: bool,
    },
    /// Set a card's status (new, reviewed, in_discovery, not_relevant)
    SetStatus {
        id: Uuid,
        status: OpportunityStatus,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PersonaCommand {
    /// Upsert personas from a TOML catalog, matching on name
    Import { file: PathBuf },
    /// Print the catalog
    List,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// RSS feed URL (subreddit or YouTube channel feed); repeatable
    #[arg(long)]
    rss: Vec<String>,

    /// Platform tag for the --rss feeds
    #[arg(long, default_value = "reddit")]
    platform: Platform,

    /// Newline-delimited JSON dump; repeatable
    #[arg(long)]
    jsonl: Vec<PathBuf>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = DatepulseConfig::load_or_default(&cli.config);
    if let Some(db) = &cli.db {
        config.store.db_path = db.clone();
    }
    config.pipeline.validate()?;

    info!("Opening store at {}", config.store.db_path);
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(&config.store.db_path).await?);

    match cli.command {
        Command::Clean => run_single(store, config, Stage::Clean).await,
        Command::Embed => run_single(store, config, Stage::Embed).await,
        Command::Cluster => run_single(store, config, Stage::Cluster).await,
        Command::Label => run_single(store, config, Stage::Label).await,
        Command::MapPersonas => run_single(store, config, Stage::MapPersonas).await,
        Command::Opportunities(OpportunityCommand::Generate) => {
            run_single(store, config, Stage::Opportunities).await
        }
        Command::Opportunities(OpportunityCommand::List { json }) => {
            list_opportunities(store.as_ref(), json).await
        }
        Command::Opportunities(OpportunityCommand::SetStatus { id, status, notes }) => {
            if !store
                .set_opportunity_status(id, status, notes.as_deref())
                .await?
            {
                anyhow::bail!("No opportunity with id {}", id);
            }
            println!("{} -> {}", id, status);
            Ok(())
        }
        Command::Run => {
            let runner = build_runner(store, config, &Stage::ALL)?;
            let reports = runner.run_all().await;
            print!("{}", render_table(&reports));
            if !all_succeeded(&reports) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Ingest(args) => ingest(store, args).await,
        Command::Runs { limit } => {
            for run in store.recent_runs(limit).await? {
                println!(
                    "{}  {:<9}  processed {:>5}  ingested {:>5}  {}{}",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.status.as_str(),
                    run.items_processed,
                    run.items_ingested,
                    run.source,
                    run.error.map(|e| format!("  ({})", e)).unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Personas(PersonaCommand::Import { file }) => {
            let count = catalog::import_catalog(store.as_ref(), &file).await?;
            println!("Imported {} personas from {}", count, file.display());
            Ok(())
        }
        Command::Personas(PersonaCommand::List) => {
            for persona in store.list_personas().await? {
                println!(
                    "{}  ({} keywords, {} pain points, {} behaviors)",
                    persona.name,
                    persona.keywords.len(),
                    persona.pain_points.len(),
                    persona.typical_behaviors.len()
                );
            }
            Ok(())
        }
    }
}

/// Build service clients up front so a missing credential fails before any
/// stage touches the store.
fn build_runner(
    store: Arc<dyn Store>,
    config: DatepulseConfig,
    stages: &[Stage],
) -> Result<PipelineRunner> {
    let embedder = if stages.contains(&Stage::Embed) {
        Some(build_embedding_client(&config.embedding)?)
    } else {
        None
    };
    let llm = if stages.contains(&Stage::Label) {
        build_llm_client(&config.llm)?
    } else {
        None
    };

    let mut runner = PipelineRunner::new(store, config).with_llm(llm);
    if let Some(embedder) = embedder {
        runner = runner.with_embedder(embedder);
    }
    Ok(runner)
}

async fn run_single(store: Arc<dyn Store>, config: DatepulseConfig, stage: Stage) -> Result<()> {
    let runner = build_runner(store, config, &[stage])?;
    let summary = runner
        .run_stage(stage)
        .await
        .with_context(|| format!("Stage {} failed", stage))?;
    println!("{}: {}", stage, summary);
    Ok(())
}

async fn list_opportunities(store: &dyn Store, json: bool) -> Result<()> {
    let cards = store.list_opportunities().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&cards)?);
        return Ok(());
    }
    if cards.is_empty() {
        println!("No opportunities yet.");
        return Ok(());
    }
    for card in cards {
        println!(
            "{}  [{:<8}] [{:<12}] conf {:.2}  {}",
            card.id,
            card.severity.as_str(),
            card.status.as_str(),
            card.confidence,
            card.title
        );
        if let Some(notes) = &card.notes {
            println!("    notes: {}", notes);
        }
    }
    Ok(())
}

async fn ingest(store: Arc<dyn Store>, args: IngestArgs) -> Result<()> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    for url in &args.rss {
        sources.push(Arc::new(RssSource::new(url, args.platform)?));
    }
    for path in &args.jsonl {
        sources.push(Arc::new(JsonlSource::new(path)));
    }
    if sources.is_empty() {
        anyhow::bail!("Nothing to ingest: pass --rss and/or --jsonl");
    }

    let ingestor = Ingestor::new(store);
    let mut failed = false;
    for result in ingestor.run_all(&sources).await {
        let run = result?;
        println!(
            "{}: {} ({} fetched, {} new)",
            run.source,
            run.status.as_str(),
            run.items_processed,
            run.items_ingested
        );
        if run.status == RunStatus::Failed {
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
