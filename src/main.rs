//! Themis - Personal Inbox Triage Engine
//!
//! CLI entry point: one-shot triage passes, batch resolution, rule
//! management, and the long-running scheduler daemon.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use themis_core::{
    batch::{BatchAssigner, BatchResolver},
    config::ThemisConfig,
    learning::LearningLoop,
    pipeline::ClassificationPipeline,
    rules::RuleStore,
    scheduler::{AssignmentJob, BackgroundScheduler, ClassificationJob, LearningJob},
    services::{cloud::AnthropicModel, context::NoContext, local::OllamaModel, CloudModel, LocalModel},
    storage::{sqlite::SqliteStore, TriageStore},
    types::{CardId, ItemId, RuleId},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "themis", version, about = "Personal inbox triage engine")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "THEMIS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long, env = "THEMIS_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the default rule set (idempotent)
    Init,

    /// Run one classification pass over unclassified items
    Pass,

    /// Re-check individually-classified items against the current rules
    Reclassify,

    /// Group classified items into pending batch cards
    Assign,

    /// Resolve a batch card with accepted/rejected item ids
    Resolve {
        /// Card to resolve
        card: String,

        /// Items to apply the card's action to
        #[arg(long, value_delimiter = ',')]
        accept: Vec<String>,

        /// Items to return to individual review
        #[arg(long, value_delimiter = ',')]
        reject: Vec<String>,
    },

    /// Run the learning loop once
    Learn,

    /// Rule management
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Run the background scheduler until interrupted
    Daemon,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// List rules
    List {
        /// Include inactive rules
        #[arg(long)]
        all: bool,
    },

    /// Author a rule from a natural-language instruction (created inactive)
    Author {
        /// The instruction, e.g. "batch everything from github"
        text: String,
    },

    /// Deactivate a rule (soft delete)
    Deactivate {
        /// Rule id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ThemisConfig::from_file(path)?,
        None => ThemisConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.database_path = db.clone();
    }

    let store: Arc<dyn TriageStore> = Arc::new(SqliteStore::open(&config.database_path)?);
    let rules = Arc::new(RuleStore::with_guidance_ttl(
        store.clone(),
        config.pipeline.guidance_cache_ttl,
    ));

    match cli.command {
        Command::Init => {
            let inserted = rules.seed_defaults().await?;
            println!("Seeded {} default rules", inserted);
        }

        Command::Pass => {
            let pipeline = build_pipeline(&config, store.clone(), rules.clone())?;
            let report = pipeline
                .run_batch_pass(config.jobs.classification.batch_size)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Reclassify => {
            let pipeline = build_pipeline(&config, store.clone(), rules.clone())?;
            let report = pipeline
                .reclassify_pass(config.jobs.classification.batch_size)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Assign => {
            let assigner = BatchAssigner::new(store.clone());
            let report = assigner.assign().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Resolve {
            card,
            accept,
            reject,
        } => {
            let card_id = CardId::from_string(&card)?;
            let accepted = parse_item_ids(&accept)?;
            let rejected = parse_item_ids(&reject)?;

            let resolver = BatchResolver::new(store.clone());
            let report = resolver.resolve(card_id, &accepted, &rejected).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Learn => {
            let cloud = cloud_model(&config)?;
            let learning = LearningLoop::new(store.clone(), cloud, config.learning.clone());
            let report = learning.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Rules { command } => match command {
            RulesCommand::List { all } => {
                let listed = if all {
                    rules.list_all().await?
                } else {
                    rules.list_active().await?
                };
                for rule in listed {
                    println!(
                        "{}  [{:?}/{:?}]  {}  (matched {})",
                        rule.id, rule.kind, rule.status, rule.name, rule.match_count
                    );
                }
            }
            RulesCommand::Author { text } => {
                let cloud = cloud_model(&config)?;
                let rule = rules.author_from_text(&text, cloud.as_ref()).await?;
                println!(
                    "Created inactive rule '{}' ({}); review and activate it",
                    rule.name, rule.id
                );
            }
            RulesCommand::Deactivate { id } => {
                let rule = rules.deactivate(RuleId::from_string(&id)?).await?;
                println!("Deactivated rule '{}'", rule.name);
            }
        },

        Command::Daemon => {
            let pipeline = Arc::new(build_pipeline(&config, store.clone(), rules.clone())?);
            let assigner = Arc::new(BatchAssigner::new(store.clone()));
            let cloud = cloud_model(&config)?;
            let learning = Arc::new(LearningLoop::new(
                store.clone(),
                cloud,
                config.learning.clone(),
            ));

            let mut scheduler = BackgroundScheduler::new();
            scheduler.register_job(
                Arc::new(ClassificationJob::new(pipeline)),
                config.jobs.classification.clone(),
            );
            scheduler.register_job(
                Arc::new(AssignmentJob::new(assigner)),
                config.jobs.assignment.clone(),
            );
            scheduler.register_job(
                Arc::new(LearningJob::new(learning)),
                config.jobs.learning.clone(),
            );

            scheduler.start().await;
        }
    }

    Ok(())
}

fn build_pipeline(
    config: &ThemisConfig,
    store: Arc<dyn TriageStore>,
    rules: Arc<RuleStore>,
) -> anyhow::Result<ClassificationPipeline> {
    let cloud = cloud_model(config)?;
    let local: Option<Arc<dyn LocalModel>> = match &config.models.local {
        Some(local_config) => Some(Arc::new(OllamaModel::new(local_config.clone())?)),
        None => None,
    };

    Ok(ClassificationPipeline::new(
        store,
        rules,
        local,
        cloud,
        Arc::new(NoContext),
        config.pipeline.clone(),
    ))
}

fn cloud_model(config: &ThemisConfig) -> anyhow::Result<Arc<dyn CloudModel>> {
    Ok(Arc::new(AnthropicModel::new(config.models.cloud.clone())?))
}

fn parse_item_ids(raw: &[String]) -> anyhow::Result<Vec<ItemId>> {
    raw.iter()
        .map(|id| ItemId::from_string(id).map_err(Into::into))
        .collect()
}
