use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use digestline_common::{load_config, Config, FileConfig};
use digestline_run::infra::{
    live_deps, EchoWriter, MemoryStore, NoOpEmbedder, PgStore, VoyageEmbedder,
};
use digestline_run::traits::TextEmbedder;
use digestline_run::{Orchestrator, RunDeps};

#[derive(Parser)]
#[command(name = "digestline", about = "Topic selection and duplicate-guarded content runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one selection pass and print the summary.
    Run {
        /// Path to config TOML file (defaults to DIGESTLINE_CONFIG or ./digestline.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use an in-memory store seeded from this JSON file and an offline writer
        #[arg(long, value_name = "ITEMS_JSON")]
        dry_run: Option<PathBuf>,
    },
    /// Apply database migrations and exit.
    Migrate,
}

fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("DIGESTLINE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("digestline.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("digestline=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            dry_run: Some(seed),
        } => {
            let file_config = load_config(&config_path(config))?;
            dry_run(file_config, &seed).await
        }
        Command::Run {
            config,
            dry_run: None,
        } => {
            let env = Config::from_env()?;
            let file_config = load_config(&config.unwrap_or_else(|| env.config_path.clone()))?;
            run(env, file_config).await
        }
        Command::Migrate => {
            let env = Config::from_env()?;
            let store = PgStore::connect(&env.database_url).await?;
            store.migrate().await?;
            info!("Migrations applied");
            Ok(())
        }
    }
}

async fn run(env: Config, file_config: FileConfig) -> Result<()> {
    let deps = live_deps(&env, &file_config).await?;
    let summary = Orchestrator::new(deps, file_config).run().await?;
    println!("{summary}");
    Ok(())
}

async fn dry_run(mut file_config: FileConfig, seed: &std::path::Path) -> Result<()> {
    let store = Arc::new(MemoryStore::from_json_file(seed)?);
    info!(seed = %seed.display(), "Dry run against in-memory store");

    let embedder: Arc<dyn TextEmbedder> = match std::env::var("VOYAGE_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            Arc::new(VoyageEmbedder::new(&key, &file_config.models.embedding))
        }
        _ => {
            file_config.selection.embed_items = false;
            Arc::new(NoOpEmbedder)
        }
    };

    let orchestrator = Orchestrator::new(
        RunDeps::with_store(store.clone(), embedder, Arc::new(EchoWriter)),
        file_config,
    );
    let summary = orchestrator.run().await?;
    println!("{summary}");
    for stored in store.contents() {
        println!("  [{}] {}", stored.content.category, stored.content.title);
    }
    Ok(())
}
