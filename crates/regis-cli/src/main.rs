//! `regis`: company registry ingestion and lookup.
//!
//! Reads `regis.toml` (or the path given with `--config`), opens the SQLite
//! store, and either serves the HTTP control surface or runs one pipeline
//! step in the foreground.
//!
//! ```text
//! regis serve
//! regis bulk --strategy legal-forms --max 500 --concurrency 8 --normalize
//! regis bulk --strategy range --start 1000 --end 5000 --step 7
//! regis normalize
//! regis resolve "FN 348406 m"
//! ```

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use regis_api::{AppState, api_router};
use regis_client::{HttpRegistryClient, ResilientClient};
use regis_core::{ExternalId, run::DiscoveryStrategy};
use regis_ingest::{BulkRequest, Gateway, IngestionPool, Normalizer, Query, Resolution};
use regis_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

type Client = ResilientClient<HttpRegistryClient>;

#[derive(Parser)]
#[command(author, version, about = "Company registry ingestion pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "regis.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API.
  Serve,
  /// Run one bulk ingestion in the foreground. Ctrl-C stops it gracefully.
  Bulk(BulkArgs),
  /// Normalize every identifier with unprocessed extracts.
  Normalize,
  /// Look up one company, fetching it upstream if needed, and print it.
  Resolve {
    /// Register number, e.g. `348406m` or `FN 348406 m`.
    id: String,
  },
}

#[derive(Args)]
struct BulkArgs {
  #[arg(long, value_enum, default_value_t = StrategyArg::Localities)]
  strategy:    StrategyArg,
  /// Upper bound on identifiers considered.
  #[arg(long)]
  max:         Option<u64>,
  #[arg(long)]
  concurrency: Option<usize>,
  /// Requests per second; capped at the configured upstream rate.
  #[arg(long)]
  rate:        Option<f64>,
  /// First register number for `--strategy range`.
  #[arg(long, default_value_t = 1)]
  start:       u32,
  #[arg(long, default_value_t = 100_000)]
  end:         u32,
  #[arg(long, default_value_t = 1)]
  step:        u32,
  /// Comma-separated register numbers for `--strategy ids`.
  #[arg(long, value_delimiter = ',')]
  ids:         Vec<String>,
  /// Run the normalization sweep after the run finishes.
  #[arg(long)]
  normalize:   bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
  Localities,
  LegalForms,
  Range,
  Ids,
}

impl BulkArgs {
  fn strategy(&self) -> anyhow::Result<DiscoveryStrategy> {
    Ok(match self.strategy {
      StrategyArg::Localities => DiscoveryStrategy::Localities,
      StrategyArg::LegalForms => DiscoveryStrategy::LegalForms,
      StrategyArg::Range => DiscoveryStrategy::IdRange {
        start: self.start,
        end:   self.end,
        step:  self.step,
      },
      StrategyArg::Ids => {
        if self.ids.is_empty() {
          bail!("--strategy ids needs --ids");
        }
        let ids = self
          .ids
          .iter()
          .map(|raw| ExternalId::parse(raw).with_context(|| format!("bad id {raw:?}")))
          .collect::<anyhow::Result<_>>()?;
        DiscoveryStrategy::Explicit { ids }
      }
    })
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = AppConfig::load(&cli.config)?;

  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", config.store_path))?;
  let store = Arc::new(store);
  let client: Arc<Client> = Arc::new(
    ResilientClient::from_config(&config.registry).context("failed to build registry client")?,
  );

  match cli.command {
    Command::Serve => serve(config, store, client).await,
    Command::Bulk(args) => bulk(config, store, client, args).await,
    Command::Normalize => {
      let report = Normalizer::new(store)
        .normalize_pending(config.ingest.normalize_page)
        .await?;
      print_json(&report)
    }
    Command::Resolve { id } => {
      let id = ExternalId::parse(&id).with_context(|| format!("bad id {id:?}"))?;
      let gateway = Gateway::new(store, client, config.gateway);
      match gateway.resolve(Query::Identifier(id.clone())).await? {
        Resolution::Company(profile) => print_json(&profile),
        Resolution::Companies(list) => print_json(&list),
        Resolution::NotFound => bail!("company {id} not found"),
      }
    }
  }
}

async fn serve(
  config: AppConfig,
  store: Arc<SqliteStore>,
  client: Arc<Client>,
) -> anyhow::Result<()> {
  let (stop, shutdown) = watch::channel(false);
  let limiter = client.limiter().clone();
  let state = AppState::new(store, client, limiter, config.ingest, config.gateway, shutdown);
  let app = api_router(state.clone());

  let address = format!("{}:{}", config.server.host, config.server.port);
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  let served = axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
      }
    })
    .await;

  // Stop background runs and wait for them to record their partial counts.
  stop.send_replace(true);
  state.drain_runs().await;

  served.context("server error")
}

async fn bulk(
  config: AppConfig,
  store: Arc<SqliteStore>,
  client: Arc<Client>,
  args: BulkArgs,
) -> anyhow::Result<()> {
  let request = BulkRequest {
    strategy:        args.strategy()?,
    max_identifiers: args.max,
    concurrency:     args.concurrency,
    rate_per_sec:    args.rate,
  };

  let (stop, shutdown) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupted; letting in-flight fetches finish");
      stop.send_replace(true);
    }
  });

  let limiter = client.limiter().clone();
  let pool = IngestionPool::new(store.clone(), client, limiter, config.ingest.clone());
  let run = pool.run(request, shutdown).await?;
  print_json(&run)?;

  if args.normalize {
    let report = Normalizer::new(store)
      .normalize_pending(config.ingest.normalize_page)
      .await?;
    print_json(&report)?;
  }
  Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
