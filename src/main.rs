use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fret_emissions::{
    app::EmissionsService,
    domain::{InMemoryReferenceStore, TransportDraft},
    infra::{
        cache::{default_distance_cache_path, load_distance_cache, save_distance_cache, EnergyCache},
        distance::DistanceResolver,
        routing::RoutingClient,
    },
    util::{
        config::{config_file, load_config, save_config, EngineConfig},
        version::{version_label, APP_NAME},
    },
};

#[derive(Parser)]
#[command(name = "fret-emissions")]
#[command(about = "Greenhouse-gas emissions of road freight transports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Never call the routing service
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute transports from a JSON file and print them with their results
    Compute {
        /// Transport or array of transports
        #[arg(short, long)]
        input: PathBuf,

        /// Vehicles and energies
        #[arg(short, long)]
        reference: PathBuf,
    },

    /// Recompute every transport in a file and print the batch report
    Recalculate {
        /// Transport or array of transports
        #[arg(short, long)]
        input: PathBuf,

        /// Vehicles and energies
        #[arg(short, long)]
        reference: PathBuf,
    },

    /// Resolve the road distance between two places
    Distance { origin: String, destination: String },

    /// Write a default configuration file and print its path
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TransportFile {
    Many(Vec<TransportDraft>),
    One(TransportDraft),
}

impl TransportFile {
    fn into_drafts(self) -> Vec<TransportDraft> {
        match self {
            TransportFile::Many(drafts) => drafts,
            TransportFile::One(draft) => vec![draft],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = load_config().context("failed to load configuration")?;
    let cache_path = config
        .distance_cache_path
        .clone()
        .unwrap_or_else(default_distance_cache_path);
    let resolver = build_resolver(&config, cli.offline, &cache_path)?;
    info!(version = %version_label(), "{APP_NAME} starting");

    match cli.command {
        Commands::Compute { input, reference } => {
            let service = load_service(&input, &reference, &config, resolver.clone()).await?;
            let mut entries = Vec::new();
            for reference in service.registry().refs().await {
                service.recompute(&reference).await?;
                entries.push(service.get(&reference).await?);
            }
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Recalculate { input, reference } => {
            let service = load_service(&input, &reference, &config, resolver.clone()).await?;
            let report = service.recalculate_all().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Distance {
            origin,
            destination,
        } => {
            let resolved = resolver.resolve(&origin, &destination).await;
            let output = serde_json::json!({
                "origine": origin,
                "destination": destination,
                "distance_km": resolved.km,
                "source": resolved.source,
                "low_confidence": resolved.source.is_low_confidence(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::InitConfig { force } => {
            if let Some(existing) = config_file().filter(|path| path.exists() && !force) {
                anyhow::bail!(
                    "{} already exists, pass --force to replace it",
                    existing.display()
                );
            }
            let path = save_config(&EngineConfig::default())
                .context("failed to write configuration")?;
            info!(path = %path.display(), "configuration written");
            println!("{}", path.display());
        }
    }

    let cache = resolver.cache_snapshot().await;
    if !cache.is_empty() {
        if let Err(err) = save_distance_cache(&cache, &cache_path) {
            warn!(error = %err, "failed to save distance cache");
        }
    }
    Ok(())
}

fn build_resolver(
    config: &EngineConfig,
    offline: bool,
    cache_path: &Path,
) -> Result<DistanceResolver> {
    let routing = if offline || !config.routing.has_credentials() {
        info!("routing disabled, distances come from the city table");
        None
    } else {
        Some(RoutingClient::new(&config.routing).context("invalid routing configuration")?)
    };
    let cache = load_distance_cache(cache_path).unwrap_or_default();
    Ok(DistanceResolver::new(routing)
        .with_default_km(config.default_distance_km)
        .with_cache(cache))
}

async fn load_service(
    input: &Path,
    reference: &Path,
    config: &EngineConfig,
    resolver: DistanceResolver,
) -> Result<EmissionsService<EnergyCache<InMemoryReferenceStore>>> {
    let raw = fs::read_to_string(reference)
        .with_context(|| format!("failed to read {}", reference.display()))?;
    let store = InMemoryReferenceStore::from_json(&raw)
        .with_context(|| format!("invalid reference data in {}", reference.display()))?;
    info!(
        vehicles = store.vehicle_count(),
        energies = store.energy_count(),
        "reference data loaded"
    );

    let raw = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let file: TransportFile = serde_json::from_str(&raw)
        .with_context(|| format!("invalid transports in {}", input.display()))?;

    let reference_data = Arc::new(EnergyCache::new(store, config.energy_cache_ttl()));
    let service = EmissionsService::new(reference_data, resolver);
    for draft in file.into_drafts() {
        let label = draft.reference.clone();
        service
            .register_draft(draft)
            .await
            .with_context(|| format!("transport {label:?} rejected"))?;
    }
    Ok(service)
}
