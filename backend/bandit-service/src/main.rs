use anyhow::{Context, Result};
use bandit_service::jobs::{bootstrap_from_dir, seed_from_file};
use bandit_service::services::store;
use bandit_service::{Config, InstanceKey};
use std::env;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  bandit-service seed <ranked_interactions.json>");
    eprintln!("  bandit-service bootstrap <instance_dir> [--force]");
    eprintln!("  bandit-service inspect <community> [category]");
    std::process::exit(1);
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bandit_service=info,info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load config")?;
    init_tracing(config.service.json_logs);

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    info!(
        service = %config.service.service_name,
        command = %args[1],
        backend = ?config.store.backend,
        "Starting"
    );

    let arm_store = store::from_config(&config.store)
        .await
        .context("Failed to initialize arm store")?;

    match args[1].as_str() {
        "seed" if args.len() == 3 => {
            let report = seed_from_file(
                arm_store,
                config.bandit.generator_config(),
                Path::new(&args[2]),
            )
            .await?;
            println!(
                "Seeded {} instances ({} warm-started), skipped {} pools",
                report.instances_written,
                report.warm_started,
                report.skipped_pools.len()
            );
        }
        "bootstrap" if args.len() == 3 || args.len() == 4 => {
            let force = match args.get(3).map(String::as_str) {
                None => false,
                Some("--force") => true,
                Some(_) => usage(),
            };
            let report = bootstrap_from_dir(arm_store, Path::new(&args[2]), force).await?;
            println!(
                "Loaded {} instances, kept {} existing, {} unreadable existing, ignored {} files",
                report.loaded, report.kept_existing, report.unreadable_existing, report.ignored
            );
        }
        "inspect" if args.len() == 3 || args.len() == 4 => {
            let key = match args.get(3) {
                Some(category) => InstanceKey::item(args[2].as_str(), category.as_str()),
                None => InstanceKey::community(args[2].as_str()),
            };
            let state = arm_store
                .get(&key)
                .await
                .with_context(|| format!("Failed to load {key}"))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        _ => usage(),
    }

    Ok(())
}
