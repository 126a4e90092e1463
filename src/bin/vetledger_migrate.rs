//! vetledger-migrate: operator CLI
//!
//! Moves the clinic store between schema versions and checks or repairs the
//! derived visit/appointment metrics.
//!
//! ## Configuration
//! - `--config PATH` or VETLEDGER_CONFIG: YAML configuration file
//! - VETLEDGER__STORAGE__PATH etc.: per-field overrides
//! - VETLEDGER_LOG: tracing filter (default: info)

use std::process;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use vetledger::clinic::{self, revisions, ClinicService, SeedPlan};
use vetledger::config::Config;
use vetledger::metrics::{self, EntityRef};
use vetledger::migration::Migrator;
use vetledger::utils::bootstrap::{connect_with_retry, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "vetledger-migrate", author, version, about = "Clinic schema and metrics maintenance")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply steps up to a target (default: head)
    Upgrade {
        #[arg(long, value_name = "ID")]
        to: Option<String>,
    },
    /// Revert steps down to a target step or `base`
    Downgrade {
        #[arg(long, value_name = "ID|base")]
        to: String,
    },
    /// Print the applied step
    Current,
    /// Print every recorded apply and revert
    History,
    /// Print the catalog heads
    Heads,
    /// Compare stored metrics with fresh aggregates
    VerifyMetrics,
    /// Recompute metrics and release quarantine
    RepairMetrics(RepairArgs),
    /// Populate the store with deterministic sample data
    Seed {
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Args, Debug)]
struct RepairArgs {
    /// Repair one pet
    #[arg(long, value_name = "ID", conflicts_with = "vet")]
    pet: Option<i64>,
    /// Repair one veterinarian
    #[arg(long, value_name = "ID")]
    vet: Option<i64>,
}

impl RepairArgs {
    fn entity(&self) -> Option<EntityRef> {
        self.pet
            .map(EntityRef::pet)
            .or(self.vet.map(EntityRef::veterinarian))
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;
    let pool = connect_with_retry(&config.storage).await?;
    let migrator = Migrator::new(pool.clone(), revisions::catalog()?).await?;

    match cli.command {
        Commands::Upgrade { to } => {
            let target = to.map(|t| migrator.catalog().resolve(&t)).transpose()?;
            let version = migrator.upgrade(target.as_ref()).await?;
            println!("{version}");
        }
        Commands::Downgrade { to } => {
            let target = migrator.catalog().resolve(&to)?;
            let version = migrator.downgrade(&target).await?;
            println!("{version}");
        }
        Commands::Current => {
            println!("{}", migrator.current().await?);
        }
        Commands::History => {
            for entry in migrator.history().await? {
                println!(
                    "{:>4}  {}  {:<9}  {} -> {}  {}",
                    entry.seq,
                    entry.recorded_at,
                    entry.direction.as_str(),
                    entry.from,
                    entry.to,
                    entry.step
                );
            }
        }
        Commands::Heads => {
            for head in migrator.catalog().heads() {
                let step = migrator.catalog().get(head)?;
                println!("{}  {}", head, step.description);
            }
        }
        Commands::VerifyMetrics => {
            metrics::verify(&pool).await?;
            println!("metrics consistent");
        }
        Commands::RepairMetrics(args) => {
            let report = metrics::repair(&pool, args.entity()).await?;
            println!(
                "recomputed {} rows, released {} quarantined entities",
                report.recomputed, report.released
            );
        }
        Commands::Seed { seed } => {
            let service = ClinicService::open(pool, &config).await?;
            let plan = SeedPlan {
                seed,
                ..SeedPlan::default()
            };
            let summary = clinic::seed(&service, &plan).await?;
            info!(seed, "Seed complete");
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
