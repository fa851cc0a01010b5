//! VMManager 6 auto-balancer
//!
//! Command-line entry point: resolves flags and environment fallbacks,
//! authenticates against the platform, and drives the balance loop until
//! the operator stops it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use vm_balancer::api::{ManagerApi, VmManagerClient};
use vm_balancer::balancer::{
    MigrationExecutor, RealExecutor, SimulatingExecutor, VmBalancer, VmSelection,
};
use vm_balancer::config::{self, BalancerConfig};
use vm_balancer::logging::LoggingConfig;
use vm_balancer::shutdown::ShutdownSignal;

#[derive(Parser)]
#[command(author, version, about = "Automatic VM balancer for VMManager 6 clusters", long_about = None)]
struct Cli {
    /// VMManager host URL [env: VMMANAGER_HOST]
    #[arg(long)]
    host: Option<String>,

    /// VMManager username [env: VMMANAGER_USERNAME]
    #[arg(long)]
    username: Option<String>,

    /// VMManager password [env: VMMANAGER_PASSWORD]
    #[arg(long)]
    password: Option<String>,

    /// Balance check interval in seconds [env: BALANCE_INTERVAL]
    #[arg(long)]
    interval: Option<u64>,

    /// Comma-separated cluster IDs to process; all clusters when unset
    /// [env: CLUSTER_IDS]
    #[arg(long)]
    cluster_ids: Option<String>,

    /// CPU allocation ratio threshold for overloaded nodes
    /// [env: CPU_OVERLOAD_THRESHOLD]
    #[arg(long)]
    cpu_overload_threshold: Option<f64>,

    /// Memory usage percentage threshold for overloaded nodes
    /// [env: MEMORY_OVERLOAD_THRESHOLD]
    #[arg(long)]
    memory_overload_threshold: Option<f64>,

    /// CPU allocation ratio threshold for target nodes
    /// [env: CPU_TARGET_THRESHOLD]
    #[arg(long)]
    cpu_target_threshold: Option<f64>,

    /// Memory usage percentage threshold for target nodes
    /// [env: MEMORY_TARGET_THRESHOLD]
    #[arg(long)]
    memory_target_threshold: Option<f64>,

    /// Comma-separated node names or IDs excluded as migration sources
    /// [env: EXCLUDE_SOURCE_NODES]
    #[arg(long)]
    exclude_source_nodes: Option<String>,

    /// Comma-separated node names or IDs excluded as migration targets
    /// [env: EXCLUDE_TARGET_NODES]
    #[arg(long)]
    exclude_target_nodes: Option<String>,

    /// Maximum number of VM migrations per cluster per cycle
    /// [env: MAX_MIGRATIONS_PER_CYCLE]
    #[arg(long)]
    max_migrations_per_cycle: Option<usize>,

    /// Timeout for one VM migration in seconds [env: MIGRATION_TIMEOUT]
    #[arg(long)]
    migration_timeout: Option<u64>,

    /// Cool-down after a successful migration, in seconds
    /// [env: HISTORY_RETENTION]
    #[arg(long)]
    history_retention: Option<u64>,

    /// Cool-down after a failed migration, in seconds
    /// [env: BLACKLIST_RETENTION]
    #[arg(long)]
    blacklist_retention: Option<u64>,

    /// Candidate ordering for VM selection [env: VM_SELECTION]
    #[arg(long, value_enum)]
    vm_selection: Option<VmSelection>,

    /// Run once and exit
    #[arg(long)]
    once: bool,

    /// Simulate migrations without actually performing them
    #[arg(long)]
    dry_run: bool,

    /// Logging level [env: LOG_LEVEL]
    #[arg(long)]
    log_level: Option<String>,

    /// Verify SSL certificates
    #[arg(long)]
    verify_ssl: bool,
}

fn resolve_config(cli: &Cli) -> BalancerConfig {
    let cluster_ids = match &cli.cluster_ids {
        Some(raw) => config::split_list(raw),
        None => config::env_list("CLUSTER_IDS"),
    };
    let exclude_source_nodes: HashSet<String> = match &cli.exclude_source_nodes {
        Some(raw) => config::split_list(raw).into_iter().collect(),
        None => config::env_list("EXCLUDE_SOURCE_NODES").into_iter().collect(),
    };
    let exclude_target_nodes: HashSet<String> = match &cli.exclude_target_nodes {
        Some(raw) => config::split_list(raw).into_iter().collect(),
        None => config::env_list("EXCLUDE_TARGET_NODES").into_iter().collect(),
    };

    BalancerConfig {
        cpu_overload_threshold: cli.cpu_overload_threshold.unwrap_or_else(|| {
            config::env_parse(
                "CPU_OVERLOAD_THRESHOLD",
                config::DEFAULT_CPU_OVERLOAD_THRESHOLD,
            )
        }),
        memory_overload_threshold: cli.memory_overload_threshold.unwrap_or_else(|| {
            config::env_parse(
                "MEMORY_OVERLOAD_THRESHOLD",
                config::DEFAULT_MEMORY_OVERLOAD_THRESHOLD,
            )
        }),
        cpu_target_threshold: cli.cpu_target_threshold.unwrap_or_else(|| {
            config::env_parse("CPU_TARGET_THRESHOLD", config::DEFAULT_CPU_TARGET_THRESHOLD)
        }),
        memory_target_threshold: cli.memory_target_threshold.unwrap_or_else(|| {
            config::env_parse(
                "MEMORY_TARGET_THRESHOLD",
                config::DEFAULT_MEMORY_TARGET_THRESHOLD,
            )
        }),
        max_migrations_per_cycle: cli.max_migrations_per_cycle.unwrap_or_else(|| {
            config::env_parse(
                "MAX_MIGRATIONS_PER_CYCLE",
                config::DEFAULT_MAX_MIGRATIONS_PER_CYCLE,
            )
        }),
        migration_timeout: Duration::from_secs(cli.migration_timeout.unwrap_or_else(|| {
            config::env_parse("MIGRATION_TIMEOUT", config::DEFAULT_MIGRATION_TIMEOUT_SECS)
        })),
        balance_interval: Duration::from_secs(cli.interval.unwrap_or_else(|| {
            config::env_parse("BALANCE_INTERVAL", config::DEFAULT_BALANCE_INTERVAL_SECS)
        })),
        history_retention: Duration::from_secs(cli.history_retention.unwrap_or_else(|| {
            config::env_parse("HISTORY_RETENTION", config::DEFAULT_RETENTION_SECS)
        })),
        blacklist_retention: Duration::from_secs(cli.blacklist_retention.unwrap_or_else(|| {
            config::env_parse("BLACKLIST_RETENTION", config::DEFAULT_RETENTION_SECS)
        })),
        cluster_ids,
        exclude_source_nodes,
        exclude_target_nodes,
        vm_selection: cli
            .vm_selection
            .unwrap_or_else(|| config::env_parse("VM_SELECTION", VmSelection::default())),
        dry_run: cli.dry_run,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config::env_value("LOG_LEVEL", "info"));
    let logging = LoggingConfig {
        level: log_level,
        ..Default::default()
    };
    let _log_guard = match logging.init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let host = cli
        .host
        .clone()
        .unwrap_or_else(|| config::env_value("VMMANAGER_HOST", "https://localhost"));
    let username = cli
        .username
        .clone()
        .unwrap_or_else(|| config::env_value("VMMANAGER_USERNAME", "admin"));
    let password = cli
        .password
        .clone()
        .unwrap_or_else(|| config::env_value("VMMANAGER_PASSWORD", ""));

    if password.is_empty() {
        error!("Password is required. Set VMMANAGER_PASSWORD env var or use --password");
        std::process::exit(1);
    }

    let config = resolve_config(&cli);
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    if config.dry_run {
        info!("Running in DRY RUN mode - no actual migrations will be performed");
    }
    if !config.cluster_ids.is_empty() {
        info!("Will process only clusters with IDs: {:?}", config.cluster_ids);
    }

    let shutdown = ShutdownSignal::new();
    {
        let signal = shutdown.clone();
        tokio::spawn(async move {
            signal.listen().await;
        });
    }

    let client = match VmManagerClient::new(
        &host,
        &username,
        &password,
        cli.verify_ssl,
        shutdown.watch(),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build API client: {}", e);
            std::process::exit(1);
        }
    };
    let api: Arc<dyn ManagerApi> = Arc::new(client);

    if let Err(e) = api.authenticate().await {
        error!("Failed to authenticate with VMManager: {}", e);
        std::process::exit(1);
    }

    let executor: Arc<dyn MigrationExecutor> = if config.dry_run {
        Arc::new(SimulatingExecutor)
    } else {
        Arc::new(RealExecutor::new(api.clone(), config.migration_timeout))
    };

    let interval = config.balance_interval;
    let once = cli.once;
    let dry_run = config.dry_run;
    let mut balancer = VmBalancer::new(api, executor, config, shutdown);

    if once {
        balancer.run_cycle().await;
    } else {
        let mode = if dry_run { " (DRY RUN mode)" } else { "" };
        info!(
            "Starting continuous balancing with {}s interval{}",
            interval.as_secs(),
            mode
        );
        info!("Press Ctrl+C to stop");
        balancer.run().await;
    }
}
