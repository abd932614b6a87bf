//! SCN routing daemon entry point.
//!
//! Runs the routing engine against a static topology and an in-memory
//! switch fleet. Every host in the topology is announced at startup, which
//! meshes routes between all host pairs.

use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use scn_openflow::MemoryFlowTable;
use scn_routed::audit::{init_json_logging, AuditCategory, AuditOutcome, AuditRecord};
use scn_routed::audit_log;
use scn_routed::config::RoutingConfig;
use scn_routed::daemon::RoutingDaemon;
use scn_routed::topology::{StaticTopology, Topology};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// SCN routing and traffic-engineering daemon
#[derive(Parser, Debug)]
#[command(name = "scn-routed")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Daemon configuration (YAML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Static topology description (YAML)
    #[arg(short = 't', long)]
    topology: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Balancing period in seconds, overrides the configuration file
    #[arg(short = 'p', long)]
    period: Option<u64>,

    /// Route by hop count instead of bandwidth
    #[arg(long)]
    force_route: bool,

    /// Only rebalance when a reservation is violated
    #[arg(long)]
    no_always_optimize: bool,
}

impl Args {
    fn load_config(&self) -> Result<RoutingConfig, scn_routed::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => RoutingConfig::from_yaml_file(path)?,
            None => RoutingConfig::default(),
        };
        if let Some(period) = self.period {
            config.balancing.period_secs = period;
        }
        if self.force_route {
            config.route.force_route = true;
        }
        if self.no_always_optimize {
            config.balancing.always_optimize = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.log_format {
        LogFormat::Text => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
                .init();
        }
        LogFormat::Json => init_json_logging(&args.log_level),
    }

    info!("Starting scn-routed");

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Balancing period: {}s, automatic: {}, always optimize: {}",
        config.balancing.period_secs, config.balancing.automatic_mode, config.balancing.always_optimize
    );
    info!("Statistics poll interval: {}s", config.daemon.stats_poll_interval_secs);
    if config.route.force_route {
        info!("Hop-count routing: ENABLED");
    }

    audit_log!(AuditRecord::new(AuditCategory::ConfigurationChange, "scn-routed", "load_config")
        .with_outcome(AuditOutcome::Success)
        .with_object_id(
            args.config
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
        )
        .with_object_type("config_file"));

    let topology = match StaticTopology::from_yaml_file(&args.topology) {
        Ok(topology) => Arc::new(topology),
        Err(e) => {
            error!("Failed to load topology {}: {}", args.topology.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let hosts = topology.hosts();
    info!(
        "Topology: {} switches, {} links, {} hosts",
        topology.switches().len(),
        topology.all_links().len(),
        hosts.len()
    );

    let fleet = Arc::new(MemoryFlowTable::new());
    let mut daemon = RoutingDaemon::new(config, topology, fleet);
    let handle = daemon.handle();

    // Only run() drains the bounded command channel.
    let announcer = handle.clone();
    tokio::spawn(async move {
        for host in hosts {
            if let Err(e) = announcer.host_up(host).await {
                error!("Failed to announce host: {}", e);
                break;
            }
        }
    });

    let shutdown = handle.clone();
    let shutdown_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down gracefully...");
                if let Err(e) = shutdown.shutdown().await {
                    error!("Failed to stop daemon: {}", e);
                }
            }
            Err(err) => {
                error!("Failed to listen for ctrl-c: {}", err);
            }
        }
    });

    daemon.run().await;
    shutdown_handle.abort();

    for line in daemon.dump() {
        info!("{}", line);
    }
    info!("scn-routed shutdown complete");
    ExitCode::SUCCESS
}
