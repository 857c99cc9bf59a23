//! Quorumd - Distributed Database Cluster Manager
//!
//! Runs the membership, failure-detection, and leader-election control
//! plane for one cluster node.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quorumd::config::Config;
use quorumd::controller::Controller;
use quorumd::error::Result;
use quorumd::transport::UdpTransport;

/// Quorumd - Distributed Database Cluster Manager
#[derive(Parser)]
#[command(name = "quorumd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "quorumd.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the management process for this node
    Start,

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "quorumd.toml")]
        output: PathBuf,

        /// Cluster name
        #[arg(long, default_value = "default_cluster")]
        cluster_name: String,

        /// Local interface address with prefix, e.g. 10.0.0.1/24
        #[arg(long)]
        interface: String,
    },

    /// Show the node identity derived from the configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Validate => run_validate(cli.config),
        Commands::Init {
            output,
            cluster_name,
            interface,
        } => run_init(output, cluster_name, interface),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the management process
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting quorumd node...");

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!(
        "Loaded configuration for cluster '{}'",
        config.management.cluster_name
    );

    let transport = UdpTransport::bind(&config.management)?;
    let mut controller = Controller::new(config, Box::new(transport))?;

    // Termination signal raises the stop flag; the in-flight cycle
    // completes before the loop exits.
    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Caught termination signal");
            stop.stop();
        }
    });

    let result = controller.run().await;
    controller.shutdown();
    result
}

/// Validate a configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match Config::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration OK");
            println!("  cluster:   {}", config.management.cluster_name);
            println!("  node id:   {}", config.node_id()?);
            println!(
                "  multicast: {}:{}",
                config.management.multicast_group, config.management.multicast_port
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            Err(e)
        }
    }
}

/// Write a starter configuration file
fn run_init(output: PathBuf, cluster_name: String, interface: String) -> Result<()> {
    let config = Config::for_node(&cluster_name, &interface, 21000);
    config.validate()?;

    let toml = toml::to_string_pretty(&config)
        .map_err(|e| quorumd::Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(&output, toml)?;

    println!("Wrote starter configuration to {:?}", output);
    Ok(())
}

/// Print the node identity and effective timing values
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    println!("node id:                  {}", config.node_id()?);
    println!("cluster:                  {}", config.management.cluster_name);
    println!("settle time:              {} ticks", config.timing.settle_time);
    println!("heartbeat period:         {} ticks", config.timing.heartbeat_period);
    println!("partition threshold:      {} ticks", config.timing.node_partition_threshold);
    println!("election duration:        {} ticks", config.timing.election_duration);
    println!("announce period:          {} ms", config.timing.announce_period_ms);
    println!("cycle interval:           {} ms", config.timing.cycle_interval_ms);
    Ok(())
}
