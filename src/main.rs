//! Storage Node Watchdog
//!
//! Monitors host services and storage drives and emits normalized status
//! events. Without a live event-source adapter the binary replays a scripted
//! scenario and logs every message put on the bus.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_node_watchdog::{
    ChannelBus, LogBus, MessageBus, Reactor, Result, Scenario, ScriptedEventSource,
    WatchdogConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Node Watchdog - service and drive health monitoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file (reads the `systemd_watchdog` section)
    #[arg(long, env = "WATCHDOG_CONFIG")]
    config: Option<PathBuf>,

    /// Service unit to monitor (repeatable, overrides the file)
    #[arg(long = "monitored-service", env = "MONITORED_SERVICES", value_delimiter = ',')]
    monitored_services: Vec<String>,

    /// Seconds between periodic drive self-tests
    #[arg(long = "smart-test-interval", env = "SMART_TEST_INTERVAL")]
    smart_test_interval_secs: Option<u64>,

    /// Milliseconds between reactor iterations
    #[arg(long, env = "POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Seconds to wait before connecting to the event source
    #[arg(long = "startup-delay", env = "STARTUP_DELAY")]
    startup_delay_secs: Option<u64>,

    /// Scenario file replayed by the scripted event source
    #[arg(long, env = "WATCHDOG_SCENARIO")]
    scenario: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;

    info!("Starting Storage Node Watchdog");
    info!("  Version: {}", storage_node_watchdog::VERSION);
    info!("  Monitored services: {:?}", config.monitored_services);
    info!("  SMART test interval: {}s", config.smart_test_interval_secs);
    info!("  Poll interval: {}ms", config.poll_interval_ms);

    let source = match &args.scenario {
        Some(path) => {
            info!("  Scenario: {}", path.display());
            ScriptedEventSource::from_scenario(Scenario::from_yaml_file(path)?)
        }
        None => ScriptedEventSource::new(),
    };

    // Consumer side of the bus: log what downstream handlers would receive
    let (bus, mut messages) = ChannelBus::new(config.event_queue_capacity);
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if let Err(e) = LogBus.deliver(message) {
                error!("Bus consumer failed: {}", e);
            }
        }
    });

    let reactor = Reactor::new(config, Box::new(source), Arc::new(bus));

    let shutdown = reactor.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    reactor.run().await?;

    info!("Watchdog shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<WatchdogConfig> {
    let mut config = match &args.config {
        Some(path) => WatchdogConfig::from_yaml_file(path)?,
        None => WatchdogConfig::default(),
    };

    if !args.monitored_services.is_empty() {
        config.monitored_services = args.monitored_services.clone();
    }
    if let Some(secs) = args.smart_test_interval_secs {
        config.smart_test_interval_secs = secs;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(secs) = args.startup_delay_secs {
        config.startup_delay_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
