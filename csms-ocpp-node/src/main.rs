//! CSMS-OCPP Node - standalone OCPP-J central system
//!
//! Serves the session engine over WebSocket with in-memory storage and
//! no-op collaborators. Stations connect on `/<tenant>/<station>`.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8010)
//! csms-ocpp-node
//!
//! # Allow one registration token for tenant "demo"
//! csms-ocpp-node --tenant demo --token T0KEN --listen 127.0.0.1:9000
//!
//! # Station URL
//! ws://127.0.0.1:9000/demo/CS001?token=T0KEN
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use csms_adapter_ocpp::services::RegistrationToken;
use csms_adapter_ocpp::{
    Collaborators, EngineConfig, MemoryStorage, OcppEngine, OcppServer, ServerConfig,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP 1.5/1.6 central system node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:8010")]
    listen: SocketAddr,

    /// Heartbeat interval returned to stations (seconds)
    #[arg(long, default_value = "60")]
    heartbeat_interval: u64,

    /// Delay before smart charging is recomputed after a stop (seconds)
    #[arg(long, default_value = "3")]
    smart_charging_delay: u64,

    /// Largest accepted WebSocket message (bytes)
    #[arg(long, default_value = "65536")]
    max_message_size: usize,

    /// Tenant owning the registration tokens
    #[arg(long, default_value = "default")]
    tenant: String,

    /// Registration token accepted at BootNotification (can be repeated)
    #[arg(long)]
    token: Vec<String>,

    /// Token lifetime (days)
    #[arg(long, default_value = "30")]
    token_days: i64,

    /// Vendor whose connector 0 status notifications are ignored (can be repeated)
    #[arg(long)]
    ignore_connector_zero: Vec<String>,

    /// Accept reboots whose serial numbers differ from the stored station
    #[arg(long)]
    no_serial_check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           CSMS-OCPP Node - OCPP-J Central System             ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Listen:    {:<49} ║", args.listen);
    println!("║  Tenant:    {:<49} ║", args.tenant);
    println!("║  Tokens:    {:<49} ║", args.token.len());
    println!("║  Heartbeat: {:<49} ║", format!("{}s", args.heartbeat_interval));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut config =
        EngineConfig::default().with_heartbeat_interval(Duration::from_secs(args.heartbeat_interval));
    let smart_charging_timeout = config.smart_charging_timeout;
    config = config.with_smart_charging(
        Duration::from_secs(args.smart_charging_delay),
        smart_charging_timeout,
    );
    for vendor in &args.ignore_connector_zero {
        config = config.with_ignored_connector_zero_vendor(vendor);
    }
    if args.no_serial_check {
        config = config.without_boot_serial_check();
    }

    let storage = Arc::new(MemoryStorage::new());
    for token in &args.token {
        storage.insert_registration_token(
            &args.tenant,
            RegistrationToken {
                id: token.clone(),
                expiration_date: Utc::now() + chrono::Duration::days(args.token_days),
                revocation_date: None,
                site_area_id: None,
            },
        );
        info!("Registration token {} valid for {} days", token, args.token_days);
    }

    let engine = OcppEngine::new(config, storage, Collaborators::noop());
    let mut server_config = ServerConfig::new(args.listen);
    server_config.max_message_size = args.max_message_size;

    info!("Starting OCPP server...");
    OcppServer::new(engine, server_config).run().await?;

    Ok(())
}
