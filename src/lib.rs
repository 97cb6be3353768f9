pub mod channels;      // Inter-component communication channels
pub mod config;        // Options file, overrides and validation
pub mod easun;         // QPIGS framing, parsing and HID transport
pub mod error;         // Transport error taxonomy
pub mod mqtt;          // MQTT client and message building
pub mod options;       // Command line options parsing
pub mod poller;        // The poll loop
pub mod prelude;       // Common imports and types

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::easun::transport::HidConnector;
use crate::mqtt::Mqtt;
use crate::poller::{PollStats, Poller};

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Initialise env_logger. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

/// Load configuration and start logging at the configured level. A bad
/// configuration is the one fatal error: it is logged and the process exits
/// with status 255.
pub fn setup(options: &Options) -> ConfigWrapper {
    let config = match Config::load(options) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            error!("Failed to load config {}: {:?}", options.config_file, err);
            std::process::exit(255);
        }
    };

    init_logging(&config.loglevel);

    info!("easun-bridge {} starting", CARGO_PKG_VERSION);
    if !std::path::Path::new(&options.config_file).exists() {
        warn!("no options file at {}, using defaults", options.config_file);
    } else {
        info!("read options from {}", options.config_file);
    }
    config.log_summary();

    ConfigWrapper::from_config(config)
}

/// Run the bridge until `shutdown_rx` fires: MQTT client task plus the poll
/// loop on the HID devices.
pub async fn app(shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    let channels = Channels::new();
    let stats = Arc::new(Mutex::new(PollStats::default()));

    info!("  Creating MQTT client...");
    let mqtt = Mqtt::new(config.clone(), channels.clone(), stats.clone());
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    info!("  Creating Poller...");
    let mut poller = Poller::new(config, channels.clone(), Arc::new(HidConnector), stats.clone());
    let result = poller.run(shutdown_rx).await;
    drop(poller);

    info!("Stopping MQTT client...");
    let _ = channels.to_mqtt.send(mqtt::ChannelData::Shutdown);
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for MQTT task: {}", e);
    }

    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }

    info!("Application shutdown complete");
    result
}
