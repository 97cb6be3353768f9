use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds, NoneAsEmptyString};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "/dev/hidraw0";

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub mqtt_user: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default = "Config::default_enabled")]
    pub mqtt_enabled: bool,
    #[serde(default = "Config::default_mqtt_namespace")]
    pub mqtt_namespace: String,

    /// Device used by inverters that don't name their own.
    #[serde(default = "Config::default_device")]
    pub device: String,

    #[serde(default = "Vec::new")]
    pub inverters: Vec<Inverter>,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "Config::default_settle_delay", rename = "settle_delay_ms")]
    pub settle_delay: Duration,

    #[serde(default = "Config::default_read_size")]
    pub read_size: usize,

    #[serde(default)]
    pub publish_mode: PublishMode,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// PublishMode {{{
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// One message per field, `<prefix>/<field>`.
    #[default]
    Fields,
    /// One JSON object per poll on `<prefix>/telemetry`.
    Record,
    Both,
}

impl PublishMode {
    pub fn fields(&self) -> bool {
        matches!(self, Self::Fields | Self::Both)
    }

    pub fn record(&self) -> bool {
        matches!(self, Self::Record | Self::Both)
    }
}

impl std::fmt::Display for PublishMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fields => "fields",
            Self::Record => "record",
            Self::Both => "both",
        };
        write!(f, "{}", s)
    }
} // }}}

// Inverter {{{
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_inverter_name")]
    pub name: String,

    pub device: Option<String>,
    pub mqtt_prefix: Option<String>,
}

impl Inverter {
    pub fn new(name: &str, device: &str, mqtt_prefix: &str) -> Self {
        Self {
            enabled: true,
            name: name.to_owned(),
            device: Some(device.to_owned()),
            mqtt_prefix: Some(mqtt_prefix.to_owned()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    pub fn mqtt_prefix(&self) -> String {
        self.mqtt_prefix
            .clone()
            .unwrap_or_else(|| format!("easun/{}", self.name))
    }
} // }}}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: Self::default_mqtt_host(),
            mqtt_port: Self::default_mqtt_port(),
            mqtt_user: None,
            mqtt_password: None,
            mqtt_enabled: Self::default_enabled(),
            mqtt_namespace: Self::default_mqtt_namespace(),
            device: Self::default_device(),
            inverters: Vec::new(),
            poll_interval: Self::default_poll_interval(),
            settle_delay: Self::default_settle_delay(),
            read_size: Self::default_read_size(),
            publish_mode: PublishMode::default(),
            loglevel: Self::default_loglevel(),
        }
    }
}

impl Config {
    /// Parse an options file. `.yaml`/`.yml` is read as YAML, anything else
    /// as JSON.
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let is_yaml = Path::new(file)
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);

        let config: Self = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        Ok(config)
    }

    /// Options file (or defaults when it doesn't exist) plus command line /
    /// environment overrides, defaulted and validated.
    pub fn load(options: &Options) -> Result<Self> {
        let mut config = if Path::new(&options.config_file).exists() {
            Self::new(&options.config_file)?
        } else {
            Self::default()
        };

        config.apply_options(options);
        config.finalize()?;

        Ok(config)
    }

    pub fn apply_options(&mut self, options: &Options) {
        if let Some(host) = &options.mqtt_host {
            self.mqtt_host = host.clone();
        }
        if let Some(port) = options.mqtt_port {
            self.mqtt_port = port;
        }
        if let Some(user) = &options.mqtt_user {
            self.mqtt_user = Some(user.clone()).filter(|u| !u.is_empty());
        }
        if let Some(password) = &options.mqtt_password {
            self.mqtt_password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if let Some(device) = &options.device {
            self.device = device.clone();
        }
    }

    /// Fill in the implicit single inverter, resolve per-inverter devices
    /// from the global default, then validate.
    pub fn finalize(&mut self) -> Result<()> {
        if self.inverters.is_empty() {
            self.inverters = vec![Inverter::new("easun1", &self.device, "easun/1")];
        }

        for inverter in &mut self.inverters {
            if inverter.device.is_none() {
                inverter.device = Some(self.device.clone());
            }
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt_enabled {
            if self.mqtt_port == 0 {
                bail!("mqtt_port must be between 1 and 65535");
            }
            if self.mqtt_host.is_empty() {
                bail!("mqtt_host cannot be empty");
            }
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be at least 1 second");
        }
        if self.read_size == 0 {
            bail!("read_size must be greater than 0");
        }

        for (i, inv) in self.inverters.iter().enumerate() {
            if inv.name.is_empty() {
                bail!("inverters[{}].name cannot be empty", i);
            }
            if inv.device().is_empty() {
                bail!("inverters[{}].device cannot be empty", i);
            }
            if inv.mqtt_prefix().is_empty() {
                bail!("inverters[{}].mqtt_prefix cannot be empty", i);
            }
        }

        Ok(())
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!(
            "  Inverters: {} configured, {} enabled",
            self.inverters.len(),
            self.inverters.iter().filter(|i| i.enabled).count()
        );
        for (i, inv) in self.inverters.iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Name: {}", inv.name());
            info!("      Enabled: {}", inv.enabled());
            info!("      Device: {}", inv.device());
            info!("      MQTT Prefix: {}", inv.mqtt_prefix());
        }

        info!("  MQTT: {}", if self.mqtt_enabled { "enabled" } else { "disabled" });
        if self.mqtt_enabled {
            info!("    Host: {}", self.mqtt_host);
            info!("    Port: {}", self.mqtt_port);
            info!("    User: {}", self.mqtt_user.as_deref().unwrap_or("<none>"));
            info!("    Namespace: {}", self.mqtt_namespace);
        }

        info!("  Poll Interval: {}s", self.poll_interval.as_secs());
        info!("  Settle Delay: {}ms", self.settle_delay.as_millis());
        info!("  Read Size: {} bytes", self.read_size);
        info!("  Publish Mode: {}", self.publish_mode);
        info!("  Log Level: {}", self.loglevel);
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "easun".to_string()
    }

    fn default_device() -> String {
        DEFAULT_DEVICE.to_string()
    }

    fn default_inverter_name() -> String {
        "easun".to_string()
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(10)
    }

    fn default_settle_delay() -> Duration {
        Duration::from_millis(400)
    }

    fn default_read_size() -> usize {
        128
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

/// Shared, read-only view of the loaded configuration.
#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn inverters(&self) -> Vec<Inverter> {
        self.config.inverters.clone()
    }

    pub fn enabled_inverters(&self) -> Vec<Inverter> {
        self.inverters().into_iter().filter(|i| i.enabled()).collect()
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.config.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.config.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.config.mqtt_port
    }

    pub fn mqtt_user(&self) -> Option<&str> {
        self.config.mqtt_user.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.config.mqtt_password.as_deref()
    }

    pub fn mqtt_namespace(&self) -> &str {
        &self.config.mqtt_namespace
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn settle_delay(&self) -> Duration {
        self.config.settle_delay
    }

    pub fn read_size(&self) -> usize {
        self.config.read_size
    }

    pub fn publish_mode(&self) -> PublishMode {
        self.config.publish_mode
    }
}
