use clap::Parser;

/// Easun Bridge - republishes Easun/Voltronic inverter status to MQTT
#[derive(Debug, Default, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Options file to read (JSON, or YAML by extension)
    #[clap(
        short = 'c',
        long = "config",
        env = "EASUN_CONFIG",
        default_value = "/data/options.json"
    )]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// MQTT broker host, overrides the options file
    #[clap(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port, overrides the options file
    #[clap(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    #[clap(long, env = "MQTT_USER")]
    pub mqtt_user: Option<String>,

    #[clap(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Default HID device for inverters that don't name one
    #[clap(long, env = "EASUN_DEVICE")]
    pub device: Option<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
