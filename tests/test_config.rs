mod common;
use common::*;
use easun_bridge::config::{PublishMode, DEFAULT_DEVICE};
use std::io::Write;
use std::time::Duration;

fn options_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn options(file: &str) -> Options {
    Options {
        config_file: file.to_string(),
        ..Options::default()
    }
}

#[test]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("options.json");

    let config = Config::load(&options(path.to_str().unwrap())).unwrap();

    assert_eq!(config.mqtt_host, "localhost");
    assert_eq!(config.mqtt_port, 1883);
    assert_eq!(config.mqtt_user, None);
    assert_eq!(config.poll_interval, Duration::from_secs(10));
    assert_eq!(config.settle_delay, Duration::from_millis(400));
    assert_eq!(config.read_size, 128);
    assert_eq!(config.publish_mode, PublishMode::Fields);
    assert_eq!(
        config.inverters,
        vec![config::Inverter::new("easun1", DEFAULT_DEVICE, "easun/1")]
    );
}

#[test]
fn reads_addon_options() {
    let file = options_file(
        ".json",
        r#"{
            "mqtt_host": "core-mosquitto",
            "mqtt_port": 1884,
            "mqtt_user": "",
            "mqtt_password": "",
            "inverters": [
                {"name": "garage", "device": "/dev/hidraw1", "mqtt_prefix": "solar/garage"},
                {"name": "shed"}
            ]
        }"#,
    );

    let config = Config::load(&options(file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.mqtt_host, "core-mosquitto");
    assert_eq!(config.mqtt_port, 1884);
    assert_eq!(config.mqtt_user, None);
    assert_eq!(config.mqtt_password, None);

    assert_eq!(config.inverters.len(), 2);
    assert_eq!(config.inverters[0].device(), "/dev/hidraw1");
    assert_eq!(config.inverters[0].mqtt_prefix(), "solar/garage");
    assert_eq!(config.inverters[1].device(), DEFAULT_DEVICE);
    assert_eq!(config.inverters[1].mqtt_prefix(), "easun/shed");
}

#[test]
fn reads_yaml_and_timing() {
    let file = options_file(
        ".yaml",
        "mqtt_user: bob\nmqtt_password: secret\ndevice: /dev/hidraw3\npoll_interval: 30\nsettle_delay_ms: 300\nread_size: 64\npublish_mode: both\n",
    );

    let config = Config::load(&options(file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.mqtt_user.as_deref(), Some("bob"));
    assert_eq!(config.mqtt_password.as_deref(), Some("secret"));
    assert_eq!(config.poll_interval, Duration::from_secs(30));
    assert_eq!(config.settle_delay, Duration::from_millis(300));
    assert_eq!(config.read_size, 64);
    assert_eq!(config.publish_mode, PublishMode::Both);
    assert_eq!(config.inverters[0].device(), "/dev/hidraw3");
}

#[test]
fn options_override_file() {
    let file = options_file(".json", r#"{"mqtt_host": "broker", "device": "/dev/hidraw5"}"#);

    let options = Options {
        config_file: file.path().to_str().unwrap().to_string(),
        mqtt_host: Some("override".to_string()),
        mqtt_port: Some(8883),
        device: Some("/dev/hidraw9".to_string()),
        ..Options::default()
    };

    let config = Config::load(&options).unwrap();

    assert_eq!(config.mqtt_host, "override");
    assert_eq!(config.mqtt_port, 8883);
    assert_eq!(config.inverters[0].device(), "/dev/hidraw9");
}

#[test]
fn invalid_values_are_rejected() {
    let file = options_file(".json", r#"{"read_size": 0}"#);
    assert!(Config::load(&options(file.path().to_str().unwrap())).is_err());

    let file = options_file(".json", r#"{"mqtt_port": 0}"#);
    assert!(Config::load(&options(file.path().to_str().unwrap())).is_err());

    let file = options_file(".json", r#"{"poll_interval": 0}"#);
    assert!(Config::load(&options(file.path().to_str().unwrap())).is_err());

    let file = options_file(".json", r#"{"publish_mode": "sometimes"}"#);
    assert!(Config::load(&options(file.path().to_str().unwrap())).is_err());

    let file = options_file(".json", "{ not json");
    assert!(Config::load(&options(file.path().to_str().unwrap())).is_err());
}

#[test]
fn disabled_broker_skips_broker_checks() {
    let file = options_file(".json", r#"{"mqtt_enabled": false, "mqtt_host": ""}"#);
    assert!(Config::load(&options(file.path().to_str().unwrap())).is_ok());
}

#[test]
fn wrapper_filters_disabled_inverters() {
    let mut disabled = Factory::inverter(2);
    disabled.enabled = false;

    let config = Factory::config_wrapper(vec![Factory::inverter(1), disabled]);

    assert_eq!(config.inverters().len(), 2);
    assert_eq!(config.enabled_inverters(), vec![Factory::inverter(1)]);
}
