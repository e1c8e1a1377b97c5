use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use wildwatch::config::WildwatchConfig;
use wildwatch::ingest::SourceId;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WILDWATCH_CONFIG",
        "WILDWATCH_SOURCE",
        "WILDWATCH_MAX_FPS",
        "WILDWATCH_MOTION_THRESHOLD",
        "WILDWATCH_ALERT_RECIPIENTS",
        "WILDWATCH_ALERT_COOLDOWN_SECS",
        "WILDWATCH_ALERT_LOCATION",
        "WILDWATCH_MQTT_ADDR",
        "WILDWATCH_MQTT_USERNAME",
        "WILDWATCH_MQTT_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "id": "stub://meadow", "width": 320, "height": 240 },
        "pipeline": { "max_fps": 12, "retry_backoff_ms": 250, "startup_attempts": 5 },
        "motion": { "pixel_threshold": 30, "min_changed_fraction": 0.2 },
        "alert": {
            "confidence_threshold": 0.7,
            "cooldown_secs": 600,
            "default_recipients": ["ranger@park.org"],
            "location": "North trail",
            "mqtt": { "broker_addr": "mqtt://broker.local", "username": "cam" }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("WILDWATCH_CONFIG", file.path());
    std::env::set_var("WILDWATCH_ALERT_COOLDOWN_SECS", "60");
    std::env::set_var("WILDWATCH_ALERT_RECIPIENTS", "a@park.org, b@park.org");
    std::env::set_var("WILDWATCH_MQTT_PASSWORD", "s3cret");

    let cfg = WildwatchConfig::load().expect("load config");

    assert_eq!(cfg.source, Some(SourceId::Synthetic("meadow".into())));
    assert_eq!(cfg.capture.width, 320);
    assert_eq!(cfg.capture.height, 240);
    assert_eq!(cfg.capture.target_fps, 12);
    assert_eq!(cfg.pipeline.max_fps, 12);
    assert_eq!(cfg.pipeline.retry_backoff, Duration::from_millis(250));
    assert_eq!(cfg.pipeline.startup_attempts, Some(5));
    assert_eq!(cfg.motion.pixel_threshold, 30);
    assert_eq!(cfg.motion.min_changed_fraction, 0.2);
    assert_eq!(cfg.alert.confidence_threshold, 0.7);
    assert_eq!(cfg.alert.cooldown, Duration::from_secs(60));
    assert_eq!(cfg.alert.location.as_deref(), Some("North trail"));
    assert_eq!(cfg.alert.drain_timeout, Duration::from_secs(5));
    let recipients: Vec<&str> = cfg.default_recipients.iter().map(|r| r.as_str()).collect();
    assert_eq!(recipients, vec!["a@park.org", "b@park.org"]);
    let mqtt = cfg.mqtt.expect("mqtt configured");
    assert_eq!(mqtt.broker_addr, "mqtt://broker.local");
    assert_eq!(mqtt.username.as_deref(), Some("cam"));
    assert_eq!(mqtt.password.as_deref(), Some("s3cret"));

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [source]
        id = "device:2"

        [pipeline]
        motion_gating = false
        draw_motion_region = true

        [detector]
        backend = "stub"

        [health]
        sample_interval_ms = 1000
        temperature_limit_c = 70.0
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = WildwatchConfig::load_with(Some(file.path())).expect("load config");
    assert_eq!(cfg.source, Some(SourceId::Device(2)));
    assert!(!cfg.pipeline.motion_gating);
    assert!(cfg.pipeline.draw_motion_region);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.health.sample_interval, Duration::from_secs(1));
    assert_eq!(cfg.health.temperature_limit_c, 70.0);
    assert!(cfg.mqtt.is_none());

    clear_env();
}

#[test]
fn env_alone_configures_source_and_broker() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WILDWATCH_SOURCE", "webcam");
    std::env::set_var("WILDWATCH_MAX_FPS", "5");
    std::env::set_var("WILDWATCH_MQTT_ADDR", "127.0.0.1:1883");
    std::env::set_var("WILDWATCH_MQTT_USERNAME", "cam");

    let cfg = WildwatchConfig::load().expect("load config");
    assert_eq!(cfg.source, Some(SourceId::Device(0)));
    assert_eq!(cfg.pipeline.max_fps, 5);
    let mqtt = cfg.mqtt.expect("mqtt from env");
    assert_eq!(mqtt.broker_addr, "127.0.0.1:1883");
    assert_eq!(mqtt.username.as_deref(), Some("cam"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WILDWATCH_MOTION_THRESHOLD", "1.5");
    assert!(WildwatchConfig::load().is_err());
    clear_env();

    std::env::set_var("WILDWATCH_MAX_FPS", "0");
    assert!(WildwatchConfig::load().is_err());
    clear_env();

    std::env::set_var("WILDWATCH_ALERT_RECIPIENTS", "nobody");
    assert!(WildwatchConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "unknown_section": {} }"#).expect("write config");
    assert!(WildwatchConfig::load_with(Some(file.path())).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "pipeline": { "retry_backoff_ms": 0 } }"#)
        .expect("write config");
    let err = WildwatchConfig::load_with(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("retry_backoff_ms"), "{}", err);

    clear_env();
}
