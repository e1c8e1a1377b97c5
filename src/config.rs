use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{AlertSettings, Recipient};
use crate::health::{HealthSettings, DEFAULT_TEMPERATURE_LIMIT_C};
use crate::ingest::{CaptureSettings, SourceId};
use crate::motion::{MotionConfig, DEFAULT_MIN_CHANGED_FRACTION, DEFAULT_PIXEL_THRESHOLD};
use crate::pipeline::PipelineSettings;
use crate::transport::{MqttSettings, DEFAULT_CLIENT_ID, DEFAULT_TOPIC_PREFIX};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_MAX_FPS: u32 = 30;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_HISTORY_CAPACITY: usize = 20;
const DEFAULT_DETECTOR_BACKEND: &str = "motion";
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_DETECTOR_CONFIDENCE: f32 = 0.5;
const DEFAULT_ALERT_CONFIDENCE: f32 = 0.5;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_ALERT_WORKERS: usize = 1;
const DEFAULT_ALERT_QUEUE: usize = 16;
const DEFAULT_ALERT_DRAIN_MS: u64 = 5_000;
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WildwatchConfigFile {
    source: Option<SourceConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    motion: Option<MotionConfigFile>,
    detector: Option<DetectorConfigFile>,
    alert: Option<AlertConfigFile>,
    health: Option<HealthConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    id: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    max_fps: Option<u32>,
    retry_backoff_ms: Option<u64>,
    history_capacity: Option<usize>,
    motion_gating: Option<bool>,
    draw_motion_region: Option<bool>,
    startup_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    pixel_threshold: Option<u8>,
    min_changed_fraction: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    confidence_threshold: Option<f32>,
    cooldown_secs: Option<u64>,
    default_recipients: Option<Vec<String>>,
    location: Option<String>,
    include_timestamp: Option<bool>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    drain_timeout_ms: Option<u64>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    username: Option<String>,
    password: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct HealthConfigFile {
    sample_interval_ms: Option<u64>,
    temperature_limit_c: Option<f32>,
}

/// Detector backend selection and model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct WildwatchConfig {
    /// Source selected at startup. `None` starts idle.
    pub source: Option<SourceId>,
    pub capture: CaptureSettings,
    pub pipeline: PipelineSettings,
    pub motion: MotionConfig,
    pub detector: DetectorSettings,
    pub alert: AlertSettings,
    pub default_recipients: Vec<Recipient>,
    /// Alert transport. `None` means alerts are logged only.
    pub mqtt: Option<MqttSettings>,
    pub health: HealthSettings,
}

impl WildwatchConfig {
    /// Load from `WILDWATCH_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WILDWATCH_CONFIG").ok();
        let config_path = config_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(Path::new);
        Self::load_with(config_path)
    }

    /// Load an explicit file (or defaults), then apply environment overrides.
    pub fn load_with(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, without environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WildwatchConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = source_file
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| id.parse::<SourceId>())
            .transpose()
            .context("invalid source.id")?;

        let pipeline_file = file.pipeline.unwrap_or_default();
        let max_fps = pipeline_file.max_fps.unwrap_or(DEFAULT_MAX_FPS);
        let capture = CaptureSettings {
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: max_fps,
        };
        let pipeline = PipelineSettings {
            max_fps,
            retry_backoff: Duration::from_millis(
                pipeline_file
                    .retry_backoff_ms
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
            history_capacity: pipeline_file
                .history_capacity
                .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            motion_gating: pipeline_file.motion_gating.unwrap_or(true),
            draw_motion_region: pipeline_file.draw_motion_region.unwrap_or(false),
            startup_attempts: pipeline_file.startup_attempts,
        };

        let motion_file = file.motion.unwrap_or_default();
        let motion = MotionConfig {
            pixel_threshold: motion_file
                .pixel_threshold
                .unwrap_or(DEFAULT_PIXEL_THRESHOLD),
            min_changed_fraction: motion_file
                .min_changed_fraction
                .unwrap_or(DEFAULT_MIN_CHANGED_FRACTION),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            input_width: detector_file.input_width.unwrap_or(DEFAULT_DETECTOR_INPUT),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_DETECTOR_INPUT),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_DETECTOR_CONFIDENCE),
        };

        let alert_file = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            confidence_threshold: alert_file
                .confidence_threshold
                .unwrap_or(DEFAULT_ALERT_CONFIDENCE),
            cooldown: Duration::from_secs(
                alert_file
                    .cooldown_secs
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            location: alert_file.location.filter(|l| !l.trim().is_empty()),
            include_timestamp: alert_file.include_timestamp.unwrap_or(true),
            workers: alert_file.workers.unwrap_or(DEFAULT_ALERT_WORKERS),
            queue_capacity: alert_file.queue_capacity.unwrap_or(DEFAULT_ALERT_QUEUE),
            drain_timeout: Duration::from_millis(
                alert_file.drain_timeout_ms.unwrap_or(DEFAULT_ALERT_DRAIN_MS),
            ),
        };
        let default_recipients = parse_recipients(alert_file.default_recipients.unwrap_or_default())?;
        let mqtt = alert_file.mqtt.and_then(|mqtt| {
            let broker_addr = mqtt.broker_addr.filter(|a| !a.trim().is_empty())?;
            Some(MqttSettings {
                broker_addr,
                username: mqtt.username,
                password: mqtt.password,
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            })
        });

        let health_file = file.health.unwrap_or_default();
        let health = HealthSettings {
            sample_interval: Duration::from_millis(
                health_file
                    .sample_interval_ms
                    .unwrap_or(DEFAULT_HEALTH_INTERVAL_MS),
            ),
            temperature_limit_c: health_file
                .temperature_limit_c
                .unwrap_or(DEFAULT_TEMPERATURE_LIMIT_C),
        };

        Ok(Self {
            source,
            capture,
            pipeline,
            motion,
            detector,
            alert,
            default_recipients,
            mqtt,
            health,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("WILDWATCH_SOURCE") {
            self.source = Some(source.parse().context("WILDWATCH_SOURCE is not a valid source")?);
        }
        if let Some(fps) = env_value("WILDWATCH_MAX_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("WILDWATCH_MAX_FPS must be an integer"))?;
            self.pipeline.max_fps = fps;
            self.capture.target_fps = fps;
        }
        if let Some(threshold) = env_value("WILDWATCH_MOTION_THRESHOLD") {
            self.motion.min_changed_fraction = threshold
                .parse()
                .map_err(|_| anyhow!("WILDWATCH_MOTION_THRESHOLD must be a number"))?;
        }
        if let Some(recipients) = env_value("WILDWATCH_ALERT_RECIPIENTS") {
            let parsed = parse_recipients(split_csv(&recipients))?;
            if !parsed.is_empty() {
                self.default_recipients = parsed;
            }
        }
        if let Some(cooldown) = env_value("WILDWATCH_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("WILDWATCH_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }
        if let Some(location) = env_value("WILDWATCH_ALERT_LOCATION") {
            self.alert.location = Some(location);
        }
        if let Some(addr) = env_value("WILDWATCH_MQTT_ADDR") {
            match self.mqtt.as_mut() {
                Some(mqtt) => mqtt.broker_addr = addr,
                None => self.mqtt = Some(MqttSettings::new(addr)),
            }
        }
        if let Some(mqtt) = self.mqtt.as_mut() {
            if let Some(user) = env_value("WILDWATCH_MQTT_USERNAME") {
                mqtt.username = Some(user);
            }
            if let Ok(password) = std::env::var("WILDWATCH_MQTT_PASSWORD") {
                mqtt.password = Some(password);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.max_fps == 0 {
            return Err(anyhow!("pipeline.max_fps must be greater than zero"));
        }
        if self.pipeline.retry_backoff.is_zero() {
            return Err(anyhow!("pipeline.retry_backoff_ms must be greater than zero"));
        }
        if self.pipeline.history_capacity == 0 {
            return Err(anyhow!("pipeline.history_capacity must be greater than zero"));
        }
        if self.pipeline.startup_attempts == Some(0) {
            return Err(anyhow!("pipeline.startup_attempts must be greater than zero when set"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("source.width and source.height must be greater than zero"));
        }
        check_fraction("motion.min_changed_fraction", self.motion.min_changed_fraction)?;
        check_fraction("detector.confidence_threshold", self.detector.confidence_threshold)?;
        check_fraction("alert.confidence_threshold", self.alert.confidence_threshold)?;
        if self.detector.backend.trim().is_empty() {
            return Err(anyhow!("detector.backend must not be empty"));
        }
        if self.alert.workers == 0 {
            return Err(anyhow!("alert.workers must be greater than zero"));
        }
        if self.alert.queue_capacity == 0 {
            return Err(anyhow!("alert.queue_capacity must be greater than zero"));
        }
        if self.health.sample_interval.is_zero() {
            return Err(anyhow!("health.sample_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WildwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn check_fraction(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn parse_recipients(raw: Vec<String>) -> Result<Vec<Recipient>> {
    raw.iter()
        .map(|entry| Recipient::parse(entry).map_err(anyhow::Error::from))
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = WildwatchConfig::from_file(WildwatchConfigFile::default()).unwrap();
        assert!(cfg.source.is_none());
        assert_eq!(cfg.pipeline.max_fps, 30);
        assert_eq!(cfg.pipeline.retry_backoff, Duration::from_secs(1));
        assert_eq!(cfg.pipeline.history_capacity, 20);
        assert!(cfg.pipeline.motion_gating);
        assert_eq!(cfg.motion, MotionConfig::default());
        assert_eq!(cfg.detector.backend, "motion");
        assert_eq!(cfg.alert.cooldown, Duration::from_secs(300));
        assert_eq!(cfg.alert.confidence_threshold, 0.5);
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.health.temperature_limit_c, 80.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn csv_split_trims_and_skips_empty() {
        assert_eq!(split_csv(" a@b.co, ,c@d.io,"), vec!["a@b.co", "c@d.io"]);
    }

    #[test]
    fn invalid_recipients_are_rejected() {
        assert!(parse_recipients(vec!["not-an-address".into()]).is_err());
    }
}
