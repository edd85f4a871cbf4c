use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::DEFAULT_EVICTION_FACTOR;
use crate::canon::AliasTable;
use crate::identity::DEFAULT_MATCH_THRESHOLD;
use crate::ownership::OwnershipPolicy;
use crate::pipeline::{DividerSetting, ZoneRules};
use crate::transport::mqtt::{MqttSettings, DEFAULT_TOPIC_PREFIX};
use crate::zone::{Divider, Zone, ZoneRequirements};

const DEFAULT_DB_PATH: &str = "ppe_violations.db";
const DEFAULT_SNAPSHOT_DIR: &str = "media/incidents";
const DEFAULT_NOTIFICATION_LOG: &str = "log/notifications.txt";
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 30;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 180;
const MAX_ALERT_COOLDOWN_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_DIVIDER: [f64; 4] = [810.0, 1080.0, 945.0, 500.0];
const DEFAULT_LEFT_REQUIRED: &[&str] = &["helmet", "shoes", "goggles"];
const DEFAULT_RIGHT_REQUIRED: &[&str] = &["pvc_suit", "helmet"];
const DEFAULT_STREAM_WIDTH: u32 = 1920;
const DEFAULT_STREAM_HEIGHT: u32 = 1080;
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_MQTT_CLIENT_ID: &str = "ppe-watchd";

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    db_path: Option<String>,
    snapshot_dir: Option<PathBuf>,
    notification_log: Option<PathBuf>,
    gallery_path: Option<PathBuf>,
    zones: Option<ZonesConfigFile>,
    identity: Option<IdentityConfigFile>,
    alerts: Option<AlertsConfigFile>,
    aliases: Option<BTreeMap<String, Vec<String>>>,
    streams: Option<Vec<StreamConfigFile>>,
    mqtt: Option<MqttConfigFile>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ZonesConfigFile {
    divider: Option<[f64; 4]>,
    dynamic_midline: Option<bool>,
    left: Option<Vec<String>>,
    right: Option<Vec<String>>,
    ownership: Option<OwnershipPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct IdentityConfigFile {
    match_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_secs: Option<u64>,
    eviction_factor: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamConfigFile {
    id: String,
    detections_path: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    topic_prefix: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    pub snapshot_dir: PathBuf,
    pub notification_log: Option<PathBuf>,
    pub gallery_path: Option<PathBuf>,
    pub zones: ZoneSettings,
    pub match_threshold: f32,
    pub alert_cooldown: Duration,
    pub eviction_factor: u32,
    /// Custom `canonical -> [synonyms]` table replacing the built-in vocabulary.
    pub aliases: Option<BTreeMap<String, Vec<String>>>,
    pub streams: Vec<StreamSettings>,
    pub mqtt: Option<MqttSettings>,
    pub retention: Duration,
}

#[derive(Debug, Clone)]
pub struct ZoneSettings {
    pub divider: DividerSetting,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub ownership: OwnershipPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub id: String,
    /// JSON Lines detector replay for this camera.
    pub detections_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Result<Self> {
        let zones_file = file.zones.unwrap_or_default();
        let divider = if zones_file.dynamic_midline.unwrap_or(false) {
            DividerSetting::DynamicMidline
        } else {
            let [x1, y1, x2, y2] = zones_file.divider.unwrap_or(DEFAULT_DIVIDER);
            DividerSetting::Fixed(Divider::new(x1, y1, x2, y2))
        };
        let zones = ZoneSettings {
            divider,
            left: zones_file
                .left
                .unwrap_or_else(|| to_strings(DEFAULT_LEFT_REQUIRED)),
            right: zones_file
                .right
                .unwrap_or_else(|| to_strings(DEFAULT_RIGHT_REQUIRED)),
            ownership: zones_file.ownership.unwrap_or_default(),
        };

        let streams = file
            .streams
            .unwrap_or_default()
            .into_iter()
            .map(|stream| StreamSettings {
                id: stream.id,
                detections_path: stream.detections_path,
                width: stream.width.unwrap_or(DEFAULT_STREAM_WIDTH),
                height: stream.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
                target_fps: stream.target_fps.unwrap_or(DEFAULT_STREAM_FPS),
            })
            .collect();

        let mqtt = file.mqtt.and_then(|mqtt| {
            let broker = mqtt.broker?;
            Some(MqttSettings {
                broker,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
                username: mqtt.username,
                password: mqtt.password,
            })
        });

        let alerts = file.alerts.unwrap_or_default();

        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            snapshot_dir: file
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            notification_log: Some(
                file.notification_log
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_NOTIFICATION_LOG)),
            ),
            gallery_path: file.gallery_path,
            zones,
            match_threshold: file
                .identity
                .and_then(|identity| identity.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            alert_cooldown: Duration::from_secs(
                alerts.cooldown_secs.unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            eviction_factor: alerts.eviction_factor.unwrap_or(DEFAULT_EVICTION_FACTOR),
            aliases: file.aliases,
            streams,
            mqtt,
            retention: Duration::from_secs(
                file.retention
                    .and_then(|retention| retention.seconds)
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PPE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("PPE_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("PPE_GALLERY_PATH") {
            if !path.trim().is_empty() {
                self.gallery_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("PPE_NOTIFICATION_LOG") {
            if path.trim().is_empty() {
                self.notification_log = None;
            } else {
                self.notification_log = Some(PathBuf::from(path));
            }
        }
        if let Ok(cooldown) = std::env::var("PPE_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("PPE_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert_cooldown = Duration::from_secs(seconds);
        }
        if let Ok(threshold) = std::env::var("PPE_MATCH_THRESHOLD") {
            self.match_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("PPE_MATCH_THRESHOLD must be a number"))?;
        }
        if let Ok(divider) = std::env::var("PPE_DIVIDER") {
            if !divider.trim().is_empty() {
                self.zones.divider = DividerSetting::Fixed(parse_divider(&divider)?);
            }
        }
        if let Ok(flag) = std::env::var("PPE_DYNAMIC_MIDLINE") {
            if parse_flag(&flag) {
                self.zones.divider = DividerSetting::DynamicMidline;
            }
        }
        if let Ok(broker) = std::env::var("PPE_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker = broker,
                    None => {
                        self.mqtt = Some(MqttSettings {
                            broker,
                            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
                            username: None,
                            password: None,
                        })
                    }
                }
            }
        }
        if let Ok(retention) = std::env::var("PPE_RETENTION_SECS") {
            let seconds: u64 = retention.trim().parse().map_err(|_| {
                anyhow!("PPE_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.alert_cooldown.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        if self.alert_cooldown.as_secs() > MAX_ALERT_COOLDOWN_SECS {
            return Err(anyhow!(
                "alert cooldown must be at most {} seconds",
                MAX_ALERT_COOLDOWN_SECS
            ));
        }
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(anyhow!("match threshold must be a positive number"));
        }
        if self.eviction_factor == 0 {
            return Err(anyhow!("alert eviction factor must be at least 1"));
        }
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }

        let mut seen = BTreeSet::new();
        for stream in &self.streams {
            crate::validate_stream_id(&stream.id)?;
            if !seen.insert(stream.id.as_str()) {
                return Err(anyhow!("stream id '{}' is listed twice", stream.id));
            }
            if stream.width == 0 || stream.height == 0 {
                return Err(anyhow!("stream '{}' has zero frame dimensions", stream.id));
            }
        }

        // Surfaces alias conflicts, bad requirements and degenerate dividers at load time.
        self.rules()?;
        Ok(())
    }

    /// Build the shared zone rules from this configuration.
    pub fn rules(&self) -> Result<ZoneRules> {
        let aliases = match &self.aliases {
            Some(map) => AliasTable::from_map(map)?,
            None => AliasTable::default(),
        };
        if let DividerSetting::Fixed(divider) = &self.zones.divider {
            divider.validate()?;
        }
        let mut required = BTreeMap::new();
        required.insert(Zone::Left, self.zones.left.clone());
        required.insert(Zone::Right, self.zones.right.clone());
        let requirements = ZoneRequirements::from_config(&required, &aliases)?;

        Ok(ZoneRules {
            aliases,
            divider: self.zones.divider,
            requirements,
            ownership: self.zones.ownership,
            match_threshold: self.match_threshold,
            alert_cooldown: self.alert_cooldown,
        })
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// `x1,y1,x2,y2`
fn parse_divider(value: &str) -> Result<Divider> {
    let coords = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| anyhow!("PPE_DIVIDER must be four numbers: x1,y1,x2,y2"))?;
    let &[x1, y1, x2, y2] = coords.as_slice() else {
        return Err(anyhow!("PPE_DIVIDER must be four numbers: x1,y1,x2,y2"));
    };
    Ok(Divider::new(x1, y1, x2, y2))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
