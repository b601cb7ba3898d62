/**
 * CONFIG - Chargement de la configuration kernel (YAML)
 *
 * RÔLE : smartfarm.yaml (ou $SMARTFARM_CONFIG) → KernelConfig. Fichier absent
 * ou vide → valeurs par défaut ; fichier invalide → erreur loggée puis défauts.
 *
 * EXEMPLE :
 * ```yaml
 * device:
 *   id: farm-01
 *   location: { lat: 45.76, lng: 4.84, name: "Serre nord" }
 *   utc_offset_hours: 2
 * mqtt:
 *   host: broker.example.org
 *   port: 8883
 *   tls: { ca_path: certs/ca.pem, cert_path: certs/dev.crt, key_path: certs/dev.key }
 * nodes: { NODE1: garden, NODE2: security }
 * alerts:
 *   cooldowns: { OPTIMAL_CONDITIONS: 600 }
 * actuator: { device_path: /dev/ttyACM0 }
 * journal: { path: data/journal.jsonl }
 * ```
 */

use crate::alerts::{AlertSettings, AlertType, DEFAULT_OPTIMAL_COOLDOWN_SECS};
use crate::gate::SiteLocation;
use crate::models::NodeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub device: DeviceConf,
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub nodes: HashMap<String, NodeKind>,
    pub alerts: AlertsConf,
    pub automation: AutomationConf,
    pub actuator: ActuatorConf,
    pub weather: Option<WeatherConf>,
    pub journal: Option<JournalConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConf {
    pub id: String,
    pub location: LocationConf,
    pub utc_offset_hours: i8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConf {
    pub lat: f64,
    pub lng: f64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub topic_prefix: String,
    pub tls: Option<TlsConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConf {
    pub ca_path: PathBuf,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConf {
    /// Cooldown en secondes par type d'alerte
    pub cooldowns: HashMap<AlertType, u64>,
    pub perimeter_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConf {
    pub auto_irrigation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ActuatorConf {
    pub device_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConf {
    pub api_key: Option<String>,
    pub refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConf {
    pub path: PathBuf,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            device: DeviceConf::default(),
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
            nodes: HashMap::from([
                ("NODE1".to_string(), NodeKind::Garden),
                ("NODE2".to_string(), NodeKind::Security),
            ]),
            alerts: AlertsConf::default(),
            automation: AutomationConf::default(),
            actuator: ActuatorConf::default(),
            weather: None,
            journal: None,
        }
    }
}

impl Default for DeviceConf {
    fn default() -> Self {
        Self {
            id: "SmartFarmDevice".into(),
            location: LocationConf::default(),
            utc_offset_hours: 0,
        }
    }
}

impl Default for LocationConf {
    fn default() -> Self {
        Self { lat: 0.0, lng: 0.0, name: None }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".into(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            topic_prefix: "smartfarm".into(),
            tls: None,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for AlertsConf {
    fn default() -> Self {
        Self {
            cooldowns: HashMap::from([(AlertType::OptimalConditions, DEFAULT_OPTIMAL_COOLDOWN_SECS as u64)]),
            perimeter_label: "Farm perimeter".into(),
        }
    }
}

impl Default for AutomationConf {
    fn default() -> Self {
        Self { auto_irrigation: true }
    }
}

impl Default for WeatherConf {
    fn default() -> Self {
        Self { api_key: None, refresh_secs: 600 }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.id.trim().is_empty() {
            return Err(ConfigError::Invalid("device.id must not be empty".into()));
        }
        if self.mqtt.enabled && self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must not be 0".into()));
        }
        if !(-12..=14).contains(&self.device.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "device.utc_offset_hours {} outside -12..=14",
                self.device.utc_offset_hours
            )));
        }
        if let Some((alert, secs)) = self.alerts.cooldowns.iter().find(|(_, s)| i64::try_from(**s).is_err()) {
            return Err(ConfigError::Invalid(format!("alerts.cooldowns.{alert}: {secs}s out of range")));
        }
        if self.mqtt.topic_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.topic_prefix must not be empty".into()));
        }
        if let Some(w) = &self.weather {
            if w.refresh_secs == 0 {
                return Err(ConfigError::Invalid("weather.refresh_secs must not be 0".into()));
            }
        }
        Ok(())
    }

    pub fn node_kind(&self, node_id: &str) -> NodeKind {
        self.nodes.get(node_id).copied().unwrap_or_default()
    }

    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("smartfarm-{}", self.device.id))
    }

    pub fn site_location(&self) -> SiteLocation {
        SiteLocation {
            lat: self.device.location.lat,
            lng: self.device.location.lng,
            name: self.device.location.name.clone(),
        }
    }

    /// Clé OpenWeather : config d'abord, puis $OPENWEATHER_API_KEY
    pub fn weather_api_key(&self) -> Option<String> {
        self.weather
            .as_ref()
            .and_then(|w| w.api_key.clone())
            .or_else(|| std::env::var("OPENWEATHER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn weather_refresh_secs(&self) -> u64 {
        self.weather.as_ref().map(|w| w.refresh_secs).unwrap_or(600)
    }

    pub fn alert_settings(&self) -> AlertSettings {
        let mut cooldowns = AlertSettings::default().cooldowns;
        for (alert, secs) in &self.alerts.cooldowns {
            let secs = i64::try_from(*secs).unwrap_or(i64::MAX);
            cooldowns.insert(*alert, time::Duration::seconds(secs));
        }
        AlertSettings {
            cooldowns,
            node_kinds: self.nodes.clone(),
            perimeter_label: self.alerts.perimeter_label.clone(),
            auto_irrigation: self.automation.auto_irrigation,
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(txt)?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn read_config(path: &Path) -> Result<KernelConfig, ConfigError> {
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("SMARTFARM_CONFIG").unwrap_or_else(|_| "smartfarm.yaml".into());
    let path = Path::new(&path);
    if !path.exists() {
        info!("no {:?}, using default config", path);
        return KernelConfig::default();
    }
    match read_config(path).await {
        Ok(cfg) => {
            info!("config loaded from {:?}", path);
            cfg
        }
        Err(e) => {
            warn!("config rejected: {}", e);
            KernelConfig::default()
        }
    }
}
