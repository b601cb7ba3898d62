/**
 * MÉTÉO - Contexte OpenWeatherMap pour enrichir la télémétrie
 *
 * RÔLE : Une tâche de fond rafraîchit un rapport en cache ; `lookup` ne lit
 * que ce cache, le gate n'attend jamais le réseau. Pas de clé, pas de client.
 */

use crate::ports::WeatherContext;
use crate::state::{new_state, Shared};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature: f64,
    pub humidity: f64,
    pub description: String,
    pub pressure: f64,
    pub wind_speed: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Payload(String),
}

#[derive(Deserialize)]
struct OwmResponse {
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    #[serde(default)]
    wind: Option<OwmWind>,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Deserialize)]
struct OwmCondition {
    description: String,
}

#[derive(Deserialize)]
struct OwmWind {
    #[serde(default)]
    speed: f64,
}

impl From<OwmResponse> for WeatherReport {
    fn from(r: OwmResponse) -> Self {
        Self {
            temperature: r.main.temp,
            humidity: r.main.humidity,
            description: r.weather.into_iter().next().map(|w| w.description).unwrap_or_default(),
            pressure: r.main.pressure,
            wind_speed: r.wind.map(|w| w.speed).unwrap_or(0.0),
        }
    }
}

pub fn parse_report(body: &str) -> Result<WeatherReport, WeatherError> {
    serde_json::from_str::<OwmResponse>(body)
        .map(WeatherReport::from)
        .map_err(|e| WeatherError::Payload(e.to_string()))
}

#[derive(Clone)]
pub struct OpenWeatherClient {
    http: reqwest::Client,
    api_key: String,
    lat: f64,
    lng: f64,
    cache: Shared<Option<WeatherReport>>,
}

impl OpenWeatherClient {
    pub fn new(api_key: impl Into<String>, lat: f64, lng: f64) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            lat,
            lng,
            cache: new_state(None),
        })
    }

    pub async fn fetch(&self) -> Result<WeatherReport, WeatherError> {
        let resp = self
            .http
            .get(OPENWEATHER_URL)
            .query(&[
                ("lat", self.lat.to_string()),
                ("lon", self.lng.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(WeatherError::Payload(format!("status {status}")));
        }
        let body = resp.text().await?;
        parse_report(&body)
    }

    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(report) => {
                debug!("weather refreshed: {} {:.1}°C", report.description, report.temperature);
                *self.cache.lock() = Some(report);
            }
            // on garde la dernière valeur connue
            Err(e) => warn!("weather refresh failed: {}", e),
        }
    }

    pub fn spawn_refresher(&self, every: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                client.refresh().await;
            }
        })
    }

    pub fn cached(&self) -> Option<WeatherReport> {
        self.cache.lock().clone()
    }
}

impl WeatherContext for OpenWeatherClient {
    fn lookup(&self, _lat: f64, _lng: f64) -> Option<WeatherReport> {
        // le client est lié aux coordonnées du site
        self.cached()
    }
}
