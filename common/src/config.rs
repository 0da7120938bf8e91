use serde::{Deserialize, Serialize};

use crate::command::Position;

pub const DEFAULT_DEVICE_ID: &str = "vaso_01";
pub const DEFAULT_BACKEND_URL: &str = "https://spouty.onrender.com";
pub const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1";
pub const DEFAULT_PROVISIONING_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_INITIAL_SYNC_MS: u64 = 1_500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub device_id: String,
    pub backend_url: String,
    #[serde(default)]
    pub backend_timeout_ms: Option<u64>,
    pub device_url: String,
    pub provisioning_timeout_ms: u64,
    pub initial_sync_ms: u64,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub location: Option<Position>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_timeout_ms: None,
            device_url: DEFAULT_DEVICE_URL.to_string(),
            provisioning_timeout_ms: DEFAULT_PROVISIONING_TIMEOUT_MS,
            initial_sync_ms: DEFAULT_INITIAL_SYNC_MS,
            mqtt: MqttConfig::default(),
            location: None,
        }
    }
}

impl AppConfig {
    /// Layers environment-style overrides on top of the current values.
    /// Unparseable numbers are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("SPOUTY_DEVICE_ID") {
            self.device_id = id;
        }
        if let Some(url) = lookup("SPOUTY_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(ms) = lookup("SPOUTY_BACKEND_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.backend_timeout_ms = Some(ms);
        }
        if let Some(url) = lookup("SPOUTY_DEVICE_URL") {
            self.device_url = url;
        }
        if let Some(ms) = lookup("SPOUTY_PROVISIONING_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.provisioning_timeout_ms = ms;
        }
        if let Some(ms) = lookup("SPOUTY_INITIAL_SYNC_MS").and_then(|v| v.parse().ok()) {
            self.initial_sync_ms = ms;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|v| v.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt.user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.mqtt.pass = pass;
        }

        let lat = lookup("SPOUTY_LAT").and_then(|v| v.parse::<f64>().ok());
        let lon = lookup("SPOUTY_LON").and_then(|v| v.parse::<f64>().ok());
        if let (Some(lat), Some(lon)) = (lat, lon) {
            self.location = Some(Position { lat, lon });
        }
    }

    pub fn sanitize(&mut self) {
        self.device_id = self.device_id.trim().to_string();
        if self.device_id.is_empty() {
            self.device_id = DEFAULT_DEVICE_ID.to_string();
        }

        self.backend_url = trim_url(&self.backend_url, DEFAULT_BACKEND_URL);
        self.device_url = trim_url(&self.device_url, DEFAULT_DEVICE_URL);

        self.backend_timeout_ms = self
            .backend_timeout_ms
            .filter(|ms| *ms > 0)
            .map(|ms| ms.clamp(500, 120_000));
        self.provisioning_timeout_ms = self.provisioning_timeout_ms.clamp(100, 60_000);
        self.initial_sync_ms = self.initial_sync_ms.clamp(100, 30_000);

        if self.mqtt.port == 0 {
            self.mqtt.port = MqttConfig::default().port;
        }
        if self.location.is_some_and(|position| !position.is_valid()) {
            self.location = None;
        }
    }
}

fn trim_url(url: &str, fallback: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
