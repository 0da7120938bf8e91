use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::status::StatusKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedState {
    On,
    #[default]
    Off,
}

impl LedState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Facil,
    Medio,
    Dificil,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Facil => "FACIL",
            Self::Medio => "MEDIO",
            Self::Dificil => "DIFICIL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "FACIL" => Some(Self::Facil),
            "MEDIO" => Some(Self::Medio),
            "DIFICIL" => Some(Self::Dificil),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Facil => "Fácil (Cacto, Suculenta)",
            Self::Medio => "Médio (Jiboia, Violeta)",
            Self::Dificil => "Difícil (Manjericão, Tomate)",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sensors {
    #[serde(default, deserialize_with = "null_as_default")]
    pub luminosity: f64,
    #[serde(rename = "soilMoisture", default, deserialize_with = "null_as_default")]
    pub soil_moisture: f64,
    #[serde(rename = "uvLevel", default, deserialize_with = "null_as_default")]
    pub uv_level: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    #[serde(rename = "ledState", default, deserialize_with = "null_as_default")]
    pub led_state: LedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(rename = "calculatedStatus", default = "unknown_status")]
    pub calculated_status: StatusKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    #[serde(default, deserialize_with = "null_as_default")]
    pub temp: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(rename = "isNight", default, deserialize_with = "null_as_default")]
    pub is_night: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub condition: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(
        default,
        deserialize_with = "lenient_difficulty",
        skip_serializing_if = "Option::is_none"
    )]
    pub difficulty: Option<Difficulty>,
}

/// One full copy of the remote device document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Sensors>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub controls: Controls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<DeviceConfig>,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed device document: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl DeviceSnapshot {
    /// Decodes a pushed document. An empty payload means the document is gone.
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>, DocumentError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(payload)?))
    }

    pub fn difficulty(&self) -> Option<Difficulty> {
        self.config.and_then(|config| config.difficulty)
    }

    pub fn onboarding_required(&self) -> bool {
        self.difficulty().is_none()
    }

    pub fn status_key(&self) -> StatusKey {
        self.status
            .map(|status| status.calculated_status)
            .unwrap_or(StatusKey::Carregando)
    }
}

fn unknown_status() -> StatusKey {
    StatusKey::Unknown
}

/// Document stores report a cleared field as `null`; read it as missing.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_difficulty<'de, D>(deserializer: D) -> Result<Option<Difficulty>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(Difficulty::parse))
}
