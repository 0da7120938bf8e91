use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Timelike, Utc};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use spouty_common::{
    config::DEFAULT_DEVICE_ID, document_topic, Controls, DeviceConfig, DeviceSnapshot,
    DeviceStatus, Difficulty, LedState, Position, Sensors, StatusKey, Weather,
};

const DRIFT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct SimState {
    pot: Arc<Mutex<Pot>>,
    mqtt: AsyncClient,
    topic: Arc<String>,
}

/// The simulated device: its public document plus what only the backend
/// would know.
#[derive(Debug, Clone)]
struct Pot {
    document: DeviceSnapshot,
    location: Option<Position>,
    tick: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct LedUpdate {
    state: String,
}

#[derive(Debug, Deserialize)]
struct DifficultyUpdate {
    difficulty: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let device_id =
        std::env::var("SPOUTY_DEVICE_ID").unwrap_or_else(|_| DEFAULT_DEVICE_ID.to_string());
    let onboarded = std::env::var("SIM_START_ONBOARDED")
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options =
        MqttOptions::new(format!("spouty-sim-{device_id}"), mqtt_host, mqtt_port);
    if let Some((user, pass)) = mqtt_credentials(|key| std::env::var(key).ok()) {
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sim mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let state = SimState {
        pot: Arc::new(Mutex::new(Pot::new(onboarded))),
        mqtt,
        topic: Arc::new(document_topic(&device_id)),
    };

    publish_document(&state).await;
    spawn_drift_loop(state.clone());

    let app = router(state);

    let port = std::env::var("SIM_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind sim server at {addr}"))?;

    info!("pot simulator for {device_id} listening on http://{addr} (onboarded: {onboarded})");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Broker credentials, only when a non-empty user is configured.
fn mqtt_credentials(lookup: impl Fn(&str) -> Option<String>) -> Option<(String, String)> {
    let user = lookup("MQTT_USER").unwrap_or_default();
    if user.is_empty() {
        return None;
    }
    Some((user, lookup("MQTT_PASS").unwrap_or_default()))
}

fn router(state: SimState) -> Router {
    Router::new()
        .route("/api/led", post(handle_set_led))
        .route("/api/setdifficulty", post(handle_set_difficulty))
        .route("/api/setlocation", post(handle_set_location))
        .route("/api/document", get(handle_get_document))
        .route("/configure", get(handle_configure))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl Pot {
    fn new(onboarded: bool) -> Self {
        let mut pot = Self {
            document: DeviceSnapshot {
                sensors: Some(Sensors {
                    luminosity: 60.0,
                    soil_moisture: 0.55,
                    uv_level: 3.0,
                }),
                controls: Controls::default(),
                status: None,
                weather: Some(Weather {
                    temp: 24.0,
                    description: "céu limpo".to_string(),
                    is_night: false,
                    condition: "Clear".to_string(),
                }),
                config: Some(DeviceConfig {
                    difficulty: onboarded.then_some(Difficulty::Medio),
                }),
            },
            location: None,
            tick: 0,
        };
        pot.refresh_status(Utc::now().hour());
        pot
    }

    fn difficulty(&self) -> Option<Difficulty> {
        self.document.difficulty()
    }

    fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.document.config = Some(DeviceConfig {
            difficulty: Some(difficulty),
        });
    }

    fn refresh_status(&mut self, utc_hour: u32) {
        let is_night = is_night_at(utc_hour, self.location);
        if let Some(weather) = self.document.weather.as_mut() {
            weather.is_night = is_night;
        }

        let sensors = self.document.sensors.unwrap_or_default();
        self.document.status = Some(DeviceStatus {
            calculated_status: compute_status(&sensors, self.difficulty(), is_night),
        });
    }

    fn drift(&mut self) {
        self.tick = self.tick.saturating_add(1);
        let led = self.document.controls.led_state;
        if let Some(sensors) = self.document.sensors.as_mut() {
            drift_sensors(sensors, self.tick, led);
        }
    }
}

fn spawn_drift_loop(state: SimState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DRIFT_INTERVAL);
        // The first tick completes immediately; the startup publish covers it.
        interval.tick().await;

        loop {
            interval.tick().await;
            {
                let mut pot = state.pot.lock().await;
                pot.drift();
                pot.refresh_status(Utc::now().hour());
            }
            publish_document(&state).await;
        }
    });
}

async fn publish_document(state: &SimState) {
    let payload = {
        let pot = state.pot.lock().await;
        serde_json::to_vec(&pot.document)
    };

    match payload {
        Ok(body) => {
            if let Err(err) = state
                .mqtt
                .publish(state.topic.as_str(), QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("document publish failed: {err}");
            }
        }
        Err(err) => warn!("document serialization failed: {err}"),
    }
}

async fn handle_set_led(
    State(state): State<SimState>,
    body: Result<Json<LedUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(update)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "Body must be {\"state\": \"on\"|\"off\"}");
    };
    let Some(led) = LedState::parse(&update.state) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid state. Use 'on' or 'off'");
    };

    {
        let mut pot = state.pot.lock().await;
        pot.document.controls.led_state = led;
    }
    info!("led set to {}", led.as_str());
    publish_document(&state).await;
    StatusCode::OK.into_response()
}

async fn handle_set_difficulty(
    State(state): State<SimState>,
    body: Result<Json<DifficultyUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(update)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "Body must be {\"difficulty\": ...}");
    };
    let Some(difficulty) = Difficulty::parse(&update.difficulty) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid difficulty. Use 'FACIL', 'MEDIO' or 'DIFICIL'",
        );
    };

    {
        let mut pot = state.pot.lock().await;
        pot.set_difficulty(difficulty);
        pot.refresh_status(Utc::now().hour());
    }
    info!("difficulty set to {}", difficulty.as_str());
    publish_document(&state).await;
    StatusCode::OK.into_response()
}

async fn handle_set_location(
    State(state): State<SimState>,
    body: Result<Json<Position>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(position)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "Body must be {\"lat\": n, \"lon\": n}");
    };
    if !position.is_valid() {
        return error_response(StatusCode::BAD_REQUEST, "Coordinates out of range");
    }

    {
        let mut pot = state.pot.lock().await;
        pot.location = Some(position);
        pot.refresh_status(Utc::now().hour());
    }
    info!("location set to {:.4}, {:.4}", position.lat, position.lon);
    publish_document(&state).await;
    StatusCode::OK.into_response()
}

async fn handle_get_document(State(state): State<SimState>) -> impl IntoResponse {
    let pot = state.pot.lock().await;
    Json(pot.document.clone())
}

async fn handle_configure(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let (Some(ssid), Some(pass)) = (params.get("ssid"), params.get("pass")) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'ssid' or 'pass' parameter");
    };
    if ssid.is_empty() || pass.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Empty 'ssid' or 'pass'");
    }

    info!("received wifi credentials for '{ssid}' ({} char password)", pass.len());
    (StatusCode::OK, "OK").into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Soil moisture below which the plant asks for water.
fn dry_threshold(difficulty: Option<Difficulty>) -> f64 {
    match difficulty {
        Some(Difficulty::Facil) => 0.15,
        Some(Difficulty::Medio) | None => 0.30,
        Some(Difficulty::Dificil) => 0.45,
    }
}

fn compute_status(sensors: &Sensors, difficulty: Option<Difficulty>, is_night: bool) -> StatusKey {
    if is_night {
        return StatusKey::Sleeping;
    }
    if sensors.soil_moisture < dry_threshold(difficulty) {
        return StatusKey::Thirsty;
    }
    if sensors.soil_moisture > 0.85 {
        return StatusKey::Overwatered;
    }
    if sensors.luminosity < 20.0 {
        return if sensors.uv_level < 1.0 {
            StatusKey::NeedsSunNow
        } else {
            StatusKey::SadNeedsSun
        };
    }
    StatusKey::Happy
}

fn drift_sensors(sensors: &mut Sensors, tick: u64, led: LedState) {
    // Dries out slowly; somebody waters it when it gets bad.
    sensors.soil_moisture -= 0.02;
    if sensors.soil_moisture < 0.1 {
        sensors.soil_moisture = 0.8;
    }

    let daylight = 10.0 + (tick % 12) as f64 * 7.5;
    sensors.luminosity = match led {
        LedState::On => (daylight + 30.0).min(100.0),
        LedState::Off => daylight,
    };
    sensors.uv_level = ((tick % 12) as f64 * 0.9).min(11.0);
}

/// Rough local night: 18:00 to 06:00 at the longitude's solar offset.
fn is_night_at(utc_hour: u32, location: Option<Position>) -> bool {
    let offset = location.map_or(0.0, |position| (position.lon / 15.0).round());
    let local = (f64::from(utc_hour) + offset).rem_euclid(24.0);
    !(6.0..18.0).contains(&local)
}
