use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use spouty_common::{AppConfig, Command};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {path} failed: {source}")]
    Request {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path} answered with HTTP {status}")]
    Status { path: &'static str, status: u16 },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Sends one control command to wherever the device state is written.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, command: &Command) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct BackendContext {
    pub base_url: String,
    /// `None` leaves request lifetime to the transport.
    pub timeout: Option<Duration>,
}

impl BackendContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.backend_url.clone(),
            timeout: config.backend_timeout_ms.map(Duration::from_millis),
        }
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(context: &BackendContext) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = context.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build().map_err(TransportError::Client)?,
            base_url: context.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CommandTransport for HttpBackend {
    async fn send(&self, command: &Command) -> Result<(), TransportError> {
        let path = command.path();
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {url}");

        let response = self
            .client
            .post(&url)
            .json(&command.body())
            .send()
            .await
            .map_err(|source| TransportError::Request { path, source })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                path,
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use tokio::{net::TcpListener, sync::Mutex};

    use spouty_common::{Difficulty, LedState, Position};

    use super::*;

    type Captured = Arc<Mutex<Vec<(String, Value)>>>;

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn recording_backend(status: StatusCode) -> (SocketAddr, Captured) {
        let captured: Captured = Arc::default();
        let record = move |path: &'static str| {
            move |State(captured): State<Captured>, Json(body): Json<Value>| async move {
                captured.lock().await.push((path.to_string(), body));
                status
            }
        };
        let app = Router::new()
            .route("/api/led", post(record("/api/led")))
            .route("/api/setdifficulty", post(record("/api/setdifficulty")))
            .route("/api/setlocation", post(record("/api/setlocation")))
            .with_state(captured.clone());
        (serve(app).await, captured)
    }

    fn backend_for(addr: SocketAddr) -> HttpBackend {
        HttpBackend::new(&BackendContext {
            base_url: format!("http://{addr}/"),
            timeout: Some(Duration::from_secs(5)),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_json_bodies_to_contract_paths() {
        let (addr, captured) = recording_backend(StatusCode::OK).await;
        let backend = backend_for(addr);

        backend.send(&Command::SetLed(LedState::On)).await.unwrap();
        backend
            .send(&Command::SetDifficulty(Difficulty::Facil))
            .await
            .unwrap();
        backend
            .send(&Command::SetLocation(Position {
                lat: -22.9,
                lon: -43.2,
            }))
            .await
            .unwrap();

        let captured = captured.lock().await.clone();
        assert_eq!(
            captured,
            vec![
                ("/api/led".to_string(), json!({"state": "on"})),
                (
                    "/api/setdifficulty".to_string(),
                    json!({"difficulty": "FACIL"})
                ),
                (
                    "/api/setlocation".to_string(),
                    json!({"lat": -22.9, "lon": -43.2})
                ),
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (addr, _) = recording_backend(StatusCode::SERVICE_UNAVAILABLE).await;
        let backend = backend_for(addr);

        let err = backend
            .send(&Command::SetLed(LedState::Off))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransportError::Status {
                path: "/api/led",
                status: 503
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = backend_for(addr)
            .send(&Command::SetLed(LedState::On))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Request { .. }));
    }
}
