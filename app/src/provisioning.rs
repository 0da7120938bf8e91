use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use spouty_common::{
    command::{PATH_CONFIGURE, SETUP_AP_PASSWORD, SETUP_AP_SSID},
    AppConfig, WifiCredentials,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// The pot acknowledged the credentials and will restart.
    Applied,
    /// No answer. The pot usually drops its access point while restarting,
    /// so this is the expected result of a successful write.
    Unconfirmed,
}

impl ProvisioningOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::Applied => {
                "Configuração enviada. O vaso irá reiniciar e conectar na sua internet."
            }
            Self::Unconfirmed => {
                "Verifique se o vaso reiniciou. Se sim, reconecte seu celular na internet normal."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("network name and password are both required")]
    MissingCredentials,
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Steps the user follows before credentials can reach the pot.
pub fn join_instructions() -> String {
    format!(
        "1. Open your phone's Wi-Fi settings.\n\
         2. Join the network '{SETUP_AP_SSID}' (password: {SETUP_AP_PASSWORD}).\n\
         3. Come back and send. Only 2.4 GHz home networks are supported."
    )
}

/// Talks to the pot's local setup endpoint while joined to its access point.
pub struct ProvisioningClient {
    client: reqwest::Client,
    device_url: String,
}

impl ProvisioningClient {
    pub fn new(device_url: &str, timeout: Duration) -> Result<Self, ProvisioningError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProvisioningError::Client)?;

        Ok(Self {
            client,
            device_url: device_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProvisioningError> {
        Self::new(
            &config.device_url,
            Duration::from_millis(config.provisioning_timeout_ms),
        )
    }

    pub async fn configure(
        &self,
        ssid: &str,
        password: &str,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        if ssid.is_empty() || password.is_empty() {
            return Err(ProvisioningError::MissingCredentials);
        }

        let credentials = WifiCredentials {
            ssid: ssid.to_string(),
            pass: password.to_string(),
        };
        let url = format!("{}{}", self.device_url, PATH_CONFIGURE);

        // The pot's setup page answers before restarting; any reply at all
        // means the credentials arrived.
        let outcome = match self.client.get(&url).query(&credentials).send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    warn!("pot answered {url} with HTTP {status}");
                }
                ProvisioningOutcome::Applied
            }
            Err(err) => {
                warn!("no answer from pot at {url}: {err}");
                ProvisioningOutcome::Unconfirmed
            }
        };

        info!("wifi provisioning for '{ssid}': {outcome:?}");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use axum::{extract::Query, extract::State, http::StatusCode, routing::get, Router};
    use tokio::{net::TcpListener, sync::Mutex};

    use super::*;

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn sends_url_encoded_credentials() {
        let received: Arc<Mutex<Option<WifiCredentials>>> = Arc::default();
        let app = Router::new()
            .route(
                "/configure",
                get(
                    |State(received): State<Arc<Mutex<Option<WifiCredentials>>>>,
                     Query(credentials): Query<WifiCredentials>| async move {
                        *received.lock().await = Some(credentials);
                        "OK"
                    },
                ),
            )
            .with_state(received.clone());
        let addr = serve(app).await;

        let client = ProvisioningClient::new(&format!("http://{addr}/"), DEFAULT_TIMEOUT).unwrap();
        let outcome = client.configure("Casa & Jardim", "s3nh@ 100%").await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Applied);
        assert_eq!(
            *received.lock().await,
            Some(WifiCredentials {
                ssid: "Casa & Jardim".to_string(),
                pass: "s3nh@ 100%".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn any_reply_counts_as_applied() {
        let app = Router::new().route(
            "/configure",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = serve(app).await;

        let client = ProvisioningClient::new(&format!("http://{addr}"), DEFAULT_TIMEOUT).unwrap();
        let outcome = client.configure("rede", "senha").await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Applied);
    }

    #[tokio::test]
    async fn silent_pot_is_unconfirmed() {
        // Accepts the connection and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client =
            ProvisioningClient::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let outcome = client.configure("rede", "senha").await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Unconfirmed);
    }

    #[tokio::test]
    async fn refused_connection_is_unconfirmed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ProvisioningClient::new(&format!("http://{addr}"), DEFAULT_TIMEOUT).unwrap();
        let outcome = client.configure("rede", "senha").await.unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Unconfirmed);
    }

    #[tokio::test]
    async fn empty_credentials_never_hit_the_network() {
        let client = ProvisioningClient::new("http://127.0.0.1:9", DEFAULT_TIMEOUT).unwrap();

        assert!(matches!(
            client.configure("", "senha").await,
            Err(ProvisioningError::MissingCredentials)
        ));
        assert!(matches!(
            client.configure("rede", "").await,
            Err(ProvisioningError::MissingCredentials)
        ));
    }

    #[test]
    fn instructions_name_the_setup_network() {
        let text = join_instructions();
        assert!(text.contains("Spouty-Setup"));
        assert!(text.contains("spoutyadmin"));
    }
}
