use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use spouty_common::{Command, Position};

use crate::{
    backend::TransportError,
    dispatcher::CommandDispatcher,
    session::SessionClosed,
};

/// Upper bound on waiting for a position fix.
pub const POSITION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a position fix")]
    Timeout,
    #[error("backend did not accept the location: {0}")]
    Rejected(#[source] TransportError),
    #[error(transparent)]
    Session(#[from] SessionClosed),
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;
    async fn current_position(&self) -> Result<Position, LocationError>;
}

/// Fixed position from configuration. Without one, permission is denied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredLocation {
    position: Option<Position>,
}

impl ConfiguredLocation {
    pub fn new(position: Option<Position>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl LocationProvider for ConfiguredLocation {
    async fn request_permission(&self) -> PermissionStatus {
        if self.position.is_some() {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn current_position(&self) -> Result<Position, LocationError> {
        self.position
            .ok_or_else(|| LocationError::Unavailable("no position configured".to_string()))
    }
}

pub async fn fetch_position(provider: &dyn LocationProvider) -> Result<Position, LocationError> {
    if provider.request_permission().await == PermissionStatus::Denied {
        return Err(LocationError::PermissionDenied);
    }

    let position = tokio::time::timeout(POSITION_TIMEOUT, provider.current_position())
        .await
        .map_err(|_| LocationError::Timeout)??;

    if !position.is_valid() {
        return Err(LocationError::Unavailable(format!(
            "invalid coordinates {}, {}",
            position.lat, position.lon
        )));
    }
    Ok(position)
}

/// Acquires a fix and sends it to the backend. Nothing is shown
/// optimistically, so a failure leaves no state behind.
pub async fn update_location(
    dispatcher: &CommandDispatcher,
    provider: &dyn LocationProvider,
) -> Result<Position, LocationError> {
    let position = match fetch_position(provider).await {
        Ok(position) => position,
        Err(err) => {
            warn!("location update skipped: {err}");
            return Err(err);
        }
    };

    let outcome = dispatcher
        .dispatch(Command::SetLocation(position))
        .await?;
    match outcome.into_error() {
        Some(err) => Err(LocationError::Rejected(err)),
        None => {
            info!("location updated to {:.4}, {:.4}", position.lat, position.lon);
            Ok(position)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dispatcher::testing::RecordingTransport, session::testing::onboarded,
    };

    struct SlowFix;

    #[async_trait]
    impl LocationProvider for SlowFix {
        async fn request_permission(&self) -> PermissionStatus {
            PermissionStatus::Granted
        }

        async fn current_position(&self) -> Result<Position, LocationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Position { lat: 0.0, lon: 0.0 })
        }
    }

    const RIO: Position = Position {
        lat: -22.9068,
        lon: -43.1729,
    };

    #[tokio::test(start_paused = true)]
    async fn sends_configured_position() {
        let (_feed, session) = onboarded("off").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = CommandDispatcher::new(session.handle(), transport.clone());

        let position = update_location(&dispatcher, &ConfiguredLocation::new(Some(RIO)))
            .await
            .unwrap();

        assert_eq!(position, RIO);
        assert_eq!(
            *transport.sent.lock().await,
            vec![Command::SetLocation(RIO)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_sends_nothing() {
        let (_feed, session) = onboarded("off").await;
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = CommandDispatcher::new(session.handle(), transport.clone());

        let err = update_location(&dispatcher, &ConfiguredLocation::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LocationError::PermissionDenied));
        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fix_times_out() {
        let err = fetch_position(&SlowFix).await.unwrap_err();
        assert!(matches!(err, LocationError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_is_rejected() {
        let (_feed, session) = onboarded("off").await;
        let transport = Arc::new(RecordingTransport::failing(&["/api/setlocation"]));
        let dispatcher = CommandDispatcher::new(session.handle(), transport);

        let err = update_location(&dispatcher, &ConfiguredLocation::new(Some(RIO)))
            .await
            .unwrap_err();

        assert!(matches!(err, LocationError::Rejected(_)));
    }

    #[tokio::test]
    async fn out_of_range_fix_is_unavailable() {
        let provider = ConfiguredLocation::new(Some(Position {
            lat: 123.0,
            lon: 0.0,
        }));
        let err = fetch_position(&provider).await.unwrap_err();
        assert!(matches!(err, LocationError::Unavailable(_)));
    }
}
