use thiserror::Error;
use tracing::{info, warn};

use spouty_common::{Command, Difficulty, GateError, Position};

use crate::{
    backend::TransportError,
    dispatcher::{CommandDispatcher, DispatchOutcome},
    location::{update_location, LocationError, LocationProvider},
    session::SessionClosed,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupRequest {
    pub difficulty: Difficulty,
    pub share_location: bool,
}

#[derive(Debug)]
pub enum LocationReport {
    Skipped,
    Sent(Position),
    /// Setup still completes; the user can retry from settings.
    Failed(LocationError),
}

#[derive(Debug)]
pub struct SetupReport {
    pub difficulty: Difficulty,
    pub location: LocationReport,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    NotRequired(#[from] GateError),
    #[error("could not save difficulty: {0}")]
    Difficulty(#[source] TransportError),
    #[error(transparent)]
    Session(#[from] SessionClosed),
}

/// Runs the onboarding submission: difficulty first, then the optional
/// location. The gate opens only once a push carries the difficulty.
pub async fn submit_setup(
    dispatcher: &CommandDispatcher,
    provider: &dyn LocationProvider,
    request: SetupRequest,
) -> Result<SetupReport, SetupError> {
    let session = dispatcher.session();
    session.begin_setup().await??;
    info!(
        "submitting setup: difficulty {}, share location {}",
        request.difficulty.as_str(),
        request.share_location
    );

    let outcome = dispatcher
        .dispatch(Command::SetDifficulty(request.difficulty))
        .await?;
    if let DispatchOutcome::RolledBack(err)
    | DispatchOutcome::Failed(err)
    | DispatchOutcome::Superseded(Some(err)) = outcome
    {
        warn!("setup aborted: {err}");
        session.setup_failed().await?;
        return Err(SetupError::Difficulty(err));
    }

    let location = if request.share_location {
        match update_location(dispatcher, provider).await {
            Ok(position) => LocationReport::Sent(position),
            Err(LocationError::Session(closed)) => return Err(closed.into()),
            Err(err) => LocationReport::Failed(err),
        }
    } else {
        LocationReport::Skipped
    };

    session.setup_succeeded().await?;
    Ok(SetupReport {
        difficulty: request.difficulty,
        location,
    })
}
