use std::sync::Arc;

use tracing::{debug, info, warn};

use spouty_common::{Command, Resolution};

use crate::{
    backend::{CommandTransport, TransportError},
    session::{SessionClosed, SessionHandle},
};

#[derive(Debug)]
pub enum DispatchOutcome {
    Confirmed,
    /// The request failed and the optimistic value was withdrawn.
    RolledBack(TransportError),
    /// A newer command for the same field owns the displayed value. The
    /// view is left alone, but a failure of this request is still reported.
    Superseded(Option<TransportError>),
    /// A command without an optimistic value failed.
    Failed(TransportError),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed)
    }

    pub fn into_error(self) -> Option<TransportError> {
        match self {
            Self::RolledBack(err) | Self::Failed(err) => Some(err),
            Self::Superseded(err) => err,
            Self::Confirmed => None,
        }
    }
}

/// Sends control commands with an optimistic local update and rollback on
/// failure. The request itself runs in the caller's task, outside the
/// session loop.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: SessionHandle,
    transport: Arc<dyn CommandTransport>,
}

impl CommandDispatcher {
    pub fn new(session: SessionHandle, transport: Arc<dyn CommandTransport>) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub async fn dispatch(&self, command: Command) -> Result<DispatchOutcome, SessionClosed> {
        let Some(value) = command.optimistic_value() else {
            return Ok(match self.transport.send(&command).await {
                Ok(()) => {
                    info!("{} accepted", command.path());
                    DispatchOutcome::Confirmed
                }
                Err(err) => {
                    warn!("{} failed: {err}", command.path());
                    DispatchOutcome::Failed(err)
                }
            });
        };

        let field = value.field();
        let ticket = self.session.begin(value).await?;
        debug!("dispatching {command:?} as ticket {ticket}");

        let result = self.transport.send(&command).await;
        let resolution = self.session.resolve(field, ticket, result.is_ok()).await?;

        Ok(match (resolution, result) {
            (Resolution::Superseded, Ok(())) => DispatchOutcome::Superseded(None),
            (Resolution::Superseded, Err(err)) => {
                warn!("{} failed after ticket {ticket} was superseded: {err}", command.path());
                DispatchOutcome::Superseded(Some(err))
            }
            (_, Ok(())) => DispatchOutcome::Confirmed,
            (_, Err(err)) => {
                warn!("{} failed, rolled back: {err}", command.path());
                DispatchOutcome::RolledBack(err)
            }
        })
    }
}
