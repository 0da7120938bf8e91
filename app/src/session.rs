use chrono::Utc;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use spouty_common::{
    Field, FieldValue, GateError, GateState, OnboardingGate, Resolution, Ticket, ViewModel,
    ViewState,
};

use crate::mirror::{MirrorEvent, Subscription};

const INPUT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session update loop has stopped")]
pub struct SessionClosed;

/// Onboarding gate as seen by the screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateView {
    pub state: GateState,
    pub awaiting_confirmation: bool,
}

impl GateView {
    fn of(gate: &OnboardingGate) -> Self {
        Self {
            state: gate.state(),
            awaiting_confirmation: gate.is_awaiting_confirmation(),
        }
    }
}

enum Input {
    Begin {
        value: FieldValue,
        reply: oneshot::Sender<Ticket>,
    },
    Resolve {
        field: Field,
        ticket: Ticket,
        succeeded: bool,
        reply: oneshot::Sender<Resolution>,
    },
    BeginSetup {
        reply: oneshot::Sender<Result<(), GateError>>,
    },
    SetupFailed,
    SetupSucceeded,
}

/// Everything the update loop owns. Only the loop task touches it.
struct Core {
    view: ViewState,
    gate: OnboardingGate,
}

impl Core {
    fn new() -> Self {
        Self {
            view: ViewState::new(),
            gate: OnboardingGate::new(),
        }
    }

    fn apply(&mut self, event: MirrorEvent) {
        let Some(document) = event.document() else {
            if let MirrorEvent::Error(err) = event {
                warn!("device feed error, keeping last snapshot: {err}");
            }
            self.view.mark_stale();
            return;
        };

        let required = document.onboarding_required();
        self.view.apply_push(document, Utc::now());
        if let Some(required) = required {
            if self.gate.observe(required) {
                info!("onboarding gate is now {}", self.gate.state().as_str());
            }
        }
    }
}

struct Publisher {
    view: watch::Sender<ViewModel>,
    gate: watch::Sender<GateView>,
}

impl Publisher {
    fn publish(&self, core: &Core) {
        let next = core.view.view();
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        let gate = GateView::of(&core.gate);
        self.gate.send_if_modified(|current| {
            if *current == gate {
                return false;
            }
            *current = gate;
            true
        });
    }
}

/// Cheap handle used by dispatchers and flows to talk to the update loop.
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::Sender<Input>,
    view: watch::Receiver<ViewModel>,
    gate: watch::Receiver<GateView>,
}

impl SessionHandle {
    pub fn view(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    pub fn gate(&self) -> GateView {
        *self.gate.borrow()
    }

    pub fn watch_gate(&self) -> watch::Receiver<GateView> {
        self.gate.clone()
    }

    /// Applies an optimistic value. The published view already shows it
    /// when this returns.
    pub async fn begin(&self, value: FieldValue) -> Result<Ticket, SessionClosed> {
        self.request(|reply| Input::Begin { value, reply }).await
    }

    pub async fn resolve(
        &self,
        field: Field,
        ticket: Ticket,
        succeeded: bool,
    ) -> Result<Resolution, SessionClosed> {
        self.request(|reply| Input::Resolve {
            field,
            ticket,
            succeeded,
            reply,
        })
        .await
    }

    pub async fn begin_setup(&self) -> Result<Result<(), GateError>, SessionClosed> {
        self.request(|reply| Input::BeginSetup { reply }).await
    }

    pub async fn setup_failed(&self) -> Result<(), SessionClosed> {
        self.inputs
            .send(Input::SetupFailed)
            .await
            .map_err(|_| SessionClosed)
    }

    pub async fn setup_succeeded(&self) -> Result<(), SessionClosed> {
        self.inputs
            .send(Input::SetupSucceeded)
            .await
            .map_err(|_| SessionClosed)
    }

    async fn request<T>(
        &self,
        input: impl FnOnce(oneshot::Sender<T>) -> Input,
    ) -> Result<T, SessionClosed> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(input(reply))
            .await
            .map_err(|_| SessionClosed)?;
        response.await.map_err(|_| SessionClosed)
    }
}

/// The single writer of view state: mirror pushes and command inputs are
/// applied one at a time, in arrival order.
pub struct Session {
    handle: SessionHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Subscription>,
}

impl Session {
    pub fn start(subscription: Subscription) -> Self {
        let core = Core::new();
        let (view_tx, view_rx) = watch::channel(core.view.view());
        let (gate_tx, gate_rx) = watch::channel(GateView::of(&core.gate));
        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let publisher = Publisher {
            view: view_tx,
            gate: gate_tx,
        };
        let task = tokio::spawn(run_loop(
            core,
            subscription,
            inputs_rx,
            shutdown_rx,
            publisher,
        ));

        Self {
            handle: SessionHandle {
                inputs: inputs_tx,
                view: view_rx,
                gate: gate_rx,
            },
            shutdown: shutdown_tx,
            task,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stops the update loop and closes the device subscription.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(subscription) => subscription.unsubscribe().await,
            Err(err) => warn!("session loop ended abnormally: {err}"),
        }
    }
}

async fn run_loop(
    mut core: Core,
    mut subscription: Subscription,
    mut inputs: mpsc::Receiver<Input>,
    mut shutdown: oneshot::Receiver<()>,
    publisher: Publisher,
) -> Subscription {
    let mut feed_open = true;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(input) = inputs.recv() => handle_input(&mut core, &publisher, input),
            event = subscription.next(), if feed_open => {
                match event {
                    Some(event) => core.apply(event),
                    None => {
                        warn!("device feed for {} closed", subscription.device_id());
                        feed_open = false;
                        core.view.mark_stale();
                    }
                }
                publisher.publish(&core);
            }
        }
    }

    debug!("session loop for {} stopped", subscription.device_id());
    subscription
}

fn handle_input(core: &mut Core, publisher: &Publisher, input: Input) {
    // Publish before replying so callers observe their own writes.
    match input {
        Input::Begin { value, reply } => {
            let ticket = core.view.begin(value);
            publisher.publish(core);
            let _ = reply.send(ticket);
        }
        Input::Resolve {
            field,
            ticket,
            succeeded,
            reply,
        } => {
            let resolution = core.view.resolve(field, ticket, succeeded);
            publisher.publish(core);
            let _ = reply.send(resolution);
        }
        Input::BeginSetup { reply } => {
            let result = core.gate.begin_submit();
            publisher.publish(core);
            let _ = reply.send(result);
        }
        Input::SetupFailed => {
            if core.gate.submit_failed() {
                info!("setup failed; onboarding form reopened");
            }
            publisher.publish(core);
        }
        Input::SetupSucceeded => {
            core.gate.submit_succeeded();
            publisher.publish(core);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::mirror::{
        testing::{document, scripted},
        DeviceMirror, FeedEvent,
    };

    pub(crate) type Feed = UnboundedSender<Result<FeedEvent, String>>;

    pub(crate) const SYNC_WINDOW: Duration = Duration::from_millis(1_500);

    pub(crate) fn start_scripted() -> (Feed, Session) {
        let (feed, source) = scripted();
        let subscription = DeviceMirror::subscribe_with("vaso_01", source, SYNC_WINDOW);
        (feed, Session::start(subscription))
    }

    /// Session whose device already reported a configured document.
    pub(crate) async fn onboarded(led: &str) -> (Feed, Session) {
        let (feed, session) = start_scripted();
        feed.send(document(&format!(
            r#"{{"controls": {{"ledState": "{led}"}}, "config": {{"difficulty": "MEDIO"}},
                "status": {{"calculatedStatus": "HAPPY"}}}}"#
        )))
        .unwrap_or_else(|_| panic!("feed closed"));
        wait_gate(&session.handle(), GateState::Satisfied).await;
        (feed, session)
    }

    /// Session for a pot with no document yet.
    pub(crate) async fn awaiting_setup() -> (Feed, Session) {
        let (feed, session) = start_scripted();
        feed.send(Ok(FeedEvent::Subscribed))
            .unwrap_or_else(|_| panic!("feed closed"));
        wait_gate(&session.handle(), GateState::Required).await;
        (feed, session)
    }

    pub(crate) async fn wait_gate(handle: &SessionHandle, state: GateState) {
        handle
            .watch_gate()
            .wait_for(|gate| gate.state == state)
            .await
            .unwrap_or_else(|_| panic!("gate never reached {}", state.as_str()));
    }
}
