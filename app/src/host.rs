use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use anyhow::Context;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::{info, warn};

use spouty_common::{AppConfig, Command, Difficulty, GateState, LedState, ViewModel};

use crate::{
    backend::{BackendContext, HttpBackend},
    dispatcher::{CommandDispatcher, DispatchOutcome},
    location::{update_location, ConfiguredLocation, LocationError, LocationProvider},
    mirror::{DeviceMirror, MirrorContext},
    provisioning::{join_instructions, ProvisioningClient, ProvisioningError},
    session::{GateView, Session, SessionHandle},
    setup::{submit_setup, LocationReport, SetupError, SetupRequest},
};

const HELP: &str = "\
commands:
  led on|off                          switch the grow light
  difficulty FACIL|MEDIO|DIFICIL      change the plant profile
  location                            send this device's location
  status                              show the current screen again
  setup <difficulty> [--location]     finish onboarding
  wifi <ssid> <password>              send home Wi-Fi to the pot
  help                                show this list
  quit                                leave";

const BAR_WIDTH: usize = 10;

#[derive(Clone)]
struct Companion {
    dispatcher: CommandDispatcher,
    provisioning: Arc<ProvisioningClient>,
    location: Arc<dyn LocationProvider>,
}

struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("SPOUTY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.spouty"));

        Self {
            path: data_dir.join("app.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<AppConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice::<AppConfig>(&raw)
                .with_context(|| format!("invalid config at {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(AppConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load app config from store: {err:#}");
        AppConfig::default()
    });
    config.apply_overrides(|key| std::env::var(key).ok());
    config.sanitize();

    let backend = HttpBackend::new(&BackendContext::from_config(&config))
        .context("failed to set up backend client")?;
    let provisioning =
        ProvisioningClient::from_config(&config).context("failed to set up provisioning client")?;

    info!(
        "watching device {} via mqtt {}:{}",
        config.device_id, config.mqtt.host, config.mqtt.port
    );
    let session = Session::start(DeviceMirror::subscribe(&MirrorContext::from_config(&config)));
    let companion = Companion {
        dispatcher: CommandDispatcher::new(session.handle(), Arc::new(backend)),
        provisioning: Arc::new(provisioning),
        location: Arc::new(ConfiguredLocation::new(config.location)),
    };

    let renderer = spawn_render_loop(session.handle());
    let result = command_loop(&companion).await;

    renderer.abort();
    session.shutdown().await;
    info!("companion stopped");
    result
}

fn spawn_render_loop(handle: SessionHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut views = handle.watch_view();
        let mut gates = handle.watch_gate();

        loop {
            let frame = render(&views.borrow_and_update(), *gates.borrow_and_update());
            println!("\n{frame}");

            tokio::select! {
                changed = views.changed() => if changed.is_err() { break },
                changed = gates.changed() => if changed.is_err() { break },
            }
        }
    })
}

async fn command_loop(companion: &Companion) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match parse_command(&line) {
            Ok(UserCommand::Quit) => return Ok(()),
            Ok(UserCommand::Empty) => {}
            Ok(UserCommand::Help) => println!("{HELP}"),
            Ok(UserCommand::Status) => {
                let session = companion.dispatcher.session();
                println!("\n{}", render(&session.view(), session.gate()));
            }
            Ok(command) => {
                let companion = companion.clone();
                tokio::spawn(async move {
                    let notice = perform(&companion, command).await;
                    if !notice.is_empty() {
                        println!("{notice}");
                    }
                });
            }
            Err(err) => println!("{err}"),
        }
    }
}

/// Runs one user action to completion and returns the notice to show.
async fn perform(companion: &Companion, command: UserCommand) -> String {
    let dispatcher = &companion.dispatcher;

    match command {
        UserCommand::Led(state) => match dispatcher.dispatch(Command::SetLed(state)).await {
            Ok(outcome) if outcome.is_success() => format!("LED {}", state.as_str()),
            Ok(outcome) => failure_notice(outcome, "Não foi possível alterar o LED"),
            Err(err) => err.to_string(),
        },
        UserCommand::Difficulty(_) if dispatcher.session().gate().state != GateState::Satisfied => {
            "Conclua a configuração primeiro: setup <FACIL|MEDIO|DIFICIL> [--location]".to_string()
        }
        UserCommand::Difficulty(difficulty) => {
            match dispatcher
                .dispatch(Command::SetDifficulty(difficulty))
                .await
            {
                Ok(outcome) if outcome.is_success() => {
                    format!("Dificuldade salva como: {}", difficulty.as_str())
                }
                Ok(outcome) => failure_notice(outcome, "Não foi possível salvar a dificuldade"),
                Err(err) => err.to_string(),
            }
        }
        UserCommand::Location => {
            match update_location(dispatcher, companion.location.as_ref()).await {
                Ok(_) => "Localização atualizada! O Spouty já sabe onde você está.".to_string(),
                Err(err) => location_notice(&err),
            }
        }
        UserCommand::Setup(request) => {
            match submit_setup(dispatcher, companion.location.as_ref(), request).await {
                Ok(report) => {
                    let mut notice = format!(
                        "Configuração salva ({}). Aguardando o vaso confirmar...",
                        report.difficulty.label()
                    );
                    match &report.location {
                        LocationReport::Skipped => {}
                        LocationReport::Sent(position) => notice.push_str(&format!(
                            "\nLocalização enviada ({:.2}, {:.2}).",
                            position.lat, position.lon
                        )),
                        LocationReport::Failed(err) => {
                            notice.push('\n');
                            notice.push_str(&location_notice(err));
                        }
                    }
                    notice
                }
                Err(SetupError::NotRequired(err)) => format!("Configuração indisponível: {err}"),
                Err(err) => format!("Erro: {err}"),
            }
        }
        UserCommand::Wifi { ssid, password } => {
            println!("{}", join_instructions());
            match companion.provisioning.configure(&ssid, &password).await {
                Ok(outcome) => outcome.message().to_string(),
                Err(ProvisioningError::MissingCredentials) => {
                    "Preencha o nome da rede e a senha.".to_string()
                }
                Err(err) => format!("Erro: {err}"),
            }
        }
        UserCommand::Help | UserCommand::Status | UserCommand::Quit | UserCommand::Empty => {
            String::new()
        }
    }
}

/// A superseded command that went through stays quiet; the newer one reports.
fn failure_notice(outcome: DispatchOutcome, prefix: &str) -> String {
    match outcome.into_error() {
        Some(err) => format!("{prefix}: {err}"),
        None => String::new(),
    }
}

fn location_notice(err: &LocationError) -> String {
    match err {
        LocationError::PermissionDenied => {
            "Permissão negada: sem a localização, o Spouty não poderá verificar o clima."
                .to_string()
        }
        other => format!("Não foi possível obter a localização: {other}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UserCommand {
    Led(LedState),
    Difficulty(Difficulty),
    Location,
    Status,
    Setup(SetupRequest),
    Wifi { ssid: String, password: String },
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum CommandParseError {
    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

fn parse_command(line: &str) -> Result<UserCommand, CommandParseError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "" => Ok(UserCommand::Empty),
        "led" => LedState::parse(rest)
            .map(UserCommand::Led)
            .ok_or(CommandParseError::Usage("led on|off")),
        "difficulty" => Difficulty::parse(rest)
            .map(UserCommand::Difficulty)
            .ok_or(CommandParseError::Usage("difficulty FACIL|MEDIO|DIFICIL")),
        "location" => Ok(UserCommand::Location),
        "status" => Ok(UserCommand::Status),
        "setup" => parse_setup(rest).map(UserCommand::Setup),
        "wifi" => {
            let (ssid, password) = rest
                .split_once(char::is_whitespace)
                .ok_or(CommandParseError::Usage("wifi <ssid> <password>"))?;
            Ok(UserCommand::Wifi {
                ssid: ssid.to_string(),
                password: password.trim().to_string(),
            })
        }
        "help" | "?" => Ok(UserCommand::Help),
        "quit" | "exit" => Ok(UserCommand::Quit),
        other => Err(CommandParseError::Unknown(other.to_string())),
    }
}

fn parse_setup(rest: &str) -> Result<SetupRequest, CommandParseError> {
    const USAGE: CommandParseError =
        CommandParseError::Usage("setup FACIL|MEDIO|DIFICIL [--location]");

    let mut parts = rest.split_whitespace();
    let difficulty = parts.next().and_then(Difficulty::parse).ok_or(USAGE)?;
    let share_location = match parts.next() {
        None => false,
        Some("--location") => true,
        Some(_) => return Err(USAGE),
    };
    if parts.next().is_some() {
        return Err(USAGE);
    }

    Ok(SetupRequest {
        difficulty,
        share_location,
    })
}

/// Text frame for the current state: the setup prompt while onboarding is
/// open, the main view otherwise.
fn render(view: &ViewModel, gate: GateView) -> String {
    match gate.state {
        GateState::Unknown => return view.status_message.to_string(),
        GateState::Required => {
            return format!(
                "Bem-vindo ao Spouty! Escolha a dificuldade da sua planta:\n  {}\n  {}\n  {}\n\
                 use: setup <FACIL|MEDIO|DIFICIL> [--location]",
                Difficulty::Facil.label(),
                Difficulty::Medio.label(),
                Difficulty::Dificil.label()
            );
        }
        GateState::Submitting if gate.awaiting_confirmation => {
            return "Aguardando o vaso confirmar a configuração...".to_string();
        }
        GateState::Submitting => return "Salvando configuração...".to_string(),
        GateState::Satisfied => {}
    }

    let mut lines = vec![format!(
        "[{}] {} ({})",
        view.status_key.as_str(),
        view.status_message,
        view.status_color
    )];

    if view.sensors.is_some() {
        lines.push(format!("Umidade  {}", bar(view.normalized.humidity)));
        lines.push(format!("Luz      {}", bar(view.normalized.lux)));
        lines.push(format!("UV       {}", bar(view.normalized.uv)));
    }

    let difficulty = view
        .difficulty
        .map(Difficulty::as_str)
        .unwrap_or("-");
    lines.push(format!(
        "LED: {} | Dificuldade: {difficulty}",
        view.controls.led_state.as_str()
    ));

    if let Some(weather) = &view.weather {
        let period = if weather.is_night { "noite" } else { "dia" };
        lines.push(format!(
            "Clima: {:.1}°C, {} ({period})",
            weather.temp, weather.description
        ));
    }

    if view.stale {
        lines.push("(sem conexão, mostrando os últimos dados)".to_string());
    }
    if let Some(at) = view.last_update {
        lines.push(format!("Atualizado às {} UTC", at.format("%H:%M:%S")));
    }

    lines.join("\n")
}

fn bar(ratio: f64) -> String {
    let filled = ((ratio * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!(
        "{}{} {:>3}%",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        (ratio * 100.0).round() as u32
    )
}
