pub mod command;
pub mod config;
pub mod onboarding;
pub mod sensors;
pub mod status;
pub mod topics;
pub mod types;
pub mod view;

pub use command::{Command, CommandBody, Position, WifiCredentials};
pub use config::{AppConfig, MqttConfig};
pub use onboarding::{GateError, GateState, OnboardingGate};
pub use sensors::{normalize, NormalizedSensors};
pub use status::{resolve, StatusDisplay, StatusKey};
pub use topics::*;
pub use types::{
    Controls, DeviceConfig, DeviceSnapshot, DeviceStatus, Difficulty, DocumentError, LedState,
    Sensors, Weather,
};
pub use view::{
    DocumentState, Field, FieldSlot, FieldValue, PendingCommand, Resolution, Ticket, ViewModel,
    ViewState,
};
