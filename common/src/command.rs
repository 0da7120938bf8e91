use serde::{Deserialize, Serialize};

use crate::{
    types::{Difficulty, LedState},
    view::FieldValue,
};

pub const PATH_LED: &str = "/api/led";
pub const PATH_SET_DIFFICULTY: &str = "/api/setdifficulty";
pub const PATH_SET_LOCATION: &str = "/api/setlocation";

pub const PATH_CONFIGURE: &str = "/configure";

pub const SETUP_AP_SSID: &str = "Spouty-Setup";
pub const SETUP_AP_PASSWORD: &str = "spoutyadmin";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A control command for the cloud backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetLed(LedState),
    SetDifficulty(Difficulty),
    SetLocation(Position),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandBody {
    Led { state: LedState },
    Difficulty { difficulty: Difficulty },
    Location { lat: f64, lon: f64 },
}

impl Command {
    pub fn path(&self) -> &'static str {
        match self {
            Self::SetLed(_) => PATH_LED,
            Self::SetDifficulty(_) => PATH_SET_DIFFICULTY,
            Self::SetLocation(_) => PATH_SET_LOCATION,
        }
    }

    pub fn body(&self) -> CommandBody {
        match *self {
            Self::SetLed(state) => CommandBody::Led { state },
            Self::SetDifficulty(difficulty) => CommandBody::Difficulty { difficulty },
            Self::SetLocation(Position { lat, lon }) => CommandBody::Location { lat, lon },
        }
    }

    /// The displayed value this command changes, if any.
    pub fn optimistic_value(&self) -> Option<FieldValue> {
        match *self {
            Self::SetLed(state) => Some(FieldValue::Led(state)),
            Self::SetDifficulty(difficulty) => Some(FieldValue::Difficulty(difficulty)),
            Self::SetLocation(_) => None,
        }
    }
}

/// Query string for the pot's local `/configure` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub pass: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn bodies_match_backend_contract() {
        let cases = [
            (
                Command::SetLed(LedState::On),
                "/api/led",
                json!({"state": "on"}),
            ),
            (
                Command::SetDifficulty(Difficulty::Dificil),
                "/api/setdifficulty",
                json!({"difficulty": "DIFICIL"}),
            ),
            (
                Command::SetLocation(Position {
                    lat: -23.55,
                    lon: -46.63,
                }),
                "/api/setlocation",
                json!({"lat": -23.55, "lon": -46.63}),
            ),
        ];

        for (command, path, body) in cases {
            assert_eq!(command.path(), path);
            assert_eq!(serde_json::to_value(command.body()).unwrap(), body);
        }
    }

    #[test]
    fn location_has_no_optimistic_value() {
        let command = Command::SetLocation(Position { lat: 0.0, lon: 0.0 });
        assert_eq!(command.optimistic_value(), None);
        assert_eq!(
            Command::SetLed(LedState::Off).optimistic_value(),
            Some(FieldValue::Led(LedState::Off))
        );
    }

    #[test]
    fn rejects_out_of_range_positions() {
        assert!(Position { lat: 45.0, lon: 120.0 }.is_valid());
        assert!(!Position { lat: 91.0, lon: 0.0 }.is_valid());
        assert!(!Position {
            lat: 0.0,
            lon: f64::NAN
        }
        .is_valid());
    }
}
