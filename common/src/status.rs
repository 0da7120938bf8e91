use serde::{Deserialize, Serialize};

/// Plant status computed by the backend and stored in the device document.
///
/// The remote value is untrusted: anything outside the known set becomes
/// [`StatusKey::Unknown`] when the document is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "String")]
pub enum StatusKey {
    Carregando,
    Happy,
    Sleeping,
    Thirsty,
    Overwatered,
    SadNeedsSun,
    NeedsSunNow,
    Unknown,
}

impl StatusKey {
    pub const ALL: [StatusKey; 8] = [
        Self::Carregando,
        Self::Happy,
        Self::Sleeping,
        Self::Thirsty,
        Self::Overwatered,
        Self::SadNeedsSun,
        Self::NeedsSunNow,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Carregando => "CARREGANDO",
            Self::Happy => "HAPPY",
            Self::Sleeping => "SLEEPING",
            Self::Thirsty => "THIRSTY",
            Self::Overwatered => "OVERWATERED",
            Self::SadNeedsSun => "SAD_NEEDS_SUN",
            Self::NeedsSunNow => "NEEDS_SUN_NOW",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Total parse: unrecognized keys map to `Unknown`.
    pub fn parse(key: &str) -> Self {
        Self::recognize(key).unwrap_or(Self::Unknown)
    }

    pub fn is_status_key(key: &str) -> bool {
        Self::recognize(key).is_some()
    }

    pub fn display(self) -> StatusDisplay {
        STATUS_TABLE
            .iter()
            .find(|(key, _)| *key == self)
            .map(|(_, display)| *display)
            .unwrap_or(UNKNOWN_DISPLAY)
    }

    fn recognize(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == key)
    }
}

impl From<serde_json::Value> for StatusKey {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(key) => Self::parse(&key),
            _ => Self::Unknown,
        }
    }
}

impl From<StatusKey> for String {
    fn from(key: StatusKey) -> Self {
        key.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDisplay {
    pub message: &'static str,
    pub color: &'static str,
}

const UNKNOWN_DISPLAY: StatusDisplay = StatusDisplay {
    message: "Status desconhecido...",
    color: "#888",
};

const STATUS_TABLE: [(StatusKey, StatusDisplay); 8] = [
    (
        StatusKey::Carregando,
        StatusDisplay {
            message: "Carregando status do vaso...",
            color: "#aaa",
        },
    ),
    (
        StatusKey::Happy,
        StatusDisplay {
            message: "Estou feliz e saudável!",
            color: "#4CAF50",
        },
    ),
    (
        StatusKey::Sleeping,
        StatusDisplay {
            message: "Zzz... Estou dormindo.",
            color: "#5C6BC0",
        },
    ),
    (
        StatusKey::Thirsty,
        StatusDisplay {
            message: "Estou com sede! Me regue, por favor.",
            color: "#FF9800",
        },
    ),
    (
        StatusKey::Overwatered,
        StatusDisplay {
            message: "Água demais! Deixe meu solo secar.",
            color: "#2196F3",
        },
    ),
    (
        StatusKey::SadNeedsSun,
        StatusDisplay {
            message: "Estou tristinho... preciso de mais luz.",
            color: "#9C27B0",
        },
    ),
    (
        StatusKey::NeedsSunNow,
        StatusDisplay {
            message: "Preciso de sol agora!",
            color: "#F44336",
        },
    ),
    (StatusKey::Unknown, UNKNOWN_DISPLAY),
];

/// Maps a raw status key to its message and color. Never fails.
pub fn resolve(key: &str) -> StatusDisplay {
    StatusKey::parse(key).display()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unknown_keys_resolve_to_unknown_entry() {
        let expected = StatusDisplay {
            message: "Status desconhecido...",
            color: "#888",
        };

        for key in ["BOGUS", "", "happy", " HAPPY", "NEEDS_SUN", "null"] {
            assert_eq!(resolve(key), expected, "key {key:?}");
        }
    }

    #[test]
    fn every_known_key_has_its_own_entry() {
        for key in StatusKey::ALL {
            assert!(StatusKey::is_status_key(key.as_str()));
            assert_eq!(StatusKey::parse(key.as_str()), key);
            assert_eq!(resolve(key.as_str()), key.display());
        }

        assert_eq!(resolve("THIRSTY").color, "#FF9800");
        assert_eq!(resolve("CARREGANDO").message, "Carregando status do vaso...");
    }

    #[test]
    fn decodes_untrusted_values_without_failing() {
        let key: StatusKey = serde_json::from_str("\"SLEEPING\"").unwrap();
        assert_eq!(key, StatusKey::Sleeping);

        let key: StatusKey = serde_json::from_str("\"ON_FIRE\"").unwrap();
        assert_eq!(key, StatusKey::Unknown);

        let key: StatusKey = serde_json::from_str("42").unwrap();
        assert_eq!(key, StatusKey::Unknown);

        let key: StatusKey = serde_json::from_str("null").unwrap();
        assert_eq!(key, StatusKey::Unknown);
    }

    #[test]
    fn serializes_as_wire_key() {
        assert_eq!(
            serde_json::to_string(&StatusKey::SadNeedsSun).unwrap(),
            "\"SAD_NEEDS_SUN\""
        );
    }
}
