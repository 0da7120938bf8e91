use chrono::{DateTime, Utc};

use crate::{
    sensors::{normalize, NormalizedSensors},
    status::StatusKey,
    types::{Controls, DeviceSnapshot, Difficulty, LedState, Sensors, Weather},
};

pub type Ticket = u64;

/// What the mirror currently knows about the remote document.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DocumentState {
    #[default]
    Loading,
    Absent,
    Present(DeviceSnapshot),
}

impl DocumentState {
    pub fn snapshot(&self) -> Option<&DeviceSnapshot> {
        match self {
            Self::Present(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// `None` until the first push arrives.
    pub fn onboarding_required(&self) -> Option<bool> {
        match self {
            Self::Loading => None,
            Self::Absent => Some(true),
            Self::Present(snapshot) => Some(snapshot.onboarding_required()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Led,
    Difficulty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Led(LedState),
    Difficulty(Difficulty),
}

impl FieldValue {
    pub fn field(self) -> Field {
        match self {
            Self::Led(_) => Field::Led,
            Self::Difficulty(_) => Field::Difficulty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand<T> {
    pub ticket: Ticket,
    pub optimistic: T,
    pub previous: T,
    // Overlay visible before this command; restored on rollback.
    previous_overlay: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    RolledBack,
    /// A newer command for the same field took over before this one resolved.
    Superseded,
}

/// Optimistic layer for one mutable field: `Idle -> Pending(previous) -> Idle`.
///
/// The overlay survives a successful command until the next push replaces
/// it, so the UI does not flicker back to the pre-command value while the
/// backend propagates the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot<T> {
    overlay: Option<T>,
    pending: Option<PendingCommand<T>>,
}

impl<T> Default for FieldSlot<T> {
    fn default() -> Self {
        Self {
            overlay: None,
            pending: None,
        }
    }
}

impl<T: Copy + PartialEq> FieldSlot<T> {
    pub fn value(&self, remote: T) -> T {
        self.overlay.unwrap_or(remote)
    }

    pub fn pending(&self) -> Option<&PendingCommand<T>> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Applies `value` optimistically. Any in-flight command for this field
    /// is superseded and its optimistic value becomes the rollback target.
    pub fn begin(&mut self, ticket: Ticket, value: T, remote: T) -> PendingCommand<T> {
        let pending = PendingCommand {
            ticket,
            optimistic: value,
            previous: self.value(remote),
            previous_overlay: self.overlay,
        };
        self.pending = Some(pending);
        self.overlay = Some(value);
        pending
    }

    pub fn resolve(&mut self, ticket: Ticket, succeeded: bool) -> Resolution {
        let Some(pending) = self.pending.filter(|pending| pending.ticket == ticket) else {
            return Resolution::Superseded;
        };

        self.pending = None;
        if succeeded {
            Resolution::Confirmed
        } else {
            self.overlay = pending.previous_overlay;
            Resolution::RolledBack
        }
    }

    /// A new snapshot arrived. Idle overlays give way to it; a pending
    /// overlay stays, but its rollback now lands on the pushed value.
    pub fn on_push(&mut self) {
        match self.pending.as_mut() {
            Some(pending) => pending.previous_overlay = None,
            None => self.overlay = None,
        }
    }
}

/// Render-ready state for the main screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub loading: bool,
    pub sensors: Option<Sensors>,
    pub normalized: NormalizedSensors,
    pub controls: Controls,
    pub difficulty: Option<Difficulty>,
    pub status_key: StatusKey,
    pub status_message: &'static str,
    pub status_color: &'static str,
    pub weather: Option<Weather>,
    pub onboarding_required: bool,
    pub stale: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// Inputs to the view derivation: the mirrored document plus the
/// optimistic slots. Owned by a single writer.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    document: DocumentState,
    led: FieldSlot<LedState>,
    difficulty: FieldSlot<Option<Difficulty>>,
    stale: bool,
    last_update: Option<DateTime<Utc>>,
    next_ticket: Ticket,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self) -> &DocumentState {
        &self.document
    }

    pub fn apply_push(&mut self, document: DocumentState, at: DateTime<Utc>) {
        self.document = document;
        self.stale = false;
        self.last_update = Some(at);
        self.led.on_push();
        self.difficulty.on_push();
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn begin(&mut self, value: FieldValue) -> Ticket {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        match value {
            FieldValue::Led(state) => {
                let remote = self.remote_led();
                self.led.begin(ticket, state, remote);
            }
            FieldValue::Difficulty(difficulty) => {
                let remote = self.remote_difficulty();
                self.difficulty.begin(ticket, Some(difficulty), remote);
            }
        }
        ticket
    }

    pub fn resolve(&mut self, field: Field, ticket: Ticket, succeeded: bool) -> Resolution {
        match field {
            Field::Led => self.led.resolve(ticket, succeeded),
            Field::Difficulty => self.difficulty.resolve(ticket, succeeded),
        }
    }

    pub fn is_pending(&self, field: Field) -> bool {
        match field {
            Field::Led => self.led.is_pending(),
            Field::Difficulty => self.difficulty.is_pending(),
        }
    }

    pub fn view(&self) -> ViewModel {
        let snapshot = self.document.snapshot();
        let sensors = snapshot.and_then(|snapshot| snapshot.sensors);
        let status_key = snapshot
            .map(DeviceSnapshot::status_key)
            .unwrap_or(StatusKey::Carregando);
        let display = status_key.display();

        ViewModel {
            loading: self.document == DocumentState::Loading,
            sensors,
            normalized: normalize(sensors.as_ref()),
            controls: Controls {
                led_state: self.led.value(self.remote_led()),
            },
            difficulty: self.difficulty.value(self.remote_difficulty()),
            status_key,
            status_message: display.message,
            status_color: display.color,
            weather: snapshot.and_then(|snapshot| snapshot.weather.clone()),
            onboarding_required: self.document.onboarding_required().unwrap_or(false),
            stale: self.stale,
            last_update: self.last_update,
        }
    }

    fn remote_led(&self) -> LedState {
        self.document
            .snapshot()
            .map(|snapshot| snapshot.controls.led_state)
            .unwrap_or_default()
    }

    fn remote_difficulty(&self) -> Option<Difficulty> {
        self.document.snapshot().and_then(DeviceSnapshot::difficulty)
    }
}
