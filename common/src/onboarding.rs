use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unknown,
    Required,
    Submitting,
    Satisfied,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Required => "REQUIRED",
            Self::Submitting => "SUBMITTING",
            Self::Satisfied => "SATISFIED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("onboarding setup is not open (gate is {})", .0.as_str())]
pub struct GateError(pub GateState);

/// Blocks the main view until the remote document carries a difficulty.
///
/// Only pushes move the gate to `Satisfied`. A successful setup request
/// leaves it in `Submitting` until the next push: one carrying the
/// difficulty confirms the write, one without it reopens the form.
#[derive(Debug, Clone)]
pub struct OnboardingGate {
    state: GateState,
    awaiting_confirmation: bool,
}

impl Default for OnboardingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OnboardingGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Unknown,
            awaiting_confirmation: false,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn allows_main_view(&self) -> bool {
        self.state == GateState::Satisfied
    }

    /// True after the setup request succeeded and before a push confirmed it.
    pub fn is_awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    /// Feeds the onboarding flag from a mirror push. Returns true when the
    /// state changed.
    pub fn observe(&mut self, onboarding_required: bool) -> bool {
        let next = match (self.state, onboarding_required) {
            (_, false) => GateState::Satisfied,
            // Still in flight: this push predates the write.
            (GateState::Submitting, true) if !self.awaiting_confirmation => {
                GateState::Submitting
            }
            (_, true) => GateState::Required,
        };

        if next != GateState::Submitting {
            self.awaiting_confirmation = false;
        }
        self.transition(next)
    }

    pub fn begin_submit(&mut self) -> Result<(), GateError> {
        if self.state != GateState::Required {
            return Err(GateError(self.state));
        }
        self.awaiting_confirmation = false;
        self.transition(GateState::Submitting);
        Ok(())
    }

    pub fn submit_failed(&mut self) -> bool {
        if self.state != GateState::Submitting {
            return false;
        }
        self.awaiting_confirmation = false;
        self.transition(GateState::Required)
    }

    pub fn submit_succeeded(&mut self) {
        if self.state == GateState::Submitting {
            self.awaiting_confirmation = true;
        }
    }

    fn transition(&mut self, next: GateState) -> bool {
        let changed = self.state != next;
        self.state = next;
        changed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn starts_unknown_and_blocks() {
        let gate = OnboardingGate::new();
        assert_eq!(gate.state(), GateState::Unknown);
        assert!(!gate.allows_main_view());
    }

    #[test]
    fn first_push_decides_required_or_satisfied() {
        let mut gate = OnboardingGate::new();
        assert!(gate.observe(true));
        assert_eq!(gate.state(), GateState::Required);

        let mut gate = OnboardingGate::new();
        assert!(gate.observe(false));
        assert_eq!(gate.state(), GateState::Satisfied);
        assert!(gate.allows_main_view());
    }

    #[test]
    fn successful_submit_waits_for_push() {
        let mut gate = OnboardingGate::new();
        gate.observe(true);

        gate.begin_submit().unwrap();
        // A push computed before the write landed does not reopen the form.
        assert!(!gate.observe(true));
        assert_eq!(gate.state(), GateState::Submitting);

        gate.submit_succeeded();
        assert_eq!(gate.state(), GateState::Submitting);
        assert!(gate.is_awaiting_confirmation());
        assert!(!gate.allows_main_view());

        assert!(gate.observe(false));
        assert_eq!(gate.state(), GateState::Satisfied);
        assert!(!gate.is_awaiting_confirmation());
    }

    #[test]
    fn lost_write_reopens_the_form() {
        let mut gate = OnboardingGate::new();
        gate.observe(true);
        gate.begin_submit().unwrap();
        gate.submit_succeeded();

        assert!(gate.observe(true));
        assert_eq!(gate.state(), GateState::Required);
        assert!(!gate.is_awaiting_confirmation());

        for _ in 0..3 {
            assert!(!gate.observe(true));
        }
        assert_eq!(gate.begin_submit(), Ok(()));
        assert_eq!(gate.state(), GateState::Submitting);
    }

    #[test]
    fn failed_submit_returns_to_required() {
        let mut gate = OnboardingGate::new();
        gate.observe(true);
        gate.begin_submit().unwrap();

        assert!(gate.submit_failed());
        assert_eq!(gate.state(), GateState::Required);
        assert!(!gate.submit_failed());
    }

    #[test]
    fn submit_only_from_required() {
        let mut gate = OnboardingGate::new();
        assert_eq!(gate.begin_submit(), Err(GateError(GateState::Unknown)));

        gate.observe(false);
        assert_eq!(gate.begin_submit(), Err(GateError(GateState::Satisfied)));

        gate.observe(true);
        gate.begin_submit().unwrap();
        assert_eq!(gate.begin_submit(), Err(GateError(GateState::Submitting)));
    }

    #[test]
    fn device_reset_reopens_onboarding() {
        let mut gate = OnboardingGate::new();
        gate.observe(false);
        assert!(gate.observe(true));
        assert_eq!(gate.state(), GateState::Required);
    }
}
