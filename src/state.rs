// SPDX-License-Identifier: Apache-2.0

use crate::error::{bug, DhcpError};

/// DHCPv4 client state, RFC 2131 section 4.4 state diagram plus the `OFF`
/// state the reference client uses to represent "not running".
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum State {
    Off,
    Init,
    Selecting,
    Requesting,
    InitReboot,
    Rebooting,
    Bound,
    Renewing,
    Rebinding,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Off => "OFF",
                Self::Init => "INIT",
                Self::Selecting => "SELECTING",
                Self::Requesting => "REQUESTING",
                Self::InitReboot => "INIT_REBOOT",
                Self::Rebooting => "REBOOTING",
                Self::Bound => "BOUND",
                Self::Renewing => "RENEWING",
                Self::Rebinding => "REBINDING",
            }
        )
    }
}

/// The authoritative transition table. `None` entries never appear; callers
/// match on `allowed_targets` then check membership.
fn allowed_targets(from: State) -> &'static [State] {
    match from {
        State::Off => &[State::Init, State::InitReboot],
        State::Init => &[State::Selecting, State::Off],
        State::Selecting => &[State::Requesting, State::Init, State::Off],
        State::Requesting => &[State::Bound, State::Init, State::Off],
        State::InitReboot => &[State::Rebooting, State::Off],
        State::Rebooting => &[State::Bound, State::Init, State::Off],
        State::Bound => {
            &[State::Renewing, State::Rebinding, State::Init, State::Off]
        }
        State::Renewing => {
            &[State::Bound, State::Rebinding, State::Init, State::Off]
        }
        State::Rebinding => &[State::Bound, State::Init, State::Off],
    }
}

/// Holds the current state and enforces the transition table. Every mutation
/// goes through `transition`; there is no way to set `current` directly from
/// outside this module.
#[derive(Debug)]
pub struct StateMachine {
    current: State,
}

impl StateMachine {
    pub fn new(initial: State) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> State {
        self.current
    }

    /// Moves to `to`. A transition absent from the table is a programming
    /// error: the caller raced a handler guard or built an impossible edge.
    pub fn transition(&mut self, to: State) -> Result<(), DhcpError> {
        if !allowed_targets(self.current).contains(&to) {
            return Err(bug(format!(
                "illegal state transition {} -> {to}",
                self.current
            )));
        }
        log::info!("{} -> {to}", self.current);
        self.current = to;
        Ok(())
    }

    /// `true` if `handler_states` contains the current state; used by
    /// externally-invoked handlers to silently drop out-of-state calls.
    pub fn is_in(&self, handler_states: &[State]) -> bool {
        handler_states.contains(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges_succeed() {
        let mut sm = StateMachine::new(State::Off);
        assert!(sm.transition(State::Init).is_ok());
        assert!(sm.transition(State::Selecting).is_ok());
        assert!(sm.transition(State::Requesting).is_ok());
        assert!(sm.transition(State::Bound).is_ok());
        assert!(sm.transition(State::Renewing).is_ok());
        assert!(sm.transition(State::Rebinding).is_ok());
        assert!(sm.transition(State::Bound).is_ok());
        assert!(sm.transition(State::Off).is_ok());
    }

    #[test]
    fn illegal_edge_is_rejected() {
        let mut sm = StateMachine::new(State::Off);
        sm.transition(State::Init).unwrap();
        // INIT cannot jump straight to BOUND.
        let err = sm.transition(State::Bound).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bug);
        // state is unchanged after a rejected transition
        assert_eq!(sm.current(), State::Init);
    }

    #[test]
    fn every_state_has_an_off_edge_except_off_itself() {
        for s in [
            State::Init,
            State::Selecting,
            State::Requesting,
            State::InitReboot,
            State::Rebooting,
            State::Bound,
            State::Renewing,
            State::Rebinding,
        ] {
            assert!(
                allowed_targets(s).contains(&State::Off),
                "{s} cannot reach OFF"
            );
        }
    }
}
