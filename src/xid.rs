// SPDX-License-Identifier: Apache-2.0

use rand::Rng;

use crate::state::State;

const RANDOM_MASK: u32 = 0x00FF_FFFF;

/// States that can legitimately issue an outbound request and therefore
/// appear encoded in the high byte of an xid. Closed, fixed-size
/// enumeration: every other high byte decodes to `None`.
const REQUEST_STATES: [State; 5] = [
    State::Selecting,
    State::Requesting,
    State::Rebooting,
    State::Renewing,
    State::Rebinding,
];

fn state_code(state: State) -> Option<u8> {
    REQUEST_STATES
        .iter()
        .position(|s| *s == state)
        .map(|i| (i + 1) as u8)
}

fn code_state(code: u8) -> Option<State> {
    if code == 0 {
        return None;
    }
    REQUEST_STATES.get((code - 1) as usize).copied()
}

/// A per-session transaction id discipline: the low 24 bits are fixed for
/// the client's lifetime, the high 8 bits vary per outbound message and
/// record which state issued it, so that a reply can be matched back to
/// "which request produced this" even when two requests in flight share
/// the same random suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xid {
    random_part: u32,
}

impl Xid {
    pub fn new() -> Self {
        let random_part = rand::thread_rng().gen::<u32>() & RANDOM_MASK;
        Self { random_part }
    }

    /// The 32-bit value to stamp on an outbound message sent while the
    /// client is in `state`. States outside the closed `REQUEST_STATES`
    /// enumeration (`OFF`, `BOUND`, `INIT`, `INIT_REBOOT`) encode to the
    /// "invalid" sentinel high byte: this only happens for a `RELEASE`,
    /// which is sent on the way out and whose xid is never matched
    /// against an incoming reply, so an undecodable high byte is harmless.
    pub fn for_state(&self, state: State) -> u32 {
        let code = state_code(state).unwrap_or(0);
        ((code as u32) << 24) | self.random_part
    }

    /// Whether `received` shares this session's random suffix.
    pub fn matches(&self, received: u32) -> bool {
        (received & RANDOM_MASK) == self.random_part
    }

    /// Recovers the request-issuing state encoded in `received`'s high
    /// byte. `None` for an unrecognised or zero high byte; the caller logs
    /// and discards in that case.
    pub fn request_state(received: u32) -> Option<State> {
        code_state((received >> 24) as u8)
    }
}

impl Default for Xid {
    fn default() -> Self {
        Self::new()
    }
}
