// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use rand::Rng;

const DEFAULT_WAIT_FIRST: f64 = 4.0;
const DEFAULT_WAIT_MAX: f64 = 32.0;
const DEFAULT_FACTOR: f64 = 2.0;

/// RFC 2131 section 4.4.5 floor for the RENEWING/REBINDING retransmission
/// cadence.
pub const MIN_REBIND_RENEW_WAIT: Duration = Duration::from_secs(60);

/// A lazy, infinite sequence of positive retransmission delays. Re-created
/// from scratch whenever a new outbound message supersedes the current one;
/// never re-created between retransmissions of the same message.
pub trait RetransmissionSchedule: Send {
    /// Yields the delay to wait before the next retransmission.
    fn next(&mut self) -> Duration;
}

/// Randomised exponential back-off: `4.0`, then uniform samples from
/// `[previous, previous * 2]` clamped to `32.0`, forever.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    wait_first: f64,
    wait_max: f64,
    factor: f64,
    delay: Option<f64>,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self {
            wait_first: DEFAULT_WAIT_FIRST,
            wait_max: DEFAULT_WAIT_MAX,
            factor: DEFAULT_FACTOR,
            delay: None,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetransmissionSchedule for ExponentialBackoff {
    fn next(&mut self) -> Duration {
        let delay = match self.delay {
            None => self.wait_first,
            Some(prev) => {
                if prev <= self.wait_max {
                    rand::thread_rng()
                        .gen_range(prev..=(prev * self.factor))
                        .min(self.wait_max)
                } else {
                    self.wait_max
                }
            }
        };
        self.delay = Some(delay);
        Duration::from_secs_f64(delay)
    }
}

/// A factory producing a fresh `RetransmissionSchedule` each time the
/// outbound message is superseded, per `ClientConfig::retransmission`.
pub type ScheduleFactory = std::sync::Arc<dyn Fn() -> Box<dyn RetransmissionSchedule> + Send + Sync>;

pub fn default_schedule_factory() -> ScheduleFactory {
    std::sync::Arc::new(|| Box::new(ExponentialBackoff::new()) as Box<dyn RetransmissionSchedule>)
}

/// RFC 2131 section 4.4.5: while RENEWING/REBINDING, wait one-half of the
/// remaining time until the given deadline, down to a 60s floor (or the
/// exact remainder, if that is already below the floor). Yields a zero
/// delay exactly once after the deadline has passed; the caller reads that
/// as "stop retrying here, fall through to the next state" rather than
/// "send immediately".
#[derive(Debug)]
pub struct Rfc2131RenewRebindSchedule {
    deadline: tokio::time::Instant,
    expired_once: bool,
}

impl Rfc2131RenewRebindSchedule {
    pub fn new(deadline: tokio::time::Instant) -> Self {
        Self {
            deadline,
            expired_once: false,
        }
    }

    pub fn is_past_deadline(&self) -> bool {
        tokio::time::Instant::now() >= self.deadline
    }
}

impl RetransmissionSchedule for Rfc2131RenewRebindSchedule {
    fn next(&mut self) -> Duration {
        let remaining = self
            .deadline
            .saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            // Only ever returns zero once; from then on the owning loop
            // must have observed `is_past_deadline()` and moved on.
            self.expired_once = true;
            return Duration::ZERO;
        }
        std::cmp::min(remaining, std::cmp::max(remaining / 2, MIN_REBIND_RENEW_WAIT))
    }
}
