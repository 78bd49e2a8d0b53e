//! Polling helpers with linear backoff.

use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::vault::{HealthProbe, VaultState};

/// Delay that grows by a fixed step per use, up to a cap.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    next: Duration,
    step: Duration,
    cap: Duration,
}

impl LinearBackoff {
    pub fn new(initial: Duration, step: Duration, cap: Duration) -> Self {
        Self {
            next: initial.min(cap),
            step,
            cap,
        }
    }

    /// The delay to use now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next + self.step).min(self.cap);
        current
    }
}

/// Delay before retry number `attempt` (1-based): `step * attempt`, capped.
pub fn linear_delay(step: Duration, attempt: u32, cap: Duration) -> Duration {
    step.saturating_mul(attempt).min(cap)
}

/// Probe until `done` accepts the state or `wait` elapses.
///
/// Always probes at least once. Returns the accepted state, or `None` on
/// timeout.
pub async fn poll_state(
    probe: &dyn HealthProbe,
    wait: Duration,
    mut backoff: LinearBackoff,
    done: impl Fn(VaultState) -> bool,
) -> Option<VaultState> {
    let deadline = Instant::now() + wait;

    loop {
        let state = probe.state().await;
        if done(state) {
            return Some(state);
        }

        let now = Instant::now();
        if now >= deadline {
            return None;
        }

        let delay = backoff.next_delay().min(deadline - now);
        sleep(delay).await;
    }
}
