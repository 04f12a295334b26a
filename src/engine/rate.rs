use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::source::RateLimitPolicy;

#[derive(Default)]
struct RateState {
    last_request: Option<Instant>,
}

/// Enforces per-source request cadence. State is independent per source;
/// callers for the same source serialize on that source's mutex, so a
/// source's requests are effectively sequential.
#[derive(Default)]
pub struct RateGovernor {
    states: Mutex<HashMap<Uuid, Arc<Mutex<RateState>>>>,
}

impl RateGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the next request for `source_id` is safe to issue.
    /// Returns false when the cancel signal fired during the wait.
    pub async fn wait(
        &self,
        source_id: Uuid,
        policy: &RateLimitPolicy,
        cancel: &mut watch::Receiver<bool>,
    ) -> bool {
        let state = {
            let mut states = self.states.lock().await;
            Arc::clone(states.entry(source_id).or_default())
        };
        let mut state = state.lock().await;

        if let Some(last) = state.last_request {
            let target = last + next_delay(policy);
            let sleep = tokio::time::sleep_until(target);
            tokio::pin!(sleep);
            // Reduce the watch result to a bool inside the select so no
            // watch::Ref guard is held across an await point.
            let cancelled = tokio::select! {
                _ = &mut sleep => false,
                result = cancel.wait_for(|stop| *stop) => result.is_ok(),
            };
            if cancelled {
                return false;
            }
            if !sleep.is_elapsed() {
                // Sender dropped: nobody can cancel, finish the wait.
                sleep.await;
            }
        }

        state.last_request = Some(Instant::now());
        true
    }
}

/// `base ± uniform(jitter)` when randomization is on, fixed floor delay
/// otherwise. Never below zero.
fn next_delay(policy: &RateLimitPolicy) -> Duration {
    let floor = policy.floor_delay();
    if !policy.randomize || policy.jitter_ms == 0 {
        return floor;
    }
    let jitter = policy.jitter_ms as i64;
    let offset = rand::random_range(-jitter..=jitter);
    let millis = (floor.as_millis() as i64 + offset).max(0);
    Duration::from_millis(millis as u64)
}
