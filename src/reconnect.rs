//! Reconnector (C9) — serialised teardown → backoff → fresh-start pipeline,
//! triggered whenever a session leaves `CONNECTED` for a reason other than a
//! permanent ban/logout (§4.6).

use crate::config::{DisconnectReason, Policy};
use rand::Rng;
use std::time::Duration;

/// Computes the delay to wait before the next reconnect attempt.
///
/// Immediate reasons (conflict, navigation, timeout, ...) get a short,
/// near-linear backoff: `IMMEDIATE_BASE + attempts * 1500ms`. Every other
/// reason gets exponential backoff capped at `MAX_DELAY`, plus uniform
/// jitter up to `JITTER_MAX` (§4.6).
pub fn backoff_delay(policy: &Policy, reason: DisconnectReason, attempts: u32) -> Duration {
    if reason.is_immediate() {
        return Duration::from_millis(policy.immediate_base_ms + attempts as u64 * 1_500);
    }

    let exponential_ms = (policy.base_delay_ms as f64) * 1.5f64.powi(attempts as i32);
    let capped_ms = exponential_ms.min(policy.max_delay().as_millis() as f64) as u64;
    let jitter_ms = if policy.jitter_max_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=policy.jitter_max_ms)
    };
    Duration::from_millis(capped_ms + jitter_ms)
}

/// Outcome of evaluating whether (and how) a session should reconnect.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`, with the attempt counter now at `attempts`.
    Retry { delay: Duration, attempts: u32 },
    /// The reason is permanent, or the attempt budget is exhausted: give up
    /// and disable the instance.
    GiveUp,
}

/// Pure decision function: given the current attempt count and the reason
/// that ended the last connection, decide the next action (§4.6).
///
/// Attempts reset to zero once `MAX_RECONNECT_ATTEMPTS` is reached if the
/// disconnect itself is not permanent — the instance is disabled instead of
/// spinning forever, matching the "give up, don't retry forever" rule.
pub fn decide(policy: &Policy, reason: DisconnectReason, attempts_so_far: u32) -> ReconnectDecision {
    if reason.is_permanent() {
        return ReconnectDecision::GiveUp;
    }
    if attempts_so_far >= policy.max_reconnect_attempts {
        return ReconnectDecision::GiveUp;
    }
    let next_attempts = attempts_so_far + 1;
    ReconnectDecision::Retry {
        delay: backoff_delay(policy, reason, attempts_so_far),
        attempts: next_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_reason_uses_linear_backoff() {
        let policy = Policy::default();
        let d0 = backoff_delay(&policy, DisconnectReason::Conflict, 0);
        let d1 = backoff_delay(&policy, DisconnectReason::Conflict, 1);
        assert_eq!(d0, Duration::from_millis(3_000));
        assert_eq!(d1, Duration::from_millis(4_500));
    }

    #[test]
    fn non_immediate_reason_uses_exponential_backoff_capped() {
        let policy = Policy::default();
        let d = backoff_delay(&policy, DisconnectReason::NetworkError, 20);
        assert!(d >= policy.max_delay());
        assert!(d <= policy.max_delay() + Duration::from_millis(policy.jitter_max_ms));
    }

    #[test]
    fn permanent_reason_gives_up_immediately() {
        let policy = Policy::default();
        let decision = decide(&policy, DisconnectReason::Banned, 0);
        assert_eq!(decision, ReconnectDecision::GiveUp);
    }

    #[test]
    fn exhausted_attempts_give_up() {
        let mut policy = Policy::default();
        policy.max_reconnect_attempts = 3;
        let decision = decide(&policy, DisconnectReason::Timeout, 3);
        assert_eq!(decision, ReconnectDecision::GiveUp);
    }

    #[test]
    fn under_budget_retries_with_incremented_counter() {
        let policy = Policy::default();
        match decide(&policy, DisconnectReason::Timeout, 2) {
            ReconnectDecision::Retry { attempts, .. } => assert_eq!(attempts, 3),
            ReconnectDecision::GiveUp => panic!("expected retry"),
        }
    }
}
