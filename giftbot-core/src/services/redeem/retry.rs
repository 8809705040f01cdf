// File: src/services/redeem/retry.rs
//
// The per-attempt state machine. Every outcome category carries a hard retry
// ceiling; an earlier version of this system retried unrecognized API
// statuses forever and burned the day's API quota doing it.

use std::cmp::min;
use std::time::Duration;

use giftbot_common::models::RedemptionStatus;
use crate::config::RedeemConfig;
use crate::platforms::wos::RawOutcome;

/// Where one account currently is inside its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    Skipped,
    Failed,
}

/// Counters the coordinator worker threads through the policy on every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptCounters {
    /// Redemption calls made, all categories.
    pub attempts: u32,
    /// Calls that came back with an unrecognized status.
    pub unknown_attempts: u32,
    /// Session re-acquisitions forced by SESSION_EXPIRED.
    pub relogins: u32,
}

/// A requirement the API just taught us about this code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnedRequirement {
    VipRequired,
    /// The attempting account's level was insufficient; the bound is at
    /// least one above that account's level.
    MinLevelAbove(i32),
}

/// Terminal result for one account.
#[derive(Debug, Clone)]
pub struct FinalOutcome {
    pub status: RedemptionStatus,
    pub skip_reason: Option<&'static str>,
    pub learned: Option<LearnedRequirement>,
    /// Raw API string, kept for diagnostics when the status was unrecognized.
    pub raw: Option<String>,
}

impl FinalOutcome {
    fn of(status: RedemptionStatus) -> Self {
        Self {
            status,
            skip_reason: None,
            learned: None,
            raw: None,
        }
    }
}

/// What the worker does next.
#[derive(Debug, Clone)]
pub enum NextAction {
    Finish(FinalOutcome),
    BackoffThenRetry(Duration),
    /// Acquire a fresh session after the delay, then retry the attempt.
    ReloginThenRetry(Duration),
    /// Acquire a fresh session with a newly solved captcha after the delay,
    /// then retry the attempt.
    SolveCaptchaThenRetry(Duration),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_redemption_attempts: u32,
    max_login_attempts: u32,
    max_unknown_attempts: u32,
    retry_delay_base: Duration,
    max_login_delay: Duration,
    max_retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RedeemConfig) -> Self {
        Self {
            max_redemption_attempts: config.max_redemption_attempts,
            max_login_attempts: config.max_login_attempts,
            max_unknown_attempts: config.max_unknown_attempts,
            retry_delay_base: config.retry_delay_base,
            max_login_delay: config.max_login_delay,
            max_retry_delay: config.max_retry_delay,
        }
    }

    /// Linear backoff, capped: login retries and unknown statuses.
    fn linear_delay(&self, attempt: u32, cap: Duration) -> Duration {
        min(self.retry_delay_base * attempt.max(1), cap)
    }

    /// Exponential backoff with a ceiling: rate limits and infra errors.
    fn exponential_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        min(
            self.retry_delay_base.saturating_mul(1u32 << shift),
            self.max_retry_delay,
        )
    }

    /// Decide the next step after a classified API outcome. `counters` must
    /// already count the attempt that produced `outcome`.
    pub fn on_outcome(
        &self,
        outcome: &RawOutcome,
        account_level: i32,
        counters: &mut AttemptCounters,
    ) -> NextAction {
        match outcome {
            RawOutcome::Success => NextAction::Finish(FinalOutcome::of(RedemptionStatus::Success)),

            RawOutcome::AlreadyRedeemed | RawOutcome::SameTierClaimed => {
                NextAction::Finish(FinalOutcome::of(RedemptionStatus::AlreadyRedeemed))
            }

            // The code itself is dead; one attempt is all anyone gets.
            RawOutcome::InvalidCode
            | RawOutcome::Expired
            | RawOutcome::UsageLimit
            | RawOutcome::TimeWindowError => {
                NextAction::Finish(FinalOutcome::of(RedemptionStatus::Failed))
            }

            RawOutcome::VipRequired => NextAction::Finish(FinalOutcome {
                status: RedemptionStatus::Skipped,
                skip_reason: Some("vip_required"),
                learned: Some(LearnedRequirement::VipRequired),
                raw: None,
            }),

            RawOutcome::LevelRequired => NextAction::Finish(FinalOutcome {
                status: RedemptionStatus::Skipped,
                skip_reason: Some("level_too_low"),
                learned: Some(LearnedRequirement::MinLevelAbove(account_level)),
                raw: None,
            }),

            // A stale login is a property of the credential, not the code or
            // the account; the remedy is a fresh session, not waiting longer.
            RawOutcome::SessionExpired => {
                counters.relogins += 1;
                if counters.relogins > self.max_login_attempts
                    || counters.attempts >= self.max_redemption_attempts
                {
                    return NextAction::Finish(FinalOutcome::of(RedemptionStatus::Failed));
                }
                NextAction::ReloginThenRetry(
                    self.linear_delay(counters.relogins, self.max_login_delay),
                )
            }

            RawOutcome::RateLimited => {
                if counters.attempts >= self.max_redemption_attempts {
                    return NextAction::Finish(FinalOutcome::of(RedemptionStatus::Failed));
                }
                NextAction::BackoffThenRetry(self.exponential_delay(counters.attempts))
            }

            // A captcha rejection burns the token that was submitted with it;
            // resubmitting the same one can never succeed. The retry must
            // carry a freshly solved captcha.
            RawOutcome::CaptchaTransient => {
                if counters.attempts >= self.max_redemption_attempts {
                    return NextAction::Finish(FinalOutcome::of(RedemptionStatus::Failed));
                }
                NextAction::SolveCaptchaThenRetry(self.exponential_delay(counters.attempts))
            }

            RawOutcome::Unknown(raw) => {
                counters.unknown_attempts += 1;
                if counters.unknown_attempts >= self.max_unknown_attempts
                    || counters.attempts >= self.max_redemption_attempts
                {
                    return NextAction::Finish(FinalOutcome {
                        status: RedemptionStatus::Failed,
                        skip_reason: None,
                        learned: None,
                        raw: Some(raw.clone()),
                    });
                }
                NextAction::BackoffThenRetry(
                    self.linear_delay(counters.unknown_attempts, self.max_retry_delay),
                )
            }
        }
    }

    /// Transport-level failure (timeout, connection reset): retried like a
    /// rate limit, same ceiling.
    pub fn on_transport_error(&self, counters: &AttemptCounters) -> NextAction {
        if counters.attempts >= self.max_redemption_attempts {
            return NextAction::Finish(FinalOutcome::of(RedemptionStatus::Failed));
        }
        NextAction::BackoffThenRetry(self.exponential_delay(counters.attempts))
    }
}
