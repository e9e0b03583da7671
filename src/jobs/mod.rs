//! Periodic jobs.
//!
//! Every job is re-entrant: it re-reads state, works one workshop or
//! registration at a time, and leaves anything it could not finish for the
//! next run. Running a job twice back to back is always safe.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::{
    config::SchedulerConfig,
    error::{AppError, Result},
    service::ServiceContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobName {
    #[serde(rename = "topUpInvitations")]
    TopUpInvitations,
    #[serde(rename = "sweepExpiredSessions")]
    SweepExpiredSessions,
    #[serde(rename = "finalizeAttendance")]
    FinalizeAttendance,
    #[serde(rename = "issueOnboardingTokens")]
    IssueOnboardingTokens,
    #[serde(rename = "sendFollowUps")]
    SendFollowUps,
    #[serde(rename = "retryFailedRefunds")]
    RetryFailedRefunds,
}

impl JobName {
    pub const ALL: [JobName; 6] = [
        JobName::TopUpInvitations,
        JobName::SweepExpiredSessions,
        JobName::FinalizeAttendance,
        JobName::IssueOnboardingTokens,
        JobName::SendFollowUps,
        JobName::RetryFailedRefunds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::TopUpInvitations => "topUpInvitations",
            JobName::SweepExpiredSessions => "sweepExpiredSessions",
            JobName::FinalizeAttendance => "finalizeAttendance",
            JobName::IssueOnboardingTokens => "issueOnboardingTokens",
            JobName::SendFollowUps => "sendFollowUps",
            JobName::RetryFailedRefunds => "retryFailedRefunds",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|job| job.as_str() == s)
    }

    fn interval_secs(&self, config: &SchedulerConfig) -> u64 {
        match self {
            JobName::TopUpInvitations => config.top_up_interval_secs,
            JobName::SweepExpiredSessions => config.sweep_interval_secs,
            JobName::FinalizeAttendance => config.finalize_interval_secs,
            JobName::IssueOnboardingTokens => config.onboarding_interval_secs,
            JobName::SendFollowUps => config.follow_up_interval_secs,
            JobName::RetryFailedRefunds => config.refund_retry_interval_secs,
        }
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job: JobName,
    pub report: serde_json::Value,
}

fn to_report<T: Serialize>(report: &T) -> Result<serde_json::Value> {
    serde_json::to_value(report).map_err(|e| AppError::Internal(e.to_string()))
}

/// Runs one job to completion and returns its report.
pub async fn run_job(ctx: &ServiceContext, job: JobName) -> Result<JobRun> {
    let report = match job {
        JobName::TopUpInvitations => to_report(&ctx.invitation_service.top_up_all().await?)?,
        JobName::SweepExpiredSessions => to_report(&ctx.payment_sessions.sweep_expired().await?)?,
        JobName::FinalizeAttendance => to_report(&ctx.workshop_service.finalize_attendance().await?)?,
        JobName::IssueOnboardingTokens => to_report(&ctx.onboarding_service.issue_tokens().await?)?,
        JobName::SendFollowUps => to_report(&ctx.onboarding_service.send_follow_ups().await?)?,
        JobName::RetryFailedRefunds => to_report(&ctx.refund_service.retry_failed().await?)?,
    };

    tracing::debug!("Job {} finished: {}", job, report);
    Ok(JobRun { job, report })
}

/// Starts one tokio task per job, each on its own interval.
///
/// The first run happens one interval after startup. A run that overruns
/// its interval delays the next tick rather than stacking up.
pub fn spawn_scheduler(ctx: Arc<ServiceContext>, config: &SchedulerConfig) -> Vec<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("Scheduler disabled");
        return Vec::new();
    }

    JobName::ALL
        .into_iter()
        .map(|job| {
            let ctx = ctx.clone();
            let period = Duration::from_secs(job.interval_secs(config).max(1));

            tracing::info!("Scheduling {} every {}s", job, period.as_secs());
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    ticker.tick().await;
                    if let Err(e) = run_job(&ctx, job).await {
                        tracing::error!("Job {} failed: {}", job, e);
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names_round_trip() {
        for job in JobName::ALL {
            assert_eq!(JobName::from_str(job.as_str()), Some(job));
        }
        assert_eq!(JobName::from_str("dropTables"), None);
    }

    #[test]
    fn test_job_name_serializes_camel_case() {
        let value = serde_json::to_value(JobName::SweepExpiredSessions).unwrap();
        assert_eq!(value, serde_json::json!("sweepExpiredSessions"));
    }
}
