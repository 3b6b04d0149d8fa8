//! crates/checkin_core/src/evaluator.rs
//!
//! The deadline evaluator: a stateless pass that finalizes one calendar date per
//! running challenge by writing locked `fail` rows for members without a timely
//! success. Safe to run repeatedly and off-schedule; the ledger's lock guard makes
//! a second pass over the same date a no-op.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::deadline::{evaluation_date, is_timely_success};
use crate::domain::{
    ActiveChallenge, CheckInKey, EvaluationRun, Member, PassSummary, UpsertCheckIn,
};
use crate::ledger::{LedgerError, LedgerResult};
use crate::ports::{BlobStore, ChallengeStore, CheckInLedger, Clock, MembershipStore, PortError};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("challenge lookup failed: {0}")]
    ChallengeLookupFailed(#[source] PortError),

    #[error("membership lookup failed for challenge {challenge_id}: {source}")]
    MembershipLookupFailed {
        challenge_id: Uuid,
        #[source]
        source: PortError,
    },
}

/// What happened to one member during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberOutcome {
    TimelySuccess,
    AlreadyFinal,
    FailRecorded,
}

pub struct DeadlineEvaluator {
    challenges: Arc<dyn ChallengeStore>,
    members: Arc<dyn MembershipStore>,
    ledger: Arc<dyn CheckInLedger>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
}

impl DeadlineEvaluator {
    pub fn new(
        challenges: Arc<dyn ChallengeStore>,
        members: Arc<dyn MembershipStore>,
        ledger: Arc<dyn CheckInLedger>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            challenges,
            members,
            ledger,
            blobs,
            clock,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// How many challenges are evaluated at once. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs one pass over every running challenge.
    ///
    /// Only a failure to list challenges aborts the pass; everything below that
    /// is logged, counted and skipped.
    pub async fn run_pass(&self) -> Result<PassSummary, EvaluatorError> {
        let started = Instant::now();
        let now = self.clock.now();
        info!(%now, "Deadline evaluation pass started");

        let challenges = self.discover(now).await?;
        info!(count = challenges.len(), "Found running challenges");

        let pending: Vec<_> = challenges
            .iter()
            .map(|challenge| self.evaluate_challenge(challenge, now))
            .collect();
        let runs: Vec<EvaluationRun> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let total_fails_created = runs.iter().map(|r| r.fails_created).sum();
        let errors = runs.iter().map(|r| r.errors).sum();
        let summary = PassSummary {
            started_at: now,
            runs,
            total_fails_created,
            errors,
            duration: started.elapsed(),
        };

        info!(
            challenges = summary.runs.len(),
            fails_created = summary.total_fails_created,
            errors = summary.errors,
            duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "Deadline evaluation pass completed"
        );
        Ok(summary)
    }

    /// Challenges running today, plus those whose last day was yesterday so a
    /// final deadline crossed after the last same-day run still gets finalized.
    async fn discover(&self, now: DateTime<Utc>) -> Result<Vec<ActiveChallenge>, EvaluatorError> {
        let today = now.date_naive();
        let mut challenges = self
            .challenges
            .list_active_challenges(today)
            .await
            .map_err(EvaluatorError::ChallengeLookupFailed)?;

        if let Some(yesterday) = today.pred_opt() {
            let ended = self
                .challenges
                .list_challenges_ending_on(yesterday)
                .await
                .map_err(EvaluatorError::ChallengeLookupFailed)?;
            let seen: HashSet<Uuid> = challenges.iter().map(|c| c.id).collect();
            challenges.extend(ended.into_iter().filter(|c| !seen.contains(&c.id)));
        }

        Ok(challenges)
    }

    async fn evaluate_challenge(
        &self,
        challenge: &ActiveChallenge,
        now: DateTime<Utc>,
    ) -> EvaluationRun {
        let mut run = EvaluationRun::skipped(challenge.id);

        let Some(date) = evaluation_date(
            now,
            challenge.start_date,
            challenge.end_date,
            challenge.checkin_time,
        ) else {
            debug!(challenge_id = %challenge.id, "No date due for evaluation, skipping");
            return run;
        };
        run.evaluation_date = Some(date);

        let members = match self.members.list_members(challenge.id).await {
            Ok(members) => members,
            Err(source) => {
                let err = EvaluatorError::MembershipLookupFailed {
                    challenge_id: challenge.id,
                    source,
                };
                error!(challenge_id = %challenge.id, %date, "{}", err);
                run.errors += 1;
                return run;
            }
        };

        for member in &members {
            run.members_processed += 1;
            match self.evaluate_member(challenge, member, date).await {
                Ok(MemberOutcome::TimelySuccess) => {}
                Ok(MemberOutcome::AlreadyFinal) => run.already_final += 1,
                Ok(MemberOutcome::FailRecorded) => {
                    info!(
                        challenge_id = %challenge.id,
                        user_id = %member.user_id,
                        user_name = %member.display_name,
                        %date,
                        "Recorded automatic fail"
                    );
                    run.fails_created += 1;
                }
                Err(e) => {
                    error!(
                        challenge_id = %challenge.id,
                        user_id = %member.user_id,
                        %date,
                        code = e.code(),
                        "Failed to evaluate member: {}",
                        e
                    );
                    run.errors += 1;
                }
            }
        }

        info!(
            challenge_id = %challenge.id,
            %date,
            members = run.members_processed,
            fails_created = run.fails_created,
            already_final = run.already_final,
            "Challenge evaluated"
        );
        run
    }

    async fn evaluate_member(
        &self,
        challenge: &ActiveChallenge,
        member: &Member,
        date: chrono::NaiveDate,
    ) -> LedgerResult<MemberOutcome> {
        let key = CheckInKey {
            challenge_id: challenge.id,
            user_id: member.user_id,
            date,
        };

        match self.ledger.get_check_in(key).await? {
            Some(row) if row.locked => return Ok(MemberOutcome::AlreadyFinal),
            Some(row) if is_timely_success(&row, challenge.checkin_time) => {
                return Ok(MemberOutcome::TimelySuccess)
            }
            _ => {}
        }

        match self.ledger.upsert_check_in(UpsertCheckIn::system_fail(key)).await {
            Ok(outcome) => {
                if let Some(old) = outcome.replaced_screenshot {
                    if let Err(e) = self.blobs.delete(&old).await {
                        warn!(blob_ref = %old, "Failed to remove replaced proof: {}", e);
                    }
                }
                Ok(MemberOutcome::FailRecorded)
            }
            // A concurrent pass finalized the row between our read and write.
            Err(LedgerError::CheckinLockedFinal) => {
                debug!(challenge_id = %challenge.id, user_id = %member.user_id, %date, "Row already final");
                Ok(MemberOutcome::AlreadyFinal)
            }
            Err(e) => Err(e),
        }
    }
}
