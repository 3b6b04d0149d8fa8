//! Shared fixtures for the core integration tests.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use checkin_core::memory::{InMemoryBlobStore, InMemoryStore};
use checkin_core::{
    Challenge, ChallengeStore, CheckInSubmitter, DeadlineEvaluator, FixedClock, MembershipStore,
    NewChallenge, Stake, StakeRule,
};

pub fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub struct Fixture {
    pub clock: Arc<FixedClock>,
    pub store: Arc<InMemoryStore>,
    pub blobs: Arc<InMemoryBlobStore>,
}

impl Fixture {
    pub fn new(now: &str) -> Self {
        let clock = Arc::new(FixedClock::new(at(now)));
        Self {
            store: Arc::new(InMemoryStore::new(clock.clone())),
            blobs: Arc::new(InMemoryBlobStore::new()),
            clock,
        }
    }

    /// A January 2024 challenge with a 22:00 UTC deadline, created by a fresh user.
    pub async fn challenge(&self, screenshot_required: bool) -> (Challenge, Uuid) {
        self.challenge_spanning("2024-01-01", "2024-01-31", screenshot_required)
            .await
    }

    pub async fn challenge_spanning(
        &self,
        start: &str,
        end: &str,
        screenshot_required: bool,
    ) -> (Challenge, Uuid) {
        let creator = self.store.add_user("Creator");
        let challenge = self
            .store
            .create_challenge(
                creator,
                NewChallenge {
                    title: "Run every day".to_string(),
                    description: None,
                    start_date: date(start),
                    end_date: date(end),
                    checkin_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                    screenshot_required,
                    stake: Stake::default(),
                    stake_rule: StakeRule::PerMissedDay,
                },
            )
            .await
            .unwrap();
        (challenge, creator)
    }

    pub async fn member(&self, challenge_id: Uuid, name: &str) -> Uuid {
        let user_id = self.store.add_user(name);
        self.store.join_challenge(challenge_id, user_id).await.unwrap();
        user_id
    }

    pub fn submitter(&self) -> CheckInSubmitter {
        CheckInSubmitter::new(
            self.store.clone(),
            self.store.clone(),
            self.blobs.clone(),
            self.clock.clone(),
        )
    }

    pub fn evaluator(&self) -> DeadlineEvaluator {
        DeadlineEvaluator::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.blobs.clone(),
            self.clock.clone(),
        )
    }
}
