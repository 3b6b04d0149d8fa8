//! crates/checkin_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete datastore, blob store and identity provider.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    ActiveChallenge, CalendarEntry, Challenge, CheckIn, CheckInKey, CheckInStatus, Member,
    NewChallenge, StatusCount, UpsertCheckIn, UpsertOutcome, User, UserCredentials,
};
use crate::ledger::LedgerResult;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, storage).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Clock
//=========================================================================================

/// The source of "now" for deadline decisions and row timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The authoritative store of check-in rows. Every mutation goes through `upsert_check_in`.
#[async_trait]
pub trait CheckInLedger: Send + Sync {
    /// Applies the write contract atomically for the request's key.
    async fn upsert_check_in(&self, request: UpsertCheckIn) -> LedgerResult<UpsertOutcome>;

    async fn get_check_in(&self, key: CheckInKey) -> PortResult<Option<CheckIn>>;

    async fn list_check_ins_for_date(
        &self,
        challenge_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Vec<CheckIn>>;

    async fn status_counts(
        &self,
        challenge_id: Uuid,
        status: CheckInStatus,
    ) -> PortResult<Vec<StatusCount>>;

    async fn user_calendar(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Vec<CalendarEntry>>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Creates the challenge and the creator's membership together.
    async fn create_challenge(&self, creator_id: Uuid, new: NewChallenge) -> PortResult<Challenge>;

    async fn get_challenge(&self, challenge_id: Uuid) -> PortResult<Challenge>;

    async fn get_challenge_by_join_code(&self, join_code: &str) -> PortResult<Challenge>;

    /// Challenges the user created or joined, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> PortResult<Vec<Challenge>>;

    /// Challenges with `start_date <= today <= end_date`.
    async fn list_active_challenges(&self, today: NaiveDate) -> PortResult<Vec<ActiveChallenge>>;

    async fn list_challenges_ending_on(&self, date: NaiveDate) -> PortResult<Vec<ActiveChallenge>>;

    /// Issues a fresh join code. Only the creator may rotate.
    async fn rotate_join_code(&self, challenge_id: Uuid, requested_by: Uuid) -> PortResult<String>;

    /// Deletes the challenge with its memberships and check-ins. Only the creator may delete.
    async fn delete_challenge(&self, challenge_id: Uuid, requested_by: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Adds the user as a `member`. Joining twice is a no-op.
    async fn join_challenge(&self, challenge_id: Uuid, user_id: Uuid) -> PortResult<()>;

    async fn list_members(&self, challenge_id: Uuid) -> PortResult<Vec<Member>>;

    async fn is_member(&self, challenge_id: Uuid, user_id: Uuid) -> PortResult<bool>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes under `path` and returns the reference to persist.
    async fn upload(&self, path: &str, bytes: &[u8]) -> PortResult<String>;

    async fn delete(&self, blob_ref: &str) -> PortResult<()>;

    /// A time-limited URL for reading the object.
    async fn signed_url(&self, blob_ref: &str, ttl: Duration) -> PortResult<String>;
}

/// The identity provider: accounts and browser sessions.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        display_name: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}
