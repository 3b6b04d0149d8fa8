//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! store ports from the `core` crate. It handles all interactions with the
//! PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use checkin_core::domain::{
    ActiveChallenge, CalendarEntry, Challenge, ChallengeRules, CheckIn, CheckInKey,
    CheckInStatus, Member, NewChallenge, Stake, StatusCount, UpsertCheckIn, UpsertOutcome, User,
    UserCredentials,
};
use checkin_core::join_code;
use checkin_core::ledger::{
    normalized_screenshot, plan_write, LedgerError, LedgerResult, WritePlan,
};
use checkin_core::ports::{
    AccountStore, ChallengeStore, CheckInLedger, Clock, MembershipStore, PortError, PortResult,
};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the store ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Decides what a writer that lost the insert race observes.
    async fn classify_lost_insert(&self, key: CheckInKey) -> LedgerError {
        match self.get_check_in(key).await {
            Ok(Some(row)) if row.locked => LedgerError::CheckinLockedFinal,
            Ok(_) => LedgerError::WriteConflict,
            Err(e) => LedgerError::Port(e),
        }
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn corrupt(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(format!("corrupt row: {}", e))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const CHECK_IN_COLUMNS: &str = "id, challenge_id, user_id, date, status, screenshot_ref, locked, source, created_at, updated_at";

const CHALLENGE_COLUMNS: &str = "id, title, description, start_date, end_date, checkin_time, screenshot_required, stake_description, stake_amount, stake_unit, stake_rule, join_code, creator_id, created_at";

#[derive(FromRow)]
struct CheckInRecord {
    id: Uuid,
    challenge_id: Uuid,
    user_id: Uuid,
    date: NaiveDate,
    status: String,
    screenshot_ref: Option<String>,
    locked: bool,
    source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl CheckInRecord {
    fn to_domain(self) -> PortResult<CheckIn> {
        Ok(CheckIn {
            id: self.id,
            challenge_id: self.challenge_id,
            user_id: self.user_id,
            date: self.date,
            status: self.status.parse().map_err(corrupt)?,
            screenshot_ref: self.screenshot_ref,
            locked: self.locked,
            source: self.source.parse().map_err(corrupt)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ChallengeRecord {
    id: Uuid,
    title: String,
    description: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    checkin_time: NaiveTime,
    screenshot_required: bool,
    stake_description: Option<String>,
    stake_amount: Option<i64>,
    stake_unit: Option<String>,
    stake_rule: String,
    join_code: String,
    creator_id: Uuid,
    created_at: DateTime<Utc>,
}
impl ChallengeRecord {
    fn to_domain(self) -> PortResult<Challenge> {
        Ok(Challenge {
            id: self.id,
            title: self.title,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            checkin_time: self.checkin_time,
            screenshot_required: self.screenshot_required,
            stake: Stake {
                description: self.stake_description,
                amount: self.stake_amount,
                unit: self.stake_unit,
            },
            stake_rule: self.stake_rule.parse().map_err(corrupt)?,
            join_code: self.join_code,
            creator_id: self.creator_id,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ActiveChallengeRecord {
    id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
    checkin_time: NaiveTime,
}
impl ActiveChallengeRecord {
    fn to_domain(self) -> ActiveChallenge {
        ActiveChallenge {
            id: self.id,
            start_date: self.start_date,
            end_date: self.end_date,
            checkin_time: self.checkin_time,
        }
    }
}

#[derive(FromRow)]
struct RulesRecord {
    start_date: NaiveDate,
    end_date: NaiveDate,
    checkin_time: NaiveTime,
    screenshot_required: bool,
}

#[derive(FromRow)]
struct MemberRecord {
    user_id: Uuid,
    display_name: String,
}

#[derive(FromRow)]
struct CountRecord {
    user_id: Uuid,
    days: i64,
}

#[derive(FromRow)]
struct CalendarRecord {
    date: NaiveDate,
    status: String,
}

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: Option<String>,
    display_name: String,
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}

//=========================================================================================
// `CheckInLedger` Trait Implementation
//=========================================================================================

#[async_trait]
impl CheckInLedger for DbAdapter {
    async fn upsert_check_in(&self, request: UpsertCheckIn) -> LedgerResult<UpsertOutcome> {
        let key = request.key;
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let rules = sqlx::query_as::<_, RulesRecord>(
            "SELECT start_date, end_date, checkin_time, screenshot_required \
             FROM challenges WHERE id = $1 FOR SHARE",
        )
        .bind(key.challenge_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .map(|r| ChallengeRules {
            start_date: r.start_date,
            end_date: r.end_date,
            checkin_time: r.checkin_time,
            screenshot_required: r.screenshot_required,
        })
        .ok_or(LedgerError::ChallengeNotFound(key.challenge_id))?;

        // Row lock on the key; concurrent writers to an existing row queue here.
        let existing = sqlx::query_as::<_, CheckInRecord>(&format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins \
             WHERE challenge_id = $1 AND user_id = $2 AND date = $3 FOR UPDATE"
        ))
        .bind(key.challenge_id)
        .bind(key.user_id)
        .bind(key.date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .map(CheckInRecord::to_domain)
        .transpose()?;

        let plan = plan_write(existing.as_ref(), &rules, &request, now)?;
        let screenshot_ref = normalized_screenshot(&request);

        let (record, replaced_screenshot) = match plan {
            WritePlan::Insert { locked } => {
                let inserted = sqlx::query_as::<_, CheckInRecord>(&format!(
                    "INSERT INTO check_ins ({CHECK_IN_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
                     ON CONFLICT (challenge_id, user_id, date) DO NOTHING \
                     RETURNING {CHECK_IN_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(key.challenge_id)
                .bind(key.user_id)
                .bind(key.date)
                .bind(request.status.as_str())
                .bind(&screenshot_ref)
                .bind(locked)
                .bind(request.source.as_str())
                .bind(now)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;

                match inserted {
                    Some(row) => (row.to_domain()?, None),
                    None => {
                        tx.rollback().await.map_err(unexpected)?;
                        return Err(self.classify_lost_insert(key).await);
                    }
                }
            }
            WritePlan::Update {
                id,
                locked,
                replaced_screenshot,
            } => {
                let updated = sqlx::query_as::<_, CheckInRecord>(&format!(
                    "UPDATE check_ins \
                     SET status = $2, screenshot_ref = $3, source = $4, locked = $5, updated_at = $6 \
                     WHERE id = $1 AND locked = FALSE \
                     RETURNING {CHECK_IN_COLUMNS}"
                ))
                .bind(id)
                .bind(request.status.as_str())
                .bind(&screenshot_ref)
                .bind(request.source.as_str())
                .bind(locked)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;

                match updated {
                    Some(row) => (row.to_domain()?, replaced_screenshot),
                    None => return Err(LedgerError::CheckinLockedFinal),
                }
            }
        };

        tx.commit().await.map_err(unexpected)?;
        Ok(UpsertOutcome {
            record,
            replaced_screenshot,
        })
    }

    async fn get_check_in(&self, key: CheckInKey) -> PortResult<Option<CheckIn>> {
        sqlx::query_as::<_, CheckInRecord>(&format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins \
             WHERE challenge_id = $1 AND user_id = $2 AND date = $3"
        ))
        .bind(key.challenge_id)
        .bind(key.user_id)
        .bind(key.date)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(CheckInRecord::to_domain)
        .transpose()
    }

    async fn list_check_ins_for_date(
        &self,
        challenge_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Vec<CheckIn>> {
        let records = sqlx::query_as::<_, CheckInRecord>(&format!(
            "SELECT {CHECK_IN_COLUMNS} FROM check_ins \
             WHERE challenge_id = $1 AND date = $2 ORDER BY created_at ASC"
        ))
        .bind(challenge_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(CheckInRecord::to_domain).collect()
    }

    async fn status_counts(
        &self,
        challenge_id: Uuid,
        status: CheckInStatus,
    ) -> PortResult<Vec<StatusCount>> {
        let records = sqlx::query_as::<_, CountRecord>(
            "SELECT user_id, COUNT(*)::BIGINT AS days FROM check_ins \
             WHERE challenge_id = $1 AND status = $2 \
             GROUP BY user_id ORDER BY days DESC, user_id ASC",
        )
        .bind(challenge_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|r| StatusCount {
                user_id: r.user_id,
                days: r.days,
            })
            .collect())
    }

    async fn user_calendar(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Vec<CalendarEntry>> {
        let records = sqlx::query_as::<_, CalendarRecord>(
            "SELECT date, status FROM check_ins \
             WHERE challenge_id = $1 AND user_id = $2 ORDER BY date ASC",
        )
        .bind(challenge_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records
            .into_iter()
            .map(|r| {
                Ok(CalendarEntry {
                    date: r.date,
                    status: r.status.parse().map_err(corrupt)?,
                })
            })
            .collect()
    }
}

//=========================================================================================
// `ChallengeStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChallengeStore for DbAdapter {
    async fn create_challenge(&self, creator_id: Uuid, new: NewChallenge) -> PortResult<Challenge> {
        if new.start_date > new.end_date {
            return Err(PortError::Invalid(
                "start date must not be after end date".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let mut created = None;
        for _ in 0..join_code::MAX_GENERATION_ATTEMPTS {
            let record = sqlx::query_as::<_, ChallengeRecord>(&format!(
                "INSERT INTO challenges ({CHALLENGE_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                 ON CONFLICT (join_code) DO NOTHING \
                 RETURNING {CHALLENGE_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(&new.title)
            .bind(&new.description)
            .bind(new.start_date)
            .bind(new.end_date)
            .bind(new.checkin_time)
            .bind(new.screenshot_required)
            .bind(&new.stake.description)
            .bind(new.stake.amount)
            .bind(&new.stake.unit)
            .bind(new.stake_rule.as_str())
            .bind(join_code::generate())
            .bind(creator_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?;

            if record.is_some() {
                created = record;
                break;
            }
            warn!("Join code collision, generating another");
        }

        let challenge = created
            .ok_or_else(|| PortError::Conflict("could not allocate a unique join code".to_string()))?
            .to_domain()?;

        sqlx::query(
            "INSERT INTO challenge_members (challenge_id, user_id, role, joined_at) \
             VALUES ($1, $2, 'creator', $3)",
        )
        .bind(challenge.id)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(challenge)
    }

    async fn get_challenge(&self, challenge_id: Uuid) -> PortResult<Challenge> {
        sqlx::query_as::<_, ChallengeRecord>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = $1"
        ))
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Challenge {} not found", challenge_id)))?
        .to_domain()
    }

    async fn get_challenge_by_join_code(&self, code: &str) -> PortResult<Challenge> {
        let code = join_code::normalize(code);
        sqlx::query_as::<_, ChallengeRecord>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE join_code = $1"
        ))
        .bind(&code)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("No challenge with join code {}", code)))?
        .to_domain()
    }

    async fn list_for_user(&self, user_id: Uuid) -> PortResult<Vec<Challenge>> {
        let records = sqlx::query_as::<_, ChallengeRecord>(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges c \
             WHERE c.creator_id = $1 \
                OR EXISTS (SELECT 1 FROM challenge_members m \
                           WHERE m.challenge_id = c.id AND m.user_id = $1) \
             ORDER BY c.created_at DESC, c.id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(ChallengeRecord::to_domain).collect()
    }

    async fn list_active_challenges(&self, today: NaiveDate) -> PortResult<Vec<ActiveChallenge>> {
        let records = sqlx::query_as::<_, ActiveChallengeRecord>(
            "SELECT id, start_date, end_date, checkin_time FROM challenges \
             WHERE start_date <= $1 AND end_date >= $1",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(ActiveChallengeRecord::to_domain).collect())
    }

    async fn list_challenges_ending_on(&self, date: NaiveDate) -> PortResult<Vec<ActiveChallenge>> {
        let records = sqlx::query_as::<_, ActiveChallengeRecord>(
            "SELECT id, start_date, end_date, checkin_time FROM challenges WHERE end_date = $1",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(ActiveChallengeRecord::to_domain).collect())
    }

    async fn rotate_join_code(&self, challenge_id: Uuid, requested_by: Uuid) -> PortResult<String> {
        let challenge = self.get_challenge(challenge_id).await?;
        if challenge.creator_id != requested_by {
            return Err(PortError::Forbidden(
                "only the creator can rotate the join code".to_string(),
            ));
        }

        for _ in 0..join_code::MAX_GENERATION_ATTEMPTS {
            let code = join_code::generate();
            let taken: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM challenges WHERE join_code = $1")
                    .bind(&code)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(unexpected)?;
            if taken.is_some() {
                continue;
            }

            let result = sqlx::query("UPDATE challenges SET join_code = $2 WHERE id = $1")
                .bind(challenge_id)
                .bind(&code)
                .execute(&self.pool)
                .await;
            match result {
                Ok(_) => return Ok(code),
                // Lost a race for the same code; try another.
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(unexpected(e)),
            }
        }

        Err(PortError::Conflict(
            "could not allocate a unique join code".to_string(),
        ))
    }

    async fn delete_challenge(&self, challenge_id: Uuid, requested_by: Uuid) -> PortResult<()> {
        let challenge = self.get_challenge(challenge_id).await?;
        if challenge.creator_id != requested_by {
            return Err(PortError::Forbidden(
                "only the creator can delete a challenge".to_string(),
            ));
        }

        // Memberships and check-ins go with it via ON DELETE CASCADE.
        sqlx::query("DELETE FROM challenges WHERE id = $1 AND creator_id = $2")
            .bind(challenge_id)
            .bind(requested_by)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

/// Whether a database error carries the given SQLSTATE.
fn has_code(e: &sqlx::Error, sqlstate: &str) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == sqlstate)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    has_code(e, "23505")
}

//=========================================================================================
// `MembershipStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MembershipStore for DbAdapter {
    async fn join_challenge(&self, challenge_id: Uuid, user_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO challenge_members (challenge_id, user_id, role, joined_at) \
             VALUES ($1, $2, 'member', $3) \
             ON CONFLICT (challenge_id, user_id) DO NOTHING",
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if has_code(&e, "23503") {
                PortError::NotFound(format!("Challenge {} not found", challenge_id))
            } else {
                unexpected(e)
            }
        })?;
        Ok(())
    }

    async fn list_members(&self, challenge_id: Uuid) -> PortResult<Vec<Member>> {
        let records = sqlx::query_as::<_, MemberRecord>(
            "SELECT m.user_id, COALESCE(u.display_name, 'Unknown') AS display_name \
             FROM challenge_members m LEFT JOIN users u ON u.user_id = m.user_id \
             WHERE m.challenge_id = $1 ORDER BY m.joined_at ASC",
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|r| Member {
                user_id: r.user_id,
                display_name: r.display_name,
            })
            .collect())
    }

    async fn is_member(&self, challenge_id: Uuid, user_id: Uuid) -> PortResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM challenge_members WHERE challenge_id = $1 AND user_id = $2)",
        )
        .bind(challenge_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(exists)
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        display_name: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (email, hashed_password, display_name) VALUES ($1, $2, $3) \
             RETURNING user_id, email, display_name",
        )
        .bind(email)
        .bind(hashed_password)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("Email {} already registered", email))
            } else {
                unexpected(e)
            }
        })?;

        Ok(User {
            user_id: record.user_id,
            email: record.email,
            display_name: record.display_name,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users \
             WHERE email = $1 AND hashed_password IS NOT NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;

        Ok(UserCredentials {
            user_id: record.user_id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > $2")
                .bind(session_id)
                .bind(self.clock.now())
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
