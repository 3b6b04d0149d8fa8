//! crates/checkin_core/src/memory.rs
//!
//! In-memory implementations of the store ports. All state sits behind one
//! mutex, so every ledger write judges and applies its row atomically.
//! Used by the test suites and for running the service without a database.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    ActiveChallenge, CalendarEntry, Challenge, CheckIn, CheckInKey, CheckInStatus, Member,
    MemberRole, Membership, NewChallenge, StatusCount, UpsertCheckIn, UpsertOutcome, User,
    UserCredentials,
};
use crate::join_code;
use crate::ledger::{normalized_screenshot, plan_write, LedgerError, LedgerResult, WritePlan};
use crate::ports::{
    AccountStore, BlobStore, ChallengeStore, CheckInLedger, Clock, MembershipStore, PortError,
    PortResult,
};

#[derive(Debug, Clone)]
struct StoredUser {
    email: Option<String>,
    hashed_password: Option<String>,
    display_name: String,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, StoredUser>,
    auth_sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    challenges: HashMap<Uuid, Challenge>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    check_ins: HashMap<CheckInKey, CheckIn>,
}

impl State {
    fn fresh_join_code(&self) -> PortResult<String> {
        (0..join_code::MAX_GENERATION_ATTEMPTS)
            .map(|_| join_code::generate())
            .find(|code| !self.challenges.values().any(|c| &c.join_code == code))
            .ok_or_else(|| PortError::Conflict("could not allocate a unique join code".to_string()))
    }
}

pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// Registers a user without credentials, for seeding members.
    pub fn add_user(&self, display_name: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.lock().users.insert(
            user_id,
            StoredUser {
                email: None,
                hashed_password: None,
                display_name: display_name.to_string(),
            },
        );
        user_id
    }

    /// Number of check-in rows stored for a challenge.
    pub fn check_in_count(&self, challenge_id: Uuid) -> usize {
        self.lock()
            .check_ins
            .values()
            .filter(|c| c.challenge_id == challenge_id)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

//=========================================================================================
// `CheckInLedger` Trait Implementation
//=========================================================================================

#[async_trait]
impl CheckInLedger for InMemoryStore {
    async fn upsert_check_in(&self, request: UpsertCheckIn) -> LedgerResult<UpsertOutcome> {
        let now = self.clock.now();
        let mut state = self.lock();

        let rules = state
            .challenges
            .get(&request.key.challenge_id)
            .map(Challenge::rules)
            .ok_or(LedgerError::ChallengeNotFound(request.key.challenge_id))?;

        let existing = state.check_ins.get(&request.key);
        let plan = plan_write(existing, &rules, &request, now)?;
        let screenshot_ref = normalized_screenshot(&request);

        let (record, replaced_screenshot) = match plan {
            WritePlan::Insert { locked } => {
                let record = CheckIn {
                    id: Uuid::new_v4(),
                    challenge_id: request.key.challenge_id,
                    user_id: request.key.user_id,
                    date: request.key.date,
                    status: request.status,
                    screenshot_ref,
                    locked,
                    source: request.source,
                    created_at: now,
                    updated_at: now,
                };
                (record, None)
            }
            WritePlan::Update {
                locked,
                replaced_screenshot,
                ..
            } => {
                let mut record = existing
                    .cloned()
                    .ok_or(LedgerError::WriteConflict)?;
                record.status = request.status;
                record.screenshot_ref = screenshot_ref;
                record.source = request.source;
                record.locked = locked;
                record.updated_at = now;
                (record, replaced_screenshot)
            }
        };

        state.check_ins.insert(request.key, record.clone());
        Ok(UpsertOutcome {
            record,
            replaced_screenshot,
        })
    }

    async fn get_check_in(&self, key: CheckInKey) -> PortResult<Option<CheckIn>> {
        Ok(self.lock().check_ins.get(&key).cloned())
    }

    async fn list_check_ins_for_date(
        &self,
        challenge_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Vec<CheckIn>> {
        let mut rows: Vec<CheckIn> = self
            .lock()
            .check_ins
            .values()
            .filter(|c| c.challenge_id == challenge_id && c.date == date)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.created_at);
        Ok(rows)
    }

    async fn status_counts(
        &self,
        challenge_id: Uuid,
        status: CheckInStatus,
    ) -> PortResult<Vec<StatusCount>> {
        let mut days: HashMap<Uuid, i64> = HashMap::new();
        for row in self.lock().check_ins.values() {
            if row.challenge_id == challenge_id && row.status == status {
                *days.entry(row.user_id).or_default() += 1;
            }
        }
        let mut counts: Vec<StatusCount> = days
            .into_iter()
            .map(|(user_id, days)| StatusCount { user_id, days })
            .collect();
        counts.sort_by(|a, b| b.days.cmp(&a.days).then(a.user_id.cmp(&b.user_id)));
        Ok(counts)
    }

    async fn user_calendar(
        &self,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<Vec<CalendarEntry>> {
        let mut entries: Vec<CalendarEntry> = self
            .lock()
            .check_ins
            .values()
            .filter(|c| c.challenge_id == challenge_id && c.user_id == user_id)
            .map(|c| CalendarEntry {
                date: c.date,
                status: c.status,
            })
            .collect();
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }
}

//=========================================================================================
// `ChallengeStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChallengeStore for InMemoryStore {
    async fn create_challenge(&self, creator_id: Uuid, new: NewChallenge) -> PortResult<Challenge> {
        if new.start_date > new.end_date {
            return Err(PortError::Invalid(
                "start date must not be after end date".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut state = self.lock();
        let challenge = Challenge {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            start_date: new.start_date,
            end_date: new.end_date,
            checkin_time: new.checkin_time,
            screenshot_required: new.screenshot_required,
            stake: new.stake,
            stake_rule: new.stake_rule,
            join_code: state.fresh_join_code()?,
            creator_id,
            created_at: now,
        };

        state.challenges.insert(challenge.id, challenge.clone());
        state.memberships.insert(
            (challenge.id, creator_id),
            Membership {
                challenge_id: challenge.id,
                user_id: creator_id,
                role: MemberRole::Creator,
                joined_at: now,
            },
        );
        Ok(challenge)
    }

    async fn get_challenge(&self, challenge_id: Uuid) -> PortResult<Challenge> {
        self.lock()
            .challenges
            .get(&challenge_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Challenge {} not found", challenge_id)))
    }

    async fn get_challenge_by_join_code(&self, code: &str) -> PortResult<Challenge> {
        let code = join_code::normalize(code);
        self.lock()
            .challenges
            .values()
            .find(|c| c.join_code == code)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("No challenge with join code {}", code)))
    }

    async fn list_for_user(&self, user_id: Uuid) -> PortResult<Vec<Challenge>> {
        let state = self.lock();
        let mut challenges: Vec<Challenge> = state
            .challenges
            .values()
            .filter(|c| {
                c.creator_id == user_id || state.memberships.contains_key(&(c.id, user_id))
            })
            .cloned()
            .collect();
        challenges.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(challenges)
    }

    async fn list_active_challenges(&self, today: NaiveDate) -> PortResult<Vec<ActiveChallenge>> {
        Ok(self
            .lock()
            .challenges
            .values()
            .filter(|c| c.start_date <= today && today <= c.end_date)
            .map(ActiveChallenge::from)
            .collect())
    }

    async fn list_challenges_ending_on(&self, date: NaiveDate) -> PortResult<Vec<ActiveChallenge>> {
        Ok(self
            .lock()
            .challenges
            .values()
            .filter(|c| c.end_date == date)
            .map(ActiveChallenge::from)
            .collect())
    }

    async fn rotate_join_code(&self, challenge_id: Uuid, requested_by: Uuid) -> PortResult<String> {
        let mut state = self.lock();
        let code = state.fresh_join_code()?;
        let challenge = state
            .challenges
            .get_mut(&challenge_id)
            .ok_or_else(|| PortError::NotFound(format!("Challenge {} not found", challenge_id)))?;
        if challenge.creator_id != requested_by {
            return Err(PortError::Forbidden(
                "only the creator can rotate the join code".to_string(),
            ));
        }
        challenge.join_code = code.clone();
        Ok(code)
    }

    async fn delete_challenge(&self, challenge_id: Uuid, requested_by: Uuid) -> PortResult<()> {
        let mut state = self.lock();
        let challenge = state
            .challenges
            .get(&challenge_id)
            .ok_or_else(|| PortError::NotFound(format!("Challenge {} not found", challenge_id)))?;
        if challenge.creator_id != requested_by {
            return Err(PortError::Forbidden(
                "only the creator can delete a challenge".to_string(),
            ));
        }
        state.challenges.remove(&challenge_id);
        state.memberships.retain(|(c, _), _| *c != challenge_id);
        state.check_ins.retain(|key, _| key.challenge_id != challenge_id);
        Ok(())
    }
}

//=========================================================================================
// `MembershipStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn join_challenge(&self, challenge_id: Uuid, user_id: Uuid) -> PortResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.challenges.contains_key(&challenge_id) {
            return Err(PortError::NotFound(format!(
                "Challenge {} not found",
                challenge_id
            )));
        }
        state
            .memberships
            .entry((challenge_id, user_id))
            .or_insert(Membership {
                challenge_id,
                user_id,
                role: MemberRole::Member,
                joined_at: now,
            });
        Ok(())
    }

    async fn list_members(&self, challenge_id: Uuid) -> PortResult<Vec<Member>> {
        let state = self.lock();
        let mut memberships: Vec<&Membership> = state
            .memberships
            .values()
            .filter(|m| m.challenge_id == challenge_id)
            .collect();
        memberships.sort_by_key(|m| m.joined_at);
        Ok(memberships
            .into_iter()
            .map(|m| Member {
                user_id: m.user_id,
                display_name: state
                    .users
                    .get(&m.user_id)
                    .map(|u| u.display_name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect())
    }

    async fn is_member(&self, challenge_id: Uuid, user_id: Uuid) -> PortResult<bool> {
        Ok(self
            .lock()
            .memberships
            .contains_key(&(challenge_id, user_id)))
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        display_name: &str,
    ) -> PortResult<User> {
        let mut state = self.lock();
        let taken = state
            .users
            .values()
            .any(|u| u.email.as_deref() == Some(email));
        if taken {
            return Err(PortError::Conflict(format!("Email {} already registered", email)));
        }
        let user_id = Uuid::new_v4();
        state.users.insert(
            user_id,
            StoredUser {
                email: Some(email.to_string()),
                hashed_password: Some(hashed_password.to_string()),
                display_name: display_name.to_string(),
            },
        );
        Ok(User {
            user_id,
            email: Some(email.to_string()),
            display_name: display_name.to_string(),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.lock()
            .users
            .iter()
            .find_map(|(id, u)| match (&u.email, &u.hashed_password) {
                (Some(e), Some(hash)) if e == email => Some(UserCredentials {
                    user_id: *id,
                    email: e.clone(),
                    hashed_password: hash.clone(),
                }),
                _ => None,
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.lock()
            .auth_sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let now = self.clock.now();
        match self.lock().auth_sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > now => Ok(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.lock().auth_sessions.remove(session_id);
        Ok(())
    }
}

//=========================================================================================
// Blob store
//=========================================================================================

/// Keeps uploaded objects in a map; signed URLs are plain `memory://` links.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, blob_ref: &str) -> bool {
        self.lock().contains_key(blob_ref)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> PortResult<String> {
        let mut objects = self.lock();
        if objects.contains_key(path) {
            return Err(PortError::Conflict(format!("Object {} already exists", path)));
        }
        objects.insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    async fn delete(&self, blob_ref: &str) -> PortResult<()> {
        self.lock()
            .remove(blob_ref)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Object {} not found", blob_ref)))
    }

    async fn signed_url(&self, blob_ref: &str, ttl: Duration) -> PortResult<String> {
        if !self.contains(blob_ref) {
            return Err(PortError::NotFound(format!("Object {} not found", blob_ref)));
        }
        Ok(format!("memory://{}?ttl={}", blob_ref, ttl.as_secs()))
    }
}
