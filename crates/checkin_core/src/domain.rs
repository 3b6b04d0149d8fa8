//! crates/checkin_core/src/domain.rs
//!
//! Defines the pure, core data structures for the check-in ledger.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// Enumerations and their storage names
//=========================================================================================

/// Returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// The outcome a participant records for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckInStatus {
    Success,
    Fail,
}

impl CheckInStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInStatus::Success => "success",
            CheckInStatus::Fail => "fail",
        }
    }
}

impl FromStr for CheckInStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CheckInStatus::Success),
            "fail" => Ok(CheckInStatus::Fail),
            other => Err(ParseEnumError::new("check-in status", other)),
        }
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote a check-in row. Set only by trusted server-side callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckInSource {
    User,
    SystemCron,
    Admin,
}

impl CheckInSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInSource::User => "user",
            CheckInSource::SystemCron => "system_cron",
            CheckInSource::Admin => "admin",
        }
    }
}

impl FromStr for CheckInSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(CheckInSource::User),
            "system_cron" => Ok(CheckInSource::SystemCron),
            "admin" => Ok(CheckInSource::Admin),
            other => Err(ParseEnumError::new("check-in source", other)),
        }
    }
}

impl fmt::Display for CheckInSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the stake is settled once a challenge ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeRule {
    PerMissedDay,
    OverallFail,
}

impl StakeRule {
    pub fn as_str(self) -> &'static str {
        match self {
            StakeRule::PerMissedDay => "per_missed_day",
            StakeRule::OverallFail => "overall_fail",
        }
    }
}

impl FromStr for StakeRule {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the hyphenated product spelling as well as the storage name.
        match s {
            "per_missed_day" | "per-missed-day" => Ok(StakeRule::PerMissedDay),
            "overall_fail" | "overall-fail" => Ok(StakeRule::OverallFail),
            other => Err(ParseEnumError::new("stake rule", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Creator,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Creator => "creator",
            MemberRole::Member => "member",
        }
    }
}

impl FromStr for MemberRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(MemberRole::Creator),
            "member" => Ok(MemberRole::Member),
            other => Err(ParseEnumError::new("member role", other)),
        }
    }
}

//=========================================================================================
// Challenges and Memberships
//=========================================================================================

/// The optional bet attached to a challenge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stake {
    pub description: Option<String>,
    pub amount: Option<i64>,
    pub unit: Option<String>,
}

/// A time-boxed group commitment with a daily check-in deadline.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    /// Daily deadline, interpreted in UTC.
    pub checkin_time: NaiveTime,
    pub screenshot_required: bool,
    pub stake: Stake,
    pub stake_rule: StakeRule,
    pub join_code: String,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn rules(&self) -> ChallengeRules {
        ChallengeRules {
            start_date: self.start_date,
            end_date: self.end_date,
            checkin_time: self.checkin_time,
            screenshot_required: self.screenshot_required,
        }
    }
}

/// The input for creating a challenge; id, join code and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub checkin_time: NaiveTime,
    pub screenshot_required: bool,
    pub stake: Stake,
    pub stake_rule: StakeRule,
}

/// The subset of a challenge the ledger needs to judge a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeRules {
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub checkin_time: NaiveTime,
    pub screenshot_required: bool,
}

/// The projection the evaluator reads for each running challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveChallenge {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub checkin_time: NaiveTime,
}

impl From<&Challenge> for ActiveChallenge {
    fn from(c: &Challenge) -> Self {
        Self {
            id: c.id,
            start_date: c.start_date,
            end_date: c.end_date,
            checkin_time: c.checkin_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Membership {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// A participant as returned by the membership lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: Uuid,
    pub display_name: String,
}

//=========================================================================================
// Check-ins
//=========================================================================================

/// The business key of a check-in row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckInKey {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
}

/// One user's recorded outcome for one challenge on one calendar date.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckIn {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub status: CheckInStatus,
    pub screenshot_ref: Option<String>,
    pub locked: bool,
    pub source: CheckInSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckIn {
    pub fn key(&self) -> CheckInKey {
        CheckInKey {
            challenge_id: self.challenge_id,
            user_id: self.user_id,
            date: self.date,
        }
    }
}

/// A request to the ledger write contract.
#[derive(Debug, Clone)]
pub struct UpsertCheckIn {
    pub key: CheckInKey,
    pub status: CheckInStatus,
    pub screenshot_ref: Option<String>,
    pub source: CheckInSource,
}

impl UpsertCheckIn {
    /// The locked fail row the evaluator writes for a member without a timely success.
    pub fn system_fail(key: CheckInKey) -> Self {
        Self {
            key,
            status: CheckInStatus::Fail,
            screenshot_ref: None,
            source: CheckInSource::SystemCron,
        }
    }
}

/// The result of a successful ledger write.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub record: CheckIn,
    /// A proof reference held by the overwritten row that the new row no longer carries.
    pub replaced_screenshot: Option<String>,
}

/// Per-user number of days with a given status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub user_id: Uuid,
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub status: CheckInStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeProgress {
    pub total: i64,
    pub elapsed: i64,
    pub percent: u8,
}

//=========================================================================================
// Evaluator reporting
//=========================================================================================

/// One pass of the evaluator over one challenge. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRun {
    pub challenge_id: Uuid,
    /// `None` when the challenge had no date due in this pass.
    pub evaluation_date: Option<NaiveDate>,
    pub members_processed: usize,
    pub fails_created: usize,
    /// Members whose row for the date was already locked.
    pub already_final: usize,
    pub errors: usize,
}

impl EvaluationRun {
    pub fn skipped(challenge_id: Uuid) -> Self {
        Self {
            challenge_id,
            evaluation_date: None,
            members_processed: 0,
            fails_created: 0,
            already_final: 0,
            errors: 0,
        }
    }
}

/// The report of a whole evaluator pass.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub started_at: DateTime<Utc>,
    pub runs: Vec<EvaluationRun>,
    pub total_fails_created: usize,
    pub errors: usize,
    pub duration: Duration,
}

//=========================================================================================
// Identity
//=========================================================================================

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub display_name: String,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}
