//! crates/checkin_core/src/ledger.rs
//!
//! The check-in ledger's write contract.
//!
//! Storage adapters load the existing row for a key under their own exclusion
//! (a row lock, a mutex) and then ask [`plan_write`] what to do. The guard order
//! is fixed here, once, for every backend:
//!
//! 1. an existing locked row rejects every write, whatever the source;
//! 2. the date must fall inside the challenge's `[start_date, end_date]`;
//! 3. user writes must land strictly before the date's deadline;
//! 4. a success needs a proof when the challenge requires one.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::deadline::deadline_instant;
use crate::domain::{ChallengeRules, CheckIn, CheckInSource, CheckInStatus, UpsertCheckIn};
use crate::ports::PortError;

/// The structured failure kinds of the ledger write contract.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("check-in is already judged and locked")]
    CheckinLockedFinal,

    #[error("the check-in deadline ({deadline}) has passed")]
    CheckinDeadlinePassed { deadline: DateTime<Utc> },

    #[error("{date} is outside the challenge ({start} to {end})")]
    OutsideChallengeWindow {
        date: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("a screenshot is required to check in as success")]
    ScreenshotRequiredForSuccess,

    /// Another writer inserted the row first; the caller may retry as an update.
    #[error("check-in was created concurrently, retry as update")]
    WriteConflict,

    #[error("challenge {0} not found")]
    ChallengeNotFound(Uuid),

    #[error(transparent)]
    Port(#[from] PortError),
}

impl LedgerError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::CheckinLockedFinal => "CHECKIN_LOCKED_FINAL",
            LedgerError::CheckinDeadlinePassed { .. } => "CHECKIN_DEADLINE_PASSED",
            LedgerError::OutsideChallengeWindow { .. } => "OUTSIDE_CHALLENGE_WINDOW",
            LedgerError::ScreenshotRequiredForSuccess => "SCREENSHOT_REQUIRED_FOR_SUCCESS",
            LedgerError::WriteConflict => "CHECKIN_WRITE_CONFLICT",
            LedgerError::ChallengeNotFound(_) => "CHALLENGE_NOT_FOUND",
            LedgerError::Port(_) => "LEDGER_UNAVAILABLE",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// What an adapter must persist for an accepted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePlan {
    Insert {
        locked: bool,
    },
    Update {
        id: Uuid,
        locked: bool,
        /// The old row's proof when the new write drops or swaps it.
        replaced_screenshot: Option<String>,
    },
}

impl WritePlan {
    pub fn locked(&self) -> bool {
        match self {
            WritePlan::Insert { locked } | WritePlan::Update { locked, .. } => *locked,
        }
    }
}

/// Judges `request` against the current row for its key.
///
/// `now` is the instant the write is being applied; it is what user writes are
/// compared against and what the adapter stamps on the row.
pub fn plan_write(
    existing: Option<&CheckIn>,
    rules: &ChallengeRules,
    request: &UpsertCheckIn,
    now: DateTime<Utc>,
) -> LedgerResult<WritePlan> {
    if existing.is_some_and(|row| row.locked) {
        return Err(LedgerError::CheckinLockedFinal);
    }

    let date = request.key.date;
    if date < rules.start_date || date > rules.end_date {
        return Err(LedgerError::OutsideChallengeWindow {
            date,
            start: rules.start_date,
            end: rules.end_date,
        });
    }

    if request.source == CheckInSource::User {
        let deadline = deadline_instant(request.key.date, rules.checkin_time);
        if now >= deadline {
            return Err(LedgerError::CheckinDeadlinePassed { deadline });
        }
    }

    let has_proof = request
        .screenshot_ref
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    if rules.screenshot_required && request.status == CheckInStatus::Success && !has_proof {
        return Err(LedgerError::ScreenshotRequiredForSuccess);
    }

    let locked = request.source == CheckInSource::SystemCron;

    Ok(match existing {
        None => WritePlan::Insert { locked },
        Some(row) => {
            let replaced_screenshot = match (&row.screenshot_ref, &request.screenshot_ref) {
                (Some(old), Some(new)) if old == new => None,
                (Some(old), _) => Some(old.clone()),
                (None, _) => None,
            };
            WritePlan::Update {
                id: row.id,
                locked,
                replaced_screenshot,
            }
        }
    })
}

/// Normalises an empty proof reference to `None` before it is stored.
pub fn normalized_screenshot(request: &UpsertCheckIn) -> Option<String> {
    request
        .screenshot_ref
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}
