//! Ledger tests against a real Postgres database.
//!
//! Each test gets a fresh database with the migrations applied. They cover
//! the write races the in-memory ledger cannot reproduce, the lock trigger,
//! and cascading deletes.

use api_lib::adapters::DbAdapter;
use assert_matches::assert_matches;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use checkin_core::domain::{
    CheckInKey, CheckInSource, CheckInStatus, NewChallenge, Stake, StakeRule, UpsertCheckIn,
};
use checkin_core::ledger::LedgerError;
use checkin_core::ports::{AccountStore, ChallengeStore, CheckInLedger, FixedClock};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
}

/// An adapter whose clock sits before the 22:00 deadline of 10 January.
fn adapter(pool: &PgPool) -> DbAdapter {
    DbAdapter::new(
        pool.clone(),
        Arc::new(FixedClock::new(at("2024-01-10T12:00:00Z"))),
    )
}

async fn create_user(db: &DbAdapter, email: &str) -> Uuid {
    db.create_user_with_email(email, "not-a-real-hash", "Tester")
        .await
        .expect("user creation should succeed")
        .user_id
}

/// A January 2024 challenge with a 22:00 deadline, created by `creator_id`.
async fn create_challenge(db: &DbAdapter, creator_id: Uuid) -> Uuid {
    let new = NewChallenge {
        title: "Read daily".to_string(),
        description: None,
        start_date: day(1),
        end_date: day(31),
        checkin_time: NaiveTime::from_hms_opt(22, 0, 0).expect("valid time"),
        screenshot_required: false,
        stake: Stake::default(),
        stake_rule: StakeRule::PerMissedDay,
    };
    db.create_challenge(creator_id, new)
        .await
        .expect("challenge creation should succeed")
        .id
}

fn write(key: CheckInKey, status: CheckInStatus, source: CheckInSource) -> UpsertCheckIn {
    UpsertCheckIn {
        key,
        status,
        screenshot_ref: None,
        source,
    }
}

async fn count_rows(pool: &PgPool, challenge_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM check_ins WHERE challenge_id = $1")
        .bind(challenge_id)
        .fetch_one(pool)
        .await
        .expect("count should succeed")
}

// ---------------------------------------------------------------------------
// Races on an empty key
// ---------------------------------------------------------------------------

/// Two user submissions for the same day leave exactly one row.
#[sqlx::test(migrations = "./migrations")]
async fn concurrent_user_check_ins_store_one_row(pool: PgPool) {
    let db = adapter(&pool);
    let user = create_user(&db, "racer@test.com").await;
    let challenge_id = create_challenge(&db, user).await;
    let key = CheckInKey {
        challenge_id,
        user_id: user,
        date: day(10),
    };

    let (a, b) = tokio::join!(
        db.upsert_check_in(write(key, CheckInStatus::Success, CheckInSource::User)),
        db.upsert_check_in(write(key, CheckInStatus::Fail, CheckInSource::User)),
    );

    // Either the second writer queued behind the first and overwrote it, or
    // both inserted at once and the loser was told to retry.
    let outcomes = [a, b];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert!(wins >= 1, "{outcomes:?}");
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert_matches!(err, LedgerError::WriteConflict);
        }
    }
    assert_eq!(count_rows(&pool, challenge_id).await, 1);

    let stored = db
        .get_check_in(key)
        .await
        .expect("read should succeed")
        .expect("row should exist");
    assert!(!stored.locked);
    assert_eq!(stored.source, CheckInSource::User);
}

/// Two evaluator passes racing on a missing row: one locks it, the other is refused.
#[sqlx::test(migrations = "./migrations")]
async fn concurrent_system_fails_lock_once(pool: PgPool) {
    let db = adapter(&pool);
    let user = create_user(&db, "sleeper@test.com").await;
    let challenge_id = create_challenge(&db, user).await;
    let key = CheckInKey {
        challenge_id,
        user_id: user,
        date: day(9),
    };

    let (a, b) = tokio::join!(
        db.upsert_check_in(UpsertCheckIn::system_fail(key)),
        db.upsert_check_in(UpsertCheckIn::system_fail(key)),
    );

    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected one winner, got {other:?}"),
    };
    assert!(won.record.locked);
    assert_eq!(won.record.status, CheckInStatus::Fail);
    assert_matches!(lost, LedgerError::CheckinLockedFinal);
    assert_eq!(count_rows(&pool, challenge_id).await, 1);
}

// ---------------------------------------------------------------------------
// Locked rows
// ---------------------------------------------------------------------------

/// A locked row refuses every later write, whatever its source.
#[sqlx::test(migrations = "./migrations")]
async fn locked_row_rejects_every_source(pool: PgPool) {
    let db = adapter(&pool);
    let user = create_user(&db, "late@test.com").await;
    let challenge_id = create_challenge(&db, user).await;
    let key = CheckInKey {
        challenge_id,
        user_id: user,
        date: day(9),
    };

    db.upsert_check_in(UpsertCheckIn::system_fail(key))
        .await
        .expect("first fail should lock the row");

    for source in [
        CheckInSource::User,
        CheckInSource::Admin,
        CheckInSource::SystemCron,
    ] {
        let result = db
            .upsert_check_in(write(key, CheckInStatus::Success, source))
            .await;
        assert_matches!(result, Err(LedgerError::CheckinLockedFinal), "{source:?}");
    }

    let stored = db
        .get_check_in(key)
        .await
        .expect("read should succeed")
        .expect("row should exist");
    assert_eq!(stored.status, CheckInStatus::Fail);
    assert!(stored.locked);
}

/// The trigger refuses updates to a locked row that bypass the adapter.
#[sqlx::test(migrations = "./migrations")]
async fn trigger_blocks_raw_updates_to_locked_rows(pool: PgPool) {
    let db = adapter(&pool);
    let user = create_user(&db, "raw@test.com").await;
    let challenge_id = create_challenge(&db, user).await;
    let key = CheckInKey {
        challenge_id,
        user_id: user,
        date: day(9),
    };
    db.upsert_check_in(UpsertCheckIn::system_fail(key))
        .await
        .expect("fail should be written");

    let result = sqlx::query("UPDATE check_ins SET status = 'success' WHERE challenge_id = $1")
        .bind(challenge_id)
        .execute(&pool)
        .await;
    let err = result.expect_err("locked row must not change");
    let db_err = err.as_database_error().expect("should be a database error");
    assert_eq!(db_err.code().as_deref(), Some("23514"));
}

// ---------------------------------------------------------------------------
// Deletes
// ---------------------------------------------------------------------------

/// Deleting a challenge removes its check-ins.
#[sqlx::test(migrations = "./migrations")]
async fn deleting_a_challenge_cascades_to_check_ins(pool: PgPool) {
    let db = adapter(&pool);
    let user = create_user(&db, "owner@test.com").await;
    let challenge_id = create_challenge(&db, user).await;

    db.upsert_check_in(write(
        CheckInKey {
            challenge_id,
            user_id: user,
            date: day(10),
        },
        CheckInStatus::Success,
        CheckInSource::User,
    ))
    .await
    .expect("check-in should be written");
    db.upsert_check_in(UpsertCheckIn::system_fail(CheckInKey {
        challenge_id,
        user_id: user,
        date: day(9),
    }))
    .await
    .expect("fail should be written");
    assert_eq!(count_rows(&pool, challenge_id).await, 2);

    db.delete_challenge(challenge_id, user)
        .await
        .expect("creator may delete");

    assert_eq!(count_rows(&pool, challenge_id).await, 0);
    let members: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM challenge_members WHERE challenge_id = $1")
            .bind(challenge_id)
            .fetch_one(&pool)
            .await
            .expect("count should succeed");
    assert_eq!(members, 0);
}
