//! Integration tests for the interactive check-in path.

mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use checkin_core::{
    BlobStore, CheckInSource, CheckInStatus, CheckInSubmitter, LedgerError, PortError,
    PortResult, ProofUpload, SubmissionError,
};
use common::{at, Fixture};

fn proof(name: &str) -> ProofUpload {
    ProofUpload {
        file_name: name.to_string(),
        bytes: b"png-bytes".to_vec(),
    }
}

#[tokio::test]
async fn success_with_proof_is_recorded_as_user() {
    let fx = Fixture::new("2024-01-10T12:00:00Z");
    let (challenge, _) = fx.challenge(true).await;
    let ada = fx.member(challenge.id, "Ada").await;

    let row = fx
        .submitter()
        .submit(ada, challenge.id, CheckInStatus::Success, Some(proof("run.PNG")))
        .await
        .unwrap();

    assert_eq!(row.status, CheckInStatus::Success);
    assert_eq!(row.source, CheckInSource::User);
    assert!(!row.locked);
    let proof_ref = row.screenshot_ref.unwrap();
    assert!(proof_ref.starts_with(&format!("proofs/{}/2024-01-10/{}/", challenge.id, ada)));
    assert!(proof_ref.ends_with(".png"));
    assert!(fx.blobs.contains(&proof_ref));
}

#[tokio::test]
async fn rejected_write_removes_the_fresh_upload() {
    let fx = Fixture::new("2024-01-10T22:00:00Z");
    let (challenge, _) = fx.challenge(true).await;
    let ada = fx.member(challenge.id, "Ada").await;

    let err = fx
        .submitter()
        .submit(ada, challenge.id, CheckInStatus::Success, Some(proof("run.png")))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        SubmissionError::Ledger(LedgerError::CheckinDeadlinePassed { .. })
    );
    assert!(fx.blobs.is_empty());
}

#[tokio::test]
async fn locked_day_rejects_and_cleans_up() {
    let fx = Fixture::new("2024-01-10T22:30:00Z");
    let (challenge, creator) = fx.challenge(false).await;
    fx.evaluator().run_pass().await.unwrap();

    // The day was finalized at 22:00; a retry is refused before the deadline check.
    let err = fx
        .submitter()
        .submit(creator, challenge.id, CheckInStatus::Success, Some(proof("late.png")))
        .await
        .unwrap_err();
    assert_matches!(err, SubmissionError::Ledger(LedgerError::CheckinLockedFinal));
    assert!(fx.blobs.is_empty());
}

#[tokio::test]
async fn missing_required_proof_is_rejected() {
    let fx = Fixture::new("2024-01-10T12:00:00Z");
    let (challenge, creator) = fx.challenge(true).await;

    let err = fx
        .submitter()
        .submit(creator, challenge.id, CheckInStatus::Success, None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        SubmissionError::Ledger(LedgerError::ScreenshotRequiredForSuccess)
    );

    fx.submitter()
        .submit(creator, challenge.id, CheckInStatus::Fail, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn replacing_a_proof_removes_the_old_one_after_the_write() {
    let fx = Fixture::new("2024-01-10T09:00:00Z");
    let (challenge, creator) = fx.challenge(false).await;

    let first = fx
        .submitter()
        .submit(creator, challenge.id, CheckInStatus::Fail, Some(proof("a.jpg")))
        .await
        .unwrap();
    let old_ref = first.screenshot_ref.unwrap();

    fx.clock.set(at("2024-01-10T18:00:00Z"));
    let second = fx
        .submitter()
        .submit(creator, challenge.id, CheckInStatus::Success, Some(proof("b.jpg")))
        .await
        .unwrap();
    let new_ref = second.screenshot_ref.unwrap();

    assert_ne!(old_ref, new_ref);
    assert!(!fx.blobs.contains(&old_ref));
    assert!(fx.blobs.contains(&new_ref));
    assert_eq!(fx.blobs.len(), 1);
}

#[tokio::test]
async fn outsiders_cannot_check_in() {
    let fx = Fixture::new("2024-01-10T09:00:00Z");
    let (challenge, _) = fx.challenge(false).await;
    let stranger = fx.store.add_user("Stranger");

    let err = fx
        .submitter()
        .submit(stranger, challenge.id, CheckInStatus::Success, Some(proof("x.png")))
        .await
        .unwrap_err();
    assert_matches!(err, SubmissionError::NotAMember);
    assert!(fx.blobs.is_empty());
}

struct RejectingBlobs;

#[async_trait]
impl BlobStore for RejectingBlobs {
    async fn upload(&self, _: &str, _: &[u8]) -> PortResult<String> {
        Err(PortError::Unexpected("bucket not found".to_string()))
    }
    async fn delete(&self, _: &str) -> PortResult<()> {
        Ok(())
    }
    async fn signed_url(&self, _: &str, _: Duration) -> PortResult<String> {
        Err(PortError::Unexpected("bucket not found".to_string()))
    }
}

#[tokio::test]
async fn upload_failure_aborts_before_the_ledger() {
    let fx = Fixture::new("2024-01-10T09:00:00Z");
    let (challenge, creator) = fx.challenge(false).await;
    let submitter = CheckInSubmitter::new(
        fx.store.clone(),
        fx.store.clone(),
        Arc::new(RejectingBlobs),
        fx.clock.clone(),
    );

    let err = submitter
        .submit(creator, challenge.id, CheckInStatus::Success, Some(proof("x.png")))
        .await
        .unwrap_err();
    assert_matches!(err, SubmissionError::UploadFailed(_));
    assert_eq!(fx.store.check_in_count(challenge.id), 0);
}

#[tokio::test]
async fn check_ins_before_start_or_after_end_are_refused() {
    let fx = Fixture::new("2023-12-31T10:00:00Z");
    let (challenge, _) = fx.challenge(false).await;
    let ada = fx.member(challenge.id, "Ada").await;

    for now in ["2023-12-31T10:00:00Z", "2024-02-05T10:00:00Z"] {
        fx.clock.set(at(now));
        let err = fx
            .submitter()
            .submit(ada, challenge.id, CheckInStatus::Success, Some(proof("run.png")))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            SubmissionError::Ledger(LedgerError::OutsideChallengeWindow { .. })
        );
        assert!(fx.blobs.is_empty());
    }

    fx.clock.set(at("2024-01-31T21:00:00Z"));
    fx.submitter()
        .submit(ada, challenge.id, CheckInStatus::Success, None)
        .await
        .unwrap();
}
