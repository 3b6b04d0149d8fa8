//! crates/checkin_core/src/submission.rs
//!
//! The interactive check-in path: upload the optional proof, write the ledger
//! row as the user, and clean up blobs only once the ledger has answered.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{CheckIn, CheckInKey, CheckInSource, CheckInStatus, UpsertCheckIn};
use crate::ledger::LedgerError;
use crate::ports::{BlobStore, CheckInLedger, Clock, MembershipStore, PortError};

/// A proof image as received from the client.
#[derive(Debug, Clone)]
pub struct ProofUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ProofUpload {
    /// The lowercase file extension, or `bin` when there is none.
    pub fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "bin".to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("proof upload failed: {0}")]
    UploadFailed(#[source] PortError),

    #[error("membership lookup failed: {0}")]
    MembershipLookupFailed(#[source] PortError),

    #[error("user is not a member of this challenge")]
    NotAMember,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Storage path for a proof: `proofs/{challenge}/{date}/{user}/{random}.{ext}`.
pub fn proof_path(key: &CheckInKey, extension: &str) -> String {
    format!(
        "proofs/{}/{}/{}/{}.{}",
        key.challenge_id,
        key.date,
        key.user_id,
        Uuid::new_v4(),
        extension
    )
}

pub struct CheckInSubmitter {
    ledger: Arc<dyn CheckInLedger>,
    members: Arc<dyn MembershipStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl CheckInSubmitter {
    pub fn new(
        ledger: Arc<dyn CheckInLedger>,
        members: Arc<dyn MembershipStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            members,
            blobs,
            clock,
        }
    }

    /// Records today's check-in for `user_id`.
    pub async fn submit(
        &self,
        user_id: Uuid,
        challenge_id: Uuid,
        status: CheckInStatus,
        proof: Option<ProofUpload>,
    ) -> Result<CheckIn, SubmissionError> {
        let is_member = self
            .members
            .is_member(challenge_id, user_id)
            .await
            .map_err(SubmissionError::MembershipLookupFailed)?;
        if !is_member {
            return Err(SubmissionError::NotAMember);
        }

        let key = CheckInKey {
            challenge_id,
            user_id,
            date: self.clock.now().date_naive(),
        };

        // 1. Upload first; no ledger write happens without the proof it names.
        let uploaded = match proof {
            Some(proof) => {
                let path = proof_path(&key, &proof.extension());
                let blob_ref = self
                    .blobs
                    .upload(&path, &proof.bytes)
                    .await
                    .map_err(SubmissionError::UploadFailed)?;
                Some(blob_ref)
            }
            None => None,
        };

        // 2. The source is fixed here, never taken from the client.
        let request = UpsertCheckIn {
            key,
            status,
            screenshot_ref: uploaded.clone(),
            source: CheckInSource::User,
        };

        // 3. Cleanup only after the ledger call has returned.
        match self.ledger.upsert_check_in(request).await {
            Ok(outcome) => {
                if let Some(old) = outcome.replaced_screenshot {
                    self.remove_quietly(&old).await;
                }
                info!(
                    %challenge_id,
                    %user_id,
                    date = %key.date,
                    status = %status,
                    "Check-in recorded"
                );
                Ok(outcome.record)
            }
            Err(e) => {
                if let Some(blob_ref) = uploaded {
                    self.remove_quietly(&blob_ref).await;
                }
                warn!(%challenge_id, %user_id, code = e.code(), "Check-in rejected: {}", e);
                Err(e.into())
            }
        }
    }

    async fn remove_quietly(&self, blob_ref: &str) {
        if let Err(e) = self.blobs.delete(blob_ref).await {
            warn!(blob_ref, "Failed to remove orphaned proof: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_falls_back_to_bin() {
        let named = |n: &str| ProofUpload {
            file_name: n.to_string(),
            bytes: vec![],
        };
        assert_eq!(named("shot.PNG").extension(), "png");
        assert_eq!(named("noext").extension(), "bin");
        assert_eq!(named("weird.p/g").extension(), "bin");
    }

    #[test]
    fn proof_path_is_scoped_by_challenge_date_and_user() {
        let key = CheckInKey {
            challenge_id: Uuid::nil(),
            user_id: Uuid::from_u128(1),
            date: "2024-01-10".parse().unwrap(),
        };
        let path = proof_path(&key, "jpg");
        let prefix = format!("proofs/{}/2024-01-10/{}/", Uuid::nil(), Uuid::from_u128(1));
        assert!(path.starts_with(&prefix));
        assert!(path.ends_with(".jpg"));
    }
}
