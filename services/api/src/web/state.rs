//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the two ways of wiring it up.

use crate::adapters::{DbAdapter, FsBlobStore};
use crate::config::Config;
use checkin_core::memory::{InMemoryBlobStore, InMemoryStore};
use checkin_core::ports::{
    AccountStore, BlobStore, ChallengeStore, CheckInLedger, Clock, MembershipStore,
};
use checkin_core::{CheckInSubmitter, DeadlineEvaluator};
use std::sync::Arc;

//=========================================================================================
// Store wiring
//=========================================================================================

/// The set of port implementations the service runs against.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn CheckInLedger>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub members: Arc<dyn MembershipStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub blobs: Arc<dyn BlobStore>,
    /// Present when proofs are kept on local disk and served by `/files`.
    pub proof_files: Option<Arc<FsBlobStore>>,
}

impl Stores {
    /// Every port backed by one PostgreSQL adapter, proofs on local disk.
    pub fn postgres(db: Arc<DbAdapter>, files: Arc<FsBlobStore>) -> Self {
        Self {
            ledger: db.clone(),
            challenges: db.clone(),
            members: db.clone(),
            accounts: db,
            blobs: files.clone(),
            proof_files: Some(files),
        }
    }

    /// Every port backed by process memory.
    pub fn in_memory(store: Arc<InMemoryStore>, blobs: Arc<InMemoryBlobStore>) -> Self {
        Self {
            ledger: store.clone(),
            challenges: store.clone(),
            members: store.clone(),
            accounts: store,
            blobs,
            proof_files: None,
        }
    }
}

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub ledger: Arc<dyn CheckInLedger>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub members: Arc<dyn MembershipStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub proof_files: Option<Arc<FsBlobStore>>,
    pub clock: Arc<dyn Clock>,
    pub submitter: CheckInSubmitter,
    pub evaluator: Arc<DeadlineEvaluator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, config: Arc<Config>) -> Self {
        let submitter = CheckInSubmitter::new(
            stores.ledger.clone(),
            stores.members.clone(),
            stores.blobs.clone(),
            clock.clone(),
        );
        let evaluator = Arc::new(
            DeadlineEvaluator::new(
                stores.challenges.clone(),
                stores.members.clone(),
                stores.ledger.clone(),
                stores.blobs.clone(),
                clock.clone(),
            )
            .with_concurrency(config.evaluator_concurrency),
        );

        Self {
            ledger: stores.ledger,
            challenges: stores.challenges,
            members: stores.members,
            accounts: stores.accounts,
            blobs: stores.blobs,
            proof_files: stores.proof_files,
            clock,
            submitter,
            evaluator,
            config,
        }
    }
}
