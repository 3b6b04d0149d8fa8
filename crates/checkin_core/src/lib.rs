pub mod deadline;
pub mod domain;
pub mod evaluator;
pub mod join_code;
pub mod ledger;
pub mod memory;
pub mod ports;
pub mod submission;

pub use domain::{
    ActiveChallenge, CalendarEntry, Challenge, ChallengeProgress, ChallengeRules, CheckIn,
    CheckInKey, CheckInSource, CheckInStatus, EvaluationRun, Member, MemberRole, Membership,
    NewChallenge, PassSummary, Stake, StakeRule, StatusCount, UpsertCheckIn, UpsertOutcome, User,
    UserCredentials,
};
pub use evaluator::{DeadlineEvaluator, EvaluatorError};
pub use ledger::{LedgerError, LedgerResult};
pub use ports::{
    AccountStore, BlobStore, ChallengeStore, CheckInLedger, Clock, FixedClock, MembershipStore,
    PortError, PortResult, SystemClock,
};
pub use submission::{CheckInSubmitter, ProofUpload, SubmissionError};
