//! Mining RPC server and submission pipeline (C6/C7, spec.md §4.6-§4.7):
//! the line-delimited JSON-RPC surface miners connect to, and the
//! duplicate-check/reconstruct/hash/compare pipeline a `mining.submit`
//! drives through the five difficulty tiers.

pub mod difficulty;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod submission;
pub mod username;

pub use error::StratumError;
pub use protocol::{StratumMethod, StratumNotification, StratumRequest, StratumResponse};
pub use server::StratumServer;
pub use session::SessionState;
pub use submission::{
    RejectReason, ShareBroadcaster, SubmissionParams, SubmissionPipeline, SubmitOutcome, SubmitResult,
};
pub use username::{parse_username, ParsedUsername};
