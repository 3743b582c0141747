//! Feedback-directed fuzzing for stateful programs behind a typed ABI.
//!
//! The core synthesizes method calls type-by-type, dispatches them through a
//! pluggable execution [`Backend`], and biases future generation toward
//! inputs whose coverage paths or state transitions have rarely been seen.
//! A user [`Oracle`] (or, without one, backend assertion failures) decides
//! when a campaign has found a bug.

pub mod abi;
pub mod candidate;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod feedback;
pub mod fuzzer;
pub mod mutator;
pub mod oracle;
pub mod report;
pub mod schedule;
pub mod state;

pub use abi::{AbiContract, AbiType, AbiValue, AccountRef};
pub use candidate::Candidate;
pub use config::AbifuzzConfig;
pub use corpus::{Population, Seed};
pub use executor::{
    AccountFunder, Backend, BackendError, BackendInfo, CommandBackend, CommandBackendConfig,
    Outcome,
};
pub use feedback::{path_id, transition_id, PathId, TransitionId};
pub use fuzzer::{
    Campaign, CampaignConfig, CampaignCounters, CampaignReport, Granularity, Phase, Verdict,
};
pub use oracle::{FnOracle, Oracle};
pub use report::{MetricsRow, MetricsWriter, ReportCadence};
pub use schedule::{Driver, PowerSchedule};
pub use state::{Scalar, StateSnapshot, StateTracker};
