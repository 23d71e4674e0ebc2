//! beacon-proxy: beaconing scores for host pairs talking through a proxy.
//!
//! Scores how periodic the connections from an internal source to an FQDN
//! reached through a proxy are, and streams the results out as upsert
//! instructions for the persistence layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Producers  │────>│   Session   │────>│    Sink     │
//! │ (PairInput) │ ch  │  (worker)   │ cb  │ (BulkChanges│
//! └─────────────┘     └─────────────┘     └─────────────┘
//!   Any thread          One thread          Worker thread
//! ```
//!
//! - **analyzer**: pure timing statistics (Bowley skew, MADM, histogram)
//! - **session**: bounded queue, single worker, drain-then-signal close
//! - **persist**: shape of the upsert directives handed to the sink

pub mod analyzer;
pub mod config;
pub mod error;
pub mod export;
pub mod input;
pub mod metrics;
pub mod persist;
pub mod session;
pub mod source;

pub use analyzer::{score_timestamps, TimeWindow, TimingScore};
pub use error::SessionError;
pub use input::{PairInput, PairKey, ProxyHost};
pub use persist::{BulkChange, BulkChanges};
pub use session::{AnalysisSession, RunningSession, SessionReport, SessionSettings};
