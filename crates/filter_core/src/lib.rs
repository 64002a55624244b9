//! Filter core: pure session state machine and view-model helpers.
mod cadence;
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use cadence::{PollCadence, PollIntervals, ScrollActivity};
pub use effect::{Effect, Lifecycle};
pub use msg::{BatchFailure, BatchFailureKind, Decision, Msg, QuotaNotice, ScannedItem};
pub use state::{normalize_topics, FilterState, Generation, MonitorPhase, VisualState};
pub use update::update;
pub use view_model::FilteringView;
