//! Harvest session orchestration: the state machine that owns the backend
//! handle, drives one adapter through materialize/enumerate/enrich, routes
//! stalls through the operator recovery protocol and flushes the persisted
//! tables on every exit path.

pub mod config;
pub mod operator;
pub mod recovery;
pub mod session;
pub mod targets;

pub use config::HarvestConfig;
pub use operator::{ConsoleOperator, ScriptedOperator};
pub use session::{HarvestSession, SessionReport, SessionState};
pub use targets::{HarvestTarget, League, Season, TargetError, LEAGUES};

pub const CRATE_NAME: &str = "pitchside-session";
