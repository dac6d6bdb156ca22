//! Exploration-backend control surface consumed by the source adapters.
//!
//! The real backend is an external collaborator (a WebDriver-style browsing
//! session). This crate defines the contract the harvest core needs from it:
//! class-name element lookup, deadline-bounded waits, focus-driven lazy
//! loading and scoped browsing contexts. It also ships a fully scripted
//! implementation driven by JSON page fixtures, used by the CLI demo flow and
//! the tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use pitchside_core::HarvestError;
use thiserror::Error;

pub mod script;
pub mod scripted;

pub use script::{HarvestScript, PageScript};
pub use scripted::ScriptedBackend;

pub const CRATE_NAME: &str = "pitchside-backend";

/// Class-name vocabulary of the harvested sources, shared by the adapters and
/// the scripted renderer.
pub mod classes {
    // Search results markup.
    pub const CONSENT_BUTTON: &str = "sy4vM";
    pub const EXPAND_CONTROL: &str = "Z4Cazf";
    pub const ROUND_GROUP: &str = "OcbAbf";
    pub const ROUND_LABEL: &str = "GVj7ae";
    pub const MATCH_BLOCK: &str = "KAIX8d";
    pub const RESULT_LINE: &str = "imspo_mt__tt-w";
    pub const SCORE_MARKER: &str = "imspo_mt__t-sc";
    pub const DATE_TEXT: &str = "GOsQPe";
    pub const TEAM_CELL: &str = "L5Kkcd";
    pub const DETAILS_CONTROL: &str = "U0faLd";
    pub const STAT_ROW: &str = "MzWkAb";

    // Odds listing markup.
    pub const ODDS_ROW: &str = "eventRow";
    pub const ODDS_DATE: &str = "event-date";
    pub const ODDS_HOME: &str = "participant-home";
    pub const ODDS_AWAY: &str = "participant-away";
    pub const ODDS_SCORE: &str = "event-score";
    pub const ODDS_NEXT_PAGE: &str = "pagination-next";
    pub const ODDS_QUOTE_ROW: &str = "oddsRow";
    pub const ODDS_QUOTE_SOURCE: &str = "bookmaker-name";
    pub const ODDS_QUOTE_HOME: &str = "odds-home";
    pub const ODDS_QUOTE_DRAW: &str = "odds-draw";
    pub const ODDS_QUOTE_AWAY: &str = "odds-away";
}

/// Opaque handle to an element in the current browsing context. Handles stay
/// valid across lazy-load mutations; they go stale only when the context
/// navigates away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Element(pub(crate) u64);

/// Handle to one browsing context (window/tab). The context opened first is
/// the primary one; adapters must return to it on every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) u64);

/// Which end of a visible list a boundary scan is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    First,
    Last,
}

/// Deadline-bounded wait conditions. Every suspension in the system goes
/// through one of these; there is no unbounded wait.
#[derive(Debug, Clone)]
pub enum Condition {
    /// At least one element with the class is attached.
    PresenceOf(String),
    /// An element with the class is attached and interactable.
    Clickable(String),
    /// The text of the first/last element with the class no longer equals
    /// the captured prior signature.
    BoundaryTextDiffers {
        class: String,
        boundary: Boundary,
        prior: String,
    },
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::PresenceOf(class) => write!(f, "presence of .{class}"),
            Condition::Clickable(class) => write!(f, ".{class} to be clickable"),
            Condition::BoundaryTextDiffers { class, boundary, .. } => {
                let end = match boundary {
                    Boundary::First => "first",
                    Boundary::Last => "last",
                };
                write!(f, "the {end} .{class} to change")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("wait deadline elapsed: {condition}")]
    WaitTimeout { condition: String },
    #[error("stale element handle")]
    StaleElement,
    #[error("element is not interactable")]
    NotInteractable,
    #[error("no such browsing context")]
    NoSuchContext,
    #[error("backend session is closed")]
    SessionClosed,
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::WaitTimeout { .. })
    }
}

impl From<BackendError> for HarvestError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::WaitTimeout { condition } => {
                HarvestError::ExplorationTimeout { expected: condition }
            }
            other => HarvestError::Backend(other.to_string()),
        }
    }
}

/// One exclusive, stateful browsing session. Interactions are strictly
/// sequential; the session owns the handle and closes it on every exit path.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Load `url` in the active context.
    async fn navigate(&self, url: &str) -> Result<(), BackendError>;

    /// All elements with the class, in document order.
    async fn find_all(&self, class: &str) -> Result<Vec<Element>, BackendError>;

    /// Descendants of `parent` with the class, in document order.
    async fn find_within(
        &self,
        parent: &Element,
        class: &str,
    ) -> Result<Vec<Element>, BackendError>;

    /// Visible text of the element's subtree, newline-joined.
    async fn read_text(&self, element: &Element) -> Result<String, BackendError>;

    async fn click(&self, element: &Element) -> Result<(), BackendError>;

    /// Scroll/focus the viewport to the element. Lazily loaded sources append
    /// or prepend items in response.
    async fn move_focus_to(&self, element: &Element) -> Result<(), BackendError>;

    /// Wait for the condition, up to `deadline`. Returns the element that
    /// satisfied it, or `WaitTimeout`.
    async fn wait_until(
        &self,
        condition: Condition,
        deadline: Duration,
    ) -> Result<Element, BackendError>;

    /// Open a secondary browsing context on `url` and make it active.
    async fn open_context(&self, url: &str) -> Result<ContextId, BackendError>;

    /// Close a secondary context; the most recently opened remaining context
    /// becomes active again.
    async fn close_context(&self, context: ContextId) -> Result<(), BackendError>;

    /// Release the browsing session. Idempotent.
    async fn close(&self) -> Result<(), BackendError>;
}
