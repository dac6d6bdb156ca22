//! The stall recovery protocol: Detecting → AwaitingOperator → Resolved.
//!
//! Every exploration timeout, wherever it strikes, funnels through one
//! exchange: show the diagnostic, block on the operator's 1/2/3 decision,
//! hand the choice back to the calling step. There is deliberately no
//! automatic backoff or retry budget; the stalls this protocol exists for
//! (captchas, consent walls, half-rendered pages) do not fix themselves.

use pitchside_core::{Diagnostic, Operator, OperatorChoice};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Detecting,
    AwaitingOperator,
    Resolved,
}

/// Run one exchange of the protocol and return the operator's decision.
pub fn resolve_stall(operator: &dyn Operator, diagnostic: &Diagnostic) -> OperatorChoice {
    warn!(
        state = ?RecoveryState::Detecting,
        expected = %diagnostic.expected,
        "exploration stalled"
    );
    info!(state = ?RecoveryState::AwaitingOperator, "waiting for operator decision");
    let choice = operator.resolve_timeout(diagnostic);
    info!(state = ?RecoveryState::Resolved, ?choice, "operator resolved the stall");
    choice
}
