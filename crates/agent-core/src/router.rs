//! Routing after a reasoning step.

use crate::message::Turn;

/// Where control goes after the reasoning node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// The last turn asked for tools; run the acting node
    ContinueToTools,
    /// Nothing left to do; the run is over
    Halt,
}

/// Decide the next edge from the last turn only.
pub fn route(history: &[Turn]) -> Route {
    match history.last() {
        Some(turn) if turn.requests_tools() => Route::ContinueToTools,
        _ => Route::Halt,
    }
}
