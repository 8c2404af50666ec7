//! One-way progress reporting from a run to whoever is watching.
//!
//! Emitting never blocks and never fails: a sink that has gone away simply
//! stops receiving events.

use crate::domain::backtest::RunState;
use std::fmt;
use std::sync::mpsc::Sender;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted { run_id: Uuid, symbols: usize },
    StateChanged { run_id: Uuid, state: RunState },
    SymbolScanned { code: String, matches: usize },
    SymbolSkipped { code: String, reason: String },
    SymbolFailed { code: String, reason: String },
    PersistFailed { code: String, signal: String, reason: String },
    FetchHalted { provider: String },
    RunFinished { run_id: Uuid, elapsed: Duration },
}

impl ProgressEvent {
    /// Short scope label such as the symbol code or `run`.
    pub fn scope(&self) -> &str {
        match self {
            ProgressEvent::SymbolScanned { code, .. }
            | ProgressEvent::SymbolSkipped { code, .. }
            | ProgressEvent::SymbolFailed { code, .. }
            | ProgressEvent::PersistFailed { code, .. } => code,
            ProgressEvent::FetchHalted { provider } => provider,
            ProgressEvent::RunStarted { .. }
            | ProgressEvent::StateChanged { .. }
            | ProgressEvent::RunFinished { .. } => "run",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ProgressEvent::SymbolFailed { .. }
                | ProgressEvent::PersistFailed { .. }
                | ProgressEvent::FetchHalted { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::RunStarted { run_id, symbols } => {
                write!(f, "run {run_id} started over {symbols} symbols")
            }
            ProgressEvent::StateChanged { run_id, state } => write!(f, "run {run_id} is {state}"),
            ProgressEvent::SymbolScanned { code, matches } => write!(f, "{code}: {matches} matches"),
            ProgressEvent::SymbolSkipped { code, reason } => write!(f, "{code}: skipped, {reason}"),
            ProgressEvent::SymbolFailed { code, reason } => write!(f, "{code}: failed, {reason}"),
            ProgressEvent::PersistFailed { code, signal, reason } => {
                write!(f, "{code}: dropped {signal} result, {reason}")
            }
            ProgressEvent::FetchHalted { provider } => {
                write!(f, "{provider} is rate limiting, no further symbols fetched")
            }
            ProgressEvent::RunFinished { run_id, elapsed } => {
                write!(f, "run {run_id} finished in {:.2}s", elapsed.as_secs_f64())
            }
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events to a channel; a closed receiver drops them.
impl ProgressSink for Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}
