//! Progress sink that turns run events into tracing events.

use crate::ports::progress_port::{ProgressEvent, ProgressSink};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        let scope = event.scope();
        match &event {
            ProgressEvent::SymbolScanned { .. } | ProgressEvent::SymbolSkipped { .. } => {
                debug!(scope, "{event}")
            }
            _ if event.is_error() => warn!(scope, "{event}"),
            _ => info!(scope, "{event}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_without_a_subscriber() {
        let sink = TracingProgress;
        sink.emit(ProgressEvent::SymbolFailed {
            code: "BHP".into(),
            reason: "no data".into(),
        });
        sink.emit(ProgressEvent::SymbolScanned {
            code: "BHP".into(),
            matches: 0,
        });
    }
}
