//! Split history port.

use crate::domain::error::SigbenchError;
use crate::domain::split::SplitEvent;

pub trait SplitRepository: Send + Sync {
    fn fetch_splits(&self, source: &str, code: &str) -> Result<Vec<SplitEvent>, SigbenchError>;
}
