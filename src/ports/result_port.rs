//! Persistence port for runs, results and stats.

use crate::domain::backtest::{BacktestConfig, BacktestRun};
use crate::domain::error::SigbenchError;
use crate::domain::resolver::ResultDetail;
use crate::domain::stats::StatRow;
use uuid::Uuid;

pub trait ResultSink: Send + Sync {
    /// Allocates and stores a run owned by `process_id`.
    fn create_run(&self, config: &BacktestConfig, process_id: Uuid) -> Result<BacktestRun, SigbenchError>;

    fn upsert_result(&self, result: &ResultDetail) -> Result<(), SigbenchError>;

    fn upsert_stat(&self, stat: &StatRow) -> Result<(), SigbenchError>;

    /// Every persisted result for a run.
    fn results_for(&self, backtest_id: Uuid) -> Result<Vec<ResultDetail>, SigbenchError>;

    fn complete_run(&self, backtest_id: Uuid) -> Result<(), SigbenchError>;
}
