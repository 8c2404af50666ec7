//! Configuration loading port.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::SigbenchError;

pub trait ConfigLoader {
    /// Deserializes and validates a backtest configuration.
    fn load(&self) -> Result<BacktestConfig, SigbenchError>;
}
