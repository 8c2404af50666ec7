//! Price bar repository port.

use crate::domain::backtest::DateRange;
use crate::domain::chart::ChartInfo;
use crate::domain::error::SigbenchError;
use crate::domain::ohlcv::PriceBar;

pub trait BarRepository: Send + Sync {
    /// Bars for one symbol in ascending date order, restricted to `range`.
    /// Adjusted bars are returned when an adjusted series exists, raw bars
    /// otherwise.
    fn fetch(
        &self,
        source: &str,
        code: &str,
        range: &DateRange,
    ) -> Result<Vec<PriceBar>, SigbenchError>;

    /// Every code with bars under `source`, sorted.
    fn list_codes(&self, source: &str) -> Result<Vec<String>, SigbenchError>;

    /// Chart identity for a code, with industry and sector when known.
    fn describe(&self, source: &str, code: &str) -> Result<ChartInfo, SigbenchError>;
}
