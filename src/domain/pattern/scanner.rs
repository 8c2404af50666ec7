//! Walks a chart and reports where a pattern occurs.

use crate::domain::chart::Chart;
use crate::domain::error::SigbenchError;
use crate::domain::pattern::PatternDefinition;
use crate::domain::trend::Bias;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const MIN_LOOKBACK: usize = 1;
pub const MAX_LOOKBACK: usize = 1000;

/// Signal name used for baseline matches.
pub const RANDOM_SIGNAL: &str = "Random";
/// Width of each baseline slice.
pub const RANDOM_STRIDE: usize = 10;

/// Inclusive range of chart positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub signal_name: String,
    pub code: String,
    pub industry: Option<String>,
    pub sector: Option<String>,
    pub predicted: Bias,
    pub prologue: ChartRange,
    pub pattern: ChartRange,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOptions {
    pub lookback: usize,
    pub volume_factor: f64,
    pub only_with_market: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            lookback: 15,
            volume_factor: 1.0,
            only_with_market: false,
        }
    }
}

pub fn clamp_lookback(lookback: usize) -> usize {
    lookback.clamp(MIN_LOOKBACK, MAX_LOOKBACK)
}

fn ensure_scannable(chart: &Chart) -> Result<(), SigbenchError> {
    if chart.is_empty() {
        return Err(SigbenchError::InvalidInput {
            reason: format!("chart {} has no bars", chart.info.code),
        });
    }
    if !chart.has_trend() {
        return Err(SigbenchError::InvalidInput {
            reason: format!("chart {} has no computed trend", chart.info.code),
        });
    }
    Ok(())
}

/// Every position in `[L, len - bars_required)` where `pattern` matches, in
/// ascending order. With `only_with_market`, positions whose aligned market
/// bar carries a directional trend against the prediction are skipped.
pub fn discover_matches(
    pattern: &PatternDefinition,
    chart: &Chart,
    market: Option<&Chart>,
    options: &ScanOptions,
) -> Result<Vec<PatternMatch>, SigbenchError> {
    ensure_scannable(chart)?;
    let lookback = clamp_lookback(options.lookback);
    let bars_required = pattern.bars_required;
    if chart.len() < bars_required + lookback {
        return Ok(Vec::new());
    }

    let market = market.filter(|m| options.only_with_market && m.has_trend());
    let mut found = Vec::new();

    for i in lookback..chart.len() - bars_required {
        if let Some(market) = market {
            if against_market(market, chart, i, pattern.predicted) {
                continue;
            }
        }
        if let Some(position) = pattern.matches(chart, i, lookback, options.volume_factor)? {
            found.push(PatternMatch {
                signal_name: pattern.name.to_string(),
                code: chart.info.code.clone(),
                industry: chart.info.industry.clone(),
                sector: chart.info.sector.clone(),
                predicted: pattern.predicted,
                prologue: ChartRange {
                    start: i - lookback,
                    end: i - 1,
                },
                pattern: ChartRange {
                    start: i,
                    end: i + bars_required - 1,
                },
                position,
            });
        }
    }
    Ok(found)
}

fn against_market(market: &Chart, chart: &Chart, position: usize, predicted: Bias) -> bool {
    let date = chart.bars()[position].date;
    match market.index_of_date(date).and_then(|idx| market.trend_at(idx)) {
        Some(value) => {
            let bias = value.sentiment.bias();
            bias != Bias::Neutral && bias != predicted
        }
        None => false,
    }
}

/// Baseline matches: one position per [`RANDOM_STRIDE`]-bar slice after the
/// lookback, at a seeded random offset. The last two slices are skipped so
/// every match leaves bars for the outcome to play out.
pub fn random_matches(chart: &Chart, lookback: usize, seed: u64) -> Result<Vec<PatternMatch>, SigbenchError> {
    ensure_scannable(chart)?;
    let lookback = clamp_lookback(lookback);
    let available = chart.len().saturating_sub(lookback);
    let slices = (available / RANDOM_STRIDE).saturating_sub(2);
    let mut rng = StdRng::seed_from_u64(seed ^ code_hash(&chart.info.code));

    let matches = (0..slices)
        .map(|slice| {
            let i = lookback + slice * RANDOM_STRIDE + rng.gen_range(0..RANDOM_STRIDE);
            PatternMatch {
                signal_name: RANDOM_SIGNAL.to_string(),
                code: chart.info.code.clone(),
                industry: chart.info.industry.clone(),
                sector: chart.info.sector.clone(),
                predicted: Bias::Bull,
                prologue: ChartRange {
                    start: i - lookback,
                    end: i - 1,
                },
                pattern: ChartRange { start: i, end: i },
                position: i,
            }
        })
        .collect();
    Ok(matches)
}

/// FNV-1a, so each symbol gets its own stream regardless of scan order.
fn code_hash(code: &str) -> u64 {
    code.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
