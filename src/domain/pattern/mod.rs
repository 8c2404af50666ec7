//! Named candlestick patterns.
//!
//! The catalog is a static table: each entry carries its arity, the direction
//! it predicts, the prior sentiment it needs, and a predicate with a uniform
//! signature. Argument validation happens once in
//! [`PatternDefinition::matches`], so predicates may index the pattern window
//! and the prologue freely.

pub mod reversal;
pub mod scanner;

use crate::domain::chart::Chart;
use crate::domain::error::SigbenchError;
use crate::domain::trend::Bias;
use std::fmt;

/// Per-scan parameters handed to every predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternArgs {
    pub bars_required: usize,
    pub lookback: usize,
    pub volume_factor: f64,
}

/// `(chart, position, args) -> matched`. Only called with validated arguments.
pub type MatchFn = fn(&Chart, usize, &PatternArgs) -> bool;

pub struct PatternDefinition {
    pub name: &'static str,
    pub bars_required: usize,
    pub predicted: Bias,
    pub required: Bias,
    is_match: MatchFn,
}

impl fmt::Debug for PatternDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternDefinition")
            .field("name", &self.name)
            .field("bars_required", &self.bars_required)
            .field("predicted", &self.predicted)
            .field("required", &self.required)
            .finish()
    }
}

impl PatternDefinition {
    /// Evaluates the pattern with its window starting at `position`. Returns
    /// the match position, or `None`.
    pub fn matches(
        &self,
        chart: &Chart,
        position: usize,
        lookback: usize,
        volume_factor: f64,
    ) -> Result<Option<usize>, SigbenchError> {
        let args = PatternArgs {
            bars_required: self.bars_required,
            lookback,
            volume_factor,
        };
        check_args(chart, position, &args)?;
        Ok((self.is_match)(chart, position, &args).then_some(position))
    }
}

fn check_args(chart: &Chart, position: usize, args: &PatternArgs) -> Result<(), SigbenchError> {
    let invalid = |reason: String| Err(SigbenchError::InvalidInput { reason });
    let len = chart.len();
    if chart.is_empty() {
        return invalid(format!("chart {} has no bars", chart.info.code));
    }
    if !chart.has_trend() {
        return invalid(format!("chart {} has no computed trend", chart.info.code));
    }
    if position >= len {
        return invalid(format!("position {position} outside chart of {len} bars"));
    }
    if position < args.lookback {
        return invalid(format!(
            "position {position} precedes the {} bar lookback",
            args.lookback
        ));
    }
    if position + args.bars_required > len {
        return invalid(format!(
            "position {position} leaves fewer than {} bars in a chart of {len}",
            args.bars_required
        ));
    }
    Ok(())
}

macro_rules! pattern {
    ($name:expr, $bars:expr, $predicted:ident, $required:ident, $f:path) => {
        PatternDefinition {
            name: $name,
            bars_required: $bars,
            predicted: Bias::$predicted,
            required: Bias::$required,
            is_match: $f,
        }
    };
}

static CATALOG: &[PatternDefinition] = &[
    pattern!("Tall White Candle", 2, Bull, Neutral, reversal::tall_white_candle),
    pattern!("Bullish Engulfing", 2, Bull, Bear, reversal::bullish_engulfing),
    pattern!("Bullish Engulfing With Follow Thru", 3, Bull, Bear, reversal::bullish_engulfing_follow_thru),
    pattern!("Bullish Engulfing With Four Black Predecessors", 6, Bull, Bear, reversal::bullish_engulfing_four_black),
    pattern!("Bullish Engulfing With Tall Candles", 2, Bull, Bear, reversal::bullish_engulfing_tall),
    pattern!("Bearish Engulfing", 2, Bear, Bull, reversal::bearish_engulfing),
    pattern!("Bearish Engulfing With Follow Thru", 3, Bear, Bull, reversal::bearish_engulfing_follow_thru),
    pattern!("Bearish Engulfing With Four White Predecessors", 6, Bear, Bull, reversal::bearish_engulfing_four_white),
    pattern!("Bearish Engulfing With Tall Candles", 2, Bear, Bull, reversal::bearish_engulfing_tall),
    pattern!("Bullish Hammer", 1, Bull, Bear, reversal::bullish_hammer),
    pattern!("Bullish Hammer With Follow Thru", 2, Bull, Bear, reversal::bullish_hammer_follow_thru),
    pattern!("Bearish Hammer", 1, Bear, Bull, reversal::bearish_hammer),
    pattern!("Bearish Hammer With Follow Thru", 2, Bear, Bull, reversal::bearish_hammer_follow_thru),
    pattern!("Dark Cloud Cover", 2, Bear, Bull, reversal::dark_cloud_cover),
    pattern!("Dark Cloud Cover With Follow Thru", 3, Bear, Bull, reversal::dark_cloud_cover_follow_thru),
    pattern!("Piercing Pattern", 2, Bull, Bear, reversal::piercing),
    pattern!("Piercing Pattern With Follow Thru", 3, Bull, Bear, reversal::piercing_follow_thru),
    pattern!("Morning Star", 3, Bull, Bear, reversal::morning_star),
    pattern!("Evening Star", 3, Bear, Bull, reversal::evening_star),
    pattern!("Morning Doji Star", 3, Bull, Bear, reversal::morning_doji_star),
    pattern!("Evening Doji Star", 3, Bear, Bull, reversal::evening_doji_star),
    pattern!("Shooting Star", 1, Bear, Bull, reversal::shooting_star),
    pattern!("Inverted Hammer", 1, Bull, Bear, reversal::inverted_hammer),
    pattern!("Bullish Harami", 2, Bull, Bear, reversal::bullish_harami),
    pattern!("Bearish Harami", 2, Bear, Bull, reversal::bearish_harami),
    pattern!("Bullish Harami Cross", 2, Bull, Bear, reversal::bullish_harami_cross),
    pattern!("Bearish Harami Cross", 2, Bear, Bull, reversal::bearish_harami_cross),
    pattern!("Tweezer Top", 2, Bear, Bull, reversal::tweezer_top),
    pattern!("Tweezer Bottom", 2, Bull, Bear, reversal::tweezer_bottom),
    pattern!("Bullish Belthold", 1, Bull, Bear, reversal::bullish_belthold),
    pattern!("Bearish Belthold", 1, Bear, Bull, reversal::bearish_belthold),
    pattern!("Upside Gap Two Crows", 3, Bear, Bull, reversal::upside_gap_two_crows),
    pattern!("Three Black Crows", 3, Bear, Bull, reversal::three_black_crows),
    pattern!("Three White Soldiers", 3, Bull, Bear, reversal::three_white_soldiers),
    pattern!("Bullish Counterattack", 2, Bull, Bear, reversal::bullish_counterattack),
    pattern!("Bearish Counterattack", 2, Bear, Bull, reversal::bearish_counterattack),
];

pub fn catalog() -> &'static [PatternDefinition] {
    CATALOG
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Case-insensitive lookup that ignores whitespace, so `BullishEngulfing`
/// and `bullish engulfing` both resolve.
pub fn find(name: &str) -> Option<&'static PatternDefinition> {
    let wanted = normalize(name);
    CATALOG.iter().find(|p| normalize(p.name) == wanted)
}

/// Resolves every configured name or reports the first unknown one.
pub fn resolve(names: &[String]) -> Result<Vec<&'static PatternDefinition>, SigbenchError> {
    names
        .iter()
        .map(|name| {
            find(name).ok_or_else(|| SigbenchError::UnknownSignal { name: name.clone() })
        })
        .collect()
}
