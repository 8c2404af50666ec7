//! Success ratios and durations rolled up per signal.
//!
//! Rows are produced for the whole signal (`Overall`), then partitioned by
//! entity, industry and sector. Partitions are walked in key order and the
//! inputs are only read, so aggregating the same results twice yields the
//! same rows.

use crate::domain::backtest::{BacktestRun, TargetPercentage};
use crate::domain::pattern;
use crate::domain::pattern::scanner::RANDOM_SIGNAL;
use crate::domain::resolver::{Direction, ResultDetail};
use crate::domain::trend::Bias;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

pub const OVERALL_KEY: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatCategory {
    Overall,
    Entity,
    Industry,
    Sector,
}

impl fmt::Display for StatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatCategory::Overall => "Overall",
            StatCategory::Entity => "Entity",
            StatCategory::Industry => "Industry",
            StatCategory::Sector => "Sector",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for StatCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Overall" => Ok(StatCategory::Overall),
            "Entity" => Ok(StatCategory::Entity),
            "Industry" => Ok(StatCategory::Industry),
            "Sector" => Ok(StatCategory::Sector),
            other => Err(format!("unknown stat category: {other}")),
        }
    }
}

/// Direction a signal must resolve in to count as a success, and the move
/// it was measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessCriterion {
    pub direction: Option<Direction>,
    pub percentage: f64,
}

impl SuccessCriterion {
    pub fn new(predicted: Bias, up: &TargetPercentage, down: &TargetPercentage) -> Self {
        let (direction, target) = match predicted {
            Bias::Bull => (Some(Direction::Up), up.magnitude()),
            Bias::Bear => (Some(Direction::Down), down.magnitude()),
            Bias::Neutral => (None, 0.0),
        };
        Self {
            direction,
            percentage: (target * 100.0 * 100.0).round() / 100.0,
        }
    }

    fn is_met(&self, result: &ResultDetail) -> bool {
        self.direction.is_some() && result.winner == self.direction
    }
}

impl fmt::Display for SuccessCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Some(d) => write!(f, "{d} {}%", self.percentage),
            None => write!(f, "Sideways {}%", self.percentage),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub backtest_id: Uuid,
    pub signal_name: String,
    pub category: StatCategory,
    pub sub_category: String,
    pub number_entities: usize,
    pub number_signals: usize,
    pub success_percentage: f64,
    pub success_criterion: String,
    pub success_duration_trading_days: f64,
    pub success_duration_calendar_days: f64,
}

fn mean(values: impl Iterator<Item = i64>) -> f64 {
    let (sum, n) = values.fold((0i64, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum as f64 / n as f64 }
}

fn row(
    backtest_id: Uuid,
    signal_name: &str,
    criterion: &SuccessCriterion,
    category: StatCategory,
    sub_category: &str,
    subset: &[&ResultDetail],
) -> StatRow {
    let entities: BTreeSet<&str> = subset.iter().map(|r| r.code.as_str()).collect();
    let winners: Vec<&ResultDetail> = subset.iter().copied().filter(|r| criterion.is_met(r)).collect();
    StatRow {
        backtest_id,
        signal_name: signal_name.to_string(),
        category,
        sub_category: sub_category.to_string(),
        number_entities: entities.len(),
        number_signals: subset.len(),
        success_percentage: winners.len() as f64 / subset.len() as f64,
        success_criterion: criterion.to_string(),
        success_duration_trading_days: mean(winners.iter().filter_map(|r| r.trading_days)),
        success_duration_calendar_days: mean(winners.iter().filter_map(|r| r.calendar_days)),
    }
}

fn partition<'a>(
    subset: &[&'a ResultDetail],
    key: impl Fn(&ResultDetail) -> Option<&str>,
) -> BTreeMap<String, Vec<&'a ResultDetail>> {
    let mut groups: BTreeMap<String, Vec<&ResultDetail>> = BTreeMap::new();
    for &r in subset {
        if let Some(k) = key(r) {
            groups.entry(k.to_string()).or_default().push(r);
        }
    }
    groups
}

/// Rows for one signal. Results for other signals are ignored; no rows are
/// produced when the signal has no results.
pub fn aggregate(
    backtest_id: Uuid,
    signal_name: &str,
    criterion: &SuccessCriterion,
    results: &[ResultDetail],
) -> Vec<StatRow> {
    let subset: Vec<&ResultDetail> = results.iter().filter(|r| r.signal_name == signal_name).collect();
    if subset.is_empty() {
        return Vec::new();
    }

    let mut rows = vec![row(
        backtest_id,
        signal_name,
        criterion,
        StatCategory::Overall,
        OVERALL_KEY,
        &subset,
    )];
    let partitions: [(StatCategory, fn(&ResultDetail) -> Option<&str>); 3] = [
        (StatCategory::Entity, |r| Some(r.code.as_str())),
        (StatCategory::Industry, |r| r.industry.as_deref()),
        (StatCategory::Sector, |r| r.sector.as_deref()),
    ];
    for (category, key) in partitions {
        for (name, group) in partition(&subset, key) {
            rows.push(row(backtest_id, signal_name, criterion, category, &name, &group));
        }
    }
    rows
}

/// Predicted direction for a persisted signal name.
pub fn predicted_for(signal_name: &str) -> Option<Bias> {
    if signal_name == RANDOM_SIGNAL {
        return Some(Bias::Bull);
    }
    pattern::find(signal_name).map(|p| p.predicted)
}

/// Rows for every signal present in `results`, signals in name order.
pub fn aggregate_run(run: &BacktestRun, results: &[ResultDetail]) -> Vec<StatRow> {
    let names: BTreeSet<&str> = results.iter().map(|r| r.signal_name.as_str()).collect();
    let mut rows = Vec::new();
    for name in names {
        let Some(predicted) = predicted_for(name) else {
            warn!(signal = name, run_id = %run.id, "skipping stats for unknown signal");
            continue;
        };
        let criterion = SuccessCriterion::new(predicted, &run.target_up, &run.target_down);
        rows.extend(aggregate(run.id, name, &criterion, results));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::PricePoint;
    use crate::domain::resolver::PriceHit;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn target(value: f64) -> TargetPercentage {
        TargetPercentage {
            price_point: PricePoint::Close,
            value,
        }
    }

    fn result(signal: &str, code: &str, industry: Option<&str>, winner: Option<Direction>, days: i64) -> ResultDetail {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let hit = PriceHit {
            date,
            price_point: PricePoint::Close,
            price: 1.0,
        };
        ResultDetail {
            id: Uuid::new_v4(),
            backtest_id: Uuid::nil(),
            signal_name: signal.into(),
            code: code.into(),
            industry: industry.map(String::from),
            sector: Some("Materials".into()),
            entry: hit,
            up: None,
            down: None,
            winner,
            trading_days: winner.map(|_| days),
            calendar_days: winner.map(|_| days + 2),
        }
    }

    fn sample() -> Vec<ResultDetail> {
        vec![
            result("Bullish Engulfing", "BHP", Some("Mining"), Some(Direction::Up), 2),
            result("Bullish Engulfing", "BHP", Some("Mining"), Some(Direction::Down), 1),
            result("Bullish Engulfing", "RIO", Some("Mining"), Some(Direction::Up), 4),
            result("Bullish Engulfing", "CBA", None, None, 0),
            result("Bearish Engulfing", "BHP", Some("Mining"), Some(Direction::Down), 3),
        ]
    }

    #[test]
    fn criterion_text() {
        let up = target(0.1);
        let down = target(-0.075);
        assert_eq!(SuccessCriterion::new(Bias::Bull, &up, &down).to_string(), "Up 10%");
        assert_eq!(SuccessCriterion::new(Bias::Bear, &up, &down).to_string(), "Down 7.5%");
        assert_eq!(SuccessCriterion::new(Bias::Neutral, &up, &down).to_string(), "Sideways 0%");
    }

    #[test]
    fn overall_row() {
        let criterion = SuccessCriterion::new(Bias::Bull, &target(0.1), &target(0.1));
        let rows = aggregate(Uuid::nil(), "Bullish Engulfing", &criterion, &sample());
        let overall = &rows[0];
        assert_eq!(overall.category, StatCategory::Overall);
        assert_eq!(overall.sub_category, OVERALL_KEY);
        assert_eq!(overall.number_entities, 3);
        assert_eq!(overall.number_signals, 4);
        assert_relative_eq!(overall.success_percentage, 0.5);
        assert_relative_eq!(overall.success_duration_trading_days, 3.0);
        assert_relative_eq!(overall.success_duration_calendar_days, 5.0);
        assert_eq!(overall.success_criterion, "Up 10%");
    }

    #[test]
    fn partitions_skip_missing_keys() {
        let criterion = SuccessCriterion::new(Bias::Bull, &target(0.1), &target(0.1));
        let rows = aggregate(Uuid::nil(), "Bullish Engulfing", &criterion, &sample());
        let of = |c: StatCategory| rows.iter().filter(|r| r.category == c).collect::<Vec<_>>();

        let entities = of(StatCategory::Entity);
        assert_eq!(
            entities.iter().map(|r| r.sub_category.as_str()).collect::<Vec<_>>(),
            ["BHP", "CBA", "RIO"]
        );
        assert_eq!(entities.iter().map(|r| r.number_signals).sum::<usize>(), 4);
        assert_relative_eq!(entities[0].success_percentage, 0.5);
        assert_relative_eq!(entities[1].success_percentage, 0.0);
        assert_relative_eq!(entities[1].success_duration_trading_days, 0.0);

        let industries = of(StatCategory::Industry);
        assert_eq!(industries.len(), 1);
        assert_eq!(industries[0].number_signals, 3);
        assert_eq!(industries[0].number_entities, 2);

        let sectors = of(StatCategory::Sector);
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].number_signals, 4);
    }

    #[test]
    fn signal_without_results_has_no_rows() {
        let criterion = SuccessCriterion::new(Bias::Bull, &target(0.1), &target(0.1));
        assert!(aggregate(Uuid::nil(), "Morning Star", &criterion, &sample()).is_empty());
    }

    #[test]
    fn run_aggregation_is_repeatable() {
        let config = serde_json::from_str(
            r#"{"type":"Candlestick Pattern","source":"asx","name":"t","entryPricePoint":"Close",
                "targetUp":{"pricePoint":"High","value":0.1},"targetDown":{"pricePoint":"Low","value":0.05},
                "signalNames":["Bullish Engulfing","Bearish Engulfing"]}"#,
        )
        .unwrap();
        let run = BacktestRun::new(&config, Uuid::new_v4());
        let results = sample();
        let first = aggregate_run(&run, &results);
        let second = aggregate_run(&run, &results);
        assert_eq!(first, second);
        let bearish: Vec<_> = first.iter().filter(|r| r.signal_name == "Bearish Engulfing").collect();
        assert_eq!(bearish[0].success_criterion, "Down 5%");
        assert_relative_eq!(bearish[0].success_percentage, 1.0);
    }

    #[test]
    fn random_signal_predicts_up() {
        assert_eq!(predicted_for(RANDOM_SIGNAL), Some(Bias::Bull));
        assert_eq!(predicted_for("Evening Star"), Some(Bias::Bear));
        assert_eq!(predicted_for("nope"), None);
    }
}
