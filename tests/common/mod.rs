#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use serde_json::json;
use sigbench::domain::backtest::{BacktestConfig, BacktestRun, DateRange};
use sigbench::domain::chart::ChartInfo;
use sigbench::domain::error::SigbenchError;
pub use sigbench::domain::ohlcv::PriceBar;
use sigbench::domain::resolver::ResultDetail;
use sigbench::domain::stats::StatRow;
use sigbench::ports::bar_port::BarRepository;
use sigbench::ports::result_port::ResultSink;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

pub const SOURCE: &str = "asx";

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 6).unwrap()
}

pub fn make_bar(code: &str, i: usize, open: f64, high: f64, low: f64, close: f64, volume: i64) -> PriceBar {
    PriceBar {
        source: SOURCE.into(),
        code: code.into(),
        date: start_date() + Duration::days(i as i64),
        open,
        high,
        low,
        close,
        volume,
        factor: 1.0,
    }
}

/// Oscillating closes; `phase` shifts the wave so symbols differ.
pub fn wavy_bars(code: &str, count: usize, phase: f64) -> Vec<PriceBar> {
    (0..count)
        .map(|i| {
            let c = 100.0 + 12.0 * ((i as f64) / 6.0 + phase).sin();
            let o = c + ((i % 4) as f64 - 1.5);
            let v = 1000 + ((i * 53) % 1100) as i64;
            make_bar(code, i, o, c.max(o) + 1.0, c.min(o) - 1.0, c, v)
        })
        .collect()
}

pub fn rising_bars(code: &str, count: usize) -> Vec<PriceBar> {
    (0..count)
        .map(|i| {
            let c = 50.0 + i as f64;
            make_bar(code, i, c - 0.5, c + 1.0, c - 1.0, c, 1000)
        })
        .collect()
}

/// Closes falling one point a bar from 300.
pub fn falling_bars(code: &str, count: usize) -> Vec<PriceBar> {
    (0..count)
        .map(|i| {
            let c = 300.0 - i as f64;
            make_bar(code, i, c + 0.5, c + 1.0, c - 1.0, c, 1000)
        })
        .collect()
}

/// Minimal valid configuration as JSON, for tests to extend.
pub fn config_json(backtest_type: &str) -> serde_json::Value {
    json!({
        "type": backtest_type,
        "source": SOURCE,
        "name": "test run",
        "entryPricePoint": "Close",
        "targetUp": { "pricePoint": "High", "value": 0.05 },
        "targetDown": { "pricePoint": "Low", "value": 0.05 },
        "signalNames": [],
    })
}

pub fn config_from(value: serde_json::Value) -> BacktestConfig {
    serde_json::from_value(value).unwrap()
}

pub fn random_config(parallel: usize) -> BacktestConfig {
    let mut value = config_json("Random Baseline");
    value["maxParallelization"] = json!(parallel);
    value["randomSeed"] = json!(42);
    config_from(value)
}

pub fn candlestick_config(signals: &[&str], parallel: usize) -> BacktestConfig {
    let mut value = config_json("Candlestick Pattern");
    value["signalNames"] = json!(signals);
    value["maxParallelization"] = json!(parallel);
    config_from(value)
}

/// In-memory bar repository with scripted failures.
#[derive(Default)]
pub struct MockBars {
    pub bars: HashMap<String, Vec<PriceBar>>,
    pub classification: HashMap<String, (String, String)>,
    pub errors: HashMap<String, String>,
    pub rate_limited: HashSet<String>,
}

impl MockBars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, code: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.insert(code.to_string(), bars);
        self
    }

    pub fn with_entity(mut self, code: &str, industry: &str, sector: &str) -> Self {
        self.classification
            .insert(code.to_string(), (industry.to_string(), sector.to_string()));
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.bars.entry(code.to_string()).or_default();
        self.errors.insert(code.to_string(), reason.to_string());
        self
    }

    pub fn with_rate_limit(mut self, code: &str) -> Self {
        self.bars.entry(code.to_string()).or_default();
        self.rate_limited.insert(code.to_string());
        self
    }
}

impl BarRepository for MockBars {
    fn fetch(&self, source: &str, code: &str, range: &DateRange) -> Result<Vec<PriceBar>, SigbenchError> {
        if self.rate_limited.contains(code) {
            return Err(SigbenchError::RateLimited {
                provider: source.to_string(),
            });
        }
        if let Some(reason) = self.errors.get(code) {
            return Err(SigbenchError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .bars
            .get(code)
            .map(|bars| bars.iter().filter(|b| range.contains(b.date)).cloned().collect())
            .unwrap_or_default())
    }

    fn list_codes(&self, _source: &str) -> Result<Vec<String>, SigbenchError> {
        let mut codes: Vec<String> = self.bars.keys().cloned().collect();
        codes.sort();
        Ok(codes)
    }

    fn describe(&self, source: &str, code: &str) -> Result<ChartInfo, SigbenchError> {
        let (industry, sector) = match self.classification.get(code) {
            Some((i, s)) => (Some(i.clone()), Some(s.clone())),
            None => (None, None),
        };
        Ok(ChartInfo {
            source: source.to_string(),
            code: code.to_string(),
            industry,
            sector,
            ..ChartInfo::default()
        })
    }
}

type ResultKey = (Uuid, String, String, NaiveDate);
type StatKey = (Uuid, String, String, String);

/// Result sink keyed the way the database keys its rows.
#[derive(Default)]
pub struct MemorySink {
    pub runs: Mutex<Vec<BacktestRun>>,
    pub results: Mutex<BTreeMap<ResultKey, ResultDetail>>,
    pub stats: Mutex<BTreeMap<StatKey, StatRow>>,
    pub completed: Mutex<Vec<Uuid>>,
    pub reject_code: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(code: &str) -> Self {
        Self {
            reject_code: Some(code.to_string()),
            ..Self::default()
        }
    }

    pub fn stat_rows(&self) -> Vec<StatRow> {
        self.stats.lock().unwrap().values().cloned().collect()
    }

    pub fn result_rows(&self) -> Vec<ResultDetail> {
        self.results.lock().unwrap().values().cloned().collect()
    }
}

impl ResultSink for MemorySink {
    fn create_run(&self, config: &BacktestConfig, process_id: Uuid) -> Result<BacktestRun, SigbenchError> {
        let run = BacktestRun::new(config, process_id);
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
    }

    fn upsert_result(&self, result: &ResultDetail) -> Result<(), SigbenchError> {
        if self.reject_code.as_deref() == Some(result.code.as_str()) {
            return Err(SigbenchError::DatabaseQuery {
                reason: "disk full".into(),
            });
        }
        let key = (
            result.backtest_id,
            result.signal_name.clone(),
            result.code.clone(),
            result.entry.date,
        );
        self.results.lock().unwrap().insert(key, result.clone());
        Ok(())
    }

    fn upsert_stat(&self, stat: &StatRow) -> Result<(), SigbenchError> {
        let key = (
            stat.backtest_id,
            stat.signal_name.clone(),
            stat.category.to_string(),
            stat.sub_category.clone(),
        );
        self.stats.lock().unwrap().insert(key, stat.clone());
        Ok(())
    }

    fn results_for(&self, backtest_id: Uuid) -> Result<Vec<ResultDetail>, SigbenchError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.backtest_id == backtest_id)
            .cloned()
            .collect())
    }

    fn complete_run(&self, backtest_id: Uuid) -> Result<(), SigbenchError> {
        self.completed.lock().unwrap().push(backtest_id);
        Ok(())
    }
}

/// Comparable view of a result, without generated ids.
pub fn outcome_key(r: &ResultDetail) -> (String, String, NaiveDate, Option<String>, Option<i64>, Option<i64>) {
    (
        r.signal_name.clone(),
        r.code.clone(),
        r.entry.date,
        r.winner.map(|w| w.to_string()),
        r.trading_days,
        r.calendar_days,
    )
}
