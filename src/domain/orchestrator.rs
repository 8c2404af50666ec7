//! Drives one backtest run from configuration to persisted stats.
//!
//! Scanning fans out over symbols (a rayon pool when `maxParallelization`
//! is at least 2, the calling thread otherwise). Matches flow through two
//! channels to a resolver thread and a persister thread. Once every symbol
//! is scanned the match sender is dropped, which closes the pipeline stage by
//! stage; joining both consumers is the drain barrier before stats run.

use crate::domain::backtest::{BacktestConfig, BacktestRun, BacktestType, RunState};
use crate::domain::chart::{combine_market, convert_interval, Chart, ChartInfo, ChartInterval};
use crate::domain::error::SigbenchError;
use crate::domain::moving_average::MovingAverageKey;
use crate::domain::ohlcv::PriceBar;
use crate::domain::pattern::scanner::{discover_matches, random_matches, PatternMatch, ScanOptions};
use crate::domain::pattern::PatternDefinition;
use crate::domain::resolver::{self, ResultDetail};
use crate::domain::stats::{self, StatCategory, StatRow};
use crate::domain::trend::TrendSpec;
use crate::ports::bar_port::BarRepository;
use crate::ports::progress_port::{NoProgress, ProgressEvent, ProgressSink};
use crate::ports::result_port::ResultSink;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared stop flag. Checked before each symbol and each pattern. Matches
/// already queued still drain and stats still run, then the run returns
/// [`SigbenchError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct CachedBars {
    loaded: Instant,
    bars: Arc<Vec<PriceBar>>,
}

/// Per-run bar cache keyed by code. Entries older than the TTL read as
/// missing.
pub struct BarCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedBars>>,
}

impl BarCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, code: &str, bars: Vec<PriceBar>) -> Arc<Vec<PriceBar>> {
        let bars = Arc::new(bars);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            code.to_string(),
            CachedBars {
                loaded: Instant::now(),
                bars: Arc::clone(&bars),
            },
        );
        bars
    }

    pub fn get(&self, code: &str) -> Option<Arc<Vec<PriceBar>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(code)
            .filter(|e| e.loaded.elapsed() <= self.ttl)
            .map(|e| Arc::clone(&e.bars))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a finished run reports. A run with failed symbols still completes.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run: BacktestRun,
    pub elapsed: Duration,
    pub state: RunState,
    pub symbols_total: usize,
    pub symbols_scanned: usize,
    pub symbols_skipped: usize,
    pub symbols_failed: usize,
    pub matches: usize,
    pub unresolved: usize,
    pub results_persisted: usize,
    pub persistence_failures: usize,
    pub stats_rows: usize,
    pub fetch_halted: bool,
    pub overall: Vec<StatRow>,
}

impl RunSummary {
    pub fn is_degraded(&self) -> bool {
        self.symbols_failed > 0
    }
}

/// Parsed configuration pieces every worker needs.
struct ScanPlan {
    patterns: Vec<&'static PatternDefinition>,
    interval: ChartInterval,
    moving_averages: Vec<MovingAverageKey>,
    trends: Vec<TrendSpec>,
    market_trends: Vec<TrendSpec>,
    scan: ScanOptions,
}

impl ScanPlan {
    fn new(config: &BacktestConfig) -> Result<Self, SigbenchError> {
        let patterns = match config.backtest_type {
            BacktestType::CandlestickPattern => config.patterns()?,
            BacktestType::RandomBaseline => Vec::new(),
        };
        Ok(Self {
            patterns,
            interval: config.interval(),
            moving_averages: config.chart_moving_averages()?,
            trends: config.chart_trends()?,
            market_trends: config.market_trends()?,
            scan: config.scan_options(),
        })
    }
}

enum ScanOutcome {
    Scanned(usize),
    Skipped(String),
}

#[derive(Default)]
struct ScanCounters {
    scanned: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    matches: AtomicUsize,
}

struct Consumed {
    unresolved: usize,
    persisted: usize,
    failed: usize,
}

pub struct Orchestrator<'a> {
    bars: &'a dyn BarRepository,
    sink: &'a dyn ResultSink,
    progress: &'a dyn ProgressSink,
    cancel: CancellationToken,
    expected: Option<BacktestType>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(bars: &'a dyn BarRepository, sink: &'a dyn ResultSink) -> Self {
        Self {
            bars,
            sink,
            progress: &NoProgress,
            cancel: CancellationToken::new(),
            expected: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Rejects configurations written for another backtest type.
    pub fn expecting(mut self, backtest_type: BacktestType) -> Self {
        self.expected = Some(backtest_type);
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run(&self, config: &BacktestConfig, process_id: Uuid) -> Result<RunSummary, SigbenchError> {
        let started = Instant::now();
        if let Some(expected) = self.expected {
            config.expect_type(expected)?;
        }
        config.validate()?;
        let plan = ScanPlan::new(config)?;

        let run = self.sink.create_run(config, process_id)?;
        let mut state = RunState::Created;
        info!(run_id = %run.id, process_id = %process_id, name = %run.name, backtest_type = %run.backtest_type, "backtest created");

        let market = self.market_chart(config, &plan)?;
        let codes = self.bars.list_codes(&config.source)?;
        self.progress.emit(ProgressEvent::RunStarted {
            run_id: run.id,
            symbols: codes.len(),
        });

        state = self.advance(&run, state);
        let cache = BarCache::new(Duration::from_secs(config.cache_ttl_seconds));
        let counters = ScanCounters::default();
        let halted = AtomicBool::new(false);

        let consumed = thread::scope(|scope| -> Result<Consumed, SigbenchError> {
            let (match_tx, match_rx) = mpsc::channel::<PatternMatch>();
            let (result_tx, result_rx) = mpsc::channel::<ResultDetail>();
            let resolver = scope.spawn(|| self.resolve_matches(match_rx, result_tx, &cache, config, run.id));
            let persister = scope.spawn(|| self.persist_results(result_rx));

            let work = |code: &String| {
                self.scan_guarded(code, config, &plan, market.as_ref(), &cache, &counters, &halted, &match_tx)
            };
            if config.max_parallelization >= 2 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(config.max_parallelization)
                    .build()
                    .map_err(|e| SigbenchError::InvalidInput {
                        reason: format!("cannot start {} scan workers: {e}", config.max_parallelization),
                    })?;
                pool.install(|| codes.par_iter().for_each(work));
            } else {
                codes.iter().for_each(work);
            }
            drop(match_tx);

            let unresolved = resolver.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
            let (persisted, failed) = persister.join().unwrap_or_else(|e| std::panic::resume_unwind(e));
            Ok(Consumed {
                unresolved,
                persisted,
                failed,
            })
        })?;
        state = self.advance(&run, state);

        state = self.advance(&run, state);
        let (overall, stats_rows) = self.aggregate(&run);

        if let Err(e) = self.sink.complete_run(run.id) {
            warn!(run_id = %run.id, error = %e, "could not mark run complete");
        }
        state = self.advance(&run, state);

        let elapsed = started.elapsed();
        self.progress.emit(ProgressEvent::RunFinished {
            run_id: run.id,
            elapsed,
        });
        let summary = RunSummary {
            elapsed,
            state,
            symbols_total: codes.len(),
            symbols_scanned: counters.scanned.load(Ordering::SeqCst),
            symbols_skipped: counters.skipped.load(Ordering::SeqCst),
            symbols_failed: counters.failed.load(Ordering::SeqCst),
            matches: counters.matches.load(Ordering::SeqCst),
            unresolved: consumed.unresolved,
            results_persisted: consumed.persisted,
            persistence_failures: consumed.failed,
            stats_rows,
            fetch_halted: halted.load(Ordering::SeqCst),
            overall,
            run,
        };
        info!(
            run_id = %summary.run.id,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            scanned = summary.symbols_scanned,
            failed = summary.symbols_failed,
            matches = summary.matches,
            persisted = summary.results_persisted,
            "backtest finished"
        );
        if self.cancel.is_cancelled() {
            warn!(run_id = %summary.run.id, scanned = summary.symbols_scanned, "backtest cancelled");
            return Err(SigbenchError::Cancelled);
        }
        Ok(summary)
    }

    fn advance(&self, run: &BacktestRun, state: RunState) -> RunState {
        let next = state.next().unwrap_or(state);
        info!(run_id = %run.id, from = %state, to = %next, "run state");
        self.progress.emit(ProgressEvent::StateChanged {
            run_id: run.id,
            state: next,
        });
        next
    }

    /// Combined chart over the configured market codes. Codes that fail to
    /// load are left out; with none left there is no market filter.
    fn market_chart(&self, config: &BacktestConfig, plan: &ScanPlan) -> Result<Option<Chart>, SigbenchError> {
        let Some(market) = &config.market else {
            return Ok(None);
        };
        let range = config.date_range();
        let mut series = Vec::with_capacity(market.codes.len());
        for code in &market.codes {
            match self.bars.fetch(&config.source, code, &range) {
                Ok(bars) if !bars.is_empty() => series.push(bars),
                Ok(_) => warn!(code = %code, "market code has no bars"),
                Err(e) => warn!(code = %code, error = %e, "market code failed to load"),
            }
        }
        if series.is_empty() {
            warn!(codes = ?market.codes, "no market bars, market filter disabled");
            return Ok(None);
        }

        let name = market.codes.join("+");
        let bars = combine_market(&config.source, &name, &series);
        let info = ChartInfo {
            source: config.source.clone(),
            code: name,
            ..ChartInfo::default()
        };
        let chart = Chart::builder(info, bars)
            .interval(plan.interval)
            .trends(&plan.market_trends)
            .build()?;
        debug!(code = %chart.info.code, bars = chart.len(), "market chart built");
        Ok(Some(chart))
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_guarded(
        &self,
        code: &str,
        config: &BacktestConfig,
        plan: &ScanPlan,
        market: Option<&Chart>,
        cache: &BarCache,
        counters: &ScanCounters,
        halted: &AtomicBool,
        matches: &Sender<PatternMatch>,
    ) {
        if self.cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
            return;
        }
        let outcome = match self.scan_symbol(code, config, plan, market, cache, matches) {
            Err(e @ SigbenchError::InsufficientData { .. }) => Ok(ScanOutcome::Skipped(e.to_string())),
            other => other,
        };
        match outcome {
            Ok(ScanOutcome::Scanned(found)) => {
                counters.scanned.fetch_add(1, Ordering::SeqCst);
                counters.matches.fetch_add(found, Ordering::SeqCst);
                debug!(code, matches = found, "symbol scanned");
                self.progress.emit(ProgressEvent::SymbolScanned {
                    code: code.to_string(),
                    matches: found,
                });
            }
            Ok(ScanOutcome::Skipped(reason)) => {
                counters.skipped.fetch_add(1, Ordering::SeqCst);
                debug!(code, reason = %reason, "symbol not eligible");
                self.progress.emit(ProgressEvent::SymbolSkipped {
                    code: code.to_string(),
                    reason,
                });
            }
            Err(SigbenchError::RateLimited { provider }) => {
                if !halted.swap(true, Ordering::SeqCst) {
                    warn!(code, provider = %provider, "rate limited, no further symbols will be fetched");
                    self.progress.emit(ProgressEvent::FetchHalted { provider });
                }
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(code, error = %e, "symbol failed");
                self.progress.emit(ProgressEvent::SymbolFailed {
                    code: code.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Builds the chart, caches its bars and sends matches as each pattern
    /// finishes. An error stops this symbol's remaining patterns only.
    fn scan_symbol(
        &self,
        code: &str,
        config: &BacktestConfig,
        plan: &ScanPlan,
        market: Option<&Chart>,
        cache: &BarCache,
        matches: &Sender<PatternMatch>,
    ) -> Result<ScanOutcome, SigbenchError> {
        let bars = self.bars.fetch(&config.source, code, &config.date_range())?;
        if bars.is_empty() {
            return Err(SigbenchError::NoData {
                code: code.to_string(),
                provider: config.source.clone(),
            });
        }
        config.filter.ensure_history(code, &config.source, &bars)?;
        if let Some(reason) = config.filter.rejection(&bars) {
            return Ok(ScanOutcome::Skipped(reason));
        }

        let info = self.bars.describe(&config.source, code)?;
        let chart = Chart::builder(info, bars)
            .interval(plan.interval)
            .moving_averages(&plan.moving_averages)
            .trends(&plan.trends)
            .build()?;
        cache.insert(code, chart.bars().to_vec());

        let mut sent = 0;
        let mut send_all = |found: Vec<PatternMatch>| {
            for m in found {
                if matches.send(m).is_err() {
                    break;
                }
                sent += 1;
            }
        };
        match config.backtest_type {
            BacktestType::CandlestickPattern => {
                for pattern in &plan.patterns {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    send_all(discover_matches(pattern, &chart, market, &plan.scan)?);
                }
            }
            BacktestType::RandomBaseline => {
                send_all(random_matches(&chart, plan.scan.lookback, config.random_seed)?);
            }
        }
        Ok(ScanOutcome::Scanned(sent))
    }

    /// Bars at the chart interval, from the cache or reloaded when the entry
    /// has expired.
    fn bars_for(&self, code: &str, config: &BacktestConfig, cache: &BarCache) -> Result<Arc<Vec<PriceBar>>, SigbenchError> {
        if let Some(bars) = cache.get(code) {
            return Ok(bars);
        }
        debug!(code, "bar cache miss");
        let bars = self.bars.fetch(&config.source, code, &config.date_range())?;
        Ok(cache.insert(code, convert_interval(&bars, config.interval())))
    }

    fn resolve_matches(
        &self,
        matches: Receiver<PatternMatch>,
        results: Sender<ResultDetail>,
        cache: &BarCache,
        config: &BacktestConfig,
        run_id: Uuid,
    ) -> usize {
        let targets = config.outcome();
        let mut unresolved = 0;
        for found in matches {
            let resolved = self
                .bars_for(&found.code, config, cache)
                .and_then(|bars| resolver::resolve(&found, &bars, run_id, &targets));
            match resolved {
                Ok(detail) => {
                    // persister gone means nothing more can be stored
                    if results.send(detail).is_err() {
                        unresolved += 1;
                    }
                }
                Err(e) => {
                    unresolved += 1;
                    warn!(code = %found.code, signal = %found.signal_name, error = %e, "match not resolved");
                }
            }
        }
        unresolved
    }

    fn persist_results(&self, results: Receiver<ResultDetail>) -> (usize, usize) {
        let (mut persisted, mut failed) = (0, 0);
        for detail in results {
            match self.sink.upsert_result(&detail) {
                Ok(()) => persisted += 1,
                Err(e) => {
                    failed += 1;
                    warn!(code = %detail.code, signal = %detail.signal_name, error = %e, "result dropped");
                    self.progress.emit(ProgressEvent::PersistFailed {
                        code: detail.code.clone(),
                        signal: detail.signal_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        (persisted, failed)
    }

    /// Stats from whatever was persisted. Returns the Overall rows and how
    /// many rows were stored.
    fn aggregate(&self, run: &BacktestRun) -> (Vec<StatRow>, usize) {
        let results = match self.sink.results_for(run.id) {
            Ok(results) => results,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "could not read results, no stats written");
                return (Vec::new(), 0);
            }
        };
        let rows = stats::aggregate_run(run, &results);
        let mut stored = 0;
        for row in &rows {
            match self.sink.upsert_stat(row) {
                Ok(()) => stored += 1,
                Err(e) => warn!(
                    run_id = %run.id,
                    signal = %row.signal_name,
                    category = %row.category,
                    error = %e,
                    "stat row dropped"
                ),
            }
        }
        let overall = rows.into_iter().filter(|r| r.category == StatCategory::Overall).collect();
        (overall, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trend::test_support::rising;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn cache_returns_inserted_bars() {
        let cache = BarCache::new(Duration::from_secs(60));
        assert!(cache.is_empty());
        cache.insert("BHP", rising(5));
        assert_eq!(cache.get("BHP").unwrap().len(), 5);
        assert!(cache.get("RIO").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_read_as_missing() {
        let cache = BarCache::new(Duration::ZERO);
        cache.insert("BHP", rising(5));
        thread::sleep(Duration::from_millis(5));
        assert!(cache.get("BHP").is_none());
    }
}
