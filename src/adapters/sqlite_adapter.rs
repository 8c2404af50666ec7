//! SQLite persistence: price history, splits, entities, runs, results and
//! stats.

use crate::domain::backtest::{BacktestConfig, BacktestRun, DateRange};
use crate::domain::chart::ChartInfo;
use crate::domain::error::SigbenchError;
use crate::domain::ohlcv::PriceBar;
use crate::domain::resolver::{PriceHit, ResultDetail};
use crate::domain::split::{self, SplitEvent};
use crate::domain::stats::StatRow;
use crate::ports::bar_port::BarRepository;
use crate::ports::result_port::ResultSink;
use crate::ports::split_port::SplitRepository;
use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_POOL_SIZE: u32 = 4;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS eod_prices (
    source TEXT NOT NULL,
    code TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (source, code, date)
);
CREATE TABLE IF NOT EXISTS eod_adjusted_prices (
    source TEXT NOT NULL,
    code TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    factor REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (source, code, date)
);
CREATE TABLE IF NOT EXISTS splits (
    source TEXT NOT NULL,
    code TEXT NOT NULL,
    split_date TEXT NOT NULL,
    ratio TEXT NOT NULL,
    PRIMARY KEY (source, code, split_date)
);
CREATE TABLE IF NOT EXISTS entities (
    source TEXT NOT NULL,
    code TEXT NOT NULL,
    industry TEXT,
    sector TEXT,
    PRIMARY KEY (source, code)
);
CREATE TABLE IF NOT EXISTS backtests (
    id TEXT PRIMARY KEY,
    process_id TEXT NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    source TEXT NOT NULL,
    description TEXT,
    entry_price_point TEXT NOT NULL,
    target_up_price_point TEXT NOT NULL,
    target_up_percentage REAL NOT NULL,
    target_down_price_point TEXT NOT NULL,
    target_down_percentage REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS backtest_results (
    id TEXT NOT NULL,
    backtest_id TEXT NOT NULL,
    signal_name TEXT NOT NULL,
    code TEXT NOT NULL,
    industry TEXT,
    sector TEXT,
    entry_date TEXT NOT NULL,
    entry_price_point TEXT NOT NULL,
    entry_price REAL NOT NULL,
    up_date TEXT,
    up_price_point TEXT,
    up_price REAL,
    down_date TEXT,
    down_price_point TEXT,
    down_price REAL,
    result_direction TEXT,
    trading_days INTEGER,
    calendar_days INTEGER,
    PRIMARY KEY (backtest_id, signal_name, code, entry_date)
);
CREATE TABLE IF NOT EXISTS backtest_stats (
    backtest_id TEXT NOT NULL,
    signal_name TEXT NOT NULL,
    category TEXT NOT NULL,
    sub_category TEXT NOT NULL,
    number_entities INTEGER NOT NULL,
    number_signals INTEGER NOT NULL,
    success_percentage REAL NOT NULL,
    success_criterion TEXT NOT NULL,
    success_duration_trading_days REAL NOT NULL,
    success_duration_calendar_days REAL NOT NULL,
    PRIMARY KEY (backtest_id, signal_name, category, sub_category)
);
CREATE INDEX IF NOT EXISTS idx_backtests_process ON backtests(process_id);
CREATE INDEX IF NOT EXISTS idx_results_backtest ON backtest_results(backtest_id);";

/// Runs grouped by the process that created them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSummary {
    pub process_id: Uuid,
    pub runs: usize,
    pub created_at: DateTime<Utc>,
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: r2d2::Error) -> SigbenchError {
    SigbenchError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> SigbenchError {
    SigbenchError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn conversion(idx: usize, text: &str, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("{text}: {reason}").into(),
    )
}

/// Reads a text column through `FromStr`.
fn parsed<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: T::Err| conversion(idx, &text, e.to_string()))
}

fn parsed_opt<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e: T::Err| conversion(idx, &t, e.to_string())))
        .transpose()
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| conversion(idx, &text, e.to_string()))
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn hit_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PriceHit>> {
    let date: Option<String> = row.get(idx)?;
    let Some(date) = date else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| conversion(idx, &date, e.to_string()))?;
    Ok(Some(PriceHit {
        date,
        price_point: parsed(row, idx + 1)?,
        price: row.get(idx + 2)?,
    }))
}

fn bar_from_row(row: &Row<'_>) -> rusqlite::Result<PriceBar> {
    Ok(PriceBar {
        source: row.get(0)?,
        code: row.get(1)?,
        date: date_at(row, 2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
        factor: row.get(8)?,
    })
}

impl SqliteAdapter {
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, SigbenchError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(db_err)?;
        debug!(path = %path.display(), pool_size, "sqlite pool opened");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, SigbenchError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, SigbenchError> {
        self.pool.get().map_err(db_err)
    }

    pub fn initialize_schema(&self) -> Result<(), SigbenchError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    pub fn insert_bars(&self, bars: &[PriceBar]) -> Result<(), SigbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO eod_prices (source, code, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bar.source,
                    bar.code,
                    date_text(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    /// Replaces stored adjusted bars for the same dates.
    pub fn store_adjusted(&self, bars: &[PriceBar]) -> Result<(), SigbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO eod_adjusted_prices
                 (source, code, date, open, high, low, close, volume, factor)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    bar.source,
                    bar.code,
                    date_text(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.factor
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    pub fn insert_splits(&self, splits: &[SplitEvent]) -> Result<(), SigbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for s in splits {
            tx.execute(
                "INSERT OR REPLACE INTO splits (source, code, split_date, ratio) VALUES (?1, ?2, ?3, ?4)",
                params![s.source, s.code, date_text(s.date), format!("{}/{}", s.after, s.before)],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    pub fn insert_split_text(&self, source: &str, code: &str, date: NaiveDate, ratio: &str) -> Result<(), SigbenchError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO splits (source, code, split_date, ratio) VALUES (?1, ?2, ?3, ?4)",
                params![source, code, date_text(date), ratio],
            )
            .map_err(query_err)?;
        Ok(())
    }

    pub fn upsert_entity(
        &self,
        source: &str,
        code: &str,
        industry: Option<&str>,
        sector: Option<&str>,
    ) -> Result<(), SigbenchError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO entities (source, code, industry, sector) VALUES (?1, ?2, ?3, ?4)",
                params![source, code, industry, sector],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn fetch_from(&self, table: &str, source: &str, code: &str, range: &DateRange) -> Result<Vec<PriceBar>, SigbenchError> {
        let factor = if table == "eod_adjusted_prices" { "factor" } else { "1.0" };
        let sql = format!(
            "SELECT source, code, date, open, high, low, close, volume, {factor}
             FROM {table}
             WHERE source = ?1 AND code = ?2
               AND date >= COALESCE(?3, date) AND date <= COALESCE(?4, date)
             ORDER BY date ASC"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![source, code, range.start.map(date_text), range.end.map(date_text)],
                bar_from_row,
            )
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    pub fn fetch_raw(&self, source: &str, code: &str) -> Result<Vec<PriceBar>, SigbenchError> {
        self.fetch_from("eod_prices", source, code, &DateRange::default())
    }

    pub fn raw_codes(&self, source: &str) -> Result<Vec<String>, SigbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT code FROM eod_prices WHERE source = ?1 ORDER BY code")
            .map_err(query_err)?;
        let rows = stmt.query_map(params![source], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_err)
    }

    /// Rebuilds the adjusted series for one symbol from its raw bars and
    /// splits. Returns the number of bars written.
    pub fn adjust(&self, source: &str, code: &str) -> Result<usize, SigbenchError> {
        let raw = self.fetch_raw(source, code)?;
        if raw.is_empty() {
            return Err(SigbenchError::NoData {
                code: code.to_string(),
                provider: source.to_string(),
            });
        }
        let splits = self.fetch_splits(source, code)?;
        let adjusted = split::adjust(&raw, &splits);
        self.store_adjusted(&adjusted)?;
        info!(source, code, bars = adjusted.len(), splits = splits.len(), "adjusted bars stored");
        Ok(adjusted.len())
    }

    pub fn processes(&self) -> Result<Vec<ProcessSummary>, SigbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT process_id, COUNT(*), MIN(created_at) FROM backtests
                 GROUP BY process_id ORDER BY MIN(created_at)",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                let runs: i64 = row.get(1)?;
                Ok(ProcessSummary {
                    process_id: parsed(row, 0)?,
                    runs: runs as usize,
                    created_at: parsed(row, 2)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    /// Deletes every run, result and stat owned by the given processes.
    /// Returns the number of runs removed.
    pub fn delete_processes(&self, process_ids: &[Uuid]) -> Result<usize, SigbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut removed = 0;
        for pid in process_ids {
            let pid = pid.to_string();
            tx.execute(
                "DELETE FROM backtest_stats WHERE backtest_id IN (SELECT id FROM backtests WHERE process_id = ?1)",
                params![pid],
            )
            .map_err(query_err)?;
            tx.execute(
                "DELETE FROM backtest_results WHERE backtest_id IN (SELECT id FROM backtests WHERE process_id = ?1)",
                params![pid],
            )
            .map_err(query_err)?;
            removed += tx
                .execute("DELETE FROM backtests WHERE process_id = ?1", params![pid])
                .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(removed)
    }

    pub fn stats_for(&self, backtest_id: Uuid) -> Result<Vec<StatRow>, SigbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT backtest_id, signal_name, category, sub_category, number_entities, number_signals,
                        success_percentage, success_criterion, success_duration_trading_days,
                        success_duration_calendar_days
                 FROM backtest_stats WHERE backtest_id = ?1
                 ORDER BY signal_name, category, sub_category",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![backtest_id.to_string()], |row| {
                let entities: i64 = row.get(4)?;
                let signals: i64 = row.get(5)?;
                Ok(StatRow {
                    backtest_id: parsed(row, 0)?,
                    signal_name: row.get(1)?,
                    category: parsed(row, 2)?,
                    sub_category: row.get(3)?,
                    number_entities: entities as usize,
                    number_signals: signals as usize,
                    success_percentage: row.get(6)?,
                    success_criterion: row.get(7)?,
                    success_duration_trading_days: row.get(8)?,
                    success_duration_calendar_days: row.get(9)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl BarRepository for SqliteAdapter {
    fn fetch(&self, source: &str, code: &str, range: &DateRange) -> Result<Vec<PriceBar>, SigbenchError> {
        let adjusted = self.fetch_from("eod_adjusted_prices", source, code, range)?;
        if !adjusted.is_empty() {
            return Ok(adjusted);
        }
        self.fetch_from("eod_prices", source, code, range)
    }

    fn list_codes(&self, source: &str) -> Result<Vec<String>, SigbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT code FROM eod_prices WHERE source = ?1
                 UNION
                 SELECT code FROM eod_adjusted_prices WHERE source = ?1
                 ORDER BY code",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map(params![source], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_err)
    }

    fn describe(&self, source: &str, code: &str) -> Result<ChartInfo, SigbenchError> {
        let classification: Option<(Option<String>, Option<String>)> = self
            .conn()?
            .query_row(
                "SELECT industry, sector FROM entities WHERE source = ?1 AND code = ?2",
                params![source, code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(query_err)?;
        let (industry, sector) = classification.unwrap_or_default();
        Ok(ChartInfo {
            source: source.to_string(),
            code: code.to_string(),
            industry,
            sector,
            ..ChartInfo::default()
        })
    }
}

impl SplitRepository for SqliteAdapter {
    fn fetch_splits(&self, source: &str, code: &str) -> Result<Vec<SplitEvent>, SigbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT split_date, ratio FROM splits WHERE source = ?1 AND code = ?2 ORDER BY split_date",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![source, code], |row| {
                let date = date_at(row, 0)?;
                let ratio: String = row.get(1)?;
                Ok(SplitEvent::from_ratio_text(source, code, date, &ratio))
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl ResultSink for SqliteAdapter {
    fn create_run(&self, config: &BacktestConfig, process_id: Uuid) -> Result<BacktestRun, SigbenchError> {
        let run = BacktestRun::new(config, process_id);
        self.conn()?
            .execute(
                "INSERT INTO backtests (id, process_id, name, type, source, description, entry_price_point,
                    target_up_price_point, target_up_percentage, target_down_price_point,
                    target_down_percentage, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    run.id.to_string(),
                    run.process_id.to_string(),
                    run.name,
                    run.backtest_type.to_string(),
                    run.source,
                    run.description,
                    run.entry_price_point.to_string(),
                    run.target_up.price_point.to_string(),
                    run.target_up.value,
                    run.target_down.price_point.to_string(),
                    run.target_down.value,
                    run.created_at.to_rfc3339(),
                    run.updated_at.to_rfc3339(),
                ],
            )
            .map_err(query_err)?;
        Ok(run)
    }

    fn upsert_result(&self, r: &ResultDetail) -> Result<(), SigbenchError> {
        let hit_cols = |hit: &Option<PriceHit>| {
            (
                hit.map(|h| date_text(h.date)),
                hit.map(|h| h.price_point.to_string()),
                hit.map(|h| h.price),
            )
        };
        let (up_date, up_point, up_price) = hit_cols(&r.up);
        let (down_date, down_point, down_price) = hit_cols(&r.down);
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO backtest_results (id, backtest_id, signal_name, code, industry, sector,
                    entry_date, entry_price_point, entry_price, up_date, up_price_point, up_price,
                    down_date, down_price_point, down_price, result_direction, trading_days, calendar_days)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    r.id.to_string(),
                    r.backtest_id.to_string(),
                    r.signal_name,
                    r.code,
                    r.industry,
                    r.sector,
                    date_text(r.entry.date),
                    r.entry.price_point.to_string(),
                    r.entry.price,
                    up_date,
                    up_point,
                    up_price,
                    down_date,
                    down_point,
                    down_price,
                    r.winner.map(|w| w.to_string()),
                    r.trading_days,
                    r.calendar_days,
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn upsert_stat(&self, s: &StatRow) -> Result<(), SigbenchError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO backtest_stats (backtest_id, signal_name, category, sub_category,
                    number_entities, number_signals, success_percentage, success_criterion,
                    success_duration_trading_days, success_duration_calendar_days)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    s.backtest_id.to_string(),
                    s.signal_name,
                    s.category.to_string(),
                    s.sub_category,
                    s.number_entities as i64,
                    s.number_signals as i64,
                    s.success_percentage,
                    s.success_criterion,
                    s.success_duration_trading_days,
                    s.success_duration_calendar_days,
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn results_for(&self, backtest_id: Uuid) -> Result<Vec<ResultDetail>, SigbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, backtest_id, signal_name, code, industry, sector,
                        entry_date, entry_price_point, entry_price,
                        up_date, up_price_point, up_price,
                        down_date, down_price_point, down_price,
                        result_direction, trading_days, calendar_days
                 FROM backtest_results WHERE backtest_id = ?1
                 ORDER BY signal_name, code, entry_date",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![backtest_id.to_string()], |row| {
                Ok(ResultDetail {
                    id: parsed(row, 0)?,
                    backtest_id: parsed(row, 1)?,
                    signal_name: row.get(2)?,
                    code: row.get(3)?,
                    industry: row.get(4)?,
                    sector: row.get(5)?,
                    entry: PriceHit {
                        date: date_at(row, 6)?,
                        price_point: parsed(row, 7)?,
                        price: row.get(8)?,
                    },
                    up: hit_at(row, 9)?,
                    down: hit_at(row, 12)?,
                    winner: parsed_opt(row, 15)?,
                    trading_days: row.get(16)?,
                    calendar_days: row.get(17)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn complete_run(&self, backtest_id: Uuid) -> Result<(), SigbenchError> {
        self.conn()?
            .execute(
                "UPDATE backtests SET updated_at = ?2 WHERE id = ?1",
                params![backtest_id.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(query_err)?;
        Ok(())
    }
}
