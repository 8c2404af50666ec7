//! Domain error types.

/// Top-level error type for sigbench.
#[derive(Debug, thiserror::Error)]
pub enum SigbenchError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown signal: {name}")]
    UnknownSignal { name: String },

    #[error("backtest type mismatch: runner expects {expected}, configuration has {found}")]
    BacktestTypeMismatch { expected: String, found: String },

    #[error("invalid trend configuration: {reason}")]
    TrendConfig { reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("no data for {code} from {provider}")]
    NoData { code: String, provider: String },

    #[error("insufficient data for {code} from {provider}: have {bars} bars, need {minimum}")]
    InsufficientData {
        code: String,
        provider: String,
        bars: usize,
        minimum: usize,
    },

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SigbenchError {
    /// Configuration problems stop a run before it starts; everything else is
    /// scoped to a symbol or a record and lets the run continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SigbenchError::ConfigParse { .. }
                | SigbenchError::ConfigMissing { .. }
                | SigbenchError::ConfigInvalid { .. }
                | SigbenchError::UnknownSignal { .. }
                | SigbenchError::BacktestTypeMismatch { .. }
                | SigbenchError::TrendConfig { .. }
                | SigbenchError::Json(_)
        )
    }
}

impl From<&SigbenchError> for std::process::ExitCode {
    fn from(err: &SigbenchError) -> Self {
        let code: u8 = match err {
            SigbenchError::Io(_) => 1,
            SigbenchError::ConfigParse { .. }
            | SigbenchError::ConfigMissing { .. }
            | SigbenchError::ConfigInvalid { .. }
            | SigbenchError::UnknownSignal { .. }
            | SigbenchError::BacktestTypeMismatch { .. }
            | SigbenchError::TrendConfig { .. }
            | SigbenchError::Json(_) => 2,
            SigbenchError::Database { .. } | SigbenchError::DatabaseQuery { .. } => 3,
            SigbenchError::InvalidInput { .. } => 4,
            SigbenchError::NoData { .. }
            | SigbenchError::InsufficientData { .. }
            | SigbenchError::RateLimited { .. } => 5,
            SigbenchError::Cancelled => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        let err = SigbenchError::UnknownSignal {
            name: "Nope".into(),
        };
        assert!(err.is_fatal());
        let err = SigbenchError::TrendConfig {
            reason: "weights".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn symbol_errors_are_not_fatal() {
        let err = SigbenchError::NoData {
            code: "BHP".into(),
            provider: "asx".into(),
        };
        assert!(!err.is_fatal());
        assert!(!SigbenchError::RateLimited { provider: "asx".into() }.is_fatal());
    }

    #[test]
    fn display_messages() {
        let err = SigbenchError::BacktestTypeMismatch {
            expected: "Candlestick Pattern".into(),
            found: "Random Baseline".into(),
        };
        assert_eq!(
            err.to_string(),
            "backtest type mismatch: runner expects Candlestick Pattern, configuration has Random Baseline"
        );
    }

    #[test]
    fn exit_codes_by_kind() {
        use std::process::ExitCode;
        assert_eq!(ExitCode::from(&SigbenchError::Cancelled), ExitCode::from(6));
        let short = SigbenchError::InsufficientData {
            code: "BHP".into(),
            provider: "asx".into(),
            bars: 12,
            minimum: 30,
        };
        assert_eq!(ExitCode::from(&short), ExitCode::from(5));
        assert!(!short.is_fatal());
        assert_eq!(
            short.to_string(),
            "insufficient data for BHP from asx: have 12 bars, need 30"
        );
    }
}
