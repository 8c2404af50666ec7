//! JSON backtest configuration files.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::SigbenchError;
use crate::ports::config_port::ConfigLoader;
use std::path::{Path, PathBuf};

pub struct FileConfigAdapter {
    origin: String,
    content: String,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SigbenchError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|e| SigbenchError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            origin: path.display().to_string(),
            content,
        })
    }

    pub fn from_string(content: &str) -> Self {
        Self {
            origin: "<string>".to_string(),
            content: content.to_string(),
        }
    }

    /// Deserializes without validating.
    pub fn parse(&self) -> Result<BacktestConfig, SigbenchError> {
        serde_json::from_str(&self.content).map_err(|e| SigbenchError::ConfigParse {
            file: self.origin.clone(),
            reason: e.to_string(),
        })
    }
}

impl ConfigLoader for FileConfigAdapter {
    fn load(&self) -> Result<BacktestConfig, SigbenchError> {
        let config = self.parse()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::BacktestType;
    use crate::domain::ohlcv::PricePoint;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"{
        "type": "Candlestick Pattern",
        "source": "asx",
        "name": "reversals",
        "entryPricePoint": "Close",
        "targetUp": { "pricePoint": "High", "value": 0.1 },
        "targetDown": { "pricePoint": "Low", "value": 0.1 },
        "signalNames": ["Bullish Engulfing", "Morning Star"],
        "maxParallelization": 4
    }"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_loads_config() {
        let config = FileConfigAdapter::from_string(VALID).load().unwrap();
        assert_eq!(config.backtest_type, BacktestType::CandlestickPattern);
        assert_eq!(config.entry_price_point, PricePoint::Close);
        assert_eq!(config.signal_names.len(), 2);
        assert_eq!(config.max_parallelization, 4);
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config(VALID);
        let config = FileConfigAdapter::from_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.name, "reversals");
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/backtest.json");
        assert!(matches!(result, Err(SigbenchError::ConfigParse { .. })));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let result = FileConfigAdapter::from_string("{ \"type\": ").load();
        assert!(matches!(result, Err(SigbenchError::ConfigParse { .. })));
    }

    #[test]
    fn missing_required_field_is_a_parse_error() {
        let text = VALID.replace("\"entryPricePoint\": \"Close\",", "");
        let result = FileConfigAdapter::from_string(&text).load();
        match result {
            Err(SigbenchError::ConfigParse { file, reason }) => {
                assert_eq!(file, "<string>");
                assert!(reason.contains("entryPricePoint"), "{reason}");
            }
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }

    #[test]
    fn unknown_signal_fails_load() {
        let text = VALID.replace("Morning Star", "Evening Moon");
        let result = FileConfigAdapter::from_string(&text).load();
        assert!(matches!(result, Err(SigbenchError::UnknownSignal { .. })));
    }

    #[test]
    fn parse_skips_validation() {
        let text = VALID.replace("Morning Star", "Evening Moon");
        assert!(FileConfigAdapter::from_string(&text).parse().is_ok());
    }
}
