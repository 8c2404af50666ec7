//! Simple and exponential moving averages keyed like `S21C` or `E50H`.

use crate::domain::ohlcv::{PriceBar, PricePoint};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovingAverageKind {
    Simple,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MovingAverageKey {
    pub kind: MovingAverageKind,
    pub period: usize,
    pub point: PricePoint,
}

impl MovingAverageKey {
    /// Simple average of closes.
    pub fn simple(period: usize) -> Self {
        Self {
            kind: MovingAverageKind::Simple,
            period,
            point: PricePoint::Close,
        }
    }
}

impl fmt::Display for MovingAverageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MovingAverageKind::Simple => 'S',
            MovingAverageKind::Exponential => 'E',
        };
        write!(f, "{}{}{}", kind, self.period, self.point.letter())
    }
}

impl FromStr for MovingAverageKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let mut chars = s.chars();
        let kind = match chars.next() {
            Some('S') => MovingAverageKind::Simple,
            Some('E') => MovingAverageKind::Exponential,
            _ => return Err(format!("invalid moving average key: {s}")),
        };
        let rest: String = chars.collect();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let tail = &rest[digits.len()..];
        let period: usize = digits
            .parse()
            .map_err(|_| format!("invalid moving average period in {s}"))?;
        if period == 0 {
            return Err(format!("moving average period must be positive in {s}"));
        }
        let mut tail_chars = tail.chars();
        let point = match (tail_chars.next(), tail_chars.next()) {
            (Some(c), None) => PricePoint::from_letter(c)
                .ok_or_else(|| format!("invalid price point in {s}"))?,
            _ => return Err(format!("invalid moving average key: {s}")),
        };
        Ok(Self {
            kind,
            period,
            point,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverage {
    pub key: MovingAverageKey,
    pub values: Vec<f64>,
}

impl MovingAverage {
    pub fn compute(key: MovingAverageKey, bars: &[PriceBar]) -> Self {
        let prices: Vec<f64> = bars.iter().map(|b| b.price(key.point)).collect();
        let values = match key.kind {
            MovingAverageKind::Simple => sma(&prices, key.period),
            MovingAverageKind::Exponential => ema(&prices, key.period),
        };
        Self { key, values }
    }
}

/// Values before the first full window are 0.
pub fn sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }
    let mut sum: f64 = prices[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Seeded with the simple average of the first window.
pub fn ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = prices[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    for i in period..prices.len() {
        out[i] = prices[i] * k + out[i - 1] * (1.0 - k);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keys() {
        let key: MovingAverageKey = "S21C".parse().unwrap();
        assert_eq!(key, MovingAverageKey::simple(21));
        let key: MovingAverageKey = "e50h".parse().unwrap();
        assert_eq!(key.kind, MovingAverageKind::Exponential);
        assert_eq!(key.period, 50);
        assert_eq!(key.point, PricePoint::High);
        assert_eq!(key.to_string(), "E50H");
    }

    #[test]
    fn reject_bad_keys() {
        assert!("X21C".parse::<MovingAverageKey>().is_err());
        assert!("S0C".parse::<MovingAverageKey>().is_err());
        assert!("SC".parse::<MovingAverageKey>().is_err());
        assert!("S21Q".parse::<MovingAverageKey>().is_err());
        assert!("S21CC".parse::<MovingAverageKey>().is_err());
    }

    #[test]
    fn sma_values() {
        let v = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(v[0], 0.0);
        assert_eq!(v[1], 0.0);
        assert!((v[2] - 2.0).abs() < 1e-12);
        assert!((v[4] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ema_seeded_with_sma() {
        let v = ema(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!((v[2] - 2.0).abs() < 1e-12);
        // k = 0.5
        assert!((v[3] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn short_series_is_all_zero() {
        assert_eq!(sma(&[1.0, 2.0], 3), vec![0.0, 0.0]);
        assert_eq!(ema(&[1.0], 3), vec![0.0]);
    }
}
