//! Single-bar candlestick geometry and shape classification.

use crate::domain::ohlcv::PriceBar;

/// A closed price interval; `high >= low` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub high: f64,
    pub low: f64,
}

impl PriceRange {
    pub fn new(a: f64, b: f64) -> Self {
        if a >= b {
            Self { high: a, low: b }
        } else {
            Self { high: b, low: a }
        }
    }

    pub fn length(&self) -> f64 {
        self.high - self.low
    }

    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

impl PriceBar {
    pub fn body(&self) -> PriceRange {
        PriceRange::new(self.open.max(self.close), self.open.min(self.close))
    }

    pub fn upper_shadow(&self) -> PriceRange {
        PriceRange::new(self.high, self.body().high)
    }

    pub fn lower_shadow(&self) -> PriceRange {
        PriceRange::new(self.body().low, self.low)
    }

    /// Close above open.
    pub fn is_light(&self) -> bool {
        self.close > self.open
    }

    /// Open above close.
    pub fn is_dark(&self) -> bool {
        self.open > self.close
    }

    pub fn is_tall_body(&self) -> bool {
        let len = self.range();
        len != 0.0 && self.body().length() / len > 0.8
    }

    fn total_shadow(&self) -> f64 {
        self.upper_shadow().length() + self.lower_shadow().length()
    }

    fn upper_shadow_ratio(&self) -> f64 {
        let total = self.total_shadow();
        if total == 0.0 {
            0.0
        } else {
            self.upper_shadow().length() / total
        }
    }

    fn lower_shadow_ratio(&self) -> f64 {
        let total = self.total_shadow();
        if total == 0.0 {
            0.0
        } else {
            self.lower_shadow().length() / total
        }
    }

    fn has_doji_body(&self) -> bool {
        self.volume > 0 && !self.is_four_price_doji() && self.body().length() < self.range() * 0.05
    }

    pub fn is_four_price_doji(&self) -> bool {
        let flat = if self.midpoint() < 5.0 {
            self.range() == 0.0
        } else {
            self.range() < 0.02
        };
        self.body().length() == 0.0 && flat && self.volume > 0
    }

    /// Plain doji: a doji body that is none of the named variants.
    pub fn is_doji(&self) -> bool {
        self.has_doji_body()
            && !self.is_long_legged_doji()
            && !self.is_dragonfly_doji()
            && !self.is_gravestone_doji()
    }

    pub fn is_long_legged_doji(&self) -> bool {
        let avg = self.average_price();
        self.has_doji_body() && avg > 0.0 && self.total_shadow() / avg > 0.05
    }

    pub fn is_dragonfly_doji(&self) -> bool {
        self.has_doji_body() && self.upper_shadow_ratio() < 0.15 && self.lower_shadow_ratio() > 0.85
    }

    pub fn is_gravestone_doji(&self) -> bool {
        self.has_doji_body() && self.lower_shadow_ratio() < 0.15 && self.upper_shadow_ratio() > 0.85
    }

    fn is_marubozu(&self) -> bool {
        let body = self.body().length();
        !self.has_doji_body() && body == self.range() && body > 0.0
    }

    pub fn is_bullish_marubozu(&self) -> bool {
        self.is_marubozu() && self.is_light()
    }

    pub fn is_bearish_marubozu(&self) -> bool {
        self.is_marubozu() && self.is_dark()
    }

    fn belthold_base(&self) -> bool {
        !self.has_doji_body()
            && !self.is_marubozu()
            && self.high != 0.0
            && self.low != 0.0
            && self.volume != 0
            && self.body().length() > self.range() / 1.5
    }

    /// Opens on its low and closes well above it.
    pub fn is_bullish_belthold(&self) -> bool {
        self.belthold_base() && self.lower_shadow().length() == 0.0 && self.is_light()
    }

    /// Opens on its high and closes well below it.
    pub fn is_bearish_belthold(&self) -> bool {
        self.belthold_base() && self.upper_shadow().length() == 0.0 && self.is_dark()
    }

    /// Small body near the top with a long lower shadow (hammer/hanging man shape).
    pub fn is_umbrella(&self) -> bool {
        let len = self.range();
        let body = self.body();
        len > 0.0
            && !self.has_doji_body()
            && self.lower_shadow().length() >= 2.0 * body.length()
            && self.upper_shadow().length() <= len * 0.1
            && body.low > self.midpoint()
    }

    pub fn is_inverted_umbrella(&self) -> bool {
        let len = self.range();
        let body = self.body();
        len > 0.0
            && !self.has_doji_body()
            && self.upper_shadow().length() >= 2.0 * body.length()
            && self.lower_shadow().length() <= len * 0.1
            && body.high < self.midpoint()
    }

    pub fn is_spinning_top(&self) -> bool {
        let body = self.body().length();
        self.upper_shadow().length() > body
            && self.lower_shadow().length() > body
            && !self.has_doji_body()
            && !self.is_umbrella()
            && !self.is_inverted_umbrella()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            source: "asx".into(),
            code: "TEST".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000,
            factor: 1.0,
        }
    }

    #[test]
    fn body_and_shadows() {
        let c = candle(10.0, 12.0, 9.0, 11.0);
        assert_eq!(c.body(), PriceRange { high: 11.0, low: 10.0 });
        assert!((c.upper_shadow().length() - 1.0).abs() < 1e-12);
        assert!((c.lower_shadow().length() - 1.0).abs() < 1e-12);
        assert!(c.is_light());
        assert!(!c.is_dark());
    }

    #[test]
    fn price_range_normalizes_order() {
        let r = PriceRange::new(1.0, 5.0);
        assert_eq!(r.high, 5.0);
        assert!(r.contains(3.0));
        assert!((r.midpoint() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn marubozu() {
        assert!(candle(10.0, 12.0, 10.0, 12.0).is_bullish_marubozu());
        assert!(candle(12.0, 12.0, 10.0, 10.0).is_bearish_marubozu());
        assert!(!candle(10.0, 12.5, 10.0, 12.0).is_bullish_marubozu());
    }

    #[test]
    fn doji_family() {
        // tiny body, balanced short shadows
        assert!(candle(10.0, 10.2, 9.8, 10.005).is_doji());
        // all lower shadow
        assert!(candle(10.0, 10.0, 9.5, 10.0).is_dragonfly_doji());
        // all upper shadow
        assert!(candle(10.0, 10.5, 10.0, 10.0).is_gravestone_doji());
        // long legs relative to price
        assert!(candle(10.0, 11.0, 9.0, 10.01).is_long_legged_doji());
        assert!(!candle(10.0, 11.0, 9.0, 10.01).is_doji());
    }

    #[test]
    fn four_price_doji_is_not_a_doji_body() {
        let c = candle(3.0, 3.0, 3.0, 3.0);
        assert!(c.is_four_price_doji());
        assert!(!c.is_doji());
    }

    #[test]
    fn doji_requires_volume() {
        let mut c = candle(10.0, 10.2, 9.8, 10.005);
        c.volume = 0;
        assert!(!c.is_doji());
    }

    #[test]
    fn umbrella_shapes() {
        // body at top, long lower shadow
        assert!(candle(10.8, 11.0, 8.0, 11.0).is_umbrella());
        // body at bottom, long upper shadow
        assert!(candle(8.2, 11.0, 8.0, 8.0).is_inverted_umbrella());
        assert!(!candle(8.2, 11.0, 8.0, 8.0).is_umbrella());
    }

    #[test]
    fn beltholds() {
        // opens on the low, small upper shadow
        assert!(candle(10.0, 12.2, 10.0, 12.0).is_bullish_belthold());
        assert!(candle(12.0, 12.0, 9.8, 10.0).is_bearish_belthold());
        assert!(!candle(10.0, 12.0, 10.0, 12.0).is_bullish_belthold());
    }

    #[test]
    fn spinning_top() {
        assert!(candle(10.0, 11.0, 9.0, 10.3).is_spinning_top());
        assert!(!candle(10.0, 10.2, 9.8, 10.005).is_spinning_top());
    }

    #[test]
    fn tall_body() {
        assert!(candle(10.0, 12.1, 9.95, 12.0).is_tall_body());
        assert!(!candle(10.0, 12.0, 8.0, 11.0).is_tall_body());
    }
}
