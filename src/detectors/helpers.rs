//! Common helper functions shared by the formation detectors

use crate::{levels::SwingKind, OHLCV};

/// Fraction of ATR used as stop buffer beyond a structural point
pub const ATR_BUFFER_FACTOR: f64 = 0.5;

/// Floor on any stop buffer, relative to the reference price (0.1 pip at 1.0)
pub const MIN_BUFFER_FRACTION: f64 = 0.00001;

/// Stop buffer: half an ATR when ATR is known, else `fallback_fraction` of
/// the pattern's own size. Never zero-width.
#[inline]
pub fn stop_buffer(atr: Option<f64>, size: f64, fallback_fraction: f64, reference_price: f64) -> f64 {
    let raw = match atr.filter(|a| *a > 0.0) {
        Some(atr) => atr * ATR_BUFFER_FACTOR,
        None => size.abs() * fallback_fraction,
    };
    raw.max(reference_price.abs() * MIN_BUFFER_FRACTION)
}

/// Round to the nearest integer and clamp into the 1..=10 score scale.
#[inline]
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 1.0;
    }
    score.round().clamp(1.0, 10.0)
}

/// `|a - b|` over the pair's mean
#[inline]
pub fn relative_diff(a: f64, b: f64) -> f64 {
    let mean = (a + b) / 2.0;
    if mean == 0.0 {
        return f64::INFINITY;
    }
    (a - b).abs() / mean
}

/// Ratio of two optional quantities; `None` if either is missing or the
/// denominator is not positive.
#[inline]
pub fn ratio_of(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// High for swing highs, low for swing lows.
#[inline]
pub fn swing_price<T: OHLCV>(bar: &T, kind: SwingKind) -> f64 {
    match kind {
        SwingKind::High => bar.high(),
        SwingKind::Low => bar.low(),
    }
}

/// Deepest low (after a top) or highest high (after a bottom) strictly
/// between two bar indices. `None` when no bar lies between them.
pub fn extreme_between<T: OHLCV>(bars: &[T], first: usize, second: usize, kind: SwingKind) -> Option<f64> {
    let between = bars.get(first + 1..second)?;
    if between.is_empty() {
        return None;
    }
    Some(match kind {
        SwingKind::High => between.iter().map(|b| b.low()).fold(f64::INFINITY, f64::min),
        SwingKind::Low => between.iter().map(|b| b.high()).fold(f64::NEG_INFINITY, f64::max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    #[test]
    fn buffer_prefers_atr() {
        assert!((stop_buffer(Some(0.004), 0.02, 0.1, 1.1) - 0.002).abs() < 1e-12);
        assert!((stop_buffer(None, 0.02, 0.1, 1.1) - 0.002).abs() < 1e-12);
        assert!((stop_buffer(Some(0.0), 0.02, 0.1, 1.1) - 0.002).abs() < 1e-12);
    }

    #[test]
    fn buffer_is_never_zero() {
        assert!(stop_buffer(None, 0.0, 0.1, 1.1) > 0.0);
    }

    #[test]
    fn score_clamps() {
        assert_eq!(clamp_score(12.3), 10.0);
        assert_eq!(clamp_score(-4.0), 1.0);
        assert_eq!(clamp_score(6.5), 7.0);
        assert_eq!(clamp_score(f64::NAN), 1.0);
    }

    #[test]
    fn extreme_between_needs_interior_bars() {
        let bars = vec![
            Candle::new(1.0, 1.2, 0.9, 1.0),
            Candle::new(1.0, 1.1, 0.8, 1.0),
            Candle::new(1.0, 1.3, 0.95, 1.0),
            Candle::new(1.0, 1.2, 0.9, 1.0),
        ];
        assert_eq!(extreme_between(&bars, 0, 3, SwingKind::High), Some(0.8));
        assert_eq!(extreme_between(&bars, 0, 3, SwingKind::Low), Some(1.3));
        assert_eq!(extreme_between(&bars, 0, 1, SwingKind::High), None);
    }

    #[test]
    fn relative_diff_symmetric() {
        assert!((relative_diff(1.0, 1.02) - relative_diff(1.02, 1.0)).abs() < 1e-15);
    }
}
