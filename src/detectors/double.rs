//! Double top and double bottom detection
//!
//! Two swing extremes of the same kind at near-equal prices, separated by a
//! pullback. The neckline is the deepest retracement between them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, extreme_between, relative_diff, stop_buffer, swing_price};
use crate::{
    levels::{swing_indices, SwingKind},
    params::{get_period, get_ratio, get_value, ParamMeta, ParameterizedDetector},
    AnchorLabel, AnchorPrice, Direction, Indicators, KeyPriceLevels, PatternDetector, PatternError,
    PatternType, Period, Ratio, Result, Setup, OHLCV,
};

/// Raw double top/bottom hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoubleMatch {
    pub first_index: usize,
    pub second_index: usize,
    pub neckline: f64,
}

#[derive(Debug, Clone, Copy)]
struct DoubleGeometry {
    kind: SwingKind,
    tolerance: f64,
    min_gap: usize,
    max_gap: usize,
    window: usize,
    min_height_atr: f64,
}

impl DoubleGeometry {
    fn find<T: OHLCV>(&self, bars: &[T]) -> Vec<DoubleMatch> {
        if bars.len() < self.min_gap + 2 {
            return Vec::new();
        }

        let swings = swing_indices(bars, self.window, self.kind);
        let mut matches = Vec::new();

        for (i, &first) in swings.iter().enumerate() {
            for &second in &swings[i + 1..] {
                let gap = second - first;
                if gap > self.max_gap {
                    break;
                }
                if gap < self.min_gap {
                    continue;
                }

                let a = swing_price(&bars[first], self.kind);
                let b = swing_price(&bars[second], self.kind);
                if relative_diff(a, b) > self.tolerance {
                    continue;
                }

                let Some(neckline) = extreme_between(bars, first, second, self.kind) else {
                    continue;
                };

                if self.min_height_atr > 0.0 {
                    let height = match self.kind {
                        SwingKind::High => a.max(b) - neckline,
                        SwingKind::Low => neckline - a.min(b),
                    };
                    if let Some(atr) = bars[second].atr().filter(|v| *v > 0.0) {
                        if height / atr < self.min_height_atr {
                            continue;
                        }
                    }
                }

                matches.push(DoubleMatch {
                    first_index: first,
                    second_index: second,
                    neckline,
                });
            }
        }
        matches
    }
}

fn validate_geometry(name: &str, min_gap: usize, max_gap: usize, min_height_atr: f64) -> Result<()> {
    if min_gap > max_gap {
        return Err(PatternError::InvalidConfig(format!(
            "{name}: min_pullback_bars ({min_gap}) > max_pullback_bars ({max_gap})"
        )));
    }
    if min_height_atr < 0.0 {
        return Err(PatternError::InvalidConfig(format!(
            "{name}: min_height_atr must be >= 0"
        )));
    }
    Ok(())
}

// ============================================================
// DOUBLE TOP
// ============================================================

/// Two near-equal swing highs; bearish below the neckline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleTopDetector {
    /// Maximum relative difference between the two highs
    pub price_tolerance: Ratio,
    pub min_pullback_bars: Period,
    pub max_pullback_bars: Period,
    pub swing_window: Period,
    /// Minimum top-to-neckline height in ATR of the second top (0 disables)
    pub min_height_atr: f64,
}

impl Default for DoubleTopDetector {
    fn default() -> Self {
        Self {
            price_tolerance: Ratio::new_const(0.003),
            min_pullback_bars: Period::new_const(5),
            max_pullback_bars: Period::new_const(50),
            swing_window: Period::new_const(3),
            min_height_atr: 0.0,
        }
    }
}

impl DoubleTopDetector {
    fn geometry(&self) -> DoubleGeometry {
        DoubleGeometry {
            kind: SwingKind::High,
            tolerance: self.price_tolerance.get(),
            min_gap: self.min_pullback_bars.get(),
            max_gap: self.max_pullback_bars.get(),
            window: self.swing_window.get(),
            min_height_atr: self.min_height_atr,
        }
    }

    pub fn find<T: OHLCV>(&self, bars: &[T]) -> Vec<DoubleMatch> {
        self.geometry().find(bars)
    }

    /// Detection-time score 1..=10: top equality, height, spacing, RSI
    /// divergence between the tops and fading volume on the retest.
    pub fn score<T: Indicators>(&self, bars: &[T], m: &DoubleMatch) -> f64 {
        let first = &bars[m.first_index];
        let second = &bars[m.second_index];
        let (first_high, second_high) = (first.high(), second.high());
        let tolerance = relative_diff(first_high, second_high);

        let mut score = 5.0;
        score += equality_points(tolerance);

        let height = first_high.max(second_high) - m.neckline;
        if let Some(atr) = second.atr().filter(|v| *v > 0.0) {
            let height_atr = height / atr;
            if height_atr >= 3.0 {
                score += 1.0;
            } else if height_atr >= 2.0 {
                score += 0.5;
            } else if height_atr < 1.5 {
                score -= 1.0;
            }
        }

        score += spacing_points(m.second_index - m.first_index);

        if let (Some(rsi1), Some(rsi2)) = (first.rsi(), second.rsi()) {
            let divergence = rsi1 - rsi2;
            if divergence >= 8.0 {
                score += 1.5;
            } else if divergence >= 3.0 {
                score += 1.0;
            }
        }

        if second_high < first_high && tolerance >= 0.005 {
            score += 0.5;
        }

        if let (Some(v1), Some(v2)) = (first.volume(), second.volume()) {
            if v1 > 0.0 {
                let vol_ratio = v2 / v1;
                if vol_ratio < 0.85 {
                    score += 1.0;
                } else if vol_ratio > 1.2 {
                    score -= 1.0;
                }
            }
        }

        clamp_score(score)
    }
}

/// Entry at the neckline, stop above the top, target one pattern height below.
pub fn double_top_levels(top_price: f64, neckline: f64, atr: Option<f64>) -> KeyPriceLevels {
    let height = top_price - neckline;
    let buffer = stop_buffer(atr, height, 0.05, top_price);
    let entry = neckline;
    KeyPriceLevels {
        entry,
        stop_loss: top_price + buffer,
        take_profit: entry - height,
        anchor_prices: vec![
            AnchorPrice {
                label: AnchorLabel::Top,
                price: top_price,
            },
            AnchorPrice {
                label: AnchorLabel::Neckline,
                price: neckline,
            },
        ],
    }
}

impl PatternDetector for DoubleTopDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::DoubleTop
    }

    fn min_bars(&self) -> usize {
        self.min_pullback_bars.get() + 2
    }

    fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
        self.find(bars)
            .into_iter()
            .map(|m| {
                let end = &bars[m.second_index];
                let top_price = bars[m.first_index].high().max(end.high());
                Setup {
                    pattern_type: PatternType::DoubleTop,
                    direction: Direction::Bearish,
                    start_index: m.first_index,
                    end_index: m.second_index,
                    context_index: m.second_index,
                    levels: double_top_levels(top_price, m.neckline, end.atr()),
                    score: self.score(bars, &m),
                }
            })
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        validate_geometry(
            "double_top",
            self.min_pullback_bars.get(),
            self.max_pullback_bars.get(),
            self.min_height_atr,
        )
    }
}

// ============================================================
// DOUBLE BOTTOM
// ============================================================

/// Two near-equal swing lows; bullish above the neckline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleBottomDetector {
    pub price_tolerance: Ratio,
    pub min_pullback_bars: Period,
    pub max_pullback_bars: Period,
    pub swing_window: Period,
    pub min_height_atr: f64,
}

impl Default for DoubleBottomDetector {
    fn default() -> Self {
        Self {
            price_tolerance: Ratio::new_const(0.003),
            min_pullback_bars: Period::new_const(5),
            max_pullback_bars: Period::new_const(50),
            swing_window: Period::new_const(3),
            min_height_atr: 0.0,
        }
    }
}

impl DoubleBottomDetector {
    fn geometry(&self) -> DoubleGeometry {
        DoubleGeometry {
            kind: SwingKind::Low,
            tolerance: self.price_tolerance.get(),
            min_gap: self.min_pullback_bars.get(),
            max_gap: self.max_pullback_bars.get(),
            window: self.swing_window.get(),
            min_height_atr: self.min_height_atr,
        }
    }

    pub fn find<T: OHLCV>(&self, bars: &[T]) -> Vec<DoubleMatch> {
        self.geometry().find(bars)
    }

    pub fn score<T: Indicators>(&self, bars: &[T], m: &DoubleMatch) -> f64 {
        let first = &bars[m.first_index];
        let second = &bars[m.second_index];
        let (first_low, second_low) = (first.low(), second.low());
        let tolerance = relative_diff(first_low, second_low);

        let mut score = 5.0;
        score += equality_points(tolerance);

        let height = m.neckline - first_low.min(second_low);
        if let Some(atr) = second.atr().filter(|v| *v > 0.0) {
            let height_atr = height / atr;
            if height_atr >= 3.0 {
                score += 1.0;
            } else if height_atr >= 2.0 {
                score += 0.5;
            } else if height_atr < 1.5 {
                score -= 1.0;
            }
        }

        score += spacing_points(m.second_index - m.first_index);

        if let (Some(rsi1), Some(rsi2)) = (first.rsi(), second.rsi()) {
            let divergence = rsi2 - rsi1;
            if divergence >= 8.0 {
                score += 1.5;
            } else if divergence >= 3.0 {
                score += 1.0;
            }
        }

        if second_low > first_low && tolerance >= 0.005 {
            score += 0.5;
        }

        if let (Some(v1), Some(v2)) = (first.volume(), second.volume()) {
            if v1 > 0.0 {
                let vol_ratio = v2 / v1;
                if vol_ratio <= 1.0 {
                    score += 0.5;
                } else if vol_ratio > 1.2 {
                    score -= 0.5;
                }
            }
        }

        clamp_score(score)
    }
}

/// Entry at the neckline, stop below the bottom, target one pattern height above.
pub fn double_bottom_levels(bottom_price: f64, neckline: f64, atr: Option<f64>) -> KeyPriceLevels {
    let height = neckline - bottom_price;
    let buffer = stop_buffer(atr, height, 0.05, bottom_price);
    let entry = neckline;
    KeyPriceLevels {
        entry,
        stop_loss: bottom_price - buffer,
        take_profit: entry + height,
        anchor_prices: vec![
            AnchorPrice {
                label: AnchorLabel::Bottom,
                price: bottom_price,
            },
            AnchorPrice {
                label: AnchorLabel::Neckline,
                price: neckline,
            },
        ],
    }
}

impl PatternDetector for DoubleBottomDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::DoubleBottom
    }

    fn min_bars(&self) -> usize {
        self.min_pullback_bars.get() + 2
    }

    fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
        self.find(bars)
            .into_iter()
            .map(|m| {
                let end = &bars[m.second_index];
                let bottom_price = bars[m.first_index].low().min(end.low());
                Setup {
                    pattern_type: PatternType::DoubleBottom,
                    direction: Direction::Bullish,
                    start_index: m.first_index,
                    end_index: m.second_index,
                    context_index: m.second_index,
                    levels: double_bottom_levels(bottom_price, m.neckline, end.atr()),
                    score: self.score(bars, &m),
                }
            })
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        validate_geometry(
            "double_bottom",
            self.min_pullback_bars.get(),
            self.max_pullback_bars.get(),
            self.min_height_atr,
        )
    }
}

fn equality_points(tolerance: f64) -> f64 {
    if tolerance <= 0.005 {
        1.5
    } else if tolerance <= 0.015 {
        1.0
    } else if tolerance <= 0.03 {
        0.5
    } else {
        0.0
    }
}

fn spacing_points(bars_between: usize) -> f64 {
    match bars_between {
        15..=65 => 1.0,
        10..=100 => 0.5,
        _ => 0.0,
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static DOUBLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio("price_tolerance", 0.003, (0.001, 0.01, 0.001), "Maximum relative difference between extremes"),
    ParamMeta::period("min_pullback_bars", 5.0, (3.0, 10.0, 1.0), "Minimum bars between extremes"),
    ParamMeta::period("max_pullback_bars", 50.0, (30.0, 100.0, 10.0), "Maximum bars between extremes"),
    ParamMeta::period("swing_window", 3.0, (2.0, 5.0, 1.0), "Swing confirmation bars on each side"),
    ParamMeta::value("min_height_atr", 0.0, (0.0, 3.0, 0.5), "Minimum pattern height in ATR"),
];

macro_rules! impl_double_params {
    ($($detector:ident => $pattern:expr),* $(,)?) => {
        $(impl ParameterizedDetector for $detector {
            fn param_meta() -> &'static [ParamMeta] {
                DOUBLE_PARAMS
            }

            fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
                Ok(Self {
                    price_tolerance: get_ratio(params, "price_tolerance", 0.003)?,
                    min_pullback_bars: get_period(params, "min_pullback_bars", 5)?,
                    max_pullback_bars: get_period(params, "max_pullback_bars", 50)?,
                    swing_window: get_period(params, "swing_window", 3)?,
                    min_height_atr: get_value(params, "min_height_atr", 0.0)?,
                })
            }

            fn pattern_id_str() -> &'static str {
                $pattern.as_str()
            }
        })*
    };
}

impl_double_params!(
    DoubleTopDetector => PatternType::DoubleTop,
    DoubleBottomDetector => PatternType::DoubleBottom,
);
