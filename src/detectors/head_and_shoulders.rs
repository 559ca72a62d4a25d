//! Head and shoulders detection
//!
//! Three same-kind swings where the middle one (the head) is strictly more
//! extreme than both shoulders and the shoulders are near-equal. Swing
//! highs give the bearish form, swing lows the inverse (bullish) form. The
//! neckline is the most extreme opposite-kind swing between the shoulders.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, relative_diff, stop_buffer, swing_price};
use crate::{
    levels::{swing_indices, SwingKind},
    params::{get_period, get_ratio, get_value, ParamMeta, ParameterizedDetector},
    AnchorLabel, AnchorPrice, Direction, Indicators, KeyPriceLevels, PatternDetector, PatternError,
    PatternType, Period, Ratio, Result, Setup, OHLCV,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadAndShouldersDetector {
    pub swing_window: Period,
    /// Maximum relative difference between the shoulders
    pub shoulder_tolerance: Ratio,
    /// Shoulder-to-shoulder span bounds in bars
    pub min_pattern_bars: Period,
    pub max_pattern_bars: Period,
    /// Minimum head height over average shoulder height above the neckline (0 disables)
    pub min_head_prominence: f64,
    /// Maximum neckline slope in ATR per bar
    pub max_neckline_slope: Option<f64>,
}

impl Default for HeadAndShouldersDetector {
    fn default() -> Self {
        Self {
            swing_window: Period::new_const(3),
            shoulder_tolerance: Ratio::new_const(0.02),
            min_pattern_bars: Period::new_const(10),
            max_pattern_bars: Period::new_const(80),
            min_head_prominence: 0.0,
            max_neckline_slope: None,
        }
    }
}

/// Raw head and shoulders hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadAndShouldersMatch {
    pub left_shoulder_index: usize,
    pub head_index: usize,
    pub right_shoulder_index: usize,
    pub neckline: f64,
    pub direction: Direction,
}

impl HeadAndShouldersDetector {
    /// Bearish formations first, then inverse ones.
    pub fn find<T: OHLCV>(&self, bars: &[T]) -> Vec<HeadAndShouldersMatch> {
        let mut matches = self.find_kind(bars, SwingKind::High);
        matches.extend(self.find_kind(bars, SwingKind::Low));
        matches
    }

    fn find_kind<T: OHLCV>(&self, bars: &[T], kind: SwingKind) -> Vec<HeadAndShouldersMatch> {
        let window = self.swing_window.get();
        let (opposite, direction) = match kind {
            SwingKind::High => (SwingKind::Low, Direction::Bearish),
            SwingKind::Low => (SwingKind::High, Direction::Bullish),
        };
        let swings = swing_indices(bars, window, kind);
        let neck_swings = swing_indices(bars, window, opposite);

        let min_span = self.min_pattern_bars.get();
        let max_span = self.max_pattern_bars.get();
        let more_extreme = |a: f64, b: f64| match kind {
            SwingKind::High => a > b,
            SwingKind::Low => a < b,
        };

        let mut matches = Vec::new();
        for (i, &left) in swings.iter().enumerate() {
            for (j, &head) in swings.iter().enumerate().skip(i + 1) {
                if head - left > max_span {
                    break;
                }
                for &right in &swings[j + 1..] {
                    let span = right - left;
                    if span > max_span {
                        break;
                    }
                    if span < min_span {
                        continue;
                    }

                    let left_price = swing_price(&bars[left], kind);
                    let head_price = swing_price(&bars[head], kind);
                    let right_price = swing_price(&bars[right], kind);

                    if !more_extreme(head_price, left_price) || !more_extreme(head_price, right_price) {
                        continue;
                    }
                    if relative_diff(left_price, right_price) > self.shoulder_tolerance.get() {
                        continue;
                    }

                    let neck_points: Vec<usize> = neck_swings
                        .iter()
                        .copied()
                        .filter(|&n| n > left && n < right)
                        .collect();
                    let (Some(&first_neck), Some(&last_neck)) = (neck_points.first(), neck_points.last()) else {
                        continue;
                    };

                    let neck_prices = neck_points.iter().map(|&n| swing_price(&bars[n], opposite));
                    let neckline = match kind {
                        SwingKind::High => neck_prices.fold(f64::INFINITY, f64::min),
                        SwingKind::Low => neck_prices.fold(f64::NEG_INFINITY, f64::max),
                    };

                    if self.min_head_prominence > 0.0 {
                        let avg_shoulder = (left_price + right_price) / 2.0;
                        let (head_height, shoulder_height) = match kind {
                            SwingKind::High => (head_price - neckline, avg_shoulder - neckline),
                            SwingKind::Low => (neckline - head_price, neckline - avg_shoulder),
                        };
                        if shoulder_height > 0.0 && head_height / shoulder_height < self.min_head_prominence {
                            continue;
                        }
                    }

                    if let Some(max_slope) = self.max_neckline_slope {
                        if last_neck > first_neck {
                            if let Some(atr) = bars[right].atr().filter(|v| *v > 0.0) {
                                let rise = (swing_price(&bars[last_neck], opposite)
                                    - swing_price(&bars[first_neck], opposite))
                                .abs();
                                let slope = rise / (last_neck - first_neck) as f64 / atr;
                                if slope > max_slope {
                                    continue;
                                }
                            }
                        }
                    }

                    matches.push(HeadAndShouldersMatch {
                        left_shoulder_index: left,
                        head_index: head,
                        right_shoulder_index: right,
                        neckline,
                        direction,
                    });
                }
            }
        }
        matches
    }

    /// Detection-time score 1..=10: shoulder symmetry, head prominence, RSI
    /// divergence between head and right shoulder, time balance.
    pub fn score<T: Indicators>(&self, bars: &[T], m: &HeadAndShouldersMatch) -> f64 {
        let kind = match m.direction {
            Direction::Bearish => SwingKind::High,
            Direction::Bullish => SwingKind::Low,
        };
        let height = |idx: usize| (swing_price(&bars[idx], kind) - m.neckline).abs();

        let mut score = 5.0;

        let left_height = height(m.left_shoulder_index);
        let right_height = height(m.right_shoulder_index);
        let head_height = height(m.head_index);
        let avg_shoulder = (left_height + right_height) / 2.0;

        if avg_shoulder > 0.0 {
            let symmetry = (left_height - right_height).abs() / avg_shoulder;
            if symmetry <= 0.15 {
                score += 1.5;
            } else if symmetry <= 0.3 {
                score += 0.5;
            } else if symmetry > 0.4 {
                score -= 1.0;
            }

            let prominence = head_height / avg_shoulder;
            if (1.5..=2.5).contains(&prominence) {
                score += 1.0;
            } else if (1.15..=3.0).contains(&prominence) {
                score += 0.5;
            }
        }

        let head_rsi = bars[m.head_index].rsi();
        let shoulder_rsi = bars[m.right_shoulder_index].rsi();
        if let (Some(head_rsi), Some(shoulder_rsi)) = (head_rsi, shoulder_rsi) {
            let divergence = match m.direction {
                Direction::Bearish => shoulder_rsi - head_rsi,
                Direction::Bullish => head_rsi - shoulder_rsi,
            };
            if divergence >= 8.0 {
                score += 1.0;
            } else if divergence >= 3.0 {
                score += 0.5;
            }
        }

        let left_bars = m.head_index - m.left_shoulder_index;
        let right_bars = m.right_shoulder_index - m.head_index;
        if left_bars > 0 && right_bars > 0 {
            let time_ratio = right_bars as f64 / left_bars as f64;
            if (0.75..=1.25).contains(&time_ratio) {
                score += 0.5;
            }
        }

        clamp_score(score)
    }
}

/// Entry at the neckline, stop beyond the head, target one head height past the neckline.
pub fn head_and_shoulders_levels(
    head_price: f64,
    neckline: f64,
    direction: Direction,
    atr: Option<f64>,
) -> KeyPriceLevels {
    let height = (head_price - neckline).abs();
    let buffer = stop_buffer(atr, height, 0.05, head_price);
    let entry = neckline;
    let (stop_loss, take_profit) = match direction {
        Direction::Bearish => (head_price + buffer, entry - height),
        Direction::Bullish => (head_price - buffer, entry + height),
    };
    KeyPriceLevels {
        entry,
        stop_loss,
        take_profit,
        anchor_prices: vec![
            AnchorPrice {
                label: AnchorLabel::Head,
                price: head_price,
            },
            AnchorPrice {
                label: AnchorLabel::Neckline,
                price: neckline,
            },
        ],
    }
}

impl PatternDetector for HeadAndShouldersDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::HeadAndShoulders
    }

    fn min_bars(&self) -> usize {
        self.min_pattern_bars.get() + 2 * self.swing_window.get() + 1
    }

    fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
        self.find(bars)
            .into_iter()
            .map(|m| {
                let head = &bars[m.head_index];
                let head_price = match m.direction {
                    Direction::Bearish => head.high(),
                    Direction::Bullish => head.low(),
                };
                let atr = bars[m.right_shoulder_index].atr();
                Setup {
                    pattern_type: PatternType::HeadAndShoulders,
                    direction: m.direction,
                    start_index: m.left_shoulder_index,
                    end_index: m.right_shoulder_index,
                    context_index: m.right_shoulder_index,
                    levels: head_and_shoulders_levels(head_price, m.neckline, m.direction, atr),
                    score: self.score(bars, &m),
                }
            })
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        if self.min_pattern_bars.get() > self.max_pattern_bars.get() {
            return Err(PatternError::InvalidConfig(
                "head_and_shoulders: min_pattern_bars > max_pattern_bars".into(),
            ));
        }
        if self.min_head_prominence < 0.0 {
            return Err(PatternError::InvalidConfig(
                "head_and_shoulders: min_head_prominence must be >= 0".into(),
            ));
        }
        if self.max_neckline_slope.is_some_and(|s| s < 0.0) {
            return Err(PatternError::InvalidConfig(
                "head_and_shoulders: max_neckline_slope must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

static HEAD_AND_SHOULDERS_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("swing_window", 3.0, (2.0, 5.0, 1.0), "Swing confirmation bars on each side"),
    ParamMeta::ratio("shoulder_tolerance", 0.02, (0.005, 0.05, 0.005), "Maximum shoulder height difference"),
    ParamMeta::period("min_pattern_bars", 10.0, (6.0, 20.0, 2.0), "Minimum shoulder-to-shoulder span"),
    ParamMeta::period("max_pattern_bars", 80.0, (40.0, 120.0, 10.0), "Maximum shoulder-to-shoulder span"),
    ParamMeta::value("min_head_prominence", 0.0, (0.0, 2.0, 0.25), "Minimum head over shoulder height"),
];

impl ParameterizedDetector for HeadAndShouldersDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HEAD_AND_SHOULDERS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            swing_window: get_period(params, "swing_window", 3)?,
            shoulder_tolerance: get_ratio(params, "shoulder_tolerance", 0.02)?,
            min_pattern_bars: get_period(params, "min_pattern_bars", 10)?,
            max_pattern_bars: get_period(params, "max_pattern_bars", 80)?,
            min_head_prominence: get_value(params, "min_head_prominence", 0.0)?,
            max_neckline_slope: None,
        })
    }

    fn pattern_id_str() -> &'static str {
        PatternType::HeadAndShoulders.as_str()
    }
}
