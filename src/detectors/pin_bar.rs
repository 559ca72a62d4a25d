//! Pin bar detection
//!
//! A pin bar is a single bar with a small body, a long tail rejecting one
//! side of the market and a short nose on the other. A long lower tail is
//! bullish, a long upper tail bearish.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, ratio_of, stop_buffer};
use crate::{
    params::{get_ratio, get_value, ParamMeta, ParameterizedDetector},
    AnchorLabel, AnchorPrice, Direction, Indicators, KeyPriceLevels, OHLCVExt, PatternDetector,
    PatternError, PatternType, Ratio, Result, Setup, OHLCV,
};

/// Pin bar detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinBarDetector {
    /// Minimum tail length as a fraction of range
    pub min_wick_ratio: Ratio,
    pub max_body_ratio: Ratio,
    /// Maximum opposite wick as a fraction of range
    pub max_nose_ratio: Ratio,
    /// Range/ATR bounds, applied only when ATR is known
    pub min_atr_multiple: f64,
    pub max_atr_multiple: Option<f64>,
    /// Close must sit on the signal side of the previous bar's midpoint
    pub require_momentum_confirmation: bool,
}

impl Default for PinBarDetector {
    fn default() -> Self {
        Self {
            min_wick_ratio: Ratio::new_const(0.6),
            max_body_ratio: Ratio::new_const(0.35),
            max_nose_ratio: Ratio::new_const(0.25),
            min_atr_multiple: 0.0,
            max_atr_multiple: None,
            require_momentum_confirmation: false,
        }
    }
}

/// Raw pin bar hit before pricing and scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinBarMatch {
    pub index: usize,
    pub direction: Direction,
}

impl PinBarDetector {
    /// Scan bars `1..len-1` for pin bars.
    pub fn find<T: OHLCV>(&self, bars: &[T]) -> Vec<PinBarMatch> {
        if bars.len() < 3 {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for i in 1..bars.len() - 1 {
            let bar = &bars[i];
            let range = bar.range();
            if range <= 0.0 {
                continue;
            }

            if let Some(atr) = bar.positive_atr() {
                let multiple = range / atr;
                let too_large = self.max_atr_multiple.is_some_and(|max| multiple > max);
                if multiple < self.min_atr_multiple || too_large {
                    continue;
                }
            }

            if bar.body() / range > self.max_body_ratio.get() {
                continue;
            }

            let upper = bar.upper_shadow() / range;
            let lower = bar.lower_shadow() / range;

            let direction = if lower >= self.min_wick_ratio.get() {
                if upper > self.max_nose_ratio.get() {
                    continue;
                }
                Direction::Bullish
            } else if upper >= self.min_wick_ratio.get() {
                if lower > self.max_nose_ratio.get() {
                    continue;
                }
                Direction::Bearish
            } else {
                continue;
            };

            if self.require_momentum_confirmation {
                let prev_mid = bars[i - 1].midpoint();
                let against = match direction {
                    Direction::Bullish => bar.close() < prev_mid,
                    Direction::Bearish => bar.close() > prev_mid,
                };
                if against {
                    continue;
                }
            }

            matches.push(PinBarMatch {
                index: i,
                direction,
            });
        }
        matches
    }

    /// Detection-time score 1..=10 from geometry, protrusion beyond prior
    /// bars, proximity to the bar's nearest support/resistance and volume.
    pub fn score<T: Indicators>(&self, bars: &[T], m: &PinBarMatch) -> f64 {
        let bar = &bars[m.index];
        let range = bar.range();
        if range <= 0.0 {
            return 1.0;
        }

        let mut score = 5.0;

        let (tail, nose) = match m.direction {
            Direction::Bullish => (bar.lower_shadow(), bar.upper_shadow()),
            Direction::Bearish => (bar.upper_shadow(), bar.lower_shadow()),
        };
        if tail / range >= 0.75 {
            score += 1.0;
        }
        if bar.body() / range <= 0.15 {
            score += 1.0;
        }
        if nose / range <= 0.05 {
            score += 1.0;
        }

        let lookback = m.index.min(5);
        if lookback > 0 {
            let protrusion = protrusion_count(bars, m.index, m.direction, lookback);
            if protrusion == 0 {
                score -= 2.0;
            } else if protrusion >= 5 {
                score += 2.0;
            } else if protrusion >= 3 {
                score += 1.0;
            }
        }

        let atr = bar.atr().unwrap_or(range);
        let level_distance = match m.direction {
            Direction::Bullish => bar.nearest_support().map(|s| (bar.low() - s).abs()),
            Direction::Bearish => bar.nearest_resistance().map(|r| (bar.high() - r).abs()),
        };
        if let Some(dist) = level_distance {
            if dist <= 0.5 * atr {
                score += 2.0;
            } else if dist <= atr {
                score += 1.0;
            }
        }
        if bar.nearest_support().is_none() && bar.nearest_resistance().is_none() {
            score -= 2.0;
        }

        if let Some(vol_ratio) = ratio_of(bar.volume(), bar.volume_sma()) {
            if vol_ratio >= 1.5 {
                score += 1.0;
            } else if vol_ratio < 0.8 {
                score -= 1.0;
            }
        }

        if let Some(atr) = bar.positive_atr() {
            let atr_ratio = range / atr;
            if !(0.5..=2.0).contains(&atr_ratio) {
                score -= 0.5;
            }
        }

        let closes_with_signal = match m.direction {
            Direction::Bullish => bar.is_bullish(),
            Direction::Bearish => bar.is_bearish(),
        };
        if closes_with_signal {
            score += 0.5;
        }

        clamp_score(score)
    }
}

/// Prior bars (up to `lookback`) whose extreme the pin's tail exceeds.
pub(crate) fn protrusion_count<T: OHLCV>(
    bars: &[T],
    index: usize,
    direction: Direction,
    lookback: usize,
) -> usize {
    let bar = &bars[index];
    (1..=lookback.min(index))
        .map(|j| &bars[index - j])
        .filter(|prior| match direction {
            Direction::Bullish => bar.low() < prior.low(),
            Direction::Bearish => bar.high() > prior.high(),
        })
        .count()
}

/// Entry at the far end of the bar, stop beyond the wick tip, target at 2R.
pub fn pin_bar_levels<T: OHLCV>(bar: &T, direction: Direction) -> KeyPriceLevels {
    let buffer = stop_buffer(bar.atr(), bar.range(), 0.1, bar.close());

    match direction {
        Direction::Bullish => {
            let entry = bar.high();
            let stop_loss = bar.low() - buffer;
            let risk = entry - stop_loss;
            KeyPriceLevels {
                entry,
                stop_loss,
                take_profit: entry + risk * 2.0,
                anchor_prices: vec![
                    AnchorPrice {
                        label: AnchorLabel::WickTip,
                        price: bar.low(),
                    },
                    AnchorPrice {
                        label: AnchorLabel::BodyTop,
                        price: bar.open().max(bar.close()),
                    },
                ],
            }
        }
        Direction::Bearish => {
            let entry = bar.low();
            let stop_loss = bar.high() + buffer;
            let risk = stop_loss - entry;
            KeyPriceLevels {
                entry,
                stop_loss,
                take_profit: entry - risk * 2.0,
                anchor_prices: vec![
                    AnchorPrice {
                        label: AnchorLabel::WickTip,
                        price: bar.high(),
                    },
                    AnchorPrice {
                        label: AnchorLabel::BodyBottom,
                        price: bar.open().min(bar.close()),
                    },
                ],
            }
        }
    }
}

impl PatternDetector for PinBarDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::PinBar
    }

    fn min_bars(&self) -> usize {
        3
    }

    fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
        self.find(bars)
            .into_iter()
            .map(|m| Setup {
                pattern_type: PatternType::PinBar,
                direction: m.direction,
                start_index: m.index,
                end_index: m.index,
                context_index: m.index,
                levels: pin_bar_levels(&bars[m.index], m.direction),
                score: self.score(bars, &m),
            })
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        if self.min_atr_multiple < 0.0 {
            return Err(PatternError::InvalidConfig(
                "pin bar min_atr_multiple must be >= 0".into(),
            ));
        }
        if let Some(max) = self.max_atr_multiple {
            if max < self.min_atr_multiple {
                return Err(PatternError::InvalidConfig(
                    "pin bar max_atr_multiple below min_atr_multiple".into(),
                ));
            }
        }
        Ok(())
    }
}

static PIN_BAR_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio("min_wick_ratio", 0.6, (0.5, 0.8, 0.05), "Minimum tail fraction of range"),
    ParamMeta::ratio("max_body_ratio", 0.35, (0.2, 0.4, 0.05), "Maximum body fraction of range"),
    ParamMeta::ratio("max_nose_ratio", 0.25, (0.05, 0.3, 0.05), "Maximum nose fraction of range"),
    ParamMeta::value("min_atr_multiple", 0.0, (0.0, 2.0, 0.25), "Minimum range in ATR"),
];

impl ParameterizedDetector for PinBarDetector {
    fn param_meta() -> &'static [ParamMeta] {
        PIN_BAR_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_wick_ratio: get_ratio(params, "min_wick_ratio", 0.6)?,
            max_body_ratio: get_ratio(params, "max_body_ratio", 0.35)?,
            max_nose_ratio: get_ratio(params, "max_nose_ratio", 0.25)?,
            min_atr_multiple: get_value(params, "min_atr_multiple", 0.0)?,
            ..Self::default()
        })
    }

    fn pattern_id_str() -> &'static str {
        PatternType::PinBar.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn neutral() -> Candle {
        Candle::new(1.1000, 1.1010, 1.0990, 1.1005)
    }

    fn hammer() -> Candle {
        Candle::new(1.1000, 1.1050, 1.0800, 1.0990)
    }

    fn shooting_star() -> Candle {
        Candle::new(1.1000, 1.1200, 1.0995, 1.1005)
    }

    #[test]
    fn detects_bullish_pin() {
        let bars = vec![neutral(), hammer(), neutral()];
        let found = PinBarDetector::default().find(&bars);
        assert_eq!(
            found,
            vec![PinBarMatch {
                index: 1,
                direction: Direction::Bullish
            }]
        );
    }

    #[test]
    fn detects_bearish_pin() {
        let bars = vec![neutral(), shooting_star(), neutral()];
        let found = PinBarDetector::default().find(&bars);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].direction, Direction::Bearish);
    }

    #[test]
    fn edges_are_never_pins() {
        let bars = vec![hammer(), neutral(), hammer()];
        assert!(PinBarDetector::default().find(&bars).is_empty());
    }

    #[test]
    fn long_nose_rejected() {
        // tail 2/3 of range, nose 1/3
        let spinning = Candle::new(1.1000, 1.1030, 1.0940, 1.1000);
        let bars = vec![neutral(), spinning, neutral()];
        assert!(PinBarDetector::default().find(&bars).is_empty());
    }

    #[test]
    fn zero_range_skipped() {
        let flat = Candle::new(1.1, 1.1, 1.1, 1.1);
        let bars = vec![neutral(), flat, neutral()];
        assert!(PinBarDetector::default().find(&bars).is_empty());
    }

    #[test]
    fn atr_bounds_filter() {
        let bars = vec![neutral(), hammer().with_atr(0.001), neutral()];
        let detector = PinBarDetector {
            max_atr_multiple: Some(3.0),
            ..Default::default()
        };
        assert!(detector.find(&bars).is_empty());
        assert_eq!(PinBarDetector::default().find(&bars).len(), 1);
    }

    #[test]
    fn momentum_confirmation() {
        let high_prev = Candle::new(1.1100, 1.1200, 1.1000, 1.1150);
        let bars = vec![high_prev, hammer(), neutral()];
        let detector = PinBarDetector {
            require_momentum_confirmation: true,
            ..Default::default()
        };
        assert!(detector.find(&bars).is_empty());
    }

    #[test]
    fn bullish_levels() {
        let levels = pin_bar_levels(&hammer(), Direction::Bullish);
        assert_eq!(levels.entry, 1.1050);
        assert!(levels.stop_loss < 1.0800);
        let risk = levels.entry - levels.stop_loss;
        assert!((levels.take_profit - (levels.entry + 2.0 * risk)).abs() < 1e-12);
        assert_eq!(levels.anchor(AnchorLabel::WickTip), Some(1.0800));
        assert_eq!(levels.anchor(AnchorLabel::BodyTop), Some(1.1000));
        assert_eq!(levels.direction(), Direction::Bullish);
    }

    #[test]
    fn bearish_levels_use_atr_buffer() {
        let bar = shooting_star().with_atr(0.004);
        let levels = pin_bar_levels(&bar, Direction::Bearish);
        assert_eq!(levels.entry, 1.0995);
        assert!((levels.stop_loss - 1.1220).abs() < 1e-12);
        assert!(levels.take_profit < levels.entry);
        assert_eq!(levels.anchor(AnchorLabel::BodyBottom), Some(1.1000));
    }

    #[test]
    fn score_rewards_level_and_protrusion() {
        let mut bars: Vec<Candle> = (0..6).map(|_| neutral()).collect();
        bars.push(Candle {
            nearest_support: Some(1.0805),
            ..hammer().with_atr(0.02)
        });
        bars.push(neutral());
        let detector = PinBarDetector::default();
        let m = detector.find(&bars)[0];
        let with_level = detector.score(&bars, &m);

        bars[6].nearest_support = None;
        let without_level = detector.score(&bars, &m);
        assert!(with_level > without_level);
        assert!((1.0..=10.0).contains(&with_level));
    }

    #[test]
    fn detect_produces_priced_setups() {
        let bars = vec![neutral(), hammer(), neutral()];
        let setups = PinBarDetector::default().detect(&bars);
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].start_index, 1);
        assert_eq!(setups[0].end_index, 1);
        assert!(setups[0].confidence() > 0.0);
    }
}
