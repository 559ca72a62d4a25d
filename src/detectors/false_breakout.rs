//! False breakout detection
//!
//! Price pokes through a support/resistance level by more than a minimum
//! threshold, then closes back on the original side within a few bars.
//! A failed break above resistance is bearish; a failed break below
//! support is bullish.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{clamp_score, ratio_of, stop_buffer};
use crate::{
    levels::{detect_support_resistance_levels, score_support_resistance_levels, LevelConfig},
    params::{get_period, get_value, ParamMeta, ParameterizedDetector},
    AnchorLabel, AnchorPrice, Direction, Indicators, KeyPriceLevels, OHLCVExt, PatternDetector,
    PatternError, PatternType, Period, Result, Setup, OHLCV,
};

/// Pip size used for the fixed break threshold
const THRESHOLD_PIP: f64 = 0.0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FalseBreakoutDetector {
    /// Fixed minimum penetration beyond the level, in pips
    pub break_threshold_pips: f64,
    /// Bars after the break allowed for the close back inside
    pub reversal_bars: Period,
    /// Use ATR-scaled penetration bounds when the break bar has ATR
    pub use_atr_threshold: bool,
    pub min_atr_penetration: f64,
    pub max_atr_penetration: f64,
    /// Support/resistance levels tested for breaks
    pub levels: LevelConfig,
}

impl Default for FalseBreakoutDetector {
    fn default() -> Self {
        Self {
            break_threshold_pips: 5.0,
            reversal_bars: Period::new_const(3),
            use_atr_threshold: false,
            min_atr_penetration: 0.1,
            max_atr_penetration: 1.5,
            levels: LevelConfig::default(),
        }
    }
}

/// Raw false breakout hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FalseBreakoutMatch {
    pub break_index: usize,
    pub reversal_index: usize,
    pub broken_level: f64,
    pub direction: Direction,
}

impl FalseBreakoutMatch {
    /// Break-bar extreme beyond the level
    pub fn extreme_price<T: OHLCV>(&self, bars: &[T]) -> f64 {
        match self.direction {
            Direction::Bullish => bars[self.break_index].low(),
            Direction::Bearish => bars[self.break_index].high(),
        }
    }
}

impl FalseBreakoutDetector {
    /// Minimum and optional maximum penetration for a break bar.
    fn thresholds(&self, atr: Option<f64>) -> (f64, Option<f64>) {
        match atr.filter(|a| *a > 0.0) {
            Some(atr) if self.use_atr_threshold => (
                self.min_atr_penetration * atr,
                Some(self.max_atr_penetration * atr),
            ),
            _ => (self.break_threshold_pips * THRESHOLD_PIP, None),
        }
    }

    /// Search against this detector's own support/resistance levels.
    pub fn find<T: OHLCV>(&self, bars: &[T]) -> Vec<FalseBreakoutMatch> {
        let levels = detect_support_resistance_levels(bars, &self.levels);
        self.find_with_levels(bars, &levels)
    }

    /// Search against caller-supplied levels, level by level.
    pub fn find_with_levels<T: OHLCV>(&self, bars: &[T], levels: &[f64]) -> Vec<FalseBreakoutMatch> {
        let mut matches = Vec::new();
        if bars.len() < 2 {
            return matches;
        }
        for &level in levels {
            self.find_at_level(bars, level, &mut matches);
        }
        matches
    }

    fn find_at_level<T: OHLCV>(&self, bars: &[T], level: f64, out: &mut Vec<FalseBreakoutMatch>) {
        let last = bars.len() - 1;
        for i in 1..bars.len() {
            let prev = &bars[i - 1];
            let curr = &bars[i];
            let (min_threshold, max_threshold) = self.thresholds(curr.atr());
            let reversal_end = (i + self.reversal_bars.get()).min(last);

            // A capped up-break still leaves the down-break check open
            let broke_above = prev.close() <= level && curr.high() > level + min_threshold;
            if broke_above && max_threshold.map_or(true, |max| curr.high() - level <= max) {
                if let Some(j) = (i + 1..=reversal_end).find(|&j| bars[j].close() < level) {
                    out.push(FalseBreakoutMatch {
                        break_index: i,
                        reversal_index: j,
                        broken_level: level,
                        direction: Direction::Bearish,
                    });
                }
            }

            let broke_below = prev.close() >= level && curr.low() < level - min_threshold;
            if broke_below && max_threshold.map_or(true, |max| level - curr.low() <= max) {
                if let Some(j) = (i + 1..=reversal_end).find(|&j| bars[j].close() > level) {
                    out.push(FalseBreakoutMatch {
                        break_index: i,
                        reversal_index: j,
                        broken_level: level,
                        direction: Direction::Bullish,
                    });
                }
            }
        }
    }

    /// Detection-time score 1..=10: reversal speed, close back inside the
    /// level, level strength, quiet break volume and shallow penetration.
    pub fn score<T: Indicators>(&self, bars: &[T], m: &FalseBreakoutMatch, touch_count: usize) -> f64 {
        let breaker = &bars[m.break_index];
        if breaker.range() <= 0.0 {
            return 1.0;
        }

        let mut score = 5.0;

        let reversal_speed = m.reversal_index - m.break_index;
        if reversal_speed <= 1 {
            score += 1.0;
        } else if reversal_speed >= 3 {
            score -= 1.0;
        }

        let body_beyond = match m.direction {
            Direction::Bearish => breaker.close() > m.broken_level,
            Direction::Bullish => breaker.close() < m.broken_level,
        };
        score += if body_beyond { -0.5 } else { 1.0 };

        if touch_count >= 3 {
            score += 1.5;
        } else if touch_count >= 2 {
            score += 0.5;
        } else {
            score -= 1.0;
        }

        if let Some(vol_ratio) = ratio_of(breaker.volume(), breaker.volume_sma()) {
            if vol_ratio < 0.8 {
                score += 1.0;
            } else if vol_ratio > 1.5 {
                score -= 1.0;
            }
        }

        if let Some(reversal_ratio) = ratio_of(bars[m.reversal_index].volume(), breaker.volume()) {
            if reversal_ratio >= 1.5 {
                score += 1.0;
            }
        }

        if let Some(atr) = breaker.positive_atr() {
            let penetration = (m.extreme_price(bars) - m.broken_level).abs();
            let atr_ratio = penetration / atr;
            if atr_ratio <= 0.5 {
                score += 0.5;
            } else if atr_ratio > 1.0 {
                score -= 0.5;
            }
        }

        clamp_score(score)
    }
}

/// Entry back at the level, stop beyond the false-break extreme, target at 2R.
pub fn false_breakout_levels(
    broken_level: f64,
    extreme_price: f64,
    direction: Direction,
    atr: Option<f64>,
) -> KeyPriceLevels {
    let buffer = stop_buffer(atr, extreme_price - broken_level, 0.5, broken_level);
    let entry = broken_level;
    let (stop_loss, take_profit) = match direction {
        Direction::Bullish => {
            let stop_loss = extreme_price - buffer;
            (stop_loss, entry + (entry - stop_loss) * 2.0)
        }
        Direction::Bearish => {
            let stop_loss = extreme_price + buffer;
            (stop_loss, entry - (stop_loss - entry) * 2.0)
        }
    };
    KeyPriceLevels {
        entry,
        stop_loss,
        take_profit,
        anchor_prices: vec![
            AnchorPrice {
                label: AnchorLabel::BrokenLevel,
                price: broken_level,
            },
            AnchorPrice {
                label: AnchorLabel::FalseBreakExtreme,
                price: extreme_price,
            },
        ],
    }
}

impl PatternDetector for FalseBreakoutDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::FalseBreakout
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
        let scored = score_support_resistance_levels(bars, &self.levels);
        let mut setups = Vec::new();
        let mut found = Vec::new();

        for level in &scored {
            found.clear();
            self.find_at_level(bars, level.price, &mut found);
            for m in &found {
                let atr = bars[m.reversal_index].atr();
                setups.push(Setup {
                    pattern_type: PatternType::FalseBreakout,
                    direction: m.direction,
                    start_index: m.break_index,
                    end_index: m.reversal_index,
                    context_index: m.reversal_index,
                    levels: false_breakout_levels(m.broken_level, m.extreme_price(bars), m.direction, atr),
                    score: self.score(bars, m, level.touch_count),
                });
            }
        }
        setups
    }

    fn validate_config(&self) -> Result<()> {
        if self.break_threshold_pips < 0.0 {
            return Err(PatternError::InvalidConfig(
                "false_breakout: break_threshold_pips must be >= 0".into(),
            ));
        }
        if self.min_atr_penetration > self.max_atr_penetration {
            return Err(PatternError::InvalidConfig(
                "false_breakout: min_atr_penetration > max_atr_penetration".into(),
            ));
        }
        if self.levels.lookback == 0 || self.levels.tolerance < 0.0 {
            return Err(PatternError::InvalidConfig(
                "false_breakout: level lookback must be > 0 and tolerance >= 0".into(),
            ));
        }
        Ok(())
    }
}

static FALSE_BREAKOUT_PARAMS: &[ParamMeta] = &[
    ParamMeta::value("break_threshold_pips", 5.0, (1.0, 20.0, 1.0), "Minimum penetration beyond the level in pips"),
    ParamMeta::period("reversal_bars", 3.0, (1.0, 6.0, 1.0), "Bars allowed for the close back inside"),
    ParamMeta::value("min_atr_penetration", 0.1, (0.0, 0.5, 0.05), "Minimum penetration in ATR"),
    ParamMeta::value("max_atr_penetration", 1.5, (0.5, 3.0, 0.25), "Maximum penetration in ATR"),
];

impl ParameterizedDetector for FalseBreakoutDetector {
    fn param_meta() -> &'static [ParamMeta] {
        FALSE_BREAKOUT_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            break_threshold_pips: get_value(params, "break_threshold_pips", 5.0)?,
            reversal_bars: get_period(params, "reversal_bars", 3)?,
            min_atr_penetration: get_value(params, "min_atr_penetration", 0.1)?,
            max_atr_penetration: get_value(params, "max_atr_penetration", 1.5)?,
            ..Self::default()
        })
    }

    fn pattern_id_str() -> &'static str {
        PatternType::FalseBreakout.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(open, high, low, close)
    }

    /// Closes below 1.1000, spikes to 1.1020, closes back below next bar.
    fn failed_break_up() -> Vec<Candle> {
        vec![
            bar(1.0980, 1.0995, 1.0975, 1.0990),
            bar(1.0990, 1.1020, 1.0985, 1.1005),
            bar(1.1005, 1.1008, 1.0980, 1.0985),
            bar(1.0985, 1.0990, 1.0970, 1.0975),
        ]
    }

    #[test]
    fn detects_bearish_false_break() {
        let found = FalseBreakoutDetector::default().find_with_levels(&failed_break_up(), &[1.1000]);
        assert_eq!(
            found,
            vec![FalseBreakoutMatch {
                break_index: 1,
                reversal_index: 2,
                broken_level: 1.1000,
                direction: Direction::Bearish,
            }]
        );
    }

    #[test]
    fn shallow_poke_ignored() {
        let mut bars = failed_break_up();
        bars[1].high = 1.1003;
        let found = FalseBreakoutDetector::default().find_with_levels(&bars, &[1.1000]);
        assert!(found.is_empty());
    }

    #[test]
    fn no_reversal_no_match() {
        let mut bars = failed_break_up();
        bars[2] = bar(1.1005, 1.1012, 1.0998, 1.1010);
        bars[3].close = 1.1015;
        let found = FalseBreakoutDetector::default().find_with_levels(&bars, &[1.1000]);
        assert!(found.is_empty());
    }

    #[test]
    fn detects_bullish_false_break() {
        let bars = vec![
            bar(1.1010, 1.1020, 1.1005, 1.1010),
            bar(1.1010, 1.1012, 1.0980, 1.0995),
            bar(1.0995, 1.1015, 1.0990, 1.1012),
        ];
        let found = FalseBreakoutDetector::default().find_with_levels(&bars, &[1.1000]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].direction, Direction::Bullish);
        assert_eq!(found[0].extreme_price(&bars), 1.0980);
    }

    #[test]
    fn capped_up_break_keeps_down_break() {
        let mut breaker = bar(1.1000, 1.1030, 1.0990, 1.0998);
        breaker.atr = Some(0.0010);
        let bars = vec![
            bar(1.0995, 1.1005, 1.0990, 1.1000),
            breaker,
            bar(1.0998, 1.1010, 1.0995, 1.1005),
        ];
        let detector = FalseBreakoutDetector {
            use_atr_threshold: true,
            ..Default::default()
        };
        let found = detector.find_with_levels(&bars, &[1.1000]);
        assert_eq!(
            found,
            vec![FalseBreakoutMatch {
                break_index: 1,
                reversal_index: 2,
                broken_level: 1.1000,
                direction: Direction::Bullish,
            }]
        );
    }

    #[test]
    fn atr_cap_rejects_deep_penetration() {
        let mut bars = failed_break_up();
        bars[1].atr = Some(0.0010);
        let detector = FalseBreakoutDetector {
            use_atr_threshold: true,
            ..Default::default()
        };
        // penetration 0.0020 exceeds 1.5 ATR
        assert!(detector.find_with_levels(&bars, &[1.1000]).is_empty());
    }

    #[test]
    fn no_levels_no_matches() {
        assert!(FalseBreakoutDetector::default()
            .find_with_levels(&failed_break_up(), &[])
            .is_empty());
    }

    #[test]
    fn bearish_levels() {
        let levels = false_breakout_levels(1.1000, 1.1020, Direction::Bearish, None);
        assert_eq!(levels.entry, 1.1000);
        assert!((levels.stop_loss - 1.1030).abs() < 1e-12);
        assert!((levels.take_profit - 1.0940).abs() < 1e-9);
        assert_eq!(levels.anchor(AnchorLabel::FalseBreakExtreme), Some(1.1020));
    }

    #[test]
    fn bullish_levels() {
        let levels = false_breakout_levels(1.1000, 1.0980, Direction::Bullish, Some(0.002));
        assert!((levels.stop_loss - 1.0970).abs() < 1e-12);
        assert!(levels.take_profit > levels.entry);
    }

    #[test]
    fn strong_level_scores_higher() {
        let bars = failed_break_up();
        let detector = FalseBreakoutDetector::default();
        let m = detector.find_with_levels(&bars, &[1.1000])[0];
        assert!(detector.score(&bars, &m, 4) > detector.score(&bars, &m, 1));
    }
}
