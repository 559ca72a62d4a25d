//! Forward bar-walk outcome simulation
//!
//! Replays the bars after a candidate's entry bar and reports how the trade
//! resolved: stop, target or still open when the hold window runs out.
//! Excursions are measured in R units (multiples of the entry-to-stop risk).

use serde::{Deserialize, Serialize};

use crate::candidates::PatternCandidate;
use crate::{Direction, OHLCV};

// ============================================================
// TYPES
// ============================================================

/// Resolution of a simulated trade.
///
/// `Breakeven` is part of the label vocabulary shared with downstream
/// consumers; the simulator itself never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
    Pending,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Breakeven => "breakeven",
            Self::Pending => "pending",
        }
    }

    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade to simulate. `entry_index` is the bar the trade is opened on;
/// the walk starts on the bar after it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeInput {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_index: usize,
}

impl OutcomeInput {
    /// Enter at the candidate's entry price on its last bar.
    pub fn from_candidate(candidate: &PatternCandidate) -> Self {
        let levels = &candidate.key_price_levels;
        Self {
            entry_price: levels.entry,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            entry_index: candidate.end_index,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::infer(self.entry_price, self.take_profit)
    }

    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeResult {
    pub outcome: Outcome,
    pub r_multiple: Option<f64>,
    pub bars_to_outcome: Option<usize>,
    pub exit_price: Option<f64>,
    pub max_favorable_excursion: Option<f64>,
    pub max_adverse_excursion: Option<f64>,
}

impl OutcomeResult {
    /// No bars to walk or no risk to measure against.
    pub fn unresolved() -> Self {
        Self {
            outcome: Outcome::Pending,
            r_multiple: None,
            bars_to_outcome: None,
            exit_price: None,
            max_favorable_excursion: None,
            max_adverse_excursion: None,
        }
    }

    pub fn is_win(&self) -> bool {
        self.outcome == Outcome::Win
    }

    pub fn is_loss(&self) -> bool {
        self.outcome == Outcome::Loss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    pub max_bars_to_hold: usize,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            max_bars_to_hold: 100,
        }
    }
}

// ============================================================
// SIMULATION
// ============================================================

/// Running best and worst excursion, both in R and never negative.
#[derive(Debug, Clone, Copy, Default)]
struct Excursion {
    favorable: f64,
    adverse: f64,
}

impl Excursion {
    fn update<T: OHLCV>(&mut self, bar: &T, entry: f64, risk: f64, is_long: bool) {
        let (favorable, adverse) = if is_long {
            ((bar.high() - entry) / risk, (entry - bar.low()) / risk)
        } else {
            ((entry - bar.low()) / risk, (bar.high() - entry) / risk)
        };
        self.favorable = self.favorable.max(favorable);
        self.adverse = self.adverse.max(adverse);
    }
}

/// Walk forward from `input.entry_index` for at most `max_bars_to_hold` bars.
///
/// A bar that touches both stop and target resolves as a loss at the stop:
/// the intrabar path is unknown, so the adverse level is assumed first.
pub fn calculate_outcome<T: OHLCV>(
    bars: &[T],
    input: &OutcomeInput,
    max_bars_to_hold: usize,
) -> OutcomeResult {
    let entry = input.entry_price;
    let stop = input.stop_loss;
    let target = input.take_profit;

    if input.entry_index + 1 >= bars.len() {
        return OutcomeResult::unresolved();
    }
    let risk = input.risk();
    if !(risk > 0.0) {
        return OutcomeResult::unresolved();
    }

    let is_long = target > entry;
    let scan_end = (input.entry_index + 1)
        .saturating_add(max_bars_to_hold)
        .min(bars.len());
    let mut excursion = Excursion::default();

    for (i, bar) in bars
        .iter()
        .enumerate()
        .take(scan_end)
        .skip(input.entry_index + 1)
    {
        excursion.update(bar, entry, risk, is_long);
        let elapsed = i - input.entry_index;

        let (stop_hit, target_hit) = if is_long {
            (bar.low() <= stop, bar.high() >= target)
        } else {
            (bar.high() >= stop, bar.low() <= target)
        };

        let resolved = match (stop_hit, target_hit) {
            (true, true) => Some((Outcome::Loss, -1.0, stop)),
            (true, false) => Some((Outcome::Loss, signed(stop - entry, is_long) / risk, stop)),
            (false, true) => Some((Outcome::Win, signed(target - entry, is_long) / risk, target)),
            (false, false) => None,
        };

        if let Some((outcome, r_multiple, exit)) = resolved {
            return OutcomeResult {
                outcome,
                r_multiple: Some(r_multiple),
                bars_to_outcome: Some(elapsed),
                exit_price: Some(exit),
                max_favorable_excursion: Some(excursion.favorable),
                max_adverse_excursion: Some(excursion.adverse),
            };
        }
    }

    let last_close = bars[scan_end - 1].close();
    OutcomeResult {
        outcome: Outcome::Pending,
        r_multiple: Some(signed(last_close - entry, is_long) / risk),
        bars_to_outcome: Some(scan_end - 1 - input.entry_index),
        exit_price: None,
        max_favorable_excursion: Some(excursion.favorable),
        max_adverse_excursion: Some(excursion.adverse),
    }
}

/// Simulate a candidate entered on its last bar.
pub fn simulate_candidate<T: OHLCV>(
    bars: &[T],
    candidate: &PatternCandidate,
    config: &OutcomeConfig,
) -> OutcomeResult {
    calculate_outcome(
        bars,
        &OutcomeInput::from_candidate(candidate),
        config.max_bars_to_hold,
    )
}

#[inline]
fn signed(distance: f64, is_long: bool) -> f64 {
    if is_long {
        distance
    } else {
        -distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn hl(high: f64, low: f64) -> Candle {
        let mid = (high + low) / 2.0;
        Candle::new(mid, high, low, mid)
    }

    fn hlc(high: f64, low: f64, close: f64) -> Candle {
        Candle::new(close, high, low, close)
    }

    fn input(entry: f64, stop: f64, target: f64) -> OutcomeInput {
        OutcomeInput {
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            entry_index: 0,
        }
    }

    fn close(a: Option<f64>, b: f64, eps: f64) -> bool {
        a.map(|v| (v - b).abs() < eps).unwrap_or(false)
    }

    #[test]
    fn long_hits_target() {
        let bars = [hl(1.10, 1.08), hl(1.12, 1.09), hl(1.15, 1.11)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.14), 100);
        assert_eq!(r.outcome, Outcome::Win);
        assert!(close(r.r_multiple, 2.0, 1e-5));
        assert_eq!(r.bars_to_outcome, Some(2));
        assert_eq!(r.exit_price, Some(1.14));
        assert!(close(r.max_favorable_excursion, 2.5, 0.05));
    }

    #[test]
    fn long_hits_stop() {
        let bars = [hl(1.10, 1.08), hl(1.09, 1.07)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.14), 100);
        assert_eq!(r.outcome, Outcome::Loss);
        assert!(close(r.r_multiple, -1.0, 1e-9));
        assert_eq!(r.bars_to_outcome, Some(1));
        assert_eq!(r.exit_price, Some(1.08));
        assert!(r.max_favorable_excursion.is_some());
        assert!(r.max_adverse_excursion.is_some());
    }

    #[test]
    fn short_hits_target() {
        let bars = [hl(1.12, 1.10), hl(1.11, 1.09), hl(1.09, 1.06)];
        let r = calculate_outcome(&bars, &input(1.10, 1.12, 1.06), 100);
        assert_eq!(r.outcome, Outcome::Win);
        assert!(close(r.r_multiple, 2.0, 1e-5));
        assert_eq!(r.bars_to_outcome, Some(2));
        assert_eq!(r.exit_price, Some(1.06));
        assert!(close(r.max_favorable_excursion, 2.0, 0.05));
    }

    #[test]
    fn short_hits_stop() {
        let bars = [hl(1.12, 1.10), hl(1.13, 1.11)];
        let r = calculate_outcome(&bars, &input(1.10, 1.12, 1.06), 100);
        assert_eq!(r.outcome, Outcome::Loss);
        assert!(close(r.r_multiple, -1.0, 1e-9));
        assert_eq!(r.exit_price, Some(1.12));
    }

    #[test]
    fn same_bar_stop_and_target_is_loss() {
        let bars = [hl(1.10, 1.08), hl(1.15, 1.05)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.14), 100);
        assert_eq!(r.outcome, Outcome::Loss);
        assert_eq!(r.r_multiple, Some(-1.0));
        assert_eq!(r.exit_price, Some(1.08));
    }

    #[test]
    fn hold_window_exhausted_is_pending() {
        let bars = [
            hl(1.10, 1.09),
            hlc(1.105, 1.095, 1.10),
            hlc(1.105, 1.095, 1.10),
        ];
        let r = calculate_outcome(&bars, &input(1.10, 1.05, 1.20), 2);
        assert_eq!(r.outcome, Outcome::Pending);
        assert!(r.r_multiple.is_some());
        assert_eq!(r.bars_to_outcome, Some(2));
        assert_eq!(r.exit_price, None);
        assert!(close(r.max_favorable_excursion, 0.1, 0.05));
    }

    #[test]
    fn pending_reports_unrealized_r() {
        let bars = [hl(1.10, 1.09), hlc(1.12, 1.10, 1.11)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.20), 100);
        assert_eq!(r.outcome, Outcome::Pending);
        assert!(close(r.r_multiple, 0.5, 1e-6));
        assert_eq!(r.bars_to_outcome, Some(1));
    }

    #[test]
    fn entry_on_last_bar_is_unresolved() {
        let bars = [hl(1.10, 1.08)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.14), 100);
        assert_eq!(r, OutcomeResult::unresolved());
    }

    #[test]
    fn entry_past_end_is_unresolved() {
        let bars = [hl(1.10, 1.08), hl(1.11, 1.09)];
        let mut i = input(1.10, 1.08, 1.14);
        i.entry_index = 7;
        assert_eq!(calculate_outcome(&bars, &i, 100), OutcomeResult::unresolved());
        assert_eq!(
            calculate_outcome::<Candle>(&[], &input(1.10, 1.08, 1.14), 100),
            OutcomeResult::unresolved()
        );
    }

    #[test]
    fn zero_risk_is_unresolved() {
        let bars = [hl(1.10, 1.08), hl(1.12, 1.09)];
        let r = calculate_outcome(&bars, &input(1.10, 1.10, 1.14), 100);
        assert_eq!(r.outcome, Outcome::Pending);
        assert_eq!(r.max_favorable_excursion, None);
        assert_eq!(r.max_adverse_excursion, None);
    }

    #[test]
    fn mfe_tracks_peak_before_stop() {
        let bars = [
            hl(1.10, 1.08),
            hl(1.12, 1.09),
            hl(1.13, 1.10),
            hl(1.11, 1.07),
        ];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.16), 100);
        assert_eq!(r.outcome, Outcome::Loss);
        assert!(close(r.max_favorable_excursion, 1.5, 0.05));
    }

    #[test]
    fn mae_long() {
        let bars = [
            hl(1.10, 1.08),
            hl(1.11, 1.085),
            hl(1.12, 1.09),
            hl(1.15, 1.11),
        ];
        let r = calculate_outcome(&bars, &input(1.10, 1.06, 1.14), 100);
        assert_eq!(r.outcome, Outcome::Win);
        assert!(close(r.max_adverse_excursion, 0.375, 0.005));
    }

    #[test]
    fn mae_short() {
        let bars = [
            hl(1.12, 1.10),
            hl(1.13, 1.09),
            hl(1.11, 1.08),
            hl(1.08, 1.05),
        ];
        let r = calculate_outcome(&bars, &input(1.10, 1.14, 1.06), 100);
        assert_eq!(r.outcome, Outcome::Win);
        assert!(close(r.max_adverse_excursion, 0.75, 0.005));
    }

    #[test]
    fn mae_zero_without_adverse_move() {
        let bars = [hl(1.10, 1.10), hl(1.12, 1.10), hl(1.15, 1.11)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.14), 100);
        assert_eq!(r.outcome, Outcome::Win);
        assert_eq!(r.max_adverse_excursion, Some(0.0));
    }

    #[test]
    fn zero_hold_is_pending_without_walk() {
        let bars = [hl(1.10, 1.08), hl(1.20, 1.00)];
        let r = calculate_outcome(&bars, &input(1.10, 1.08, 1.14), 0);
        assert_eq!(r.outcome, Outcome::Pending);
        assert_eq!(r.bars_to_outcome, Some(0));
        assert_eq!(r.max_favorable_excursion, Some(0.0));
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&Outcome::Win).unwrap(), "\"win\"");
        let json = serde_json::to_value(OutcomeResult::unresolved()).unwrap();
        assert_eq!(json["outcome"], "pending");
        assert!(json["r_multiple"].is_null());
        let config: OutcomeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_bars_to_hold, 100);
    }
}
