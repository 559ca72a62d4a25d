//! Post-outcome quality grading
//!
//! Re-scores a candidate together with its simulated outcome using
//! pattern-specific heuristics over the bars' indicator and context rows.
//! Every check that moves the score leaves a [`Rationale`] behind; the
//! outcome line always comes last.
//!
//! Scoring starts from [`BASE_SCORE`], the final value is rounded and clamped
//! to `1..=10`, and a rating of at least [`APPROVAL_THRESHOLD`] is approved.

use serde::{Deserialize, Serialize};

use crate::candidates::PatternCandidate;
use crate::detectors::pin_bar::protrusion_count;
use crate::outcome::{Outcome, OutcomeResult};
use crate::{
    AnchorLabel, Direction, Indicators, OHLCVExt, PatternError, PatternType, Result, TrendState,
};

/// Minimum rating that is approved
pub const APPROVAL_THRESHOLD: u8 = 6;

/// Score every analysis starts from
pub const BASE_SCORE: f64 = 3.0;

// ============================================================
// RATIONALE
// ============================================================

/// Which heuristic produced a rationale line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    InvalidBar,
    Tail,
    Body,
    Nose,
    CloseConfirmation,
    Protrusion,
    Size,
    Momentum,
    Symmetry,
    Height,
    Spacing,
    Timing,
    Divergence,
    ExtremeShift,
    ReversalSpeed,
    Penetration,
    BodyClose,
    Trend,
    SupportResistance,
    Rsi,
    Volume,
    Bollinger,
    Macd,
    MovingAverages,
    Adx,
    Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Negative,
    Neutral,
}

impl Tone {
    pub fn marker(self) -> char {
        match self {
            Tone::Positive => '▲',
            Tone::Negative => '▼',
            Tone::Neutral => '•',
        }
    }
}

/// One scored observation. `delta` is what the check added to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub signal: Signal,
    pub tone: Tone,
    pub delta: f64,
    pub text: String,
}

impl std::fmt::Display for Rationale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.tone.marker(), self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Integer grade in `1..=10`
    pub quality_rating: u8,
    pub notes: Vec<Rationale>,
    pub approved: bool,
}

impl AnalysisResult {
    /// Rendered notes, one line each
    pub fn notes_text(&self) -> String {
        self.notes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_signal(&self, signal: Signal) -> bool {
        self.notes.iter().any(|n| n.signal == signal)
    }
}

// ============================================================
// SCORECARD
// ============================================================

#[derive(Debug)]
struct Scorecard {
    score: f64,
    notes: Vec<Rationale>,
}

impl Scorecard {
    fn new() -> Self {
        Self {
            score: BASE_SCORE,
            notes: Vec::new(),
        }
    }

    fn push(&mut self, signal: Signal, tone: Tone, delta: f64, text: impl Into<String>) {
        self.score += delta;
        self.notes.push(Rationale {
            signal,
            tone,
            delta,
            text: text.into(),
        });
    }

    fn up(&mut self, signal: Signal, delta: f64, text: impl Into<String>) {
        self.push(signal, Tone::Positive, delta, text);
    }

    fn down(&mut self, signal: Signal, delta: f64, text: impl Into<String>) {
        self.push(signal, Tone::Negative, -delta, text);
    }

    fn neutral(&mut self, signal: Signal, delta: f64, text: impl Into<String>) {
        self.push(signal, Tone::Neutral, delta, text);
    }

    fn finish(mut self, outcome: &OutcomeResult) -> AnalysisResult {
        outcome_note(&mut self, outcome);
        let quality_rating = rating(self.score);
        AnalysisResult {
            quality_rating,
            notes: self.notes,
            approved: quality_rating >= APPROVAL_THRESHOLD,
        }
    }
}

fn rating(score: f64) -> u8 {
    if !score.is_finite() {
        return 1;
    }
    score.round().clamp(1.0, 10.0) as u8
}

// ============================================================
// ENTRY POINT
// ============================================================

/// Grade a candidate against its realized outcome.
///
/// `bars` must be the sequence the candidate was detected on (or a longer
/// one sharing its indices). Indices outside the slice are a caller error.
pub fn analyze_candidate<T: Indicators>(
    candidate: &PatternCandidate,
    outcome: &OutcomeResult,
    bars: &[T],
) -> Result<AnalysisResult> {
    if candidate.start_index > candidate.end_index {
        return Err(PatternError::InvalidValue("start_index after end_index"));
    }
    if candidate.end_index >= bars.len() {
        return Err(PatternError::IndexOutOfBounds {
            index: candidate.end_index,
            len: bars.len(),
        });
    }

    let card = match candidate.pattern_type {
        PatternType::PinBar => analyze_pin_bar(candidate, bars),
        PatternType::DoubleTop => analyze_double_top(candidate, bars),
        PatternType::DoubleBottom => analyze_double_bottom(candidate, bars),
        PatternType::HeadAndShoulders => analyze_head_and_shoulders(candidate, bars),
        PatternType::FalseBreakout => analyze_false_breakout(candidate, bars),
    };
    let result = card.finish(outcome);

    tracing::debug!(
        id = %candidate.id,
        pattern = %candidate.pattern_type,
        rating = result.quality_rating,
        approved = result.approved,
        "candidate graded"
    );
    Ok(result)
}

// ============================================================
// PIN BAR
// ============================================================

fn analyze_pin_bar<T: Indicators>(candidate: &PatternCandidate, bars: &[T]) -> Scorecard {
    let idx = candidate.end_index;
    let c = &bars[idx];
    let mut card = Scorecard::new();

    let range = c.range();
    if !(range > 0.0) {
        card.score = 1.0;
        card.notes.push(Rationale {
            signal: Signal::InvalidBar,
            tone: Tone::Negative,
            delta: 0.0,
            text: "Invalid candle: zero range".to_string(),
        });
        return card;
    }

    let direction = candidate.direction();
    let atr = safe_atr(c);

    let (tail, nose) = match direction {
        Direction::Bullish => (c.lower_shadow(), c.upper_shadow()),
        Direction::Bearish => (c.upper_shadow(), c.lower_shadow()),
    };
    let tail_ratio = tail / range;
    let body_ratio = c.body() / range;
    let nose_ratio = nose / range;

    if tail_ratio >= 0.75 {
        card.up(Signal::Tail, 1.0, format!("Excellent tail ({}% of range), strong price rejection", pct(tail_ratio)));
    } else if tail_ratio >= 0.66 {
        card.up(Signal::Tail, 0.5, format!("Good tail ({}% of range)", pct(tail_ratio)));
    } else {
        card.neutral(Signal::Tail, 0.0, format!("Moderate tail ({}% of range), weaker rejection", pct(tail_ratio)));
    }

    if body_ratio <= 0.1 {
        card.up(Signal::Body, 0.5, format!("Tiny body ({}%), indecision then rejection", pct(body_ratio)));
    } else if body_ratio <= 0.2 {
        card.up(Signal::Body, 0.25, format!("Small body ({}%)", pct(body_ratio)));
    }

    if nose_ratio <= 0.05 {
        card.up(Signal::Nose, 0.5, format!("Minimal nose ({}%), clean one-sided rejection", pct(nose_ratio)));
    } else if nose_ratio > 0.2 {
        card.down(Signal::Nose, 0.5, format!("Large nose ({}%) weakens the rejection", pct(nose_ratio)));
    }

    match direction {
        Direction::Bullish if c.is_bullish() => {
            card.up(Signal::CloseConfirmation, 0.25, "Bullish close confirms rejection")
        }
        Direction::Bearish if c.is_bearish() => {
            card.up(Signal::CloseConfirmation, 0.25, "Bearish close confirms rejection")
        }
        _ => {}
    }

    match protrusion_count(bars, idx, direction, 5) {
        n @ 4.. => card.up(Signal::Protrusion, 1.5, format!("Strong protrusion beyond {n} prior candles")),
        n @ 2..=3 => card.up(Signal::Protrusion, 0.75, format!("Moderate protrusion beyond {n} prior candles")),
        1 => card.neutral(Signal::Protrusion, 0.25, "Minimal protrusion beyond only 1 prior candle"),
        _ => card.down(Signal::Protrusion, 1.0, "No protrusion: wick stays inside prior candles"),
    }

    trend_alignment(&mut card, c.trend_state(), direction, "pin bar");
    support_resistance(&mut card, c, direction, atr);
    rsi_zone(&mut card, c.rsi(), direction);
    volume_surge(&mut card, c);
    bollinger_pierce(&mut card, c, direction);
    macd_turn(&mut card, bars, idx, direction);
    ma_confluence(&mut card, c, atr);

    if let Some(bar_atr) = c.positive_atr() {
        let size = range / bar_atr;
        if (1.2..=2.5).contains(&size) {
            card.up(Signal::Size, 0.5, format!("Pin bar {size:.1}x ATR, significant but not extreme"));
        } else if size < 0.5 {
            card.down(Signal::Size, 0.5, format!("Small pin bar ({size:.1}x ATR) may lack significance"));
        } else if size > 3.0 {
            card.down(Signal::Size, 0.25, format!("Very large pin bar ({size:.1}x ATR), possible volatility spike"));
        }

        if idx >= 3 {
            let first = bars[idx - 3].close();
            let last = bars[idx - 1].close();
            let prior_move = match direction {
                Direction::Bullish => first - last,
                Direction::Bearish => last - first,
            };
            let move_atr = prior_move / bar_atr;
            if move_atr >= 2.0 {
                card.up(Signal::Momentum, 0.5, "Strong impulse into the level before rejection");
            } else if move_atr >= 1.0 {
                card.up(Signal::Momentum, 0.25, "Moderate impulse into the level");
            }
        }
    }

    if let Some(adx) = c.adx() {
        let text = if adx >= TrendState::STRONG_ADX {
            format!("ADX {adx:.0}: trending market")
        } else {
            format!("ADX {adx:.0}: weak trend, range-bound conditions")
        };
        card.neutral(Signal::Adx, 0.0, text);
    }

    card
}

// ============================================================
// DOUBLE TOP / BOTTOM
// ============================================================

fn analyze_double_top<T: Indicators>(candidate: &PatternCandidate, bars: &[T]) -> Scorecard {
    analyze_double(candidate, bars, Direction::Bearish)
}

fn analyze_double_bottom<T: Indicators>(candidate: &PatternCandidate, bars: &[T]) -> Scorecard {
    analyze_double(candidate, bars, Direction::Bullish)
}

/// Shared grading for both double formations. `direction` is the trade
/// direction: bearish for tops, bullish for bottoms.
fn analyze_double<T: Indicators>(
    candidate: &PatternCandidate,
    bars: &[T],
    direction: Direction,
) -> Scorecard {
    let first = &bars[candidate.start_index];
    let second = &bars[candidate.end_index];
    let atr = safe_atr(second);
    let mut card = Scorecard::new();

    let is_top = direction.is_bearish();
    let (extreme, name) = if is_top { ("peak", "double top") } else { ("trough", "double bottom") };
    let (p1, p2) = if is_top {
        (first.high(), second.high())
    } else {
        (first.low(), second.low())
    };

    let tolerance = (p1 - p2).abs() / ((p1 + p2) / 2.0);
    let diff = tolerance * 100.0;
    if tolerance <= 0.005 {
        card.up(Signal::Symmetry, 2.0, format!("Excellent {extreme} symmetry ({diff:.2}% diff), textbook {name}"));
    } else if tolerance <= 0.015 {
        card.up(Signal::Symmetry, 1.0, format!("Good {extreme} symmetry ({diff:.2}% diff)"));
    } else {
        card.neutral(Signal::Symmetry, 0.25, format!("Moderate {extreme} symmetry ({diff:.2}% diff)"));
    }

    let neckline = candidate.key_price_levels.entry;
    let height = if is_top { p1.max(p2) - neckline } else { neckline - p1.min(p2) };
    if let Some(atr) = atr {
        height_in_atr(&mut card, height / atr, "pattern");
    }

    let spacing = candidate.end_index - candidate.start_index;
    if (15..=65).contains(&spacing) {
        card.up(Signal::Spacing, 1.0, format!("Ideal spacing ({spacing} bars between {extreme}s)"));
    } else if (10..=100).contains(&spacing) {
        card.neutral(Signal::Spacing, 0.5, format!("Acceptable spacing ({spacing} bars)"));
    } else {
        card.down(Signal::Spacing, 0.5, format!("Unusual spacing ({spacing} bars) may be unreliable"));
    }

    if let (Some(r1), Some(r2)) = (first.rsi(), second.rsi()) {
        let divergence = if is_top { r1 - r2 } else { r2 - r1 };
        let side = if is_top { "lower" } else { "higher" };
        if divergence >= 8.0 {
            card.up(Signal::Divergence, 1.5, format!("Strong RSI divergence ({divergence:.0} pts {side} at second {extreme})"));
        } else if divergence >= 3.0 {
            card.up(Signal::Divergence, 0.75, format!("Mild RSI divergence ({divergence:.0} pts)"));
        } else if divergence < -5.0 {
            card.down(Signal::Divergence, 0.5, format!("Negative divergence: momentum still strong at second {extreme}"));
        }
    }

    if let (Some(v1), Some(v2)) = (first.volume(), second.volume()) {
        if v1 > 0.0 {
            let ratio = v2 / v1;
            if ratio < 0.7 {
                card.up(Signal::Volume, 1.0, format!("Declining volume at second {extreme} ({}% of first)", pct(ratio)));
            } else if is_top && ratio < 0.85 {
                card.up(Signal::Volume, 0.5, format!("Slightly lower volume at second {extreme}"));
            } else if ratio > 1.3 {
                card.down(Signal::Volume, 0.5, format!("Increasing volume at second {extreme}"));
            }
        }
    }

    let inclined = if is_top { p2 < p1 } else { p2 > p1 };
    if inclined && tolerance >= 0.003 {
        let text = if is_top {
            "Second peak slightly lower, sellers gaining control"
        } else {
            "Second trough slightly higher, buyers gaining control"
        };
        card.up(Signal::ExtremeShift, 0.5, text);
    }

    if let Some(trend) = second.trend_state() {
        let (reversal, continuation) = if is_top {
            (trend.is_up(), trend.is_down())
        } else {
            (trend.is_down(), trend.is_up())
        };
        if reversal {
            card.up(Signal::Trend, 0.5, format!("Forms in {}: reversal at trend exhaustion", trend.label()));
        } else if continuation {
            card.down(Signal::Trend, 0.5, format!("Already in {}: may be consolidation, not reversal", trend.label()));
        }
    }

    bollinger_pierce(&mut card, second, direction);
    ma_confluence(&mut card, second, atr);

    card
}

// ============================================================
// HEAD AND SHOULDERS
// ============================================================

fn analyze_head_and_shoulders<T: Indicators>(candidate: &PatternCandidate, bars: &[T]) -> Scorecard {
    let direction = candidate.direction();
    let start = candidate.start_index;
    let end = candidate.end_index;
    let head_idx = locate_head(candidate, bars, direction);

    let left = &bars[start];
    let right = &bars[end];
    let head = &bars[head_idx];
    let atr = safe_atr(right);
    let neckline = candidate.key_price_levels.entry;
    let mut card = Scorecard::new();

    let extreme = |bar: &T| match direction {
        Direction::Bearish => bar.high(),
        Direction::Bullish => bar.low(),
    };

    let left_height = (extreme(left) - neckline).abs();
    let right_height = (extreme(right) - neckline).abs();
    let avg_height = (left_height + right_height) / 2.0;
    if avg_height > 0.0 {
        let symmetry = (left_height - right_height).abs() / avg_height;
        let diff = pct(symmetry);
        if symmetry <= 0.15 {
            let form = if direction.is_bearish() { "head and shoulders" } else { "inverse head and shoulders" };
            card.up(Signal::Symmetry, 2.0, format!("Excellent shoulder symmetry ({diff}% diff), textbook {form}"));
        } else if symmetry <= 0.3 {
            card.up(Signal::Symmetry, 1.0, format!("Good shoulder symmetry ({diff}% diff)"));
        } else {
            card.down(Signal::Symmetry, 0.5, format!("Poor shoulder symmetry ({diff}% diff)"));
        }
    }

    if let Some(atr) = atr {
        height_in_atr(&mut card, (extreme(head) - neckline).abs() / atr, "head and shoulders");
    }

    let left_span = head_idx.saturating_sub(start);
    let right_span = end.saturating_sub(head_idx);
    if left_span > 0 && right_span > 0 {
        let ratio = right_span as f64 / left_span as f64;
        if (0.7..=1.3).contains(&ratio) {
            card.up(Signal::Timing, 1.0, "Good time symmetry between shoulders");
        } else {
            card.neutral(Signal::Timing, -0.25, "Asymmetric timing between shoulders");
        }
    }

    if let (Some(left_rsi), Some(head_rsi)) = (left.rsi(), head.rsi()) {
        let (divergence, side) = match direction {
            Direction::Bearish => (left_rsi - head_rsi, "lower"),
            Direction::Bullish => (head_rsi - left_rsi, "higher"),
        };
        if divergence >= 5.0 {
            card.up(Signal::Divergence, 1.0, format!("RSI divergence at head ({divergence:.0} pts {side}), momentum exhaustion"));
        }
    }

    if let Some(trend) = right.trend_state() {
        let reversal = match direction {
            Direction::Bearish => trend.is_up(),
            Direction::Bullish => trend.is_down(),
        };
        if reversal {
            card.up(Signal::Trend, 0.5, format!("Forms as trend reversal out of {}", trend.label()));
        }
    }

    volume_surge(&mut card, right);
    ma_confluence(&mut card, right, atr);

    card
}

/// Head bar: the bar strictly between the shoulders whose extreme matches
/// the head anchor, else the midpoint of the span.
fn locate_head<T: Indicators>(candidate: &PatternCandidate, bars: &[T], direction: Direction) -> usize {
    let start = candidate.start_index;
    let end = candidate.end_index;
    let fallback = (start + end + 1) / 2;

    let Some(price) = candidate.key_price_levels.anchor(AnchorLabel::Head) else {
        return fallback;
    };
    let eps = f64::EPSILON * price.abs().max(1.0);
    (start + 1..end)
        .find(|&i| {
            let bar = &bars[i];
            let extreme = match direction {
                Direction::Bearish => bar.high(),
                Direction::Bullish => bar.low(),
            };
            (extreme - price).abs() <= eps
        })
        .unwrap_or(fallback)
}

// ============================================================
// FALSE BREAKOUT
// ============================================================

fn analyze_false_breakout<T: Indicators>(candidate: &PatternCandidate, bars: &[T]) -> Scorecard {
    let direction = candidate.direction();
    let break_bar = &bars[candidate.start_index];
    let reversal_bar = &bars[candidate.end_index];
    let atr = safe_atr(break_bar);
    let mut card = Scorecard::new();

    let speed = candidate.end_index - candidate.start_index;
    if speed <= 1 {
        card.up(Signal::ReversalSpeed, 1.5, format!("Immediate reversal ({speed} bar), strong rejection of the break"));
    } else if speed <= 2 {
        card.up(Signal::ReversalSpeed, 0.75, format!("Quick reversal ({speed} bars)"));
    } else {
        card.down(Signal::ReversalSpeed, 0.5, format!("Slow reversal ({speed} bars), weaker rejection"));
    }

    if let Some(level) = candidate.key_price_levels.anchor(AnchorLabel::BrokenLevel) {
        if let Some(atr) = atr {
            let penetration = match direction {
                Direction::Bullish => level - break_bar.low(),
                Direction::Bearish => break_bar.high() - level,
            };
            let depth = penetration / atr;
            if depth <= 0.3 {
                card.up(Signal::Penetration, 1.0, format!("Shallow false break ({depth:.1}x ATR), strong level"));
            } else if depth <= 0.7 {
                card.up(Signal::Penetration, 0.5, format!("Moderate penetration ({depth:.1}x ATR)"));
            } else if depth > 1.0 {
                card.down(Signal::Penetration, 0.5, format!("Deep penetration ({depth:.1}x ATR) may be a real breakout"));
            }
        }

        let closed_beyond = match direction {
            Direction::Bullish => break_bar.close() < level,
            Direction::Bearish => break_bar.close() > level,
        };
        if closed_beyond {
            card.down(Signal::BodyClose, 0.5, "Body closed beyond the level, break may be legitimate");
        } else {
            card.up(Signal::BodyClose, 0.5, "Body closed back inside the level");
        }
    }

    if let Some(ratio) = volume_ratio(break_bar) {
        if ratio < 0.8 {
            card.up(Signal::Volume, 1.0, format!("Low volume on break ({ratio:.1}x avg), unconvincing breakout"));
        } else if ratio > 1.5 {
            card.down(Signal::Volume, 0.5, format!("High volume on break ({ratio:.1}x avg), breakout had conviction"));
        }
    }

    if let (Some(rev), Some(brk)) = (reversal_bar.volume(), break_bar.volume()) {
        if brk > 0.0 && rev / brk >= 1.5 {
            card.up(Signal::Volume, 1.0, format!("Reversal volume {:.1}x break volume", rev / brk));
        }
    }

    if let Some(trend) = reversal_bar.trend_state() {
        match direction {
            Direction::Bullish if trend.is_up() => {
                card.up(Signal::Trend, 0.75, "False break below support in uptrend, continuation trap")
            }
            Direction::Bearish if trend.is_down() => {
                card.up(Signal::Trend, 0.75, "False break above resistance in downtrend, continuation trap")
            }
            _ => {}
        }
    }

    rsi_zone(&mut card, break_bar.rsi(), direction);
    bollinger_pierce(&mut card, break_bar, direction);
    ma_confluence(&mut card, reversal_bar, atr);

    card
}

// ============================================================
// SHARED SIGNALS
// ============================================================

/// ATR, else the bar range; `None` when neither is positive.
fn safe_atr<T: Indicators>(bar: &T) -> Option<f64> {
    bar.positive_atr().or_else(|| {
        let range = bar.range();
        (range > 0.0).then_some(range)
    })
}

fn pct(ratio: f64) -> String {
    format!("{:.0}", ratio * 100.0)
}

fn volume_ratio<T: Indicators>(bar: &T) -> Option<f64> {
    let volume = bar.volume()?;
    let average = bar.volume_sma().filter(|v| *v > 0.0)?;
    Some(volume / average)
}

fn height_in_atr(card: &mut Scorecard, height_atr: f64, what: &str) {
    if height_atr >= 3.0 {
        card.up(Signal::Height, 1.0, format!("Large {what} ({height_atr:.1}x ATR)"));
    } else if height_atr >= 2.0 {
        card.up(Signal::Height, 0.5, format!("Decent {what} height ({height_atr:.1}x ATR)"));
    } else if height_atr < 1.5 {
        card.down(Signal::Height, 0.5, format!("Small {what} ({height_atr:.1}x ATR) may lack significance"));
    }
}

fn volume_surge<T: Indicators>(card: &mut Scorecard, bar: &T) {
    let Some(ratio) = volume_ratio(bar) else {
        return;
    };
    if ratio >= 2.0 {
        card.up(Signal::Volume, 1.0, format!("Volume {ratio:.1}x average, strong conviction"));
    } else if ratio >= 1.5 {
        card.up(Signal::Volume, 0.5, format!("Volume {ratio:.1}x average, good confirmation"));
    } else if ratio < 0.5 {
        card.down(Signal::Volume, 0.5, format!("Volume {ratio:.1}x average, very low conviction"));
    }
}

fn bollinger_pierce<T: Indicators>(card: &mut Scorecard, bar: &T, direction: Direction) {
    match direction {
        Direction::Bullish => {
            if bar.bb_lower().is_some_and(|band| bar.low() <= band) {
                card.up(Signal::Bollinger, 0.5, "Wick pierces lower Bollinger Band, mean reversion likely");
            }
        }
        Direction::Bearish => {
            if bar.bb_upper().is_some_and(|band| bar.high() >= band) {
                card.up(Signal::Bollinger, 0.5, "Wick pierces upper Bollinger Band, mean reversion likely");
            }
        }
    }
}

fn macd_turn<T: Indicators>(card: &mut Scorecard, bars: &[T], idx: usize, direction: Direction) {
    if idx == 0 {
        return;
    }
    let (Some(current), Some(prev)) = (bars[idx].macd_histogram(), bars[idx - 1].macd_histogram()) else {
        return;
    };
    match direction {
        Direction::Bullish if current > prev && prev < 0.0 => {
            card.up(Signal::Macd, 0.5, "MACD histogram turning up from negative")
        }
        Direction::Bearish if current < prev && prev > 0.0 => {
            card.up(Signal::Macd, 0.5, "MACD histogram turning down from positive")
        }
        _ => {}
    }
}

fn ma_confluence<T: Indicators>(card: &mut Scorecard, bar: &T, atr: Option<f64>) {
    let Some(atr) = atr else {
        return;
    };
    let close = bar.close();
    let nearby: Vec<&str> = [("SMA20", bar.sma20()), ("SMA50", bar.sma50()), ("EMA200", bar.ema200())]
        .into_iter()
        .filter_map(|(name, ma)| ma.filter(|ma| (close - ma).abs() / atr <= 0.5).map(|_| name))
        .collect();

    match nearby.as_slice() {
        [_, _, ..] => card.up(
            Signal::MovingAverages,
            0.5,
            format!("Price near {}, moving average confluence", nearby.join(" & ")),
        ),
        ["EMA200"] => card.up(Signal::MovingAverages, 0.5, "Price near EMA200, key dynamic level"),
        _ => {}
    }
}

fn trend_alignment(card: &mut Scorecard, trend: Option<TrendState>, direction: Direction, label: &str) {
    let Some(trend) = trend else {
        return;
    };
    let side = match direction {
        Direction::Bullish => "Bullish",
        Direction::Bearish => "Bearish",
    };
    let (with_trend, weak_against, strong_against) = match direction {
        Direction::Bullish => (trend.is_up(), TrendState::WeakDowntrend, TrendState::StrongDowntrend),
        Direction::Bearish => (trend.is_down(), TrendState::WeakUptrend, TrendState::StrongUptrend),
    };

    if with_trend {
        card.up(Signal::Trend, 1.0, format!("{side} {label} in {}: trend continuation", trend.label()));
    } else if trend == weak_against {
        card.up(Signal::Trend, 0.75, format!("{side} {label} in {}: potential reversal", trend.label()));
    } else if trend == strong_against {
        card.neutral(Signal::Trend, 0.25, format!("{side} {label} in {}: counter-trend", trend.label()));
    } else {
        card.neutral(Signal::Trend, 0.25, "Ranging market, lower directional conviction");
    }
}

fn support_resistance<T: Indicators>(card: &mut Scorecard, bar: &T, direction: Direction, atr: Option<f64>) {
    let (price, level, name) = match direction {
        Direction::Bullish => (bar.low(), bar.nearest_support(), "support"),
        Direction::Bearish => (bar.high(), bar.nearest_resistance(), "resistance"),
    };

    let Some(level) = level else {
        card.down(Signal::SupportResistance, 1.0, format!("No {name} level nearby"));
        return;
    };
    let Some(atr) = atr else {
        return;
    };

    let distance = (price - level).abs() / atr;
    if distance <= 0.3 {
        card.up(Signal::SupportResistance, 2.0, format!("Wick touches {name} ({distance:.1} ATR away)"));
    } else if distance <= 0.7 {
        card.up(Signal::SupportResistance, 1.0, format!("Near {name} ({distance:.1} ATR away)"));
    } else if distance <= 1.5 {
        card.neutral(Signal::SupportResistance, 0.25, format!("Somewhat near {name} ({distance:.1} ATR)"));
    } else {
        card.down(Signal::SupportResistance, 0.5, format!("Far from {name} ({distance:.1} ATR)"));
    }
}

fn rsi_zone(card: &mut Scorecard, rsi: Option<f64>, direction: Direction) {
    let Some(rsi) = rsi else {
        return;
    };
    match direction {
        Direction::Bullish => {
            if rsi <= 30.0 {
                card.up(Signal::Rsi, 1.0, format!("RSI oversold ({rsi:.1}) confirms bullish exhaustion"));
            } else if rsi <= 40.0 {
                card.up(Signal::Rsi, 0.5, format!("RSI in lower zone ({rsi:.1})"));
            } else if rsi >= 70.0 {
                card.down(Signal::Rsi, 0.5, format!("RSI overbought ({rsi:.1}) contradicts bullish bias"));
            }
        }
        Direction::Bearish => {
            if rsi >= 70.0 {
                card.up(Signal::Rsi, 1.0, format!("RSI overbought ({rsi:.1}) confirms bearish exhaustion"));
            } else if rsi >= 60.0 {
                card.up(Signal::Rsi, 0.5, format!("RSI in upper zone ({rsi:.1})"));
            } else if rsi <= 30.0 {
                card.down(Signal::Rsi, 0.5, format!("RSI oversold ({rsi:.1}) contradicts bearish bias"));
            }
        }
    }
}

fn outcome_note(card: &mut Scorecard, outcome: &OutcomeResult) {
    let r = outcome
        .r_multiple
        .map_or_else(|| "?".to_string(), |r| format!("{r:.1}"));
    let bars = outcome
        .bars_to_outcome
        .map_or_else(|| "?".to_string(), |b| b.to_string());
    let text = match outcome.outcome {
        Outcome::Win => format!("Outcome: Won {r}R in {bars} bars"),
        Outcome::Loss => format!("Outcome: Lost {r}R in {bars} bars"),
        Outcome::Breakeven => "Outcome: Breakeven".to_string(),
        Outcome::Pending => "Outcome: Pending, trade has not resolved".to_string(),
    };
    card.neutral(Signal::Outcome, 0.0, text);
}
