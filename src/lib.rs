//! # fxgrade - chart-pattern detection and setup grading
//!
//! Pattern-recognition core for currency-pair price bars: swing and
//! support/resistance detection, five geometric formation detectors with
//! their entry/stop/target calculators, candidate aggregation, a forward
//! bar-walk outcome simulator and a multi-factor quality analyzer.
//!
//! ## Quick Start
//!
//! ```rust
//! use fxgrade::prelude::*;
//!
//! let bars: Vec<Candle> = vec![];
//!
//! let engine = EngineBuilder::new()
//!     .with_all_defaults()
//!     .build()
//!     .unwrap();
//!
//! let mut ids = SequentialIds::new();
//! let candidates = engine.scan(&bars, "EUR_USD", &mut ids).unwrap();
//!
//! for candidate in &candidates {
//!     let outcome = simulate_candidate(&bars, candidate, &OutcomeConfig::default());
//!     let analysis = analyze_candidate(candidate, &outcome, &bars).unwrap();
//!     println!("{} -> {}", candidate.pattern_type, analysis.quality_rating);
//! }
//! ```

use serde::{Deserialize, Serialize};

pub mod analyzer;
pub mod batch;
pub mod candidates;
pub mod detectors;
pub mod levels;
pub mod outcome;
pub mod params;

pub mod prelude {
    pub use crate::{
        // Analyzer
        analyzer::{analyze_candidate, AnalysisResult, Rationale, Signal, Tone, APPROVAL_THRESHOLD},
        // Batch driving
        batch::{label_candidates, scan_chunked, ChunkConfig, LabelSummary, LabeledCandidate},
        // Candidates
        candidates::{
            cap_candidates, deduplicate_overlapping, CandidateId, ContextSnapshot, IdGenerator,
            PatternCandidate, SequentialIds, UuidIds,
        },
        // Detectors
        detectors::*,
        // Levels
        levels::{
            cluster_levels, detect_support_resistance_levels, detect_swing_highs,
            detect_swing_lows, find_nearest_levels, score_support_resistance_levels, LevelConfig,
            NearestLevels, ScoredLevel, SwingKind, SwingPoint,
        },
        // Outcome
        outcome::{calculate_outcome, simulate_candidate, Outcome, OutcomeConfig, OutcomeInput, OutcomeResult},
        // Parameters
        params::{get_period, get_ratio, get_value, ParamMeta, ParamType, ParameterizedDetector},
        // Parallel
        scan_parallel,
        AnchorLabel,
        AnchorPrice,
        BuiltinDetector,
        Candle,
        Direction,
        EngineBuilder,
        EngineConfig,
        Indicators,
        KeyPriceLevels,
        OHLCVExt,
        PatternDetector,
        PatternEngine,
        PatternError,
        PatternType,
        Period,
        Ratio,
        Result,
        ScanError,
        ScanResult,
        Setup,
        TrendState,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised by configuration checks and caller contract checks.
///
/// Short histories and degenerate geometry never produce an error; they
/// yield empty detections or a `pending` outcome instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Bar index {index} out of bounds for {len} bars")]
    IndexOutOfBounds { index: usize, len: usize },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Bar count (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core price-bar trait.
///
/// Volume and ATR are optional: they are absent until enough lookback
/// history exists.
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;

    fn volume(&self) -> Option<f64> {
        None
    }

    fn atr(&self) -> Option<f64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_shadow(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_shadow(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn midpoint(&self) -> f64 {
        (self.high() + self.low()) / 2.0
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Body as ratio of range. Returns None if range is not positive
    #[inline]
    fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > 0.0).then(|| self.body() / range)
    }

    /// ATR when present and strictly positive
    #[inline]
    fn positive_atr(&self) -> Option<f64> {
        self.atr().filter(|atr| *atr > 0.0)
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if prices.iter().any(|p| *p < 0.0) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "negative price",
            });
        }
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV + ?Sized> OHLCVExt for T {}

/// Precomputed indicator and context fields for a bar.
///
/// Every getter defaults to `None`, meaning "insufficient history". Scorers
/// skip a signal whose inputs are missing rather than reading them as zero.
pub trait Indicators: OHLCV {
    fn volume_sma(&self) -> Option<f64> {
        None
    }
    fn rsi(&self) -> Option<f64> {
        None
    }
    fn adx(&self) -> Option<f64> {
        None
    }
    fn sma20(&self) -> Option<f64> {
        None
    }
    fn sma50(&self) -> Option<f64> {
        None
    }
    fn ema200(&self) -> Option<f64> {
        None
    }
    fn macd(&self) -> Option<f64> {
        None
    }
    fn macd_signal(&self) -> Option<f64> {
        None
    }
    fn macd_histogram(&self) -> Option<f64> {
        None
    }
    fn bb_upper(&self) -> Option<f64> {
        None
    }
    fn bb_middle(&self) -> Option<f64> {
        None
    }
    fn bb_lower(&self) -> Option<f64> {
        None
    }
    fn trend_state(&self) -> Option<TrendState> {
        None
    }
    fn nearest_support(&self) -> Option<f64> {
        None
    }
    fn nearest_resistance(&self) -> Option<f64> {
        None
    }
}

/// Owned enriched bar row as supplied by the indicator pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub atr: Option<f64>,
    pub volume_sma: Option<f64>,
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub ema200: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub trend_state: Option<TrendState>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
}

impl Candle {
    pub fn new(open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            ..Self::default()
        }
    }

    pub fn with_atr(mut self, atr: f64) -> Self {
        self.atr = Some(atr);
        self
    }

    pub fn with_volume(mut self, volume: f64, volume_sma: Option<f64>) -> Self {
        self.volume = Some(volume);
        self.volume_sma = volume_sma;
        self
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }
    fn high(&self) -> f64 {
        self.high
    }
    fn low(&self) -> f64 {
        self.low
    }
    fn close(&self) -> f64 {
        self.close
    }
    fn volume(&self) -> Option<f64> {
        self.volume
    }
    fn atr(&self) -> Option<f64> {
        self.atr
    }
}

impl Indicators for Candle {
    fn volume_sma(&self) -> Option<f64> {
        self.volume_sma
    }
    fn rsi(&self) -> Option<f64> {
        self.rsi
    }
    fn adx(&self) -> Option<f64> {
        self.adx
    }
    fn sma20(&self) -> Option<f64> {
        self.sma20
    }
    fn sma50(&self) -> Option<f64> {
        self.sma50
    }
    fn ema200(&self) -> Option<f64> {
        self.ema200
    }
    fn macd(&self) -> Option<f64> {
        self.macd
    }
    fn macd_signal(&self) -> Option<f64> {
        self.macd_signal
    }
    fn macd_histogram(&self) -> Option<f64> {
        self.macd_histogram
    }
    fn bb_upper(&self) -> Option<f64> {
        self.bb_upper
    }
    fn bb_middle(&self) -> Option<f64> {
        self.bb_middle
    }
    fn bb_lower(&self) -> Option<f64> {
        self.bb_lower
    }
    fn trend_state(&self) -> Option<TrendState> {
        self.trend_state
    }
    fn nearest_support(&self) -> Option<f64> {
        self.nearest_support
    }
    fn nearest_resistance(&self) -> Option<f64> {
        self.nearest_resistance
    }
}

// ============================================================
// PATTERN TYPES AND PRICE LEVELS
// ============================================================

/// The five chart formations the engine recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    PinBar,
    DoubleTop,
    DoubleBottom,
    HeadAndShoulders,
    FalseBreakout,
}

impl PatternType {
    pub const ALL: [PatternType; 5] = [
        PatternType::PinBar,
        PatternType::DoubleTop,
        PatternType::DoubleBottom,
        PatternType::HeadAndShoulders,
        PatternType::FalseBreakout,
    ];

    /// Wire name, e.g. `"head_and_shoulders"`
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::PinBar => "pin_bar",
            PatternType::DoubleTop => "double_top",
            PatternType::DoubleBottom => "double_bottom",
            PatternType::HeadAndShoulders => "head_and_shoulders",
            PatternType::FalseBreakout => "false_breakout",
        }
    }

    /// Typical bias, `None` when the formation trades both ways.
    pub fn typical_direction(self) -> Option<Direction> {
        match self {
            PatternType::DoubleTop => Some(Direction::Bearish),
            PatternType::DoubleBottom => Some(Direction::Bullish),
            PatternType::PinBar | PatternType::HeadAndShoulders | PatternType::FalseBreakout => {
                None
            }
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction of a setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    /// Bullish iff the target sits above the entry.
    #[inline]
    pub fn infer(entry: f64, take_profit: f64) -> Self {
        if take_profit > entry {
            Direction::Bullish
        } else {
            Direction::Bearish
        }
    }

    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }
}

/// Market trend classification supplied by the context pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendState {
    StrongUptrend,
    WeakUptrend,
    Ranging,
    WeakDowntrend,
    StrongDowntrend,
}

impl TrendState {
    /// ADX above this marks a strong trend
    pub const STRONG_ADX: f64 = 25.0;

    /// Classify from moving averages and ADX. Any missing input yields `None`.
    pub fn classify(
        sma20: Option<f64>,
        sma50: Option<f64>,
        ema200: Option<f64>,
        adx: Option<f64>,
        close: f64,
    ) -> Option<Self> {
        let (sma20, sma50, ema200, adx) = (sma20?, sma50?, ema200?, adx?);

        let above_ema200 = close > ema200;
        let strong = adx > Self::STRONG_ADX;
        let sma_aligned = sma20 > sma50;

        Some(match (strong, above_ema200) {
            (true, true) if sma_aligned => TrendState::StrongUptrend,
            (false, true) => TrendState::WeakUptrend,
            (true, false) if !sma_aligned => TrendState::StrongDowntrend,
            (false, false) => TrendState::WeakDowntrend,
            _ => TrendState::Ranging,
        })
    }

    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, TrendState::StrongUptrend | TrendState::WeakUptrend)
    }

    #[inline]
    pub fn is_down(self) -> bool {
        matches!(self, TrendState::StrongDowntrend | TrendState::WeakDowntrend)
    }

    /// Human-readable label, e.g. "weak uptrend"
    pub fn label(self) -> &'static str {
        match self {
            TrendState::StrongUptrend => "strong uptrend",
            TrendState::WeakUptrend => "weak uptrend",
            TrendState::Ranging => "ranging",
            TrendState::WeakDowntrend => "weak downtrend",
            TrendState::StrongDowntrend => "strong downtrend",
        }
    }
}

/// Structural point recorded alongside a setup's trade levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorLabel {
    WickTip,
    BodyTop,
    BodyBottom,
    Top,
    Bottom,
    Head,
    Neckline,
    BrokenLevel,
    FalseBreakExtreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPrice {
    pub label: AnchorLabel,
    pub price: f64,
}

/// Entry, stop and target for a setup plus its anchor points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPriceLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub anchor_prices: Vec<AnchorPrice>,
}

impl KeyPriceLevels {
    #[inline]
    pub fn direction(&self) -> Direction {
        Direction::infer(self.entry, self.take_profit)
    }

    /// Absolute entry-to-stop distance
    #[inline]
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Absolute entry-to-target distance
    #[inline]
    pub fn reward(&self) -> f64 {
        (self.take_profit - self.entry).abs()
    }

    /// Reward over risk, `None` for a zero-risk setup
    pub fn risk_reward(&self) -> Option<f64> {
        let risk = self.risk();
        (risk > 0.0).then(|| self.reward() / risk)
    }

    pub fn anchor(&self, label: AnchorLabel) -> Option<f64> {
        self.anchor_prices
            .iter()
            .find(|a| a.label == label)
            .map(|a| a.price)
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// A scored, priced formation found by a detector pipeline
/// (geometry search, level calculator and detection-time scorer).
#[derive(Debug, Clone, PartialEq)]
pub struct Setup {
    pub pattern_type: PatternType,
    pub direction: Direction,
    pub start_index: usize,
    pub end_index: usize,
    /// Bar whose indicator row describes the setup's context
    pub context_index: usize,
    pub levels: KeyPriceLevels,
    /// Detection-time quality score 1..=10
    pub score: f64,
}

impl Setup {
    /// Detection score scaled to 0.0..=1.0
    #[inline]
    pub fn confidence(&self) -> f64 {
        (self.score / 10.0).clamp(0.0, 1.0)
    }
}

/// Formation detector pipeline over an immutable bar slice
pub trait PatternDetector: Send + Sync {
    fn pattern_type(&self) -> PatternType;
    fn min_bars(&self) -> usize;
    fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch, exhaustive over [`PatternType`]
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, bars)),*
                }
            }

            #[inline]
            pub fn pattern_type(&self) -> PatternType {
                match self {
                    $(Self::$variant(d) => PatternDetector::pattern_type(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    PinBar(PinBarDetector),
    DoubleTop(DoubleTopDetector),
    DoubleBottom(DoubleBottomDetector),
    HeadAndShoulders(HeadAndShouldersDetector),
    FalseBreakout(FalseBreakoutDetector),
}

impl BuiltinDetector {
    /// Default-configured detector for a pattern type
    pub fn with_defaults(pattern_type: PatternType) -> Self {
        match pattern_type {
            PatternType::PinBar => Self::PinBar(Default::default()),
            PatternType::DoubleTop => Self::DoubleTop(Default::default()),
            PatternType::DoubleBottom => Self::DoubleBottom(Default::default()),
            PatternType::HeadAndShoulders => Self::HeadAndShoulders(Default::default()),
            PatternType::FalseBreakout => Self::FalseBreakout(Default::default()),
        }
    }
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cap on candidates returned by one scan
    pub max_candidates: usize,
    /// Drop setups whose confidence is below this
    pub min_confidence: Option<f64>,
    pub validate_data: bool,
    pub pattern_filter: Option<Vec<PatternType>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_candidates: 120,
            min_confidence: None,
            validate_data: false,
            pattern_filter: None,
        }
    }
}

/// Candidate aggregator: runs every detector pipeline over the bars and
/// merges the results into deduplicated, capped [`PatternCandidate`]s.
///
/// [`PatternCandidate`]: candidates::PatternCandidate
#[derive(Debug, Clone)]
pub struct PatternEngine {
    builtin: Vec<BuiltinDetector>,
    config: EngineConfig,
}

impl PatternEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detectors(&self) -> &[BuiltinDetector] {
        &self.builtin
    }

    /// Run all detector pipelines and return their setups in detector order.
    pub fn detect_setups<T: Indicators>(&self, bars: &[T]) -> Vec<Setup> {
        let mut setups = Vec::new();
        for detector in &self.builtin {
            if bars.len() < detector.min_bars() {
                continue;
            }
            let found = detector.detect(bars);
            tracing::trace!(
                pattern = %detector.pattern_type(),
                count = found.len(),
                "detector pass"
            );
            setups.extend(found.into_iter().filter(|s| self.should_include(s)));
        }
        setups
    }

    /// Scan all bars and return candidates sorted by start index.
    pub fn scan<T: Indicators, G: candidates::IdGenerator + ?Sized>(
        &self,
        bars: &[T],
        pair: &str,
        ids: &mut G,
    ) -> Result<Vec<candidates::PatternCandidate>> {
        self.scan_capped(bars, pair, ids, self.config.max_candidates)
    }

    /// Like [`scan`](Self::scan) with an explicit candidate cap.
    pub fn scan_capped<T: Indicators, G: candidates::IdGenerator + ?Sized>(
        &self,
        bars: &[T],
        pair: &str,
        ids: &mut G,
        max_candidates: usize,
    ) -> Result<Vec<candidates::PatternCandidate>> {
        if self.config.validate_data {
            validate_bars(bars)?;
        }
        if bars.is_empty() {
            return Ok(Vec::new());
        }

        let setups = self.detect_setups(bars);
        let raw = setups.len();

        let mut found: Vec<_> = setups
            .into_iter()
            .map(|setup| {
                let snapshot = candidates::ContextSnapshot::capture(&bars[setup.context_index]);
                candidates::PatternCandidate::from_setup(setup, pair, ids.next_id(), snapshot)
            })
            .collect();
        found.sort_by_key(|c| c.start_index);

        let deduped = candidates::deduplicate_overlapping(&found);
        let deduped_len = deduped.len();
        let capped = candidates::cap_candidates(deduped, max_candidates);

        tracing::debug!(
            pair,
            bars = bars.len(),
            raw,
            deduped = deduped_len,
            kept = capped.len(),
            "scan complete"
        );
        Ok(capped)
    }

    fn should_include(&self, setup: &Setup) -> bool {
        if let Some(min) = self.config.min_confidence {
            if setup.confidence() < min {
                return false;
            }
        }
        if let Some(ref filter) = self.config.pattern_filter {
            if !filter.contains(&setup.pattern_type) {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<()> {
        if self.config.max_candidates == 0 {
            return Err(PatternError::InvalidConfig(
                "max_candidates must be > 0".to_string(),
            ));
        }
        for d in &self.builtin {
            d.validate_config()?;
        }
        Ok(())
    }
}

fn validate_bars<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            PatternError::InvalidOHLCV { reason, .. } => {
                PatternError::InvalidOHLCV { index: i, reason }
            }
            other => other,
        })?;
    }
    Ok(())
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    builtin: Vec<BuiltinDetector>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add all five detectors with default configurations
    pub fn with_all_defaults(mut self) -> Self {
        self.builtin
            .extend(PatternType::ALL.iter().map(|t| BuiltinDetector::with_defaults(*t)));
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Replace the whole engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_candidates(mut self, max: usize) -> Self {
        self.config.max_candidates = max;
        self
    }

    /// Set minimum confidence filter
    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.config.min_confidence = Some(confidence);
        self
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Filter to specific patterns only
    pub fn only_patterns(mut self, types: impl IntoIterator<Item = PatternType>) -> Self {
        self.config.pattern_filter = Some(types.into_iter().collect());
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        let engine = PatternEngine {
            builtin: self.builtin,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// Result of scanning a single pair
#[derive(Debug)]
pub struct ScanResult {
    pub pair: String,
    pub candidates: Vec<candidates::PatternCandidate>,
}

/// Error from scanning a single pair
#[derive(Debug)]
pub struct ScanError {
    pub pair: String,
    pub error: PatternError,
}

/// Scan many pairs in parallel.
///
/// Each pair gets its own [`SequentialIds`](candidates::SequentialIds)
/// prefixed with the pair name, so ids are unique across the batch and the
/// output does not depend on scheduling.
pub fn scan_parallel<'a, T, I>(
    engine: &PatternEngine,
    instruments: I,
) -> (Vec<ScanResult>, Vec<ScanError>)
where
    T: Indicators + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(pair, bars)| {
            let mut ids = candidates::SequentialIds::with_prefix(pair);
            engine
                .scan(bars, pair, &mut ids)
                .map(|candidates| ScanResult {
                    pair: pair.to_string(),
                    candidates,
                })
                .map_err(|error| ScanError {
                    pair: pair.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::SequentialIds;

    fn flat_bars(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle::new(1.1000, 1.1010, 1.0990, 1.1005))
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ohlcv_ext() {
        let bar = Candle::new(100.0, 110.0, 90.0, 105.0);
        assert_eq!(bar.body(), 5.0);
        assert_eq!(bar.range(), 20.0);
        assert_eq!(bar.midpoint(), 100.0);
        assert!(bar.is_bullish());
        assert!(!bar.is_bearish());
        assert!((bar.body_ratio().unwrap() - 0.25).abs() < 0.001);
        assert!(Candle::new(1.0, 1.0, 1.0, 1.0).body_ratio().is_none());
    }

    #[test]
    fn test_positive_atr_filters_zero() {
        assert_eq!(Candle::new(1.0, 1.1, 0.9, 1.0).with_atr(0.0).positive_atr(), None);
        assert_eq!(Candle::new(1.0, 1.1, 0.9, 1.0).with_atr(0.02).positive_atr(), Some(0.02));
    }

    #[test]
    fn test_direction_inference() {
        assert_eq!(Direction::infer(1.10, 1.14), Direction::Bullish);
        assert_eq!(Direction::infer(1.10, 1.06), Direction::Bearish);
        assert_eq!(Direction::infer(1.10, 1.10), Direction::Bearish);
    }

    #[test]
    fn test_trend_classification() {
        let strong_up = TrendState::classify(Some(1.2), Some(1.1), Some(1.0), Some(30.0), 1.3);
        assert_eq!(strong_up, Some(TrendState::StrongUptrend));

        let weak_up = TrendState::classify(Some(1.1), Some(1.2), Some(1.0), Some(20.0), 1.3);
        assert_eq!(weak_up, Some(TrendState::WeakUptrend));

        let strong_down = TrendState::classify(Some(1.0), Some(1.1), Some(1.3), Some(30.0), 1.2);
        assert_eq!(strong_down, Some(TrendState::StrongDowntrend));

        let weak_down = TrendState::classify(Some(1.2), Some(1.1), Some(1.3), Some(10.0), 1.2);
        assert_eq!(weak_down, Some(TrendState::WeakDowntrend));

        // strong ADX above EMA200 but SMAs crossed down
        let ranging = TrendState::classify(Some(1.0), Some(1.1), Some(0.9), Some(30.0), 1.2);
        assert_eq!(ranging, Some(TrendState::Ranging));

        assert_eq!(TrendState::classify(None, Some(1.1), Some(1.0), Some(30.0), 1.3), None);
    }

    #[test]
    fn test_trend_serde_names() {
        let json = serde_json::to_string(&TrendState::StrongDowntrend).unwrap();
        assert_eq!(json, "\"strong_downtrend\"");
        let json = serde_json::to_string(&PatternType::HeadAndShoulders).unwrap();
        assert_eq!(json, "\"head_and_shoulders\"");
    }

    #[test]
    fn test_key_levels_helpers() {
        let levels = KeyPriceLevels {
            entry: 1.10,
            stop_loss: 1.08,
            take_profit: 1.14,
            anchor_prices: vec![AnchorPrice {
                label: AnchorLabel::Neckline,
                price: 1.10,
            }],
        };
        assert_eq!(levels.direction(), Direction::Bullish);
        assert!((levels.risk_reward().unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(levels.anchor(AnchorLabel::Neckline), Some(1.10));
        assert_eq!(levels.anchor(AnchorLabel::Head), None);
    }

    #[test]
    fn test_engine_builder() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        assert_eq!(engine.detectors().len(), 5);
        assert_eq!(engine.config().max_candidates, 120);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let engine = EngineBuilder::new().with_all_defaults().max_candidates(0).build();
        assert!(matches!(engine, Err(PatternError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars: Vec<Candle> = vec![];
        let mut ids = SequentialIds::new();
        assert!(engine.scan(&bars, "EUR_USD", &mut ids).unwrap().is_empty());
    }

    #[test]
    fn test_short_history_is_empty_not_error() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars = flat_bars(2);
        let mut ids = SequentialIds::new();
        assert!(engine.scan(&bars, "EUR_USD", &mut ids).unwrap().is_empty());
    }

    #[test]
    fn test_validate_data_reports_index() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .validate_data(true)
            .build()
            .unwrap();
        let mut bars = flat_bars(5);
        bars[3] = Candle::new(1.1, 1.0, 1.2, 1.1);
        let mut ids = SequentialIds::new();
        let err = engine.scan(&bars, "EUR_USD", &mut ids).unwrap_err();
        assert!(matches!(err, PatternError::InvalidOHLCV { index: 3, .. }));
    }

    #[test]
    fn test_parallel_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

        let bars1 = flat_bars(30);
        let bars2 = flat_bars(40);

        let instruments: Vec<(&str, &[Candle])> = vec![("EUR_USD", &bars1[..]), ("USD_JPY", &bars2[..])];

        let (results, errors) = scan_parallel(&engine, instruments);
        assert_eq!(results.len(), 2);
        assert!(errors.is_empty());
    }
}
