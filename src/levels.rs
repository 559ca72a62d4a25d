//! Swing points and support/resistance levels
//!
//! Swing detection uses strict inequality against `window` bars on each
//! side, so a plateau of equal highs yields no swing. Levels are built by
//! greedily clustering swing prices that lie within an absolute price
//! tolerance of the running cluster mean.

use serde::{Deserialize, Serialize};

use crate::OHLCV;

// ============================================================
// SWING POINTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

/// A local extreme of the bar series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
}

/// Indices whose high is strictly above the highs of `window` bars on each side.
pub fn swing_high_indices<T: OHLCV>(bars: &[T], window: usize) -> Vec<usize> {
    swing_indices(bars, window, SwingKind::High)
}

/// Indices whose low is strictly below the lows of `window` bars on each side.
pub fn swing_low_indices<T: OHLCV>(bars: &[T], window: usize) -> Vec<usize> {
    swing_indices(bars, window, SwingKind::Low)
}

pub(crate) fn swing_indices<T: OHLCV>(bars: &[T], window: usize, kind: SwingKind) -> Vec<usize> {
    let len = bars.len();
    if len < 2 * window + 1 {
        return Vec::new();
    }

    let price = |i: usize| match kind {
        SwingKind::High => bars[i].high(),
        SwingKind::Low => bars[i].low(),
    };
    let beats = |candidate: f64, other: f64| match kind {
        SwingKind::High => candidate > other,
        SwingKind::Low => candidate < other,
    };

    (window..len - window)
        .filter(|&i| {
            let p = price(i);
            (i - window..=i + window)
                .filter(|&j| j != i)
                .all(|j| beats(p, price(j)))
        })
        .collect()
}

pub fn detect_swing_highs<T: OHLCV>(bars: &[T], window: usize) -> Vec<SwingPoint> {
    swing_high_indices(bars, window)
        .into_iter()
        .map(|index| SwingPoint {
            index,
            price: bars[index].high(),
            kind: SwingKind::High,
        })
        .collect()
}

pub fn detect_swing_lows<T: OHLCV>(bars: &[T], window: usize) -> Vec<SwingPoint> {
    swing_low_indices(bars, window)
        .into_iter()
        .map(|index| SwingPoint {
            index,
            price: bars[index].low(),
            kind: SwingKind::Low,
        })
        .collect()
}

// ============================================================
// CLUSTERING
// ============================================================

/// Running-mean cluster of prices, ascending
struct Cluster {
    sum: f64,
    count: usize,
    last_index: usize,
}

impl Cluster {
    fn start(price: f64, index: usize) -> Self {
        Self {
            sum: price,
            count: 1,
            last_index: index,
        }
    }

    #[inline]
    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn accepts(&self, price: f64, tolerance: f64) -> bool {
        (price - self.mean()).abs() <= tolerance
    }

    fn push(&mut self, price: f64, index: usize) {
        self.sum += price;
        self.count += 1;
        self.last_index = self.last_index.max(index);
    }
}

/// Greedy clustering over `(price, bar index)` pairs sorted by price.
fn cluster_points(mut points: Vec<(f64, usize)>, tolerance: f64) -> Vec<Cluster> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut clusters: Vec<Cluster> = Vec::new();
    for (price, index) in points {
        match clusters.last_mut() {
            Some(cluster) if cluster.accepts(price, tolerance) => cluster.push(price, index),
            _ => clusters.push(Cluster::start(price, index)),
        }
    }
    clusters
}

/// Sort prices ascending and merge each into the current cluster when it
/// lies within `tolerance` (in price units) of the cluster mean.
///
/// Returns the cluster means in ascending order.
pub fn cluster_levels(levels: &[f64], tolerance: f64) -> Vec<f64> {
    if levels.is_empty() {
        return Vec::new();
    }
    let points = levels.iter().map(|&p| (p, 0)).collect();
    cluster_points(points, tolerance)
        .iter()
        .map(Cluster::mean)
        .collect()
}

// ============================================================
// SUPPORT / RESISTANCE
// ============================================================

/// Support/resistance detection configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Trailing bars considered
    pub lookback: usize,
    /// Swing window on each side
    pub window: usize,
    /// Clustering tolerance in price units
    pub tolerance: f64,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            lookback: 100,
            window: 5,
            tolerance: 0.002,
        }
    }
}

fn swing_points_in_lookback<T: OHLCV>(bars: &[T], config: &LevelConfig) -> (usize, Vec<(f64, usize)>) {
    let start = bars.len().saturating_sub(config.lookback);
    let recent = &bars[start..];

    let points = detect_swing_highs(recent, config.window)
        .into_iter()
        .chain(detect_swing_lows(recent, config.window))
        .map(|s| (s.price, s.index))
        .collect();
    (recent.len(), points)
}

/// Clustered swing prices over the last `lookback` bars, ascending.
pub fn detect_support_resistance_levels<T: OHLCV>(bars: &[T], config: &LevelConfig) -> Vec<f64> {
    let (_, points) = swing_points_in_lookback(bars, config);
    if points.is_empty() {
        return Vec::new();
    }
    cluster_points(points, config.tolerance)
        .iter()
        .map(Cluster::mean)
        .collect()
}

/// A clustered level with touch and recency statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredLevel {
    pub price: f64,
    /// Swing points merged into the level
    pub touch_count: usize,
    /// Most recent touching swing index over the lookback length, 0..1
    pub recency_score: f64,
    /// Blend of touches (capped at 5) and recency, 0..=1
    pub quality_score: f64,
}

/// Like [`detect_support_resistance_levels`] with per-level touch counts.
pub fn score_support_resistance_levels<T: OHLCV>(bars: &[T], config: &LevelConfig) -> Vec<ScoredLevel> {
    let (span, points) = swing_points_in_lookback(bars, config);
    if points.is_empty() || span == 0 {
        return Vec::new();
    }

    cluster_points(points, config.tolerance)
        .iter()
        .map(|c| {
            let recency_score = c.last_index as f64 / span as f64;
            let touch_score = c.count.min(5) as f64 / 5.0;
            ScoredLevel {
                price: c.mean(),
                touch_count: c.count,
                recency_score,
                quality_score: touch_score * 0.6 + recency_score * 0.4,
            }
        })
        .collect()
}

/// Closest level strictly below price and closest level at or above it
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestLevels {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

/// A level equal to `price` counts as resistance.
pub fn find_nearest_levels(price: f64, levels: &[f64]) -> NearestLevels {
    let mut nearest = NearestLevels::default();
    for &level in levels {
        if level < price {
            if nearest.support.map_or(true, |s| level > s) {
                nearest.support = Some(level);
            }
        } else if nearest.resistance.map_or(true, |r| level < r) {
            nearest.resistance = Some(level);
        }
    }
    nearest
}

// ============================================================
// PIP AND DISTANCE HELPERS
// ============================================================

/// Price increment of one pip: 0.01 for yen crosses, 0.0001 otherwise.
pub fn pip_size(pair: &str) -> f64 {
    if pair.to_ascii_uppercase().contains("JPY") {
        0.01
    } else {
        0.0001
    }
}

pub fn distance_in_pips(pair: &str, a: f64, b: f64) -> f64 {
    (a - b).abs() / pip_size(pair)
}

/// Distance in ATR units, `None` when ATR is missing or not positive.
pub fn distance_in_atr(a: f64, b: f64, atr: Option<f64>) -> Option<f64> {
    atr.filter(|v| *v > 0.0).map(|v| (a - b).abs() / v)
}

/// Nearest of the whole-cent and half-cent round numbers around `price`.
pub fn nearest_round_number(price: f64) -> f64 {
    let candidates = [
        (price * 100.0).round() / 100.0,
        (price * 200.0).ceil() / 200.0,
        (price * 200.0).floor() / 200.0,
    ];
    let mut best = candidates[0];
    for &c in &candidates[1..] {
        if (c - price).abs() < (best - price).abs() {
            best = c;
        }
    }
    best
}
