//! Pattern candidates and their aggregation
//!
//! A candidate is a detector setup stamped with an id, the currency pair
//! and a snapshot of the market context at its end bar. Overlapping
//! candidates are resolved by a single greedy sweep in start-index order.

use serde::{Deserialize, Serialize};

use crate::{Direction, Indicators, KeyPriceLevels, PatternType, Setup, TrendState};

// ============================================================
// IDS
// ============================================================

/// Opaque unique candidate identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh candidate ids, injected by the caller.
pub trait IdGenerator {
    fn next_id(&mut self) -> CandidateId;
}

/// Deterministic `"{prefix}-{n}"` ids starting at 1
#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::with_prefix("candidate")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> CandidateId {
        let id = CandidateId(format!("{}-{}", self.prefix, self.next));
        self.next += 1;
        id
    }
}

/// Random v4 UUID ids
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&mut self) -> CandidateId {
        CandidateId(uuid::Uuid::new_v4().to_string())
    }
}

// ============================================================
// CANDIDATE
// ============================================================

/// Market context captured from the candidate's end bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub trend_state: Option<TrendState>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
}

impl ContextSnapshot {
    pub fn capture<T: Indicators>(bar: &T) -> Self {
        Self {
            trend_state: bar.trend_state(),
            nearest_support: bar.nearest_support(),
            nearest_resistance: bar.nearest_resistance(),
            atr: bar.atr(),
            rsi: bar.rsi(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub id: CandidateId,
    pub pair: String,
    pub pattern_type: PatternType,
    pub start_index: usize,
    pub end_index: usize,
    pub key_price_levels: KeyPriceLevels,
    /// Detection score / 10
    pub confidence: f64,
    pub context_snapshot: ContextSnapshot,
}

impl PatternCandidate {
    pub fn from_setup(setup: Setup, pair: &str, id: CandidateId, context: ContextSnapshot) -> Self {
        Self {
            id,
            pair: pair.to_string(),
            pattern_type: setup.pattern_type,
            start_index: setup.start_index,
            end_index: setup.end_index,
            confidence: setup.confidence(),
            key_price_levels: setup.levels,
            context_snapshot: context,
        }
    }

    /// Bullish iff the target sits above the entry.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.key_price_levels.direction()
    }

    #[inline]
    pub fn risk_reward(&self) -> Option<f64> {
        self.key_price_levels.risk_reward()
    }

    /// Inclusive index ranges intersect
    #[inline]
    pub fn overlaps(&self, other: &PatternCandidate) -> bool {
        self.start_index <= other.end_index && other.start_index <= self.end_index
    }

    /// Shift bar indices into a larger series' coordinates.
    pub fn offset(mut self, by: usize) -> Self {
        self.start_index += by;
        self.end_index += by;
        self
    }
}

// ============================================================
// AGGREGATION
// ============================================================

/// Greedy sweep in start order: a candidate overlapping the active one
/// replaces it only with strictly higher confidence, otherwise it is dropped.
pub fn deduplicate_overlapping(candidates: &[PatternCandidate]) -> Vec<PatternCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&PatternCandidate> = candidates.iter().collect();
    sorted.sort_by_key(|c| c.start_index);

    let mut kept: Vec<PatternCandidate> = Vec::with_capacity(sorted.len());
    for current in sorted {
        match kept.last_mut() {
            Some(last) if current.start_index <= last.end_index => {
                if current.confidence > last.confidence {
                    *last = current.clone();
                }
            }
            _ => kept.push(current.clone()),
        }
    }
    kept
}

/// Keep the `max` most confident candidates, returned in start order.
/// Ties keep chronological order.
pub fn cap_candidates(mut candidates: Vec<PatternCandidate>, max: usize) -> Vec<PatternCandidate> {
    if candidates.len() <= max {
        return candidates;
    }
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(max);
    candidates.sort_by_key(|c| c.start_index);
    candidates
}
