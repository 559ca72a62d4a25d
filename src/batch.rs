//! Batch driving for long histories
//!
//! Geometric detectors grow quadratically (double formations) or cubically
//! (head and shoulders) with swing count, so multi-year series are scanned
//! in overlapping windows and merged back into global bar coordinates.
//! Labeling then simulates and grades every candidate on the rayon pool.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analyzer::{analyze_candidate, AnalysisResult};
use crate::candidates::{cap_candidates, deduplicate_overlapping, IdGenerator, PatternCandidate};
use crate::outcome::{simulate_candidate, Outcome, OutcomeConfig, OutcomeResult};
use crate::{Indicators, PatternEngine, PatternError, Result};

// ============================================================
// CHUNKED SCANNING
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Bars per window
    pub chunk_size: usize,
    /// Bars shared by consecutive windows
    pub overlap: usize,
    /// Cap applied per window and to the merged result
    pub max_candidates: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            overlap: 500,
            max_candidates: 1000,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PatternError::InvalidConfig("chunk_size must be > 0".to_string()));
        }
        if self.overlap >= self.chunk_size {
            return Err(PatternError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        if self.max_candidates == 0 {
            return Err(PatternError::InvalidConfig(
                "max_candidates must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Distance between consecutive window starts
    #[inline]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Scan `bars` in overlapping windows and merge the results.
///
/// A series no longer than one window is scanned directly. Otherwise each
/// window's candidates are shifted into global indices, then the
/// concatenation is sorted, deduplicated and capped again, so a formation
/// seen by two windows survives once.
pub fn scan_chunked<T, G>(
    engine: &PatternEngine,
    bars: &[T],
    pair: &str,
    ids: &mut G,
    config: &ChunkConfig,
) -> Result<Vec<PatternCandidate>>
where
    T: Indicators,
    G: IdGenerator + ?Sized,
{
    config.validate()?;

    if bars.len() <= config.chunk_size {
        return engine.scan_capped(bars, pair, ids, config.max_candidates);
    }

    let mut all = Vec::new();
    let mut start = 0;
    while start < bars.len() {
        let end = (start + config.chunk_size).min(bars.len());
        let found = engine.scan_capped(&bars[start..end], pair, ids, config.max_candidates)?;
        tracing::debug!(pair, start, end, found = found.len(), "chunk scanned");
        all.extend(found.into_iter().map(|c| c.offset(start)));

        if end >= bars.len() {
            break;
        }
        start += config.stride();
    }

    all.sort_by_key(|c| c.start_index);
    let deduped = deduplicate_overlapping(&all);
    Ok(cap_candidates(deduped, config.max_candidates))
}

// ============================================================
// LABELING
// ============================================================

/// A candidate with its simulated outcome and grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledCandidate {
    pub candidate: PatternCandidate,
    pub outcome: OutcomeResult,
    pub analysis: AnalysisResult,
}

impl LabeledCandidate {
    #[inline]
    pub fn is_approved(&self) -> bool {
        self.analysis.approved
    }
}

/// Simulate and grade every candidate in parallel, preserving input order.
///
/// Fails on the first candidate whose indices fall outside `bars`.
pub fn label_candidates<T>(
    bars: &[T],
    candidates: Vec<PatternCandidate>,
    config: &OutcomeConfig,
) -> Result<Vec<LabeledCandidate>>
where
    T: Indicators + Sync,
{
    candidates
        .into_par_iter()
        .map(|candidate| {
            let outcome = simulate_candidate(bars, &candidate, config);
            let analysis = analyze_candidate(&candidate, &outcome, bars)?;
            Ok(LabeledCandidate {
                candidate,
                outcome,
                analysis,
            })
        })
        .collect()
}

/// Counts over a labeled batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSummary {
    pub found: usize,
    pub approved: usize,
    pub rejected: usize,
    pub wins: usize,
    pub losses: usize,
    pub pending: usize,
}

impl LabelSummary {
    pub fn from_labeled(labeled: &[LabeledCandidate]) -> Self {
        labeled.iter().fold(Self::default(), |mut s, l| {
            s.found += 1;
            if l.is_approved() {
                s.approved += 1;
            } else {
                s.rejected += 1;
            }
            match l.outcome.outcome {
                Outcome::Win => s.wins += 1,
                Outcome::Loss => s.losses += 1,
                Outcome::Pending => s.pending += 1,
                Outcome::Breakeven => {}
            }
            s
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::SequentialIds;
    use crate::{Candle, EngineBuilder, PatternType};

    /// Flat series with a bullish pin bar every `every` bars.
    fn series(len: usize, every: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                if i % every == every / 2 {
                    Candle::new(1.1000, 1.1005, 1.0960, 1.0999).with_atr(0.002)
                } else {
                    Candle::new(1.1000, 1.1010, 1.0990, 1.1002).with_atr(0.002)
                }
            })
            .collect()
    }

    fn pin_engine() -> PatternEngine {
        EngineBuilder::new()
            .with_all_defaults()
            .only_patterns([PatternType::PinBar])
            .build()
            .unwrap()
    }

    #[test]
    fn config_validation() {
        assert!(ChunkConfig::default().validate().is_ok());
        assert_eq!(ChunkConfig::default().stride(), 4500);
        let bad = ChunkConfig {
            overlap: 5000,
            ..ChunkConfig::default()
        };
        assert!(bad.validate().is_err());
        let zero = ChunkConfig {
            chunk_size: 0,
            overlap: 0,
            ..ChunkConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn short_series_matches_direct_scan() {
        let bars = series(60, 10);
        let engine = pin_engine();
        let config = ChunkConfig::default();

        let chunked = scan_chunked(&engine, &bars, "EUR_USD", &mut SequentialIds::new(), &config).unwrap();
        let direct = engine
            .scan_capped(&bars, "EUR_USD", &mut SequentialIds::new(), config.max_candidates)
            .unwrap();
        assert_eq!(chunked, direct);
        assert!(!chunked.is_empty());
    }

    #[test]
    fn chunked_indices_are_global() {
        let bars = series(100, 10);
        let engine = pin_engine();
        let config = ChunkConfig {
            chunk_size: 30,
            overlap: 10,
            max_candidates: 1000,
        };

        let found = scan_chunked(&engine, &bars, "EUR_USD", &mut SequentialIds::new(), &config).unwrap();
        let mut starts: Vec<usize> = found.iter().map(|c| c.start_index).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
        assert!(found.iter().all(|c| c.end_index < bars.len()));
        assert!(found.iter().all(|c| c.start_index % 10 == 5));
        starts.dedup();
        assert_eq!(starts.len(), found.len());

        let direct = engine
            .scan_capped(&bars, "EUR_USD", &mut SequentialIds::new(), 1000)
            .unwrap();
        let direct_starts: Vec<usize> = direct.iter().map(|c| c.start_index).collect();
        assert_eq!(starts, direct_starts);
    }

    #[test]
    fn label_preserves_order_and_counts() {
        let bars = series(60, 10);
        let engine = pin_engine();
        let candidates = engine.scan(&bars, "EUR_USD", &mut SequentialIds::new()).unwrap();
        let expected: Vec<_> = candidates.iter().map(|c| c.id.clone()).collect();

        let labeled = label_candidates(&bars, candidates, &OutcomeConfig::default()).unwrap();
        let got: Vec<_> = labeled.iter().map(|l| l.candidate.id.clone()).collect();
        assert_eq!(got, expected);
        assert!(labeled
            .iter()
            .all(|l| (1..=10).contains(&l.analysis.quality_rating)));

        let summary = LabelSummary::from_labeled(&labeled);
        assert_eq!(summary.found, labeled.len());
        assert_eq!(summary.approved + summary.rejected, summary.found);
    }

    #[test]
    fn label_rejects_foreign_indices() {
        let bars = series(60, 10);
        let engine = pin_engine();
        let candidates = engine.scan(&bars, "EUR_USD", &mut SequentialIds::new()).unwrap();
        assert!(label_candidates(&bars[..5], candidates, &OutcomeConfig::default()).is_err());
    }
}
