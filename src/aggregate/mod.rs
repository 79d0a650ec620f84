//! Contribution aggregation
//!
//! This module owns the per-round accumulation state and the mean-reduction
//! algorithm. The engine accepts raw BMP bytes per participant, decodes them
//! immediately into structured rasters (raw bytes are never retained), and
//! computes the pixel-wise mean across all stored contributions on demand.
//!
//! # Lifecycle
//!
//! ```text
//! EMPTY --accept--> ACCUMULATING --accept--> ACCUMULATING
//!                        |                        |
//!                    aggregate (read-only)     reset --> EMPTY
//! ```
//!
//! `aggregate` never mutates the round, so repeated calls without an
//! intervening `accept` yield byte-identical output. The engine is reusable
//! across rounds via `reset`.
//!
//! # Example
//!
//! ```
//! use fedpix::aggregate::AggregationEngine;
//! use fedpix::raster::{bmp, SampleGrid};
//!
//! let image = |rows: &[Vec<u8>]| {
//!     bmp::encode(&SampleGrid::from_rows(rows).unwrap(), &[]).unwrap()
//! };
//!
//! let engine = AggregationEngine::new();
//! engine.accept("site-1", &image(&[vec![10, 20], vec![30, 40]])).unwrap();
//! engine.accept("site-2", &image(&[vec![30, 40], vec![50, 60]])).unwrap();
//!
//! let result = engine.aggregate().unwrap();
//! assert_eq!(result.grid.sample(0, 0), 20);
//! ```

use crate::raster::{bmp, DecodedRaster, RasterError, SampleGrid};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors produced by the aggregation engine
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Contribution bytes failed to decode (propagated from the codec)
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// Contribution dimensions disagree with the round's reference dimensions
    #[error("contribution is {got_width}x{got_height} but this round is {want_width}x{want_height}")]
    DimensionMismatch {
        want_width: u32,
        want_height: u32,
        got_width: u32,
        got_height: u32,
    },

    /// Aggregate requested with zero stored contributions
    #[error("no contributions received for aggregation")]
    NoContributions,
}

/// Computed aggregate: mean grid plus its encoded BMP bytes
#[derive(Debug, Clone)]
pub struct AggregateResult {
    /// Pixel-wise mean of all contributions (same dimensions as inputs)
    pub grid: SampleGrid,

    /// BMP encoding of the mean grid, ready for distribution
    pub encoded: Vec<u8>,
}

/// Per-round accumulation state
///
/// Invariant: every stored raster matches `reference`, which is fixed by the
/// first accepted contribution and cleared only by `reset`.
#[derive(Debug, Default)]
struct RoundState {
    /// participant_id → decoded contribution
    contributions: HashMap<String, DecodedRaster>,

    /// Reference (width, height) for the round
    reference: Option<(u32, u32)>,
}

/// Pixel-wise mean aggregation engine
///
/// Collects one raster per participant and computes their mean on demand.
/// Independently instantiable, so concurrent rounds (e.g. in tests) do not
/// interfere. One lock covers both `accept`'s insert and `aggregate`'s
/// full-map scan: accepts for distinct participants never corrupt the map,
/// same-participant re-submissions serialize to last-writer-wins, and
/// `aggregate` always observes a consistent snapshot.
#[derive(Debug, Default)]
pub struct AggregationEngine {
    round: Mutex<RoundState>,
}

impl AggregationEngine {
    /// Create an engine with an empty round
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a contribution from a participant
    ///
    /// Decodes `raw_bytes` and stores the result under `participant_id`.
    /// The first contribution of a round establishes the round's reference
    /// dimensions; later contributions must match them. A second accept for
    /// the same participant overwrites the earlier one (re-submission, not
    /// duplication).
    ///
    /// # Errors
    ///
    /// * [`AggregateError::Raster`] if the bytes are not a valid grayscale BMP
    /// * [`AggregateError::DimensionMismatch`] if the dimensions disagree
    ///   with the round's reference
    ///
    /// A failed accept leaves the round unchanged.
    pub fn accept(&self, participant_id: &str, raw_bytes: &[u8]) -> Result<bool, AggregateError> {
        // Decode outside the lock; no contribution is held as raw bytes
        let raster = bmp::decode(raw_bytes)?;
        let dimensions = raster.grid.dimensions();

        let mut round = self.round.lock().unwrap();
        match round.reference {
            Some((want_width, want_height)) if (want_width, want_height) != dimensions => {
                return Err(AggregateError::DimensionMismatch {
                    want_width,
                    want_height,
                    got_width: dimensions.0,
                    got_height: dimensions.1,
                });
            }
            None => round.reference = Some(dimensions),
            Some(_) => {}
        }

        round.contributions.insert(participant_id.to_string(), raster);
        Ok(true)
    }

    /// Compute the pixel-wise mean of all stored contributions
    ///
    /// For every pixel, the result is `floor(sum / count)` - truncating
    /// integer division, matching 8-bit mean-then-truncate semantics. The
    /// header of the lexicographically first participant serves as the
    /// encoding template, so the output is deterministic for a fixed round.
    ///
    /// Read-only: the round is unchanged regardless of outcome, and repeated
    /// calls without an intervening `accept` are byte-identical.
    ///
    /// # Errors
    ///
    /// [`AggregateError::NoContributions`] when the round is empty.
    pub fn aggregate(&self) -> Result<AggregateResult, AggregateError> {
        let round = self.round.lock().unwrap();
        if round.contributions.is_empty() {
            return Err(AggregateError::NoContributions);
        }

        let (width, height) = round.reference.ok_or(AggregateError::NoContributions)?;
        let pixel_count = width as usize * height as usize;
        let count = round.contributions.len() as u64;

        // Sorted ids for deterministic template selection
        let mut ids: Vec<&String> = round.contributions.keys().collect();
        ids.sort_unstable();

        let mut sums = vec![0u64; pixel_count];
        for raster in round.contributions.values() {
            for (sum, &sample) in sums.iter_mut().zip(raster.grid.samples()) {
                *sum += u64::from(sample);
            }
        }

        let means: Vec<u8> = sums.iter().map(|&sum| (sum / count) as u8).collect();
        let grid = SampleGrid::new(width, height, means)?;

        let template = &round.contributions[ids[0]].header;
        let encoded = bmp::encode(&grid, template)?;

        Ok(AggregateResult { grid, encoded })
    }

    /// Number of stored contributions
    pub fn contribution_count(&self) -> usize {
        self.round.lock().unwrap().contributions.len()
    }

    /// Sorted list of participant ids with a stored contribution
    pub fn participant_ids(&self) -> Vec<String> {
        let round = self.round.lock().unwrap();
        let mut ids: Vec<String> = round.contributions.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Reference (width, height) for the current round, if established
    pub fn reference_dimensions(&self) -> Option<(u32, u32)> {
        self.round.lock().unwrap().reference
    }

    /// Clear all stored contributions, ready for a new round
    ///
    /// Safe to call when the round is already empty.
    pub fn reset(&self) {
        let mut round = self.round.lock().unwrap();
        round.contributions.clear();
        round.reference = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn image(rows: &[Vec<u8>]) -> Vec<u8> {
        bmp::encode(&SampleGrid::from_rows(rows).unwrap(), &[]).unwrap()
    }

    #[test]
    fn test_accept_returns_true() {
        let engine = AggregationEngine::new();
        let accepted = engine
            .accept("site-1", &image(&[vec![1, 2], vec![3, 4]]))
            .unwrap();

        assert!(accepted);
        assert_eq!(engine.contribution_count(), 1);
    }

    #[test]
    fn test_accept_malformed_bytes() {
        let engine = AggregationEngine::new();
        let result = engine.accept("site-1", b"not a bmp");

        assert!(matches!(result, Err(AggregateError::Raster(_))));
        assert_eq!(engine.contribution_count(), 0);
    }

    #[test]
    fn test_three_raster_mean() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![10, 20], vec![30, 40]])).unwrap();
        engine.accept("site-2", &image(&[vec![20, 30], vec![40, 50]])).unwrap();
        engine.accept("site-3", &image(&[vec![30, 10], vec![50, 30]])).unwrap();

        let result = engine.aggregate().unwrap();
        let expected = SampleGrid::from_rows(&[vec![20, 20], vec![40, 40]]).unwrap();
        assert_eq!(result.grid, expected);
    }

    #[test]
    fn test_mean_truncates_toward_zero() {
        // 0.5 must truncate to 0, not round to 1
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![0, 0], vec![0, 0]])).unwrap();
        engine.accept("site-2", &image(&[vec![1, 0], vec![0, 0]])).unwrap();

        let result = engine.aggregate().unwrap();
        let expected = SampleGrid::from_rows(&[vec![0, 0], vec![0, 0]]).unwrap();
        assert_eq!(result.grid, expected);
    }

    #[test]
    fn test_aggregate_idempotent() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![10, 20], vec![30, 40]])).unwrap();
        engine.accept("site-2", &image(&[vec![50, 60], vec![70, 80]])).unwrap();

        let first = engine.aggregate().unwrap();
        let second = engine.aggregate().unwrap();

        assert_eq!(first.encoded, second.encoded);
        assert_eq!(engine.contribution_count(), 2);
    }

    #[test]
    fn test_resubmission_overwrites() {
        let engine = AggregationEngine::new();
        engine.accept("site-a", &image(&[vec![0, 0], vec![0, 0]])).unwrap();
        engine.accept("site-a", &image(&[vec![100, 100], vec![100, 100]])).unwrap();
        engine.accept("site-b", &image(&[vec![200, 200], vec![200, 200]])).unwrap();

        assert_eq!(engine.contribution_count(), 2);

        // Mean uses the second submission for site-a: (100 + 200) / 2
        let result = engine.aggregate().unwrap();
        assert_eq!(result.grid.sample(0, 0), 150);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![10, 20], vec![30, 40]])).unwrap();

        let result = engine.accept("site-2", &image(&[vec![1, 2, 3], vec![4, 5, 6]]));
        assert!(matches!(result, Err(AggregateError::DimensionMismatch { .. })));

        // The rejected contribution does not affect the aggregate
        assert_eq!(engine.contribution_count(), 1);
        let aggregate = engine.aggregate().unwrap();
        assert_eq!(aggregate.grid.dimensions(), (2, 2));
        assert_eq!(aggregate.grid.sample(0, 0), 10);
    }

    #[test]
    fn test_aggregate_empty_round() {
        let engine = AggregationEngine::new();
        let result = engine.aggregate();

        assert!(matches!(result, Err(AggregateError::NoContributions)));
    }

    #[test]
    fn test_aggregate_single_contribution() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![7, 8], vec![9, 10]])).unwrap();

        let result = engine.aggregate().unwrap();
        let expected = SampleGrid::from_rows(&[vec![7, 8], vec![9, 10]]).unwrap();
        assert_eq!(result.grid, expected);
    }

    #[test]
    fn test_aggregate_output_decodes() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![10, 20], vec![30, 40]])).unwrap();
        engine.accept("site-2", &image(&[vec![20, 30], vec![40, 50]])).unwrap();

        let result = engine.aggregate().unwrap();
        let decoded = bmp::decode(&result.encoded).unwrap();
        assert_eq!(decoded.grid, result.grid);
    }

    #[test]
    fn test_reset() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![1, 2], vec![3, 4]])).unwrap();
        engine.reset();

        assert_eq!(engine.contribution_count(), 0);
        assert!(engine.reference_dimensions().is_none());
        assert!(matches!(
            engine.aggregate(),
            Err(AggregateError::NoContributions)
        ));
    }

    #[test]
    fn test_reset_empty_round() {
        let engine = AggregationEngine::new();
        engine.reset();
        assert_eq!(engine.contribution_count(), 0);
    }

    #[test]
    fn test_reset_allows_new_dimensions() {
        let engine = AggregationEngine::new();
        engine.accept("site-1", &image(&[vec![1, 2], vec![3, 4]])).unwrap();
        engine.reset();

        // A new round establishes fresh reference dimensions
        engine.accept("site-1", &image(&[vec![1, 2, 3], vec![4, 5, 6]])).unwrap();
        assert_eq!(engine.reference_dimensions(), Some((3, 2)));
    }

    #[test]
    fn test_participant_ids_sorted() {
        let engine = AggregationEngine::new();
        engine.accept("site-c", &image(&[vec![1]])).unwrap();
        engine.accept("site-a", &image(&[vec![2]])).unwrap();
        engine.accept("site-b", &image(&[vec![3]])).unwrap();

        assert_eq!(engine.participant_ids(), vec!["site-a", "site-b", "site-c"]);
    }

    #[test]
    fn test_concurrent_accepts() {
        let engine = Arc::new(AggregationEngine::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                let shade = (i * 10) as u8;
                let bytes = image(&[vec![shade, shade], vec![shade, shade]]);
                engine.accept(&format!("site-{}", i), &bytes).unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.contribution_count(), 8);

        // Mean of 0, 10, ..., 70 is 35
        let result = engine.aggregate().unwrap();
        assert_eq!(result.grid.sample(0, 0), 35);
    }
}
