//! Filament matcher
//!
//! Proposes a single catalog-B candidate for a catalog-A record using
//! strategies of decreasing strictness:
//!
//! 1. **Exact attributes**: same vendor and material type, best name similarity
//! 2. **Name only**: best name similarity over every available target
//! 3. **Fallback**: first available target, regardless of similarity
//!
//! Tiers 1 and 2 run together through [`Matcher::propose`] and only return a
//! target whose similarity reaches the threshold. Tier 3 is a separate call,
//! [`Matcher::fallback`], used by sessions sweeping for any usable binding.
//!
//! The caller is responsible for passing only targets that are not already
//! mapped.

use crate::catalog::{strip_annotation, FilamentRecord};
use serde::Serialize;
use spoolbridge_common::config::{MatchingConfig, SimilarityAlgorithm};
use tracing::debug;

/// Name similarity in `[0.0, 1.0]`, 1.0 meaning identical
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Sørensen–Dice coefficient over character bigrams
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceSimilarity;

impl Similarity for DiceSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::sorensen_dice(a, b)
    }
}

/// Jaro-Winkler similarity
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerSimilarity;

impl Similarity for JaroWinklerSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }
}

/// Which strategy produced a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactAttributes,
    NameOnly,
    Fallback,
}

/// A proposed binding; never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub source_id: String,
    pub target_id: String,
    pub tier: MatchTier,
    /// Name similarity, absent for fallback proposals
    pub score: Option<f64>,
}

/// Tiered matcher with a pluggable similarity function
pub struct Matcher {
    similarity: Box<dyn Similarity>,
    threshold: f64,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl Matcher {
    pub fn new(similarity: Box<dyn Similarity>, threshold: f64) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        let similarity: Box<dyn Similarity> = match config.algorithm {
            SimilarityAlgorithm::Dice => Box::new(DiceSimilarity),
            SimilarityAlgorithm::JaroWinkler => Box::new(JaroWinklerSimilarity),
        };
        Self::new(similarity, config.threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Similarity of two display names after stripping annotations and case
    pub fn name_similarity(&self, a: &str, b: &str) -> f64 {
        let a = strip_annotation(a).to_lowercase();
        let b = strip_annotation(b).to_lowercase();
        self.similarity.score(&a, &b)
    }

    /// Tier 1 then tier 2
    pub fn propose(
        &self,
        candidate: &FilamentRecord,
        available: &[&FilamentRecord],
    ) -> Option<MatchCandidate> {
        let same_attributes: Vec<&FilamentRecord> = available
            .iter()
            .copied()
            .filter(|t| {
                t.vendor == candidate.vendor && t.material_type == candidate.material_type
            })
            .collect();

        if let Some(found) =
            self.best_by_name(candidate, &same_attributes, MatchTier::ExactAttributes)
        {
            return Some(found);
        }

        self.best_by_name(candidate, available, MatchTier::NameOnly)
    }

    /// Tier 3: first available target
    pub fn fallback(
        &self,
        candidate: &FilamentRecord,
        available: &[&FilamentRecord],
    ) -> Option<MatchCandidate> {
        available.first().map(|target| MatchCandidate {
            source_id: candidate.id.clone(),
            target_id: target.id.clone(),
            tier: MatchTier::Fallback,
            score: None,
        })
    }

    /// Highest-similarity target at or above threshold; first wins ties
    fn best_by_name(
        &self,
        candidate: &FilamentRecord,
        targets: &[&FilamentRecord],
        tier: MatchTier,
    ) -> Option<MatchCandidate> {
        let mut best: Option<(&FilamentRecord, f64)> = None;

        for &target in targets {
            let score = self.name_similarity(&candidate.display_name, &target.display_name);
            if score < self.threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((target, score)),
            }
        }

        let (target, score) = best?;
        debug!(
            source = %candidate.id,
            target_id = %target.id,
            ?tier,
            score,
            "Match proposed"
        );
        Some(MatchCandidate {
            source_id: candidate.id.clone(),
            target_id: target.id.clone(),
            tier,
            score: Some(score),
        })
    }
}
