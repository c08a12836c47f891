use std::collections::BTreeSet;

use crate::index::{Candidate, QualityTier};

/// Exemplars picked from one candidate, all from a single tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ExemplarSet {
    pub prompt: String,
    pub tier: QualityTier,
    pub responses: Vec<String>,
    pub similarity_score: f32,
}

#[derive(Debug, Clone)]
pub struct QualitySelector {
    preference: Vec<QualityTier>,
}

impl Default for QualitySelector {
    fn default() -> Self {
        Self::new(QualityTier::DEFAULT_PREFERENCE.to_vec())
    }
}

impl QualitySelector {
    /// Duplicate tiers in `preference` are ignored after their first
    /// occurrence. An empty preference falls back to the default order.
    pub fn new(preference: Vec<QualityTier>) -> Self {
        let mut seen = BTreeSet::new();
        let preference: Vec<_> = preference.into_iter().filter(|t| seen.insert(*t)).collect();
        if preference.is_empty() {
            return Self::default();
        }
        Self { preference }
    }

    pub fn preference(&self) -> &[QualityTier] {
        &self.preference
    }

    /// First non-empty bucket in preference order, restricted to `allowed`
    /// when given. Tiers are never mixed.
    pub fn select<'a>(
        &self,
        candidate: &'a Candidate,
        allowed: Option<&BTreeSet<QualityTier>>,
    ) -> Option<(QualityTier, &'a [String])> {
        self.preference
            .iter()
            .filter(|tier| allowed.map_or(true, |set| set.contains(*tier)))
            .find_map(|&tier| {
                let bucket = candidate.item.quality_buckets.tier(tier);
                (!bucket.is_empty()).then_some((tier, bucket))
            })
    }

    /// Exemplar sets for every candidate that has one, in candidate order.
    /// Candidates without a usable bucket contribute nothing.
    pub fn select_all(
        &self,
        candidates: &[Candidate],
        allowed: Option<&BTreeSet<QualityTier>>,
    ) -> Vec<ExemplarSet> {
        candidates
            .iter()
            .filter_map(|candidate| {
                let selected = self.select(candidate, allowed);
                if selected.is_none() {
                    tracing::debug!("No usable exemplars for item {}", candidate.item.id);
                }
                selected.map(|(tier, responses)| ExemplarSet {
                    prompt: candidate.item.raw_text.clone(),
                    tier,
                    responses: responses.to_vec(),
                    similarity_score: candidate.similarity_score,
                })
            })
            .collect()
    }
}
