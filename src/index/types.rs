use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Graded bucket of exemplar response quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub const DEFAULT_PREFERENCE: [QualityTier; 3] =
        [QualityTier::High, QualityTier::Medium, QualityTier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }

    /// Heading used when the tier is shown to the model.
    pub fn label(&self) -> &'static str {
        match self {
            QualityTier::High => "High-Quality",
            QualityTier::Medium => "Medium-Quality",
            QualityTier::Low => "Low-Quality",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "high_quality" => Ok(QualityTier::High),
            "medium" | "medium_quality" => Ok(QualityTier::Medium),
            "low" | "low_quality" => Ok(QualityTier::Low),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// Exemplar responses attached to an item, grouped by tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityBuckets {
    #[serde(default, rename = "high_quality")]
    pub high: Vec<String>,
    #[serde(default, rename = "medium_quality")]
    pub medium: Vec<String>,
    #[serde(default, rename = "low_quality")]
    pub low: Vec<String>,
}

impl QualityBuckets {
    pub fn tier(&self, tier: QualityTier) -> &[String] {
        match tier {
            QualityTier::High => &self.high,
            QualityTier::Medium => &self.medium,
            QualityTier::Low => &self.low,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.medium.is_empty() && self.low.is_empty()
    }
}

/// One historical exchange stored in the index.
///
/// `extra` holds whatever other metadata the ingestion side recorded
/// (`row_index` and the like). It is passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedItem {
    pub id: String,
    pub position: u64,
    pub raw_text: String,
    pub embedding: Vec<f32>,
    pub search_keywords: BTreeSet<String>,
    pub quality_buckets: QualityBuckets,
    pub extra: Map<String, Value>,
}

/// Pre-filter on `search_keywords`. Empty means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordFilter(BTreeSet<String>);

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.0
    }

    pub fn matches(&self, item: &IndexedItem) -> bool {
        self.0.is_empty() || !self.0.is_disjoint(&item.search_keywords)
    }
}

/// An indexed item paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: Arc<IndexedItem>,
    pub similarity_score: f32,
}

/// Item returned by a keyword-only lookup.
#[derive(Debug, Clone)]
pub struct KeywordMatch {
    pub item: Arc<IndexedItem>,
    pub matching_keywords: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(keywords: &[&str]) -> IndexedItem {
        IndexedItem {
            id: "i".into(),
            position: 0,
            raw_text: "text".into(),
            embedding: vec![1.0],
            search_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            quality_buckets: QualityBuckets::default(),
            extra: Map::new(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = KeywordFilter::new(Vec::<String>::new());
        assert!(filter.matches(&item(&[])));
        assert!(filter.matches(&item(&["Anxiety"])));
    }

    #[test]
    fn filter_requires_intersection() {
        let filter = KeywordFilter::new(["Anxiety", " Sleep "]);
        assert!(filter.matches(&item(&["Sleep", "Grief"])));
        assert!(!filter.matches(&item(&["Grief"])));
        assert!(!filter.matches(&item(&[])));
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let filter = KeywordFilter::new(["", "   "]);
        assert!(filter.is_empty());
    }

    #[test]
    fn tier_parsing_accepts_bucket_names() {
        assert_eq!("high_quality".parse::<QualityTier>(), Ok(QualityTier::High));
        assert_eq!("Medium".parse::<QualityTier>(), Ok(QualityTier::Medium));
        assert!("best".parse::<QualityTier>().is_err());
    }

    #[test]
    fn buckets_deserialize_from_stored_json() {
        let buckets: QualityBuckets =
            serde_json::from_str(r#"{"high_quality": ["a", "b"], "low_quality": ["c"]}"#).unwrap();
        assert_eq!(buckets.tier(QualityTier::High), ["a", "b"]);
        assert!(buckets.tier(QualityTier::Medium).is_empty());
        assert_eq!(buckets.tier(QualityTier::Low), ["c"]);
    }
}
