//! Query-time ranking over a collection.
//!
//! | Search type | Behaviour |
//! |-------------|-----------|
//! | `similarity` | Top `k` entries by ascending cosine distance |
//! | `similarity_score_threshold` | Same, minus entries scoring below the threshold |
//! | `mmr` | Fetch `fetch_k` nearest, then greedily pick `k` balancing relevance and diversity |
//!
//! The query is embedded exactly once per call. A missing or empty
//! collection yields an empty result, not an error.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::collection::CollectionManager;
use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Error, Result};
use crate::models::{ScoredEntry, StoredEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Similarity,
    SimilarityScoreThreshold,
    Mmr,
}

impl FromStr for SearchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "similarity" => Ok(SearchType::Similarity),
            "similarity_score_threshold" => Ok(SearchType::SimilarityScoreThreshold),
            "mmr" => Ok(SearchType::Mmr),
            other => Err(Error::InvalidSearchType(other.to_string())),
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchType::Similarity => "similarity",
            SearchType::SimilarityScoreThreshold => "similarity_score_threshold",
            SearchType::Mmr => "mmr",
        })
    }
}

/// Ranking settings fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverSettings {
    pub search_type: SearchType,
    pub k: usize,
    pub fetch_k: usize,
    pub score_threshold: Option<f32>,
    pub lambda_mult: f32,
}

impl RetrieverSettings {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        Ok(Self {
            search_type: config.search_type.parse()?,
            k: config.k,
            fetch_k: config.fetch_k,
            score_threshold: config.score_threshold,
            lambda_mult: config.lambda_mult,
        })
    }
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            search_type: SearchType::Similarity,
            k: 4,
            fetch_k: 20,
            score_threshold: None,
            lambda_mult: 0.5,
        }
    }
}

/// Per-call overrides of [`RetrieverSettings`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub k: Option<usize>,
    pub fetch_k: Option<usize>,
    pub threshold: Option<f32>,
}

/// A ranked entry. `score` is `1 - distance`.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedEntry {
    pub entry: StoredEntry,
    pub distance: f32,
    pub score: f32,
}

impl From<ScoredEntry> for RetrievedEntry {
    fn from(scored: ScoredEntry) -> Self {
        Self {
            score: 1.0 - scored.distance,
            distance: scored.distance,
            entry: scored.entry,
        }
    }
}

pub struct Retriever {
    collections: CollectionManager,
    collection_name: String,
    embedder: Arc<dyn Embedder>,
    settings: RetrieverSettings,
}

impl Retriever {
    pub fn new(
        collections: CollectionManager,
        collection_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        settings: RetrieverSettings,
    ) -> Self {
        Self {
            collections,
            collection_name: collection_name.into(),
            embedder,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    pub async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<Vec<RetrievedEntry>> {
        let k = opts.k.unwrap_or(self.settings.k);
        let query_vec = self.embedder.embed(query).await?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let results: Vec<RetrievedEntry> = match self.settings.search_type {
            SearchType::Similarity => self
                .nearest(&query_vec, k)
                .await?
                .into_iter()
                .map(RetrievedEntry::from)
                .collect(),
            SearchType::SimilarityScoreThreshold => {
                let threshold = opts
                    .threshold
                    .or(self.settings.score_threshold)
                    .ok_or_else(|| {
                        Error::Config(
                            "similarity_score_threshold search requires a score threshold".into(),
                        )
                    })?;
                self.nearest(&query_vec, k)
                    .await?
                    .into_iter()
                    .map(RetrievedEntry::from)
                    .filter(|r| r.score >= threshold)
                    .collect()
            }
            SearchType::Mmr => {
                let fetch_k = opts.fetch_k.unwrap_or(self.settings.fetch_k).max(k);
                let candidates = self.nearest(&query_vec, fetch_k).await?;
                let embeddings: Vec<&[f32]> = candidates
                    .iter()
                    .map(|c| c.entry.embedding.as_slice())
                    .collect();
                let picks =
                    maximal_marginal_relevance(&query_vec, &embeddings, self.settings.lambda_mult, k);

                let mut slots: Vec<Option<ScoredEntry>> = candidates.into_iter().map(Some).collect();
                picks
                    .into_iter()
                    .filter_map(|i| slots.get_mut(i).and_then(Option::take))
                    .map(RetrievedEntry::from)
                    .collect()
            }
        };

        debug!(
            search_type = %self.settings.search_type,
            k,
            returned = results.len(),
            "retrieved"
        );
        Ok(results)
    }

    async fn nearest(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredEntry>> {
        self.collections
            .nearest(&self.collection_name, query_vec, limit)
            .await
    }
}

/// Greedy maximal-marginal-relevance selection.
///
/// Returns up to `k` distinct indices into `candidates`. The first pick is
/// the candidate most similar to `query`; each later pick maximises
/// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, selected))`.
/// Ties go to the earlier candidate.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[&[f32]],
    lambda: f32,
    k: usize,
) -> Vec<usize> {
    let target = k.min(candidates.len());
    if target == 0 {
        return Vec::new();
    }

    let to_query: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut first = 0;
    for (i, &s) in to_query.iter().enumerate() {
        if s > to_query[first] {
            first = i;
        }
    }

    let mut selected = vec![first];
    // Highest similarity of each candidate to anything already selected.
    let mut redundancy: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(c, candidates[first]))
        .collect();

    while selected.len() < target {
        let mut best: Option<(usize, f32)> = None;
        for (i, &relevance) in to_query.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let score = lambda * relevance - (1.0 - lambda) * redundancy[i];
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        let Some((pick, _)) = best else { break };
        selected.push(pick);
        for (i, c) in candidates.iter().enumerate() {
            redundancy[i] = redundancy[i].max(cosine_similarity(c, candidates[pick]));
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_type_parsing() {
        assert_eq!("mmr".parse::<SearchType>().unwrap(), SearchType::Mmr);
        assert_eq!(
            "similarity_score_threshold".parse::<SearchType>().unwrap(),
            SearchType::SimilarityScoreThreshold
        );
        assert!(matches!(
            "hybrid".parse::<SearchType>(),
            Err(Error::InvalidSearchType(_))
        ));
    }

    #[test]
    fn test_mmr_empty() {
        assert!(maximal_marginal_relevance(&[1.0, 0.0], &[], 0.5, 3).is_empty());
        let c: [&[f32]; 1] = [&[1.0, 0.0]];
        assert!(maximal_marginal_relevance(&[1.0, 0.0], &c, 0.5, 0).is_empty());
    }

    #[test]
    fn test_mmr_prefers_diversity() {
        let a = [1.0f32, 0.0];
        let a_dup = [0.99f32, 0.01];
        let b = [0.7f32, 0.7];
        let candidates: Vec<&[f32]> = vec![&a, &a_dup, &b];

        let picks = maximal_marginal_relevance(&[1.0, 0.0], &candidates, 0.3, 2);
        assert_eq!(picks, vec![0, 2]);
    }

    #[test]
    fn test_mmr_lambda_one_is_pure_relevance() {
        let a = [1.0f32, 0.0];
        let a_dup = [0.99f32, 0.01];
        let b = [0.7f32, 0.7];
        let candidates: Vec<&[f32]> = vec![&a, &a_dup, &b];

        let picks = maximal_marginal_relevance(&[1.0, 0.0], &candidates, 1.0, 3);
        assert_eq!(picks, vec![0, 1, 2]);
    }

    #[test]
    fn test_mmr_never_repeats() {
        let vecs: Vec<[f32; 2]> = (0..10).map(|i| [1.0, i as f32 * 0.1]).collect();
        let candidates: Vec<&[f32]> = vecs.iter().map(|v| v.as_slice()).collect();
        let mut picks = maximal_marginal_relevance(&[1.0, 0.0], &candidates, 0.3, 10);
        assert_eq!(picks.len(), 10);
        picks.sort_unstable();
        picks.dedup();
        assert_eq!(picks.len(), 10);
    }

    #[test]
    fn test_scored_entry_converts_to_score() {
        let scored = ScoredEntry {
            entry: StoredEntry {
                id: "e".into(),
                collection_id: "c".into(),
                content: String::new(),
                metadata: Default::default(),
                embedding: vec![],
            },
            distance: 0.25,
        };
        let r = RetrievedEntry::from(scored);
        assert!((r.score - 0.75).abs() < 1e-6);
    }
}
