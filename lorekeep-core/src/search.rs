//! Keyword-based relevance search over stored knowledge items.
//!
//! A deliberately transparent v1 ranker: extract keywords from the query,
//! pull a broad OR-matched candidate set from the store, score each
//! candidate field by field, floor and sort. When the primary search comes
//! back empty, a single-keyword fallback pass guarantees graceful
//! degradation on sparse corpora instead of empty results.

use tracing::debug;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::records::KnowledgeItem;
use crate::store::KnowledgeStore;

/// Maximum contribution of content occurrences, per keyword.
const CONTENT_SCORE_CAP: u32 = 40;
/// Maximum total relevance score.
const SCORE_CAP: u32 = 100;

/// Words carrying no retrieval signal, dropped during keyword extraction.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "and", "any", "are",
    "because", "been", "before", "being", "below", "between", "both", "but",
    "can", "could", "did", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "into", "its",
    "itself", "just", "more", "most", "myself", "nor", "not", "now", "off",
    "once", "only", "other", "our", "ours", "ourselves", "out", "over",
    "own", "same", "she", "should", "some", "such", "than", "that", "the",
    "their", "theirs", "them", "themselves", "then", "there", "these",
    "they", "this", "those", "through", "too", "under", "until", "very",
    "was", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

/// A scored candidate straight from the store, before ranking.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    /// The matched item.
    pub item: KnowledgeItem,
    /// Resolved label of the item's domain, used for scoring.
    pub domain_label: String,
}

/// How a hit was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Scored by the per-field keyword ranker.
    Keyword,
    /// Surfaced by the single-keyword fallback pass; flat score.
    Fallback,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched item.
    pub item: KnowledgeItem,
    /// Resolved label of the item's domain.
    pub domain_label: String,
    /// Relevance score in [0, 100].
    pub relevance: u32,
    /// How the hit was found.
    pub match_type: MatchType,
}

/// Extract query keywords: lowercase, strip punctuation, drop stop words
/// and tokens of two characters or fewer, dedupe preserving order.
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .filter(|t| !STOP_WORDS.contains(t))
    {
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

/// Score one candidate against the keyword set.
///
/// Per keyword: title substring +30; each content occurrence +10 capped at
/// +40; domain-label substring +15; tag substring +20. Summed across
/// keywords and capped at 100.
#[must_use]
pub fn relevance_score(candidate: &SearchCandidate, keywords: &[String]) -> u32 {
    if keywords.is_empty() {
        return 0;
    }

    let title = candidate.item.title.to_lowercase();
    let content = candidate.item.content.to_lowercase();
    let domain = candidate.domain_label.to_lowercase();
    let tags: Vec<String> = candidate
        .item
        .tags
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let mut score: u32 = 0;
    for keyword in keywords {
        if title.contains(keyword.as_str()) {
            score += 30;
        }
        let occurrences = content.matches(keyword.as_str()).count() as u32;
        score += (occurrences * 10).min(CONTENT_SCORE_CAP);
        if domain.contains(keyword.as_str()) {
            score += 15;
        }
        if tags.iter().any(|t| t.contains(keyword.as_str())) {
            score += 20;
        }
    }
    score.min(SCORE_CAP)
}

/// Retrieve the `limit` most relevant items for a free-text query.
///
/// An empty or all-stop-word query returns an empty result, not an error.
///
/// # Errors
///
/// Returns [`crate::LoreError::Database`] or
/// [`crate::LoreError::Serialization`] if the store fails.
pub fn search(
    store: &KnowledgeStore,
    config: &SearchConfig,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let keywords = extract_keywords(query);
    if keywords.is_empty() {
        debug!(query, "no usable keywords in query");
        return Ok(Vec::new());
    }

    let candidates = store.search_candidates(&keywords, config.candidate_cap)?;
    if candidates.is_empty() {
        return fallback_search(store, config, &keywords, limit);
    }

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|candidate| {
            let relevance = relevance_score(&candidate, &keywords);
            SearchHit {
                item: candidate.item,
                domain_label: candidate.domain_label,
                relevance,
                match_type: MatchType::Keyword,
            }
        })
        .filter(|hit| hit.relevance >= config.score_floor)
        .collect();

    // Stable sort keeps the store's newest-first order for equal scores.
    hits.sort_by(|a, b| b.relevance.cmp(&a.relevance));
    hits.truncate(limit);

    debug!(query, keywords = keywords.len(), hits = hits.len(), "keyword search complete");
    Ok(hits)
}

/// Narrow second pass on the single most salient keyword (the longest),
/// returning a small flat-scored result set.
fn fallback_search(
    store: &KnowledgeStore,
    config: &SearchConfig,
    keywords: &[String],
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let Some(salient) = keywords.iter().max_by_key(|k| k.len()) else {
        return Ok(Vec::new());
    };
    debug!(keyword = %salient, "primary search empty, trying fallback");

    let mut hits: Vec<SearchHit> = store
        .fallback_candidates(salient, config.fallback_count)?
        .into_iter()
        .map(|candidate| SearchHit {
            item: candidate.item,
            domain_label: candidate.domain_label,
            relevance: config.fallback_score,
            match_type: MatchType::Fallback,
        })
        .collect();
    hits.truncate(limit);
    Ok(hits)
}
