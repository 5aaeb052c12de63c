use crate::chunk::{KnowledgeChunk, Query};

/// Scores a chunk against a query. `None` excludes the chunk.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &Query, chunk: &KnowledgeChunk) -> Option<f64>;
}

/// Token overlap plus a bonus for a verbatim phrase match.
///
/// A chunk with no shared token still qualifies, at overlap 1, when the
/// query's leading characters appear in it.
#[derive(Debug, Clone)]
pub struct OverlapScorer {
    pub phrase_bonus: f64,
    pub prefix_chars: usize,
}

impl Default for OverlapScorer {
    fn default() -> Self {
        Self {
            phrase_bonus: 2.0,
            prefix_chars: 20,
        }
    }
}

impl Scorer for OverlapScorer {
    fn score(&self, query: &Query, chunk: &KnowledgeChunk) -> Option<f64> {
        let mut overlap = query.tokens.intersection(&chunk.tokens).count();
        if overlap == 0 {
            let prefix = query.prefix(self.prefix_chars);
            if prefix.is_empty() || !chunk.normalized.contains(prefix) {
                return None;
            }
            overlap = 1;
        }

        let mut score = overlap as f64;
        if chunk.normalized.contains(&query.normalized) {
            score += self.phrase_bonus;
        }
        Some(score)
    }
}
