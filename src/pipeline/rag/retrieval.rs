use std::collections::HashMap;
use std::sync::Arc;

use super::types::{RetrievalParams, RetrievalScope, RetrievedGuidelines};
use super::RagError;
use crate::pipeline::storage::index::GuidelineIndex;
use crate::pipeline::storage::types::ScoredChunk;

/// Composite retrieval query: the working diagnosis plus a compact summary
/// of the active orders.
pub fn build_query(working_diagnosis: &str, orders_summary: &str) -> String {
    let diagnosis = working_diagnosis.trim();
    let orders = orders_summary.trim();

    let mut query = if diagnosis.is_empty() {
        "initial management guidelines".to_string()
    } else {
        format!("{diagnosis} treatment protocol initial management guidelines")
    };
    if !orders.is_empty() {
        query.push_str(". Active orders: ");
        query.push_str(orders);
    }
    query
}

/// Keep at most `max_per_document` chunks per source document, then at most
/// `max_chunks` overall. Input must already be in descending score order;
/// the output keeps that order, so each document keeps its best chunks.
pub fn cap_per_document(
    ranked: Vec<ScoredChunk>,
    max_per_document: usize,
    max_chunks: usize,
) -> Vec<ScoredChunk> {
    let mut per_document: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(max_chunks.min(ranked.len()));

    for scored in ranked {
        if kept.len() >= max_chunks {
            break;
        }
        let count = per_document
            .entry(scored.source_document().to_string())
            .or_insert(0);
        if *count >= max_per_document {
            continue;
        }
        *count += 1;
        kept.push(scored);
    }
    kept
}

/// Selects the guideline chunks relevant to one validation.
#[derive(Clone)]
pub struct GuidelineRetriever {
    index: Arc<GuidelineIndex>,
    params: RetrievalParams,
}

impl GuidelineRetriever {
    pub fn new(index: Arc<GuidelineIndex>) -> Self {
        Self::with_params(index, RetrievalParams::default())
    }

    pub fn with_params(index: Arc<GuidelineIndex>, params: RetrievalParams) -> Self {
        Self { index, params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn index(&self) -> &Arc<GuidelineIndex> {
        &self.index
    }

    /// Retrieve up to `max_chunks` chunks for the diagnosis and orders.
    ///
    /// The per-document cap runs over the full ranking, so a long guideline
    /// cannot hide lower-scoring documents. A specialty that matches nothing
    /// falls back to the whole index. An empty index yields an empty result,
    /// not an error.
    pub fn retrieve(
        &self,
        working_diagnosis: &str,
        orders_summary: &str,
        specialty: Option<&str>,
    ) -> Result<RetrievedGuidelines, RagError> {
        let query = build_query(working_diagnosis, orders_summary);
        // Full ranking; the per-document cap must see every candidate.
        let k = usize::MAX;

        let (candidates, scope) = match specialty.map(str::trim).filter(|s| !s.is_empty()) {
            Some(specialty) => {
                let filtered = self.index.query(&query, Some(specialty), k)?;
                if filtered.is_empty() {
                    tracing::info!(
                        specialty,
                        "No guidelines for specialty, searching all guidelines"
                    );
                    (self.index.query(&query, None, k)?, RetrievalScope::FallbackAll)
                } else {
                    (filtered, RetrievalScope::Specialty)
                }
            }
            None => (self.index.query(&query, None, k)?, RetrievalScope::All),
        };

        let chunks = cap_per_document(
            candidates,
            self.params.max_per_document,
            self.params.max_chunks,
        );

        tracing::info!(
            chunks = chunks.len(),
            scope = ?scope,
            top_score = chunks.first().map(|c| c.score).unwrap_or(0.0),
            "Guidelines retrieved"
        );
        Ok(RetrievedGuidelines {
            query,
            chunks,
            scope,
        })
    }
}
