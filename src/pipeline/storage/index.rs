use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use super::chunker::GuidelineChunker;
use super::embedder::cosine_similarity;
use super::loader::{load_guideline_dir, LoadedGuidelines};
use super::types::{Chunker, EmbeddingModel, GuidelineChunk, GuidelineDocument, ScoredChunk};
use super::StorageError;

/// One immutable, fully built generation of the index.
///
/// Readers hold an `Arc` to a snapshot for the duration of a query; writers
/// build a complete replacement off to the side and swap it in, so a reader
/// sees either the old index or the new one, never a half-built one.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    chunks: Vec<Arc<GuidelineChunk>>,
    next_sequence: u64,
    generation: u64,
}

impl IndexSnapshot {
    pub fn chunks(&self) -> &[Arc<GuidelineChunk>] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn documents(&self) -> BTreeSet<&str> {
        self.chunks
            .iter()
            .map(|c| c.source_document.as_str())
            .collect()
    }
}

/// A document that could not be indexed. Never aborts the remaining work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub source_document: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedDocument {
    pub source_document: String,
    pub chunks: usize,
}

/// Per-document outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub indexed: Vec<IndexedDocument>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn total_chunks(&self) -> usize {
        self.indexed.iter().map(|d| d.chunks).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatistics {
    pub status: &'static str,
    pub total_documents: usize,
    pub total_chunks: usize,
    /// Documents per specialty tag (`general` for untagged documents).
    pub by_specialty: BTreeMap<String, usize>,
}

/// In-memory similarity index over guideline chunks.
pub struct GuidelineIndex {
    embedder: Arc<dyn EmbeddingModel>,
    chunker: GuidelineChunker,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    /// Serializes writers; readers never take it.
    writer: Mutex<()>,
}

impl GuidelineIndex {
    pub fn new(embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self::with_chunker(embedder, GuidelineChunker::new())
    }

    pub fn with_chunker(embedder: Arc<dyn EmbeddingModel>, chunker: GuidelineChunker) -> Self {
        Self {
            embedder,
            chunker,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// Current complete generation.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>, StorageError> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| StorageError::LockPoisoned)
    }

    fn swap(&self, next: IndexSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Split, embed and wrap one document's chunks, numbering them from
    /// `first_sequence`.
    fn build_chunks(
        &self,
        document: &GuidelineDocument,
        first_sequence: u64,
    ) -> Result<Vec<Arc<GuidelineChunk>>, StorageError> {
        let pieces = self.chunker.chunk(&document.text);
        if pieces.is_empty() {
            return Err(StorageError::EmptyDocument(document.source_document.clone()));
        }

        let texts: Vec<&str> = pieces.iter().map(|p| p.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        if embeddings.len() != pieces.len() {
            return Err(StorageError::Embedding(format!(
                "{} embeddings for {} chunks",
                embeddings.len(),
                pieces.len()
            )));
        }

        let expected = self.embedder.dimension();
        pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (piece, embedding))| {
                if embedding.len() != expected {
                    return Err(StorageError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
                Ok(Arc::new(GuidelineChunk {
                    id: format!("{}#{}", document.source_document, piece.chunk_index),
                    source_document: document.source_document.clone(),
                    specialty: document.specialty_tag(),
                    text: piece.content,
                    embedding_vector: embedding,
                    sequence: first_sequence + i as u64,
                }))
            })
            .collect()
    }

    /// Index one document. A document already indexed under the same
    /// `source_document` is replaced in the same swap.
    pub fn ingest(
        &self,
        document: &GuidelineDocument,
    ) -> Result<Vec<Arc<GuidelineChunk>>, StorageError> {
        let _writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let current = self.snapshot()?;

        let new_chunks = self.build_chunks(document, current.next_sequence)?;

        let mut chunks: Vec<Arc<GuidelineChunk>> = current
            .chunks
            .iter()
            .filter(|c| c.source_document != document.source_document)
            .cloned()
            .collect();
        chunks.extend(new_chunks.iter().cloned());

        self.swap(IndexSnapshot {
            chunks,
            next_sequence: current.next_sequence + new_chunks.len() as u64,
            generation: current.generation + 1,
        })?;

        tracing::info!(
            source = %document.source_document,
            chunks = new_chunks.len(),
            "Guideline document indexed"
        );
        Ok(new_chunks)
    }

    /// Replace the whole index with the given documents. Documents that fail
    /// to chunk or embed are reported and skipped; the rest are indexed and
    /// become visible together once the new generation is complete.
    pub fn rebuild(&self, loaded: LoadedGuidelines) -> Result<IngestReport, StorageError> {
        let _writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let generation = self.snapshot()?.generation + 1;

        let mut report = IngestReport {
            indexed: Vec::new(),
            failures: loaded.failures,
        };
        let mut chunks: Vec<Arc<GuidelineChunk>> = Vec::new();
        let mut seen = HashSet::new();

        for document in &loaded.documents {
            if !seen.insert(document.source_document.clone()) {
                report.failures.push(IngestFailure {
                    source_document: document.source_document.clone(),
                    reason: "duplicate source document name".into(),
                });
                continue;
            }
            match self.build_chunks(document, chunks.len() as u64) {
                Ok(built) => {
                    report.indexed.push(IndexedDocument {
                        source_document: document.source_document.clone(),
                        chunks: built.len(),
                    });
                    chunks.extend(built);
                }
                Err(e) => {
                    tracing::warn!(
                        source = %document.source_document,
                        error = %e,
                        "Skipping guideline document"
                    );
                    report.failures.push(IngestFailure {
                        source_document: document.source_document.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let next_sequence = chunks.len() as u64;
        self.swap(IndexSnapshot {
            chunks,
            next_sequence,
            generation,
        })?;

        tracing::info!(
            generation,
            documents = report.indexed.len(),
            chunks = report.total_chunks(),
            failures = report.failures.len(),
            "Guideline index rebuilt"
        );
        Ok(report)
    }

    /// Load every guideline under `dir` and rebuild from it.
    pub fn rebuild_from_dir(&self, dir: &Path) -> Result<IngestReport, StorageError> {
        let loaded = load_guideline_dir(dir)?;
        self.rebuild(loaded)
    }

    /// Top-`k` chunks by descending cosine similarity to `text`, optionally
    /// restricted to one specialty tag. Equal scores keep insertion order.
    pub fn query(
        &self,
        text: &str,
        specialty: Option<&str>,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StorageError> {
        let snapshot = self.snapshot()?;
        if snapshot.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(text)?;
        let specialty = specialty.map(|s| s.trim().to_lowercase());

        let mut scored: Vec<ScoredChunk> = snapshot
            .chunks
            .iter()
            .filter(|c| match &specialty {
                Some(wanted) => c.specialty == *wanted,
                None => true,
            })
            .map(|c| ScoredChunk {
                score: cosine_similarity(&query_embedding, &c.embedding_vector),
                chunk: Arc::clone(c),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.chunk.sequence.cmp(&b.chunk.sequence))
        });
        scored.truncate(k);

        tracing::debug!(
            generation = snapshot.generation,
            specialty = specialty.as_deref().unwrap_or("*"),
            returned = scored.len(),
            "Guideline index queried"
        );
        Ok(scored)
    }

    pub fn statistics(&self) -> Result<IndexStatistics, StorageError> {
        let snapshot = self.snapshot()?;
        let mut documents: BTreeMap<&str, &str> = BTreeMap::new();
        for chunk in &snapshot.chunks {
            documents.insert(
                chunk.source_document.as_str(),
                chunk.specialty.as_str(),
            );
        }

        let mut by_specialty = BTreeMap::new();
        for specialty in documents.values() {
            *by_specialty.entry(specialty.to_string()).or_insert(0) += 1;
        }

        Ok(IndexStatistics {
            status: if snapshot.is_empty() { "empty" } else { "active" },
            total_documents: documents.len(),
            total_chunks: snapshot.len(),
            by_specialty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::embedder::HashingEmbedder;

    fn index() -> GuidelineIndex {
        GuidelineIndex::new(Arc::new(HashingEmbedder::new()))
    }

    fn sepsis_doc() -> GuidelineDocument {
        GuidelineDocument::new(
            "surviving_sepsis.txt",
            Some("critical"),
            "Hour-1 Bundle: measure lactate level, remeasure lactate if initial lactate is \
             elevated, obtain blood cultures before administering antibiotics, administer \
             broad-spectrum antibiotics, begin rapid administration of 30 mL/kg crystalloid \
             for hypotension or lactate of 4 mmol/L or more.",
        )
    }

    fn afib_doc() -> GuidelineDocument {
        GuidelineDocument::new(
            "afib_management.txt",
            Some("cardiology"),
            "Atrial fibrillation: assess stroke risk with CHA2DS2-VASc, start anticoagulation \
             when indicated, and use beta blockers for rate control.",
        )
    }

    #[test]
    fn ingest_then_query_ranks_relevant_document_first() {
        let index = index();
        index.ingest(&sepsis_doc()).unwrap();
        index.ingest(&afib_doc()).unwrap();

        let results = index
            .query("septic shock lactate antibiotics blood cultures", None, 2)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_document(), "surviving_sepsis.txt");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn empty_index_returns_no_results() {
        let results = index().query("anything", None, 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn specialty_filter_restricts_candidates() {
        let index = index();
        index.ingest(&sepsis_doc()).unwrap();
        index.ingest(&afib_doc()).unwrap();

        let results = index.query("lactate antibiotics", Some("Cardiology"), 5).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.source_document() == "afib_management.txt"));

        let none = index.query("lactate", Some("oncology"), 5).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn equal_scores_break_ties_by_insertion_order() {
        let index = index();
        let text = "Obtain blood cultures before antibiotics.";
        index.ingest(&GuidelineDocument::new("zz_ingested_first.txt", None, text)).unwrap();
        index.ingest(&GuidelineDocument::new("aa_ingested_second.txt", None, text)).unwrap();

        let results = index.query("blood cultures", None, 2).unwrap();
        assert_eq!(results[0].score, results[1].score);
        assert_eq!(results[0].source_document(), "zz_ingested_first.txt");
        assert_eq!(results[1].source_document(), "aa_ingested_second.txt");
    }

    #[test]
    fn query_is_reproducible() {
        let index = index();
        index.ingest(&sepsis_doc()).unwrap();
        index.ingest(&afib_doc()).unwrap();

        let ids = |results: Vec<ScoredChunk>| {
            results.into_iter().map(|r| r.chunk.id.clone()).collect::<Vec<_>>()
        };
        let first = ids(index.query("lactate", None, 10).unwrap());
        let second = ids(index.query("lactate", None, 10).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn reingest_replaces_previous_chunks() {
        let index = index();
        index.ingest(&sepsis_doc()).unwrap();
        let updated = GuidelineDocument::new("surviving_sepsis.txt", Some("critical"), "Updated text.");
        index.ingest(&updated).unwrap();

        let snapshot = index.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.chunks()[0].text, "Updated text.");
        assert_eq!(snapshot.generation(), 2);
    }

    #[test]
    fn empty_document_is_an_error() {
        let err = index()
            .ingest(&GuidelineDocument::new("blank.txt", None, "  \n "))
            .unwrap_err();
        assert!(matches!(err, StorageError::EmptyDocument(ref s) if s == "blank.txt"));
    }

    #[test]
    fn rebuild_tolerates_per_document_failures() {
        let index = index();
        let loaded = LoadedGuidelines {
            documents: vec![
                sepsis_doc(),
                GuidelineDocument::new("blank.txt", None, ""),
                afib_doc(),
                GuidelineDocument::new("surviving_sepsis.txt", None, "duplicate"),
            ],
            failures: vec![IngestFailure {
                source_document: "scan.pdf".into(),
                reason: "unreadable".into(),
            }],
        };

        let report = index.rebuild(loaded).unwrap();
        assert_eq!(report.indexed.len(), 2);
        let failed: Vec<_> = report.failures.iter().map(|f| f.source_document.as_str()).collect();
        assert_eq!(failed, vec!["scan.pdf", "blank.txt", "surviving_sepsis.txt"]);
        assert_eq!(index.snapshot().unwrap().documents().len(), 2);
    }

    #[test]
    fn rebuild_discards_previous_generation() {
        let index = index();
        index.ingest(&afib_doc()).unwrap();
        index
            .rebuild(LoadedGuidelines {
                documents: vec![sepsis_doc()],
                failures: vec![],
            })
            .unwrap();
        let docs: Vec<String> = index
            .snapshot()
            .unwrap()
            .documents()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(docs, vec!["surviving_sepsis.txt".to_string()]);
    }

    #[test]
    fn readers_never_observe_a_half_built_index() {
        let chunker = GuidelineChunker::with_params(20, 2, 3);
        let index = Arc::new(GuidelineIndex::with_chunker(
            Arc::new(HashingEmbedder::new()),
            chunker,
        ));
        let long = |name: &str, word: &str| {
            GuidelineDocument::new(name, None, &format!("{word} ").repeat(400))
        };
        index
            .rebuild(LoadedGuidelines {
                documents: vec![long("old.txt", "old")],
                failures: vec![],
            })
            .unwrap();
        let old_len = index.snapshot().unwrap().len();

        let reader = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                let mut observed = Vec::new();
                for _ in 0..200 {
                    let snap = index.snapshot().unwrap();
                    let docs: Vec<String> = snap.documents().into_iter().map(String::from).collect();
                    observed.push((docs, snap.len()));
                }
                observed
            })
        };

        index
            .rebuild(LoadedGuidelines {
                documents: vec![long("new_a.txt", "alpha"), long("new_b.txt", "beta")],
                failures: vec![],
            })
            .unwrap();
        let new_len = index.snapshot().unwrap().len();

        for (docs, len) in reader.join().unwrap() {
            let is_old = docs == vec!["old.txt".to_string()] && len == old_len;
            let is_new = docs == vec!["new_a.txt".to_string(), "new_b.txt".to_string()]
                && len == new_len;
            assert!(is_old || is_new, "observed partial index: {docs:?} ({len} chunks)");
        }
    }

    #[test]
    fn statistics_group_documents_by_specialty() {
        let index = index();
        assert_eq!(index.statistics().unwrap().status, "empty");

        index.ingest(&sepsis_doc()).unwrap();
        index.ingest(&afib_doc()).unwrap();
        index
            .ingest(&GuidelineDocument::new("untagged.txt", None, "General advice text."))
            .unwrap();

        let stats = index.statistics().unwrap();
        assert_eq!(stats.status, "active");
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.by_specialty["critical"], 1);
        assert_eq!(stats.by_specialty["cardiology"], 1);
        assert_eq!(stats.by_specialty["general"], 1);
    }

    #[test]
    fn untagged_documents_are_queryable_as_general() {
        let index = index();
        index.ingest(&sepsis_doc()).unwrap();
        index
            .ingest(&GuidelineDocument::new("untagged.txt", None, "General advice on lactate."))
            .unwrap();
        index
            .ingest(&GuidelineDocument::new("blank.txt", Some("  "), "More lactate advice."))
            .unwrap();

        let results = index.query("lactate", Some("general"), 10).unwrap();
        let sources: BTreeSet<&str> = results.iter().map(|r| r.source_document()).collect();
        assert_eq!(sources, BTreeSet::from(["untagged.txt", "blank.txt"]));
        assert_eq!(index.statistics().unwrap().by_specialty["general"], 2);
    }
}
