use crate::chunk::{KnowledgeChunk, Query};
use crate::scorer::{OverlapScorer, Scorer};
use crate::segmenter::{DeclarationSegmenter, HeadingSegmenter, Segmenter};
use responder_core::KnowledgeError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub files: usize,
    pub chunks: usize,
    pub has_instruction: bool,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk<'a> {
    pub score: f64,
    pub chunk: &'a KnowledgeChunk,
}

/// In-memory reference index over a flat folder of `.md` and `.js` files.
pub struct KnowledgeIndex {
    source: PathBuf,
    instruction_file: String,
    instruction: String,
    chunks: Vec<KnowledgeChunk>,
    loaded: bool,
    segmenters: Vec<Box<dyn Segmenter>>,
    scorer: Box<dyn Scorer>,
}

impl KnowledgeIndex {
    pub fn new(source: impl Into<PathBuf>, instruction_file: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            instruction_file: instruction_file.into(),
            instruction: String::new(),
            chunks: Vec::new(),
            loaded: false,
            segmenters: vec![
                Box::new(HeadingSegmenter),
                Box::new(DeclarationSegmenter::default()),
            ],
            scorer: Box::new(OverlapScorer::default()),
        }
    }

    pub fn with_scorer(mut self, scorer: impl Scorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    /// Replaces the segmenter registered for the same extension, if any.
    pub fn with_segmenter(mut self, segmenter: impl Segmenter + 'static) -> Self {
        self.segmenters
            .retain(|s| s.extension() != segmenter.extension());
        self.segmenters.push(Box::new(segmenter));
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn chunks(&self) -> &[KnowledgeChunk] {
        &self.chunks
    }

    pub fn instruction(&self) -> &str {
        self.instruction.trim()
    }

    /// Whether `extension` (without the dot) is an indexable content kind.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        let ext = extension.to_ascii_lowercase();
        self.segmenters.iter().any(|s| s.extension() == ext)
    }

    /// Rebuilds the index from scratch. On error the index is left empty and
    /// unloaded.
    pub fn load(&mut self) -> Result<LoadSummary, KnowledgeError> {
        self.loaded = false;
        self.instruction.clear();
        self.chunks.clear();

        if !self.source.is_dir() {
            return Err(KnowledgeError::SourceNotFound {
                path: self.source.display().to_string(),
            });
        }

        let files = self.list_files()?;
        let instruction_name = self.instruction_file.to_lowercase();

        for path in &files {
            let name = file_name(path);
            let raw = match std::fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Failed to read knowledge file {}: {}", path.display(), e);
                    continue;
                }
            };

            if name.to_lowercase() == instruction_name {
                self.instruction = raw.trim().to_string();
                continue;
            }
            if raw.trim().is_empty() {
                continue;
            }

            let Some(segmenter) = self.segmenter_for(path) else {
                continue;
            };
            let before = self.chunks.len();
            self.chunks.extend(
                segmenter
                    .split(&raw)
                    .into_iter()
                    .filter_map(|section| KnowledgeChunk::from_section(&name, section)),
            );
            debug!("Indexed {} ({} chunks)", name, self.chunks.len() - before);
        }

        self.loaded = true;
        let summary = LoadSummary {
            files: files.len(),
            chunks: self.chunks.len(),
            has_instruction: !self.instruction.is_empty(),
        };
        info!(
            "Knowledge loaded: instruction={}, chunks={}",
            if summary.has_instruction { "yes" } else { "no" },
            summary.chunks
        );
        Ok(summary)
    }

    fn list_files(&self) -> Result<Vec<PathBuf>, KnowledgeError> {
        let entries = std::fs::read_dir(&self.source).map_err(|e| KnowledgeError::ReadFailed {
            path: self.source.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.segmenter_for(path).is_some())
            .collect();
        files.sort_by_key(|path| file_name(path).to_lowercase());
        Ok(files)
    }

    fn segmenter_for(&self, path: &Path) -> Option<&dyn Segmenter> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.segmenters
            .iter()
            .find(|s| s.extension() == ext)
            .map(|s| s.as_ref())
    }

    /// Top `top_k` chunks by score, highest first. Ties keep load order.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<ScoredChunk<'_>> {
        if !self.loaded || self.chunks.is_empty() {
            return Vec::new();
        }
        let Some(query) = Query::parse(query) else {
            return Vec::new();
        };

        let mut scored: Vec<ScoredChunk<'_>> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                self.scorer
                    .score(&query, chunk)
                    .map(|score| ScoredChunk { score, chunk })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k.max(1));
        scored
    }

    /// Formatted reference blocks for the best matches, or an empty string.
    pub fn retrieve_context(&self, query: &str, top_k: usize) -> String {
        self.retrieve(query, top_k)
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "--- Reference {} (source: knowledge, score: {:.1}) ---\nFile: {}\nSection: {}\n\n{}",
                    i + 1,
                    hit.score,
                    hit.chunk.source_file,
                    hit.chunk.section_title,
                    hit.chunk.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "policies.md",
            "# Refunds\npolicy allows refunds within 30 days\n\n# Shipping\norders ship within two business days of payment\n",
        );
        write(
            dir.path(),
            "commands.js",
            "function onMessage(msg) {\n  if (msg.content === '!refund') reply('see the refund policy page');\n}\n",
        );
        write(dir.path(), "Instruction.md", "You are the cafe's helpful staff member.");
        write(dir.path(), "notes.txt", "refund refund refund refund refund refund refund");
        dir
    }

    #[test]
    fn test_load_indexes_supported_files_and_instruction() {
        let dir = fixture();
        let mut index = KnowledgeIndex::new(dir.path(), "instruction.md");
        let summary = index.load().unwrap();

        assert_eq!(summary.files, 3);
        assert!(summary.has_instruction);
        assert_eq!(index.instruction(), "You are the cafe's helpful staff member.");
        assert!(index.chunks().iter().all(|c| c.source_file != "notes.txt"));
        assert!(index.chunks().iter().all(|c| c.source_file != "Instruction.md"));
        assert!(index.chunks().iter().all(|c| !c.tokens.is_empty()));
        assert!(index.accepts_extension("MD"));
        assert!(!index.accepts_extension("txt"));
    }

    #[test]
    fn test_refund_query_finds_refund_section() {
        let dir = fixture();
        let mut index = KnowledgeIndex::new(dir.path(), "instruction.md");
        index.load().unwrap();

        let context = index.retrieve_context("refund policy", 4);
        assert!(context.contains("policy allows refunds within 30 days"));
        assert!(context.contains("Section: Refunds"));

        assert_eq!(index.retrieve_context("unrelated topic xyz", 4), "");
        assert_eq!(index.retrieve_context("   ", 4), "");
    }

    #[test]
    fn test_retrieve_is_bounded_and_sorted() {
        let dir = fixture();
        let mut index = KnowledgeIndex::new(dir.path(), "instruction.md");
        index.load().unwrap();

        let hits = index.retrieve("refund policy within days", 2);
        assert!(hits.len() <= 2);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.score > 0.0));

        // k = 0 still returns the single best match
        assert_eq!(index.retrieve("refund policy", 0).len(), 1);
    }

    #[test]
    fn test_reload_is_deterministic() {
        let dir = fixture();
        let mut index = KnowledgeIndex::new(dir.path(), "instruction.md");
        index.load().unwrap();
        let first = index.retrieve_context("refund policy within days", 4);

        index.load().unwrap();
        let second = index.retrieve_context("refund policy within days", 4);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_missing_source_leaves_index_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = KnowledgeIndex::new(dir.path().join("missing"), "instruction.md");
        assert!(matches!(
            index.load(),
            Err(KnowledgeError::SourceNotFound { .. })
        ));
        assert!(!index.is_loaded());
        assert_eq!(index.retrieve_context("refund", 4), "");
    }

    #[test]
    fn test_unloaded_index_returns_empty() {
        let index = KnowledgeIndex::new("unused", "instruction.md");
        assert!(index.retrieve("refund policy", 3).is_empty());
    }
}
