//! The `search`/`read` reference protocol on top of [`KnowledgeIndex`].

use crate::index::KnowledgeIndex;
use responder_core::KnowledgeError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const NO_MATCHES: &str = "No matching references found.";

pub struct ReferenceService {
    root: PathBuf,
    index: KnowledgeIndex,
}

impl ReferenceService {
    pub fn new(root: impl Into<PathBuf>, instruction_file: &str) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        let index = KnowledgeIndex::new(root.clone(), instruction_file);
        Self { root, index }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reloads the index and returns up to `top_k` references, cut to
    /// `max_chars` characters.
    pub fn search(&mut self, query: &str, top_k: usize, max_chars: usize) -> String {
        if let Err(e) = self.index.load() {
            warn!("Reference index reload failed: {}", e);
        }
        let top_k = top_k.clamp(1, 20);
        let max_chars = max_chars.clamp(500, 30_000);

        let context = self.index.retrieve_context(query, top_k);
        if context.is_empty() {
            return NO_MATCHES.to_string();
        }
        truncate_chars(&context, max_chars).to_string()
    }

    /// Numbered lines `start_line..start_line + max_lines` of a reference file.
    pub fn read(
        &self,
        file_name: &str,
        start_line: usize,
        max_lines: usize,
    ) -> Result<String, KnowledgeError> {
        let path = self.resolve(file_name)?;
        let bytes = std::fs::read(&path).map_err(|e| KnowledgeError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        if total == 0 {
            return Ok(format!("{name} is empty."));
        }

        let start = start_line.max(1);
        let max_lines = max_lines.clamp(1, 1000);
        let start_idx = (start - 1).min(total - 1);
        let end_idx = (start_idx + max_lines).min(total);

        let numbered = lines[start_idx..end_idx]
            .iter()
            .enumerate()
            .map(|(offset, line)| format!("{:4}: {}", start_idx + offset + 1, line))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!(
            "# {} ({}-{}/{})\n{}",
            name,
            start_idx + 1,
            end_idx,
            total,
            numbered
        ))
    }

    /// Resolves `file_name` inside the root. Anything that escapes the root,
    /// is not a regular file, or is not an indexable kind is rejected.
    fn resolve(&self, file_name: &str) -> Result<PathBuf, KnowledgeError> {
        let rejected = || KnowledgeError::PathRejected {
            file_name: file_name.to_string(),
        };
        if file_name.trim().is_empty() {
            return Err(rejected());
        }

        let candidate = self
            .root
            .join(file_name)
            .canonicalize()
            .map_err(|_| rejected())?;
        if !candidate.starts_with(&self.root) || !candidate.is_file() {
            debug!("Rejected reference path {}", file_name);
            return Err(rejected());
        }

        let extension = candidate
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !self.index.accepts_extension(extension) {
            return Err(rejected());
        }
        Ok(candidate)
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
