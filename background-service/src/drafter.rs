//! Seams between the polling loop and reply generation.

use async_trait::async_trait;
use knowledge_index::KnowledgeIndex;
use llm_interface::prompt::char_prefix;
use llm_interface::{ReferenceLookup, ReplyOrchestrator, TranscriptEntry};
use responder_core::KnowledgeError;

/// Produces comment text. An empty string means generation failed.
#[async_trait]
pub trait ReplyDrafter: Send + Sync {
    async fn draft_reply(&self, subject: &str, body: &str) -> String;

    async fn draft_followup(
        &self,
        subject: &str,
        body: &str,
        transcript: &[TranscriptEntry],
        commenter: &str,
        comment: &str,
    ) -> String;
}

#[async_trait]
impl ReplyDrafter for ReplyOrchestrator {
    async fn draft_reply(&self, subject: &str, body: &str) -> String {
        self.generate_reply(subject, body).await
    }

    async fn draft_followup(
        &self,
        subject: &str,
        body: &str,
        transcript: &[TranscriptEntry],
        commenter: &str,
        comment: &str,
    ) -> String {
        self.generate_followup(subject, body, transcript, commenter, comment)
            .await
    }
}

/// Answers the model's reference tool from an index loaded at startup.
pub struct IndexLookup {
    index: KnowledgeIndex,
    top_k: usize,
}

impl IndexLookup {
    pub fn new(index: KnowledgeIndex, top_k: usize) -> Self {
        Self { index, top_k }
    }

    pub fn index(&self) -> &KnowledgeIndex {
        &self.index
    }
}

#[async_trait]
impl ReferenceLookup for IndexLookup {
    async fn lookup(&self, query: &str, max_chars: usize) -> Result<String, KnowledgeError> {
        let context = self.index.retrieve_context(query, self.top_k);
        Ok(char_prefix(&context, max_chars).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_index_lookup_respects_max_chars() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("refunds.md"),
            "# Refund policy\nRefunds are issued within 30 days of purchase to the original payment method.\n",
        )
        .unwrap();
        let mut index = KnowledgeIndex::new(dir.path(), "instruction.md");
        index.load().unwrap();
        let lookup = IndexLookup::new(index, 4);

        let full = lookup.lookup("refund policy", 20_000).await.unwrap();
        assert!(full.contains("Refunds are issued within 30 days"));

        let cut = lookup.lookup("refund policy", 10).await.unwrap();
        assert_eq!(cut.chars().count(), 10);

        assert_eq!(lookup.lookup("   ", 1000).await.unwrap(), "");
    }
}
