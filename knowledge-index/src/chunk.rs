use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Chunks whose normalized text is shorter than this carry too little context.
pub const MIN_CHUNK_CHARS: usize = 40;

/// Minimum token length, in characters.
const MIN_TOKEN_CHARS: usize = 2;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9A-Za-z가-힣_./:-]+").expect("static token pattern"))
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}

/// Collapses whitespace runs to a single space and lower-cases.
pub fn normalize(text: &str) -> String {
    whitespace_pattern()
        .replace_all(text, " ")
        .trim()
        .to_lowercase()
}

pub fn tokenize(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// A titled slice of a source document, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub body: String,
}

impl Section {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub source_file: String,
    pub section_title: String,
    pub text: String,
    pub normalized: String,
    pub tokens: HashSet<String>,
}

impl KnowledgeChunk {
    /// Builds a chunk, or `None` when the section is too short or yields no
    /// tokens.
    pub fn from_section(source_file: &str, section: Section) -> Option<Self> {
        let normalized = normalize(&section.body);
        if normalized.chars().count() < MIN_CHUNK_CHARS {
            return None;
        }
        let tokens = tokenize(&section.body);
        if tokens.is_empty() {
            return None;
        }
        Some(Self {
            source_file: source_file.to_string(),
            section_title: section.title,
            text: section.body.trim().to_string(),
            normalized,
            tokens,
        })
    }
}

/// A query prepared once and scored against every chunk.
#[derive(Debug, Clone)]
pub struct Query {
    pub normalized: String,
    pub tokens: HashSet<String>,
}

impl Query {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        Some(Self {
            normalized,
            tokens: tokenize(raw),
        })
    }

    /// First `n` characters of the normalized query.
    pub fn prefix(&self, n: usize) -> &str {
        match self.normalized.char_indices().nth(n) {
            Some((idx, _)) => &self.normalized[..idx],
            None => &self.normalized,
        }
    }
}
