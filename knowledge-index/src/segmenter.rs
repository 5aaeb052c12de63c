//! Splitting strategies for reference documents.

use crate::chunk::Section;
use regex::Regex;

pub const DEFAULT_MAX_SECTION_CHARS: usize = 2200;

pub trait Segmenter: Send + Sync {
    /// Lower-case file extension this segmenter handles, without the dot.
    fn extension(&self) -> &'static str;

    fn split(&self, text: &str) -> Vec<Section>;
}

/// Splits markdown on `#`, `##` and `###` heading lines. Each section keeps
/// its heading line in the body and uses the heading text as title.
#[derive(Debug, Default)]
pub struct HeadingSegmenter;

impl Segmenter for HeadingSegmenter {
    fn extension(&self) -> &'static str {
        "md"
    }

    fn split(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut title = "section".to_string();
        let mut lines: Vec<&str> = Vec::new();

        for line in text.lines() {
            let stripped = line.trim();
            if is_heading(stripped) {
                push_section(&mut sections, &title, &lines);
                let heading = stripped.trim_start_matches('#').trim();
                title = if heading.is_empty() {
                    "section".to_string()
                } else {
                    heading.to_string()
                };
                lines = vec![line];
                continue;
            }
            lines.push(line);
        }
        push_section(&mut sections, &title, &lines);
        sections
    }
}

fn is_heading(line: &str) -> bool {
    line.starts_with("# ") || line.starts_with("## ") || line.starts_with("### ")
}

fn push_section(sections: &mut Vec<Section>, title: &str, lines: &[&str]) {
    let body = lines.join("\n");
    let body = body.trim();
    if !body.is_empty() {
        sections.push(Section::new(title, body));
    }
}

/// Splits script sources on top-level `function`, `class` and
/// `const`/`let`/`var` declarations, with a size cap as a secondary split.
#[derive(Debug)]
pub struct DeclarationSegmenter {
    max_chars: usize,
    marker: Regex,
}

impl DeclarationSegmenter {
    pub fn new(max_chars: usize) -> Self {
        let marker = Regex::new(
            r"^\s*(?:function\s+([A-Za-z_][A-Za-z0-9_]*)|class\s+([A-Za-z_][A-Za-z0-9_]*)|(?:const|let|var)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=)",
        )
        .expect("static declaration pattern");
        Self {
            max_chars: max_chars.max(1),
            marker,
        }
    }

    fn declared_name<'a>(&self, line: &'a str) -> Option<&'a str> {
        let caps = self.marker.captures(line)?;
        Some(
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("code"),
        )
    }
}

impl Default for DeclarationSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SECTION_CHARS)
    }
}

impl Segmenter for DeclarationSegmenter {
    fn extension(&self) -> &'static str {
        "js"
    }

    fn split(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut title = "code".to_string();
        let mut lines: Vec<&str> = Vec::new();
        let mut size = 0usize;

        for line in text.lines() {
            if let Some(name) = self.declared_name(line) {
                if !lines.is_empty() {
                    push_section(&mut sections, &title, &lines);
                    lines.clear();
                    size = 0;
                }
                title = format!("js::{name}");
            }

            lines.push(line);
            size += line.chars().count() + 1;
            if size >= self.max_chars {
                push_section(&mut sections, &title, &lines);
                lines.clear();
                size = 0;
                title = "js::chunk".to_string();
            }
        }
        push_section(&mut sections, &title, &lines);

        if sections.is_empty() && !text.trim().is_empty() {
            sections.push(Section::new("js::all", text.trim()));
        }
        sections
    }
}
