//! Minimal post/comment HTML to plain text.
//!
//! Not a renderer: block tags become line breaks, scripts and styles are
//! dropped, images and links keep a short textual trace, everything else
//! loses its markup.

use regex::Regex;
use std::sync::OnceLock;

fn drop_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>")
            .expect("static regex")
    })
}

fn image_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<img\b[^>]*>").expect("static regex")
    })
}

fn alt_attr() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\balt\s*=\s*"([^"]*)""#).expect("static regex"))
}

fn anchor_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*"([^"]*)"[^>]*>(.*?)</a>"#).expect("static regex")
    })
}

fn line_break_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(br|p|div|li|h[1-6])\b[^>]*>").expect("static regex"))
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"))
}

fn inline_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\S\n]+").expect("static regex"))
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Plain text for an article body.
pub fn to_plain_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let text = drop_blocks().replace_all(html, "");
    let text = image_tag().replace_all(&text, |caps: &regex::Captures<'_>| {
        let alt = alt_attr()
            .captures(&caps[0])
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|alt| !alt.is_empty());
        match alt {
            Some(alt) => format!("[image: {alt}]"),
            None => "[image]".to_string(),
        }
    });
    let text = anchor_tag().replace_all(&text, |caps: &regex::Captures<'_>| {
        let href = caps.get(1).map_or("", |m| m.as_str());
        let label = any_tag().replace_all(caps.get(2).map_or("", |m| m.as_str()), "");
        let label = label.trim();
        if label.is_empty() || label == href {
            href.to_string()
        } else {
            format!("{label} ({href})")
        }
    });
    let text = line_break_tag().replace_all(&text, "\n");
    let text = any_tag().replace_all(&text, "");

    tidy(&decode_entities(&text))
}

/// Comments are mostly plain text but may carry entities or stray tags.
pub fn clean_comment(content: &str) -> String {
    let text = line_break_tag().replace_all(content, "\n");
    let text = any_tag().replace_all(&text, "");
    tidy(&decode_entities(&text))
}

fn tidy(text: &str) -> String {
    let text: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect();
    let text = inline_space().replace_all(&text, " ");
    let text = blank_runs().replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Decodes the named entities the editor emits plus numeric references.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_markup_becomes_lines() {
        let html = r#"<div class="se-main"><p>How do I get a refund?</p><p>Order&nbsp;#12 &amp; #13</p><script>track()</script><br><img src="x.png" alt="receipt"></div>"#;
        assert_eq!(
            to_plain_text(html),
            "How do I get a refund?\nOrder #12 & #13\n[image: receipt]"
        );
    }

    #[test]
    fn test_links_keep_target() {
        let html = r#"<p>see <a href="https://example.com/faq">the FAQ</a></p>"#;
        assert_eq!(to_plain_text(html), "see the FAQ (https://example.com/faq)");
    }

    #[test]
    fn test_comment_entities_decoded() {
        assert_eq!(clean_comment("it&#39;s &lt;fine&gt;"), "it's <fine>");
        assert_eq!(clean_comment("a &unknown; b"), "a &unknown; b");
        assert_eq!(clean_comment("&#xAC00;"), "가");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(to_plain_text("   "), "");
    }
}
