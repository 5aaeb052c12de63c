use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

pub const DEFAULT_MAX_COMMENT_CHARS: usize = 2900;
pub const TRUNCATION_NOTICE: &str =
    "\n\n(The answer was long, so it was shortened. Feel free to ask a follow-up question.)";

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"))
}

fn stray_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?(?:think|analysis|verification)>").expect("static regex"))
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Turns raw model output into comment text.
///
/// Reasoning markup is removed, blank-line runs are collapsed, and text over
/// `max_chars` characters is cut at the last sentence or line end inside the
/// final 30% of the window, then marked with [`TRUNCATION_NOTICE`].
pub fn clean_reply(text: &str, max_chars: usize) -> String {
    let text = think_block().replace_all(text, "");
    let text = stray_tag().replace_all(&text, "");
    let text = blank_runs().replace_all(text.trim(), "\n\n").into_owned();

    if text.chars().count() <= max_chars {
        return text;
    }

    let mut window: String = text.chars().take(max_chars).collect();
    if let Some(cut) = window.rfind(|c: char| c == '.' || c == '\n') {
        let cut_chars = window[..cut].chars().count();
        if cut_chars as f64 > max_chars as f64 * 0.7 {
            // keep the boundary character itself
            window.truncate(cut + 1);
        }
    }
    warn!("Reply trimmed to {} chars", max_chars);
    window.push_str(TRUNCATION_NOTICE);
    window
}
