//! Script-aware title keywords for lexical duplicate detection.
//!
//! Latin text splits on non-alphanumerics; CJK runs have no spaces, so they
//! become overlapping character bigrams; Thai runs are kept whole.

use std::collections::HashSet;

/// Upper bound on keywords taken from one title.
pub const MAX_KEYWORDS: usize = 16;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "an", "and", "are", "as", "at", "be", "been", "but", "by",
    "can", "could", "for", "from", "has", "have", "how", "in", "into", "is", "it", "its",
    "just", "more", "new", "now", "of", "on", "or", "out", "over", "says", "than", "that",
    "the", "their", "this", "to", "up", "vs", "was", "were", "what", "when", "why", "will",
    "with",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cjk,
    Thai,
    Separator,
}

fn script_of(c: char) -> Script {
    match c as u32 {
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF => {
            Script::Cjk
        }
        0x0E00..=0x0E7F => Script::Thai,
        _ if c.is_alphanumeric() => Script::Latin,
        _ => Script::Separator,
    }
}

fn is_year(token: &str) -> bool {
    token.len() == 4
        && token.chars().all(|c| c.is_ascii_digit())
        && (token.starts_with("19") || token.starts_with("20"))
}

/// Letters and digits mixed, e.g. "x5", "id4", "mg4", "gr86".
fn is_model_token(token: &str) -> bool {
    token.chars().any(|c| c.is_alphabetic()) && token.chars().any(|c| c.is_numeric())
}

fn keep_latin(token: &str) -> bool {
    if is_year(token) || is_model_token(token) {
        return true;
    }
    if token.chars().all(|c| c.is_numeric()) {
        return false;
    }
    token.chars().count() >= 2 && !STOP_WORDS.contains(&token)
}

fn push_unique(out: &mut Vec<String>, token: String) {
    if !out.contains(&token) {
        out.push(token);
    }
}

fn flush(out: &mut Vec<String>, script: Script, run: &mut String) {
    if run.is_empty() {
        return;
    }
    match script {
        Script::Latin => {
            if keep_latin(run) {
                push_unique(out, run.clone());
            }
        }
        Script::Cjk => {
            let chars: Vec<char> = run.chars().collect();
            if chars.len() == 1 {
                push_unique(out, run.clone());
            } else {
                for pair in chars.windows(2) {
                    push_unique(out, pair.iter().collect());
                }
            }
        }
        Script::Thai => {
            if run.chars().count() >= 2 {
                push_unique(out, run.clone());
            }
        }
        Script::Separator => {}
    }
    run.clear();
}

/// Keywords of a title in first-seen order, at most [`MAX_KEYWORDS`].
///
/// A `-` or `.` between two Latin characters joins them, so "e-tron" and
/// "ID.4" become "etron" and "id4".
pub fn extract_keywords(title: &str) -> Vec<String> {
    let lowered = title.to_lowercase();
    let mut out = Vec::new();
    let mut run = String::new();
    let mut current = Script::Separator;
    let mut chars = lowered.chars().peekable();

    while let Some(c) = chars.next() {
        let script = script_of(c);
        if script == Script::Separator
            && current == Script::Latin
            && (c == '-' || c == '.')
            && chars.peek().is_some_and(|n| script_of(*n) == Script::Latin)
        {
            continue;
        }
        if script != current {
            flush(&mut out, current, &mut run);
            current = script;
        }
        if script != Script::Separator {
            run.push(c);
        }
    }
    flush(&mut out, current, &mut run);

    out.truncate(MAX_KEYWORDS);
    out
}

/// Jaccard similarity of two keyword lists. Empty inputs score 0.0.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Lowercased title with whitespace runs collapsed to one space.
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Keyword overlap between two titles.
///
/// Titles equal after [`normalize_title`] score 1.0 even when every token is
/// a stop word. Blank titles never match anything, including each other.
pub fn keyword_overlap(a: &str, b: &str) -> f64 {
    let normalized = normalize_title(a);
    if !normalized.is_empty() && normalized == normalize_title(b) {
        return 1.0;
    }
    jaccard(&extract_keywords(a), &extract_keywords(b))
}
