//! Post-processing: deterministic cleanup of generated answers.
//!
//! Answers are shown as plain text (terminal, note store), so Markdown
//! emphasis markers are noise. Rules run in a fixed order: emphasis first,
//! then line endings, then whitespace, so later rules see clean input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Apply all cleanup rules to a raw model answer.
///
/// 1. Remove `**` and `*` emphasis markers
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive blank lines down to 1
/// 6. Trim the whole answer
pub fn clean_answer(input: &str) -> String {
    let s = strip_emphasis(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip emphasis markers ───────────────────────────────────────────

fn strip_emphasis(input: &str) -> String {
    input.replace("**", "").replace('*', "")
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Line structure ───────────────────────────────────────────────────────────

/// How one line of a cleaned answer should be presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum AnswerLine {
    /// A line ending in `:`, shown as a section heading.
    Heading(String),
    /// `1. ...`
    Numbered(String),
    /// `- ...` or `• ...`
    Bullet(String),
    Text(String),
    Blank,
}

static RE_NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.").unwrap());

/// Split an answer into presentational lines.
pub fn structure(answer: &str) -> Vec<AnswerLine> {
    answer
        .split('\n')
        .map(|line| {
            let t = line.trim();
            if t.is_empty() {
                AnswerLine::Blank
            } else if t.ends_with(':') {
                AnswerLine::Heading(t.to_string())
            } else if RE_NUMBERED.is_match(t) {
                AnswerLine::Numbered(t.to_string())
            } else if t.starts_with('-') || t.starts_with('•') {
                AnswerLine::Bullet(t.to_string())
            } else {
                AnswerLine::Text(t.to_string())
            }
        })
        .collect()
}
