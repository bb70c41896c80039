//! Text normalisation: deterministic cleanup of raw OCR output.
//!
//! OCR engines and vision models both emit noise that has nothing to do
//! with the document: stray control bytes, Windows line endings, runs of
//! spaces where columns used to be, zero-width characters copied from the
//! PDF text layer. Every extracted string passes through
//! [`normalize_text`] before its length is judged or it is aggregated, so
//! the minimum-length checks count real characters only.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the control-character pass does
//! not have to special-case `\r`, and blank-line collapsing runs after
//! per-line trimming so whitespace-only lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules. Pure; no shared state.
///
/// 1. CRLF / CR → LF
/// 2. Strip control characters (except `\n`, `\t`) and invisible format
///    characters
/// 3. Collapse runs of horizontal whitespace to one space
/// 4. Trim every line
/// 5. Collapse 3+ consecutive newlines to a single blank line
/// 6. Trim the whole text
pub fn normalize_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_control_chars(&s);
    let s = collapse_horizontal_whitespace(&s);
    let s = trim_lines(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip control and invisible characters ──────────────────────────

fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{FEFF}' | '\u{00AD}' | '\u{200C}' | '\u{200D}' | '\u{2060}'
            )
        })
        .collect()
}

// ── Rule 3: Collapse horizontal whitespace ──────────────────────────────────

static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());

fn collapse_horizontal_whitespace(input: &str) -> String {
    RE_HSPACE.replace_all(input, " ").to_string()
}

// ── Rule 4: Trim every line ─────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse blank lines ────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}
