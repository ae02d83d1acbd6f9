//! Text normalization for inbound messages and model output.
//!
//! Chat transports and model replies both carry noise: a leading
//! `[timestamp] speaker: ` echo, Windows line endings, zero-width and
//! directional marks, exotic space characters, stray control bytes, and
//! runs of blank lines. [`normalize`] turns such text into one canonical
//! form or reports that nothing meaningful is left.
//!
//! Pipeline (fixed order):
//! 1. strip a metadata prefix anchored at the very start
//! 2. `\r\n` and `\r` → `\n`
//! 3. drop invisible code points, map space variants to ` `, map line and
//!    paragraph separators to `\n` / `\n\n`
//! 4. remaining ASCII control characters → ` `
//! 5. per line: collapse whitespace runs, trim
//! 6. three or more newlines → two
//! 7. trim the whole string
//!
//! If the result still starts with a metadata prefix (for example a doubled
//! echo), the pipeline runs again, so `normalize` is idempotent.

use banter_core::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

static METADATA_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?(?:Z|[+-]\d{2}(?::?\d{2})?)?)?\][ \t]+[^\n]*?:(?: |$)",
    )
    .expect("metadata prefix regex is valid")
});

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline regex is valid"));

/// Normalize `input` into canonical text.
///
/// Fails with [`ValidationError::EmptyInput`] for an empty string and
/// [`ValidationError::EmptyResult`] when nothing but metadata, whitespace,
/// or control characters remains.
pub fn normalize(input: &str) -> Result<String, ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    // Each rerun strips a non-empty prefix, so the text shrinks every pass.
    let mut text = run_pipeline(input);
    while METADATA_PREFIX.is_match(&text) {
        text = run_pipeline(&text);
    }

    if text.is_empty() {
        Err(ValidationError::EmptyResult)
    } else {
        Ok(text)
    }
}

fn run_pipeline(input: &str) -> String {
    let stripped = strip_metadata_prefix(input);
    let unified = normalize_line_endings(stripped);
    let visible = replace_format_chars(&unified);
    let clean = replace_control_chars(&visible);
    let lines = collapse_lines(&clean);
    let collapsed = EXCESS_NEWLINES.replace_all(&lines, "\n\n");
    collapsed.trim().to_string()
}

fn strip_metadata_prefix(text: &str) -> &str {
    match METADATA_PREFIX.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn replace_format_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            // zero-width joiner, word joiner, BOM, soft hyphen
            '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}' => {}
            // directional marks, embeddings, overrides, isolates
            '\u{200E}' | '\u{200F}' | '\u{061C}' | '\u{202A}'..='\u{202E}'
            | '\u{2066}'..='\u{2069}' => {}
            // invisible math operators
            '\u{2061}'..='\u{2064}' => {}
            // space variants, zero-width space and non-joiner
            '\u{00A0}' | '\u{2000}'..='\u{200C}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => {
                out.push(' ')
            }
            '\u{2028}' => out.push('\n'),
            '\u{2029}' => out.push_str("\n\n"),
            _ => out.push(c),
        }
    }
    out
}

fn replace_control_chars(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}' => ' ',
            _ => c,
        })
        .collect()
}

fn collapse_lines(text: &str) -> String {
    text.split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}
