//! Deterministic Markdown clean-up.
//!
//! Two entry points:
//!
//! * [`tidy_markdown`] only normalises line endings, invisible characters and
//!   the document's outer blank lines. Indentation and blank lines inside the
//!   body are left alone, so indented code blocks from pandoc survive.
//! * [`clean_markdown`] additionally repairs the usual VLM quirks: outer
//!   code fences, heading spacing, tables without (or with too many)
//!   separator rows, and invented image links.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*?)\n```$").expect("valid regex"));
static RE_EXCESS_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").expect("valid regex"));

const INVISIBLE: [char; 6] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

const PLACEHOLDER_HOSTS: [&str; 6] = [
    "example.com",
    "placeholder.com",
    "placehold.it",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
];

/// Line-ending and invisible-character normalisation.
pub fn tidy_markdown(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n").replace(INVISIBLE, "");
    let body = s.trim_start_matches('\n').trim_end();
    if body.trim().is_empty() {
        "\n".to_string()
    } else {
        format!("{body}\n")
    }
}

/// Full clean-up for VLM output.
pub fn clean_markdown(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = strip_outer_fence(&s);
    let s = s.replace(INVISIBLE, "");
    let s = s.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    let s = space_headings(&s);
    let s = repair_tables(&s);
    let s = drop_invented_images(&s);
    finish(&s)
}

/// Collapse runs of blank lines to one and end with a single newline.
fn finish(s: &str) -> String {
    let s = RE_EXCESS_BLANKS.replace_all(s.trim(), "\n\n");
    if s.is_empty() {
        "\n".to_string()
    } else {
        format!("{s}\n")
    }
}

fn strip_outer_fence(s: &str) -> String {
    let trimmed = s.trim();
    RE_OUTER_FENCE
        .captures(trimmed)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| s.to_string())
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Blank line before every heading that is not the first line.
fn space_headings(s: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_code = false;
    for line in s.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && is_heading(line) && out.last().is_some_and(|prev| !prev.is_empty()) {
            out.push("");
        }
        out.push(line);
    }
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    is_table_row(line)
        && line.contains('-')
        && line.trim().chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Exactly one separator per table, directly after the header row.
fn repair_tables(s: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut row = 0usize;
    for line in s.lines() {
        if !is_table_row(line) {
            row = 0;
            out.push(line.to_string());
            continue;
        }
        row += 1;
        match (row, is_separator_row(line)) {
            (2, true) => out.push(line.to_string()),
            (_, true) => row -= 1,
            (2, false) => {
                let cols = out
                    .last()
                    .map(|h| h.trim().matches('|').count().saturating_sub(1))
                    .unwrap_or(1)
                    .max(1);
                out.push(format!("|{}", " --- |".repeat(cols)));
                row += 1;
                out.push(line.to_string());
            }
            _ => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    !(u.starts_with("http://") || u.starts_with("https://")) || PLACEHOLDER_HOSTS.iter().any(|h| u.contains(h))
}

/// `![alt](fake)` → `*alt*`; real remote images are kept.
fn drop_invented_images(s: &str) -> String {
    RE_IMAGE
        .replace_all(s, |c: &regex::Captures<'_>| {
            if !is_placeholder_url(&c[2]) {
                return c[0].to_string();
            }
            let alt = c[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}
