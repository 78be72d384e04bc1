//! Normalisation: raw model output → canonical `${...}$` text.
//!
//! ## Why is normalisation necessary?
//!
//! The prompt asks for one math convention, but vision models drift. A single
//! reply can mix `\( \)`, `\[ \]`, `$$ $$`, bare `$ $`, back-tick code spans
//! holding formulas, and the canonical `${ }$` form. It may also arrive
//! wrapped in a code fence. Everything downstream (the binder, the
//! materializer, and the MathType conversion the user runs in Word) expects
//! exactly one form, so every reply goes through [`normalize`].
//!
//! ## Why a segment scanner instead of chained regex replacements?
//!
//! Chained global replacements (`\(`→`$`, then `$$`→`$`, then `$x$`→`${x}$`)
//! are order-sensitive: a canonical `${a}$${b}$` pair turns into garbage once
//! `$$` is collapsed. Here the text is split once into text and math segments,
//! recognising every delimiter form at the same scan position in a fixed
//! priority order. Math segments are then rendered in the canonical form.
//!
//! ## Idempotence
//!
//! [`normalize`] re-runs the pass until the output stops changing, so
//! `normalize(normalize(x)) == normalize(x)` holds for every input.

use crate::binder::IMAGE_TOKEN;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Upper bound on fixed-point passes. Real replies settle in one or two.
const MAX_PASSES: usize = 8;

/// Normalise raw model output into canonical text.
///
/// Pure and deterministic. Never fails: unrecognised or unbalanced delimiters
/// pass through as literal text.
///
/// Rules (applied in order on each pass):
/// 1. Normalise line endings (CRLF/CR → LF)
/// 2. Strip outer code fences (optional language tag)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 4. Trim trailing whitespace per line
/// 5. Resolve back-tick code spans (unwrap, promote to math, or plain text)
/// 6. Collapse blank-line runs to a single line break
/// 7. Strip bold markers
/// 8. Split into text/math segments and render math as `${content}$`
///    with whitespace around `-` removed
/// 9. Trim the document
pub fn normalize(raw: &str) -> String {
    let mut current = normalize_once(raw);
    for pass in 1..MAX_PASSES {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        debug!("normalize: pass {} changed output", pass + 1);
        current = next;
    }
    current
}

fn normalize_once(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_code_fences(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = resolve_backticks(&s);
    let s = collapse_blank_lines(&s);
    let s = strip_bold(&s);
    let s = render_segments(&split_math(&s));
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[A-Za-z0-9_+\-]*[ \t]*(?:\n|$)").unwrap());

static RE_TRAILING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\n)[ \t]*```\s*$").unwrap());

/// Leading and trailing fences are stripped independently; models sometimes
/// open a fence and never close it.
fn strip_code_fences(input: &str) -> String {
    let s = RE_LEADING_FENCE.replace(input, "");
    RE_TRAILING_FENCE.replace(&s, "").into_owned()
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Resolve back-tick code spans ─────────────────────────────────────

/// Characters that mark a code span as a formula rather than prose.
static RE_MATHY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9=+\-\\^_{}<>]").unwrap());

/// Pair single back ticks on the same line. Runs of two or more back ticks
/// are left alone.
fn resolve_backticks(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('`') {
        let run = rest[pos..].bytes().take_while(|&b| b == b'`').count();
        if run > 1 {
            out.push_str(&rest[..pos + run]);
            rest = &rest[pos + run..];
            continue;
        }

        let after = &rest[pos + 1..];
        let line_end = after.find('\n').unwrap_or(after.len());
        match after[..line_end].find('`') {
            Some(close) if close > 0 && !after[close + 1..].starts_with('`') => {
                out.push_str(&rest[..pos]);
                out.push_str(&resolve_code_span(&after[..close]));
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..pos + 1]);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn resolve_code_span(inner: &str) -> String {
    let trimmed = inner.trim();
    if is_math_delimited(trimmed) {
        return trimmed.to_string();
    }
    if !trimmed.is_empty() && !inner.contains('$') && RE_MATHY.is_match(inner) {
        return format!("${{{trimmed}}}$");
    }
    inner.to_string()
}

fn is_math_delimited(s: &str) -> bool {
    (s.len() >= 2 && s.starts_with('$') && s.ends_with('$'))
        || (s.starts_with("\\(") && s.ends_with("\\)") && s.len() >= 4)
        || (s.starts_with("\\[") && s.ends_with("\\]") && s.len() >= 4)
}

// ── Rule 6: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n").into_owned()
}

// ── Rule 7: Strip bold markers ───────────────────────────────────────────────

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

fn strip_bold(input: &str) -> String {
    RE_BOLD.replace_all(input, "$1").into_owned()
}

// ── Rule 8: Math segments ────────────────────────────────────────────────────

/// A run of the document: prose, or the inner content of a math span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Math(&'a str),
}

/// Split text into prose and math segments.
///
/// At each position the scanner tries, in priority order: `${…}$`, `$$…$$`,
/// `\[…\]`, `\(…\)`, `$…$`. `\$` is a literal dollar. A span never crosses an
/// `[[IMAGE]]` token or contains an unescaped `$`, but may cross line breaks.
/// A span with no closing delimiter is left as literal text.
pub fn split_math(input: &str) -> Vec<Segment<'_>> {
    let bytes = input.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let found = match bytes[i] {
            b'\\' => match bytes.get(i + 1) {
                Some(b'$') | Some(b'\\') => {
                    i += 2;
                    continue;
                }
                Some(b'[') => match_enclosed(input, i, "\\[", "\\]"),
                Some(b'(') => match_enclosed(input, i, "\\(", "\\)"),
                _ => None,
            },
            b'$' => match_dollar(input, i),
            _ => None,
        };

        match found {
            Some((content_start, content_end, next)) => {
                if text_start < i {
                    segments.push(Segment::Text(&input[text_start..i]));
                }
                segments.push(Segment::Math(&input[content_start..content_end]));
                i = next;
                text_start = next;
            }
            None => i += 1,
        }
    }

    if text_start < bytes.len() {
        segments.push(Segment::Text(&input[text_start..]));
    }
    segments
}

/// `(content_start, content_end, resume_at)` for a recognised span.
type Span = (usize, usize, usize);

fn match_dollar(input: &str, at: usize) -> Option<Span> {
    let rest = &input[at..];
    if rest.starts_with("${") {
        if let Some(span) = match_enclosed(input, at, "${", "}$") {
            return Some(span);
        }
    }
    if rest.starts_with("$$") {
        if let Some(span) = match_enclosed(input, at, "$$", "$$") {
            return Some(span);
        }
    }

    let start = at + 1;
    let close = find_unescaped_dollar(&input[start..])? + start;
    let content = &input[start..close];
    if content.trim().is_empty() || content.contains(IMAGE_TOKEN) {
        return None;
    }
    Some((start, close, close + 1))
}

fn match_enclosed(input: &str, at: usize, open: &str, close: &str) -> Option<Span> {
    let start = at + open.len();
    let end = input[start..].find(close)? + start;
    let content = &input[start..end];
    if content.trim().is_empty()
        || content.contains(IMAGE_TOKEN)
        || find_unescaped_dollar(content).is_some()
    {
        return None;
    }
    Some((start, end, end + close.len()))
}

fn find_unescaped_dollar(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'$' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

static RE_MINUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*").unwrap());

static RE_MATH_LINEBREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*\n\s*").unwrap());

/// Canonical rendering of one math span's content.
///
/// Line breaks become spaces so a span always stays on one output line.
fn canonical_math(content: &str) -> String {
    let s = RE_MATH_LINEBREAK.replace_all(content.trim(), " ");
    let s = RE_MINUS.replace_all(&s, "-");
    format!("${{{s}}}$")
}

fn render_segments(segments: &[Segment<'_>]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Text(t) => out.push_str(t),
            Segment::Math(m) => out.push_str(&canonical_math(m)),
        }
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_dollar_becomes_canonical() {
        assert_eq!(normalize("$x-y$"), "${x-y}$");
    }

    #[test]
    fn test_delimiter_variants_unify() {
        assert_eq!(normalize("\\(a\\)"), "${a}$");
        assert_eq!(normalize("$$a$$"), "${a}$");
        assert_eq!(normalize("${a}$"), "${a}$");
        assert_eq!(normalize("\\[a\\]"), "${a}$");
    }

    #[test]
    fn test_minus_spacing_removed_inside_math_only() {
        assert_eq!(normalize("$a - b$ and c - d"), "${a-b}$ and c - d");
    }

    #[test]
    fn test_exam_line_with_placeholder() {
        assert_eq!(
            normalize("Câu 1. $x^2-1=0$ [[IMAGE]] tính x."),
            "Câu 1. ${x^2-1=0}$ [[IMAGE]] tính x."
        );
    }

    #[test]
    fn test_adjacent_canonical_spans_survive() {
        assert_eq!(normalize("${a}$${b}$"), "${a}$${b}$");
    }

    #[test]
    fn test_strip_fences_with_language() {
        let input = "```latex\nCâu 1. $x$\n```";
        assert_eq!(normalize(input), "Câu 1. ${x}$");
    }

    #[test]
    fn test_strip_unclosed_leading_fence() {
        assert_eq!(normalize("```\nhello"), "hello");
    }

    #[test]
    fn test_backtick_formula_promoted() {
        assert_eq!(normalize("Giải `x^2 = 4` ngay"), "Giải ${x^2 = 4}$ ngay");
    }

    #[test]
    fn test_backtick_math_unwrapped() {
        assert_eq!(normalize("`$a+b$`"), "${a+b}$");
        assert_eq!(normalize("`\\(a\\)`"), "${a}$");
    }

    #[test]
    fn test_backtick_prose_kept_as_text() {
        assert_eq!(normalize("the `answer` is"), "the answer is");
    }

    #[test]
    fn test_double_backticks_are_literal() {
        assert_eq!(normalize("``x``"), "``x``");
    }

    #[test]
    fn test_blank_lines_collapse() {
        assert_eq!(normalize("a\r\n\r\n\r\nb\n  \nc"), "a\nb\nc");
    }

    #[test]
    fn test_bold_stripped() {
        assert_eq!(normalize("**Câu 1.** Tính"), "Câu 1. Tính");
    }

    #[test]
    fn test_unclosed_dollar_is_literal() {
        assert_eq!(normalize("giá $5 một cái"), "giá $5 một cái");
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        assert_eq!(normalize("\\$5 and \\$6"), "\\$5 and \\$6");
    }

    #[test]
    fn test_span_never_crosses_image_token() {
        assert_eq!(normalize("$a [[IMAGE]] b$"), "$a [[IMAGE]] b$");
    }

    #[test]
    fn test_single_dollar_span_across_line_break() {
        assert_eq!(normalize("Cho $a\n- b$ nhé"), "Cho ${a-b}$ nhé");
    }

    #[test]
    fn test_display_math_joined_onto_one_line() {
        assert_eq!(normalize("$$\na + b\n$$"), "${a + b}$");
    }

    #[test]
    fn test_invisible_chars_removed() {
        assert_eq!(normalize("\u{FEFF}x\u{200B}y"), "xy");
    }

    #[test]
    fn test_split_math_segments() {
        let segs = split_math("a $b$ c \\(d\\)");
        assert_eq!(
            segs,
            vec![
                Segment::Text("a "),
                Segment::Math("b"),
                Segment::Text(" c "),
                Segment::Math("d"),
            ]
        );
    }

    #[test]
    fn test_canonical_braces_with_nested_groups() {
        assert_eq!(normalize("${\\frac{a}{b}}$"), "${\\frac{a}{b}}$");
    }

    #[test]
    fn test_idempotent_on_curated_inputs() {
        let inputs = [
            "```markdown\n**Câu 1.** Cho $f(x) = x^2 - 1$.\r\n\r\n\\[ \\int_0^1 f \\]\n```",
            "$$a$b$$ `c - 1` ${d}$$e$",
            "`$x$` and `y_1` and `plain`",
            "$ $ $$ $$ \\( \\) ${}$",
            "Câu 2. [[IMAGE]]\n\n\n$\\Delta ABC$ [[IMAGE]] $x - 2$",
            "unclosed $a and \\(b and $$c",
            "****bold****",
            "a\\\\$b$",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_image_token_preserved() {
        let out = normalize("[[IMAGE]]\n\n[[IMAGE]] `[[IMAGE]]`");
        assert_eq!(out.matches(IMAGE_TOKEN).count(), 3);
    }
}
