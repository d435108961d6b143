use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

pub const VARIABLE_START: &str = "{{";
pub const VARIABLE_END: &str = "}}";
pub const BLOCK_START: &str = "{%";
pub const BLOCK_END: &str = "%}";
pub const COMMENT_START: &str = "{#";
pub const COMMENT_END: &str = "#}";

/// One pattern for all three delimiter pairs; tags may span lines
#[allow(clippy::expect_used)]
static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}|\{#.*?#\}").expect("token pattern is valid")
});

/// Classification of a raw fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Text,
    Variable,
    OpenBlock,
    CloseBlock,
    Comment,
}

/// A classified piece of template source
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Source text including delimiters
    pub raw: String,
    /// Tag body without delimiters and surrounding whitespace (identity for text and comments)
    pub clean: String,
    pub kind: FragmentKind,
    /// 1-based line the fragment starts on
    pub line: usize,
}

impl Fragment {
    pub fn classify(raw: impl Into<String>, line: usize) -> Self {
        let raw = raw.into();

        let (kind, clean) = if raw.starts_with(VARIABLE_START) {
            (FragmentKind::Variable, Self::strip_markers(&raw))
        } else if raw.starts_with(BLOCK_START) {
            let clean = Self::strip_markers(&raw);
            let kind = if clean.starts_with("end") {
                FragmentKind::CloseBlock
            } else {
                FragmentKind::OpenBlock
            };
            (kind, clean)
        } else if raw.starts_with(COMMENT_START) {
            (FragmentKind::Comment, raw.clone())
        } else {
            (FragmentKind::Text, raw.clone())
        };

        Self {
            raw,
            clean,
            kind,
            line,
        }
    }

    fn strip_markers(raw: &str) -> String {
        let trimmed = raw.trim();
        let body = trimmed.get(2..).unwrap_or("");
        let body = [VARIABLE_END, BLOCK_END, COMMENT_END]
            .iter()
            .find_map(|end| body.strip_suffix(*end))
            .unwrap_or(body);
        body.trim().to_string()
    }

    /// Literal text, never reclassified even when it opens with a delimiter
    pub fn text(raw: impl Into<String>, line: usize) -> Self {
        let raw = raw.into();
        Self {
            clean: raw.clone(),
            raw,
            kind: FragmentKind::Text,
            line,
        }
    }

    /// First whitespace-delimited word of the tag body
    pub fn keyword(&self) -> &str {
        self.clean.split_whitespace().next().unwrap_or("")
    }

    /// Tag body after the keyword
    pub fn arguments(&self) -> &str {
        let keyword = self.keyword();
        self.clean[keyword.len()..].trim()
    }

    pub fn is_tag(&self) -> bool {
        matches!(
            self.kind,
            FragmentKind::OpenBlock | FragmentKind::CloseBlock | FragmentKind::Comment
        )
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}) at line {}", self.kind, self.clean, self.line)
    }
}

/// Splits template source into classified fragments
pub struct Lexer<'a> {
    source: &'a str,
    strict: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            strict: false,
        }
    }

    /// Reject unterminated delimiters instead of keeping them as text
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Tokenize the entire input
    ///
    /// Concatenating the `raw` field of every fragment gives back the source.
    pub fn tokenize(&self) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();
        let mut line = 1;
        let mut last = 0;

        for found in TOKEN_REGEX.find_iter(self.source) {
            if found.start() > last {
                line = self.push_text(&mut fragments, &self.source[last..found.start()], line)?;
            }
            let fragment = Fragment::classify(found.as_str(), line);
            log::trace!("lexed {}", fragment);
            line += found.as_str().matches('\n').count();
            fragments.push(fragment);
            last = found.end();
        }

        if last < self.source.len() {
            self.push_text(&mut fragments, &self.source[last..], line)?;
        }

        Ok(fragments)
    }

    fn push_text(&self, fragments: &mut Vec<Fragment>, text: &str, line: usize) -> Result<usize> {
        if let Some(offset) = find_unterminated(text) {
            let at = line + text[..offset].matches('\n').count();
            let opener = &text[offset..offset + 2];
            if self.strict {
                return Err(Error::syntax(
                    at,
                    opener,
                    "is never closed",
                ));
            }
            log::warn!(
                "unterminated '{}' at line {} is rendered as text",
                opener,
                at
            );
        }

        fragments.push(Fragment::text(text, line));
        Ok(line + text.matches('\n').count())
    }
}

/// Byte offset of the first tag opener left inside literal text
fn find_unterminated(text: &str) -> Option<usize> {
    [VARIABLE_START, BLOCK_START, COMMENT_START]
        .iter()
        .filter_map(|opener| text.find(opener))
        .min()
}

/// Remove the indentation before, and the newline after, every block or
/// comment tag that sits alone on its line. Text inside `raw` blocks is
/// left untouched.
pub fn strip_tag_lines(fragments: &mut Vec<Fragment>) {
    // (bytes cut from the front, bytes cut from the back) per fragment,
    // decided against the unmodified text
    let mut cuts = vec![(0usize, 0usize); fragments.len()];
    let mut in_raw = false;

    for i in 0..fragments.len() {
        if !fragments[i].is_tag() {
            continue;
        }

        let raw_before = in_raw;
        match fragments[i].kind {
            FragmentKind::OpenBlock if !in_raw && fragments[i].keyword() == "raw" => in_raw = true,
            FragmentKind::CloseBlock if in_raw && fragments[i].clean == "endraw" => in_raw = false,
            _ => {}
        }
        let raw_after = in_raw;

        let prefix = if i == 0 {
            Some(0)
        } else {
            leading_indent(&fragments[i - 1], i - 1 == 0)
        };
        let suffix = match fragments.get(i + 1) {
            None => Some(0),
            Some(next) => trailing_newline(next, i + 2 == fragments.len()),
        };

        let (Some(indent), Some(newline)) = (prefix, suffix) else {
            continue;
        };
        if indent > 0 && !raw_before {
            cuts[i - 1].1 = indent;
        }
        if newline > 0 && !raw_after {
            cuts[i + 1].0 = newline;
        }
    }

    for (fragment, (front, back)) in fragments.iter_mut().zip(cuts) {
        if front == 0 && back == 0 {
            continue;
        }
        let end = fragment.raw.len().saturating_sub(back).max(front);
        fragment.raw = fragment.raw[front..end].to_string();
        fragment.clean = fragment.raw.clone();
    }

    fragments.retain(|f| f.kind != FragmentKind::Text || !f.raw.is_empty());
}

/// Length of the whitespace run ending `prev`, when it starts the tag's line
fn leading_indent(prev: &Fragment, is_first: bool) -> Option<usize> {
    if prev.kind != FragmentKind::Text {
        return None;
    }
    let tail_start = prev.raw.rfind('\n').map(|p| p + 1);
    if tail_start.is_none() && !is_first {
        return None;
    }
    let tail = &prev.raw[tail_start.unwrap_or(0)..];
    if tail.chars().all(|c| c == ' ' || c == '\t') {
        Some(tail.len())
    } else {
        None
    }
}

/// Length of the whitespace plus newline opening `next`, when the tag ends its line
fn trailing_newline(next: &Fragment, is_last: bool) -> Option<usize> {
    if next.kind != FragmentKind::Text {
        return None;
    }
    match next.raw.find('\n') {
        Some(pos) => {
            let head = &next.raw[..pos];
            let head = head.strip_suffix('\r').unwrap_or(head);
            if head.chars().all(|c| c == ' ' || c == '\t') {
                Some(pos + 1)
            } else {
                None
            }
        }
        None if is_last && next.raw.trim().is_empty() => Some(0),
        None => None,
    }
}
