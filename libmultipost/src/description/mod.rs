//! Description pipeline
//!
//! Descriptions are authored as a small HTML subset (`p`, `br`, `b/strong`,
//! `i/em`, `u`, `s/strike/del`, `a[href]`, `h1`-`h6`, `hr`, `ul/ol/li`,
//! `blockquote` and entities). Each adapter renders that HTML in its site's
//! dialect:
//!
//! ```text
//! raw -> preparse -> generic(dialect) -> site rewrites -> postparse
//! ```
//!
//! Every stage is a pure `&str -> String` function. The dialect is a
//! [`DescriptionParser`] value picked when the adapter is built and the site
//! rewrites are an ordered list of regex replacements.

use std::sync::LazyLock;

use regex::Regex;

mod bbcode;
mod html;
mod markdown;
mod plaintext;
pub mod shortcuts;

pub use shortcuts::{expand_shortcuts, UsernameShortcut};

/// Link appended to descriptions on websites that allow it
pub const ADVERTISEMENT_HTML: &str =
    r#"<p><a href="https://github.com/multipost/multipost">Posted using Multipost</a></p>"#;

/// Generic converter from the editor HTML subset to a site dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionParser {
    BBCode,
    Markdown,
    Html,
    Plaintext,
}

impl DescriptionParser {
    pub fn convert(&self, html: &str) -> String {
        match self {
            DescriptionParser::BBCode => bbcode::to_bbcode(html),
            DescriptionParser::Markdown => markdown::to_markdown(html),
            DescriptionParser::Html => html::clean_html(html),
            DescriptionParser::Plaintext => plaintext::to_plaintext(html),
        }
    }
}

/// One site-specific regex replacement
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub pattern: Regex,
    /// Replacement string; `$1` style group references are expanded
    pub replacement: String,
}

impl Rewrite {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }

    /// Rewrite from an already compiled pattern
    pub fn from_regex(pattern: &Regex, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.clone(),
            replacement: replacement.into(),
        }
    }

    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

/// Dialect conversion followed by ordered site rewrites
#[derive(Debug, Clone)]
pub struct DescriptionPipeline {
    pub parser: DescriptionParser,
    pub rewrites: Vec<Rewrite>,
}

impl DescriptionPipeline {
    pub fn new(parser: DescriptionParser) -> Self {
        Self {
            parser,
            rewrites: Vec::new(),
        }
    }

    pub fn with_rewrite(mut self, rewrite: Rewrite) -> Self {
        self.rewrites.push(rewrite);
        self
    }

    pub fn apply(&self, text: &str) -> String {
        let converted = self.parser.convert(text);
        self.rewrites
            .iter()
            .fold(converted, |acc, rewrite| rewrite.apply(&acc))
    }
}

/// Append [`ADVERTISEMENT_HTML`] as its own paragraph
pub fn append_advertisement(description: &str) -> String {
    if description.trim().is_empty() {
        ADVERTISEMENT_HTML.to_string()
    } else {
        format!("{}{}", description.trim_end(), ADVERTISEMENT_HTML)
    }
}

static TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+\n").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip trailing blanks from lines and squeeze runs of blank lines to one
pub fn collapse_newlines(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = TRAILING_SPACE.replace_all(&text, "\n");
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

/// Append text, dropping whitespace-only runs at the start of a line
pub(crate) fn push_text(out: &mut String, text: &str) {
    if text.trim().is_empty() && (out.is_empty() || out.ends_with('\n')) {
        return;
    }
    out.push_str(text);
}

pub(crate) fn ensure_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

pub(crate) fn ensure_blank_line(out: &mut String) {
    ensure_newline(out);
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

/// Apply `(pattern, replacement)` pairs in order
pub(crate) fn replace_all(text: &str, rules: &[(Regex, &str)]) -> String {
    rules
        .iter()
        .fold(text.to_string(), |acc, (pattern, replacement)| {
            pattern.replace_all(&acc, *replacement).into_owned()
        })
}

/// Case-insensitive, dot-matches-newline regex for a static tag pattern
pub(crate) fn tag_regex(pattern: &str) -> Regex {
    Regex::new(&format!("(?is){}", pattern)).unwrap()
}
