use std::sync::LazyLock;

use regex::Regex;

use super::{replace_all, tag_regex};

static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (tag_regex(r"<br\s*/?>"), "<br>"),
        (tag_regex(r"<hr\s*/?>"), "<hr>"),
        (tag_regex(r"<p(?:\s[^>]*)?>(?:\s|&nbsp;|<br>)*</p>"), ""),
        (Regex::new(r">\s*\n\s*<").unwrap(), "><"),
    ]
});

/// Normalize the editor's HTML: canonical void tags, no empty paragraphs
pub(super) fn clean_html(html: &str) -> String {
    replace_all(html, &RULES).trim().to_string()
}
