//! Username shortcuts
//!
//! Authors reference people on other websites with `{key:name}`, for example
//! `{fa:someone}`. Each adapter publishes the keys it owns. The owning
//! adapter renders its own shortcuts natively in `preparse_description`;
//! every other website receives an HTML link built from the URL template.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static SHORTCUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9]+):([^{}\s]+)\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameShortcut {
    pub key: &'static str,
    /// Profile URL; `$1` is replaced with the username
    pub url_template: &'static str,
}

impl UsernameShortcut {
    pub const fn new(key: &'static str, url_template: &'static str) -> Self {
        Self { key, url_template }
    }

    pub fn url(&self, username: &str) -> String {
        self.url_template.replace("$1", username)
    }

    pub fn link_html(&self, username: &str) -> String {
        format!(r#"<a href="{}">{}</a>"#, self.url(username), username)
    }
}

/// Replace every `{key:name}` whose key is in `shortcuts` with `render(shortcut, name)`
///
/// Shortcuts with unknown keys are left untouched.
pub fn expand_shortcuts<F>(text: &str, shortcuts: &[UsernameShortcut], render: F) -> String
where
    F: Fn(&UsernameShortcut, &str) -> String,
{
    SHORTCUT
        .replace_all(text, |caps: &Captures| {
            let key = &caps[1];
            match shortcuts.iter().find(|s| s.key.eq_ignore_ascii_case(key)) {
                Some(shortcut) => render(shortcut, &caps[2]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FA: UsernameShortcut = UsernameShortcut::new("fa", "https://www.furaffinity.net/user/$1");
    const WS: UsernameShortcut = UsernameShortcut::new("ws", "https://www.weasyl.com/~$1");

    #[test]
    fn test_expands_known_keys_only() {
        let text = "by {fa:alice} and {ws:bob} and {xx:carol}";
        let expanded = expand_shortcuts(text, &[FA], |s, name| s.link_html(name));
        assert_eq!(
            expanded,
            r#"by <a href="https://www.furaffinity.net/user/alice">alice</a> and {ws:bob} and {xx:carol}"#
        );
    }

    #[test]
    fn test_custom_render() {
        let expanded = expand_shortcuts("{FA:alice}", &[FA, WS], |_, name| format!(":icon{}:", name));
        assert_eq!(expanded, ":iconalice:");
    }
}
