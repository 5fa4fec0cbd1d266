//! Tag parsing and formatting
//!
//! [`parse_tags`] is the generic pass every adapter runs: it trims tags, drops
//! those outside the configured length bounds and replaces inner whitespace.
//! [`TagFormat`] layers the site constraints on top (count, joined length,
//! illegal characters) and joins the survivors the way the site expects.

use std::collections::HashSet;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagParseOptions {
    /// Minimum length in characters, inclusive
    pub min_length: usize,
    /// Maximum length in characters, inclusive
    pub max_length: usize,
    /// Replacement for runs of whitespace inside a tag
    pub space_replacer: String,
}

impl Default for TagParseOptions {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 100,
            space_replacer: "_".to_string(),
        }
    }
}

/// Trim, length-filter and de-space tags
///
/// Lengths are measured on the trimmed tag in characters. Pure and total: no
/// input makes it fail, and no returned tag contains whitespace.
pub fn parse_tags(tags: &[String], options: &TagParseOptions) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| {
            let len = tag.chars().count();
            len >= options.min_length && len <= options.max_length
        })
        .map(|tag| {
            tag.split_whitespace()
                .collect::<Vec<_>>()
                .join(&options.space_replacer)
        })
        .collect()
}

/// How the surviving tags are handed to the site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagJoin {
    /// `a b c`
    Space,
    /// `a, b, c`
    Comma,
    /// `#a #b #c`
    Hashtags,
    /// One entry per tag, left to the adapter to serialize
    Structured,
}

impl TagJoin {
    fn separator(&self) -> &'static str {
        match self {
            TagJoin::Space | TagJoin::Hashtags => " ",
            TagJoin::Comma => ", ",
            TagJoin::Structured => "",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            TagJoin::Hashtags => "#",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormattedTags {
    Joined(String),
    Structured(Vec<String>),
}

impl FormattedTags {
    pub fn as_joined(&self) -> String {
        match self {
            FormattedTags::Joined(joined) => joined.clone(),
            FormattedTags::Structured(tags) => tags.join(" "),
        }
    }
}

/// Site tag constraints
#[derive(Debug, Clone)]
pub struct TagFormat {
    pub parse: TagParseOptions,
    pub max_count: Option<usize>,
    /// Ceiling for the joined string, separators and prefixes included
    pub max_joined_length: Option<usize>,
    /// Characters removed from every tag
    pub illegal_chars: Option<Regex>,
    pub join: TagJoin,
}

impl Default for TagFormat {
    fn default() -> Self {
        Self {
            parse: TagParseOptions::default(),
            max_count: None,
            max_joined_length: None,
            illegal_chars: None,
            join: TagJoin::Space,
        }
    }
}

impl TagFormat {
    pub fn new(join: TagJoin) -> Self {
        Self {
            join,
            ..Default::default()
        }
    }

    pub fn with_parse(mut self, parse: TagParseOptions) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_max_joined_length(mut self, max: usize) -> Self {
        self.max_joined_length = Some(max);
        self
    }

    pub fn with_illegal_chars(mut self, pattern: Regex) -> Self {
        self.illegal_chars = Some(pattern);
        self
    }

    /// Apply every constraint and return the tags that survive, in order
    ///
    /// Tags are kept as a prefix of the cleaned list: the first tag that does
    /// not fit ends the list, so truncation only ever drops from the end.
    /// Running the result through `constrain` again returns it unchanged.
    pub fn constrain(&self, tags: &[String]) -> Vec<String> {
        let stripped: Vec<String> = match &self.illegal_chars {
            Some(pattern) => tags
                .iter()
                .map(|tag| pattern.replace_all(tag, "").into_owned())
                .collect(),
            None => tags.to_vec(),
        };

        let mut seen = HashSet::new();
        let cleaned = parse_tags(&stripped, &self.parse)
            .into_iter()
            .filter(|tag| seen.insert(tag.clone()));

        let separator = self.join.separator().chars().count();
        let prefix = self.join.prefix().chars().count();
        let mut joined_length = 0;
        let mut kept = Vec::new();

        for tag in cleaned {
            if self.max_count.is_some_and(|max| kept.len() >= max) {
                break;
            }

            let added = prefix
                + tag.chars().count()
                + if kept.is_empty() { 0 } else { separator };
            if self
                .max_joined_length
                .is_some_and(|max| joined_length + added > max)
            {
                break;
            }

            joined_length += added;
            kept.push(tag);
        }

        kept
    }

    pub fn format(&self, tags: &[String]) -> FormattedTags {
        let kept = self.constrain(tags);
        match self.join {
            TagJoin::Structured => FormattedTags::Structured(kept),
            join => FormattedTags::Joined(
                kept.iter()
                    .map(|tag| format!("{}{}", join.prefix(), tag))
                    .collect::<Vec<_>>()
                    .join(join.separator()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_tags_length_bounds() {
        let options = TagParseOptions {
            min_length: 2,
            max_length: 100,
            ..Default::default()
        };
        let tags = vec!["  foo  ".to_string(), "x".to_string(), "y".repeat(150)];
        assert_eq!(parse_tags(&tags, &options), vec!["foo"]);
    }

    #[test]
    fn test_parse_tags_replaces_inner_whitespace() {
        let tags = strings(&["red  panda", " night\tsky ", ""]);
        let parsed = parse_tags(&tags, &TagParseOptions::default());
        assert_eq!(parsed, vec!["red_panda", "night_sky"]);
        assert!(parsed.iter().all(|t| !t.chars().any(char::is_whitespace)));
    }

    #[test]
    fn test_parse_tags_counts_characters_not_bytes() {
        let options = TagParseOptions {
            min_length: 1,
            max_length: 3,
            ..Default::default()
        };
        assert_eq!(parse_tags(&strings(&["ñçé"]), &options), vec!["ñçé"]);
    }

    #[test]
    fn test_constrain_drops_from_end() {
        let format = TagFormat::new(TagJoin::Space).with_max_count(2);
        assert_eq!(format.constrain(&strings(&["a", "b", "c"])), vec!["a", "b"]);

        let format = TagFormat::new(TagJoin::Space).with_max_joined_length(7);
        // "one two" is 7 characters, "three" no longer fits
        assert_eq!(
            format.constrain(&strings(&["one", "two", "three", "x"])),
            vec!["one", "two"]
        );
    }

    #[test]
    fn test_constrain_strips_illegal_and_dedupes() {
        let format = TagFormat::new(TagJoin::Comma).with_illegal_chars(Regex::new(r"[#,]").unwrap());
        assert_eq!(
            format.constrain(&strings(&["#art", "art", ",", "sky"])),
            vec!["art", "sky"]
        );
    }

    #[test]
    fn test_constrain_is_idempotent() {
        let format = TagFormat::new(TagJoin::Hashtags)
            .with_max_count(4)
            .with_max_joined_length(20)
            .with_illegal_chars(Regex::new(r"[^\w ]").unwrap());
        let input = strings(&["fox!", "red panda", "fox", "a-b", "extremely_long_tag_here", "z"]);
        let once = format.constrain(&input);
        let twice = format.constrain(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_format_join_strategies() {
        let tags = strings(&["a", "b c"]);
        assert_eq!(
            TagFormat::new(TagJoin::Space).format(&tags),
            FormattedTags::Joined("a b_c".to_string())
        );
        assert_eq!(
            TagFormat::new(TagJoin::Comma).format(&tags),
            FormattedTags::Joined("a, b_c".to_string())
        );
        assert_eq!(
            TagFormat::new(TagJoin::Hashtags).format(&tags),
            FormattedTags::Joined("#a #b_c".to_string())
        );
        assert_eq!(
            TagFormat::new(TagJoin::Structured).format(&tags),
            FormattedTags::Structured(strings(&["a", "b_c"]))
        );
    }
}
