use super::collapse_newlines;

pub(super) fn to_markdown(html: &str) -> String {
    collapse_newlines(&html2md::parse_html(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_list_item(line: &str) -> bool {
        let line = line.trim_start();
        line.starts_with("* ")
            || line.starts_with("- ")
            || line.starts_with("+ ")
            || line.split_once(". ").is_some_and(|(n, _)| n.chars().all(|c| c.is_ascii_digit()))
    }

    fn indent(line: &str) -> usize {
        line.len() - line.trim_start().len()
    }

    #[test]
    fn test_inline_formatting() {
        let markdown = to_markdown("<p><b>bold</b> and <em>it</em></p>");
        assert!(markdown.contains("**bold**"), "{}", markdown);
        assert!(markdown.contains("*it*"), "{}", markdown);
    }

    #[test]
    fn test_links() {
        let markdown = to_markdown(r#"<p>Go <a href="https://example.com">there</a></p>"#);
        assert!(markdown.contains("[there](https://example.com)"), "{}", markdown);
    }

    #[test]
    fn test_headings_and_paragraphs() {
        let markdown = to_markdown("<h1>Top</h1><p>Intro</p><p>a &amp; b</p>");
        let lines: Vec<&str> = markdown.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(lines, vec!["# Top", "Intro", "a & b"]);
    }

    #[test]
    fn test_nested_lists_keep_their_structure() {
        let markdown = to_markdown("<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul>");
        let lines: Vec<&str> = markdown.lines().filter(|l| !l.trim().is_empty()).collect();

        assert_eq!(lines.len(), 3, "{}", markdown);
        assert!(lines.iter().all(|line| is_list_item(line)), "{}", markdown);
        assert!(lines[0].trim_end().ends_with('a'));
        assert!(lines[1].trim_end().ends_with('b'));
        assert!(lines[2].trim_end().ends_with('c'));
        assert!(indent(lines[1]) > indent(lines[0]), "{}", markdown);
        assert_eq!(indent(lines[2]), indent(lines[0]));
    }
}
