use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{ElementRef, Html};

use super::{collapse_newlines, ensure_blank_line, ensure_newline, push_text};

#[derive(Default)]
struct Writer {
    out: String,
    list_depth: usize,
}

pub(super) fn to_plaintext(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut writer = Writer::default();
    writer.visit_children(fragment.root_element());
    collapse_newlines(&writer.out)
}

impl Writer {
    fn visit_node(&mut self, node: NodeRef<'_, Node>) {
        match node.value() {
            Node::Text(text) => push_text(&mut self.out, text),
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(node) {
                    self.visit_element(element);
                }
            }
            _ => {
                for child in node.children() {
                    self.visit_node(child);
                }
            }
        }
    }

    fn visit_children(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            self.visit_node(child);
        }
    }

    fn visit_element(&mut self, element: ElementRef<'_>) {
        match element.value().name() {
            "br" => self.out.push('\n'),
            "hr" => self.out.push_str("\n----------\n"),
            "a" => self.link(element),
            "ul" | "ol" => {
                ensure_newline(&mut self.out);
                self.list_depth += 1;
                self.visit_children(element);
                self.list_depth -= 1;
                if self.list_depth == 0 {
                    ensure_blank_line(&mut self.out);
                } else {
                    ensure_newline(&mut self.out);
                }
            }
            "li" => {
                ensure_newline(&mut self.out);
                let indent = "  ".repeat(self.list_depth.saturating_sub(1));
                self.out.push_str(&indent);
                self.out.push_str("- ");
                self.visit_children(element);
                ensure_newline(&mut self.out);
            }
            "p" | "div" | "blockquote" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.visit_children(element);
                ensure_blank_line(&mut self.out);
            }
            _ => self.visit_children(element),
        }
    }

    /// Links keep their target: `label (href)`, or the bare href
    fn link(&mut self, element: ElementRef<'_>) {
        let href = element.value().attr("href").unwrap_or_default();
        let label = element.text().collect::<String>();
        let label = label.trim();
        if label.is_empty() || label == href {
            self.out.push_str(href);
        } else {
            self.out.push_str(&format!("{} ({})", label, href));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_links_keep_their_target() {
        assert_eq!(
            to_plaintext(r#"<p><a href="https://a.b">site</a> and <a href="https://c.d">https://c.d</a></p>"#),
            "site (https://a.b) and https://c.d"
        );
    }

    #[test]
    fn test_blocks() {
        assert_eq!(
            to_plaintext("<h1>T</h1><p><b>x</b> &gt; y</p><ul><li>a</li><li>b</li></ul><hr>"),
            "T\n\nx > y\n\n- a\n- b\n\n----------"
        );
    }

    #[test]
    fn test_nested_lists_are_indented() {
        assert_eq!(
            to_plaintext("<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul><p>end</p>"),
            "- a\n  - b\n- c\n\nend"
        );
    }
}
