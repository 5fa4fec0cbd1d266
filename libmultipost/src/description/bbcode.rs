use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{ElementRef, Html};

use super::{collapse_newlines, ensure_newline, push_text};

pub(super) fn to_bbcode(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    visit_children(fragment.root_element(), &mut out);
    collapse_newlines(&out)
}

fn visit_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => push_text(out, text),
        Node::Element(_) => {
            if let Some(element) = ElementRef::wrap(node) {
                visit_element(element, out);
            }
        }
        _ => {
            for child in node.children() {
                visit_node(child, out);
            }
        }
    }
}

fn visit_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        visit_node(child, out);
    }
}

fn wrap(element: ElementRef<'_>, tag: &str, out: &mut String) {
    out.push_str(&format!("[{}]", tag));
    visit_children(element, out);
    out.push_str(&format!("[/{}]", tag));
}

fn visit_element(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    match name {
        "br" => out.push('\n'),
        "hr" => out.push_str("\n[hr]\n"),
        "a" => {
            let href = element.value().attr("href").unwrap_or_default();
            out.push_str(&format!("[url={}]", href));
            visit_children(element, out);
            out.push_str("[/url]");
        }
        "b" | "strong" => wrap(element, "b", out),
        "i" | "em" => wrap(element, "i", out),
        "u" => wrap(element, "u", out),
        "s" | "strike" | "del" => wrap(element, "s", out),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            ensure_newline(out);
            wrap(element, name, out);
            ensure_newline(out);
        }
        "blockquote" => {
            ensure_newline(out);
            wrap(element, "quote", out);
            ensure_newline(out);
        }
        "ul" | "ol" => {
            ensure_newline(out);
            out.push_str("[list]\n");
            visit_children(element, out);
            ensure_newline(out);
            out.push_str("[/list]\n");
        }
        "li" => {
            ensure_newline(out);
            out.push_str("[*]");
            visit_children(element, out);
            ensure_newline(out);
        }
        "p" | "div" => {
            visit_children(element, out);
            ensure_newline(out);
        }
        _ => visit_children(element, out),
    }
}
