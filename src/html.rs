//! HTML rendering module for serve mode.
//!
//! Escapes untrusted text, converts display trees into HTML fragments, and
//! builds the single-page shell (header, navigation menu, home view, inline
//! handbook, reader skeleton, handbook overlay). Markdown documents are
//! converted with comrak; raw HTML in content is never passed through.
//!
//! The terminal path (`render.rs`) shares none of this markup.

use comrak::{markdown_to_html, Options};

use crate::interpret::{DisplayTree, Node, Tone};
use crate::nav::Manifest;

/// Escape text for insertion into HTML. Applied to every content-derived
/// string except trusted markdown conversion output.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn make_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    // Raw HTML in markdown is dropped, not passed through. Already the
    // default, stated here so the trust boundary is visible.
    options.render.unsafe_ = false;
    options
}

/// Trusted markdown → HTML conversion (handbook and document sections).
pub fn document_html(markdown: &str) -> String {
    markdown_to_html(markdown, &make_options())
}

/// Render a display tree into an HTML fragment for a section body.
pub fn tree_html(tree: &DisplayTree) -> String {
    let mut out = String::new();
    for node in &tree.nodes {
        node_html(node, &mut out);
    }
    out
}

/// The visible per-section failure block.
pub fn error_fragment(message: &str) -> String {
    format!("<div class=\"error\">✗ {}</div>\n", html_escape(message))
}

fn tone_class(tone: Tone) -> String {
    match tone.css_class() {
        Some(class) => format!(" {class}"),
        None => String::new(),
    }
}

fn node_html(node: &Node, out: &mut String) {
    match node {
        Node::Heading { text } => {
            out.push_str(&format!("<h3>{}</h3>\n", html_escape(text)));
        }
        Node::Subheading { text } => {
            out.push_str(&format!(
                "<p class=\"subtitle\">{}</p>\n",
                html_escape(text)
            ));
        }
        Node::Label { depth, text } => {
            let level = (*depth as usize + 3).min(6);
            out.push_str(&format!("<h{level}>{}</h{level}>\n", html_escape(text)));
        }
        Node::Entry {
            label, value, tone, ..
        } => {
            out.push_str(&format!(
                "<p class=\"kv{}\"><strong>{}:</strong> {}</p>\n",
                tone_class(*tone),
                html_escape(label),
                html_escape(value)
            ));
        }
        Node::Paragraph { text, tone } => match tone.css_class() {
            Some(class) => out.push_str(&format!(
                "<p class=\"{class}\">{}</p>\n",
                html_escape(text)
            )),
            None => out.push_str(&format!("<p>{}</p>\n", html_escape(text))),
        },
        Node::List { items } => {
            out.push_str("<ul>\n");
            for item in items {
                out.push_str("<li>");
                item_html(item, out);
                out.push_str("</li>\n");
            }
            out.push_str("</ul>\n");
        }
        Node::Preformatted { text } => {
            out.push_str(&format!("<pre class=\"raw\">{}</pre>\n", html_escape(text)));
        }
        Node::Document { markdown } => {
            out.push_str(&document_html(markdown));
        }
        Node::Empty => {
            out.push_str("<p class=\"empty\">No content yet.</p>\n");
        }
    }
}

/// A list item holding a single plain paragraph renders as bare text; any
/// other shape nests its block markup inside the `<li>`.
fn item_html(nodes: &[Node], out: &mut String) {
    if let [Node::Paragraph {
        text,
        tone: Tone::Plain,
    }] = nodes
    {
        out.push_str(&html_escape(text));
        return;
    }
    for node in nodes {
        node_html(node, out);
    }
}

/// Navigation menu markup: reserved views first, then manifest groups as
/// native `<details>` disclosure blocks so they collapse without script.
fn build_nav_html(manifest: &Manifest) -> String {
    let mut out = String::new();
    out.push_str("<ul class=\"toc-reserved\">\n");
    out.push_str("<li><a href=\"#home\" data-target=\"home\">Home</a></li>\n");
    out.push_str("<li><a href=\"#handbook\" data-target=\"handbook\">Handbook</a></li>\n");
    out.push_str("</ul>\n");
    for group in &manifest.groups {
        out.push_str(&format!(
            "<details class=\"toc-group\" open>\n<summary>{}</summary>\n<ul>\n",
            html_escape(&group.label)
        ));
        for section in &group.sections {
            out.push_str(&format!(
                "<li><a href=\"#{id}\" data-target=\"{id}\">{label}</a></li>\n",
                id = html_escape(&section.id),
                label = html_escape(&section.label)
            ));
        }
        out.push_str("</ul>\n</details>\n");
    }
    out
}

/// Build the complete HTML page for a book.
///
/// Content sections are not embedded; the embedded script fetches fragments
/// from `/sections/{target}` into the reader container on navigation.
pub fn build_page_shell(manifest: &Manifest) -> String {
    let title = html_escape(&manifest.title);
    let blurb = if manifest.blurb.is_empty() {
        String::new()
    } else {
        format!("<p class=\"blurb\">{}</p>\n", html_escape(&manifest.blurb))
    };
    let nav_html = build_nav_html(manifest);

    format!(
        "<!DOCTYPE html>\n\
<html lang=\"en\">\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title} · lorebook</title>\n\
<link rel=\"stylesheet\" href=\"/assets/lorebook.css\">\n\
</head>\n\
<body>\n\
<header class=\"site-header\">\n\
<button id=\"toc-toggle\" type=\"button\" aria-label=\"Toggle contents\">☰</button>\n\
<span class=\"site-title\">{title}</span>\n\
</header>\n\
<div class=\"layout\">\n\
<nav id=\"toc\" class=\"toc-sidebar\" aria-label=\"Contents\">\n\
{nav_html}\
</nav>\n\
<main id=\"content\">\n\
<section id=\"home\" class=\"card\" data-view=\"home\">\n\
<h1>{title}</h1>\n\
{blurb}\
</section>\n\
<section id=\"handbook\" class=\"card\" data-view=\"handbook\">\n\
<h2 class=\"section-title\">Handbook</h2>\n\
<div id=\"handbook-body\" class=\"section-body\" data-state=\"unloaded\"></div>\n\
</section>\n\
<section id=\"reader\" class=\"card\" data-view=\"reader\" data-state=\"unloaded\" hidden>\n\
<h2 class=\"section-title\" id=\"reader-title\"></h2>\n\
<div id=\"reader-body\" class=\"section-body\"></div>\n\
</section>\n\
</main>\n\
</div>\n\
<div id=\"overlay\" class=\"overlay\" hidden>\n\
<div class=\"overlay-panel\" role=\"dialog\" aria-modal=\"true\" aria-label=\"Handbook\">\n\
<div id=\"overlay-body\" class=\"overlay-body\"></div>\n\
<div class=\"overlay-controls\">\n\
<label><input type=\"checkbox\" id=\"overlay-opt-out\"> Do not show this again</label>\n\
<button id=\"overlay-close\" type=\"button\">Close</button>\n\
</div>\n\
</div>\n\
</div>\n\
<script src=\"/assets/lorebook.js\" defer></script>\n\
</body>\n\
</html>\n"
    )
}
