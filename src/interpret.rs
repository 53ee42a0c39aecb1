//! Payload interpretation.
//!
//! Turns a fetched [`RawPayload`] into a [`DisplayTree`], deciding the
//! payload's shape from the winning candidate's format plus, for plain text,
//! a content sniff for document markers. This module never fails: malformed
//! structured data degrades to a preformatted block holding the raw text.
//!
//! Trees carry plain text only. Escaping is the HTML renderer's duty at emit
//! time; the terminal renderer inserts text as-is.

use serde_json::Value;

use crate::source::{RawPayload, SourceFormat};

/// Reserved key whose value styles the sibling `description` entry. The key
/// itself is never rendered.
const FORMAT_HINT_KEY: &str = "format";
/// The entry a format hint applies to.
const DESCRIPTION_KEY: &str = "description";

/// Visual emphasis attached to rendered text by a format hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Accent,
    Highlight,
    Warning,
    Muted,
}

impl Tone {
    /// Map a hint string to a tone. Unknown hints get the default accent so
    /// authors can invent vocabulary without breaking rendering.
    pub fn from_hint(hint: &str) -> Tone {
        match hint {
            "highlight" => Tone::Highlight,
            "warning" => Tone::Warning,
            "muted" => Tone::Muted,
            _ => Tone::Accent,
        }
    }

    /// CSS class for the HTML surface; `None` for plain text.
    pub fn css_class(self) -> Option<&'static str> {
        match self {
            Tone::Plain => None,
            Tone::Accent => Some("tone-accent"),
            Tone::Highlight => Some("tone-highlight"),
            Tone::Warning => Some("tone-warning"),
            Tone::Muted => Some("tone-muted"),
        }
    }
}

/// One node of the render-ready structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Document heading supplied by the reserved `title` key.
    Heading { text: String },
    /// Secondary line supplied by the reserved `subtitle` key.
    Subheading { text: String },
    /// Heading-like label for a key whose value is structured.
    Label { depth: u8, text: String },
    /// Key with a primitive value, shown inline after the label.
    Entry {
        depth: u8,
        label: String,
        value: String,
        tone: Tone,
    },
    Paragraph { text: String, tone: Tone },
    /// Ordered list; each item is its own node sequence.
    List { items: Vec<Vec<Node>> },
    /// Raw text shown verbatim in a monospace block.
    Preformatted { text: String },
    /// Markdown source, converted by the surface's document renderer.
    Document { markdown: String },
    /// "No content yet" marker for blank or empty payloads.
    Empty,
}

/// Render-ready structure for one section. Ephemeral: rebuilt on every load.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayTree {
    pub nodes: Vec<Node>,
}

impl DisplayTree {
    fn single(node: Node) -> DisplayTree {
        DisplayTree { nodes: vec![node] }
    }
}

/// Interpret a fetched payload into a display tree.
pub fn interpret(payload: &RawPayload) -> DisplayTree {
    if payload.text.trim().is_empty() {
        return DisplayTree::single(Node::Empty);
    }
    let key = &payload.candidate.key;
    match payload.candidate.format {
        SourceFormat::Structured => interpret_structured(&payload.text, key),
        SourceFormat::Document => DisplayTree::single(Node::Document {
            markdown: payload.text.clone(),
        }),
        SourceFormat::Plain => {
            if looks_like_document(&payload.text) {
                // Suffix and sniff disagree; the sniff upgrades plain text.
                eprintln!("[interpret] key={key} suffix=txt sniff=document");
                DisplayTree::single(Node::Document {
                    markdown: payload.text.clone(),
                })
            } else {
                DisplayTree::single(Node::Preformatted {
                    text: payload.text.clone(),
                })
            }
        }
    }
}

fn interpret_structured(raw: &str, key: &str) -> DisplayTree {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("[interpret] key={key} parse_failed err={err}");
            return DisplayTree::single(Node::Preformatted {
                text: raw.to_string(),
            });
        }
    };
    DisplayTree {
        nodes: top_level_nodes(&value),
    }
}

fn top_level_nodes(value: &Value) -> Vec<Node> {
    match value {
        Value::Array(items) if items.is_empty() => vec![Node::Empty],
        Value::Array(items) => items.iter().map(element_node).collect(),
        Value::Object(map) if map.is_empty() => vec![Node::Empty],
        Value::Object(map) => object_nodes(map, 1, true),
        // Bare primitives carry no structure worth laying out.
        other => vec![Node::Preformatted {
            text: value_text(other),
        }],
    }
}

/// A top-level sequence renders element-per-paragraph; structured elements
/// fall back to pretty-printed preformatted blocks.
fn element_node(value: &Value) -> Node {
    match value {
        Value::Array(_) | Value::Object(_) => Node::Preformatted {
            text: pretty_json(value),
        },
        other => Node::Paragraph {
            text: value_text(other),
            tone: Tone::Plain,
        },
    }
}

fn object_nodes(map: &serde_json::Map<String, Value>, depth: u8, top: bool) -> Vec<Node> {
    let mut nodes = Vec::new();
    if top {
        if let Some(title) = map.get("title").and_then(Value::as_str) {
            nodes.push(Node::Heading {
                text: title.to_string(),
            });
        }
        if let Some(subtitle) = map.get("subtitle").and_then(Value::as_str) {
            nodes.push(Node::Subheading {
                text: subtitle.to_string(),
            });
        }
        if let Some(Value::Array(blocks)) = map.get("blocks") {
            nodes.extend(blocks.iter().map(block_node));
        }
    }
    let hint = map.get(FORMAT_HINT_KEY).and_then(Value::as_str);
    for (key, value) in map {
        if key == FORMAT_HINT_KEY {
            continue;
        }
        if top && matches!(key.as_str(), "title" | "subtitle" | "blocks") {
            continue;
        }
        let tone = if key == DESCRIPTION_KEY {
            hint.map_or(Tone::Plain, Tone::from_hint)
        } else {
            Tone::Plain
        };
        match value {
            Value::Array(items) => {
                nodes.push(Node::Label {
                    depth,
                    text: key.clone(),
                });
                nodes.push(Node::List {
                    items: items.iter().map(|item| item_nodes(item, depth + 1)).collect(),
                });
            }
            Value::Object(inner) => {
                nodes.push(Node::Label {
                    depth,
                    text: key.clone(),
                });
                nodes.extend(object_nodes(inner, depth + 1, false));
            }
            other => {
                nodes.push(Node::Entry {
                    depth,
                    label: key.clone(),
                    value: value_text(other),
                    tone,
                });
            }
        }
    }
    nodes
}

/// One list item, rendered as its own node sequence so structured items can
/// recurse with the same rules.
fn item_nodes(value: &Value, depth: u8) -> Vec<Node> {
    match value {
        Value::Array(inner) => vec![Node::List {
            items: inner.iter().map(|item| item_nodes(item, depth)).collect(),
        }],
        Value::Object(map) => object_nodes(map, depth, false),
        other => vec![Node::Paragraph {
            text: value_text(other),
            tone: Tone::Plain,
        }],
    }
}

/// Entry of a reserved `blocks` sequence: strings become paragraphs; keyed
/// items contribute their `text` field, toned by an optional `format` hint.
fn block_node(value: &Value) -> Node {
    match value {
        Value::String(text) => Node::Paragraph {
            text: text.clone(),
            tone: Tone::Plain,
        },
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                let tone = map
                    .get(FORMAT_HINT_KEY)
                    .and_then(Value::as_str)
                    .map_or(Tone::Plain, Tone::from_hint);
                Node::Paragraph {
                    text: text.to_string(),
                    tone,
                }
            } else {
                Node::Preformatted {
                    text: pretty_json(value),
                }
            }
        }
        other => Node::Paragraph {
            text: value_text(other),
            tone: Tone::Plain,
        },
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Content sniff for document-formatting markers: ATX headings, bullet
/// markers, and numbered items at line start.
pub fn looks_like_document(text: &str) -> bool {
    text.lines().any(|line| {
        let t = line.trim_start();
        if t.starts_with("- ") || t.starts_with("* ") {
            return true;
        }
        if t.starts_with('#') {
            let rest = t.trim_start_matches('#');
            if rest.starts_with(' ') && t.len() - rest.len() <= 6 {
                return true;
            }
        }
        let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
        digits > 0 && t[digits..].starts_with(". ")
    })
}
