//! Terminal rendering.
//!
//! Converts a [`DisplayTree`] into styled ratatui [`Text`] for the content
//! pane, and markdown documents into the same line vocabulary via
//! pulldown-cmark. Lines are wrapped here, at build time, so callers can
//! count rendered lines exactly (scroll clamping and the viewport band both
//! depend on line positions).

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
};

use crate::interpret::{DisplayTree, Node, Tone};

/// Style for a heading-like line at the given level (1 = most prominent).
pub fn heading_style(level: u8) -> Style {
    let color = match level {
        1 => Color::Magenta,
        2 => Color::Cyan,
        3 => Color::Green,
        _ => Color::Yellow,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn tone_style(tone: Tone) -> Style {
    match tone {
        Tone::Plain => Style::default(),
        Tone::Accent => Style::default().fg(Color::Cyan),
        Tone::Highlight => Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
        Tone::Warning => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Tone::Muted => Style::default().fg(Color::DarkGray),
    }
}

/// Render a display tree into terminal text, wrapped to `width` columns.
pub fn render_tree(tree: &DisplayTree, width: u16) -> Text<'static> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    push_nodes(&mut lines, &tree.nodes, width.max(10) as usize, 0);
    Text::from(lines)
}

/// A visible per-section failure block.
pub fn error_lines(message: &str, width: u16) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        "✗ section failed to load",
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    ))];
    for part in wrap_plain(message, (width.max(10) as usize).saturating_sub(2)) {
        lines.push(Line::from(Span::styled(
            format!("  {part}"),
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines.push(Line::default());
    lines
}

fn push_nodes(lines: &mut Vec<Line<'static>>, nodes: &[Node], width: usize, indent: usize) {
    for node in nodes {
        push_node(lines, node, width, indent);
    }
}

fn push_node(lines: &mut Vec<Line<'static>>, node: &Node, width: usize, indent: usize) {
    let pad = " ".repeat(indent);
    match node {
        Node::Heading { text } => {
            lines.push(Line::from(Span::styled(
                format!("{pad}{text}"),
                heading_style(1),
            )));
            lines.push(Line::default());
        }
        Node::Subheading { text } => {
            lines.push(Line::from(Span::styled(
                format!("{pad}{text}"),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )));
            lines.push(Line::default());
        }
        Node::Label { depth, text } => {
            lines.push(Line::from(Span::styled(
                format!("{pad}{text}"),
                heading_style(depth.saturating_add(1)),
            )));
            if indent == 0 {
                lines.push(Line::default());
            }
        }
        Node::Entry {
            label, value, tone, ..
        } => {
            let prefix = format!("{pad}{label}: ");
            let avail = width.saturating_sub(prefix.chars().count()).max(8);
            let mut first = true;
            for part in wrap_plain(value, avail) {
                if first {
                    lines.push(Line::from(vec![
                        Span::styled(prefix.clone(), Style::default().add_modifier(Modifier::BOLD)),
                        Span::styled(part, tone_style(*tone)),
                    ]));
                    first = false;
                } else {
                    lines.push(Line::from(Span::styled(
                        format!("{}{}", " ".repeat(prefix.chars().count()), part),
                        tone_style(*tone),
                    )));
                }
            }
            if indent == 0 {
                lines.push(Line::default());
            }
        }
        Node::Paragraph { text, tone } => {
            for part in wrap_plain(text, width.saturating_sub(indent).max(8)) {
                lines.push(Line::from(Span::styled(
                    format!("{pad}{part}"),
                    tone_style(*tone),
                )));
            }
            if indent == 0 {
                lines.push(Line::default());
            }
        }
        Node::List { items } => {
            for item in items {
                let mut item_lines: Vec<Line<'static>> = Vec::new();
                push_nodes(&mut item_lines, item, width.saturating_sub(4), 0);
                // Trailing blank separators have no place inside an item.
                while item_lines
                    .last()
                    .is_some_and(|l| l.spans.iter().all(|s| s.content.trim().is_empty()))
                {
                    item_lines.pop();
                }
                for (i, line) in item_lines.into_iter().enumerate() {
                    let marker = if i == 0 { "  • " } else { "    " };
                    let mut spans = vec![Span::styled(
                        format!("{pad}{marker}"),
                        Style::default().fg(Color::DarkGray),
                    )];
                    spans.extend(line.spans);
                    lines.push(Line::from(spans));
                }
            }
            if indent == 0 {
                lines.push(Line::default());
            }
        }
        Node::Preformatted { text } => {
            let border = "─".repeat(width.saturating_sub(indent + 2).clamp(4, 60));
            lines.push(Line::from(Span::styled(
                format!("{pad}┌{border}"),
                Style::default().fg(Color::DarkGray),
            )));
            for raw in text.lines() {
                lines.push(Line::from(vec![
                    Span::styled(format!("{pad}│ "), Style::default().fg(Color::DarkGray)),
                    Span::raw(raw.to_string()),
                ]));
            }
            lines.push(Line::from(Span::styled(
                format!("{pad}└{border}"),
                Style::default().fg(Color::DarkGray),
            )));
            lines.push(Line::default());
        }
        Node::Document { markdown } => {
            lines.extend(render_markdown(markdown, width.saturating_sub(indent) as u16));
        }
        Node::Empty => {
            lines.push(Line::from(Span::styled(
                format!("{pad}No content yet."),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )));
            lines.push(Line::default());
        }
    }
}

/// Convert markdown into styled terminal lines.
///
/// Inline emphasis is flattened to plain text; structure (headings, lists,
/// code fences, quotes, rules) keeps the pane's visual vocabulary.
pub fn render_markdown(markdown: &str, width: u16) -> Vec<Line<'static>> {
    let width = width.max(10) as usize;
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(markdown, opts);

    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut buf = String::new();
    let mut heading: Option<u8> = None;
    let mut in_code = false;
    let mut code_buf = String::new();
    let mut quote_depth: usize = 0;
    let mut list_stack: Vec<Option<u64>> = Vec::new();

    fn flush_paragraph(
        width: usize,
        lines: &mut Vec<Line<'static>>,
        buf: &mut String,
        quote_depth: usize,
        list_depth: usize,
        marker: Option<String>,
    ) {
        if buf.trim().is_empty() && marker.is_none() {
            buf.clear();
            return;
        }
        let quote_pad = "  ▌ ".repeat(quote_depth);
        let list_pad = "    ".repeat(list_depth.saturating_sub(1));
        let head = marker.unwrap_or_default();
        let avail = width
            .saturating_sub(
                quote_pad.chars().count() + list_pad.chars().count() + head.chars().count(),
            )
            .max(8);
        let mut first = true;
        for part in wrap_plain(buf.trim(), avail) {
            let lead = if first {
                head.clone()
            } else {
                " ".repeat(head.chars().count())
            };
            first = false;
            if quote_depth > 0 {
                lines.push(Line::from(vec![
                    Span::styled(quote_pad.clone(), Style::default().fg(Color::DarkGray)),
                    Span::raw(format!("{list_pad}{lead}{part}")),
                ]));
            } else if lead.is_empty() {
                lines.push(Line::from(Span::raw(format!("{list_pad}{part}"))));
            } else {
                lines.push(Line::from(vec![
                    Span::styled(
                        format!("{list_pad}{lead}"),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::raw(part),
                ]));
            }
        }
        buf.clear();
    }

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                buf.clear();
                heading = Some(heading_level(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(level) = heading.take() {
                    lines.push(Line::from(Span::styled(
                        buf.trim().to_string(),
                        heading_style(level),
                    )));
                    lines.push(Line::default());
                    buf.clear();
                }
            }
            Event::Start(Tag::Paragraph) => {
                if list_stack.is_empty() {
                    buf.clear();
                }
            }
            Event::End(TagEnd::Paragraph) => {
                // Inside list items the Item handler flushes instead.
                if list_stack.is_empty() {
                    flush_paragraph(width, &mut lines, &mut buf, quote_depth, 0, None);
                    if quote_depth == 0 {
                        lines.push(Line::default());
                    }
                }
            }
            Event::Start(Tag::List(start)) => list_stack.push(start),
            Event::End(TagEnd::List(_)) => {
                list_stack.pop();
                if list_stack.is_empty() {
                    lines.push(Line::default());
                }
            }
            Event::Start(Tag::Item) => buf.clear(),
            Event::End(TagEnd::Item) => {
                let depth = list_stack.len();
                let marker = match list_stack.last_mut() {
                    Some(Some(n)) => {
                        let m = format!("  {n}. ");
                        *n += 1;
                        m
                    }
                    _ => "  • ".to_string(),
                };
                flush_paragraph(width, &mut lines, &mut buf, quote_depth, depth, Some(marker));
            }
            Event::Start(Tag::CodeBlock(_)) => {
                in_code = true;
                code_buf.clear();
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                let border = "─".repeat(width.saturating_sub(2).clamp(4, 60));
                lines.push(Line::from(Span::styled(
                    format!("┌{border}"),
                    Style::default().fg(Color::DarkGray),
                )));
                for raw in code_buf.lines() {
                    lines.push(Line::from(vec![
                        Span::styled("│ ", Style::default().fg(Color::DarkGray)),
                        Span::raw(raw.to_string()),
                    ]));
                }
                lines.push(Line::from(Span::styled(
                    format!("└{border}"),
                    Style::default().fg(Color::DarkGray),
                )));
                lines.push(Line::default());
                code_buf.clear();
            }
            Event::Start(Tag::BlockQuote(_)) => quote_depth += 1,
            Event::End(TagEnd::BlockQuote(_)) => {
                quote_depth = quote_depth.saturating_sub(1);
                if quote_depth == 0 {
                    lines.push(Line::default());
                }
            }
            Event::Rule => {
                lines.push(Line::from(Span::styled(
                    "─".repeat(width.min(60)),
                    Style::default().fg(Color::DarkGray),
                )));
                lines.push(Line::default());
            }
            Event::Text(t) | Event::Code(t) => {
                if in_code {
                    code_buf.push_str(&t);
                } else {
                    buf.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => buf.push(' '),
            Event::TaskListMarker(done) => {
                buf.push_str(if done { "[x] " } else { "[ ] " });
            }
            _ => {}
        }
    }
    flush_paragraph(width, &mut lines, &mut buf, quote_depth, 0, None);
    lines
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Greedy word wrap. Words longer than the width are split hard so the
/// output never exceeds `width` columns.
pub fn wrap_plain(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for input_line in text.lines() {
        let mut current = String::new();
        for word in input_line.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();
            if current.is_empty() {
                if word_len <= width {
                    current.push_str(word);
                } else {
                    hard_split(word, width, &mut out, &mut current);
                }
            } else if current_len + 1 + word_len <= width {
                current.push(' ');
                current.push_str(word);
            } else {
                out.push(std::mem::take(&mut current));
                if word_len <= width {
                    current.push_str(word);
                } else {
                    hard_split(word, width, &mut out, &mut current);
                }
            }
        }
        out.push(current);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

fn hard_split(word: &str, width: usize, out: &mut Vec<String>, current: &mut String) {
    let chars: Vec<char> = word.chars().collect();
    let mut idx = 0;
    while chars.len() - idx > width {
        out.push(chars[idx..idx + width].iter().collect());
        idx += width;
    }
    *current = chars[idx..].iter().collect();
}
