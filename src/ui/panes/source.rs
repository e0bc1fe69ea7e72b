//! Trace pane rendering with highlighting
//!
//! Operation keywords, `%bindings`, numbers, strings and `#` comments get their
//! own colors. The statement that produced the current state is highlighted and
//! kept at a fixed row while stepping.

use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const KEYWORDS: &[&str] = &[
    "range", "alloc", "store", "load", "memset", "memchr", "memmove", "free", "storeint",
    "loadint", "strlen", "frame", "release",
];

const ARGUMENTS: &[&str] = &[
    "malloc", "calloc", "alloca", "global", "uninit", "unknown", "zero", "push", "pop",
];

/// Highlight one line of trace text
fn highlight_trace_line(line: &str) -> Line<'_> {
    let mut spans = Vec::new();
    let mut rest = line;

    while let Some(c) = rest.chars().next() {
        if c == '#' {
            spans.push(Span::styled(rest, Style::default().fg(DEFAULT_THEME.comment)));
            break;
        }

        if c == '"' {
            let mut end = 1;
            let bytes = rest.as_bytes();
            while end < bytes.len() && bytes[end] != b'"' {
                end += if bytes[end] == b'\\' { 2 } else { 1 };
            }
            let mut end = (end + 1).min(rest.len());
            while !rest.is_char_boundary(end) {
                end += 1;
            }
            let (text, tail) = rest.split_at(end);
            spans.push(Span::styled(text, Style::default().fg(DEFAULT_THEME.string)));
            rest = tail;
            continue;
        }

        if c.is_alphanumeric() || c == '_' || c == '%' {
            let end = rest
                .char_indices()
                .skip(1)
                .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_'))
                .map_or(rest.len(), |(idx, _)| idx);
            let (word, tail) = rest.split_at(end);
            spans.push(Span::styled(word, word_style(word)));
            rest = tail;
            continue;
        }

        let (text, tail) = rest.split_at(c.len_utf8());
        let style = match c {
            '(' | ')' | '[' | ']' => Style::default().fg(DEFAULT_THEME.primary),
            _ => Style::default().fg(DEFAULT_THEME.fg),
        };
        spans.push(Span::styled(text, style));
        rest = tail;
    }

    Line::from(spans)
}

fn word_style(word: &str) -> Style {
    if word.starts_with('%') {
        Style::default().fg(DEFAULT_THEME.name)
    } else if word.starts_with(|c: char| c.is_ascii_digit()) {
        Style::default().fg(DEFAULT_THEME.number)
    } else if KEYWORDS.contains(&word) {
        Style::default()
            .fg(DEFAULT_THEME.keyword)
            .add_modifier(Modifier::BOLD)
    } else if ARGUMENTS.contains(&word) {
        Style::default().fg(DEFAULT_THEME.secondary)
    } else {
        Style::default().fg(DEFAULT_THEME.fg)
    }
}

/// Scroll state for the trace pane
#[derive(Debug, Default)]
pub struct SourceScrollState {
    pub offset: usize,
    /// Visual row the current line is pinned to (None until first render)
    pub target_line_row: Option<usize>,
}

/// Render the trace pane
///
/// `current_line` is 1-based; `is_error` marks it as the line that raised the
/// fatal signal.
pub fn render_source_pane(
    frame: &mut Frame,
    area: Rect,
    source: &str,
    current_line: usize,
    is_error: bool,
    is_focused: bool,
    scroll_state: &mut SourceScrollState,
) {
    let block = Block::default()
        .title(" Trace ")
        .borders(Borders::ALL)
        .border_style(super::border_style(is_focused));

    let lines: Vec<&str> = source.lines().collect();
    let total_lines = lines.len();
    let visible_height = area.height.saturating_sub(2).max(1) as usize;

    // Center the current line on first render, then keep it where the user put it
    let target_row = scroll_state
        .target_line_row
        .unwrap_or(visible_height / 2)
        .min(visible_height.saturating_sub(1));
    scroll_state.target_line_row = Some(target_row);

    if current_line > 0 && current_line <= total_lines {
        scroll_state.offset = (current_line - 1).saturating_sub(target_row);
        super::clamp_scroll(&mut scroll_state.offset, total_lines, visible_height);
    }

    let visible_lines: Vec<Line> = lines
        .iter()
        .enumerate()
        .skip(scroll_state.offset)
        .take(visible_height)
        .map(|(idx, line)| {
            let line_num = idx + 1;
            let is_current = line_num == current_line;

            let num_style = if is_current && is_error {
                Style::default()
                    .fg(DEFAULT_THEME.error)
                    .add_modifier(Modifier::BOLD)
            } else if is_current {
                Style::default()
                    .fg(DEFAULT_THEME.secondary)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(DEFAULT_THEME.comment)
            };

            let mut content = highlight_trace_line(line);
            if is_current && is_error {
                let error_style = Style::default()
                    .bg(DEFAULT_THEME.error)
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD);
                for span in &mut content.spans {
                    span.style = error_style;
                }
            } else if is_current {
                for span in &mut content.spans {
                    span.style = span.style.bg(DEFAULT_THEME.current_line_bg);
                }
            }

            let mut spans = vec![Span::styled(format!("{:4} ", line_num), num_style)];
            spans.extend(content.spans);
            Line::from(spans)
        })
        .collect();

    let paragraph = Paragraph::new(visible_lines).block(block);
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &Line<'_>) -> Vec<String> {
        line.spans.iter().map(|span| span.content.to_string()).collect()
    }

    #[test]
    fn test_highlight_splits_words() {
        let line = highlight_trace_line("store %buf+4 \"hi\" # note");
        assert_eq!(
            texts(&line),
            vec!["store", " ", "%buf", "+", "4", " ", "\"hi\"", " ", "# note"]
        );
        assert_eq!(line.spans[2].style.fg, Some(DEFAULT_THEME.name));
        assert_eq!(line.spans[8].style.fg, Some(DEFAULT_THEME.comment));
    }

    #[test]
    fn test_unterminated_string_does_not_panic() {
        let line = highlight_trace_line("store 0x10 \"abc\\");
        assert_eq!(texts(&line).concat(), "store 0x10 \"abc\\");
    }
}
