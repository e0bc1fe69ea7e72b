//! Segment tree pane rendering

use crate::memory::SegmentTree;
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn dump_line_style(line: &str) -> Style {
    let style = if line.contains("Uninit") {
        Style::default().fg(DEFAULT_THEME.secondary)
    } else if line.contains("Memset") {
        Style::default().fg(DEFAULT_THEME.success)
    } else {
        Style::default().fg(DEFAULT_THEME.unknown)
    };

    if line.contains("claimed=") {
        style.add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

/// Render every materialized node, one per row
pub fn render_tree_pane(
    frame: &mut Frame,
    area: Rect,
    tree: &SegmentTree,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let stats = tree.stats();
    let title = format!(
        " Segment Tree ({} nodes, {} buffers, {} KiB) ",
        stats.nodes,
        stats.buffers,
        stats.heap_bytes / 1024
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(super::border_style(is_focused));

    let dump = tree.dump();
    if dump.is_empty() {
        let range = tree.range();
        let paragraph = Paragraph::new(format!(
            "(empty: [0x{:x}, 0x{:x}) is untouched)",
            range.start, range.end
        ))
        .block(block)
        .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let visible_height = area.height.saturating_sub(2).max(1) as usize;
    super::clamp_scroll(scroll_offset, dump.len(), visible_height);

    let lines: Vec<Line> = dump
        .iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .map(|line| Line::from(Span::styled(line.clone(), dump_line_style(line))))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}
