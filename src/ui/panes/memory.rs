//! Allocation pane rendering with hex dumps
//!
//! Lists every live allocation in address order. Each entry shows its
//! provenance and region, the `%names` bound to it and the first bytes a load
//! would observe. Bytes a load would reject are shown as `??`.

use crate::memory::{Address, LiveAllocation, MemorySimulator};
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use rustc_hash::FxHashMap;

/// Bytes shown per allocation
const PREVIEW_BYTES: usize = 64;
const BYTES_PER_ROW: usize = 16;

/// Format one hex row, `??` for unreadable bytes
fn hex_row(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|byte| match byte {
            Some(b) => format!("{:02x}", b),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn header_line(alloc: &LiveAllocation, names: &[&str]) -> Line<'static> {
    let mut spans = vec![
        Span::styled(
            format!("0x{:x}", alloc.start),
            Style::default()
                .fg(DEFAULT_THEME.number)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" {} ", alloc.status),
            Style::default().fg(DEFAULT_THEME.keyword),
        ),
        Span::styled(
            format!("{} bytes, {}", alloc.size, alloc.fill),
            Style::default().fg(DEFAULT_THEME.fg),
        ),
        Span::styled(
            format!(" [{}]", alloc.region),
            Style::default().fg(DEFAULT_THEME.comment),
        ),
    ];
    for name in names {
        spans.push(Span::styled(
            format!(" %{}", name),
            Style::default().fg(DEFAULT_THEME.name),
        ));
    }
    Line::from(spans)
}

/// Render the allocations of `memory`
pub fn render_memory_pane(
    frame: &mut Frame,
    area: Rect,
    memory: &MemorySimulator,
    bindings: &FxHashMap<String, Address>,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let allocations = memory.allocations();
    let block = Block::default()
        .title(format!(
            " Allocations ({}, frame depth {}) ",
            allocations.len(),
            memory.frame_depth()
        ))
        .borders(Borders::ALL)
        .border_style(super::border_style(is_focused));

    if allocations.is_empty() {
        let paragraph = Paragraph::new("(nothing allocated)")
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let mut names_by_address: FxHashMap<Address, Vec<&str>> = FxHashMap::default();
    for (name, addr) in bindings {
        names_by_address.entry(*addr).or_default().push(name.as_str());
    }
    for names in names_by_address.values_mut() {
        names.sort_unstable();
    }

    let byte_style = Style::default().fg(DEFAULT_THEME.fg);
    let mut lines: Vec<Line> = Vec::new();
    for alloc in &allocations {
        let names = names_by_address
            .get(&alloc.start)
            .map(Vec::as_slice)
            .unwrap_or_default();
        lines.push(header_line(alloc, names));

        let shown = (alloc.size as usize).min(PREVIEW_BYTES);
        let bytes = memory.tree().peek_range(alloc.start, shown);
        for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
            lines.push(Line::from(vec![
                Span::styled(
                    format!("  +{:04x}  ", row * BYTES_PER_ROW),
                    Style::default().fg(DEFAULT_THEME.comment),
                ),
                Span::styled(hex_row(chunk), byte_style),
            ]));
        }
        if alloc.size as usize > shown {
            lines.push(Line::from(Span::styled(
                format!("  ... {} more bytes", alloc.size as usize - shown),
                Style::default().fg(DEFAULT_THEME.comment),
            )));
        }
    }

    let visible_height = area.height.saturating_sub(2).max(1) as usize;
    super::clamp_scroll(scroll_offset, lines.len(), visible_height);
    let visible: Vec<Line> = lines
        .into_iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .collect();

    frame.render_widget(Paragraph::new(visible).block(block), area);
}
