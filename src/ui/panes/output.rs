//! Replay output pane rendering

use crate::snapshot::OutputLog;
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    widgets::{Block, Borders, List, ListItem, Padding, Paragraph},
    Frame,
};

/// Render the replay output pane
pub fn render_output_pane(
    frame: &mut Frame,
    area: Rect,
    output: &OutputLog,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = Block::default()
        .title(" Output ")
        .borders(Borders::ALL)
        .border_style(super::border_style(is_focused));

    if output.lines.is_empty() {
        let paragraph = Paragraph::new("(no output)")
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let block = block.padding(Padding::new(1, 0, 0, 0));
    let visible_height = area.height.saturating_sub(2).max(1) as usize;
    super::clamp_scroll(scroll_offset, output.lines.len(), visible_height);

    let items: Vec<ListItem> = output
        .lines
        .iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .map(|line| {
            let style = if line.is_error {
                Style::default()
                    .fg(DEFAULT_THEME.error)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(DEFAULT_THEME.fg)
            };
            ListItem::new(format!("{:4}  {}", line.location.line, line.text)).style(style)
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}
