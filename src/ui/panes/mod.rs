//! TUI pane rendering modules
//!
//! # Pane Modules
//!
//! - [`source`]: Trace text with highlighting and the current statement
//! - [`output`]: One line per executed statement, fatal signals in red
//! - [`tree`]: Materialized segment tree nodes, indented by depth
//! - [`memory`]: Allocations with a hex dump of their first bytes
//! - [`status`]: Status bar with keybindings and replay position
//!
//! Each pane module exports a `render_*` function and, where the pane
//! scrolls, the scroll state it keeps between frames.

pub mod memory;
pub mod output;
pub mod source;
pub mod status;
pub mod tree;

pub use memory::render_memory_pane;
pub use output::render_output_pane;
pub use source::{render_source_pane, SourceScrollState};
pub use status::render_status_bar;
pub use tree::render_tree_pane;

use crate::ui::theme::DEFAULT_THEME;
use ratatui::style::{Modifier, Style};

/// Border style shared by every pane
pub(crate) fn border_style(is_focused: bool) -> Style {
    if is_focused {
        Style::default()
            .fg(DEFAULT_THEME.border_focused)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(DEFAULT_THEME.border_normal)
    }
}

/// Clamp `offset` so a list of `total` items still fills `visible` rows
pub(crate) fn clamp_scroll(offset: &mut usize, total: usize, visible: usize) {
    if total > visible {
        *offset = (*offset).min(total - visible);
    } else {
        *offset = 0;
    }
}
