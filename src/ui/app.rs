//! Main TUI application state and logic

use crate::replay::{ReplayEngine, ReplayError};
use crate::ui::panes::{self, SourceScrollState};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};
use std::io;
use std::time::{Duration, Instant};

/// Which pane is currently focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPane {
    Trace,
    Output,
    Tree,
    Memory,
}

impl FocusedPane {
    /// Move focus to the next pane (clockwise: trace -> output -> tree -> memory)
    pub fn next(self) -> Self {
        match self {
            FocusedPane::Trace => FocusedPane::Output,
            FocusedPane::Output => FocusedPane::Tree,
            FocusedPane::Tree => FocusedPane::Memory,
            FocusedPane::Memory => FocusedPane::Trace,
        }
    }

    /// Move focus to the previous pane (counter-clockwise)
    pub fn prev(self) -> Self {
        match self {
            FocusedPane::Trace => FocusedPane::Memory,
            FocusedPane::Output => FocusedPane::Trace,
            FocusedPane::Tree => FocusedPane::Output,
            FocusedPane::Memory => FocusedPane::Tree,
        }
    }
}

/// The main application state
pub struct App {
    /// Replay with its full history already recorded
    pub engine: ReplayEngine,

    /// The trace text being replayed
    pub source: String,

    pub focused_pane: FocusedPane,

    /// Per-pane scroll offsets
    pub source_scroll: SourceScrollState,
    pub output_scroll: usize,
    pub tree_scroll: usize,
    pub memory_scroll: usize,

    pub should_quit: bool,

    pub status_message: String,

    /// Whether auto-play mode is active
    pub is_playing: bool,

    /// Last time a step was taken in play mode
    pub last_play_time: Instant,

    /// Last time space was pressed (for debouncing)
    pub last_space_press: Instant,
}

impl App {
    pub fn new(engine: ReplayEngine, source: String) -> Self {
        let status_message = match engine.diagnostic() {
            Some(diagnostic) => format!("Replay stopped: {}", diagnostic.name),
            None => String::from("Ready!"),
        };
        let now = Instant::now();

        App {
            engine,
            source,
            focused_pane: FocusedPane::Trace,
            source_scroll: SourceScrollState::default(),
            output_scroll: 0,
            tree_scroll: 0,
            memory_scroll: 0,
            should_quit: false,
            status_message,
            is_playing: false,
            last_play_time: now,
            last_space_press: now.checked_sub(Duration::from_secs(1)).unwrap_or(now),
        }
    }

    /// Run the TUI application
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.render(f))?;

            if self.should_quit {
                break;
            }

            if self.is_playing && self.last_play_time.elapsed() >= Duration::from_secs(1) {
                if self.engine.step_forward().is_ok() {
                    self.status_message = "Playing...".to_string();
                    self.output_scroll = usize::MAX;
                } else {
                    self.is_playing = false;
                    self.status_message = "Playback complete".to_string();
                }
                self.last_play_time = Instant::now();
            }

            // Poll with a timeout so auto-play keeps ticking
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key);
                    }
                }
            }
        }

        Ok(())
    }

    fn render(&mut self, frame: &mut Frame) {
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(frame.area());

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(main_chunks[0]);

        // Left column: Trace (top) | Output (bottom)
        let left_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(columns[0]);

        // Right column: Tree (top) | Allocations (bottom)
        let right_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(columns[1]);

        let is_error = self.engine.at_diagnostic();
        let current_line = if self.engine.executed() == 0 {
            0
        } else {
            self.engine.current_location().line
        };

        panes::render_source_pane(
            frame,
            left_rows[0],
            &self.source,
            current_line,
            is_error,
            self.focused_pane == FocusedPane::Trace,
            &mut self.source_scroll,
        );

        panes::render_output_pane(
            frame,
            left_rows[1],
            self.engine.output(),
            self.focused_pane == FocusedPane::Output,
            &mut self.output_scroll,
        );

        panes::render_tree_pane(
            frame,
            right_rows[0],
            self.engine.memory().tree(),
            self.focused_pane == FocusedPane::Tree,
            &mut self.tree_scroll,
        );

        panes::render_memory_pane(
            frame,
            right_rows[1],
            self.engine.memory(),
            self.engine.bindings(),
            self.focused_pane == FocusedPane::Memory,
            &mut self.memory_scroll,
        );

        panes::render_status_bar(
            frame,
            main_chunks[1],
            &self.status_message,
            self.engine.history_position(),
            self.engine.total_snapshots(),
            is_error,
            self.is_playing,
        );
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => {
                self.should_quit = true;
            }
            // Number keys step forward N times directly
            KeyCode::Char(c @ '1'..='9') => {
                self.is_playing = false;
                let n = c.to_digit(10).unwrap_or(1);
                let mut stepped = 0;
                for _ in 0..n {
                    if self.engine.step_forward().is_err() {
                        break;
                    }
                    stepped += 1;
                }
                self.status_message = format!("Stepped forward {} step(s)", stepped);
                self.output_scroll = usize::MAX;
            }
            KeyCode::Tab => {
                self.focused_pane = self.focused_pane.next();
            }
            KeyCode::BackTab => {
                self.focused_pane = self.focused_pane.prev();
            }
            KeyCode::Left => {
                self.is_playing = false;
                let result = self.engine.step_backward();
                self.report_step(result, "Stepped backward", "Cannot step backward");
            }
            KeyCode::Right => {
                self.is_playing = false;
                let result = self.engine.step_forward();
                self.report_step(result, "Stepped forward", "Cannot step forward");
            }
            KeyCode::Up => self.scroll(-1),
            KeyCode::Down => self.scroll(1),
            KeyCode::Char(' ') => {
                // Toggle auto-play (200ms debounce against key repeat)
                if self.last_space_press.elapsed() >= Duration::from_millis(200) {
                    self.last_space_press = Instant::now();
                    self.is_playing = !self.is_playing;
                    if self.is_playing {
                        let now = Instant::now();
                        self.last_play_time =
                            now.checked_sub(Duration::from_secs(1)).unwrap_or(now);
                        self.status_message = "Playing...".to_string();
                    } else {
                        self.status_message = "Paused".to_string();
                    }
                }
            }
            KeyCode::Enter => {
                self.is_playing = false;
                let result = self.engine.jump_to_end();
                self.report_step(result, "Jumped to end", "Cannot jump to end");
            }
            KeyCode::Backspace => {
                self.is_playing = false;
                let result = self.engine.rewind_to_start();
                self.report_step(result, "Jumped to start", "Cannot jump to start");
            }
            _ => {}
        }
    }

    /// Scroll the focused pane; `delta` is -1 (up) or 1 (down)
    fn scroll(&mut self, delta: isize) {
        let offset = match self.focused_pane {
            FocusedPane::Trace => {
                // Scrolling moves the pinned current line the other way
                if let Some(row) = self.source_scroll.target_line_row {
                    self.source_scroll.target_line_row = Some(row.saturating_add_signed(-delta));
                }
                return;
            }
            FocusedPane::Output => &mut self.output_scroll,
            FocusedPane::Tree => &mut self.tree_scroll,
            FocusedPane::Memory => &mut self.memory_scroll,
        };
        *offset = offset.saturating_add_signed(delta);
    }

    fn report_step(&mut self, result: Result<(), ReplayError>, done: &str, refused: &str) {
        match result {
            Ok(()) => {
                self.status_message = done.to_string();
                self.output_scroll = usize::MAX;
            }
            Err(ReplayError::History { message }) => {
                self.status_message = format!("{}: {}", refused, message);
            }
            Err(e) => {
                self.status_message = format!("Error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_cycle() {
        let mut pane = FocusedPane::Trace;
        for _ in 0..4 {
            pane = pane.next();
        }
        assert_eq!(pane, FocusedPane::Trace);
        assert_eq!(FocusedPane::Trace.prev(), FocusedPane::Memory);
        assert_eq!(FocusedPane::Memory.next().prev(), FocusedPane::Memory);
    }
}
