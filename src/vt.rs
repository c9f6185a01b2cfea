//! In-process virtual terminal: a VT sequence parser (the `vte` crate, the
//! same parser Alacritty uses) driving a 2-D grid of glyphs.
//!
//! Tracks cursor position, title, and a real screen buffer so the status
//! pipeline can read back the visible lines a terminal emulator would
//! actually render, including scroll-on-linefeed and erase-display/
//! erase-line, both of which matter for full-screen TUIs (Claude Code,
//! Codex) that repaint via cursor-home + erase-down on every frame.

use vte::{Params, Parser, Perform};

/// One cell of the screen grid.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub ch: char,
    pub faint: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self { ch: '\0', faint: false }
    }
}

/// A fixed-size `rows x cols` screen buffer plus cursor/attribute state,
/// fed by a `vte::Parser`.
pub struct VirtualTerminal {
    parser: Parser,
    grid: Grid,
}

struct Grid {
    rows: u16,
    cols: u16,
    cells: Vec<Vec<Cell>>,
    cursor_row: u16,
    cursor_col: u16,
    faint: bool,
    title: Option<String>,
}

impl VirtualTerminal {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            parser: Parser::new(),
            grid: Grid::new(rows, cols),
        }
    }

    /// Feeds raw (already UTF-8 decoded, re-encoded as bytes for the
    /// parser) terminal output through the VT sequence parser.
    pub fn write(&mut self, data: &[u8]) {
        let mut parser = std::mem::replace(&mut self.parser, Parser::new());
        parser.advance(&mut self.grid, data);
        self.parser = parser;
    }

    /// Resets state and resizes the grid. Does not attempt to reflow
    /// existing content.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.grid = Grid::new(rows, cols);
    }

    /// Returns the currently visible screen as one `String` per row, with
    /// unset cells (never painted, or erased) omitted rather than rendered
    /// as spaces or NULs, so a detector scanning for a pattern never sees
    /// padding characters it didn't write.
    pub fn visible_lines(&self) -> Vec<String> {
        self.grid
            .cells
            .iter()
            .map(|row| row.iter().filter(|c| c.ch != '\0').map(|c| c.ch).collect())
            .collect()
    }

    pub fn cols(&self) -> u16 {
        self.grid.cols
    }

    pub fn rows(&self) -> u16 {
        self.grid.rows
    }

    pub fn title(&self) -> Option<&str> {
        self.grid.title.as_deref()
    }

    /// Whether the first non-default cell of the input region at `row`
    /// carries the "faint" SGR attribute, used by the Codex detector to
    /// distinguish a placeholder prompt from real typed input.
    pub fn is_faint_at(&self, row: u16, col: u16) -> bool {
        self.grid
            .cells
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .map(|c| c.faint)
            .unwrap_or(false)
    }
}

impl Grid {
    fn new(rows: u16, cols: u16) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            rows,
            cols,
            cells: vec![vec![Cell::default(); cols as usize]; rows as usize],
            cursor_row: 0,
            cursor_col: 0,
            faint: false,
            title: None,
        }
    }

    fn scroll_up_one(&mut self) {
        self.cells.remove(0);
        self.cells.push(vec![Cell::default(); self.cols as usize]);
    }

    fn advance_row(&mut self) {
        if self.cursor_row + 1 >= self.rows {
            self.scroll_up_one();
        } else {
            self.cursor_row += 1;
        }
    }

    fn clear_row_range(&mut self, row: usize, from: usize, to: usize) {
        if let Some(r) = self.cells.get_mut(row) {
            for cell in r.iter_mut().take(to.min(r.len())).skip(from) {
                *cell = Cell::default();
            }
        }
    }
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        if (self.cursor_row as usize) < self.cells.len() {
            if let Some(cell) = self.cells[self.cursor_row as usize].get_mut(self.cursor_col as usize) {
                *cell = Cell { ch: c, faint: self.faint };
            }
        }
        self.cursor_col += 1;
        if self.cursor_col >= self.cols {
            self.cursor_col = 0;
            self.advance_row();
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x0D => self.cursor_col = 0,
            0x0A => self.advance_row(),
            0x08 => self.cursor_col = self.cursor_col.saturating_sub(1),
            0x09 => {
                self.cursor_col = ((self.cursor_col / 8) + 1) * 8;
                if self.cursor_col >= self.cols {
                    self.cursor_col = self.cols - 1;
                }
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if let Some(&[b'0' | b'1' | b'2']) = params.first() {
            if let Some(title_bytes) = params.get(1) {
                if let Ok(title) = std::str::from_utf8(title_bytes) {
                    self.title = Some(title.to_string());
                }
            }
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        let param = |idx: usize, default: u16| -> u16 {
            params
                .iter()
                .nth(idx)
                .and_then(|p| p.first().copied())
                .filter(|&v| v != 0)
                .unwrap_or(default)
        };

        match action {
            'A' => self.cursor_row = self.cursor_row.saturating_sub(param(0, 1)),
            'B' => {
                self.cursor_row = self.cursor_row.saturating_add(param(0, 1)).min(self.rows - 1)
            }
            'C' => {
                self.cursor_col = self.cursor_col.saturating_add(param(0, 1)).min(self.cols - 1)
            }
            'D' => self.cursor_col = self.cursor_col.saturating_sub(param(0, 1)),
            'H' | 'f' => {
                self.cursor_row = param(0, 1).saturating_sub(1).min(self.rows - 1);
                self.cursor_col = param(1, 1).saturating_sub(1).min(self.cols - 1);
            }
            'J' => {
                let mode = param(0, 0);
                let row = self.cursor_row as usize;
                let col = self.cursor_col as usize;
                match mode {
                    0 => {
                        self.clear_row_range(row, col, self.cols as usize);
                        for r in (row + 1)..self.cells.len() {
                            self.clear_row_range(r, 0, self.cols as usize);
                        }
                    }
                    1 => {
                        for r in 0..row {
                            self.clear_row_range(r, 0, self.cols as usize);
                        }
                        self.clear_row_range(row, 0, col + 1);
                    }
                    2 | 3 => {
                        for r in 0..self.cells.len() {
                            self.clear_row_range(r, 0, self.cols as usize);
                        }
                    }
                    _ => {}
                }
            }
            'K' => {
                let mode = param(0, 0);
                let row = self.cursor_row as usize;
                let col = self.cursor_col as usize;
                match mode {
                    0 => self.clear_row_range(row, col, self.cols as usize),
                    1 => self.clear_row_range(row, 0, col + 1),
                    2 => self.clear_row_range(row, 0, self.cols as usize),
                    _ => {}
                }
            }
            'm' => {
                // SGR: only the "faint" attribute (2) and its reset (22)
                // matter to the detectors; everything else is ignored.
                if params.iter().count() == 0 {
                    self.faint = false;
                }
                for p in params.iter() {
                    match p.first().copied().unwrap_or(0) {
                        0 => self.faint = false,
                        2 => self.faint = true,
                        22 => self.faint = false,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_and_wraps() {
        let mut vt = VirtualTerminal::new(3, 5);
        vt.write(b"hello");
        assert_eq!(vt.visible_lines()[0], "hello");
    }

    #[test]
    fn linefeed_scrolls_when_at_bottom() {
        let mut vt = VirtualTerminal::new(2, 10);
        vt.write(b"line1\r\nline2\r\nline3");
        let lines = vt.visible_lines();
        assert_eq!(lines[0], "line2");
        assert_eq!(lines[1], "line3");
    }

    #[test]
    fn erase_display_clears_cells() {
        let mut vt = VirtualTerminal::new(2, 5);
        vt.write(b"hello");
        vt.write(b"\x1b[H\x1b[2J");
        assert_eq!(vt.visible_lines()[0], "");
    }

    #[test]
    fn separator_line_is_faithfully_reproduced() {
        let mut vt = VirtualTerminal::new(1, 5);
        vt.write("─────".as_bytes());
        assert_eq!(vt.visible_lines()[0], "─────");
    }
}
