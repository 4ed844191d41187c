// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Narrow interface to the terminal emulator that owns the screen grid.
//!
//! The history core never interprets escape sequences itself. It hands
//! flushed text to an [`Emulator`] and reads rows back (text plus the colors
//! of the first cell) when archiving or filtering.

use crate::error::Result;
use crate::format::{CellColors, LineEntry};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// One row of the grid, visible screen or scrollback
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GridRow {
    pub text: String,
    pub colors: CellColors,
}

impl GridRow {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            colors: CellColors::default(),
        }
    }

    pub fn with_colors(mut self, colors: CellColors) -> Self {
        self.colors = colors;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Emulator: Send {
    /// Interpret flushed output
    fn feed(&mut self, text: &str) -> Result<()>;

    /// Rows holding content: scrollback plus the visible screen down to the
    /// last non-blank row or the row the cursor is writing, whichever is further down
    fn row_count(&mut self) -> usize;

    /// Rows `start..end`, clamped to `row_count()`
    fn rows(&mut self, start: usize, end: usize) -> Vec<GridRow>;

    /// Drop rows `0..row`; returns how many were removed
    fn clear_rows_above(&mut self, row: usize) -> Result<usize>;

    /// Most rows the grid keeps before dropping the oldest, `None` if unbounded
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Full-screen programs (editors, pagers) draw on the alternate screen
    fn in_alternate_screen(&self) -> bool;
}

/// Extract rows `start..end` as archive content lines.
///
/// Blank rows are skipped and trailing whitespace is trimmed; each entry keeps
/// its absolute grid row.
pub fn extract_lines(emulator: &mut dyn Emulator, start: usize, end: usize) -> Vec<LineEntry> {
    emulator
        .rows(start, end)
        .into_iter()
        .enumerate()
        .filter(|(_, row)| !row.is_blank())
        .map(|(offset, row)| {
            LineEntry::content(start + offset, row.text.trim_end(), Some(row.colors))
        })
        .collect()
}

/// Rows the parser's own scrollback holds between compactions, per screen row
const PARSER_SCROLLBACK_SCREENS: usize = 4;

/// Escape-sequence position while scanning output, enough to tell whether a
/// byte is printable text and whether a piece ends between sequences
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    #[default]
    Text,
    Esc,
    Csi,
    Osc,
}

impl EscapeState {
    fn next(self, ch: char) -> Self {
        match (self, ch) {
            (Self::Text, '\x1b') => Self::Esc,
            (Self::Text, _) => Self::Text,
            (Self::Esc, '[') => Self::Csi,
            (Self::Esc, ']') => Self::Osc,
            (Self::Esc, _) => Self::Text,
            (Self::Csi, c) if ('\x40'..='\x7e').contains(&c) => Self::Text,
            (Self::Csi, _) => Self::Csi,
            (Self::Osc, '\x07') => Self::Text,
            (Self::Osc, '\x1b') => Self::Esc,
            (Self::Osc, _) => Self::Osc,
        }
    }
}

/// Scan position carried across `feed` calls
#[derive(Debug, Default, Clone, Copy)]
struct ScrollScan {
    state: EscapeState,
    col: usize,
}

/// [`Emulator`] backed by the `vt100` crate.
///
/// vt100 can only show scrollback up to one screen above the visible rows,
/// so rows are copied out as they scroll off. Input is fed in pieces that
/// can scroll at most one screen each, the scrolled rows are read back after
/// every piece and kept in `history`. The parser is periodically rebuilt from
/// its visible screen so its own bounded scrollback never fills up.
pub struct VtEmulator {
    parser: vt100::Parser,
    rows: u16,
    cols: u16,
    scrollback: usize,
    /// Rows that scrolled off the screen, oldest first
    history: VecDeque<GridRow>,
    /// Rows of the parser's scrollback already copied into `history`
    harvested: usize,
    evicted: usize,
    scan: ScrollScan,
}

fn new_parser(rows: u16, cols: u16) -> vt100::Parser {
    vt100::Parser::new(rows, cols, usize::from(rows.max(1)) * PARSER_SCROLLBACK_SCREENS)
}

impl VtEmulator {
    pub fn new(rows: u16, cols: u16, scrollback: usize) -> Self {
        Self {
            parser: new_parser(rows, cols),
            rows,
            cols,
            scrollback,
            history: VecDeque::new(),
            harvested: 0,
            evicted: 0,
            scan: ScrollScan::default(),
        }
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.rows = rows;
        self.cols = cols;
        self.parser.set_size(rows, cols);
    }

    /// Rows dropped from the front because scrollback was full
    pub fn evicted_rows(&self) -> usize {
        self.evicted
    }

    /// Rows currently held in the parser's own scrollback
    fn parser_scrollback_len(&mut self) -> usize {
        // vt100 clamps the offset to the scrollback it actually holds
        self.parser.set_scrollback(usize::MAX);
        let len = self.parser.screen().scrollback();
        self.parser.set_scrollback(0);
        len
    }

    fn visible_content_rows(&self) -> usize {
        let screen = self.parser.screen();
        let (cursor_row, cursor_col) = screen.cursor_position();
        let last_non_blank = screen
            .rows(0, self.cols)
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(idx, _)| idx + 1)
            .last()
            .unwrap_or(0);
        // A cursor parked at column 0 has not written to its row yet
        let cursor_rows = cursor_row as usize + usize::from(cursor_col > 0);
        last_non_blank.max(cursor_rows)
    }

    /// Split `text` into pieces that can each scroll at most one screen.
    ///
    /// Line feeds, IND/NEL and every `cols` printed characters count as a
    /// scroll; the estimate errs high. The flag tells whether the piece ends
    /// outside an escape sequence.
    fn split_pieces<'a>(&mut self, text: &'a str) -> Vec<(&'a str, bool)> {
        let budget = usize::from(self.rows.max(1));
        let cols = usize::from(self.cols.max(1));
        let mut pieces = Vec::new();
        let (mut start, mut scrolls) = (0, 0);

        for (idx, ch) in text.char_indices() {
            let scrolled = match ch {
                '\n' | '\x0b' | '\x0c' => {
                    self.scan.col = 0;
                    true
                }
                '\r' => {
                    self.scan.col = 0;
                    false
                }
                'D' | 'E' if self.scan.state == EscapeState::Esc => true,
                _ => {
                    self.scan.col += if ch.is_ascii() { 1 } else { 2 };
                    if self.scan.col >= cols {
                        self.scan.col = 0;
                        true
                    } else {
                        false
                    }
                }
            };
            self.scan.state = self.scan.state.next(ch);
            scrolls += usize::from(scrolled);

            if scrolls >= budget {
                let end = idx + ch.len_utf8();
                pieces.push((&text[start..end], self.scan.state == EscapeState::Text));
                start = end;
                scrolls = 0;
            }
        }
        if start < text.len() {
            pieces.push((&text[start..], self.scan.state == EscapeState::Text));
        }
        pieces
    }

    fn push_history(&mut self, row: GridRow) {
        self.history.push_back(row);
        if self.history.len() > self.scrollback {
            self.history.pop_front();
            self.evicted += 1;
        }
    }

    /// Copy rows that scrolled into the parser's scrollback since the last call
    fn harvest(&mut self) {
        if self.parser.screen().alternate_screen() {
            return;
        }
        let held = self.parser_scrollback_len();
        let fresh = held.saturating_sub(self.harvested);
        if fresh == 0 {
            self.harvested = held;
            return;
        }

        let window = fresh.min(usize::from(self.rows));
        if window < fresh {
            // Only a bulk scroll (CSI S) moves more than a screen at once
            warn!(lost = fresh - window, "Rows scrolled past the readable window");
            for _ in window..fresh {
                self.push_history(GridRow::default());
            }
        }

        self.parser.set_scrollback(window);
        let cols = self.cols;
        let screen = self.parser.screen();
        let copied: Vec<GridRow> = (0..window as u16).map(|row| read_row(screen, row, cols)).collect();
        self.parser.set_scrollback(0);

        let before = self.evicted;
        for row in copied {
            self.push_history(row);
        }
        if self.evicted > before {
            debug!(evicted = self.evicted - before, "Scrollback full, dropped oldest rows");
        }
        self.harvested = held;
    }

    /// Rebuild the parser from its visible screen, emptying its scrollback
    fn compact(&mut self) {
        if self.harvested < usize::from(self.rows) || self.parser.screen().alternate_screen() {
            return;
        }
        let state = self.parser.screen().state_formatted();
        self.parser = new_parser(self.rows, self.cols);
        self.parser.process(&state);
        self.harvested = self.parser_scrollback_len();
        trace!("Compacted emulator scrollback");
    }

    /// Rebuild the visible screen without its first `count` rows
    fn drop_screen_rows(&mut self, count: usize) {
        let visible = self.visible_content_rows();
        let (cursor_row, cursor_col) = self.parser.screen().cursor_position();
        let kept: Vec<Vec<u8>> = self
            .parser
            .screen()
            .rows_formatted(0, self.cols)
            .take(visible)
            .skip(count)
            .collect();

        self.parser = new_parser(self.rows, self.cols);
        for (idx, line) in kept.iter().enumerate() {
            if idx > 0 {
                self.parser.process(b"\x1b[0m\r\n");
            }
            self.parser.process(line);
        }
        // Put the cursor back where it was relative to the surviving rows
        let row = usize::from(cursor_row).saturating_sub(count);
        let col = if usize::from(cursor_row) >= count { cursor_col } else { 0 };
        self.parser
            .process(format!("\x1b[0m\x1b[{};{}H", row + 1, col + 1).as_bytes());
        self.harvested = 0;
    }
}

fn color_name(color: vt100::Color) -> String {
    const NAMES: [&str; 8] = [
        "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
    ];
    match color {
        vt100::Color::Default => "default".to_string(),
        vt100::Color::Idx(i) if i < 8 => NAMES[i as usize].to_string(),
        vt100::Color::Idx(i) if i < 16 => format!("bright{}", NAMES[(i - 8) as usize]),
        vt100::Color::Idx(i) => format!("idx:{}", i),
        vt100::Color::Rgb(r, g, b) => format!("#{:02x}{:02x}{:02x}", r, g, b),
    }
}

fn read_row(screen: &vt100::Screen, row: u16, cols: u16) -> GridRow {
    let mut text = String::with_capacity(cols as usize);
    for col in 0..cols {
        match screen.cell(row, col) {
            Some(cell) if cell.is_wide_continuation() => {}
            Some(cell) if cell.has_contents() => text.push_str(&cell.contents()),
            _ => text.push(' '),
        }
    }

    let colors = screen
        .cell(row, 0)
        .map(|cell| CellColors {
            fg: color_name(cell.fgcolor()),
            bg: color_name(cell.bgcolor()),
        })
        .unwrap_or_default();

    GridRow {
        text: text.trim_end().to_string(),
        colors,
    }
}

impl Emulator for VtEmulator {
    fn feed(&mut self, text: &str) -> Result<()> {
        for (piece, between_sequences) in self.split_pieces(text) {
            self.parser.process(piece.as_bytes());
            self.harvest();
            if between_sequences {
                self.compact();
            }
        }
        Ok(())
    }

    fn row_count(&mut self) -> usize {
        self.history.len() + self.visible_content_rows()
    }

    fn rows(&mut self, start: usize, end: usize) -> Vec<GridRow> {
        let held = self.history.len();
        let end = end.min(held + self.visible_content_rows());
        if start >= end {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(end.saturating_sub(start));
        if start < held {
            out.extend(self.history.range(start..end.min(held)).cloned());
        }

        let screen = self.parser.screen();
        for idx in start.max(held)..end {
            out.push(read_row(screen, (idx - held) as u16, self.cols));
        }
        out
    }

    fn clear_rows_above(&mut self, row: usize) -> Result<usize> {
        let removed = row.min(self.row_count());
        let from_history = removed.min(self.history.len());
        self.history.drain(..from_history);
        if removed > from_history {
            self.drop_screen_rows(removed - from_history);
        }
        Ok(removed)
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.scrollback + usize::from(self.rows))
    }

    fn in_alternate_screen(&self) -> bool {
        self.parser.screen().alternate_screen()
    }
}

/// Line grid without escape-sequence interpretation.
///
/// CSI/OSC sequences are stripped, `\r` returns to column 0 and `\n` starts a
/// new row. Useful when output is already plain text, such as piped logs.
#[derive(Debug, Default)]
pub struct PlainEmulator {
    lines: Vec<String>,
    col: usize,
    escape: EscapeState,
}

impl PlainEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, ch: char) {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
        let Some(line) = self.lines.last_mut() else {
            return;
        };
        let len = line.chars().count();
        if self.col >= len {
            line.extend(std::iter::repeat(' ').take(self.col - len));
            line.push(ch);
        } else {
            let mut chars: Vec<char> = line.chars().collect();
            chars[self.col] = ch;
            *line = chars.into_iter().collect();
        }
        self.col += 1;
    }
}

impl Emulator for PlainEmulator {
    fn feed(&mut self, text: &str) -> Result<()> {
        for ch in text.chars() {
            if self.escape == EscapeState::Text {
                match ch {
                    '\n' => {
                        if self.lines.is_empty() {
                            self.lines.push(String::new());
                        }
                        self.lines.push(String::new());
                        self.col = 0;
                    }
                    '\r' => self.col = 0,
                    c if c.is_control() && c != '\t' => {}
                    c => self.put(c),
                }
            }
            self.escape = self.escape.next(ch);
        }
        Ok(())
    }

    fn row_count(&mut self) -> usize {
        // A trailing empty row is only the cursor waiting for output
        match self.lines.last() {
            Some(last) if last.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        }
    }

    fn rows(&mut self, start: usize, end: usize) -> Vec<GridRow> {
        let end = end.min(self.row_count());
        if start >= end {
            return Vec::new();
        }
        self.lines[start..end].iter().map(|l| GridRow::new(l.trim_end())).collect()
    }

    fn clear_rows_above(&mut self, row: usize) -> Result<usize> {
        let removed = row.min(self.row_count());
        self.lines.drain(..removed);
        Ok(removed)
    }

    fn in_alternate_screen(&self) -> bool {
        false
    }
}
