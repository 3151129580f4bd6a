//! Cursor bracketing around terminal writes
//!
//! Every draw or clear is wrapped as save cursor, work, restore cursor, flush,
//! so whatever else is drawing on the screen sees the cursor where it left it.

use crossterm::cursor::{MoveTo, RestorePosition, SavePosition};
use crossterm::queue;
use std::io::{self, Write};

pub struct TerminalCompositor {
    out: Box<dyn Write + Send>,
}

impl TerminalCompositor {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn save_cursor_position(&mut self) -> io::Result<()> {
        queue!(self.out, SavePosition)
    }

    pub fn restore_cursor_position(&mut self) -> io::Result<()> {
        queue!(self.out, RestorePosition)
    }

    /// Move to a 1-based row/column
    pub fn move_cursor(&mut self, row: u16, col: u16) -> io::Result<()> {
        queue!(self.out, MoveTo(col.saturating_sub(1), row.saturating_sub(1)))
    }

    /// Run `body` between a cursor save and restore, then flush
    ///
    /// The restore is written even if `body` fails; the first error wins.
    pub fn bracket<F>(&mut self, body: F) -> io::Result<()>
    where
        F: FnOnce(&mut Self) -> io::Result<()>,
    {
        self.save_cursor_position()?;
        let result = body(self);
        let restored = self.restore_cursor_position();
        let flushed = self.out.flush();
        result.and(restored).and(flushed)
    }

    /// Write an already encoded frame with its top-left corner at row/col
    pub fn composite(&mut self, row: u16, col: u16, bytes: &[u8]) -> io::Result<()> {
        self.bracket(|term| {
            term.move_cursor(row, col)?;
            term.out.write_all(bytes)
        })
    }

    /// Blank `row_count` rows of `col_width` cells starting at origin
    pub fn clear_region(
        &mut self,
        origin_row: u16,
        origin_col: u16,
        row_count: u16,
        col_width: u16,
    ) -> io::Result<()> {
        let blank = " ".repeat(col_width as usize);
        self.bracket(|term| {
            for row in origin_row..origin_row.saturating_add(row_count) {
                term.move_cursor(row, origin_col)?;
                term.out.write_all(blank.as_bytes())?;
            }
            Ok(())
        })
    }
}
