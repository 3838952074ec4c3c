//! Virtual terminal multiplexer.
//!
//! Every session keeps its own scrollback, cursor and colour; only the active
//! one is mirrored to the physical display. This module is the only writer of
//! the framebuffer and it is only ever driven from foreground context.

use core::fmt;
use spin::Mutex;
use crate::constants::vga::{BUFFER_HEIGHT as HEIGHT, BUFFER_WIDTH as WIDTH};
use crate::constants::vtty::{SCROLLBACK_LINES, SESSION_COUNT, TAB_WIDTH};
use crate::vga_buffer::{Color, ColorCode, Framebuffer, ScreenChar, VgaBuffer};

const CELLS: usize = WIDTH * SCROLLBACK_LINES;

/// Glyph substituted for anything outside printable ASCII.
const UNPRINTABLE: u8 = 0xfe;

/// One terminal: a `WIDTH x SCROLLBACK_LINES` cell arena and its cursor.
pub struct Session {
    cells: [ScreenChar; CELLS],
    cursor_row: usize,
    cursor_col: usize,
    scroll_offset: usize,
    total_lines: usize,
    color: ColorCode,
}

impl Session {
    const DEFAULT_COLOR: ColorCode = ColorCode::new(Color::White, Color::Black);

    const fn new() -> Session {
        Session {
            cells: [ScreenChar::blank(Self::DEFAULT_COLOR); CELLS],
            cursor_row: 0,
            cursor_col: 0,
            scroll_offset: 0,
            total_lines: 0,
            color: Self::DEFAULT_COLOR,
        }
    }

    fn index(column: usize, row: usize) -> usize {
        row * WIDTH + column
    }

    /// Cell at `(column, row)` of the scrollback, row 0 being the oldest line kept.
    pub fn cell(&self, column: usize, row: usize) -> Option<ScreenChar> {
        if column >= WIDTH || row >= SCROLLBACK_LINES {
            return None;
        }
        Some(self.cells[Self::index(column, row)])
    }

    /// `(column, row)` in scrollback coordinates.
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_col, self.cursor_row)
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Line breaks produced since the last clear, wraps included.
    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn color(&self) -> ColorCode {
        self.color
    }

    fn blank(&self) -> ScreenChar {
        ScreenChar::blank(self.color)
    }

    fn new_line(&mut self) {
        self.cursor_col = 0;
        self.cursor_row += 1;
        self.total_lines = self.total_lines.saturating_add(1);
    }

    fn put_char(&mut self, byte: u8) {
        self.scroll_offset = 0;

        match byte {
            b'\n' => self.new_line(),
            b'\r' => self.cursor_col = 0,
            b'\t' => self.cursor_col = (self.cursor_col + TAB_WIDTH) & !(TAB_WIDTH - 1),
            0x08 => {
                if self.cursor_col > 0 {
                    self.cursor_col -= 1;
                    let index = Self::index(self.cursor_col, self.cursor_row);
                    self.cells[index] = self.blank();
                }
            }
            _ => {
                let index = Self::index(self.cursor_col, self.cursor_row);
                self.cells[index] = ScreenChar {
                    ascii_character: byte,
                    color_code: self.color,
                };
                self.cursor_col += 1;
            }
        }

        if self.cursor_col >= WIDTH {
            self.new_line();
        }
        if self.cursor_row >= SCROLLBACK_LINES {
            self.shift_up();
        }
    }

    /// Drops the oldest line and opens a blank one at the bottom.
    fn shift_up(&mut self) {
        self.cells.copy_within(WIDTH.., 0);
        let blank = self.blank();
        self.cells[CELLS - WIDTH..].fill(blank);
        self.cursor_row = SCROLLBACK_LINES - 1;
    }

    fn clear(&mut self) {
        let blank = self.blank();
        self.cells.fill(blank);
        self.cursor_row = 0;
        self.cursor_col = 0;
        self.scroll_offset = 0;
        self.total_lines = 0;
    }

    /// How far back the view can go with the lines currently held.
    fn max_scroll(&self) -> usize {
        (self.cursor_row + 1).saturating_sub(HEIGHT)
    }

    /// First scrollback row shown on screen.
    fn window_start(&self) -> usize {
        self.cursor_row
            .saturating_sub(HEIGHT - 1)
            .saturating_sub(self.scroll_offset)
    }
}

/// `SESSION_COUNT` sessions sharing one display `F`.
pub struct Vtty<F: Framebuffer> {
    sessions: [Session; SESSION_COUNT],
    current: usize,
    display: F,
}

impl<F: Framebuffer> Vtty<F> {
    pub const fn new(display: F) -> Self {
        Vtty {
            sessions: [const { Session::new() }; SESSION_COUNT],
            current: 0,
            display,
        }
    }

    /// Blanks every session, selects session 0 and paints it.
    pub fn initialize(&mut self) {
        for session in self.sessions.iter_mut() {
            session.color = Session::DEFAULT_COLOR;
            session.clear();
        }
        self.current = 0;
        self.render();
    }

    fn active(&self) -> &Session {
        &self.sessions[self.current]
    }

    fn active_mut(&mut self) -> &mut Session {
        &mut self.sessions[self.current]
    }

    pub fn put_char(&mut self, byte: u8) {
        self.active_mut().put_char(byte);
        self.render();
    }

    /// Writes `s` to the active session; non-ASCII becomes a block glyph.
    pub fn put_string(&mut self, s: &str) {
        let session = self.active_mut();
        for c in s.chars() {
            let byte = match c {
                ' '..='~' | '\n' | '\r' | '\t' | '\u{8}' => c as u8,
                _ => UNPRINTABLE,
            };
            session.put_char(byte);
        }
        self.render();
    }

    /// Attribute for cells written from now on; existing cells keep theirs.
    pub fn set_color(&mut self, color: ColorCode) {
        self.active_mut().color = color;
    }

    pub fn color(&self) -> ColorCode {
        self.active().color
    }

    pub fn clear(&mut self) {
        self.active_mut().clear();
        self.render();
    }

    /// Makes `index` the displayed session. Same or out-of-range index: no-op.
    pub fn switch_to(&mut self, index: usize) {
        if index >= SESSION_COUNT || index == self.current {
            return;
        }
        log::debug!("vtty: switching session {} -> {}", self.current, index);
        self.current = index;
        self.render();
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn session_count(&self) -> usize {
        SESSION_COUNT
    }

    /// Moves the view `lines` towards older output.
    pub fn scroll_up(&mut self, lines: usize) {
        let session = self.active_mut();
        session.scroll_offset = session
            .scroll_offset
            .saturating_add(lines)
            .min(session.max_scroll());
        self.render();
    }

    /// Moves the view `lines` back towards the live bottom.
    pub fn scroll_down(&mut self, lines: usize) {
        let session = self.active_mut();
        session.scroll_offset = session.scroll_offset.saturating_sub(lines);
        self.render();
    }

    pub fn scroll_offset(&self) -> usize {
        self.active().scroll_offset
    }

    /// Active session cursor in scrollback coordinates.
    pub fn cursor(&self) -> (usize, usize) {
        self.active().cursor()
    }

    pub fn session(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn display(&self) -> &F {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut F {
        &mut self.display
    }

    /// Copies one screen of the active session to the display.
    fn render(&mut self) {
        let session = &self.sessions[self.current];
        let start = session.window_start();

        for row in 0..HEIGHT {
            let line = Session::index(0, start + row);
            for (column, cell) in session.cells[line..line + WIDTH].iter().enumerate() {
                self.display
                    .put_cell(column, row, cell.ascii_character, cell.color_code);
            }
        }

        if session.scroll_offset == 0 {
            self.display
                .set_hardware_cursor(session.cursor_col, session.cursor_row - start);
        } else {
            // scrolled back: park the cursor off-screen
            self.display.set_hardware_cursor(WIDTH, HEIGHT);
        }
    }
}

impl<F: Framebuffer> fmt::Write for Vtty<F> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put_string(s);
        Ok(())
    }
}

/// The physical display. Never locked from interrupt context.
pub static VTTY: Mutex<Vtty<VgaBuffer>> = Mutex::new(Vtty::new(VgaBuffer::new()));

pub fn initialize() {
    let mut vtty = VTTY.lock();
    vtty.display_mut().enable_cursor();
    vtty.initialize();
    log::info!(
        "vtty: {} sessions, {} lines of scrollback each",
        SESSION_COUNT,
        SCROLLBACK_LINES
    );
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::vtty::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = VTTY.lock().write_fmt(args);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vga_buffer::mock::MemoryFramebuffer;
    use core::fmt::Write;

    fn vtty() -> Vtty<MemoryFramebuffer> {
        let mut vtty = Vtty::new(MemoryFramebuffer::new());
        vtty.initialize();
        vtty
    }

    fn write_lines(vtty: &mut Vtty<MemoryFramebuffer>, count: usize) {
        for i in 0..count {
            if i > 0 {
                vtty.put_char(b'\n');
            }
            write!(vtty, "line {}", i).unwrap();
        }
    }

    #[test]
    fn one_line_past_the_screen_scrolls_the_view() {
        let mut vtty = vtty();
        write_lines(&mut vtty, HEIGHT + 1);

        let screen = vtty.display();
        assert_eq!(screen.cursor.1, HEIGHT - 1);
        assert_eq!(screen.row_text(0), "line 1");
        assert_eq!(screen.row_text(HEIGHT - 1), format!("line {}", HEIGHT));
        assert!(!screen.contains("line 0"));
    }

    #[test]
    fn scroll_round_trip_returns_to_live_view() {
        let mut vtty = vtty();
        write_lines(&mut vtty, 60);
        vtty.scroll_up(1000);
        assert_eq!(vtty.scroll_offset(), 60 - HEIGHT);
        vtty.scroll_down(1000);
        assert_eq!(vtty.scroll_offset(), 0);
    }

    #[test]
    fn scroll_up_is_clamped_on_a_short_session() {
        let mut vtty = vtty();
        write_lines(&mut vtty, 3);
        vtty.scroll_up(5);
        assert_eq!(vtty.scroll_offset(), 0);
    }

    #[test]
    fn scrolled_back_view_shows_history_and_hides_cursor() {
        let mut vtty = vtty();
        write_lines(&mut vtty, HEIGHT + 10);
        vtty.scroll_up(10);

        let screen = vtty.display();
        assert_eq!(screen.row_text(0), "line 0");
        assert_eq!(screen.cursor, (WIDTH, HEIGHT));

        // content and cursor are untouched by scrolling
        let session = vtty.session(0).unwrap();
        assert_eq!(session.cursor(), (format!("line {}", HEIGHT + 9).len(), HEIGHT + 9));
    }

    #[test]
    fn typing_snaps_back_to_the_bottom() {
        let mut vtty = vtty();
        write_lines(&mut vtty, HEIGHT + 5);
        vtty.scroll_up(3);
        vtty.put_char(b'x');
        assert_eq!(vtty.scroll_offset(), 0);
        assert_eq!(vtty.display().cursor.1, HEIGHT - 1);
    }

    #[test]
    fn switching_to_the_active_session_is_a_no_op() {
        let mut vtty = vtty();
        vtty.put_string("hello");
        let writes = vtty.display().writes;

        vtty.switch_to(vtty.current());
        assert_eq!(vtty.display().writes, writes);
        assert_eq!(vtty.display().row_text(0), "hello");
    }

    #[test]
    fn out_of_range_switch_is_ignored() {
        let mut vtty = vtty();
        let writes = vtty.display().writes;
        vtty.switch_to(SESSION_COUNT);
        assert_eq!(vtty.current(), 0);
        assert_eq!(vtty.display().writes, writes);
    }

    #[test]
    fn sessions_keep_their_own_content() {
        let mut vtty = vtty();
        vtty.put_string("first");
        vtty.switch_to(3);
        assert_eq!(vtty.current(), 3);
        assert!(!vtty.display().contains("first"));
        assert_eq!(vtty.display().cursor, (0, 0));

        vtty.put_string("third");
        vtty.switch_to(0);
        assert_eq!(vtty.display().row_text(0), "first");
        assert_eq!(vtty.display().cursor, (5, 0));
    }

    #[test]
    fn color_change_only_affects_later_cells() {
        let mut vtty = vtty();
        let yellow = ColorCode::new(Color::Yellow, Color::Blue);
        vtty.put_char(b'a');
        vtty.set_color(yellow);
        vtty.put_char(b'b');

        let cells = &vtty.display().cells[0];
        assert_eq!(cells[0].color_code, ColorCode::default());
        assert_eq!(cells[1].color_code, yellow);
        assert_eq!(vtty.color(), yellow);
    }

    #[test]
    fn tab_moves_to_the_next_stop() {
        let mut vtty = vtty();
        vtty.put_char(b'\t');
        assert_eq!(vtty.display().cursor, (4, 0));
        vtty.put_string("ab\t");
        assert_eq!(vtty.display().cursor, (8, 0));
    }

    #[test]
    fn backspace_blanks_within_the_line_only() {
        let mut vtty = vtty();
        vtty.put_string("ab\n");
        vtty.put_char(0x08);
        assert_eq!(vtty.display().cursor, (0, 1));
        assert_eq!(vtty.display().row_text(0), "ab");

        vtty.put_string("xy\u{8}");
        assert_eq!(vtty.display().row_text(1), "x");
        assert_eq!(vtty.display().cursor, (1, 1));
    }

    #[test]
    fn carriage_return_rewinds_the_column() {
        let mut vtty = vtty();
        vtty.put_string("abc\rX");
        assert_eq!(vtty.display().row_text(0), "Xbc");
    }

    #[test]
    fn long_lines_wrap() {
        let mut vtty = vtty();
        for _ in 0..WIDTH + 2 {
            vtty.put_char(b'w');
        }
        assert_eq!(vtty.display().cursor, (2, 1));
        assert_eq!(vtty.session(0).unwrap().total_lines(), 1);
    }

    #[test]
    fn scrollback_discards_the_oldest_line() {
        let mut vtty = vtty();
        write_lines(&mut vtty, SCROLLBACK_LINES + 5);

        let session = vtty.session(0).unwrap();
        assert_eq!(session.cursor().1, SCROLLBACK_LINES - 1);
        assert_eq!(session.cell(0, 0).unwrap().ascii_character, b'l');
        // row 0 now holds "line 5"
        assert_eq!(session.cell(5, 0).unwrap().ascii_character, b'5');

        vtty.scroll_up(usize::MAX);
        assert_eq!(vtty.scroll_offset(), SCROLLBACK_LINES - HEIGHT);
        assert_eq!(vtty.display().row_text(0), "line 5");
    }

    #[test]
    fn non_ascii_becomes_block_glyph() {
        let mut vtty = vtty();
        vtty.put_string("é!");
        let cells = &vtty.display().cells[0];
        assert_eq!(cells[0].ascii_character, UNPRINTABLE);
        assert_eq!(cells[1].ascii_character, b'!');
    }

    #[test]
    fn clear_resets_only_the_active_session() {
        let mut vtty = vtty();
        vtty.put_string("keep");
        vtty.switch_to(1);
        vtty.put_string("drop\nme");
        vtty.clear();
        assert_eq!(vtty.display().cursor, (0, 0));
        assert!(!vtty.display().contains("drop"));

        vtty.switch_to(0);
        assert_eq!(vtty.display().row_text(0), "keep");
    }
}
