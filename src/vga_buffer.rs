use volatile::Volatile;
use x86_64::instructions::port::Port;
use crate::constants::vga::{
    BUFFER_ADDR, BUFFER_HEIGHT, BUFFER_WIDTH, COMMAND_PORT, CURSOR_END_REG,
    CURSOR_LOCATION_HIGH, CURSOR_LOCATION_LOW, CURSOR_SCANLINE_END, CURSOR_SCANLINE_START,
    CURSOR_START_REG, DATA_PORT,
};

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

impl Color {
    pub fn from_u8(value: u8) -> Option<Color> {
        const ALL: [Color; 16] = [
            Color::Black,
            Color::Blue,
            Color::Green,
            Color::Cyan,
            Color::Red,
            Color::Magenta,
            Color::Brown,
            Color::LightGray,
            Color::DarkGray,
            Color::LightBlue,
            Color::LightGreen,
            Color::LightCyan,
            Color::LightRed,
            Color::Pink,
            Color::Yellow,
            Color::White,
        ];
        ALL.get(usize::from(value)).copied()
    }
}

/// Text-mode attribute byte: low nibble foreground, bits 4-6 background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    pub const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((foreground as u8) | (((background as u8) & 0x07) << 4))
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl Default for ColorCode {
    fn default() -> Self {
        ColorCode::new(Color::White, Color::Black)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    pub ascii_character: u8,
    pub color_code: ColorCode,
}

impl ScreenChar {
    pub const fn blank(color_code: ColorCode) -> ScreenChar {
        ScreenChar {
            ascii_character: b' ',
            color_code,
        }
    }
}

/// The physical display as seen by the terminal multiplexer.
pub trait Framebuffer {
    fn put_cell(&mut self, column: usize, row: usize, character: u8, color: ColorCode);
    fn set_hardware_cursor(&mut self, column: usize, row: usize);
}

#[repr(transparent)]
struct Buffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

/// Memory-mapped text buffer at 0xB8000 plus the CRT controller cursor.
pub struct VgaBuffer {
    base: usize,
}

impl VgaBuffer {
    pub const fn new() -> VgaBuffer {
        VgaBuffer { base: BUFFER_ADDR }
    }

    fn buffer(&mut self) -> &mut Buffer {
        // identity-mapped text memory, only reachable through &mut self
        unsafe { &mut *(self.base as *mut Buffer) }
    }

    fn write_crtc(&mut self, register: u8, value: u8) {
        let mut index: Port<u8> = Port::new(COMMAND_PORT);
        let mut data: Port<u8> = Port::new(DATA_PORT);
        unsafe {
            index.write(register);
            data.write(value);
        }
    }

    /// Turns on an underline cursor.
    pub fn enable_cursor(&mut self) {
        self.write_crtc(CURSOR_START_REG, CURSOR_SCANLINE_START);
        self.write_crtc(CURSOR_END_REG, CURSOR_SCANLINE_END);
    }
}

impl Default for VgaBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framebuffer for VgaBuffer {
    fn put_cell(&mut self, column: usize, row: usize, character: u8, color: ColorCode) {
        if column >= BUFFER_WIDTH || row >= BUFFER_HEIGHT {
            return;
        }
        self.buffer().chars[row][column].write(ScreenChar {
            ascii_character: character,
            color_code: color,
        });
    }

    fn set_hardware_cursor(&mut self, column: usize, row: usize) {
        // off-screen positions park the cursor past the last cell
        let position = row * BUFFER_WIDTH + column;
        self.write_crtc(CURSOR_LOCATION_LOW, (position & 0xFF) as u8);
        self.write_crtc(CURSOR_LOCATION_HIGH, ((position >> 8) & 0xFF) as u8);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Off-screen copy of the display that counts how often it was touched.
    pub struct MemoryFramebuffer {
        pub cells: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
        pub cursor: (usize, usize),
        pub writes: usize,
    }

    impl MemoryFramebuffer {
        pub fn new() -> Self {
            MemoryFramebuffer {
                cells: [[ScreenChar::blank(ColorCode::default()); BUFFER_WIDTH]; BUFFER_HEIGHT],
                cursor: (0, 0),
                writes: 0,
            }
        }

        /// One visible row as text, trailing blanks trimmed.
        pub fn row_text(&self, row: usize) -> std::string::String {
            let text: std::string::String = self.cells[row]
                .iter()
                .map(|cell| cell.ascii_character as char)
                .collect();
            text.trim_end().into()
        }

        pub fn contains(&self, needle: &str) -> bool {
            (0..BUFFER_HEIGHT).any(|row| self.row_text(row).contains(needle))
        }
    }

    impl Framebuffer for MemoryFramebuffer {
        fn put_cell(&mut self, column: usize, row: usize, character: u8, color: ColorCode) {
            self.cells[row][column] = ScreenChar {
                ascii_character: character,
                color_code: color,
            };
            self.writes += 1;
        }

        fn set_hardware_cursor(&mut self, column: usize, row: usize) {
            self.cursor = (column, row);
        }
    }
}
