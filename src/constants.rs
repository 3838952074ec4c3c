/// System-wide constants to avoid magic numbers

/// VGA text mode constants
pub mod vga {
    /// VGA text buffer physical address
    pub const BUFFER_ADDR: usize = 0xb8000;

    /// VGA text mode dimensions
    pub const BUFFER_HEIGHT: usize = 25;
    pub const BUFFER_WIDTH: usize = 80;

    /// VGA control ports
    pub const COMMAND_PORT: u16 = 0x3D4;
    pub const DATA_PORT: u16 = 0x3D5;

    /// Cursor control registers
    pub const CURSOR_START_REG: u8 = 0x0A;
    pub const CURSOR_END_REG: u8 = 0x0B;
    pub const CURSOR_LOCATION_HIGH: u8 = 0x0E;
    pub const CURSOR_LOCATION_LOW: u8 = 0x0F;

    /// Underline cursor shape (scanlines)
    pub const CURSOR_SCANLINE_START: u8 = 14;
    pub const CURSOR_SCANLINE_END: u8 = 15;
}

/// PS/2 controller constants shared by the keyboard and the mouse
pub mod ps2 {
    /// PS/2 data port
    pub const DATA_PORT: u16 = 0x60;

    /// PS/2 status (read) / command (write) port
    pub const STATUS_COMMAND_PORT: u16 = 0x64;

    /// Status register bit flags
    pub const STATUS_OUTPUT_BUFFER_FULL: u8 = 0x01;
    pub const STATUS_INPUT_BUFFER_FULL: u8 = 0x02;

    /// Number of status polls before a handshake step gives up
    pub const WAIT_BUDGET: u32 = 100_000;

    /// Most stale bytes flushed from the output buffer in one go
    pub const DRAIN_LIMIT: usize = 16;

    /// Controller commands
    pub const CMD_DISABLE_AUX: u8 = 0xA7;
    pub const CMD_ENABLE_AUX: u8 = 0xA8;
    pub const CMD_READ_CONFIG: u8 = 0x20;
    pub const CMD_WRITE_CONFIG: u8 = 0x60;
    pub const CMD_WRITE_AUX: u8 = 0xD4;

    /// Controller configuration byte bits
    pub const CONFIG_AUX_IRQ: u8 = 0x02;
    pub const CONFIG_AUX_CLOCK_DISABLED: u8 = 0x20;
}

/// PS/2 keyboard constants
pub mod keyboard {
    /// Decoded event queue size
    pub const QUEUE_CAPACITY: usize = 256;

    /// Identical presses dropped before a release is seen.
    /// Empirical contact-bounce workaround; keep the literal value.
    pub const DEBOUNCE_THRESHOLD: u32 = 5;

    /// Release transitions have the high bit set
    pub const RELEASE_BIT: u8 = 0x80;

    /// Extended scancode prefix
    pub const EXTENDED_PREFIX: u8 = 0xE0;

    /// Modifier scancodes (set 1)
    pub const SC_CTRL: u8 = 0x1D;
    pub const SC_LSHIFT: u8 = 0x2A;
    pub const SC_RSHIFT: u8 = 0x36;
    pub const SC_ALT: u8 = 0x38;
    pub const SC_CAPS_LOCK: u8 = 0x3A;

    /// Command to reset CPU via keyboard controller
    pub const CMD_RESET_CPU: u8 = 0xFE;
}

/// PS/2 mouse constants
pub mod mouse {
    /// Decoded event queue size
    pub const QUEUE_CAPACITY: usize = 64;

    /// Device commands (sent through the auxiliary port)
    pub const CMD_SET_DEFAULTS: u8 = 0xF6;
    pub const CMD_ENABLE_STREAMING: u8 = 0xF4;
    pub const CMD_SET_SAMPLE_RATE: u8 = 0xF3;
    pub const CMD_GET_DEVICE_ID: u8 = 0xF2;

    /// Sample-rate knock that asks the device for a scroll wheel.
    /// Empirical hardware trick; keep the literal values and order.
    pub const WHEEL_SAMPLE_RATES: [u8; 3] = [200, 100, 80];

    /// Device id reported once the wheel has been granted
    pub const WHEEL_DEVICE_ID: u8 = 3;

    /// Packet lengths
    pub const PACKET_LEN: usize = 3;
    pub const WHEEL_PACKET_LEN: usize = 4;

    /// First packet byte flags
    pub const LEFT_BUTTON: u8 = 0x01;
    pub const RIGHT_BUTTON: u8 = 0x02;
    pub const MIDDLE_BUTTON: u8 = 0x04;
    pub const ALWAYS_ONE: u8 = 0x08;
    pub const X_OVERFLOW: u8 = 0x40;
    pub const Y_OVERFLOW: u8 = 0x80;
}

/// Interrupt constants
pub mod interrupts {
    /// PIC (Programmable Interrupt Controller) offset
    /// We remap PIC interrupts to start at 32 to avoid conflicts with CPU exceptions
    pub const PIC_1_OFFSET: u8 = 32;
    pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

    /// Number of hardware IRQ lines across both controllers
    pub const IRQ_LINES: u8 = 16;

    /// IRQ lines owned by drivers
    pub const IRQ_KEYBOARD: u8 = 1;
    pub const IRQ_CASCADE: u8 = 2;
    pub const IRQ_MOUSE: u8 = 12;

    /// Lowest-priority line of each chip, where spurious interrupts land
    pub const IRQ_SPURIOUS_PRIMARY: u8 = 7;
    pub const IRQ_SPURIOUS_SECONDARY: u8 = 15;

    /// Command ports of the two chips, and the OCW3 "read in-service register"
    pub const PIC_1_COMMAND: u16 = 0x20;
    pub const PIC_2_COMMAND: u16 = 0xA0;
    pub const OCW3_READ_ISR: u8 = 0x0B;
}

/// Virtual terminal constants
pub mod vtty {
    /// Independent sessions (alt+F1..F8)
    pub const SESSION_COUNT: usize = 8;

    /// Lines of history kept per session
    pub const SCROLLBACK_LINES: usize = 200;

    /// Tab stops every N columns
    pub const TAB_WIDTH: usize = 4;

    /// Lines scrolled per mouse wheel notch
    pub const WHEEL_SCROLL_LINES: usize = 3;
}

/// Logging constants
pub mod logging {
    use log::LevelFilter;

    /// COM1 I/O port
    pub const SERIAL_PORT: u16 = 0x3F8;

    #[cfg(debug_assertions)]
    pub const MAX_LEVEL: LevelFilter = LevelFilter::Trace;
    #[cfg(not(debug_assertions))]
    pub const MAX_LEVEL: LevelFilter = LevelFilter::Info;
}
