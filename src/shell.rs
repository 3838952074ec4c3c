//! Line editor and command table running on top of the VTTY.

use core::fmt::Write;
use core::str;
use pc_keyboard::KeyCode;
use crate::constants::vga::BUFFER_WIDTH;
use crate::constants::vtty::{SCROLLBACK_LINES, SESSION_COUNT};
use crate::cpu::{self, Frame, Registers};
use crate::keyboard::{KeyEvent, Modifiers};
use crate::vga_buffer::{Color, ColorCode, Framebuffer};
use crate::vtty::Vtty;

const PROMPT: &str = "> ";
/// Input never wraps, so backspace can always erase it.
const LINE_CAPACITY: usize = BUFFER_WIDTH - PROMPT.len() - 1;
const HISTORY_SIZE: usize = 10;
const MAX_ARGS: usize = 8;
const TRACE_FRAMES: usize = 10;
const DUMP_WORDS: usize = 16;

const SESSION_KEYS: [KeyCode; SESSION_COUNT] = [
    KeyCode::F1,
    KeyCode::F2,
    KeyCode::F3,
    KeyCode::F4,
    KeyCode::F5,
    KeyCode::F6,
    KeyCode::F7,
    KeyCode::F8,
];

/// The terminal operations the shell drives.
pub trait Terminal: Write {
    fn clear(&mut self);
    fn switch_to(&mut self, index: usize);
    fn current(&self) -> usize;
    fn session_count(&self) -> usize;
    fn cursor(&self) -> (usize, usize);
    fn color(&self) -> ColorCode;
    fn set_color(&mut self, color: ColorCode);
}

impl<F: Framebuffer> Terminal for Vtty<F> {
    fn clear(&mut self) {
        Vtty::clear(self)
    }

    fn switch_to(&mut self, index: usize) {
        Vtty::switch_to(self, index)
    }

    fn current(&self) -> usize {
        Vtty::current(self)
    }

    fn session_count(&self) -> usize {
        Vtty::session_count(self)
    }

    fn cursor(&self) -> (usize, usize) {
        Vtty::cursor(self)
    }

    fn color(&self) -> ColorCode {
        Vtty::color(self)
    }

    fn set_color(&mut self, color: ColorCode) {
        Vtty::set_color(self, color)
    }
}

/// Requests the shell cannot carry out itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reboot,
    Halt,
}

/// What happens after a command ran.
enum Next {
    Prompt,
    Switch(usize),
    Exit(Action),
}

/// Command function type
type CommandFn = fn(&mut dyn Terminal, &History, &[&str]) -> Next;

/// Command registry entry
struct Command {
    name: &'static str,
    help: &'static str,
    func: CommandFn,
}

/// Command dispatch table - add new commands here
const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        help: "Display this help message",
        func: cmd_help,
    },
    Command {
        name: "echo",
        help: "Echo arguments to the screen",
        func: cmd_echo,
    },
    Command {
        name: "clear",
        help: "Clear this terminal",
        func: cmd_clear,
    },
    Command {
        name: "history",
        help: "Show command history",
        func: cmd_history,
    },
    Command {
        name: "tty",
        help: "Show or switch terminal: tty [n]",
        func: cmd_tty,
    },
    Command {
        name: "color",
        help: "Set text colour: color <fg 0-15> [bg 0-7]",
        func: cmd_color,
    },
    Command {
        name: "regs",
        help: "Display CPU registers",
        func: cmd_regs,
    },
    Command {
        name: "stack",
        help: "Print kernel stack dump",
        func: cmd_stack,
    },
    Command {
        name: "info",
        help: "Show system information",
        func: cmd_info,
    },
    Command {
        name: "reboot",
        help: "Reboot the system",
        func: cmd_reboot,
    },
    Command {
        name: "halt",
        help: "Stop the CPU",
        func: cmd_halt,
    },
];

fn find_command(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|cmd| cmd.name == name)
}

/// Input being typed on one terminal.
#[derive(Clone, Copy)]
struct Line {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

impl Line {
    const EMPTY: Line = Line {
        bytes: [0; LINE_CAPACITY],
        len: 0,
    };

    fn as_str(&self) -> &str {
        // only printable ASCII is ever stored
        str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    fn push(&mut self, byte: u8, tty: &mut dyn Terminal) {
        if self.len == LINE_CAPACITY {
            return;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        let _ = tty.write_char(char::from(byte));
    }

    fn pop(&mut self, tty: &mut dyn Terminal) {
        if self.len > 0 {
            self.len -= 1;
            let _ = tty.write_char('\u{8}');
        }
    }

    /// Erases what is on screen and types `text` instead.
    fn replace(&mut self, text: &[u8], tty: &mut dyn Terminal) {
        while self.len > 0 {
            self.pop(tty);
        }
        for &byte in text {
            self.push(byte, tty);
        }
    }
}

/// The last `HISTORY_SIZE` submitted lines, in a ring.
struct History {
    entries: [Line; HISTORY_SIZE],
    next: usize,
    count: usize,
}

impl History {
    const fn new() -> Self {
        History {
            entries: [Line::EMPTY; HISTORY_SIZE],
            next: 0,
            count: 0,
        }
    }

    fn push(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let len = bytes.len().min(LINE_CAPACITY);
        let entry = &mut self.entries[self.next];
        entry.bytes[..len].copy_from_slice(&bytes[..len]);
        entry.len = len;

        self.next = (self.next + 1) % HISTORY_SIZE;
        if self.count < HISTORY_SIZE {
            self.count += 1;
        }
    }

    /// `age` 0 is the newest entry.
    fn recent(&self, age: usize) -> Option<&Line> {
        if age >= self.count {
            return None;
        }
        Some(&self.entries[(self.next + HISTORY_SIZE - 1 - age) % HISTORY_SIZE])
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// Foreground command interpreter, one pending line per terminal.
pub struct Shell {
    lines: [Line; SESSION_COUNT],
    history: History,
    browse: Option<usize>,
}

impl Shell {
    pub const fn new() -> Self {
        Shell {
            lines: [Line::EMPTY; SESSION_COUNT],
            history: History::new(),
            browse: None,
        }
    }

    pub fn prompt(&self, tty: &mut dyn Terminal) {
        let _ = tty.write_str(PROMPT);
    }

    /// Feeds one key event. Returns what the caller has to do on the
    /// machine's behalf, if anything.
    pub fn process_key(
        &mut self,
        event: KeyEvent,
        modifiers: Modifiers,
        tty: &mut dyn Terminal,
    ) -> Option<Action> {
        if !event.pressed {
            return None;
        }

        if modifiers.alt {
            let index = event
                .key
                .and_then(|key| SESSION_KEYS.iter().position(|k| *k == key));
            if let Some(index) = index {
                self.switch_session(index, tty);
                return None;
            }
        }

        match event.key {
            Some(KeyCode::ArrowUp) => {
                self.history_prev(tty);
                return None;
            }
            Some(KeyCode::ArrowDown) => {
                self.history_next(tty);
                return None;
            }
            _ => {}
        }

        match event.character {
            Some(b'\n') => return self.submit(tty),
            Some(0x08) => self.lines[tty.current()].pop(tty),
            Some(c @ b' '..=b'~') if !modifiers.control => self.lines[tty.current()].push(c, tty),
            _ => {}
        }
        None
    }

    /// Moves to terminal `index`, greeting it with a prompt if it is untouched.
    fn switch_session(&mut self, index: usize, tty: &mut dyn Terminal) {
        if index >= tty.session_count() || index == tty.current() {
            return;
        }
        self.browse = None;
        tty.switch_to(index);
        if tty.cursor() == (0, 0) {
            self.prompt(tty);
        }
    }

    fn submit(&mut self, tty: &mut dyn Terminal) -> Option<Action> {
        self.browse = None;
        let line = &mut self.lines[tty.current()];
        let pending = *line;
        line.len = 0;

        let _ = tty.write_char('\n');
        let text = pending.as_str().trim();
        let next = if text.is_empty() {
            Next::Prompt
        } else {
            self.history.push(text);
            execute_command(text, tty, &self.history)
        };

        match next {
            Next::Exit(action) => return Some(action),
            Next::Prompt => self.prompt(tty),
            Next::Switch(index) => {
                self.prompt(tty);
                self.switch_session(index, tty);
            }
        }
        None
    }

    fn history_prev(&mut self, tty: &mut dyn Terminal) {
        let age = match self.browse {
            None => 0,
            Some(age) => age + 1,
        };
        if let Some(entry) = self.history.recent(age) {
            self.browse = Some(age);
            self.lines[tty.current()].replace(&entry.bytes[..entry.len], tty);
        }
    }

    fn history_next(&mut self, tty: &mut dyn Terminal) {
        let line = &mut self.lines[tty.current()];
        match self.browse {
            None => {}
            Some(0) => {
                self.browse = None;
                line.replace(&[], tty);
            }
            Some(age) => {
                if let Some(entry) = self.history.recent(age - 1) {
                    self.browse = Some(age - 1);
                    line.replace(&entry.bytes[..entry.len], tty);
                }
            }
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

fn execute_command(line: &str, tty: &mut dyn Terminal, history: &History) -> Next {
    let (parts, count) = split_whitespace(line);
    if count == 0 {
        return Next::Prompt;
    }

    match find_command(parts[0]) {
        Some(cmd) => (cmd.func)(tty, history, &parts[1..count]),
        None => {
            let _ = writeln!(
                tty,
                "Unknown command: {}. Type 'help' for available commands.",
                parts[0]
            );
            Next::Prompt
        }
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn cmd_help(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    let _ = writeln!(tty, "Available commands:");
    for cmd in COMMANDS {
        let _ = writeln!(tty, "  {:<12} - {}", cmd.name, cmd.help);
    }
    let _ = writeln!(tty, "Alt+F1..F8 switches terminal, the wheel scrolls.");
    Next::Prompt
}

fn cmd_echo(tty: &mut dyn Terminal, _history: &History, args: &[&str]) -> Next {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            let _ = tty.write_char(' ');
        }
        let _ = tty.write_str(arg);
    }
    let _ = tty.write_char('\n');
    Next::Prompt
}

fn cmd_clear(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    tty.clear();
    Next::Prompt
}

fn cmd_history(tty: &mut dyn Terminal, history: &History, _args: &[&str]) -> Next {
    // the history command itself is already the newest entry
    let _ = writeln!(tty, "Command history:");
    for (number, age) in (0..history.len()).rev().enumerate() {
        if let Some(entry) = history.recent(age) {
            let _ = writeln!(tty, "  {} {}", number + 1, entry.as_str());
        }
    }
    Next::Prompt
}

fn cmd_tty(tty: &mut dyn Terminal, _history: &History, args: &[&str]) -> Next {
    let count = tty.session_count();
    let Some(arg) = args.first() else {
        let _ = writeln!(tty, "terminal {} of {}", tty.current(), count);
        return Next::Prompt;
    };

    match arg.parse::<usize>() {
        Ok(index) if index < count => Next::Switch(index),
        _ => {
            let _ = writeln!(tty, "tty: expected a terminal number 0-{}", count - 1);
            Next::Prompt
        }
    }
}

fn cmd_color(tty: &mut dyn Terminal, _history: &History, args: &[&str]) -> Next {
    let current_bg = Color::from_u8((tty.color().as_u8() >> 4) & 0x07);
    let foreground = args.first().and_then(|arg| parse_color(arg, 15));
    let background = match args.get(1) {
        Some(arg) => parse_color(arg, 7),
        None => current_bg,
    };

    match (foreground, background) {
        (Some(fg), Some(bg)) => tty.set_color(ColorCode::new(fg, bg)),
        _ => {
            let _ = writeln!(tty, "usage: color <fg 0-15> [bg 0-7]");
        }
    }
    Next::Prompt
}

fn parse_color(arg: &str, max: u8) -> Option<Color> {
    arg.parse::<u8>()
        .ok()
        .filter(|value| *value <= max)
        .and_then(Color::from_u8)
}

fn cmd_regs(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    let _ = write!(tty, "{}", Registers::capture());
    Next::Prompt
}

fn cmd_stack(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    let _ = write!(tty, "{}", Registers::capture());

    let mut frames = [Frame::default(); TRACE_FRAMES];
    let depth = cpu::backtrace(&mut frames);
    let _ = writeln!(tty, "Call trace:");
    if depth == 0 {
        let _ = writeln!(tty, "  (no frames to display)");
    }
    for (number, frame) in frames[..depth].iter().enumerate() {
        let _ = writeln!(
            tty,
            "  #{}: RIP={:#x}  RBP={:#x}",
            number, frame.return_address, frame.rbp
        );
    }

    let mut words = [0u64; DUMP_WORDS];
    let (rsp, count) = cpu::stack_words(&mut words);
    let _ = writeln!(tty, "Stack from {:#x}:", rsp);
    if count == 0 {
        let _ = writeln!(tty, "  (stack top unknown)");
    }
    for (i, word) in words[..count].iter().enumerate() {
        let address = rsp + 8 * i as u64;
        let marker = if frames[..depth].iter().any(|f| f.rbp == address) {
            "  <- RBP"
        } else {
            ""
        };
        let _ = writeln!(tty, "  {:#018x}: {:#018x}{}", address, word, marker);
    }
    Next::Prompt
}

fn cmd_info(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    let _ = writeln!(tty, "vtkern {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(
        tty,
        "  terminal {} of {}, {} lines of scrollback each",
        tty.current(),
        tty.session_count(),
        SCROLLBACK_LINES
    );
    let _ = writeln!(tty, "  colour attribute {:#04x}", tty.color().as_u8());
    Next::Prompt
}

fn cmd_reboot(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    let _ = writeln!(tty, "Rebooting system...");
    Next::Exit(Action::Reboot)
}

fn cmd_halt(tty: &mut dyn Terminal, _history: &History, _args: &[&str]) -> Next {
    let _ = writeln!(tty, "System halted.");
    Next::Exit(Action::Halt)
}

// ============================================================================
// Utilities
// ============================================================================

/// Splits on spaces and tabs into at most `MAX_ARGS` words.
fn split_whitespace(s: &str) -> ([&str; MAX_ARGS], usize) {
    let mut out: [&str; MAX_ARGS] = [""; MAX_ARGS];
    let mut count = 0;
    for (slot, word) in out.iter_mut().zip(s.split([' ', '\t']).filter(|w| !w.is_empty())) {
        *slot = word;
        count += 1;
    }
    (out, count)
}
