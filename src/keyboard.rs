use spin::Mutex;
use pc_keyboard::{KeyCode, ScancodeSet, ScancodeSet1};
use x86_64::instructions::interrupts;
use crate::constants::interrupts::IRQ_KEYBOARD;
use crate::constants::keyboard::{
    DEBOUNCE_THRESHOLD, EXTENDED_PREFIX, QUEUE_CAPACITY, RELEASE_BIT, SC_ALT, SC_CAPS_LOCK,
    SC_CTRL, SC_LSHIFT, SC_RSHIFT,
};
use crate::queue::EventQueue;

/// Set 1 scancode -> ASCII, no shift.
#[rustfmt::skip]
const PLAIN: [u8; 128] = [
    0,     27,    b'1',  b'2',  b'3',  b'4',  b'5',  b'6',
    b'7',  b'8',  b'9',  b'0',  b'-',  b'=',  0x08,  b'\t',
    b'q',  b'w',  b'e',  b'r',  b't',  b'y',  b'u',  b'i',
    b'o',  b'p',  b'[',  b']',  b'\n', 0,     b'a',  b's',
    b'd',  b'f',  b'g',  b'h',  b'j',  b'k',  b'l',  b';',
    b'\'', b'`',  0,     b'\\', b'z',  b'x',  b'c',  b'v',
    b'b',  b'n',  b'm',  b',',  b'.',  b'/',  0,     b'*',
    0,     b' ',  0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     b'7',
    b'8',  b'9',  b'-',  b'4',  b'5',  b'6',  b'+',  b'1',
    b'2',  b'3',  b'0',  b'.',  0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
];

/// Set 1 scancode -> ASCII with shift XOR caps-lock.
#[rustfmt::skip]
const SHIFTED: [u8; 128] = [
    0,     27,    b'!',  b'@',  b'#',  b'$',  b'%',  b'^',
    b'&',  b'*',  b'(',  b')',  b'_',  b'+',  0x08,  b'\t',
    b'Q',  b'W',  b'E',  b'R',  b'T',  b'Y',  b'U',  b'I',
    b'O',  b'P',  b'{',  b'}',  b'\n', 0,     b'A',  b'S',
    b'D',  b'F',  b'G',  b'H',  b'J',  b'K',  b'L',  b':',
    b'"',  b'~',  0,     b'|',  b'Z',  b'X',  b'C',  b'V',
    b'B',  b'N',  b'M',  b'<',  b'>',  b'?',  0,     b'*',
    0,     b' ',  0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     b'7',
    b'8',  b'9',  b'-',  b'4',  b'5',  b'6',  b'+',  b'1',
    b'2',  b'3',  b'0',  b'.',  0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
    0,     0,     0,     0,     0,     0,     0,     0,
];

/// One decoded key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Scancode with the release bit stripped
    pub scancode: u8,
    /// Printable byte, if the key has one in the active table
    pub character: Option<u8>,
    pub pressed: bool,
    /// Preceded by the 0xE0 prefix
    pub extended: bool,
    /// Symbolic name from the set 1 map
    pub key: Option<KeyCode>,
}

impl KeyEvent {
    const NONE: KeyEvent = KeyEvent {
        scancode: 0,
        character: None,
        pressed: false,
        extended: false,
        key: None,
    };
}

/// Modifier levels plus the caps-lock toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
    pub caps_lock: bool,
}

impl Modifiers {
    const fn new() -> Self {
        Modifiers {
            shift: false,
            control: false,
            alt: false,
            caps_lock: false,
        }
    }

    /// Whether the shifted table applies.
    pub fn uppercase(&self) -> bool {
        self.shift ^ self.caps_lock
    }

    /// Returns false when `code` is not a modifier key.
    fn apply(&mut self, code: u8, pressed: bool) -> bool {
        match code {
            SC_LSHIFT | SC_RSHIFT => self.shift = pressed,
            SC_CTRL => self.control = pressed,
            SC_ALT => self.alt = pressed,
            SC_CAPS_LOCK => {
                if pressed {
                    self.caps_lock = !self.caps_lock;
                }
            }
            _ => return false,
        }
        true
    }
}

/// Looks `code` up in the plain or shifted table.
fn translate(code: u8, uppercase: bool) -> Option<u8> {
    let table = if uppercase { &SHIFTED } else { &PLAIN };
    match table.get(usize::from(code)) {
        Some(&0) | None => None,
        Some(&c) => Some(c),
    }
}

/// PS/2 keyboard state machine.
///
/// `handle_scancode` runs in interrupt context, everything else in the
/// foreground; see [`KEYBOARD`] for how the two are kept apart.
pub struct Keyboard {
    modifiers: Modifiers,
    queue: EventQueue<KeyEvent, QUEUE_CAPACITY>,
    last_pressed: Option<u8>,
    bounce_count: u32,
    extended: bool,
    names: ScancodeSet1,
}

impl Keyboard {
    pub const fn new() -> Self {
        Keyboard {
            modifiers: Modifiers::new(),
            queue: EventQueue::new(KeyEvent::NONE),
            last_pressed: None,
            bounce_count: 0,
            extended: false,
            names: ScancodeSet1::new(),
        }
    }

    /// Back to power-on state: no modifiers, empty queue.
    pub fn reset(&mut self) {
        *self = Keyboard::new();
    }

    /// Decodes one byte from the data port.
    pub fn handle_scancode(&mut self, byte: u8) {
        let key = match self.names.advance_state(byte) {
            Ok(Some(event)) => Some(event.code),
            _ => None,
        };

        if byte == EXTENDED_PREFIX {
            self.extended = true;
            return;
        }

        let pressed = byte & RELEASE_BIT == 0;
        let code = byte & !RELEASE_BIT;

        if core::mem::take(&mut self.extended) {
            self.handle_extended(code, pressed, key);
            return;
        }

        if pressed {
            if self.last_pressed == Some(code) && self.bounce_count < DEBOUNCE_THRESHOLD {
                self.bounce_count += 1;
                return;
            }
            self.last_pressed = Some(code);
        } else {
            self.last_pressed = None;
        }
        self.bounce_count = 0;

        if self.modifiers.apply(code, pressed) {
            return;
        }

        let event = KeyEvent {
            scancode: code,
            character: translate(code, self.modifiers.uppercase()),
            pressed,
            extended: false,
            key,
        };
        // a full queue drops the newest event
        let _ = self.queue.push(event);
    }

    fn handle_extended(&mut self, code: u8, pressed: bool, key: Option<KeyCode>) {
        match code {
            // right ctrl / right alt share the left keys' scancodes
            SC_CTRL | SC_ALT => {
                self.modifiers.apply(code, pressed);
            }
            // fake shifts wrapped around print screen and friends
            SC_LSHIFT | SC_RSHIFT => {}
            _ => {
                let _ = self.queue.push(KeyEvent {
                    scancode: code,
                    character: None,
                    pressed,
                    extended: true,
                    key,
                });
            }
        }
    }

    pub fn has_event(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn get_event(&mut self) -> Option<KeyEvent> {
        self.queue.pop()
    }

    /// Skips events until a pressed key with a character comes up.
    pub fn next_char(&mut self) -> Option<u8> {
        while let Some(event) = self.queue.pop() {
            if let (true, Some(c)) = (event.pressed, event.character) {
                return Some(c);
            }
        }
        None
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

/// The one keyboard.
///
/// Locked by the IRQ 1 path (interrupts already off) and by the foreground
/// only inside `without_interrupts`, so the lock is never contended.
pub static KEYBOARD: Mutex<Keyboard> = Mutex::new(Keyboard::new());

/// Resets decoder state and unmasks IRQ 1.
pub fn initialize() {
    interrupts::without_interrupts(|| {
        KEYBOARD.lock().reset();
        crate::pic::unmask(IRQ_KEYBOARD);
    });
    log::info!("keyboard: ready on IRQ {}", IRQ_KEYBOARD);
}

pub fn has_event() -> bool {
    interrupts::without_interrupts(|| KEYBOARD.lock().has_event())
}

pub fn get_event() -> Option<KeyEvent> {
    interrupts::without_interrupts(|| KEYBOARD.lock().get_event())
}

/// Snapshot of the modifier flags; may be one interrupt stale.
pub fn modifiers() -> Modifiers {
    interrupts::without_interrupts(|| KEYBOARD.lock().modifiers())
}

/// Waits for the next printable key press. Foreground only.
pub fn get_blocking_char() -> u8 {
    loop {
        interrupts::disable();
        let next = KEYBOARD.lock().next_char();
        match next {
            Some(c) => {
                interrupts::enable();
                return c;
            }
            // sti;hlt is atomic, an IRQ between the check and the halt still wakes us
            None => interrupts::enable_and_hlt(),
        }
    }
}

/// Pulses the CPU reset line through the keyboard controller.
pub fn reset_cpu() -> ! {
    use crate::constants::keyboard::CMD_RESET_CPU;
    use crate::ps2::{Ps2Controller, Ps2Io};

    log::warn!("keyboard: pulsing CPU reset line");
    let mut controller = Ps2Controller::new();
    if controller.send_command(CMD_RESET_CPU).is_err() {
        log::error!("keyboard: controller busy, reset command not sent");
    }
    crate::hlt_loop()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SC_A: u8 = 0x1E;
    const SC_1: u8 = 0x02;
    const SC_F1: u8 = 0x3B;

    fn press(kb: &mut Keyboard, code: u8) {
        kb.handle_scancode(code);
    }

    fn release(kb: &mut Keyboard, code: u8) {
        kb.handle_scancode(code | RELEASE_BIT);
    }

    fn drain(kb: &mut Keyboard) -> Vec<KeyEvent> {
        core::iter::from_fn(|| kb.get_event()).collect()
    }

    #[test]
    fn press_then_release_yields_one_press() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_A);
        release(&mut kb, SC_A);

        let events = drain(&mut kb);
        assert_eq!(events.len(), 2);
        assert!(events[0].pressed);
        assert_eq!(events[0].character, Some(b'a'));
        assert_eq!(events[0].key, Some(KeyCode::A));
        assert!(!events[1].pressed);
        assert_eq!(events[1].scancode, SC_A);
    }

    #[test]
    fn bounced_presses_are_dropped_until_threshold() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_A);
        for _ in 0..DEBOUNCE_THRESHOLD {
            press(&mut kb, SC_A);
        }
        assert_eq!(drain(&mut kb).iter().filter(|e| e.pressed).count(), 1);

        // the window is exhausted, the next repeat gets through
        press(&mut kb, SC_A);
        assert_eq!(drain(&mut kb).len(), 1);
    }

    #[test]
    fn release_clears_the_bounce_window() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_A);
        release(&mut kb, SC_A);
        press(&mut kb, SC_A);

        let presses = drain(&mut kb).iter().filter(|e| e.pressed).count();
        assert_eq!(presses, 2);
    }

    #[test]
    fn shift_selects_uppercase() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_LSHIFT);
        press(&mut kb, SC_A);
        assert_eq!(kb.next_char(), Some(b'A'));
    }

    #[test]
    fn caps_lock_selects_uppercase() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_CAPS_LOCK);
        release(&mut kb, SC_CAPS_LOCK);
        press(&mut kb, SC_A);
        assert!(kb.modifiers().caps_lock);
        assert_eq!(kb.next_char(), Some(b'A'));
    }

    #[test]
    fn shift_and_caps_lock_cancel_out() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_CAPS_LOCK);
        release(&mut kb, SC_CAPS_LOCK);
        press(&mut kb, SC_RSHIFT);
        press(&mut kb, SC_A);
        assert_eq!(kb.next_char(), Some(b'a'));

        // the shifted table is selected for every key, digits included
        release(&mut kb, SC_RSHIFT);
        press(&mut kb, SC_1);
        assert_eq!(kb.next_char(), Some(b'!'));
    }

    #[test]
    fn caps_lock_toggles_only_on_press() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_CAPS_LOCK);
        release(&mut kb, SC_CAPS_LOCK);
        assert!(kb.modifiers().caps_lock);
        press(&mut kb, SC_CAPS_LOCK);
        release(&mut kb, SC_CAPS_LOCK);
        assert!(!kb.modifiers().caps_lock);
    }

    #[test]
    fn bounced_caps_lock_does_not_toggle_twice() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_CAPS_LOCK);
        press(&mut kb, SC_CAPS_LOCK);
        assert!(kb.modifiers().caps_lock);
    }

    #[test]
    fn modifiers_are_tracked_not_queued() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_CTRL);
        press(&mut kb, SC_ALT);
        assert!(!kb.has_event());
        let mods = kb.modifiers();
        assert!(mods.control && mods.alt && !mods.shift);

        release(&mut kb, SC_ALT);
        assert!(!kb.modifiers().alt);
    }

    #[test]
    fn function_keys_arrive_without_character() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_ALT);
        press(&mut kb, SC_F1);
        let event = kb.get_event().unwrap();
        assert_eq!(event.character, None);
        assert_eq!(event.key, Some(KeyCode::F1));
        assert!(kb.modifiers().alt);
    }

    #[test]
    fn extended_arrow_up_is_not_keypad_eight() {
        let mut kb = Keyboard::new();
        kb.handle_scancode(EXTENDED_PREFIX);
        kb.handle_scancode(0x48);
        let event = kb.get_event().unwrap();
        assert!(event.extended);
        assert_eq!(event.character, None);
        assert_eq!(event.key, Some(KeyCode::ArrowUp));
        assert_eq!(kb.get_event(), None);
    }

    #[test]
    fn right_alt_sets_alt() {
        let mut kb = Keyboard::new();
        kb.handle_scancode(EXTENDED_PREFIX);
        kb.handle_scancode(SC_ALT);
        assert!(kb.modifiers().alt);
        assert!(!kb.has_event());
    }

    #[test]
    fn next_char_skips_unprintable_events() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_F1);
        release(&mut kb, SC_F1);
        press(&mut kb, 0x10);
        assert_eq!(kb.next_char(), Some(b'q'));
        assert_eq!(kb.next_char(), None);
    }

    #[test]
    fn overflowing_queue_keeps_oldest_events() {
        let mut kb = Keyboard::new();
        for i in 0..QUEUE_CAPACITY + 10 {
            // alternate keys so the debounce window never triggers
            let code = if i % 2 == 0 { 0x10 } else { 0x11 };
            press(&mut kb, code);
        }
        assert_eq!(drain(&mut kb).len(), QUEUE_CAPACITY);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut kb = Keyboard::new();
        press(&mut kb, SC_LSHIFT);
        press(&mut kb, SC_A);
        kb.reset();
        assert!(!kb.has_event());
        assert_eq!(kb.modifiers(), Modifiers::default());
    }
}
