//! PS/2 mouse: wheel negotiation and packet reassembly.

use spin::Mutex;
use x86_64::instructions::interrupts;
use crate::constants::interrupts::{IRQ_CASCADE, IRQ_MOUSE};
use crate::constants::mouse::{
    ALWAYS_ONE, CMD_ENABLE_STREAMING, CMD_GET_DEVICE_ID, CMD_SET_DEFAULTS, CMD_SET_SAMPLE_RATE,
    LEFT_BUTTON, MIDDLE_BUTTON, PACKET_LEN, QUEUE_CAPACITY, RIGHT_BUTTON, WHEEL_DEVICE_ID,
    WHEEL_PACKET_LEN, WHEEL_SAMPLE_RATES, X_OVERFLOW, Y_OVERFLOW,
};
use crate::constants::ps2::{
    CMD_DISABLE_AUX, CMD_ENABLE_AUX, CMD_READ_CONFIG, CMD_WRITE_CONFIG, CONFIG_AUX_CLOCK_DISABLED, CONFIG_AUX_IRQ,
};
use crate::ps2::{Ps2Controller, Ps2Error, Ps2Io};
use crate::queue::EventQueue;

/// One relative motion sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseEvent {
    pub delta_x: i8,
    pub delta_y: i8,
    /// Wheel notches, always 0 without a wheel
    pub delta_wheel: i8,
    pub left: bool,
    pub right: bool,
    pub middle: bool,
}

impl MouseEvent {
    const NONE: MouseEvent = MouseEvent {
        delta_x: 0,
        delta_y: 0,
        delta_wheel: 0,
        left: false,
        right: false,
        middle: false,
    };

    fn from_packet(packet: &[u8; WHEEL_PACKET_LEN], has_wheel: bool) -> Self {
        let flags = packet[0];
        let delta_wheel = if has_wheel {
            // 4-bit two's complement in the low nibble
            (((packet[3] & 0x0F) << 4) as i8) >> 4
        } else {
            0
        };

        MouseEvent {
            delta_x: packet[1] as i8,
            delta_y: packet[2] as i8,
            delta_wheel,
            left: flags & LEFT_BUTTON != 0,
            right: flags & RIGHT_BUTTON != 0,
            middle: flags & MIDDLE_BUTTON != 0,
        }
    }
}

/// Packet assembler plus its event queue.
pub struct Mouse {
    cycle: usize,
    packet: [u8; WHEEL_PACKET_LEN],
    has_wheel: bool,
    queue: EventQueue<MouseEvent, QUEUE_CAPACITY>,
}

impl Mouse {
    pub const fn new() -> Self {
        Mouse {
            cycle: 0,
            packet: [0; WHEEL_PACKET_LEN],
            has_wheel: false,
            queue: EventQueue::new(MouseEvent::NONE),
        }
    }

    /// Runs the controller and device handshake, recording whether the
    /// device agreed to 4-byte wheel packets.
    ///
    /// On failure the aux port is switched back off so a late answer from the
    /// device cannot sit in the output buffer in front of keyboard bytes.
    pub fn initialize<P: Ps2Io>(&mut self, io: &mut P) -> Result<(), Ps2Error> {
        *self = Mouse::new();

        let mut config = None;
        let result = self.handshake(io, &mut config);
        if result.is_err() {
            release_aux(io, config);
        }
        result
    }

    fn handshake<P: Ps2Io>(&mut self, io: &mut P, config: &mut Option<u8>) -> Result<(), Ps2Error> {
        io.send_command(CMD_ENABLE_AUX)?;

        // route aux data to IRQ 12 and make sure its clock runs
        io.send_command(CMD_READ_CONFIG)?;
        let original = io.receive()?;
        *config = Some(original);
        io.send_command(CMD_WRITE_CONFIG)?;
        io.send_data((original | CONFIG_AUX_IRQ) & !CONFIG_AUX_CLOCK_DISABLED)?;

        command(io, CMD_SET_DEFAULTS)?;
        self.has_wheel = negotiate_wheel(io)?;
        command(io, CMD_ENABLE_STREAMING)?;
        Ok(())
    }

    pub fn has_wheel(&self) -> bool {
        self.has_wheel
    }

    fn packet_len(&self) -> usize {
        if self.has_wheel {
            WHEEL_PACKET_LEN
        } else {
            PACKET_LEN
        }
    }

    /// Feeds one byte from the data port.
    pub fn handle_byte(&mut self, byte: u8) {
        // byte 0 must carry the always-one bit, otherwise we are mid-packet
        if self.cycle == 0 && byte & ALWAYS_ONE == 0 {
            return;
        }

        self.packet[self.cycle] = byte;
        self.cycle += 1;
        if self.cycle < self.packet_len() {
            return;
        }
        self.cycle = 0;

        if self.packet[0] & (X_OVERFLOW | Y_OVERFLOW) != 0 {
            return;
        }

        let event = MouseEvent::from_packet(&self.packet, self.has_wheel);
        let _ = self.queue.push(event);
    }

    pub fn has_event(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn get_event(&mut self) -> Option<MouseEvent> {
        self.queue.pop()
    }
}

impl Default for Mouse {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends a device command and swallows its acknowledge byte.
fn command<P: Ps2Io>(io: &mut P, byte: u8) -> Result<u8, Ps2Error> {
    io.send_aux(byte)?;
    io.receive()
}

/// Best-effort undo of a half-finished handshake: aux port off, stale
/// bytes flushed, aux IRQ bit cleared in the config byte if we got that far.
fn release_aux<P: Ps2Io>(io: &mut P, config: Option<u8>) {
    let _ = io.send_command(CMD_DISABLE_AUX);
    io.drain();
    if let Some(config) = config {
        let _ = io
            .send_command(CMD_WRITE_CONFIG)
            .and_then(|_| io.send_data((config & !CONFIG_AUX_IRQ) | CONFIG_AUX_CLOCK_DISABLED));
    }
}

/// Sample-rate knock; a device id of 3 afterwards means the wheel is on.
fn negotiate_wheel<P: Ps2Io>(io: &mut P) -> Result<bool, Ps2Error> {
    for rate in WHEEL_SAMPLE_RATES {
        command(io, CMD_SET_SAMPLE_RATE)?;
        command(io, rate)?;
    }
    command(io, CMD_GET_DEVICE_ID)?;
    Ok(io.receive()? == WHEEL_DEVICE_ID)
}

/// The one mouse. Same locking discipline as [`crate::keyboard::KEYBOARD`].
pub static MOUSE: Mutex<Mouse> = Mutex::new(Mouse::new());

/// Handshakes with the device, then unmasks the cascade and IRQ 12.
///
/// A silent device leaves IRQ 12 masked; the rest of the system runs without it.
pub fn initialize() {
    let result = interrupts::without_interrupts(|| {
        let mut mouse = MOUSE.lock();
        mouse.initialize(&mut Ps2Controller::new())?;
        crate::pic::unmask(IRQ_CASCADE);
        crate::pic::unmask(IRQ_MOUSE);
        Ok::<bool, Ps2Error>(mouse.has_wheel())
    });

    match result {
        Ok(true) => log::info!("mouse: wheel negotiated, 4-byte packets on IRQ {}", IRQ_MOUSE),
        Ok(false) => log::info!("mouse: no wheel, 3-byte packets on IRQ {}", IRQ_MOUSE),
        Err(err) => log::warn!("mouse: handshake failed ({}), aux port disabled, IRQ {} left masked", err, IRQ_MOUSE),
    }
}

pub fn has_event() -> bool {
    interrupts::without_interrupts(|| MOUSE.lock().has_event())
}

pub fn get_event() -> Option<MouseEvent> {
    interrupts::without_interrupts(|| MOUSE.lock().get_event())
}
