//! Cascaded 8259 PIC configuration: remap, per-line masking, end of interrupt.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;
use crate::constants::interrupts::{
    IRQ_LINES, OCW3_READ_ISR, PIC_1_COMMAND, PIC_1_OFFSET, PIC_2_COMMAND, PIC_2_OFFSET,
};

/// Operations the dispatch layer and the drivers need from the controller.
pub trait InterruptController {
    /// Remaps lines 0-15 past the CPU exception vectors and masks all of them.
    fn initialize(&mut self);
    fn mask(&mut self, line: u8);
    fn unmask(&mut self, line: u8);
    /// End of interrupt; lines 8-15 also acknowledge the secondary chip.
    fn acknowledge(&mut self, line: u8);
    /// Whether `line` is really being serviced. A spurious IRQ 7 or 15 is
    /// raised without its in-service bit set.
    fn in_service(&mut self, line: u8) -> bool;
}

/// Vector the remapped controller raises for `line`.
pub fn vector_for_line(line: u8) -> u8 {
    PIC_1_OFFSET + line
}

/// Whether `vector` comes through the secondary chip, which then needs an EOI
/// of its own before the primary's.
pub fn on_secondary(vector: u8) -> bool {
    (PIC_2_OFFSET..PIC_2_OFFSET + 8).contains(&vector)
}

/// Mask registers with `line` set (masked) or cleared, the rest untouched.
pub fn with_line(masks: [u8; 2], line: u8, masked: bool) -> [u8; 2] {
    let mut masks = masks;
    let (chip, bit) = (usize::from(line / 8), 1u8 << (line % 8));
    if masked {
        masks[chip] |= bit;
    } else {
        masks[chip] &= !bit;
    }
    masks
}

/// The primary/secondary pair wired as on every PC.
pub struct Pics {
    chained: ChainedPics,
}

impl Pics {
    pub const fn new() -> Self {
        Pics {
            chained: unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) },
        }
    }

    fn set_line(&mut self, line: u8, masked: bool) {
        if line >= IRQ_LINES {
            return;
        }
        unsafe {
            let [primary, secondary] = with_line(self.chained.read_masks(), line, masked);
            self.chained.write_masks(primary, secondary);
        }
    }
}

impl Default for Pics {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for Pics {
    fn initialize(&mut self) {
        unsafe {
            self.chained.initialize();
            self.chained.write_masks(0xFF, 0xFF);
        }
    }

    fn mask(&mut self, line: u8) {
        self.set_line(line, true);
    }

    fn unmask(&mut self, line: u8) {
        self.set_line(line, false);
    }

    fn acknowledge(&mut self, line: u8) {
        // pic8259 sends the secondary EOI itself for vectors in its range
        unsafe {
            self.chained.notify_end_of_interrupt(vector_for_line(line));
        }
    }

    fn in_service(&mut self, line: u8) -> bool {
        let (port, bit) = if line < 8 {
            (PIC_1_COMMAND, line)
        } else {
            (PIC_2_COMMAND, line - 8)
        };
        let mut command: Port<u8> = Port::new(port);
        unsafe {
            command.write(OCW3_READ_ISR);
            command.read() & (1 << bit) != 0
        }
    }
}

/// Programmable Interrupt Controller (PIC) setup
pub static PICS: Mutex<Pics> = Mutex::new(Pics::new());

pub fn initialize() {
    interrupts::without_interrupts(|| PICS.lock().initialize());
    log::info!(
        "pic: IRQ 0-15 remapped to vectors {}-{}, all lines masked",
        PIC_1_OFFSET,
        PIC_2_OFFSET + 7
    );
}

pub fn unmask(line: u8) {
    interrupts::without_interrupts(|| PICS.lock().unmask(line));
}

pub fn mask(line: u8) {
    interrupts::without_interrupts(|| PICS.lock().mask(line));
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::vec::Vec;

    /// Controller that only remembers what it was told.
    pub struct RecordingPic {
        pub masks: [u8; 2],
        /// Lines acknowledged, in order
        pub acks: Vec<u8>,
        /// EOIs that reached the secondary chip, by line
        pub secondary_acks: Vec<u8>,
        /// Lines that report an empty in-service bit
        pub spurious: Vec<u8>,
        pub initialized: bool,
    }

    impl RecordingPic {
        pub fn new() -> Self {
            RecordingPic {
                masks: [0; 2],
                acks: Vec::new(),
                secondary_acks: Vec::new(),
                spurious: Vec::new(),
                initialized: false,
            }
        }
    }

    impl InterruptController for RecordingPic {
        fn initialize(&mut self) {
            self.masks = [0xFF; 2];
            self.initialized = true;
        }

        fn mask(&mut self, line: u8) {
            self.masks = with_line(self.masks, line, true);
        }

        fn unmask(&mut self, line: u8) {
            self.masks = with_line(self.masks, line, false);
        }

        fn acknowledge(&mut self, line: u8) {
            self.acks.push(line);
            if on_secondary(vector_for_line(line)) {
                self.secondary_acks.push(line);
            }
        }

        fn in_service(&mut self, line: u8) -> bool {
            !self.spurious.contains(&line)
        }
    }
}
