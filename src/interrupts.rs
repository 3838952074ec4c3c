use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use lazy_static::lazy_static;
use crate::constants::interrupts::{
    IRQ_CASCADE, IRQ_KEYBOARD, IRQ_MOUSE, IRQ_SPURIOUS_PRIMARY, IRQ_SPURIOUS_SECONDARY,
    PIC_1_OFFSET, PIC_2_OFFSET,
};
use crate::keyboard::{Keyboard, KEYBOARD};
use crate::mouse::{Mouse, MOUSE};
use crate::pic::{InterruptController, PICS};
use crate::ps2::{Ps2Controller, Ps2Io};

/// Hardware interrupt numbers (after remapping)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
    // PIC 1 (master) IRQs 2-7
    Cascade,
    COM2,
    COM1,
    LPT2,
    FloppyDisk,
    LPT1,
    // PIC 2 (slave) IRQs 8-15
    RTC = PIC_2_OFFSET,
    ACPI,
    Available1,
    Available2,
    Mouse,
    CoProcessor,
    PrimaryATA,
    SecondaryATA,
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// IRQ line 0-15 behind this vector.
    pub fn line(self) -> u8 {
        self.as_u8() - PIC_1_OFFSET
    }
}

/// Owner of an IRQ line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Keyboard,
    Mouse,
    Unowned,
}

pub fn route(line: u8) -> Route {
    match line {
        IRQ_KEYBOARD => Route::Keyboard,
        IRQ_MOUSE => Route::Mouse,
        _ => Route::Unowned,
    }
}

/// Acknowledges `line` when dropped, whatever happens above it.
struct EndOfInterrupt<'a, C: InterruptController> {
    pic: &'a mut C,
    line: u8,
}

impl<C: InterruptController> Drop for EndOfInterrupt<'_, C> {
    fn drop(&mut self) {
        self.pic.acknowledge(self.line);
    }
}

/// Services one hardware interrupt: decode in the owning driver, then
/// exactly one acknowledgement.
///
/// A spurious IRQ 7 gets no EOI at all; a spurious IRQ 15 only acknowledges
/// the cascade on the primary chip.
pub fn service<C: InterruptController, P: Ps2Io>(
    line: u8,
    pic: &mut C,
    io: &mut P,
    keyboard: &mut Keyboard,
    mouse: &mut Mouse,
) {
    if (line == IRQ_SPURIOUS_PRIMARY || line == IRQ_SPURIOUS_SECONDARY) && !pic.in_service(line) {
        if line == IRQ_SPURIOUS_SECONDARY {
            pic.acknowledge(IRQ_CASCADE);
        }
        return;
    }

    let _eoi = EndOfInterrupt { pic, line };

    match route(line) {
        Route::Keyboard => keyboard.handle_scancode(io.read_data()),
        Route::Mouse => mouse.handle_byte(io.read_data()),
        Route::Unowned => {}
    }
}

/// Interrupt-context entry shared by all sixteen IRQ stubs.
fn on_irq(index: InterruptIndex) {
    // foreground only takes these locks with interrupts off, so they are free here
    let mut pics = PICS.lock();
    let mut keyboard = KEYBOARD.lock();
    let mut mouse = MOUSE.lock();
    service(
        index.line(),
        &mut *pics,
        &mut Ps2Controller::new(),
        &mut keyboard,
        &mut mouse,
    );
}

macro_rules! irq_handlers {
    ($($handler:ident => $index:ident),* $(,)?) => {
        $(
            extern "x86-interrupt" fn $handler(_stack_frame: InterruptStackFrame) {
                on_irq(InterruptIndex::$index);
            }
        )*

        fn install_irq_handlers(idt: &mut InterruptDescriptorTable) {
            $(idt[InterruptIndex::$index.as_u8()].set_handler_fn($handler);)*
        }
    };
}

// Every line gets a stub so an unexpected IRQ is still acknowledged
irq_handlers! {
    timer_handler => Timer,
    keyboard_handler => Keyboard,
    cascade_handler => Cascade,
    com2_handler => COM2,
    com1_handler => COM1,
    lpt2_handler => LPT2,
    floppy_handler => FloppyDisk,
    lpt1_handler => LPT1,
    rtc_handler => RTC,
    acpi_handler => ACPI,
    available1_handler => Available1,
    available2_handler => Available2,
    mouse_handler => Mouse,
    coprocessor_handler => CoProcessor,
    primary_ata_handler => PrimaryATA,
    secondary_ata_handler => SecondaryATA,
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        // CPU exceptions
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.double_fault.set_handler_fn(double_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);

        install_irq_handlers(&mut idt);
        idt
    };
}

/// Loads the IDT and remaps the PICs with every line masked.
/// Interrupts stay disabled until [`enable`].
pub fn init() {
    IDT.load();
    log::info!("interrupts: IDT loaded");
    crate::pic::initialize();
}

pub fn enable() {
    x86_64::instructions::interrupts::enable();
    log::info!("interrupts: enabled");
}

// Exception handlers
extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("EXCEPTION: BREAKPOINT at {:#x}", stack_frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    panic!(
        "EXCEPTION: PAGE FAULT\nAccessed Address: {:?}\nError Code: {:?}\n{:#?}",
        Cr2::read(),
        error_code,
        stack_frame
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: GENERAL PROTECTION FAULT\nError Code: {:#x}\n{:#?}",
        error_code, stack_frame
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::interrupts::IRQ_LINES;
    use crate::pic::mock::RecordingPic;
    use crate::ps2::mock::ScriptedPs2;

    struct Rig {
        pic: RecordingPic,
        io: ScriptedPs2,
        keyboard: Keyboard,
        mouse: Mouse,
    }

    impl Rig {
        fn new(pending: &[u8]) -> Self {
            Rig {
                pic: RecordingPic::new(),
                io: ScriptedPs2::new(pending),
                keyboard: Keyboard::new(),
                mouse: Mouse::new(),
            }
        }

        fn fire(&mut self, line: u8) {
            service(line, &mut self.pic, &mut self.io, &mut self.keyboard, &mut self.mouse);
        }
    }

    #[test]
    fn every_line_is_acknowledged_exactly_once() {
        let mut rig = Rig::new(&[0x1E, 0x08]);
        for line in 0..IRQ_LINES {
            rig.fire(line);
        }
        let expected: Vec<u8> = (0..IRQ_LINES).collect();
        assert_eq!(rig.pic.secondary_acks, (8..IRQ_LINES).collect::<Vec<u8>>());
        assert_eq!(rig.pic.acks, expected);
    }

    #[test]
    fn keyboard_line_decodes_the_pending_byte() {
        let mut rig = Rig::new(&[0x1E]);
        rig.fire(IRQ_KEYBOARD);
        assert_eq!(rig.keyboard.next_char(), Some(b'a'));
        assert_eq!(rig.pic.acks, [IRQ_KEYBOARD]);
    }

    #[test]
    fn mouse_line_feeds_the_packet_assembler() {
        let mut rig = Rig::new(&[0x08, 0x10, 0xF0]);
        for _ in 0..3 {
            rig.fire(IRQ_MOUSE);
        }
        let event = rig.mouse.get_event().unwrap();
        assert_eq!((event.delta_x, event.delta_y), (16, -16));
        assert_eq!(rig.pic.acks, [IRQ_MOUSE; 3]);
    }

    #[test]
    fn unowned_line_leaves_the_data_port_alone() {
        let mut rig = Rig::new(&[0x1E]);
        rig.fire(5);
        assert_eq!(rig.io.replies.len(), 1);
        assert!(!rig.keyboard.has_event());
        assert_eq!(rig.pic.acks, [5]);
    }

    #[test]
    fn desynced_mouse_byte_is_still_acknowledged() {
        let mut rig = Rig::new(&[0x00]);
        rig.fire(IRQ_MOUSE);
        assert!(!rig.mouse.has_event());
        assert_eq!(rig.pic.acks, [IRQ_MOUSE]);
    }

    #[test]
    fn spurious_primary_irq_is_not_acknowledged() {
        let mut rig = Rig::new(&[0x1E]);
        rig.pic.spurious.push(IRQ_SPURIOUS_PRIMARY);
        rig.fire(IRQ_SPURIOUS_PRIMARY);
        assert!(rig.pic.acks.is_empty());
        assert_eq!(rig.io.replies.len(), 1);
    }

    #[test]
    fn spurious_secondary_irq_only_acknowledges_the_cascade() {
        let mut rig = Rig::new(&[]);
        rig.pic.spurious.push(IRQ_SPURIOUS_SECONDARY);
        rig.fire(IRQ_SPURIOUS_SECONDARY);
        assert_eq!(rig.pic.acks, [IRQ_CASCADE]);
        assert!(rig.pic.secondary_acks.is_empty());
    }

    #[test]
    fn genuine_irq_on_a_spurious_line_is_acknowledged() {
        let mut rig = Rig::new(&[]);
        rig.fire(IRQ_SPURIOUS_PRIMARY);
        rig.fire(IRQ_SPURIOUS_SECONDARY);
        assert_eq!(rig.pic.acks, [IRQ_SPURIOUS_PRIMARY, IRQ_SPURIOUS_SECONDARY]);
        assert_eq!(rig.pic.secondary_acks, [IRQ_SPURIOUS_SECONDARY]);
    }

    #[test]
    fn mouse_acknowledgement_reaches_both_chips() {
        let mut rig = Rig::new(&[0x08, 0x1E]);
        rig.fire(IRQ_MOUSE);
        rig.fire(IRQ_KEYBOARD);
        assert_eq!(rig.pic.acks, [IRQ_MOUSE, IRQ_KEYBOARD]);
        assert_eq!(rig.pic.secondary_acks, [IRQ_MOUSE]);
    }

    #[test]
    fn interrupt_index_matches_the_remapped_vectors() {
        use crate::pic::vector_for_line;

        assert_eq!(InterruptIndex::Timer.as_u8(), vector_for_line(0));
        assert_eq!(InterruptIndex::Keyboard.as_u8(), vector_for_line(IRQ_KEYBOARD));
        assert_eq!(InterruptIndex::Mouse.as_u8(), vector_for_line(IRQ_MOUSE));
        assert_eq!(InterruptIndex::Mouse.line(), IRQ_MOUSE);
        assert_eq!(InterruptIndex::SecondaryATA.line(), 15);
    }

    #[test]
    fn remapped_range_avoids_cpu_exceptions() {
        assert!(PIC_1_OFFSET >= 32);
        assert_eq!(PIC_2_OFFSET, PIC_1_OFFSET + 8);
    }
}
