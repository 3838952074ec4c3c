#![no_std]
#![no_main]

use core::fmt::Write;
use core::panic::PanicInfo;
use x86_64::instructions::interrupts;
use vtkern::constants::vtty::WHEEL_SCROLL_LINES;
use vtkern::mouse::MouseEvent;
use vtkern::shell::{Action, Shell};
use vtkern::vga_buffer::{Color, ColorCode};
use vtkern::vtty::VTTY;
use vtkern::{cpu, keyboard, logger, mouse, println, vtty};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    interrupts::disable();
    log::error!("{}", info);

    // the foreground may have died holding the lock
    if let Some(mut vtty) = VTTY.try_lock() {
        vtty.set_color(ColorCode::new(Color::White, Color::Red));
        vtty.clear();
        let _ = write!(vtty, "KERNEL PANIC\n\n{}", info);
    }
    vtkern::hlt_loop()
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    cpu::mark_stack_top();
    logger::init();
    log::info!("vtkern {} booting", env!("CARGO_PKG_VERSION"));

    // IDT and PICs first; every line stays masked until its driver is ready
    vtkern::interrupts::init();
    keyboard::initialize();
    mouse::initialize();
    vtty::initialize();

    let mut shell = Shell::new();
    println!("vtkern {}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for available commands.");
    println!("Alt+F1..F8 switches terminal, UP/DOWN recalls history.");
    shell.prompt(&mut *VTTY.lock());

    vtkern::interrupts::enable();

    loop {
        while let Some(event) = keyboard::get_event() {
            let modifiers = keyboard::modifiers();
            let action = shell.process_key(event, modifiers, &mut *VTTY.lock());
            if let Some(action) = action {
                perform(action);
            }
        }

        while let Some(event) = mouse::get_event() {
            scroll(event);
        }

        wait_for_input();
    }
}

/// Wheel notches move the active terminal's view.
fn scroll(event: MouseEvent) {
    if event.delta_wheel > 0 {
        VTTY.lock().scroll_up(WHEEL_SCROLL_LINES);
    } else if event.delta_wheel < 0 {
        VTTY.lock().scroll_down(WHEEL_SCROLL_LINES);
    }
}

/// Sleeps until an interrupt, unless one already queued something.
fn wait_for_input() {
    interrupts::disable();
    if keyboard::has_event() || mouse::has_event() {
        interrupts::enable();
    } else {
        interrupts::enable_and_hlt();
    }
}

fn perform(action: Action) -> ! {
    match action {
        Action::Reboot => keyboard::reset_cpu(),
        Action::Halt => {
            log::info!("halt requested");
            interrupts::disable();
            vtkern::hlt_loop()
        }
    }
}
