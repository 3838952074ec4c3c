//! PS/2 input, interrupt dispatch and virtual terminals for a small x86_64 kernel.
//!
//! Everything here except the port and framebuffer backends is plain state
//! machinery, so it builds on the host under `cfg(test)`.

#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]

pub mod constants;
pub mod cpu;
pub mod serial;
pub mod logger;
pub mod queue;
pub mod ps2;
pub mod pic;
pub mod keyboard;
pub mod mouse;
pub mod interrupts;
pub mod vga_buffer;
pub mod vtty;
pub mod shell;

/// Halts until the next interrupt, forever.
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
