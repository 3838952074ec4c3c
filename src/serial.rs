//! COM1 output for diagnostics; the VGA display belongs to the VTTY.

use core::fmt::{self, Write};
use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;
use crate::constants::logging::SERIAL_PORT;

lazy_static! {
    pub static ref SERIAL: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(SERIAL_PORT) };
        port.init();
        Mutex::new(port)
    };
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // an interrupt that logs while we hold the port would spin forever
    interrupts::without_interrupts(|| {
        let _ = SERIAL.lock().write_fmt(args);
    });
}
