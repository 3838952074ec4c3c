//! PS/2 controller port access shared by the keyboard and mouse drivers.

use core::fmt;
use x86_64::instructions::port::{Port, PortReadOnly, PortWriteOnly};
use crate::constants::ps2::{
    CMD_WRITE_AUX, DATA_PORT, DRAIN_LIMIT, STATUS_COMMAND_PORT, STATUS_INPUT_BUFFER_FULL,
    STATUS_OUTPUT_BUFFER_FULL, WAIT_BUDGET,
};

/// Failures of the polled controller handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ps2Error {
    /// The controller never drained its input buffer.
    InputTimeout,
    /// No byte showed up in the output buffer.
    OutputTimeout,
}

impl fmt::Display for Ps2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ps2Error::InputTimeout => write!(f, "PS/2 controller input buffer stayed full"),
            Ps2Error::OutputTimeout => write!(f, "PS/2 device did not answer"),
        }
    }
}

/// Raw register access to the 8042-style controller.
pub trait Ps2Io {
    fn read_status(&mut self) -> u8;
    fn read_data(&mut self) -> u8;
    fn write_data(&mut self, value: u8);
    fn write_command(&mut self, command: u8);

    /// Spins until the controller accepts another byte.
    fn wait_writable(&mut self) -> Result<(), Ps2Error> {
        for _ in 0..WAIT_BUDGET {
            if self.read_status() & STATUS_INPUT_BUFFER_FULL == 0 {
                return Ok(());
            }
        }
        Err(Ps2Error::InputTimeout)
    }

    /// Spins until a byte is waiting on the data port.
    fn wait_readable(&mut self) -> Result<(), Ps2Error> {
        for _ in 0..WAIT_BUDGET {
            if self.read_status() & STATUS_OUTPUT_BUFFER_FULL != 0 {
                return Ok(());
            }
        }
        Err(Ps2Error::OutputTimeout)
    }

    fn send_command(&mut self, command: u8) -> Result<(), Ps2Error> {
        self.wait_writable()?;
        self.write_command(command);
        Ok(())
    }

    fn send_data(&mut self, value: u8) -> Result<(), Ps2Error> {
        self.wait_writable()?;
        self.write_data(value);
        Ok(())
    }

    fn receive(&mut self) -> Result<u8, Ps2Error> {
        self.wait_readable()?;
        Ok(self.read_data())
    }

    /// Discards whatever is waiting in the output buffer. Returns how many
    /// bytes were thrown away.
    fn drain(&mut self) -> usize {
        let mut discarded = 0;
        while discarded < DRAIN_LIMIT && self.read_status() & STATUS_OUTPUT_BUFFER_FULL != 0 {
            self.read_data();
            discarded += 1;
        }
        discarded
    }

    /// Forwards one byte to the device on the auxiliary (mouse) port.
    fn send_aux(&mut self, value: u8) -> Result<(), Ps2Error> {
        self.send_command(CMD_WRITE_AUX)?;
        self.send_data(value)
    }
}

/// The controller behind ports 0x60/0x64.
pub struct Ps2Controller {
    data: Port<u8>,
    status: PortReadOnly<u8>,
    command: PortWriteOnly<u8>,
}

impl Ps2Controller {
    pub const fn new() -> Self {
        Ps2Controller {
            data: Port::new(DATA_PORT),
            status: PortReadOnly::new(STATUS_COMMAND_PORT),
            command: PortWriteOnly::new(STATUS_COMMAND_PORT),
        }
    }
}

impl Default for Ps2Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Ps2Io for Ps2Controller {
    fn read_status(&mut self) -> u8 {
        unsafe { self.status.read() }
    }

    fn read_data(&mut self) -> u8 {
        unsafe { self.data.read() }
    }

    fn write_data(&mut self, value: u8) {
        unsafe { self.data.write(value) }
    }

    fn write_command(&mut self, command: u8) {
        unsafe { self.command.write(command) }
    }
}
