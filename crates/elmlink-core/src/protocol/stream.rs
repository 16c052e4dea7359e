//! Transport abstraction
//!
//! Narrow seam over the serial transport so the session logic can be
//! exercised against a scripted device in tests.

use serialport::SerialPort;
use std::io::{self, Read, Write};

/// Byte-stream link to the interpreter chip.
///
/// Covers exactly what the session core needs from the transport: raw
/// reads/writes, baud selection for negotiation, buffer flushing, and a
/// non-blocking peek at how many bytes are waiting.
pub trait SerialLink: Read + Write + Send {
    /// Change the link's baud rate
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Discard any unread input
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Discard any untransmitted output
    fn clear_output_buffer(&mut self) -> io::Result<()>;

    /// Number of bytes available to read without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;
}

/// Production [`SerialLink`] backed by a serial port handle
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    /// Wrap an open serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialPortLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialPortLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialLink for SerialPortLink {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port
            .set_baud_rate(baud_rate)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
