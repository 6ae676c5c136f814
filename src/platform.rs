//! Byte I/O for `putb()`, `getb()` and `print()`

use crate::error::{ErrorKind, Exception, VmError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

pub trait Platform {
    fn put_byte(&mut self, byte: u8) -> io::Result<()>;

    fn get_byte(&mut self) -> io::Result<u8>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        bytes.iter().try_for_each(|&b| self.put_byte(b))
    }
}

/// stdin / stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdPlatform;

impl Platform for StdPlatform {
    fn put_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    fn get_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        io::stdin().lock().read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(bytes)?;
        out.flush()
    }
}

/// In-memory platform: scripted input, captured output
///
/// Clones share the same buffers, so keep one clone to inspect what the VM
/// wrote through the other.
#[derive(Debug, Default, Clone)]
pub struct CapturePlatform {
    output: Rc<RefCell<Vec<u8>>>,
    input: Rc<RefCell<VecDeque<u8>>>,
}

impl CapturePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: &[u8]) -> Self {
        let platform = Self::default();
        platform.input.borrow_mut().extend(input);
        platform
    }

    pub fn output(&self) -> Vec<u8> {
        self.output.borrow().clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.borrow()).into_owned()
    }
}

impl Platform for CapturePlatform {
    fn put_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.borrow_mut().push(byte);
        Ok(())
    }

    fn get_byte(&mut self) -> io::Result<u8> {
        self.input
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "input exhausted"))
    }
}

pub(crate) fn io_error(err: io::Error) -> VmError {
    Exception::new(ErrorKind::IoError, err.to_string()).into()
}
