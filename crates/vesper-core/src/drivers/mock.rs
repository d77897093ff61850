use std::string::String;
use std::sync::Mutex;
use std::vec::Vec;

use crate::drivers::{CharDevice, Driver, DriverError, DriverKind};

/// Console that keeps everything written to it.
pub struct MemConsole {
    name: &'static str,
    output: Mutex<Vec<u8>>,
}

impl MemConsole {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            output: Mutex::new(Vec::new()),
        }
    }

    fn with_output<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut guard = self.output.lock().expect("mem console poisoned");
        f(&mut guard)
    }

    pub fn contents(&self) -> String {
        self.with_output(|output| String::from_utf8_lossy(output).into_owned())
    }

    pub fn take(&self) -> String {
        self.with_output(|output| {
            let text = String::from_utf8_lossy(output).into_owned();
            output.clear();
            text
        })
    }
}

impl Driver for MemConsole {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Console
    }

    fn init(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

impl CharDevice for MemConsole {
    fn read(&self, _buf: &mut [u8]) -> Result<usize, DriverError> {
        Err(DriverError::Unsupported)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, DriverError> {
        self.with_output(|output| output.extend_from_slice(buf));
        Ok(buf.len())
    }
}
