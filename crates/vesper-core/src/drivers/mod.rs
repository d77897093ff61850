use crate::error::KernelError;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DriverKind {
    Console,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DriverError {
    Unsupported,
}

impl From<DriverError> for KernelError {
    fn from(_: DriverError) -> Self {
        KernelError::Io
    }
}

pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> DriverKind;
    fn init(&self) -> Result<(), DriverError>;
    fn shutdown(&self) {}
}

pub trait CharDevice: Driver {
    fn read(&self, buf: &mut [u8]) -> Result<usize, DriverError>;
    fn write(&self, buf: &[u8]) -> Result<usize, DriverError>;
}

#[cfg(any(test, feature = "std"))]
pub mod mock;
