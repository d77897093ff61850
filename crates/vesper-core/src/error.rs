use core::fmt;

/// Status codes shared by every layer of the core. Errors travel up the
/// call chain unchanged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelError {
    InvalidArgument,
    OutOfMemory,
    Io,
    BadFormat,
    SlotTaken,
    NotFound,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Negative status handed back to user code through `eax`.
    pub const fn code(self) -> i32 {
        match self {
            KernelError::Io => -1,
            KernelError::InvalidArgument => -2,
            KernelError::OutOfMemory => -3,
            KernelError::NotFound => -4,
            KernelError::SlotTaken => -8,
            KernelError::BadFormat => -9,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            KernelError::InvalidArgument => "invalid argument",
            KernelError::OutOfMemory => "out of memory",
            KernelError::Io => "i/o error",
            KernelError::BadFormat => "bad format",
            KernelError::SlotTaken => "slot taken",
            KernelError::NotFound => "not found",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
