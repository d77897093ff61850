#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod klog;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod loader;
pub mod mem;
pub mod process;
pub mod syscall;
pub mod task;
pub mod trap;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::{kernel_panic, Kernel};
