pub mod heap;
pub mod kheap;
pub mod paging;
pub mod phys;

pub use kheap::KernelHeap;
pub use paging::{Access, AddressSpace, PageEntry, PageFlags};
pub use phys::Ram;
