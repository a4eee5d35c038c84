//! Process-level memory primitives
//!
//! The loader never touches the address space directly. It reserves one
//! region per module through [`Mmap`], fills and relocates it while the region
//! is writable, then flips the code pages to read+execute.

mod traits;

pub use traits::Mmap;

use bitflags::bitflags;
use core::ffi::c_int;

cfg_if::cfg_if! {
    if #[cfg(unix)]{
        pub(crate) mod unix;
        pub use unix::*;
    }else {
        pub(crate) mod bare;
        pub use bare::*;
    }
}

/// Size of a memory page as assumed by the loader.
pub const PAGE_SIZE: usize = 0x1000;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Memory protection flags for controlling access permissions.
    pub struct ProtFlags: c_int {
        /// No access allowed. Useful for reserving address space.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    /// Memory mapping configuration flags.
    pub struct MapFlags: c_int {
        /// Create a private copy-on-write mapping.
        const MAP_PRIVATE = 2;

        /// Place the mapping at exactly the specified address.
        const MAP_FIXED = 16;

        /// Create an anonymous mapping not backed by any file.
        const MAP_ANONYMOUS = 32;
    }
}

#[inline]
pub(crate) fn roundup(x: usize, align: usize) -> usize {
    if align <= 1 {
        return x;
    }
    (x + align - 1) & !(align - 1)
}
