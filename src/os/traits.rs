use core::{ffi::c_void, ptr::NonNull};

use super::{MapFlags, ProtFlags};
use crate::Result;

/// A trait for low-level memory mapping operations.
///
/// This is the loader's only window onto the host's page allocator. A module
/// region is created with [`Mmap::mmap_anonymous`], written while it is
/// `PROT_READ | PROT_WRITE`, switched with [`Mmap::mprotect`] once relocation
/// is done, and released with [`Mmap::munmap`] when the last reference to the
/// module goes away.
///
/// # Safety
/// All methods are unsafe because they manipulate the process's virtual address space.
/// Implementors must ensure thread-safety and proper error handling.
///
/// # Example
/// ```rust,ignore
/// struct MyMmap;
///
/// impl Mmap for MyMmap {
///     unsafe fn mmap_anonymous(
///         addr: Option<usize>,
///         len: usize,
///         prot: ProtFlags,
///         flags: MapFlags,
///     ) -> Result<NonNull<c_void>> {
///         // Platform-specific implementation
///         todo!()
///     }
///
///     // Implement other required methods...
/// }
/// ```
pub trait Mmap {
    /// Creates an anonymous, zero-filled memory mapping.
    ///
    /// # Arguments
    /// * `addr` - Preferred starting address (page-aligned). `None` lets the system choose.
    /// * `len` - Size of the mapping in bytes (a multiple of the page size).
    /// * `prot` - Initial memory protection flags.
    /// * `flags` - Mapping configuration flags.
    ///
    /// # Safety
    /// Manipulates address space. Ensure `addr` is valid and page-aligned if specified.
    unsafe fn mmap_anonymous(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<c_void>>;

    /// Unmaps a memory region, releasing the associated resources.
    ///
    /// # Safety
    /// Ensure `addr` and `len` match the original mapping. Do not access the region after unmapping.
    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()>;

    /// Changes the protection of a memory region.
    ///
    /// # Safety
    /// Changing permissions can affect running code. `addr` must be page-aligned.
    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()>;
}
