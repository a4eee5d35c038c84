//! The memory region backing one loaded module
use crate::{
    Result,
    os::{MapFlags, Mmap, PAGE_SIZE, ProtFlags},
};
use core::{ffi::c_void, fmt::Debug, ops::Range, ptr::NonNull};

/// One anonymous mapping holding a module's code, data and auxiliary blobs.
///
/// The mapping is released when the last owner drops it.
pub(crate) struct ModuleMemory {
    memory: NonNull<c_void>,
    len: usize,
    mprotect: unsafe fn(NonNull<c_void>, usize, ProtFlags) -> Result<()>,
    munmap: unsafe fn(NonNull<c_void>, usize) -> Result<()>,
}

impl Debug for ModuleMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleMemory")
            .field("memory", &self.memory)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for ModuleMemory {
    fn drop(&mut self) {
        if let Err(_err) = unsafe { (self.munmap)(self.memory, self.len) } {
            #[cfg(feature = "log")]
            log::warn!("[Memory] failed to unmap module at {:p}: {}", self.memory, _err);
        }
    }
}

// The region is only written before the module is shared.
unsafe impl Send for ModuleMemory {}
unsafe impl Sync for ModuleMemory {}

impl ModuleMemory {
    /// Reserves `len` bytes (a multiple of the page size) of read-write memory.
    pub(crate) fn map<M: Mmap>(len: usize) -> Result<Self> {
        debug_assert!(len % PAGE_SIZE == 0);
        let memory = unsafe {
            M::mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )?
        };
        #[cfg(feature = "log")]
        log::trace!("[Memory] mapped 0x{:x} bytes at {:p}", len, memory);
        Ok(Self {
            memory,
            len,
            mprotect: M::mprotect,
            munmap: M::munmap,
        })
    }

    #[inline]
    pub(crate) fn base(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.len
    }

    /// Copies the relocated image to the start of the region.
    pub(crate) fn write(&mut self, image: &[u8]) {
        assert!(image.len() <= self.len);
        unsafe {
            core::ptr::copy_nonoverlapping(image.as_ptr(), self.memory.as_ptr().cast(), image.len());
        }
    }

    /// Changes the protection of a page-aligned range of the region.
    pub(crate) fn protect(&self, range: Range<usize>, prot: ProtFlags) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        debug_assert!(range.start % PAGE_SIZE == 0 && range.end <= self.len);
        unsafe {
            let start = self.memory.byte_add(range.start);
            (self.mprotect)(start, range.len(), prot)
        }
    }
}
