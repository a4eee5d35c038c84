use crate::{
    Result,
    error::{io_error, mmap_error},
    input::ObjectReader,
    os::{MapFlags, Mmap, PAGE_SIZE, ProtFlags},
};
use alloc::alloc::{alloc_zeroed, dealloc};
use core::{alloc::Layout, ffi::c_void, ptr::NonNull};

/// An implementation of Mmap trait backed by the global allocator.
///
/// Protection changes are accepted and ignored, so this backend is only
/// suitable for targets without memory protection.
pub struct DefaultMmap;

impl Mmap for DefaultMmap {
    unsafe fn mmap_anonymous(
        addr: Option<usize>,
        len: usize,
        _prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<c_void>> {
        if addr.is_some() || flags.contains(MapFlags::MAP_FIXED) {
            return Err(mmap_error("fixed mappings are not supported"));
        }
        let layout = Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|_| mmap_error("invalid mapping layout"))?;
        let memory = unsafe { alloc_zeroed(layout) };
        NonNull::new(memory as *mut c_void).ok_or_else(|| mmap_error("allocation failed"))
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        unsafe {
            dealloc(
                addr.as_ptr() as _,
                Layout::from_size_align_unchecked(len, PAGE_SIZE),
            )
        };
        Ok(())
    }

    unsafe fn mprotect(_addr: NonNull<c_void>, _len: usize, _prot: ProtFlags) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct RawFile;

impl RawFile {
    pub(crate) fn from_path(_path: &str) -> Result<Self> {
        Err(io_error("no file system on this target"))
    }

    pub(crate) fn from_owned_fd(_path: &str, _raw_fd: i32) -> Self {
        RawFile
    }
}

impl ObjectReader for RawFile {
    fn file_name(&self) -> &str {
        ""
    }

    fn read(&mut self, _buf: &mut [u8], _offset: usize) -> Result<()> {
        Err(io_error("no file system on this target"))
    }

    fn size(&self) -> Result<usize> {
        Err(io_error("no file system on this target"))
    }
}
