use crate::{
    Result,
    error::{io_error, mmap_error},
    input::ObjectReader,
    os::{MapFlags, Mmap, ProtFlags},
};
use alloc::{
    ffi::CString,
    string::{String, ToString},
};
use core::{ffi::c_void, ptr::NonNull};
use libc::{O_RDONLY, SEEK_END, SEEK_SET, mmap, mprotect, munmap};

/// An implementation of Mmap trait
pub struct DefaultMmap;

pub(crate) struct RawFile {
    name: String,
    fd: i32,
}

impl Mmap for DefaultMmap {
    unsafe fn mmap_anonymous(
        addr: Option<usize>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<c_void>> {
        let ptr = unsafe {
            mmap(
                addr.unwrap_or(0) as _,
                len,
                prot.bits(),
                flags.union(MapFlags::MAP_ANONYMOUS).bits(),
                -1,
                0,
            )
        };
        if core::ptr::eq(ptr, libc::MAP_FAILED) {
            return Err(mmap_error("mmap anonymous failed"));
        }
        NonNull::new(ptr).ok_or_else(|| mmap_error("mmap returned null"))
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        let res = unsafe { munmap(addr.as_ptr(), len) };
        if res != 0 {
            return Err(mmap_error("munmap failed"));
        }
        Ok(())
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        let res = unsafe { mprotect(addr.as_ptr(), len, prot.bits()) };
        if res != 0 {
            return Err(mmap_error("mprotect failed"));
        }
        Ok(())
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl RawFile {
    pub(crate) fn from_path(path: &str) -> Result<Self> {
        let name = CString::new(path).map_err(|_| io_error("path contains a nul byte"))?;
        let fd = unsafe { libc::open(name.as_ptr(), O_RDONLY) };
        if fd == -1 {
            return Err(io_error("open failed"));
        }
        Ok(Self {
            name: path.to_string(),
            fd,
        })
    }

    pub(crate) fn from_owned_fd(path: &str, raw_fd: i32) -> Self {
        Self {
            name: path.to_string(),
            fd: raw_fd,
        }
    }
}

fn lseek(fd: i32, offset: usize) -> Result<()> {
    let off = unsafe { libc::lseek(fd, offset as _, SEEK_SET) };
    if off == -1 || off as usize != offset {
        return Err(io_error("lseek failed"));
    }
    Ok(())
}

fn read_exact(fd: i32, mut bytes: &mut [u8]) -> Result<()> {
    loop {
        if bytes.is_empty() {
            return Ok(());
        }
        let ptr = bytes.as_mut_ptr() as *mut libc::c_void;
        let result = unsafe { libc::read(fd, ptr, bytes.len()) };
        if result < 0 {
            return Err(io_error("read error"));
        } else if result == 0 {
            return Err(io_error("failed to fill buffer"));
        }
        bytes = &mut bytes[result as usize..];
    }
}

impl ObjectReader for RawFile {
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        lseek(self.fd, offset)?;
        read_exact(self.fd, buf)
    }

    fn file_name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Result<usize> {
        let end = unsafe { libc::lseek(self.fd, 0, SEEK_END) };
        if end < 0 {
            return Err(io_error("lseek failed"));
        }
        Ok(end as usize)
    }
}
