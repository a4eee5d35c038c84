use crate::{Result, error::malformed_error};
use alloc::format;

/// A trait for reading raw object bytes from various sources.
///
/// `ObjectReader` abstracts the underlying storage (memory, file system, etc.)
/// so the metadata builder and the layout stage can copy symbol contents and
/// pc tables out of an object without caring where it lives.
pub trait ObjectReader {
    /// Returns the full name or path of the object.
    fn file_name(&self) -> &str;

    /// Reads a chunk of data from the object into the provided buffer.
    ///
    /// # Arguments
    /// * `buf` - The destination buffer. Its length determines the number of bytes read.
    /// * `offset` - The starting byte offset within the object.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Returns the total number of bytes the object holds.
    fn size(&self) -> Result<usize>;

    /// Checks that `size` bytes at `offset` lie inside the object.
    fn check_range(&self, offset: usize, size: usize) -> Result<()> {
        let total = self.size()?;
        match offset.checked_add(size) {
            Some(end) if end <= total => Ok(()),
            _ => Err(malformed_error(format!(
                "file: {}, 0x{:x} bytes at 0x{:x} lie past the end (0x{:x})",
                self.file_name(),
                size,
                offset,
                total
            ))),
        }
    }

    /// Returns the short name of the object (the filename without the path).
    fn shortname(&self) -> &str {
        let name = self.file_name();
        name.rsplit('/').next().unwrap_or(name)
    }
}

impl<R: ObjectReader + ?Sized> ObjectReader for alloc::boxed::Box<R> {
    fn file_name(&self) -> &str {
        (**self).file_name()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        (**self).read(buf, offset)
    }

    fn size(&self) -> Result<usize> {
        (**self).size()
    }
}

/// A trait for converting various input sources into an `ObjectReader`.
pub trait IntoObjectReader<'a> {
    /// The type of reader produced by this conversion.
    type Reader: ObjectReader + 'a;

    /// Converts the input into an `ObjectReader`.
    fn into_reader(self) -> Result<Self::Reader>;
}
