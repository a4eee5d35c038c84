use super::{IntoObjectReader, ObjectReader};
use crate::{Result, error::malformed_error, os::RawFile};
use alloc::{
    borrow::Cow,
    format,
    string::{String, ToString},
    vec::Vec,
};

/// An object source backed by an in-memory byte buffer.
///
/// This is useful for objects that are already in memory, such as those
/// embedded in the binary, produced by a JIT, or received over a network.
#[derive(Debug)]
pub struct ObjectBinary<'bytes> {
    /// The name assigned to this object.
    name: String,
    /// The raw object data.
    bytes: Cow<'bytes, [u8]>,
}

impl<'bytes> ObjectBinary<'bytes> {
    /// Creates a new memory-based object.
    ///
    /// # Examples
    /// ```rust
    /// use rtlink::input::ObjectBinary;
    ///
    /// let data: &[u8] = &[0xc3];
    /// let binary = ObjectBinary::new("a.o", data);
    /// ```
    pub fn new(name: &str, bytes: impl Into<Cow<'bytes, [u8]>>) -> Self {
        Self {
            name: name.to_string(),
            bytes: bytes.into(),
        }
    }

    /// Total number of bytes in the object.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the object holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ObjectReader for ObjectBinary<'_> {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(buf.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                malformed_error(format!(
                    "file: {}, read of {} bytes at 0x{:x} is past the end (0x{:x})",
                    self.name,
                    buf.len(),
                    offset,
                    self.bytes.len()
                ))
            })?;
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn size(&self) -> Result<usize> {
        Ok(self.bytes.len())
    }
}

/// An object source backed by a file on the filesystem.
pub struct ObjectFile {
    /// The underlying OS-specific file handle.
    inner: RawFile,
}

impl ObjectFile {
    /// Creates a new file-based object from an owned file descriptor.
    ///
    /// # Safety
    /// The caller must ensure that `raw_fd` is a valid, open file descriptor
    /// owned by this object and not closed by any other code while it exists.
    pub unsafe fn from_owned_fd(path: &str, raw_fd: i32) -> Self {
        ObjectFile {
            inner: RawFile::from_owned_fd(path, raw_fd),
        }
    }

    /// Opens the object file at the given path.
    ///
    /// The file is closed when the [`ObjectFile`] is dropped.
    pub fn from_path(path: impl AsRef<str>) -> Result<Self> {
        Ok(ObjectFile {
            inner: RawFile::from_path(path.as_ref())?,
        })
    }
}

impl ObjectReader for ObjectFile {
    fn file_name(&self) -> &str {
        self.inner.file_name()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        self.inner.read(buf, offset)
    }

    fn size(&self) -> Result<usize> {
        self.inner.size()
    }
}

impl<'a> IntoObjectReader<'a> for &'a str {
    type Reader = ObjectFile;

    fn into_reader(self) -> Result<Self::Reader> {
        ObjectFile::from_path(self)
    }
}

impl<'a> IntoObjectReader<'a> for String {
    type Reader = ObjectFile;

    fn into_reader(self) -> Result<Self::Reader> {
        ObjectFile::from_path(&self)
    }
}

impl<'a> IntoObjectReader<'a> for &'a [u8] {
    type Reader = ObjectBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ObjectBinary::new("<memory>", self))
    }
}

impl<'a> IntoObjectReader<'a> for Vec<u8> {
    type Reader = ObjectBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ObjectBinary::new("<memory>", self))
    }
}

impl<'a> IntoObjectReader<'a> for ObjectFile {
    type Reader = ObjectFile;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}

impl<'a, 'b> IntoObjectReader<'a> for ObjectBinary<'b>
where
    'b: 'a,
{
    type Reader = ObjectBinary<'b>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}
