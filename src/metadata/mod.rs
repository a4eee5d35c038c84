//! Runtime metadata of a loaded module
//!
//! Everything the host runtime needs to walk stacks through, and scan the
//! frames of, the code of a module: one record per function, a single blob
//! holding function names, file names and the pc tables, a per-function file
//! list, and an index that maps a pc to its function in constant time.
//!
//! Offsets into each table have their own type so that a file offset can
//! never be used to index the pc tables and so on.

mod builder;
mod pcindex;
mod pcvalue;

pub(crate) use builder::{MetadataBuilder, ModuleMetadata};
pub use pcindex::{FindFuncBucket, MIN_FUNC, N_SUB, PC_BUCKET_SIZE, SUB_BUCKET_SIZE, find_func_index};
pub(crate) use pcindex::PcIndexBuilder;
pub use pcvalue::{PcTableEncoder, PcValueIter, pc_value};

use core::fmt::{self, Display};

macro_rules! offset_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[repr(transparent)]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub const fn get(self) -> usize {
                self.0 as usize
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:x}", self.0)
            }
        }
    };
}

offset_type!(
    /// Offset of a NUL-terminated function name in the metadata blob.
    StringOffset
);
offset_type!(
    /// Offset of a NUL-terminated file name in the metadata blob.
    FileOffset
);
offset_type!(
    /// Offset of a pc table in the metadata blob. Zero means the table is absent.
    PcTableOffset
);
offset_type!(
    /// Index into the module's file table.
    FileIndex
);

impl PcTableOffset {
    pub const ABSENT: Self = Self(0);

    #[inline]
    pub const fn is_absent(self) -> bool {
        self.0 == 0
    }
}

/// Bytes at the start of the metadata blob, so that no table lives at offset 0.
pub const BLOB_HEADER: [u8; 8] = [
    0xf1,
    0xff,
    0xff,
    0xff,
    0,
    0,
    crate::arch::PC_QUANTUM as u8,
    crate::arch::PTR_SIZE as u8,
];

/// Well-known slots of the per-function pc data tables.
pub mod pcdata {
    pub const UNSAFE_POINT: usize = 0;
    pub const STACK_MAP_INDEX: usize = 1;
    pub const INLINE_TREE_INDEX: usize = 2;
}

/// Well-known slots of the per-function auxiliary data.
pub mod funcdata {
    pub const ARGS_POINTER_MAPS: usize = 0;
    pub const LOCALS_POINTER_MAPS: usize = 1;
    pub const STACK_OBJECTS: usize = 2;
}

/// Descriptor of one function in a loaded module.
///
/// All offsets are relative: `entry_off` to the start of the code region,
/// `name_off` and the pc table offsets to the metadata blob, `cu_offset` to
/// the module's file table. The per-function pc data and auxiliary data live
/// in the module's side arrays starting at `pcdata_start` and
/// `funcdata_start`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FuncRecord {
    pub entry_off: u32,
    pub name_off: StringOffset,
    pub args: i32,
    pub deferreturn: u32,
    pub pcsp: PcTableOffset,
    pub pcfile: PcTableOffset,
    pub pcln: PcTableOffset,
    pub npcdata: u32,
    pub cu_offset: FileIndex,
    pub nfiles: u32,
    pub pcdata_start: u32,
    pub funcdata_start: u32,
    pub func_id: u8,
    pub flag: u8,
    pub nfuncdata: u8,
    pub _pad: u8,
}

/// One entry of the function table: the absolute entry address of a
/// function and the index of its [`FuncRecord`].
///
/// The table is sorted by `entry` and ends with a sentinel whose `entry` is
/// the end of the module's functions.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FuncTab {
    pub entry: usize,
    pub funcoff: usize,
}

/// A contiguous run of code contributed by one input object.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextSect {
    /// Offset of the run from the start of the code region.
    pub vaddr: usize,
    pub length: usize,
    /// Absolute address of the run.
    pub baseaddr: usize,
}

impl TextSect {
    #[inline]
    pub fn contains_off(&self, off: usize) -> bool {
        off >= self.vaddr && off < self.vaddr + self.length
    }
}

/// Reads the NUL-terminated string at `off` in `blob`.
pub(crate) fn blob_str(blob: &[u8], off: usize) -> Option<&str> {
    let tail = blob.get(off..)?;
    let len = tail.iter().position(|b| *b == 0)?;
    core::str::from_utf8(&tail[..len]).ok()
}
