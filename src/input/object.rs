//! The parsed view of a relocatable object
//!
//! Container parsing belongs to the caller: whatever reads the on-disk format
//! hands the loader a list of [`ObjSymbol`]s describing where each symbol's
//! bytes, pc tables and references live inside the object, plus a reader for
//! the raw bytes.

use super::{IntoObjectReader, ObjectReader};
use crate::Result;
use alloc::{boxed::Box, string::String, vec::Vec};

/// What kind of contents a symbol carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymKind {
    /// Machine code. Placed in the code region and given a function record.
    Text,
    /// Writable initialised data.
    Data,
    /// Read-only initialised data.
    ReadOnly,
    /// Zero-initialised data. Occupies no bytes in the object.
    Bss,
    /// Auxiliary per-function data (stack object maps, pointer maps).
    ///
    /// Never laid out on its own; materialised on first reference from a
    /// function's auxiliary data list.
    Aux,
}

impl SymKind {
    #[inline]
    pub fn is_text(self) -> bool {
        self == SymKind::Text
    }

    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, SymKind::Data | SymKind::ReadOnly | SymKind::Bss)
    }
}

/// Location of a byte range inside the object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableRef {
    pub offset: usize,
    pub size: usize,
}

impl TableRef {
    pub const fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }
}

/// A reference inside a symbol's contents that must be patched with the
/// final address of `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelocEntry {
    /// Byte offset of the patched field, relative to the start of the symbol.
    pub offset: usize,
    /// Raw kind code, see [`RelocKind`](crate::relocation::RelocKind).
    pub kind: u32,
    /// Name of the referenced symbol.
    pub target: String,
    pub addend: i64,
}

impl RelocEntry {
    pub fn new(offset: usize, kind: u32, target: impl Into<String>, addend: i64) -> Self {
        Self {
            offset,
            kind,
            target: target.into(),
            addend,
        }
    }
}

/// Per-function side tables as recorded by the compiler.
///
/// The pc tables are opaque varint streams; the loader copies them and never
/// rewrites them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FuncMeta {
    /// Size of the argument area in bytes.
    pub args: i32,
    /// Offset of the deferreturn call within the function, 0 if none.
    pub deferreturn: u32,
    pub func_id: u8,
    pub flag: u8,
    /// Source files, indexed by the values of the pc→file table.
    pub files: Vec<String>,
    /// pc → stack pointer delta.
    pub pcsp: TableRef,
    /// pc → index into `files`.
    pub pcfile: TableRef,
    /// pc → source line.
    pub pcline: TableRef,
    /// Additional pc → value tables (unsafe points, stack map indices...).
    pub pcdata: Vec<TableRef>,
    /// Names of auxiliary data symbols. An empty name marks an absent slot.
    pub funcdata: Vec<String>,
}

/// One symbol of a relocatable object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjSymbol {
    pub name: String,
    pub kind: SymKind,
    /// Offset of the symbol's bytes within the object. Ignored for `Bss`.
    pub offset: usize,
    pub size: usize,
    /// Required alignment of the symbol's address, 0 means the loader default.
    pub align: usize,
    pub relocs: Vec<RelocEntry>,
    /// Side tables, present for `Text` symbols.
    pub func: Option<FuncMeta>,
}

impl ObjSymbol {
    pub fn new(name: impl Into<String>, kind: SymKind, offset: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            offset,
            size,
            align: 0,
            relocs: Vec::new(),
            func: None,
        }
    }

    pub fn with_relocs(mut self, relocs: Vec<RelocEntry>) -> Self {
        self.relocs = relocs;
        self
    }

    pub fn with_func(mut self, func: FuncMeta) -> Self {
        self.func = Some(func);
        self
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }
}

/// One relocatable object handed to the loader: a reader for its bytes and
/// the symbols the container parser found in it.
pub struct ObjectInput<'a> {
    pub(crate) reader: Box<dyn ObjectReader + 'a>,
    pub(crate) symbols: Vec<ObjSymbol>,
}

impl<'a> ObjectInput<'a> {
    /// Pairs an object source with its parsed symbol table.
    ///
    /// # Examples
    /// ```rust
    /// use rtlink::input::{ObjSymbol, ObjectBinary, ObjectInput, SymKind};
    ///
    /// let code: &[u8] = &[0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3];
    /// let input = ObjectInput::new(
    ///     ObjectBinary::new("answer.o", code),
    ///     vec![ObjSymbol::new("answer", SymKind::Text, 0, code.len())],
    /// )
    /// .unwrap();
    /// assert_eq!(input.name(), "answer.o");
    /// ```
    pub fn new<I>(source: I, symbols: Vec<ObjSymbol>) -> Result<Self>
    where
        I: IntoObjectReader<'a>,
    {
        Ok(Self {
            reader: Box::new(source.into_reader()?),
            symbols,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.reader.file_name()
    }

    #[inline]
    pub fn symbols(&self) -> &[ObjSymbol] {
        &self.symbols
    }
}

impl core::fmt::Debug for ObjectInput<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectInput")
            .field("name", &self.name())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}
