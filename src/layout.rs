//! Placement of symbol contents in the module image
//!
//! Every loadable symbol gets its final offset before a single reference is
//! patched, so the relocation pass never has to wait for a target to be
//! placed. The image groups contents by protection the same way the mapped
//! region will:
//!
//! ```text
//! | functions | call stubs |pad| read-only data, aux blobs |pad| data, bss |
//! ```
//!
//! Each group starts on a page boundary so it can be protected separately.

use crate::{
    FastMap, FastSet, Result,
    arch::TEXT_PAD,
    error::malformed_error,
    input::{ObjSymbol, ObjectReader, SymKind},
    os::{PAGE_SIZE, roundup},
    relocation::{CALL_STUB_SIZE, RelocKind},
    symbol::{Resolved, SymbolCatalog},
};
use alloc::{boxed::Box, format, vec, vec::Vec};
use core::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Section {
    Text,
    ReadOnly,
    Data,
}

impl Section {
    pub(crate) fn of(kind: SymKind) -> Self {
        match kind {
            SymKind::Text => Section::Text,
            SymKind::ReadOnly | SymKind::Aux => Section::ReadOnly,
            SymKind::Data | SymKind::Bss => Section::Data,
        }
    }
}

/// Where one symbol's contents ended up.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Placement<'a> {
    pub(crate) symbol: &'a ObjSymbol,
    pub(crate) file: usize,
    pub(crate) section: Section,
    /// Offset within the section while laying out, within the image after
    /// [`Layout::finish`].
    pub(crate) offset: usize,
}

/// Code contributed by one input object.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TextRun {
    pub(crate) file: usize,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

pub(crate) struct Layout<'a> {
    func_align: usize,
    data_align: usize,
    text: Vec<u8>,
    rodata: Vec<u8>,
    data: Vec<u8>,
    placed: Vec<Placement<'a>>,
    by_name: FastMap<&'a str, usize>,
    text_runs: Vec<TextRun>,
}

impl<'a> Layout<'a> {
    pub(crate) fn new(func_align: usize, data_align: usize) -> Self {
        Self {
            func_align: func_align.max(1),
            data_align: data_align.max(1),
            text: Vec::new(),
            rodata: Vec::new(),
            data: Vec::new(),
            placed: Vec::new(),
            by_name: FastMap::default(),
            text_runs: Vec::new(),
        }
    }

    /// Copies `symbol`'s contents into its section and returns its offset
    /// there. Placing a symbol twice returns the first offset.
    pub(crate) fn place<R: ObjectReader + ?Sized>(
        &mut self,
        file: usize,
        symbol: &'a ObjSymbol,
        reader: &mut R,
    ) -> Result<usize> {
        if let Some(&idx) = self.by_name.get(symbol.name.as_str()) {
            return Ok(self.placed[idx].offset);
        }
        if symbol.align != 0 && !symbol.align.is_power_of_two() {
            return Err(malformed_error(format!(
                "[{}] asks for alignment {}, which is not a power of two",
                symbol.name, symbol.align
            )));
        }
        if symbol.kind != SymKind::Bss {
            reader.check_range(symbol.offset, symbol.size)?;
        }
        let section = Section::of(symbol.kind);
        let (buf, fill, align) = match section {
            Section::Text => (&mut self.text, TEXT_PAD, self.func_align),
            Section::ReadOnly => (&mut self.rodata, 0, self.data_align),
            Section::Data => (&mut self.data, 0, self.data_align),
        };
        let too_large = || malformed_error(format!("[{}] does not fit in the module", symbol.name));
        let offset = buf
            .len()
            .checked_next_multiple_of(align.max(symbol.align))
            .ok_or_else(too_large)?;
        let end = offset.checked_add(symbol.size).ok_or_else(too_large)?;
        buf.try_reserve(end - buf.len()).map_err(|_| too_large())?;
        buf.resize(offset, fill);
        buf.resize(end, 0);
        if symbol.kind != SymKind::Bss {
            reader.read(&mut buf[offset..], symbol.offset)?;
        }
        if section == Section::Text {
            match self.text_runs.last_mut() {
                Some(run) if run.file == file => run.end = end,
                _ => self.text_runs.push(TextRun {
                    file,
                    start: offset,
                    end,
                }),
            }
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[Layout] [{}] {:?} at 0x{:x}, size 0x{:x}",
            symbol.name,
            section,
            offset,
            symbol.size
        );
        self.by_name.insert(symbol.name.as_str(), self.placed.len());
        self.placed.push(Placement {
            symbol,
            file,
            section,
            offset,
        });
        Ok(offset)
    }

    /// Places the auxiliary blobs that placed contents reference directly,
    /// including blobs referenced only by other blobs.
    pub(crate) fn place_referenced_aux(
        &mut self,
        catalog: &SymbolCatalog<'a>,
        readers: &mut [Box<dyn ObjectReader + '_>],
    ) -> Result<()> {
        let mut idx = 0;
        while idx < self.placed.len() {
            let symbol = self.placed[idx].symbol;
            for rel in &symbol.relocs {
                if self.by_name.contains_key(rel.target.as_str()) {
                    continue;
                }
                if let Ok(Resolved::File { file, symbol, .. }) = catalog.resolve(&rel.target) {
                    if symbol.kind == SymKind::Aux {
                        self.place(file, symbol, &mut *readers[file])?;
                    }
                }
            }
            idx += 1;
        }
        Ok(())
    }

    /// Bytes of code laid out so far.
    #[inline]
    pub(crate) fn text_len(&self) -> usize {
        self.text.len()
    }

    /// Calls whose target lives outside the module may need a stub each.
    fn stub_demand(&self) -> usize {
        let mut targets: FastSet<(&str, u32)> = FastSet::default();
        for placement in &self.placed {
            for rel in &placement.symbol.relocs {
                let is_call = matches!(
                    RelocKind::from_raw(rel.kind),
                    Some(RelocKind::CallRel32 | RelocKind::Call26)
                );
                if is_call && !self.by_name.contains_key(rel.target.as_str()) {
                    targets.insert((rel.target.as_str(), rel.kind));
                }
            }
        }
        targets.len()
    }

    /// Fixes the section bases and assembles the image.
    pub(crate) fn finish(self) -> Image<'a> {
        let text = 0..self.text.len();
        let demand = self.stub_demand();
        let stub_start = match demand {
            0 => text.end,
            _ => roundup(text.end, CALL_STUB_SIZE),
        };
        let stubs = stub_start..stub_start + demand * CALL_STUB_SIZE;
        let ro_start = roundup(stubs.end, PAGE_SIZE);
        let rodata = ro_start..ro_start + self.rodata.len();
        let data_start = roundup(rodata.end, PAGE_SIZE);
        let data = data_start..data_start + self.data.len();

        let mut bytes = vec![0u8; data.end];
        bytes[text.clone()].copy_from_slice(&self.text);
        bytes[text.end..stubs.end].fill(TEXT_PAD);
        bytes[rodata.clone()].copy_from_slice(&self.rodata);
        bytes[data.clone()].copy_from_slice(&self.data);

        let mut placed = self.placed;
        for placement in &mut placed {
            placement.offset += match placement.section {
                Section::Text => text.start,
                Section::ReadOnly => rodata.start,
                Section::Data => data.start,
            };
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Layout] text 0x{:x}, stubs 0x{:x}, rodata 0x{:x}, data 0x{:x}",
            text.len(),
            stubs.len(),
            rodata.len(),
            data.len()
        );
        Image {
            bytes,
            text,
            stubs,
            rodata,
            data,
            placed,
            by_name: self.by_name,
            text_runs: self.text_runs,
        }
    }
}

/// The module's contents, laid out and ready to be relocated.
pub(crate) struct Image<'a> {
    pub(crate) bytes: Vec<u8>,
    pub(crate) text: Range<usize>,
    pub(crate) stubs: Range<usize>,
    pub(crate) rodata: Range<usize>,
    pub(crate) data: Range<usize>,
    pub(crate) placed: Vec<Placement<'a>>,
    by_name: FastMap<&'a str, usize>,
    pub(crate) text_runs: Vec<TextRun>,
}

impl<'a> Image<'a> {
    /// Image offset of a placed symbol.
    #[inline]
    pub(crate) fn offset_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).map(|idx| self.placed[*idx].offset)
    }

    /// Bytes to map, never zero.
    #[inline]
    pub(crate) fn map_len(&self) -> usize {
        roundup(self.bytes.len(), PAGE_SIZE).max(PAGE_SIZE)
    }

    /// Page-rounded end of the executable part.
    #[inline]
    pub(crate) fn exec_end(&self) -> usize {
        roundup(self.stubs.end, PAGE_SIZE)
    }

    /// Exported names and their image offsets.
    pub(crate) fn exports(&self) -> impl Iterator<Item = (&'a str, usize)> + '_ {
        self.placed
            .iter()
            .filter(|p| p.symbol.kind != SymKind::Aux)
            .map(|p| (p.symbol.name.as_str(), p.offset))
    }
}
