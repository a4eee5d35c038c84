use super::{
    BLOB_HEADER, FileIndex, FileOffset, FindFuncBucket, FuncRecord, FuncTab, PcIndexBuilder,
    PcTableOffset, StringOffset, TextSect,
};
use crate::{
    Error, FastMap, Result,
    error::malformed_error,
    input::{ObjSymbol, ObjectReader, SymKind, TableRef},
    layout::{Image, Layout},
    symbol::{Resolved, SymbolCatalog},
};
use alloc::{borrow::ToOwned, boxed::Box, format, vec::Vec};

/// Where a function's auxiliary data slot points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AuxSlot<'a> {
    Absent,
    /// Provided by the host at this address.
    Resident(usize),
    /// Placed in this module under this name.
    Local(&'a str),
}

/// Collects the runtime metadata while functions are laid out.
pub(crate) struct MetadataBuilder<'a> {
    blob: Vec<u8>,
    files: FastMap<&'a str, FileOffset>,
    filetab: Vec<FileOffset>,
    funcs: Vec<FuncRecord>,
    pcdata: Vec<PcTableOffset>,
    funcdata: Vec<AuxSlot<'a>>,
    /// Auxiliary objects already resolved, by name.
    aux: FastMap<&'a str, AuxSlot<'a>>,
    pcindex: PcIndexBuilder,
}

/// The finished metadata, with absolute addresses filled in.
pub(crate) struct ModuleMetadata {
    pub(crate) pclntable: Vec<u8>,
    pub(crate) filetab: Vec<FileOffset>,
    pub(crate) funcs: Vec<FuncRecord>,
    pub(crate) ftab: Vec<FuncTab>,
    pub(crate) pcdata: Vec<PcTableOffset>,
    pub(crate) funcdata: Vec<usize>,
    pub(crate) findfunctab: Vec<FindFuncBucket>,
    pub(crate) textsects: Vec<TextSect>,
    pub(crate) minpc: usize,
    pub(crate) maxpc: usize,
}

fn narrow(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error(format!("{what} 0x{value:x} exceeds 32 bits")))
}

impl<'a> MetadataBuilder<'a> {
    pub(crate) fn new() -> Self {
        Self {
            blob: BLOB_HEADER.to_vec(),
            files: FastMap::default(),
            filetab: Vec::new(),
            funcs: Vec::new(),
            pcdata: Vec::new(),
            funcdata: Vec::new(),
            aux: FastMap::default(),
            pcindex: PcIndexBuilder::new(),
        }
    }

    fn push_str(&mut self, s: &str) -> Result<u32> {
        let off = narrow(self.blob.len(), "metadata offset")?;
        self.blob.extend_from_slice(s.as_bytes());
        self.blob.push(0);
        Ok(off)
    }

    /// Copies a pc table out of the object verbatim.
    fn copy_table<R: ObjectReader + ?Sized>(&mut self, reader: &mut R, table: TableRef) -> Result<PcTableOffset> {
        if table.size == 0 {
            return Ok(PcTableOffset::ABSENT);
        }
        reader.check_range(table.offset, table.size)?;
        let off = self.blob.len();
        let end = off
            .checked_add(table.size)
            .ok_or_else(|| malformed_error("metadata blob overflows"))?;
        narrow(end, "metadata offset")?;
        self.blob.resize(end, 0);
        reader.read(&mut self.blob[off..], table.offset)?;
        Ok(PcTableOffset(off as u32))
    }

    /// Interns a file name, returning the offset of its only copy.
    fn intern_file(&mut self, name: &'a str) -> Result<FileOffset> {
        if let Some(off) = self.files.get(name) {
            return Ok(*off);
        }
        let off = FileOffset(self.push_str(name)?);
        self.files.insert(name, off);
        Ok(off)
    }

    /// Resolves one auxiliary data slot of `func`, materialising the object
    /// on its first use.
    fn resolve_aux(
        &mut self,
        func: &str,
        name: &'a str,
        catalog: &SymbolCatalog<'a>,
        layout: &mut Layout<'a>,
        readers: &mut [Box<dyn ObjectReader + '_>],
    ) -> Result<AuxSlot<'a>> {
        if name.is_empty() {
            return Ok(AuxSlot::Absent);
        }
        if let Some(slot) = self.aux.get(name) {
            return Ok(*slot);
        }
        let slot = match catalog.resolve(name) {
            Ok(Resolved::Resident(addr)) => AuxSlot::Resident(addr),
            Ok(Resolved::File { file, symbol, .. }) => {
                if symbol.kind == SymKind::Aux {
                    layout.place(file, symbol, &mut *readers[file])?;
                    #[cfg(feature = "log")]
                    log::trace!("[Metadata] materialized [{}] for [{}]", name, func);
                }
                AuxSlot::Local(name)
            }
            Err(_) => {
                return Err(Error::UnknownAuxiliaryObject {
                    name: name.to_owned().into(),
                    func: func.to_owned().into(),
                });
            }
        };
        self.aux.insert(name, slot);
        Ok(slot)
    }

    /// Records a function just placed `code_off` bytes into the code region.
    pub(crate) fn add_func(
        &mut self,
        file: usize,
        symbol: &'a ObjSymbol,
        code_off: usize,
        catalog: &SymbolCatalog<'a>,
        layout: &mut Layout<'a>,
        readers: &mut [Box<dyn ObjectReader + '_>],
    ) -> Result<()> {
        self.pcindex.add_func(code_off)?;
        let mut record = FuncRecord {
            entry_off: narrow(code_off, "code offset")?,
            name_off: StringOffset(self.push_str(&symbol.name)?),
            cu_offset: FileIndex(narrow(self.filetab.len(), "file index")?),
            pcdata_start: narrow(self.pcdata.len(), "pcdata index")?,
            funcdata_start: narrow(self.funcdata.len(), "funcdata index")?,
            ..Default::default()
        };
        if let Some(meta) = &symbol.func {
            record.args = meta.args;
            record.deferreturn = meta.deferreturn;
            record.func_id = meta.func_id;
            record.flag = meta.flag;
            for name in &meta.files {
                let off = self.intern_file(name)?;
                self.filetab.push(off);
            }
            record.nfiles = meta.files.len() as u32;
            let reader = &mut *readers[file];
            record.pcsp = self.copy_table(reader, meta.pcsp)?;
            record.pcfile = self.copy_table(reader, meta.pcfile)?;
            record.pcln = self.copy_table(reader, meta.pcline)?;
            for table in &meta.pcdata {
                let off = self.copy_table(reader, *table)?;
                self.pcdata.push(off);
            }
            record.npcdata = meta.pcdata.len() as u32;
            record.nfuncdata = u8::try_from(meta.funcdata.len()).map_err(|_| {
                malformed_error(format!("[{}] has too many auxiliary slots", symbol.name))
            })?;
            for name in &meta.funcdata {
                let slot = self.resolve_aux(&symbol.name, name, catalog, layout, readers)?;
                self.funcdata.push(slot);
            }
        }
        self.funcs.push(record);
        Ok(())
    }

    /// Fills in absolute addresses once the image is placed at `base`.
    pub(crate) fn finish(self, image: &Image<'a>, base: usize) -> Result<ModuleMetadata> {
        let findfunctab = self.pcindex.finish(image.text.len())?;
        let minpc = base + image.text.start;
        let maxpc = base + image.text.end;
        let mut ftab: Vec<FuncTab> = self
            .funcs
            .iter()
            .enumerate()
            .map(|(funcoff, record)| FuncTab {
                entry: minpc + record.entry_off as usize,
                funcoff,
            })
            .collect();
        ftab.push(FuncTab {
            entry: maxpc,
            funcoff: self.funcs.len(),
        });
        let funcdata = self
            .funcdata
            .iter()
            .map(|slot| match slot {
                AuxSlot::Absent => Ok(0),
                AuxSlot::Resident(addr) => Ok(*addr),
                AuxSlot::Local(name) => image
                    .offset_of(name)
                    .map(|off| base + off)
                    .ok_or_else(|| malformed_error(format!("auxiliary object [{name}] was never placed"))),
            })
            .collect::<Result<Vec<_>>>()?;
        let textsects = image
            .text_runs
            .iter()
            .map(|run| TextSect {
                vaddr: run.start,
                length: run.end - run.start,
                baseaddr: minpc + run.start,
            })
            .collect();
        #[cfg(feature = "log")]
        log::debug!(
            "[Metadata] {} functions, {} files, metadata blob 0x{:x} bytes",
            self.funcs.len(),
            self.files.len(),
            self.blob.len()
        );
        Ok(ModuleMetadata {
            pclntable: self.blob,
            filetab: self.filetab,
            funcs: self.funcs,
            ftab,
            pcdata: self.pcdata,
            funcdata,
            findfunctab,
            textsects,
            minpc,
            maxpc,
        })
    }
}
