//! Loaded modules and the per-function view of their metadata
use crate::{
    FastMap, Result,
    error::malformed_error,
    metadata::{
        FileOffset, FindFuncBucket, FuncRecord, FuncTab, ModuleMetadata, PC_BUCKET_SIZE,
        PcTableOffset, TextSect, blob_str, find_func_index, pc_value,
    },
    segment::ModuleMemory,
    symbol::Symbol,
};
use alloc::{format, string::String};
use core::{
    fmt::Debug,
    marker::PhantomData,
    ops::{Deref, Range},
};

#[cfg(not(feature = "portable-atomic"))]
use alloc::sync::Arc;
#[cfg(not(feature = "portable-atomic"))]
use core::sync::atomic::{AtomicUsize, Ordering};
#[cfg(feature = "portable-atomic")]
use portable_atomic::{AtomicUsize, Ordering};
#[cfg(feature = "portable-atomic")]
use portable_atomic_util::Arc;

static NEXT_MODULE_ID: AtomicUsize = AtomicUsize::new(1);

/// Process-unique identity of a loaded module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(usize);

impl ModuleId {
    fn next() -> Self {
        ModuleId(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

/// Everything the host runtime knows about one loaded module: where its
/// code and data live and the metadata describing its functions.
pub struct ModuleData {
    id: ModuleId,
    name: String,
    memory: ModuleMemory,
    meta: ModuleMetadata,
    /// Functions and call stubs.
    text: Range<usize>,
    rodata: Range<usize>,
    data: Range<usize>,
    symbols: FastMap<String, usize>,
}

impl Debug for ModuleData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("memory", &self.memory)
            .field("functions", &self.meta.funcs.len())
            .finish()
    }
}

impl ModuleData {
    pub(crate) fn new(
        name: String,
        memory: ModuleMemory,
        meta: ModuleMetadata,
        text: Range<usize>,
        rodata: Range<usize>,
        data: Range<usize>,
        symbols: FastMap<String, usize>,
    ) -> Self {
        Self {
            id: ModuleId::next(),
            name,
            memory,
            meta,
            text,
            rodata,
            data,
            symbols,
        }
    }

    #[inline]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start of the module's memory region.
    #[inline]
    pub fn base(&self) -> usize {
        self.memory.base()
    }

    #[inline]
    pub fn mapped_len(&self) -> usize {
        self.memory.len()
    }

    /// Whether `addr` lies inside the module's memory region.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.memory.contains(addr)
    }

    /// Executable range: the functions followed by the call stubs.
    #[inline]
    pub fn text(&self) -> Range<usize> {
        self.text.clone()
    }

    #[inline]
    pub fn rodata(&self) -> Range<usize> {
        self.rodata.clone()
    }

    #[inline]
    pub fn data(&self) -> Range<usize> {
        self.data.clone()
    }

    /// Lowest pc belonging to a function.
    #[inline]
    pub fn minpc(&self) -> usize {
        self.meta.minpc
    }

    /// End of the functions (exclusive).
    #[inline]
    pub fn maxpc(&self) -> usize {
        self.meta.maxpc
    }

    /// Address of a symbol placed in this module.
    #[inline]
    pub fn symbol_addr(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&str, usize)> {
        self.symbols.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    /// Gets a pointer to a symbol placed in this module.
    ///
    /// # Safety
    /// Users of this API must specify the correct type of the function or
    /// variable loaded.
    ///
    /// # Examples
    /// ```no_run
    /// # use rtlink::LoadedModule;
    /// # fn run(module: &LoadedModule) {
    /// unsafe {
    ///     let answer = module.get::<extern "C" fn() -> i32>("answer").unwrap();
    ///     assert_eq!(answer(), 42);
    /// }
    /// # }
    /// ```
    #[inline]
    pub unsafe fn get<'lib, T>(&'lib self, name: &str) -> Option<Symbol<'lib, T>> {
        self.symbol_addr(name).map(|addr| Symbol {
            ptr: addr as _,
            pd: PhantomData,
        })
    }

    /// The metadata blob: function names, file names and pc tables.
    #[inline]
    pub fn pclntable(&self) -> &[u8] {
        &self.meta.pclntable
    }

    /// Function table, sorted by entry and ending with the sentinel at
    /// [`maxpc`](Self::maxpc).
    #[inline]
    pub fn ftab(&self) -> &[FuncTab] {
        &self.meta.ftab
    }

    #[inline]
    pub fn filetab(&self) -> &[FileOffset] {
        &self.meta.filetab
    }

    #[inline]
    pub fn findfunctab(&self) -> &[FindFuncBucket] {
        &self.meta.findfunctab
    }

    #[inline]
    pub fn textsects(&self) -> &[TextSect] {
        &self.meta.textsects
    }

    /// Number of functions in the module.
    #[inline]
    pub fn nfuncs(&self) -> usize {
        self.meta.funcs.len()
    }

    /// Translates an offset from the start of the code into an address.
    pub fn text_addr(&self, off: usize) -> Option<usize> {
        self.meta
            .textsects
            .iter()
            .find(|sect| sect.contains_off(off))
            .map(|sect| sect.baseaddr + off - sect.vaddr)
    }

    /// Finds the function containing `pc`.
    pub fn find_func(&self, pc: usize) -> Option<FuncInfo<'_>> {
        find_func_index(
            &self.meta.findfunctab,
            &self.meta.ftab,
            self.meta.minpc,
            self.meta.maxpc,
            pc,
        )
        .map(|index| FuncInfo {
            module: self,
            index,
        })
    }

    /// Functions in address order.
    pub fn funcs(&self) -> impl ExactSizeIterator<Item = FuncInfo<'_>> {
        (0..self.meta.funcs.len()).map(move |index| FuncInfo {
            module: self,
            index,
        })
    }

    /// Looks a function up by name.
    pub fn func(&self, name: &str) -> Option<FuncInfo<'_>> {
        self.funcs().find(|func| func.name() == name)
    }

    /// Checks the module's tables against each other.
    ///
    /// A failing module must never be published: stack walks through it
    /// would read garbage.
    pub fn verify(&self) -> Result<()> {
        let meta = &self.meta;
        let nfunc = meta.funcs.len();
        let blob_len = meta.pclntable.len();
        if meta.ftab.len() != nfunc + 1
            || meta.ftab[nfunc].entry != meta.maxpc
            || meta.ftab[nfunc].funcoff != nfunc
        {
            return Err(malformed_error(format!(
                "module [{}]: function table does not end at 0x{:x}",
                self.name, meta.maxpc
            )));
        }
        if meta.minpc > meta.maxpc || (nfunc > 0 && !self.contains(meta.minpc)) {
            return Err(malformed_error(format!(
                "module [{}]: code range 0x{:x}..0x{:x} lies outside the module",
                self.name, meta.minpc, meta.maxpc
            )));
        }
        for (i, pair) in meta.ftab.windows(2).enumerate() {
            if pair[0].entry > pair[1].entry || pair[0].entry < meta.minpc {
                return Err(malformed_error(format!(
                    "module [{}]: function table out of order at {} (0x{:x} > 0x{:x})",
                    self.name, i, pair[0].entry, pair[1].entry
                )));
            }
        }
        let table_ok = |off: PcTableOffset| off.is_absent() || off.get() < blob_len;
        for (i, record) in meta.funcs.iter().enumerate() {
            let in_bounds = blob_str(&meta.pclntable, record.name_off.get()).is_some()
                && table_ok(record.pcsp)
                && table_ok(record.pcfile)
                && table_ok(record.pcln)
                && record.cu_offset.get() + record.nfiles as usize <= meta.filetab.len()
                && record.pcdata_start as usize + record.npcdata as usize <= meta.pcdata.len()
                && record.funcdata_start as usize + record.nfuncdata as usize
                    <= meta.funcdata.len();
            if !in_bounds {
                return Err(malformed_error(format!(
                    "module [{}]: record of function {} points outside its tables",
                    self.name, i
                )));
            }
        }
        let buckets = (meta.maxpc - meta.minpc).div_ceil(PC_BUCKET_SIZE);
        if meta.findfunctab.len() != buckets {
            return Err(malformed_error(format!(
                "module [{}]: pc index has {} buckets, code needs {}",
                self.name,
                meta.findfunctab.len(),
                buckets
            )));
        }
        Ok(())
    }
}

/// One function of a loaded module.
#[derive(Clone, Copy)]
pub struct FuncInfo<'m> {
    module: &'m ModuleData,
    index: usize,
}

impl Debug for FuncInfo<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FuncInfo")
            .field("name", &self.name())
            .field("entry", &format_args!("0x{:x}", self.entry()))
            .finish()
    }
}

impl<'m> FuncInfo<'m> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn module(&self) -> &'m ModuleData {
        self.module
    }

    #[inline]
    pub fn record(&self) -> &'m FuncRecord {
        &self.module.meta.funcs[self.index]
    }

    #[inline]
    pub fn entry(&self) -> usize {
        self.module.meta.ftab[self.index].entry
    }

    /// Entry of the next function, or the end of the code.
    #[inline]
    pub fn end(&self) -> usize {
        self.module.meta.ftab[self.index + 1].entry
    }

    pub fn name(&self) -> &'m str {
        blob_str(&self.module.meta.pclntable, self.record().name_off.get()).unwrap_or("")
    }

    #[inline]
    pub fn args(&self) -> i32 {
        self.record().args
    }

    /// The function's source files, in pc-file table order.
    pub fn files(&self) -> impl Iterator<Item = &'m str> + 'm {
        let module = self.module;
        let record = self.record();
        let start = record.cu_offset.get();
        module.meta.filetab[start..start + record.nfiles as usize]
            .iter()
            .filter_map(move |off| blob_str(&module.meta.pclntable, off.get()))
    }

    fn table(&self, off: PcTableOffset) -> Option<&'m [u8]> {
        if off.is_absent() {
            return None;
        }
        self.module.meta.pclntable.get(off.get()..)
    }

    fn value(&self, off: PcTableOffset, pc: usize) -> Option<i32> {
        if pc >= self.end() {
            return None;
        }
        pc_value(self.table(off)?, self.entry(), pc)
    }

    /// Stack pointer delta at `pc`.
    pub fn sp_delta(&self, pc: usize) -> Option<i32> {
        self.value(self.record().pcsp, pc)
    }

    /// Source line of `pc`.
    pub fn line(&self, pc: usize) -> Option<i32> {
        self.value(self.record().pcln, pc)
    }

    /// Source file of `pc`.
    pub fn file(&self, pc: usize) -> Option<&'m str> {
        let record = self.record();
        let idx = usize::try_from(self.value(record.pcfile, pc)?).ok()?;
        if idx >= record.nfiles as usize {
            return None;
        }
        let off = self.module.meta.filetab[record.cu_offset.get() + idx];
        blob_str(&self.module.meta.pclntable, off.get())
    }

    /// Value of pc data table `table` at `pc`.
    pub fn pcdata(&self, table: usize, pc: usize) -> Option<i32> {
        let record = self.record();
        if table >= record.npcdata as usize {
            return None;
        }
        let off = self.module.meta.pcdata[record.pcdata_start as usize + table];
        self.value(off, pc)
    }

    /// Address of auxiliary data slot `slot`, `None` if the slot is absent.
    pub fn funcdata(&self, slot: usize) -> Option<usize> {
        let record = self.record();
        if slot >= record.nfuncdata as usize {
            return None;
        }
        let addr = self.module.meta.funcdata[record.funcdata_start as usize + slot];
        (addr != 0).then_some(addr)
    }
}

/// A module that has been loaded and verified but is not yet visible to the
/// host runtime.
///
/// Dropping it without publishing releases its memory.
#[derive(Debug)]
pub struct LoadedModule {
    pub(crate) inner: Arc<ModuleData>,
}

impl Deref for LoadedModule {
    type Target = ModuleData;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A module published in a [`ModuleRegistry`](crate::ModuleRegistry).
///
/// Handles are cheap to clone. The module's memory stays mapped while any
/// handle to it exists, even after it is removed from the registry.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    pub(crate) inner: Arc<ModuleData>,
}

impl ModuleHandle {
    /// Whether both handles refer to the same module.
    #[inline]
    pub fn ptr_eq(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for ModuleHandle {
    type Target = ModuleData;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
