use crate::{
    FastMap, Result,
    input::{ObjectInput, ObjectReader, SymKind},
    layout::Layout,
    metadata::{MIN_FUNC, MetadataBuilder},
    module::{LoadedModule, ModuleData},
    os::{DefaultMmap, Mmap, PAGE_SIZE, ProtFlags, roundup},
    relocation::Relocator,
    segment::ModuleMemory,
    symbol::{SymbolCatalog, SymbolLookup},
};
use alloc::{borrow::ToOwned, boxed::Box, string::String, vec::Vec};
use core::{marker::PhantomData, ops::Range};

#[cfg(not(feature = "portable-atomic"))]
use alloc::sync::Arc;
#[cfg(feature = "portable-atomic")]
use portable_atomic_util::Arc;

/// Context handed to the load hook once the relocated image has been copied
/// into the module's memory and before the code is made executable.
pub struct LoadHookContext<'a> {
    name: &'a str,
    base: usize,
    text: Range<usize>,
}

impl<'a> LoadHookContext<'a> {
    /// Returns the name of the module being loaded.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the start of the module's memory region.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the absolute range of the code about to become executable.
    pub fn text(&self) -> Range<usize> {
        self.text.clone()
    }
}

/// Hook run on every module right before its code is made executable,
/// e.g. to synchronise instruction caches.
///
/// # Examples
/// ```rust
/// use rtlink::{LoadHook, LoadHookContext, Result};
///
/// struct MyHook;
///
/// impl LoadHook for MyHook {
///     fn call(&self, ctx: &LoadHookContext<'_>) -> Result<()> {
///         println!("{} code at {:x?}", ctx.name(), ctx.text());
///         Ok(())
///     }
/// }
/// ```
pub trait LoadHook {
    /// Executes the hook with the provided context.
    fn call(&self, ctx: &LoadHookContext<'_>) -> Result<()>;
}

impl<F> LoadHook for F
where
    F: Fn(&LoadHookContext<'_>) -> Result<()>,
{
    fn call(&self, ctx: &LoadHookContext<'_>) -> Result<()> {
        (self)(ctx)
    }
}

impl LoadHook for () {
    fn call(&self, _ctx: &LoadHookContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// The object loader.
///
/// `Loader` turns a set of relocatable objects into one verified
/// [`LoadedModule`]: it catalogs their symbols, lays out their contents,
/// builds the runtime metadata, maps memory, patches every reference and
/// checks the result. Nothing becomes visible to the host until the module
/// is published in a [`ModuleRegistry`](crate::ModuleRegistry); a failed
/// load leaves no trace.
///
/// # Examples
/// ```no_run
/// use rtlink::{Loader, ModuleRegistry, input::{ObjSymbol, ObjectInput, SymKind}};
///
/// let registry = ModuleRegistry::new();
/// let input = ObjectInput::new(
///     "answer.o",
///     vec![ObjSymbol::new("answer", SymKind::Text, 0x40, 6)],
/// )
/// .unwrap();
/// let module = Loader::new().load([input], &registry).unwrap();
/// registry.publish(module);
/// ```
pub struct Loader<M = DefaultMmap, H = ()>
where
    M: Mmap,
    H: LoadHook,
{
    func_align: usize,
    data_align: usize,
    hook: H,
    _marker: PhantomData<M>,
}

impl Loader<DefaultMmap, ()> {
    /// Creates a new `Loader` with default settings.
    pub fn new() -> Self {
        Self {
            func_align: MIN_FUNC,
            data_align: core::mem::size_of::<usize>(),
            hook: (),
            _marker: PhantomData,
        }
    }
}

impl Default for Loader<DefaultMmap, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Mmap, H: LoadHook> Loader<M, H> {
    /// Sets the alignment of function entries, rounded up to a power of two.
    ///
    /// Alignments below 16 bytes can pack functions densely enough to
    /// overflow the pc index, which fails the load.
    pub fn with_func_align(&mut self, align: usize) -> &mut Self {
        self.func_align = align.max(1).next_power_of_two();
        self
    }

    /// Sets the default alignment of data symbols, rounded up to a power of two.
    pub fn with_data_align(&mut self, align: usize) -> &mut Self {
        self.data_align = align.max(1).next_power_of_two();
        self
    }

    /// Consumes the current loader and returns a new one with the specified hook.
    pub fn with_hook<NewHook: LoadHook>(self, hook: NewHook) -> Loader<M, NewHook> {
        Loader {
            func_align: self.func_align,
            data_align: self.data_align,
            hook,
            _marker: PhantomData,
        }
    }

    /// Returns a new loader with a custom `Mmap` implementation.
    pub fn with_mmap<NewMmap: Mmap>(self) -> Loader<NewMmap, H> {
        Loader {
            func_align: self.func_align,
            data_align: self.data_align,
            hook: self.hook,
            _marker: PhantomData,
        }
    }

    /// Loads `inputs` as one module, resolving external references through
    /// `host`.
    ///
    /// The module is named after the first input.
    pub fn load<'a, I, S>(&self, inputs: I, host: &S) -> Result<LoadedModule>
    where
        I: IntoIterator<Item = ObjectInput<'a>>,
        S: SymbolLookup,
    {
        let mut readers: Vec<Box<dyn ObjectReader + 'a>> = Vec::new();
        let mut tables = Vec::new();
        let mut file_names: Vec<String> = Vec::new();
        for input in inputs {
            file_names.push(input.reader.file_name().to_owned());
            tables.push(input.symbols);
            readers.push(input.reader);
        }
        let name = readers
            .first()
            .map(|reader| reader.shortname().to_owned())
            .unwrap_or_else(|| "<empty>".to_owned());
        #[cfg(feature = "log")]
        log::info!(
            "Loading module [{}] from {} objects",
            name,
            file_names.len()
        );

        let catalog = SymbolCatalog::build(&tables, &file_names, host)?;
        let mut layout = Layout::new(self.func_align, self.data_align);
        let mut meta = MetadataBuilder::new();
        for (file, _, symbol) in catalog.loadable() {
            match symbol.kind {
                SymKind::Aux => {}
                SymKind::Text => {
                    let off = layout.place(file, symbol, &mut *readers[file])?;
                    meta.add_func(file, symbol, off, &catalog, &mut layout, &mut readers)?;
                }
                _ => {
                    layout.place(file, symbol, &mut *readers[file])?;
                }
            }
        }
        layout.place_referenced_aux(&catalog, &mut readers)?;
        let mut image = layout.finish();

        let mut memory = ModuleMemory::map::<M>(image.map_len())?;
        let base = memory.base();
        Relocator::new(&mut image, &catalog, base).relocate()?;
        memory.write(&image.bytes);

        let text = base + image.text.start..base + image.stubs.end;
        self.hook.call(&LoadHookContext {
            name: &name,
            base,
            text: text.clone(),
        })?;
        memory.protect(0..image.exec_end(), ProtFlags::PROT_READ | ProtFlags::PROT_EXEC)?;
        memory.protect(
            image.rodata.start..roundup(image.rodata.end, PAGE_SIZE),
            ProtFlags::PROT_READ,
        )?;

        let metadata = meta.finish(&image, base)?;
        let symbols: FastMap<String, usize> = image
            .exports()
            .map(|(name, off)| (name.to_owned(), base + off))
            .collect();
        let module = ModuleData::new(
            name,
            memory,
            metadata,
            text,
            base + image.rodata.start..base + image.rodata.end,
            base + image.data.start..base + image.data.end,
            symbols,
        );
        module.verify()?;
        #[cfg(feature = "log")]
        log::info!(
            "Loaded module [{}] at [0x{:x}], {} functions",
            module.name(),
            base,
            module.nfuncs()
        );
        Ok(LoadedModule {
            inner: Arc::new(module),
        })
    }
}
