//! Symbol catalog and resident symbol lookup
//!
//! The catalog flattens the symbol tables of every object taking part in one
//! load, keyed by name, so the later stages resolve references by name alone.
//! Names the host process already defines shadow the copies in the objects:
//! new code is linked against the resident definition and the object's copy
//! is never loaded.

use crate::{Error, FastMap, Result, input::ObjSymbol};
use alloc::{borrow::ToOwned, string::String, vec::Vec};
use core::{marker::PhantomData, ops::Deref};

#[cfg(not(feature = "portable-atomic"))]
use alloc::sync::Arc;
#[cfg(feature = "portable-atomic")]
use portable_atomic_util::Arc;

/// A trait for looking up symbols already resident in the host process.
///
/// # Examples
///
/// Using a closure for simple lookups:
/// ```rust
/// use rtlink::SymbolLookup;
///
/// let lookup = |name: &str| match name {
///     "malloc" => Some(0x1234 as *const ()),
///     _ => None,
/// };
/// assert!(lookup.lookup("malloc").is_some());
/// ```
pub trait SymbolLookup {
    /// Finds the address of a symbol by its name.
    fn lookup(&self, name: &str) -> Option<*const ()>;
}

impl<F: ?Sized> SymbolLookup for F
where
    F: Fn(&str) -> Option<*const ()>,
{
    fn lookup(&self, name: &str) -> Option<*const ()> {
        self(name)
    }
}

impl<S: SymbolLookup + ?Sized> SymbolLookup for Arc<S> {
    fn lookup(&self, name: &str) -> Option<*const ()> {
        (**self).lookup(name)
    }
}

impl SymbolLookup for () {
    fn lookup(&self, _name: &str) -> Option<*const ()> {
        None
    }
}

/// A name → address table of symbols the host exports to loaded code.
#[derive(Debug, Clone, Default)]
pub struct ResidentSymbols {
    map: FastMap<String, usize>,
}

impl ResidentSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `addr` under `name`, replacing any previous export.
    pub fn insert(&mut self, name: &str, addr: usize) -> Option<usize> {
        self.map.insert(name.to_owned(), addr)
    }

    pub fn with(mut self, name: &str, addr: usize) -> Self {
        self.insert(name, addr);
        self
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl SymbolLookup for ResidentSymbols {
    fn lookup(&self, name: &str) -> Option<*const ()> {
        self.map.get(name).map(|addr| *addr as *const ())
    }
}

/// Where a catalog name is defined.
#[derive(Clone, Copy, Debug)]
pub enum Resolved<'a> {
    /// Already present in the host process at this address.
    Resident(usize),
    /// Defined by input object `file`.
    File {
        file: usize,
        index: usize,
        symbol: &'a ObjSymbol,
    },
}

#[derive(Clone, Copy, Debug)]
struct CatalogEntry {
    file: usize,
    index: usize,
    /// Set when the host already defines the name.
    resident: Option<usize>,
}

/// Every symbol visible to one load operation, keyed by name.
///
/// The catalog is built once, before any layout or relocation happens, and is
/// never mutated afterwards.
pub struct SymbolCatalog<'a> {
    tables: &'a [Vec<ObjSymbol>],
    file_names: &'a [String],
    entries: FastMap<&'a str, CatalogEntry>,
    host: &'a dyn SymbolLookup,
}

impl<'a> SymbolCatalog<'a> {
    /// Scans every object's symbol table and merges in the host's view.
    ///
    /// Two objects defining the same name is an error; an object defining a
    /// name the host already has is not.
    pub fn build(
        tables: &'a [Vec<ObjSymbol>],
        file_names: &'a [String],
        host: &'a dyn SymbolLookup,
    ) -> Result<Self> {
        let count = tables.iter().map(Vec::len).sum();
        let mut entries: FastMap<&'a str, CatalogEntry> = FastMap::default();
        entries.reserve(count);
        for (file, table) in tables.iter().enumerate() {
            for (index, symbol) in table.iter().enumerate() {
                if let Some(prev) = entries.get(symbol.name.as_str()) {
                    return Err(Error::DuplicateSymbol {
                        name: symbol.name.clone().into(),
                        first: file_names[prev.file].clone().into(),
                        second: file_names[file].clone().into(),
                    });
                }
                let resident = host.lookup(&symbol.name).map(|addr| addr as usize);
                #[cfg(feature = "log")]
                if resident.is_some() {
                    log::trace!(
                        "[Catalog] symbol [{}] from [{}] is resident, using host definition",
                        symbol.name,
                        file_names[file]
                    );
                }
                entries.insert(
                    symbol.name.as_str(),
                    CatalogEntry {
                        file,
                        index,
                        resident,
                    },
                );
            }
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Catalog] {} symbols from {} objects, {} shadowed by the host",
            entries.len(),
            tables.len(),
            entries.values().filter(|e| e.resident.is_some()).count()
        );
        Ok(Self {
            tables,
            file_names,
            entries,
            host,
        })
    }

    /// Resolves a name to its resident address or its defining object.
    pub fn resolve(&self, name: &str) -> Result<Resolved<'a>> {
        if let Some(entry) = self.entries.get(name) {
            if let Some(addr) = entry.resident {
                return Ok(Resolved::Resident(addr));
            }
            return Ok(Resolved::File {
                file: entry.file,
                index: entry.index,
                symbol: &self.tables[entry.file][entry.index],
            });
        }
        self.host
            .lookup(name)
            .map(|addr| Resolved::Resident(addr as usize))
            .ok_or_else(|| Error::UnknownSymbol {
                name: name.to_owned().into(),
            })
    }

    /// Resolves a name only if the host defines it.
    pub fn resident(&self, name: &str) -> Option<usize> {
        match self.resolve(name) {
            Ok(Resolved::Resident(addr)) => Some(addr),
            _ => None,
        }
    }

    /// Symbols that will be copied into the new module, in load order:
    /// objects in input order, symbols in table order.
    pub fn loadable(&self) -> impl Iterator<Item = (usize, usize, &'a ObjSymbol)> + '_ {
        self.tables
            .iter()
            .enumerate()
            .flat_map(|(file, table)| {
                table
                    .iter()
                    .enumerate()
                    .map(move |(index, symbol)| (file, index, symbol))
            })
            .filter(|(_, _, symbol)| {
                self.entries
                    .get(symbol.name.as_str())
                    .is_some_and(|entry| entry.resident.is_none())
            })
    }

    #[inline]
    pub fn file_name(&self, file: usize) -> &'a str {
        &self.file_names[file]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A typed symbol retrieved from a loaded module.
///
/// `Symbol` carries a lifetime marker `'lib` so it cannot outlive the module
/// it was taken from.
#[derive(Debug, Clone)]
pub struct Symbol<'lib, T: 'lib> {
    pub(crate) ptr: *mut (),
    pub(crate) pd: PhantomData<&'lib T>,
}

impl<'lib, T> Deref for Symbol<'lib, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*(&self.ptr as *const *mut _ as *const T) }
    }
}

impl<'lib, T> Symbol<'lib, T> {
    /// Consumes the `Symbol` and returns its raw memory address.
    pub fn into_raw(self) -> *const () {
        self.ptr
    }
}

unsafe impl<T: Send> Send for Symbol<'_, T> {}
unsafe impl<T: Sync> Sync for Symbol<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SymKind;
    use alloc::{string::ToString, vec};

    fn tables() -> (Vec<Vec<ObjSymbol>>, Vec<String>) {
        let a = vec![
            ObjSymbol::new("main.f", SymKind::Text, 0, 8),
            ObjSymbol::new("runtime.memmove", SymKind::Text, 8, 8),
        ];
        let b = vec![ObjSymbol::new("main.g", SymKind::Text, 0, 8)];
        (vec![a, b], vec!["a.o".to_string(), "b.o".to_string()])
    }

    #[test]
    fn resident_names_shadow_object_copies() {
        let (tables, names) = tables();
        let host = ResidentSymbols::new().with("runtime.memmove", 0x4000);
        let catalog = SymbolCatalog::build(&tables, &names, &host).unwrap();
        assert!(matches!(
            catalog.resolve("runtime.memmove").unwrap(),
            Resolved::Resident(0x4000)
        ));
        assert!(matches!(
            catalog.resolve("main.g").unwrap(),
            Resolved::File { file: 1, index: 0, .. }
        ));
        let loadable: Vec<_> = catalog.loadable().map(|(_, _, s)| s.name.as_str()).collect();
        assert_eq!(loadable, ["main.f", "main.g"]);
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let (mut tables, names) = tables();
        tables[1].push(ObjSymbol::new("main.f", SymKind::Data, 8, 8));
        let err = SymbolCatalog::build(&tables, &names, &()).err().unwrap();
        assert!(matches!(err, Error::DuplicateSymbol { .. }));
    }

    #[test]
    fn unknown_names_fail() {
        let (tables, names) = tables();
        let catalog = SymbolCatalog::build(&tables, &names, &()).unwrap();
        assert!(matches!(
            catalog.resolve("nope"),
            Err(Error::UnknownSymbol { .. })
        ));
    }
}
