#![allow(dead_code)]

use rtlink::{
    input::{FuncMeta, ObjSymbol, ObjectBinary, ObjectInput, RelocEntry, SymKind, TableRef},
    metadata::PcTableEncoder,
    relocation::RelocKind,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Assembles an in-memory object the way a container parser would describe it.
pub struct ObjBuilder {
    name: String,
    bytes: Vec<u8>,
    symbols: Vec<ObjSymbol>,
}

impl ObjBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            // Nothing lives at offset 0, like a real container header.
            bytes: vec![0x7f; 16],
            symbols: Vec::new(),
        }
    }

    /// Appends raw bytes to the object and returns where they went.
    pub fn blob(&mut self, data: &[u8]) -> TableRef {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(data);
        TableRef::new(offset, data.len())
    }

    pub fn symbol(&mut self, name: &str, kind: SymKind, contents: &[u8], relocs: Vec<RelocEntry>) -> &mut Self {
        let at = self.blob(contents);
        self.symbols
            .push(ObjSymbol::new(name, kind, at.offset, at.size).with_relocs(relocs));
        self
    }

    pub fn text(&mut self, name: &str, code: &[u8], relocs: Vec<RelocEntry>) -> &mut Self {
        self.symbol(name, SymKind::Text, code, relocs)
    }

    /// A function with side tables. `tables` are the pcsp, pcfile and pcline
    /// tables, already encoded.
    pub fn func(
        &mut self,
        name: &str,
        code: &[u8],
        relocs: Vec<RelocEntry>,
        files: &[&str],
        tables: [Vec<u8>; 3],
        funcdata: &[&str],
    ) -> &mut Self {
        let [pcsp, pcfile, pcline] = tables;
        let meta = FuncMeta {
            args: 16,
            files: files.iter().map(|f| f.to_string()).collect(),
            pcsp: self.blob(&pcsp),
            pcfile: self.blob(&pcfile),
            pcline: self.blob(&pcline),
            funcdata: funcdata.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        };
        let at = self.blob(code);
        self.symbols.push(
            ObjSymbol::new(name, SymKind::Text, at.offset, at.size)
                .with_relocs(relocs)
                .with_func(meta),
        );
        self
    }

    pub fn data(&mut self, name: &str, contents: &[u8], relocs: Vec<RelocEntry>) -> &mut Self {
        self.symbol(name, SymKind::Data, contents, relocs)
    }

    pub fn aux(&mut self, name: &str, contents: &[u8]) -> &mut Self {
        self.symbol(name, SymKind::Aux, contents, Vec::new())
    }

    pub fn bss(&mut self, name: &str, size: usize) -> &mut Self {
        self.symbols.push(ObjSymbol::new(name, SymKind::Bss, 0, size));
        self
    }

    /// Pushes a symbol as is, for malformed descriptions.
    pub fn raw(&mut self, symbol: ObjSymbol) -> &mut Self {
        self.symbols.push(symbol);
        self
    }

    pub fn build(&mut self) -> ObjectInput<'static> {
        let bytes = std::mem::take(&mut self.bytes);
        let symbols = std::mem::take(&mut self.symbols);
        ObjectInput::new(ObjectBinary::new(&self.name, bytes), symbols).unwrap()
    }
}

pub fn reloc(offset: usize, kind: RelocKind, target: &str, addend: i64) -> RelocEntry {
    RelocEntry::new(offset, kind as u32, target, addend)
}

/// A table holding `value` over `len` bytes.
pub fn flat_table(len: usize, value: i32) -> Vec<u8> {
    let mut enc = PcTableEncoder::new();
    enc.push(len, value);
    enc.finish()
}

/// Code of `len` bytes that is never executed.
pub fn filler(len: usize) -> Vec<u8> {
    vec![0xc3; len]
}

pub unsafe fn read_u64(addr: usize) -> u64 {
    unsafe { (addr as *const u64).read_unaligned() }
}

pub unsafe fn read_u32(addr: usize) -> u32 {
    unsafe { (addr as *const u32).read_unaligned() }
}

pub unsafe fn read_bytes<'a>(addr: usize, len: usize) -> &'a [u8] {
    unsafe { std::slice::from_raw_parts(addr as *const u8, len) }
}
