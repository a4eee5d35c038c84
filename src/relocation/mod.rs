//! Reference patching
//!
//! Every placed symbol carries the references its contents make. Once the
//! module's base address is known, each one is resolved (placed symbols
//! first, then whatever the host already has) and the resolved value is
//! encoded into the field at the reference's offset.

mod stub;
mod value;

pub use value::RelocValue;

use crate::{
    Error, Result,
    arch::{aarch64, x86_64},
    error::{malformed_error, relocate_error, unresolved_error},
    layout::{Image, Placement},
    symbol::{Resolved, SymbolCatalog},
};
use alloc::{borrow::ToOwned, format};
use stub::{StubEntry, StubTable};

/// Size of a call stub for either call encoding.
pub(crate) const CALL_STUB_SIZE: usize = 16;

const _: () = assert!(x86_64::CALL_STUB_SIZE == CALL_STUB_SIZE);
const _: () = assert!(aarch64::CALL_STUB_SIZE == CALL_STUB_SIZE);

/// How a reference is encoded into its field.
///
/// `S` is the target's address, `A` the addend, `P` the address of the
/// patched field and `B` the module's base address.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// 64-bit absolute address: `S + A`.
    Abs64 = 1,
    /// 32-bit absolute address: `S + A`, must fit in 32 bits.
    Abs32 = 2,
    /// 32-bit pc-relative displacement: `S + A - P`.
    PcRel32 = 3,
    /// Operand of an x86-64 `call rel32`. Routed through a stub when the
    /// displacement does not fit.
    CallRel32 = 4,
    /// Immediate of an AArch64 `bl`. Routed through a stub when the target
    /// is out of reach.
    Call26 = 5,
    /// 32-bit offset from the module base: `S + A - B`.
    ModuleOff32 = 6,
}

impl RelocKind {
    /// Decodes a raw kind code.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => RelocKind::Abs64,
            2 => RelocKind::Abs32,
            3 => RelocKind::PcRel32,
            4 => RelocKind::CallRel32,
            5 => RelocKind::Call26,
            6 => RelocKind::ModuleOff32,
            _ => return None,
        })
    }

    /// Width of the patched field in bytes.
    pub const fn field_size(self) -> usize {
        match self {
            RelocKind::Abs64 => 8,
            _ => 4,
        }
    }
}

impl From<RelocKind> for u32 {
    fn from(kind: RelocKind) -> Self {
        kind as u32
    }
}

/// Patches all references of a laid-out image for a given base address.
pub(crate) struct Relocator<'i, 'a> {
    image: &'i mut Image<'a>,
    catalog: &'i SymbolCatalog<'a>,
    base: usize,
    stubs: StubTable<'a>,
}

impl<'i, 'a> Relocator<'i, 'a> {
    pub(crate) fn new(image: &'i mut Image<'a>, catalog: &'i SymbolCatalog<'a>, base: usize) -> Self {
        let stubs = StubTable::new(image.stubs.clone());
        Self {
            image,
            catalog,
            base,
            stubs,
        }
    }

    pub(crate) fn relocate(mut self) -> Result<()> {
        for idx in 0..self.image.placed.len() {
            let placement = self.image.placed[idx];
            for rel in &placement.symbol.relocs {
                self.apply(&placement, rel)?;
            }
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Relocation] {} references patched, {} call stubs",
            self.image
                .placed
                .iter()
                .map(|placement| placement.symbol.relocs.len())
                .sum::<usize>(),
            self.stubs.used()
        );
        Ok(())
    }

    fn resolve(&self, name: &str, referrer: &str) -> Result<RelocValue<usize>> {
        if let Some(off) = self.image.offset_of(name) {
            #[cfg(feature = "log")]
            log::trace!(
                "binding symbol [{}] referenced by [{}] to this module at [0x{:x}]",
                name,
                referrer,
                self.base + off
            );
            return Ok(RelocValue::new(self.base + off));
        }
        match self.catalog.resolve(name) {
            Ok(Resolved::Resident(addr)) => {
                #[cfg(feature = "log")]
                log::trace!(
                    "binding symbol [{}] referenced by [{}] to the host at [0x{:x}]",
                    name,
                    referrer,
                    addr
                );
                Ok(RelocValue::new(addr))
            }
            _ => Err(unresolved_error(name.to_owned(), referrer.to_owned())),
        }
    }

    /// Returns the address of the stub jumping to `target`, writing it first
    /// if needed.
    fn stub(&mut self, name: &'a str, kind: RelocKind, target: RelocValue<usize>) -> Result<RelocValue<usize>> {
        let off = match self.stubs.add_stub(name, kind)? {
            StubEntry::Occupied(off) => off,
            StubEntry::Vacant(off) => {
                let slot = &mut self.image.bytes[off..off + CALL_STUB_SIZE];
                match kind {
                    RelocKind::Call26 => aarch64::write_call_stub(slot, target.0),
                    _ => x86_64::write_call_stub(slot, target.0),
                }
                off
            }
        };
        Ok(RelocValue::new(self.base + off))
    }

    fn apply(&mut self, placement: &Placement<'a>, rel: &'a crate::input::RelocEntry) -> Result<()> {
        let symbol = placement.symbol;
        let referrer = symbol.name.as_str();
        let kind = RelocKind::from_raw(rel.kind).ok_or_else(|| Error::UnsupportedRelocationKind {
            kind: rel.kind,
            referrer: referrer.to_owned().into(),
        })?;
        let size = kind.field_size();
        if rel
            .offset
            .checked_add(size)
            .is_none_or(|end| end > symbol.size)
        {
            return Err(malformed_error(format!(
                "reference to [{}] at 0x{:x} lies outside [{}] (size 0x{:x})",
                rel.target, rel.offset, referrer, symbol.size
            )));
        }
        let out_of_range = || {
            relocate_error(format!(
                "{:?} reference to [{}] in [{}] is out of range",
                kind, rel.target, referrer
            ))
        };

        let sym = self.resolve(&rel.target, referrer)?;
        let addend = rel.addend as isize;
        let place = placement.offset + rel.offset;
        let p = RelocValue::new(self.base + place);
        let mut field = [0u8; 8];
        match kind {
            RelocKind::Abs64 => {
                field.copy_from_slice(&((sym + addend).0 as u64).to_ne_bytes());
            }
            RelocKind::Abs32 => {
                let val: RelocValue<u32> = (sym + addend).try_into().map_err(|_| out_of_range())?;
                field[..4].copy_from_slice(&val.0.to_ne_bytes());
            }
            RelocKind::PcRel32 => {
                let val: RelocValue<i32> =
                    (sym + addend - p).try_into().map_err(|_| out_of_range())?;
                field[..4].copy_from_slice(&val.0.to_ne_bytes());
            }
            RelocKind::CallRel32 => {
                let val: RelocValue<i32> = match (sym + addend - p).try_into() {
                    Ok(val) => val,
                    Err(_) => {
                        let stub = self.stub(&rel.target, kind, sym)?;
                        (stub + addend - p).try_into().map_err(|_| out_of_range())?
                    }
                };
                x86_64::patch_rel32(&mut field, val.0);
            }
            RelocKind::Call26 => {
                let mut insn = [0u8; 4];
                insn.copy_from_slice(&self.image.bytes[place..place + 4]);
                let insn = u32::from_le_bytes(insn);
                let disp = (sym + addend - p).0 as isize;
                let encoded = match aarch64::encode_branch26(insn, disp) {
                    Some(encoded) => encoded,
                    None => {
                        let stub = self.stub(&rel.target, kind, sym)?;
                        aarch64::encode_branch26(insn, (stub + addend - p).0 as isize)
                            .ok_or_else(out_of_range)?
                    }
                };
                field[..4].copy_from_slice(&encoded.to_le_bytes());
            }
            RelocKind::ModuleOff32 => {
                let val: RelocValue<u32> =
                    (sym + addend - self.base).try_into().map_err(|_| out_of_range())?;
                field[..4].copy_from_slice(&val.0.to_ne_bytes());
            }
        }
        self.image.bytes[place..place + size].copy_from_slice(&field[..size]);
        Ok(())
    }
}
