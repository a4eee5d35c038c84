//! pc-value tables
//!
//! A table is a sequence of `(value delta, pc delta)` pairs. The value delta
//! is a zig-zag varint applied to a running value that starts at -1, the pc
//! delta an unsigned varint counted in [`PC_QUANTUM`] units. A zero value
//! delta after the first pair ends the table. The entry `(v, d)` means that
//! the running value is `v` for the next `d` units of code.

use crate::arch::PC_QUANTUM;
use alloc::vec::Vec;

fn read_uvarint(p: &[u8]) -> Option<(u32, usize)> {
    let mut v: u32 = 0;
    let mut shift = 0;
    for (i, b) in p.iter().enumerate() {
        if shift >= 35 {
            return None;
        }
        v |= ((b & 0x7f) as u32) << shift;
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
        shift += 7;
    }
    None
}

fn write_uvarint(out: &mut Vec<u8>, mut v: u32) {
    while v >= 0x80 {
        out.push(v as u8 | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

/// Walks the `(pc range end, value)` steps of a table.
pub struct PcValueIter<'t> {
    p: &'t [u8],
    pc: usize,
    val: i32,
    first: bool,
    quantum: usize,
}

impl<'t> PcValueIter<'t> {
    /// Starts walking `table` for the function at `entry`.
    pub fn new(table: &'t [u8], entry: usize) -> Self {
        Self::with_quantum(table, entry, PC_QUANTUM)
    }

    pub fn with_quantum(table: &'t [u8], entry: usize, quantum: usize) -> Self {
        Self {
            p: table,
            pc: entry,
            val: -1,
            first: true,
            quantum,
        }
    }
}

impl Iterator for PcValueIter<'_> {
    /// End of the pc range (exclusive) and the value over that range.
    type Item = (usize, i32);

    fn next(&mut self) -> Option<Self::Item> {
        let (uvdelta, n) = read_uvarint(self.p)?;
        if uvdelta == 0 && !self.first {
            return None;
        }
        let (pcdelta, m) = read_uvarint(&self.p[n..])?;
        self.p = &self.p[n + m..];
        self.first = false;
        let vdelta = if uvdelta & 1 != 0 {
            !((uvdelta >> 1) as i32)
        } else {
            (uvdelta >> 1) as i32
        };
        self.val = self.val.wrapping_add(vdelta);
        self.pc += pcdelta as usize * self.quantum;
        Some((self.pc, self.val))
    }
}

/// Looks up the value `table` holds for `target`, a pc inside the function
/// starting at `entry`.
pub fn pc_value(table: &[u8], entry: usize, target: usize) -> Option<i32> {
    if target < entry {
        return None;
    }
    PcValueIter::new(table, entry)
        .find(|(end, _)| target < *end)
        .map(|(_, val)| val)
}

/// Writes pc-value tables.
///
/// Container producers and tests use this to emit the tables the runtime
/// metadata carries.
#[derive(Debug)]
pub struct PcTableEncoder {
    out: Vec<u8>,
    val: i32,
    quantum: usize,
}

impl PcTableEncoder {
    pub fn new() -> Self {
        Self::with_quantum(PC_QUANTUM)
    }

    pub fn with_quantum(quantum: usize) -> Self {
        Self {
            out: Vec::new(),
            val: -1,
            quantum,
        }
    }

    /// Appends a step: `value` holds for the next `len` bytes of code.
    pub fn push(&mut self, len: usize, value: i32) -> &mut Self {
        let delta = value.wrapping_sub(self.val);
        let zz = ((delta << 1) ^ (delta >> 31)) as u32;
        write_uvarint(&mut self.out, zz);
        write_uvarint(&mut self.out, (len / self.quantum) as u32);
        self.val = value;
        self
    }

    /// Terminates the table and returns its bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.out.push(0);
        self.out
    }
}

impl Default for PcTableEncoder {
    fn default() -> Self {
        Self::new()
    }
}
