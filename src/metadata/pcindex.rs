//! Constant-time pc → function index
//!
//! The code region is cut into buckets of [`PC_BUCKET_SIZE`] bytes, each cut
//! again into [`N_SUB`] sub-buckets. For every sub-bucket the index stores the
//! function covering its first byte as `bucket.idx + bucket.subbuckets[i]`.
//! A lookup lands on that function and scans forward through the function
//! table, which stays short since functions are at least [`MIN_FUNC`] bytes
//! apart.

use super::FuncTab;
use crate::{Error, Result};
use alloc::vec::Vec;

/// Minimum distance between two function entries.
pub const MIN_FUNC: usize = 16;
/// Bytes of code covered by one bucket.
pub const PC_BUCKET_SIZE: usize = 256 * MIN_FUNC;
/// Sub-buckets per bucket.
pub const N_SUB: usize = 16;
/// Bytes of code covered by one sub-bucket.
pub const SUB_BUCKET_SIZE: usize = PC_BUCKET_SIZE / N_SUB;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FindFuncBucket {
    /// Index of the function covering the first byte of the bucket.
    pub idx: u32,
    /// Per sub-bucket offset from `idx`.
    pub subbuckets: [u8; N_SUB],
}

/// Builds the index while functions are laid out in address order.
#[derive(Debug, Default)]
pub(crate) struct PcIndexBuilder {
    buckets: Vec<FindFuncBucket>,
    /// First sub-bucket not yet assigned.
    next_slot: usize,
    funcs: usize,
}

impl PcIndexBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers the next function, which starts `code_off` bytes into the
    /// code region. Offsets must be non-decreasing.
    pub(crate) fn add_func(&mut self, code_off: usize) -> Result<()> {
        let func = self.funcs;
        let slot = code_off / SUB_BUCKET_SIZE;
        if slot >= self.next_slot {
            // Sub-buckets up to this one start before the new function, so
            // the previous function covers them.
            let prev = func.saturating_sub(1);
            while self.next_slot < slot {
                self.assign(self.next_slot, prev)?;
            }
            let covering = if code_off % SUB_BUCKET_SIZE == 0 {
                func
            } else {
                prev
            };
            self.assign(slot, covering)?;
        }
        self.funcs += 1;
        Ok(())
    }

    fn assign(&mut self, slot: usize, func: usize) -> Result<()> {
        let bucket = slot / N_SUB;
        if bucket == self.buckets.len() {
            self.buckets.push(FindFuncBucket {
                idx: func as u32,
                subbuckets: [0; N_SUB],
            });
        }
        let entry = &mut self.buckets[bucket];
        let delta = func - entry.idx as usize;
        entry.subbuckets[slot % N_SUB] = u8::try_from(delta).map_err(|_| Error::PcIndexOverflow {
            offset: slot * SUB_BUCKET_SIZE,
            delta,
        })?;
        self.next_slot = slot + 1;
        Ok(())
    }

    /// Assigns the sub-buckets after the last function and returns the index
    /// covering `text_len` bytes of code.
    pub(crate) fn finish(mut self, text_len: usize) -> Result<Vec<FindFuncBucket>> {
        let last = self.funcs.saturating_sub(1);
        let end = text_len.div_ceil(PC_BUCKET_SIZE) * N_SUB;
        while self.next_slot < end {
            self.assign(self.next_slot, last)?;
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[PcIndex] {} functions indexed by {} buckets",
            self.funcs,
            self.buckets.len()
        );
        Ok(self.buckets)
    }
}

/// Finds the function table index of the function containing `pc`.
///
/// `ftab` must end with the sentinel entry at `maxpc`.
pub fn find_func_index(
    buckets: &[FindFuncBucket],
    ftab: &[FuncTab],
    minpc: usize,
    maxpc: usize,
    pc: usize,
) -> Option<usize> {
    if pc < minpc || pc >= maxpc {
        return None;
    }
    let x = pc - minpc;
    let bucket = buckets.get(x / PC_BUCKET_SIZE)?;
    let sub = (x % PC_BUCKET_SIZE) / SUB_BUCKET_SIZE;
    let mut idx = bucket.idx as usize + bucket.subbuckets[sub] as usize;
    while ftab.get(idx + 1)?.entry <= pc {
        idx += 1;
    }
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn build(offsets: &[usize], text_len: usize) -> (Vec<FindFuncBucket>, Vec<FuncTab>) {
        let mut builder = PcIndexBuilder::new();
        let mut ftab = Vec::new();
        for (i, off) in offsets.iter().enumerate() {
            builder.add_func(*off).unwrap();
            ftab.push(FuncTab {
                entry: *off,
                funcoff: i,
            });
        }
        ftab.push(FuncTab {
            entry: text_len,
            funcoff: offsets.len(),
        });
        (builder.finish(text_len).unwrap(), ftab)
    }

    #[test]
    fn every_pc_maps_to_its_function() {
        let offsets = [0, 16, 48, 300, 4096, 4112, 9000, 9040];
        let text_len = 9100;
        let (buckets, ftab) = build(&offsets, text_len);
        assert_eq!(buckets.len(), 3);
        for pc in 0..text_len {
            let expect = offsets.iter().rposition(|off| *off <= pc).unwrap();
            assert_eq!(
                find_func_index(&buckets, &ftab, 0, text_len, pc),
                Some(expect),
                "pc 0x{pc:x}"
            );
        }
        assert_eq!(find_func_index(&buckets, &ftab, 0, text_len, text_len), None);
    }

    #[test]
    fn bucket_base_is_function_at_bucket_start() {
        let offsets: Vec<usize> = (0..300).map(|i| i * 16).collect();
        let (buckets, _) = build(&offsets, 300 * 16);
        assert_eq!(buckets[0].idx, 0);
        assert_eq!(buckets[1].idx, 256);
        assert_eq!(buckets[1].subbuckets[1], 16);
    }

    #[test]
    fn dense_functions_overflow_the_delta() {
        let mut builder = PcIndexBuilder::new();
        let mut result = Ok(());
        for off in 0..300 {
            result = builder.add_func(off * 14);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::PcIndexOverflow { .. })));
    }

    #[test]
    fn empty_code_has_no_buckets() {
        let (buckets, ftab) = build(&[], 0);
        assert!(buckets.is_empty());
        assert_eq!(ftab, vec![FuncTab { entry: 0, funcoff: 0 }]);
        assert_eq!(find_func_index(&buckets, &ftab, 0, 0, 0), None);
    }
}
