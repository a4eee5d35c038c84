use super::{CALL_STUB_SIZE, RelocKind};
use crate::{FastMap, Result, error::relocate_error};
use alloc::format;
use core::ops::Range;

/// A call stub slot handed out by [`StubTable`].
pub(crate) enum StubEntry {
    /// A stub for this target already exists at this image offset.
    Occupied(usize),
    /// A fresh slot at this image offset; the caller writes the stub.
    Vacant(usize),
}

/// Call stubs for targets out of reach of a direct call, one per target and
/// call encoding.
pub(crate) struct StubTable<'a> {
    range: Range<usize>,
    next: usize,
    map: FastMap<(&'a str, RelocKind), usize>,
}

impl<'a> StubTable<'a> {
    pub(crate) fn new(range: Range<usize>) -> Self {
        Self {
            next: range.start,
            range,
            map: FastMap::default(),
        }
    }

    pub(crate) fn add_stub(&mut self, target: &'a str, kind: RelocKind) -> Result<StubEntry> {
        if let Some(off) = self.map.get(&(target, kind)) {
            return Ok(StubEntry::Occupied(*off));
        }
        if self.next + CALL_STUB_SIZE > self.range.end {
            return Err(relocate_error(format!(
                "no call stub left for [{}]",
                target
            )));
        }
        let off = self.next;
        self.next += CALL_STUB_SIZE;
        self.map.insert((target, kind), off);
        Ok(StubEntry::Vacant(off))
    }

    #[cfg(feature = "log")]
    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.map.len()
    }
}
