//! AArch64 encodings for patched calls and call stubs.

/// Instruction granularity of pc deltas in the pc tables.
#[allow(unused)]
pub const PC_QUANTUM: usize = 4;

/// Fill byte between functions. Four of them decode as `udf #0`.
#[allow(unused)]
pub(crate) const TEXT_PAD: u8 = 0;

/// Size of each call stub in bytes.
pub(crate) const CALL_STUB_SIZE: usize = 16;

/// Template for call stubs.
pub(crate) const CALL_STUB: [u8; CALL_STUB_SIZE] = [
    0x50, 0x00, 0x00, 0x58, // ldr x16, #8
    0x00, 0x02, 0x1f, 0xd6, // br x16
    0, 0, 0, 0, 0, 0, 0, 0, // .quad target
];

/// Reach of a B/BL immediate: ±128MiB.
const BRANCH26_RANGE: isize = 1 << 27;

/// Writes a stub that jumps to `target`.
#[inline]
pub(crate) fn write_call_stub(stub: &mut [u8], target: usize) {
    stub[..CALL_STUB_SIZE].copy_from_slice(&CALL_STUB);
    stub[8..16].copy_from_slice(&(target as u64).to_le_bytes());
}

/// Rewrites the imm26 field of a B/BL instruction with `disp`.
///
/// Returns `None` when the displacement is misaligned or out of reach.
#[inline]
pub(crate) fn encode_branch26(insn: u32, disp: isize) -> Option<u32> {
    if disp & 3 != 0 || !(-BRANCH26_RANGE..BRANCH26_RANGE).contains(&disp) {
        return None;
    }
    Some((insn & 0xfc00_0000) | (((disp >> 2) as u32) & 0x03ff_ffff))
}
