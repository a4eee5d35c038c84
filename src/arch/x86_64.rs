//! x86-64 encodings for patched calls and call stubs.

/// Instruction granularity of pc deltas in the pc tables.
#[allow(unused)]
pub const PC_QUANTUM: usize = 1;

/// Fill byte between functions (`int3`).
#[allow(unused)]
pub(crate) const TEXT_PAD: u8 = 0xcc;

/// Size of each call stub in bytes.
pub(crate) const CALL_STUB_SIZE: usize = 16;

/// Template for call stubs.
/// Each stub contains:
/// - an indirect jmp through the quadword that follows it
/// - the absolute target address
/// - padding bytes
pub(crate) const CALL_STUB: [u8; CALL_STUB_SIZE] = [
    0xff, 0x25, 0, 0, 0, 0, // jmp *0(%rip)
    0, 0, 0, 0, 0, 0, 0, 0, // .quad target
    0xcc, 0xcc, // (padding)
];

/// Writes a stub that jumps to `target`.
#[inline]
pub(crate) fn write_call_stub(stub: &mut [u8], target: usize) {
    stub[..CALL_STUB_SIZE].copy_from_slice(&CALL_STUB);
    stub[6..14].copy_from_slice(&(target as u64).to_le_bytes());
}

/// Stores a 32-bit displacement into a `call rel32`/`jmp rel32` operand.
#[inline]
pub(crate) fn patch_rel32(field: &mut [u8], disp: i32) {
    field[..4].copy_from_slice(&disp.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_embeds_target_after_jump() {
        let mut stub = [0u8; CALL_STUB_SIZE];
        write_call_stub(&mut stub, 0x1122_3344_5566_7788);
        assert_eq!(&stub[..6], &[0xff, 0x25, 0, 0, 0, 0]);
        assert_eq!(
            u64::from_le_bytes(stub[6..14].try_into().unwrap()),
            0x1122_3344_5566_7788
        );
    }
}
