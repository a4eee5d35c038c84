//! Instruction encodings for the architectures whose call relocations the
//! linker can patch.
//!
//! Both encoders are always compiled: the relocation kind, not the host,
//! picks which one applies. Only the pc quantum and the inter-function fill
//! byte depend on the target the crate is built for.

pub(crate) mod aarch64;
pub(crate) mod x86_64;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")]{
        pub use x86_64::PC_QUANTUM;
        pub(crate) use x86_64::TEXT_PAD;
    }else if #[cfg(target_arch = "aarch64")]{
        pub use aarch64::PC_QUANTUM;
        pub(crate) use aarch64::TEXT_PAD;
    }else {
        /// Instruction granularity of pc deltas in the pc tables.
        pub const PC_QUANTUM: usize = 1;
        pub(crate) const TEXT_PAD: u8 = 0;
    }
}

/// Size of a code pointer on the host.
pub const PTR_SIZE: usize = core::mem::size_of::<usize>();
