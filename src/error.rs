use alloc::borrow::Cow;
use core::fmt::{Debug, Display};

/// Error types used throughout the `rtlink` library.
///
/// Every variant aborts the load operation that produced it. No module is
/// ever published from a load that returned an error.
#[derive(Debug)]
pub enum Error {
    /// Two input objects define the same symbol name.
    DuplicateSymbol {
        /// The symbol defined more than once.
        name: Cow<'static, str>,
        /// The object that defined it first.
        first: Cow<'static, str>,
        /// The object that defined it again.
        second: Cow<'static, str>,
    },

    /// A name lookup in the symbol catalog failed.
    UnknownSymbol {
        /// The symbol that could not be found.
        name: Cow<'static, str>,
    },

    /// A reference targets a symbol that is defined neither by the inputs
    /// nor by the host process.
    UnresolvedSymbol {
        /// The referenced symbol.
        name: Cow<'static, str>,
        /// The symbol whose contents hold the reference.
        referrer: Cow<'static, str>,
    },

    /// A function references auxiliary data (stack object map, pointer map)
    /// that nobody defines.
    UnknownAuxiliaryObject {
        /// The auxiliary symbol name.
        name: Cow<'static, str>,
        /// The function referencing it.
        func: Cow<'static, str>,
    },

    /// The object container handed to the loader is inconsistent.
    ///
    /// This covers reads past the end of the object, references outside
    /// their symbol and a module that fails self-verification.
    MalformedObject {
        /// A descriptive message about the inconsistency.
        msg: Cow<'static, str>,
    },

    /// A reference carries a kind code this linker does not know how to patch.
    UnsupportedRelocationKind {
        /// The raw kind code.
        kind: u32,
        /// The symbol whose contents hold the reference.
        referrer: Cow<'static, str>,
    },

    /// More than 255 functions separate a pc index bucket base from one of its
    /// sub-buckets, so the single-byte delta cannot encode it.
    PcIndexOverflow {
        /// Code offset of the offending sub-bucket.
        offset: usize,
        /// The delta that did not fit.
        delta: usize,
    },

    /// A resolved value does not fit the encoding its reference kind requires.
    Relocation {
        /// A descriptive message about the relocation error.
        msg: Cow<'static, str>,
    },

    /// An error occurred during memory mapping operations.
    Mmap {
        /// A descriptive message about the memory mapping error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while opening or reading an object file.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::DuplicateSymbol {
                name,
                first,
                second,
            } => write!(
                f,
                "Duplicate symbol: [{name}] defined in both [{first}] and [{second}]"
            ),
            Error::UnknownSymbol { name } => write!(f, "Unknown symbol: [{name}]"),
            Error::UnresolvedSymbol { name, referrer } => {
                write!(f, "Unresolved symbol: [{name}] referenced by [{referrer}]")
            }
            Error::UnknownAuxiliaryObject { name, func } => {
                write!(f, "Unknown auxiliary object: [{name}] used by [{func}]")
            }
            Error::MalformedObject { msg } => write!(f, "Malformed object: {msg}"),
            Error::UnsupportedRelocationKind { kind, referrer } => write!(
                f,
                "Unsupported relocation kind: {kind} in [{referrer}]"
            ),
            Error::PcIndexOverflow { offset, delta } => write!(
                f,
                "Pc index overflow: sub-bucket at 0x{offset:x} needs delta {delta}"
            ),
            Error::Relocation { msg } => write!(f, "Relocation error: {msg}"),
            Error::Mmap { msg } => write!(f, "Memory mapping error: {msg}"),
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

#[cold]
#[inline(never)]
#[allow(unused)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn mmap_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Mmap { msg: msg.into() }
}

/// Creates a relocation error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn relocate_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Relocation { msg: msg.into() }
}

/// Creates a malformed-object error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn malformed_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::MalformedObject { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn unresolved_error(
    name: impl Into<Cow<'static, str>>,
    referrer: impl Into<Cow<'static, str>>,
) -> Error {
    Error::UnresolvedSymbol {
        name: name.into(),
        referrer: referrer.into(),
    }
}
