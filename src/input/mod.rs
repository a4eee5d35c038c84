//! Object representations and access traits
//!
//! This module provides the traits and types used to hand relocatable objects
//! to the loader: a byte source ([`ObjectReader`]) and the parsed symbol view
//! ([`ObjSymbol`]) the container parser produced for it.

pub use backend::{ObjectBinary, ObjectFile};
pub use object::{FuncMeta, ObjSymbol, ObjectInput, RelocEntry, SymKind, TableRef};
pub use traits::{IntoObjectReader, ObjectReader};

mod backend;
mod object;
mod traits;
