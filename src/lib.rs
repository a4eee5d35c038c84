//! # rtlink
//! Load relocatable objects into an already-running process and make their
//! functions first-class citizens of the host runtime.
//!
//! ## Usage
//! A load takes one or more parsed objects ([`input::ObjectInput`]), resolves
//! every reference against the objects themselves and the symbols the host
//! already has ([`SymbolLookup`]), and returns a [`LoadedModule`]: mapped,
//! relocated code and data plus the runtime metadata (function table, pc
//! tables, pc → function index) that stack walkers and collectors consume.
//! The module becomes visible to those services once it is published into a
//! [`ModuleRegistry`].
//!
//! ## Example
//! ```no_run
//! use rtlink::{Loader, ModuleRegistry, input::{ObjSymbol, ObjectBinary, ObjectInput, SymKind}};
//!
//! let code: &[u8] = &[0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3];
//! let input = ObjectInput::new(
//!     ObjectBinary::new("answer.o", code),
//!     vec![ObjSymbol::new("answer", SymKind::Text, 0, code.len())],
//! )
//! .unwrap();
//! let registry = ModuleRegistry::new();
//! let module = Loader::new().load([input], &registry).unwrap();
//! let handle = registry.publish(module);
//! let answer = unsafe { handle.get::<extern "C" fn() -> i32>("answer").unwrap() };
//! assert_eq!(answer(), 42);
//! ```
#![no_std]
extern crate alloc;

pub mod arch;
mod error;
pub mod input;
mod layout;
mod loader;
pub mod metadata;
mod module;
pub mod os;
mod registry;
pub mod relocation;
mod segment;
mod symbol;

pub use error::Error;
pub use loader::{LoadHook, LoadHookContext, Loader};
pub use module::{FuncInfo, LoadedModule, ModuleData, ModuleHandle, ModuleId};
pub use registry::ModuleRegistry;
pub use symbol::{Resolved, ResidentSymbols, Symbol, SymbolCatalog, SymbolLookup};

use foldhash::fast::FixedState;

/// Hash map used for every name-keyed table in the crate.
pub(crate) type FastMap<K, V> = hashbrown::HashMap<K, V, FixedState>;
pub(crate) type FastSet<K> = hashbrown::HashSet<K, FixedState>;

pub type Result<T> = core::result::Result<T, Error>;
