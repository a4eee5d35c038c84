//! The module chain shared with the host runtime
//!
//! Published modules form a singly linked chain, oldest first, that stack
//! walkers and collectors traverse to map a pc to its function. Nodes live in
//! an arena of slots; links are slot indices. Appending is O(1) through the
//! tail index, removal walks from the head to find the exact node.
//!
//! Writers (publish, remove) take the lock exclusively, readers share it, so
//! a reader never sees a node that is only half linked.

use crate::{
    FastSet, LoadedModule, ModuleHandle, SymbolLookup,
    module::{FuncInfo, ModuleData, ModuleId},
};
use alloc::vec::Vec;
use spin::RwLock;

#[cfg(not(feature = "portable-atomic"))]
use alloc::sync::Arc;
#[cfg(feature = "portable-atomic")]
use portable_atomic_util::Arc;

struct Slot {
    module: Arc<ModuleData>,
    next: Option<usize>,
}

#[derive(Default)]
struct ModuleChain {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    /// Modules this registry published and has not removed yet.
    loaded: FastSet<ModuleId>,
}

struct ChainIter<'c> {
    chain: &'c ModuleChain,
    cur: Option<usize>,
}

impl<'c> Iterator for ChainIter<'c> {
    type Item = &'c Arc<ModuleData>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.chain.slots[self.cur?].as_ref()?;
        self.cur = slot.next;
        Some(&slot.module)
    }
}

impl ModuleChain {
    fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            chain: self,
            cur: self.head,
        }
    }

    fn append(&mut self, module: Arc<ModuleData>) {
        let id = module.id();
        let slot = Some(Slot { module, next: None });
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        match self.tail.and_then(|tail| self.slots[tail].as_mut()) {
            Some(tail) => tail.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
        self.loaded.insert(id);
    }

    fn unlink(&mut self, id: ModuleId) -> Option<Arc<ModuleData>> {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.slots[idx].as_ref()?;
            let next = slot.next;
            if slot.module.id() == id {
                match prev.and_then(|prev| self.slots[prev].as_mut()) {
                    Some(prev) => prev.next = next,
                    None => self.head = next,
                }
                if self.tail == Some(idx) {
                    self.tail = prev;
                }
                let slot = self.slots[idx].take()?;
                self.free.push(idx);
                self.len -= 1;
                self.loaded.remove(&id);
                return Some(slot.module);
            }
            prev = cur;
            cur = next;
        }
        None
    }
}

/// An injectable stand-in for the host runtime's global module list.
///
/// # Examples
/// ```
/// use rtlink::ModuleRegistry;
///
/// let registry = ModuleRegistry::new();
/// assert!(registry.is_empty());
/// assert!(registry.publish_all([]).is_empty());
/// assert_eq!(registry.len(), 0);
/// ```
#[derive(Default)]
pub struct ModuleRegistry {
    chain: RwLock<ModuleChain>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a verified module to the tail of the chain and makes it
    /// visible to readers.
    pub fn publish(&self, module: LoadedModule) -> ModuleHandle {
        let inner = module.inner;
        #[cfg(feature = "log")]
        log::info!(
            "Publishing module [{}] at [0x{:x}]",
            inner.name(),
            inner.base()
        );
        self.chain.write().append(inner.clone());
        ModuleHandle { inner }
    }

    /// Publishes several modules as one step. Readers see either none or
    /// all of them.
    pub fn publish_all(&self, modules: impl IntoIterator<Item = LoadedModule>) -> Vec<ModuleHandle> {
        let modules: Vec<Arc<ModuleData>> = modules.into_iter().map(|m| m.inner).collect();
        if modules.is_empty() {
            return Vec::new();
        }
        let mut chain = self.chain.write();
        modules
            .into_iter()
            .map(|inner| {
                chain.append(inner.clone());
                ModuleHandle { inner }
            })
            .collect()
    }

    /// Unlinks a published module. Returns `false` if it is not in this
    /// registry.
    ///
    /// The module's memory is released once the last [`ModuleHandle`] to it
    /// is dropped.
    ///
    /// # Safety
    /// No live call stack, closure or type descriptor may still point into
    /// the module's code or data.
    pub unsafe fn remove(&self, module: &ModuleHandle) -> bool {
        let removed = self.chain.write().unlink(module.id());
        #[cfg(feature = "log")]
        if removed.is_some() {
            log::info!("Removed module [{}]", module.name());
        }
        removed.is_some()
    }

    /// Number of published modules.
    pub fn len(&self) -> usize {
        self.chain.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this registry published `id` and has not removed it.
    pub fn is_loaded(&self, id: ModuleId) -> bool {
        self.chain.read().loaded.contains(&id)
    }

    /// Visits every published module in chain order.
    pub fn walk<F: FnMut(&ModuleData)>(&self, mut f: F) {
        let chain = self.chain.read();
        for module in chain.iter() {
            f(module);
        }
    }

    /// Handles to every published module, in chain order.
    pub fn snapshot(&self) -> Vec<ModuleHandle> {
        self.chain
            .read()
            .iter()
            .map(|inner| ModuleHandle {
                inner: inner.clone(),
            })
            .collect()
    }

    /// Identities of the published modules, in chain order.
    pub fn ids(&self) -> Vec<ModuleId> {
        self.chain.read().iter().map(|module| module.id()).collect()
    }

    /// The published module whose functions contain `pc`.
    pub fn find_module(&self, pc: usize) -> Option<ModuleHandle> {
        self.chain
            .read()
            .iter()
            .find(|module| pc >= module.minpc() && pc < module.maxpc())
            .map(|inner| ModuleHandle {
                inner: inner.clone(),
            })
    }

    /// Runs `f` on the function containing `pc`, as a stack walker would.
    pub fn with_func<R>(&self, pc: usize, f: impl FnOnce(FuncInfo<'_>) -> R) -> Option<R> {
        let chain = self.chain.read();
        chain
            .iter()
            .find_map(|module| module.find_func(pc))
            .map(f)
    }
}

impl SymbolLookup for ModuleRegistry {
    fn lookup(&self, name: &str) -> Option<*const ()> {
        self.chain
            .read()
            .iter()
            .find_map(|module| module.symbol_addr(name))
            .map(|addr| addr as *const ())
    }
}
