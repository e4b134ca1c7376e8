//! Compiled templates keyed by identity.
//!
//! The index lock is only held long enough to find or create the slot for an
//! identity. Compilation happens under the slot's own lock, so a template is
//! compiled once no matter how many threads ask for it, while unrelated
//! templates compile in parallel.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{error::MinihamlResult, template::CompiledTemplate};

type Slot = Arc<Mutex<Option<Arc<CompiledTemplate>>>>;

#[derive(Debug, Default)]
pub struct TemplateCache {
    index: Mutex<HashMap<String, Slot>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, identity: &str) -> Slot {
        let mut index = self.index.lock();
        Arc::clone(index.entry(identity.to_owned()).or_default())
    }

    /// Returns the template cached under `identity`, compiling it with
    /// `compile` first if there is none.
    ///
    /// A failed compile is returned to the caller and leaves nothing behind,
    /// so the next call tries again.
    ///
    /// # Errors
    ///
    /// Whatever `compile` fails with.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use minihaml::{compile, Options, TemplateCache};
    ///
    /// let cache = TemplateCache::new();
    /// let options = Options::default();
    /// let first = cache.get_or_compile("hello", || compile("hello", "%p hi", &options)).unwrap();
    /// let second = cache.get_or_compile("hello", || unreachable!()).unwrap();
    /// assert!(Arc::ptr_eq(&first, &second));
    /// ```
    pub fn get_or_compile<F>(&self, identity: &str, compile: F) -> MinihamlResult<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> MinihamlResult<CompiledTemplate>,
    {
        let slot = self.slot(identity);
        let mut guard = slot.lock();
        if let Some(template) = guard.as_ref() {
            tracing::trace!(template = identity, "template cache hit");
            return Ok(Arc::clone(template));
        }

        tracing::debug!(template = identity, "template cache miss");
        match compile() {
            Ok(template) => {
                let template = Arc::new(template);
                *guard = Some(Arc::clone(&template));
                Ok(template)
            }
            Err(err) => {
                self.forget(identity, &slot);
                Err(err)
            }
        }
    }

    /// Drop the empty slot for `identity` unless another caller is waiting
    /// on it. Called with the slot locked.
    fn forget(&self, identity: &str, slot: &Slot) {
        let mut index = self.index.lock();
        let unshared = index
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unshared {
            index.remove(identity);
        }
    }

    /// The cached template for `identity`, if it has compiled.
    ///
    /// Waits for a compile of the same identity that is in progress.
    pub fn get(&self, identity: &str) -> Option<Arc<CompiledTemplate>> {
        let slot = self.index.lock().get(identity).map(Arc::clone)?;
        let guard = slot.lock();
        guard.as_ref().map(Arc::clone)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    pub fn remove(&self, identity: &str) -> Option<Arc<CompiledTemplate>> {
        let slot = self.index.lock().remove(identity)?;
        let mut guard = slot.lock();
        guard.take()
    }

    /// Number of compiled templates.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.index.lock().values().map(Arc::clone).collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.index.lock().clear();
    }
}
