use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// Per-document read/write locks keyed by document id.
///
/// Entries are created on first use and reference counted. `forget` only
/// drops an entry once nobody holds it; while holders remain the entry is
/// retired and late acquirers share the same lock, so one id is never
/// guarded by two lock instances at the same time.
#[derive(Debug, Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<String, LockEntry>>,
}

#[derive(Debug)]
struct LockEntry {
    lock: Arc<RwLock<()>>,
    holders: usize,
    retired: bool,
}

/// Held lock on one document. Released on drop.
pub struct DocumentLock {
    // Field order matters: the guard is released before the checkout.
    _held: Held,
    _checkout: Checkout,
}

enum Held {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

struct Checkout {
    registry: Arc<LockRegistry>,
    id: String,
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.registry.check_in(&self.id);
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(self: &Arc<Self>, id: &str, mode: LockMode) -> DocumentLock {
        let (lock, checkout) = self.check_out(id);
        let held = match mode {
            LockMode::Read => Held::Read(lock.read_owned().await),
            LockMode::Write => Held::Write(lock.write_owned().await),
        };
        DocumentLock {
            _held: held,
            _checkout: checkout,
        }
    }

    /// Drops the entry for `id`, or retires it until its last holder leaves.
    pub fn forget(&self, id: &str) {
        let mut entries = self.entries.lock().expect("lock registry");
        match entries.get_mut(id) {
            Some(entry) if entry.holders == 0 => {
                entries.remove(id);
            }
            Some(entry) => entry.retired = true,
            None => {}
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().expect("lock registry").contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock registry").len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_out(self: &Arc<Self>, id: &str) -> (Arc<RwLock<()>>, Checkout) {
        let mut entries = self.entries.lock().expect("lock registry");
        let entry = entries.entry(id.to_string()).or_insert_with(|| LockEntry {
            lock: Arc::new(RwLock::new(())),
            holders: 0,
            retired: false,
        });
        entry.holders += 1;
        let checkout = Checkout {
            registry: Arc::clone(self),
            id: id.to_string(),
        };
        (Arc::clone(&entry.lock), checkout)
    }

    fn check_in(&self, id: &str) {
        let mut entries = self.entries.lock().expect("lock registry");
        let remove = match entries.get_mut(id) {
            Some(entry) => {
                entry.holders = entry.holders.saturating_sub(1);
                entry.holders == 0 && entry.retired
            }
            None => false,
        };
        if remove {
            entries.remove(id);
        }
    }
}
