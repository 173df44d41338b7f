//! Copy-on-write value cells.
//!
//! Readers call [`VersionedCell::load`] and get an `Arc` to a complete,
//! immutable version; they never block and never observe a half-built
//! value. Writers build a new version from the current one and install it
//! with a single atomic swap. Writers are serialised among themselves so two
//! concurrent `update`s never lose each other's changes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// A lock-free-read, copy-on-write container.
pub struct VersionedCell<T> {
    current: ArcSwap<T>,
    version: AtomicU64,
    writer: Mutex<()>,
}

impl<T> VersionedCell<T> {
    /// Creates a cell holding `value` as version 0.
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
            version: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Returns the current version.
    #[inline]
    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Number of versions installed since creation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replaces the current value.
    pub fn store(&self, value: T) -> Arc<T> {
        let _writer = self.writer.lock();
        self.install(Arc::new(value))
    }

    /// Builds a new version from the current one and installs it.
    pub fn update<F>(&self, f: F) -> Arc<T>
    where
        F: FnOnce(&T) -> T,
    {
        let _writer = self.writer.lock();
        let next = Arc::new(f(&self.current.load()));
        self.install(next)
    }

    /// Like [`update`](Self::update), but leaves the current version in
    /// place when `f` fails.
    pub fn try_update<F, E>(&self, f: F) -> Result<Arc<T>, E>
    where
        F: FnOnce(&T) -> Result<T, E>,
    {
        let _writer = self.writer.lock();
        let next = Arc::new(f(&self.current.load())?);
        Ok(self.install(next))
    }

    fn install(&self, next: Arc<T>) -> Arc<T> {
        self.current.store(Arc::clone(&next));
        self.version.fetch_add(1, Ordering::AcqRel);
        next
    }
}

impl<T: Default> Default for VersionedCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for VersionedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedCell")
            .field("version", &self.version())
            .field("value", &self.load())
            .finish()
    }
}
