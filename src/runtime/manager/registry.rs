use std::fmt;
use std::sync::{Arc, Weak};

/// A GPU resource the manager may have to tear down on the caller's behalf.
///
/// `destroy` must be idempotent: the registry calls it on whatever is still
/// alive at teardown, including resources the caller already destroyed.
pub trait Tracked: Send + Sync {
    fn destroy(&self);
    fn is_destroyed(&self) -> bool;
}

/// Non-owning list of resources created through a manager.
///
/// Holding a `Weak` never extends a resource's lifetime; a resource dropped by
/// its last caller handle simply fails to upgrade and is skipped or pruned.
pub struct Registry<T: ?Sized> {
    entries: Vec<Weak<T>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .field("alive", &self.entries.iter().filter(|w| w.strong_count() > 0).count())
            .finish()
    }
}

impl<T: Tracked + ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: &Arc<T>) {
        self.entries.push(Arc::downgrade(resource));
    }

    /// Drops entries whose resource was released or explicitly destroyed.
    /// Returns how many entries were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|weak| weak.upgrade().is_some_and(|r| !r.is_destroyed()));
        before - self.entries.len()
    }

    /// Destroys every resource still alive, in registration order, then
    /// forgets all entries. Returns how many resources were reached.
    pub fn destroy_all(&mut self) -> usize {
        let mut reached = 0;
        for weak in self.entries.drain(..) {
            if let Some(resource) = weak.upgrade() {
                resource.destroy();
                reached += 1;
            }
        }
        reached
    }

    /// Number of entries, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resources that are still referenced by a caller.
    pub fn alive(&self) -> Vec<Arc<T>> {
        self.entries.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Sample {
        name: &'static str,
        destroyed: Mutex<bool>,
        destroy_calls: AtomicUsize,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Sample {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                destroyed: Mutex::new(false),
                destroy_calls: AtomicUsize::new(0),
                log: Arc::clone(log),
            })
        }
    }

    impl Tracked for Sample {
        fn destroy(&self) {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);
            let mut destroyed = self.destroyed.lock().unwrap();
            if !*destroyed {
                *destroyed = true;
                self.log.lock().unwrap().push(self.name);
            }
        }

        fn is_destroyed(&self) -> bool {
            *self.destroyed.lock().unwrap()
        }
    }

    #[test]
    fn test_registry_does_not_keep_resources_alive() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let sample = Sample::new("a", &log);
        registry.register(&sample);
        assert_eq!(Arc::strong_count(&sample), 1);
        drop(sample);
        assert_eq!(registry.len(), 1);
        assert!(registry.alive().is_empty());
    }

    #[test]
    fn test_prune_after_all_handles_dropped_empties_registry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        for name in ["a", "b", "c", "d"] {
            let sample = Sample::new(name, &log);
            registry.register(&sample);
        }
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.prune(), 4);
        assert!(registry.is_empty());
        assert_eq!(registry.prune(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_live_and_drops_explicitly_destroyed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let kept = Sample::new("kept", &log);
        let destroyed = Sample::new("destroyed", &log);
        registry.register(&kept);
        registry.register(&destroyed);
        destroyed.destroy();

        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.alive()[0].name, "kept");
    }

    #[test]
    fn test_destroy_all_reaches_only_live_resources() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let first = Sample::new("first", &log);
        let dropped = Sample::new("dropped", &log);
        let second = Sample::new("second", &log);
        registry.register(&first);
        registry.register(&dropped);
        registry.register(&second);
        drop(dropped);

        assert_eq!(registry.destroy_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert!(first.is_destroyed() && second.is_destroyed());
    }

    #[test]
    fn test_destroy_all_tolerates_already_destroyed_resource() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        let sample = Sample::new("once", &log);
        registry.register(&sample);
        sample.destroy();

        registry.destroy_all();
        assert_eq!(sample.destroy_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*log.lock().unwrap(), vec!["once"]);
    }
}
