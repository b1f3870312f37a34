//! Live mapping from username to that user's [`Sink`].

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{protocol::is_valid_name, sink::Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    InvalidName,
    NameTaken,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::InvalidName => f.write_str("invalid username"),
            RegisterError::NameTaken => f.write_str("username already in use"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Connected users, keyed by name.
///
/// A `BTreeMap` keeps snapshots in a stable order. The lock is never held
/// across an `.await`, so unrelated sessions only contend for the length of
/// a single insert, remove or clone.
#[derive(Default)]
pub struct Registry {
    users: Mutex<BTreeMap<String, Sink>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> MutexGuard<'_, BTreeMap<String, Sink>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `name` unless it is invalid or already present.
    ///
    /// The check and the insert happen under one lock, so two sessions racing
    /// for the same name cannot both win.
    pub fn register(&self, name: &str, sink: Sink) -> Result<(), RegisterError> {
        if !is_valid_name(name) {
            return Err(RegisterError::InvalidName);
        }

        match self.users().entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegisterError::NameTaken),
            Entry::Vacant(slot) => {
                slot.insert(sink);
                Ok(())
            }
        }
    }

    /// Removes `name`, returning its sink if it was present.
    pub fn unregister(&self, name: &str) -> Option<Sink> {
        self.users().remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Sink> {
        self.users().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.users().contains_key(name)
    }

    /// Connected usernames in sorted order.
    pub fn snapshot(&self) -> Vec<String> {
        self.users().keys().cloned().collect()
    }

    /// Names and sinks captured under a single lock.
    pub fn entries(&self) -> Vec<(String, Sink)> {
        self.users()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.clone()))
            .collect()
    }

    /// Empties the registry, handing back every name with its sink.
    pub fn drain(&self) -> Vec<(String, Sink)> {
        std::mem::take(&mut *self.users()).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.users().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn sink(session: u64) -> Sink {
        Sink::new(session, tokio::io::sink())
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_until_released() {
        let registry = Registry::new();

        registry
            .register("alice123", sink(1))
            .expect("first registration should pass");
        assert_eq!(
            registry.register("alice123", sink(2)),
            Err(RegisterError::NameTaken)
        );
        assert_eq!(registry.lookup("alice123").map(|s| s.session()), Some(1));

        assert!(registry.unregister("alice123").is_some());
        assert!(registry.unregister("alice123").is_none());
        registry
            .register("alice123", sink(3))
            .expect("name is free again");
    }

    #[tokio::test]
    async fn invalid_names_never_enter_the_registry() {
        let registry = Registry::new();
        assert_eq!(
            registry.register("ab", sink(1)),
            Err(RegisterError::InvalidName)
        );
        assert_eq!(
            registry.register("bad name", sink(1)),
            Err(RegisterError::InvalidName)
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_sorted() {
        let registry = Registry::new();
        for (session, name) in ["carol", "alice", "bob_99"].into_iter().enumerate() {
            registry.register(name, sink(session as u64)).unwrap();
        }

        assert_eq!(registry.snapshot(), vec!["alice", "bob_99", "carol"]);
        let names: Vec<_> = registry.entries().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, registry.snapshot());
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn drain_releases_every_name() {
        let registry = Registry::new();
        registry.register("alice123", sink(1)).unwrap();
        registry.register("bob_99", sink(2)).unwrap();

        let drained: Vec<_> = registry
            .drain()
            .into_iter()
            .map(|(name, sink)| (name, sink.session()))
            .collect();

        assert_eq!(
            drained,
            vec![("alice123".to_string(), 1), ("bob_99".to_string(), 2)]
        );
        assert!(registry.is_empty());
        registry.register("alice123", sink(3)).expect("name is free again");
    }

    #[tokio::test]
    async fn concurrent_registration_has_a_single_winner() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..16)
            .map(|session| {
                let registry = Arc::clone(&registry);
                let sink = sink(session);
                std::thread::spawn(move || registry.register("contested", sink).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(registry.contains("contested"));
    }
}
