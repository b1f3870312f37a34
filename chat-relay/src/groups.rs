//! Named groups and their members.
//!
//! Groups are never deleted and members are never removed; a member who
//! disconnects stays listed and simply receives nothing while offline.

use std::{
    collections::{BTreeMap, BTreeSet, btree_map::Entry},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{protocol::is_valid_name, registry::Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    InvalidName,
    AlreadyExists,
    NoSuchGroup,
    UserNotConnected,
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupError::InvalidName => f.write_str("invalid group name"),
            GroupError::AlreadyExists => f.write_str("group already exists"),
            GroupError::NoSuchGroup => f.write_str("group does not exist"),
            GroupError::UserNotConnected => f.write_str("user is not connected"),
        }
    }
}

impl std::error::Error for GroupError {}

#[derive(Default)]
pub struct GroupStore {
    groups: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, BTreeMap<String, BTreeSet<String>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `name` with `creator` as its only member.
    pub fn create_group(&self, name: &str, creator: &str) -> Result<(), GroupError> {
        if !is_valid_name(name) {
            return Err(GroupError::InvalidName);
        }

        match self.groups().entry(name.to_string()) {
            Entry::Occupied(_) => Err(GroupError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(BTreeSet::from([creator.to_string()]));
                Ok(())
            }
        }
    }

    /// Adds `member` to `group`. The member has to be connected right now.
    ///
    /// Adding someone who is already a member succeeds without change.
    pub fn add_member(
        &self,
        group: &str,
        member: &str,
        registry: &Registry,
    ) -> Result<(), GroupError> {
        if !self.groups().contains_key(group) {
            return Err(GroupError::NoSuchGroup);
        }
        if !registry.contains(member) {
            return Err(GroupError::UserNotConnected);
        }

        let mut groups = self.groups();
        let members = groups.get_mut(group).ok_or(GroupError::NoSuchGroup)?;
        members.insert(member.to_string());
        Ok(())
    }

    /// Members of `group` in sorted order, or `None` if it does not exist.
    pub fn members(&self, group: &str) -> Option<Vec<String>> {
        self.groups()
            .get(group)
            .map(|members| members.iter().cloned().collect())
    }

    pub fn is_member(&self, group: &str, user: &str) -> bool {
        self.groups()
            .get(group)
            .is_some_and(|members| members.contains(user))
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups().contains_key(group)
    }
}
