//! Key to member-set map with explicit mutation.
//!
//! Used to record which routes traverse which link. Reads never create
//! entries; releasing a member that was never attributed is an error.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Error type for MembershipMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Member not found")]
    MemberNotFound,
}

/// Map from a key to the set of members currently attributed to it.
///
/// A key exists exactly as long as it has at least one member.
///
/// ```
/// use scn_orch_common::MembershipMap;
///
/// let mut map: MembershipMap<&str, u16> = MembershipMap::new();
/// assert!(map.members(&"link").is_none());
///
/// map.attribute("link", 5);
/// assert!(map.contains(&"link", &5));
///
/// map.release(&"link", &5).unwrap();
/// assert!(map.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct MembershipMap<K, M> {
    inner: BTreeMap<K, BTreeSet<M>>,
}

impl<K, M> MembershipMap<K, M>
where
    K: Ord + Clone,
    M: Ord + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    /// Number of keys with at least one member.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the members of `key`. **This never creates entries.**
    pub fn members(&self, key: &K) -> Option<&BTreeSet<M>> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &K, member: &M) -> bool {
        self.inner.get(key).is_some_and(|set| set.contains(member))
    }

    /// Attributes `member` to `key`, creating the key if needed.
    ///
    /// Returns false if the member was already attributed.
    pub fn attribute(&mut self, key: K, member: M) -> bool {
        self.inner.entry(key).or_default().insert(member)
    }

    /// Releases `member` from `key`, dropping the key once it is empty.
    pub fn release(&mut self, key: &K, member: &M) -> Result<(), MembershipError> {
        let set = self.inner.get_mut(key).ok_or(MembershipError::KeyNotFound)?;
        if !set.remove(member) {
            return Err(MembershipError::MemberNotFound);
        }
        if set.is_empty() {
            self.inner.remove(key);
        }
        Ok(())
    }

    /// Removes `key` entirely, returning its members.
    pub fn remove_key(&mut self, key: &K) -> Option<BTreeSet<M>> {
        self.inner.remove(key)
    }

    /// Returns every key `member` is attributed to.
    pub fn keys_of(&self, member: &M) -> Vec<K> {
        self.inner
            .iter()
            .filter(|(_, set)| set.contains(member))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &BTreeSet<M>)> {
        self.inner.iter()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<K, M> Default for MembershipMap<K, M>
where
    K: Ord + Clone,
    M: Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reads_never_create() {
        let map: MembershipMap<u32, u16> = MembershipMap::new();
        assert!(map.members(&1).is_none());
        assert!(!map.contains(&1, &7));
        assert!(map.keys_of(&7).is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn test_attribute_and_release() {
        let mut map = MembershipMap::new();
        assert!(map.attribute(1u32, 7u16));
        assert!(!map.attribute(1, 7));
        assert!(map.attribute(1, 8));
        assert!(map.attribute(2, 7));

        assert_eq!(map.keys_of(&7), vec![1, 2]);
        assert_eq!(map.members(&1).map(|s| s.len()), Some(2));

        map.release(&1, &7).unwrap();
        map.release(&1, &8).unwrap();
        assert!(map.members(&1).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_release_errors() {
        let mut map = MembershipMap::new();
        assert_eq!(map.release(&1u32, &7u16), Err(MembershipError::KeyNotFound));

        map.attribute(1, 8);
        assert_eq!(map.release(&1, &7), Err(MembershipError::MemberNotFound));
        assert!(map.contains(&1, &8));
    }

    #[test]
    fn test_remove_key() {
        let mut map = MembershipMap::new();
        map.attribute("a", 1u16);
        map.attribute("a", 2);

        let members = map.remove_key(&"a").unwrap();
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(map.remove_key(&"a").is_none());
    }
}
