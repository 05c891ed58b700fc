//! The three-level `localKey -> remoteKey -> groupName -> RoutesGroup`
//! mapping. Lookups fall back to the catch-all entry (`RemoteKey::Any`) when
//! no specific-key group exists; removing a group collapses any inner map
//! left empty by the removal.

use crate::group::RoutesGroup;
use one_core::PublicKey;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    Specific(PublicKey),
    Any,
}

type GroupsByName = HashMap<String, RoutesGroup>;
type GroupsByRemote = HashMap<RemoteKey, GroupsByName>;

#[derive(Default)]
pub struct ConnectionRoutesGroupMap {
    inner: Mutex<HashMap<PublicKey, GroupsByRemote>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLookup {
    Specific,
    CatchAll,
    None,
}

impl ConnectionRoutesGroupMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Which entry a `(local, remote, groupName)` triple would resolve to,
    /// without taking ownership of anything — the exact match wins over the
    /// catch-all, and neither existing means the peer has no home.
    pub fn lookup(&self, local: PublicKey, remote: PublicKey, group_name: &str) -> GroupLookup {
        let map = self.inner.lock().expect("routes-group map mutex poisoned");
        let Some(by_remote) = map.get(&local) else {
            return GroupLookup::None;
        };
        let specific = by_remote
            .get(&RemoteKey::Specific(remote))
            .map(|by_name| by_name.contains_key(group_name))
            .unwrap_or(false);
        if specific {
            return GroupLookup::Specific;
        }
        let catch_all = by_remote
            .get(&RemoteKey::Any)
            .map(|by_name| by_name.contains_key(group_name))
            .unwrap_or(false);
        if catch_all {
            GroupLookup::CatchAll
        } else {
            GroupLookup::None
        }
    }

    pub fn insert(&self, local: PublicKey, remote: RemoteKey, group_name: impl Into<String>, group: RoutesGroup) {
        let mut map = self.inner.lock().expect("routes-group map mutex poisoned");
        map.entry(local)
            .or_default()
            .entry(remote)
            .or_default()
            .insert(group_name.into(), group);
    }

    /// Runs `f` against the group for `(local, remote, group_name)`,
    /// falling back to the catch-all entry when no specific group exists.
    /// Returns `None` when neither is present.
    pub fn with_group<R>(
        &self,
        local: PublicKey,
        remote: PublicKey,
        group_name: &str,
        f: impl FnOnce(RemoteKey, &mut RoutesGroup) -> R,
    ) -> Option<R> {
        let mut map = self.inner.lock().expect("routes-group map mutex poisoned");
        let by_remote = map.get_mut(&local)?;

        if let Some(group) = by_remote
            .get_mut(&RemoteKey::Specific(remote))
            .and_then(|by_name| by_name.get_mut(group_name))
        {
            return Some(f(RemoteKey::Specific(remote), group));
        }
        if let Some(group) = by_remote.get_mut(&RemoteKey::Any).and_then(|by_name| by_name.get_mut(group_name)) {
            return Some(f(RemoteKey::Any, group));
        }
        None
    }

    pub fn with_group_by_key<R>(
        &self,
        local: PublicKey,
        remote: RemoteKey,
        group_name: &str,
        f: impl FnOnce(&mut RoutesGroup) -> R,
    ) -> Option<R> {
        let mut map = self.inner.lock().expect("routes-group map mutex poisoned");
        map.get_mut(&local)?
            .get_mut(&remote)?
            .get_mut(group_name)
            .map(f)
    }

    /// Promotes a catch-all acceptance into a permanent, specific-key group
    /// by cloning the catch-all's policy knobs. Returns `false` if no
    /// catch-all entry exists for `(local, group_name)`.
    pub fn promote_from_catch_all(&self, local: PublicKey, remote: PublicKey, group_name: &str, group: RoutesGroup) {
        self.insert(local, RemoteKey::Specific(remote), group_name, group);
    }

    pub fn remove(&self, local: PublicKey, remote: RemoteKey, group_name: &str) {
        let mut map = self.inner.lock().expect("routes-group map mutex poisoned");
        let Some(by_remote) = map.get_mut(&local) else { return };
        let Some(by_name) = by_remote.get_mut(&remote) else { return };
        by_name.remove(group_name);
        if by_name.is_empty() {
            by_remote.remove(&remote);
        }
        if by_remote.is_empty() {
            map.remove(&local);
        }
    }

    pub fn contains(&self, local: PublicKey, remote: RemoteKey, group_name: &str) -> bool {
        let map = self.inner.lock().expect("routes-group map mutex poisoned");
        map.get(&local)
            .and_then(|by_remote| by_remote.get(&remote))
            .map(|by_name| by_name.contains_key(group_name))
            .unwrap_or(false)
    }

    /// A snapshot of `(local, remote, groupName)` triples, for debug dumps.
    pub fn keys(&self) -> Vec<(PublicKey, RemoteKey, String)> {
        let map = self.inner.lock().expect("routes-group map mutex poisoned");
        map.iter()
            .flat_map(|(local, by_remote)| {
                by_remote.iter().flat_map(move |(remote, by_name)| {
                    by_name.keys().map(move |name| (*local, *remote, name.clone()))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::ReconnectPolicy;
    use std::time::Duration;

    fn group(name: &str) -> RoutesGroup {
        RoutesGroup::new(name, false, false, Duration::from_secs(1), ReconnectPolicy::Fixed(Duration::from_millis(10)))
    }

    #[test]
    fn lookup_falls_back_to_catch_all() {
        let map = ConnectionRoutesGroupMap::new();
        let local = one_crypto::CryptoApi::generate().public_key();
        let remote = one_crypto::CryptoApi::generate().public_key();
        map.insert(local, RemoteKey::Any, "pairing", group("pairing"));

        let found = map.with_group(local, remote, "pairing", |key, _group| key);
        assert_eq!(found, Some(RemoteKey::Any));
    }

    #[test]
    fn specific_entry_takes_precedence_over_catch_all() {
        let map = ConnectionRoutesGroupMap::new();
        let local = one_crypto::CryptoApi::generate().public_key();
        let remote = one_crypto::CryptoApi::generate().public_key();
        map.insert(local, RemoteKey::Any, "pairing", group("pairing"));
        map.insert(local, RemoteKey::Specific(remote), "pairing", group("pairing"));

        let found = map.with_group(local, remote, "pairing", |key, _group| key);
        assert_eq!(found, Some(RemoteKey::Specific(remote)));
    }

    #[test]
    fn removing_the_last_group_collapses_empty_parents() {
        let map = ConnectionRoutesGroupMap::new();
        let local = one_crypto::CryptoApi::generate().public_key();
        let remote = one_crypto::CryptoApi::generate().public_key();
        map.insert(local, RemoteKey::Specific(remote), "pairing", group("pairing"));
        map.remove(local, RemoteKey::Specific(remote), "pairing");

        assert!(map.keys().is_empty());
        assert!(!map.contains(local, RemoteKey::Specific(remote), "pairing"));
    }
}
