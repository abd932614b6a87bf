//! Flow-table slots shared between routes.
//!
//! A switch keys its entries by priority and match. Routes towards one
//! destination, mesh routes in particular, often program the same slot on
//! the switches they have in common. The first route to take a slot
//! installs the entry; a later route needing an identical entry joins its
//! holders, and the entry leaves the switch together with its last holder.

use scn_openflow::{FlowEntry, FlowMatch};
use scn_types::{Cookie, Dpid};
use std::collections::{BTreeSet, HashMap};

type SlotKey = (Dpid, u16, FlowMatch);

fn slot_key(dpid: Dpid, entry: &FlowEntry) -> SlotKey {
    (dpid, entry.priority, entry.matches.clone())
}

#[derive(Debug, Clone)]
struct SlotHold {
    /// The entry as it sits on the switch.
    installed: FlowEntry,
    holders: BTreeSet<Cookie>,
}

/// What taking a slot requires from the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The slot is free, or held only by the claiming route.
    Install,
    /// An identical entry is already installed.
    Join,
    /// Another route holds the slot with a different entry.
    Conflict(Cookie),
}

/// What releasing a slot requires from the switch.
#[derive(Debug, Clone, PartialEq)]
pub enum Release {
    Remove,
    /// Other holders remain; the entry carried the leaving cookie and is
    /// reinstalled under this one.
    Restamp(FlowEntry),
    Keep,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: HashMap<SlotKey, SlotHold>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn check(&self, dpid: Dpid, entry: &FlowEntry, cookie: Cookie) -> Claim {
        let Some(hold) = self.slots.get(&slot_key(dpid, entry)) else {
            return Claim::Install;
        };
        match hold.holders.iter().find(|c| **c != cookie) {
            None => Claim::Install,
            Some(_) if hold.installed.same_behaviour(entry) => Claim::Join,
            Some(other) => Claim::Conflict(*other),
        }
    }

    /// Records `cookie` as a holder after a successful [`check`](Self::check).
    pub fn hold(&mut self, dpid: Dpid, entry: &FlowEntry, cookie: Cookie) {
        let hold = self.slots.entry(slot_key(dpid, entry)).or_insert_with(|| SlotHold {
            installed: entry.clone(),
            holders: BTreeSet::new(),
        });
        if hold.holders.iter().all(|c| *c == cookie) {
            hold.installed = entry.clone();
        }
        hold.holders.insert(cookie);
    }

    /// Drops `cookie` from the holders of the slot `entry` sits in.
    ///
    /// A slot nobody recorded is reported as [`Release::Remove`].
    pub fn release(&mut self, dpid: Dpid, entry: &FlowEntry, cookie: Cookie) -> Release {
        let key = slot_key(dpid, entry);
        let Some(hold) = self.slots.get_mut(&key) else {
            return Release::Remove;
        };
        hold.holders.remove(&cookie);

        match hold.holders.first().copied() {
            None => {
                self.slots.remove(&key);
                Release::Remove
            }
            Some(next) if hold.installed.cookie == u64::from(cookie) => {
                hold.installed.cookie = u64::from(next);
                Release::Restamp(hold.installed.clone())
            }
            Some(_) => Release::Keep,
        }
    }

    pub fn is_holder(&self, dpid: Dpid, entry: &FlowEntry, cookie: Cookie) -> bool {
        self.slots
            .get(&slot_key(dpid, entry))
            .is_some_and(|hold| hold.holders.contains(&cookie))
    }

    /// Frees the slot `entry` sits in, returning its former holders.
    pub fn evict(&mut self, dpid: Dpid, entry: &FlowEntry) -> Vec<Cookie> {
        self.slots
            .remove(&slot_key(dpid, entry))
            .map(|hold| hold.holders.into_iter().collect())
            .unwrap_or_default()
    }

    /// Routes holding the slot `entry` sits in on `dpid`.
    pub fn holders(&self, dpid: Dpid, entry: &FlowEntry) -> Vec<Cookie> {
        self.slots
            .get(&slot_key(dpid, entry))
            .map(|hold| hold.holders.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scn_openflow::FlowAction;
    use scn_types::{MacAddress, PortNo};

    fn cookie(v: u16) -> Cookie {
        Cookie::new(v).unwrap()
    }

    fn entry(output: u16, owner: u16) -> FlowEntry {
        let matches = FlowMatch {
            in_port: Some(PortNo(1)),
            dl_dst: Some(MacAddress::new([0, 0, 0, 0, 0, 3])),
            ..Default::default()
        };
        FlowEntry::new(matches, vec![FlowAction::Output(PortNo(output))]).with_cookie(u64::from(owner))
    }

    #[test]
    fn test_identical_entry_is_shared() {
        let mut slots = SlotTable::new();
        assert_eq!(slots.check(Dpid(3), &entry(10, 1), cookie(1)), Claim::Install);
        slots.hold(Dpid(3), &entry(10, 1), cookie(1));

        assert_eq!(slots.check(Dpid(3), &entry(10, 2), cookie(2)), Claim::Join);
        slots.hold(Dpid(3), &entry(10, 2), cookie(2));
        assert_eq!(slots.holders(Dpid(3), &entry(10, 0)), vec![cookie(1), cookie(2)]);

        // Another switch is another slot.
        assert_eq!(slots.check(Dpid(4), &entry(11, 2), cookie(2)), Claim::Install);
    }

    #[test]
    fn test_different_entry_conflicts() {
        let mut slots = SlotTable::new();
        slots.hold(Dpid(3), &entry(10, 1), cookie(1));
        assert_eq!(slots.check(Dpid(3), &entry(11, 2), cookie(2)), Claim::Conflict(cookie(1)));
        // The sole holder may replace its own entry.
        assert_eq!(slots.check(Dpid(3), &entry(11, 1), cookie(1)), Claim::Install);
    }

    #[test]
    fn test_release_restamps_then_removes() {
        let mut slots = SlotTable::new();
        slots.hold(Dpid(3), &entry(10, 1), cookie(1));
        slots.hold(Dpid(3), &entry(10, 2), cookie(2));
        slots.hold(Dpid(3), &entry(10, 3), cookie(3));

        assert_eq!(slots.release(Dpid(3), &entry(10, 3), cookie(3)), Release::Keep);
        assert_eq!(
            slots.release(Dpid(3), &entry(10, 1), cookie(1)),
            Release::Restamp(entry(10, 2))
        );
        assert_eq!(slots.release(Dpid(3), &entry(10, 2), cookie(2)), Release::Remove);
        assert!(slots.is_empty());

        assert_eq!(slots.release(Dpid(3), &entry(10, 2), cookie(2)), Release::Remove);
    }

    #[test]
    fn test_evicted_holder_releases_nothing() {
        let mut slots = SlotTable::new();
        slots.hold(Dpid(3), &entry(10, 1), cookie(1));
        assert_eq!(slots.evict(Dpid(3), &entry(11, 2)), vec![cookie(1)]);
        slots.hold(Dpid(3), &entry(11, 2), cookie(2));

        assert!(!slots.is_holder(Dpid(3), &entry(10, 1), cookie(1)));
        assert_eq!(slots.release(Dpid(3), &entry(10, 1), cookie(1)), Release::Keep);
        assert_eq!(slots.holders(Dpid(3), &entry(11, 0)), vec![cookie(2)]);
    }
}
