use crate::topology::{Link, LinkKey};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkLoad {
    /// Measured bytes/s.
    pub used: f64,
    /// Capacity in bytes/s.
    pub capacity: f64,
}

impl LinkLoad {
    pub fn free(&self) -> f64 {
        self.capacity - self.used
    }
}

/// Working copy of per-link usage for one balancing cycle.
///
/// Taken from telemetry at the start of the cycle and adjusted as flows are
/// moved, so later decisions in the same cycle see earlier moves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkLoads {
    loads: BTreeMap<LinkKey, LinkLoad>,
}

impl LinkLoads {
    pub fn from_links(links: &[Link]) -> Self {
        let loads = links
            .iter()
            .filter(|l| !l.key().is_local())
            .map(|l| {
                (
                    l.key(),
                    LinkLoad {
                        used: l.used_bytes(),
                        capacity: l.capacity_bytes(),
                    },
                )
            })
            .collect();
        Self { loads }
    }

    pub fn get(&self, key: &LinkKey) -> Option<&LinkLoad> {
        self.loads.get(key)
    }

    /// Measured usage, zero for unknown links.
    pub fn used(&self, key: &LinkKey) -> f64 {
        self.loads.get(key).map(|l| l.used).unwrap_or(0.0)
    }

    /// Shifts `delta` bytes/s onto (or off) a link. Usage never drops below
    /// zero.
    pub fn add(&mut self, key: &LinkKey, delta: f64) {
        if let Some(load) = self.loads.get_mut(key) {
            load.used = (load.used + delta).max(0.0);
        }
    }

    /// Moves `bw` from the links of `from` to those of `to`.
    pub fn shift<'a>(
        &mut self,
        from: impl IntoIterator<Item = &'a LinkKey>,
        to: impl IntoIterator<Item = &'a LinkKey>,
        bw: f64,
    ) {
        for key in from {
            self.add(key, -bw);
        }
        for key in to {
            self.add(key, bw);
        }
    }

    /// Mean usage over the fabric links of `via`; zero for an empty via.
    pub fn mean_used<'a>(&self, via: impl IntoIterator<Item = &'a LinkKey>) -> f64 {
        let (total, count) = via
            .into_iter()
            .filter(|k| !k.is_local())
            .fold((0.0, 0usize), |(total, count), key| (total + self.used(key), count + 1));
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Usage per link, in the shape the graph builder takes.
    pub fn used_map(&self) -> BTreeMap<LinkKey, f64> {
        self.loads.iter().map(|(k, l)| (*k, l.used)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scn_types::{PortRef, StatUnit};

    fn key(a: u64, b: u64) -> LinkKey {
        LinkKey::new(PortRef::new(a, 1), PortRef::new(b, 1))
    }

    fn loads() -> LinkLoads {
        let mut ab = Link::new(PortRef::new(1, 1), PortRef::new(2, 1), 1_000.0, StatUnit::Byte);
        ab.used_bw = 600.0;
        let mut bc = Link::new(PortRef::new(2, 1), PortRef::new(3, 1), 8_000.0, StatUnit::Bit);
        bc.used_bw = 1_600.0;
        LinkLoads::from_links(&[ab, bc])
    }

    #[test]
    fn test_from_links_normalises_units() {
        let loads = loads();
        assert_eq!(
            loads.get(&key(2, 3)),
            Some(&LinkLoad {
                used: 200.0,
                capacity: 1_000.0
            })
        );
        assert_eq!(loads.get(&key(2, 3)).map(LinkLoad::free), Some(800.0));
    }

    #[test]
    fn test_mean_and_shift() {
        let mut loads = loads();
        assert_eq!(loads.mean_used(&[key(1, 2), key(2, 3)]), 400.0);
        assert_eq!(loads.mean_used(Vec::<LinkKey>::new().iter()), 0.0);

        loads.shift(&[key(1, 2)], &[key(2, 3)], 300.0);
        assert_eq!(loads.used(&key(1, 2)), 300.0);
        assert_eq!(loads.used(&key(2, 3)), 500.0);

        loads.add(&key(1, 2), -1_000.0);
        assert_eq!(loads.used(&key(1, 2)), 0.0);

        // Unknown links are ignored.
        loads.add(&key(7, 8), 10.0);
        assert_eq!(loads.used(&key(7, 8)), 0.0);
    }
}
