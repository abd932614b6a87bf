use scn_openflow::FlowStats;
use scn_types::{Cookie, Dpid, HumanRate};
use std::collections::BTreeMap;
use std::fmt;

/// Counters of one route on one switch and the rate derived from the last
/// two samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentBw {
    pub dpid: Dpid,
    pub packets: u64,
    pub bytes: u64,
    pub duration_sec: u64,
    /// Bytes/s between the previous sample and this one.
    pub bw: f64,
}

impl SegmentBw {
    /// First sample of a segment; no rate can be derived yet.
    pub fn new(dpid: Dpid, stats: &FlowStats) -> Self {
        Self {
            dpid,
            packets: stats.packet_count,
            bytes: stats.byte_count,
            duration_sec: stats.duration_sec,
            bw: 0.0,
        }
    }

    /// Folds in a new sample.
    ///
    /// The rate is forced to zero when the entry was just (re)installed or the
    /// clock did not advance.
    pub fn update(&mut self, stats: &FlowStats) {
        let t = stats.duration_sec;
        self.bw = if t == 0 || t <= self.duration_sec {
            0.0
        } else {
            stats.byte_count.saturating_sub(self.bytes) as f64 / (t - self.duration_sec) as f64
        };
        self.packets = stats.packet_count;
        self.bytes = stats.byte_count;
        self.duration_sec = t;
    }
}

impl fmt::Display for SegmentBw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}|{}>", self.dpid, HumanRate(self.bw))
    }
}

/// Route-level bandwidth: the mean rate over the route's switches.
#[derive(Debug, Clone, PartialEq)]
pub struct ScnFlow {
    pub cookie: Cookie,
    pub bw: f64,
    segments: BTreeMap<Dpid, SegmentBw>,
}

impl ScnFlow {
    pub fn new(cookie: Cookie) -> Self {
        Self {
            cookie,
            bw: 0.0,
            segments: BTreeMap::new(),
        }
    }

    pub fn update(&mut self, dpid: Dpid, stats: &FlowStats) {
        match self.segments.get_mut(&dpid) {
            Some(segment) => segment.update(stats),
            None => {
                self.segments.insert(dpid, SegmentBw::new(dpid, stats));
            }
        }
        self.recompute();
    }

    /// Drops the segments of switches the route no longer crosses.
    pub fn retain_switches(&mut self, keep: impl Fn(Dpid) -> bool) {
        self.segments.retain(|dpid, _| keep(*dpid));
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.segments.is_empty() {
            self.bw = 0.0;
            return;
        }
        let total: f64 = self.segments.values().map(|s| s.bw).sum();
        self.bw = total / self.segments.len() as f64;
    }

    pub fn segment(&self, dpid: Dpid) -> Option<&SegmentBw> {
        self.segments.get(&dpid)
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentBw> {
        self.segments.values()
    }

    /// Packets carried so far, as counted by the busiest switch.
    pub fn packets(&self) -> u64 {
        self.segments.values().map(|s| s.packets).max().unwrap_or(0)
    }

    /// Bytes carried so far, as counted by the busiest switch.
    pub fn bytes(&self) -> u64 {
        self.segments.values().map(|s| s.bytes).max().unwrap_or(0)
    }
}

impl fmt::Display for ScnFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowBw:cookie:{}|bw={}|", self.cookie, HumanRate(self.bw))?;
        for segment in self.segments.values() {
            write!(f, " => {}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stats(bytes: u64, t: u64) -> FlowStats {
        FlowStats::new(1, bytes / 100, bytes, t)
    }

    #[test]
    fn test_segment_rate() {
        let mut seg = SegmentBw::new(Dpid(1), &stats(1_000, 10));
        assert_eq!(seg.bw, 0.0);

        seg.update(&stats(6_000, 15));
        assert_eq!(seg.bw, 1_000.0);
        assert_eq!(seg.bytes, 6_000);
    }

    #[test]
    fn test_segment_stale_samples_are_zero() {
        let mut seg = SegmentBw::new(Dpid(1), &stats(1_000, 10));
        seg.update(&stats(6_000, 15));

        seg.update(&stats(9_000, 15));
        assert_eq!(seg.bw, 0.0);

        // Entry re-installed: counters restart.
        seg.update(&stats(0, 0));
        assert_eq!(seg.bw, 0.0);
        seg.update(&stats(500, 5));
        assert_eq!(seg.bw, 100.0);
    }

    #[test]
    fn test_flow_mean_and_retain() {
        let cookie = Cookie::new(1).unwrap();
        let mut flow = ScnFlow::new(cookie);
        flow.update(Dpid(1), &stats(0, 1));
        flow.update(Dpid(2), &stats(0, 1));
        flow.update(Dpid(1), &stats(2_000, 2));
        flow.update(Dpid(2), &stats(4_000, 2));
        assert_eq!(flow.bw, 3_000.0);
        assert_eq!(flow.bytes(), 4_000);

        flow.retain_switches(|dpid| dpid == Dpid(1));
        assert_eq!(flow.bw, 2_000.0);
        assert!(flow.segment(Dpid(2)).is_none());

        flow.retain_switches(|_| false);
        assert_eq!(flow.bw, 0.0);
    }

    #[test]
    fn test_display_units() {
        let cookie = Cookie::new(7).unwrap();
        let mut flow = ScnFlow::new(cookie);
        flow.update(Dpid(1), &stats(0, 1));
        flow.update(Dpid(1), &stats(2_500_000, 2));

        assert_eq!(
            flow.to_string(),
            "FlowBw:cookie:7|bw=2.500 MB/s| => <00-00-00-00-00-01|2.500 MB/s>"
        );
    }
}
