use super::error::{Result, RouteError};
use scn_types::Cookie;
use std::collections::BTreeSet;

/// Wrapping cookie allocator.
///
/// Scans forward from the last issued cookie, skipping live ones, so a
/// released cookie is not reissued until the counter comes back round.
#[derive(Debug, Clone)]
pub struct CookieAllocator {
    last: Cookie,
    live: BTreeSet<Cookie>,
}

impl CookieAllocator {
    pub fn new() -> Self {
        Self {
            last: Cookie::MAX,
            live: BTreeSet::new(),
        }
    }

    pub fn allocate(&mut self) -> Result<Cookie> {
        if self.live.len() >= Cookie::SPACE {
            return Err(RouteError::CookieExhausted);
        }

        let mut candidate = self.last.next_wrapping();
        while self.live.contains(&candidate) {
            candidate = candidate.next_wrapping();
        }

        self.last = candidate;
        self.live.insert(candidate);
        Ok(candidate)
    }

    /// Returns false if the cookie was not live.
    pub fn release(&mut self, cookie: Cookie) -> bool {
        self.live.remove(&cookie)
    }

    pub fn is_live(&self, cookie: Cookie) -> bool {
        self.live.contains(&cookie)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for CookieAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cookie(v: u16) -> Cookie {
        Cookie::new(v).unwrap()
    }

    #[test]
    fn test_first_cookie_is_one() {
        let mut alloc = CookieAllocator::new();
        assert_eq!(alloc.allocate().unwrap(), cookie(1));
        assert_eq!(alloc.allocate().unwrap(), cookie(2));
    }

    #[test]
    fn test_released_cookie_not_reused_immediately() {
        let mut alloc = CookieAllocator::new();
        let a = alloc.allocate().unwrap();
        assert!(alloc.release(a));
        assert!(!alloc.release(a));
        assert_eq!(alloc.allocate().unwrap(), cookie(2));
    }

    #[test]
    fn test_wrap_skips_live_and_exhausts() {
        let mut alloc = CookieAllocator::new();
        for expected in 1..=u16::MAX {
            assert_eq!(alloc.allocate().unwrap().get(), expected);
        }
        assert_eq!(alloc.live_count(), Cookie::SPACE);
        assert!(matches!(alloc.allocate(), Err(RouteError::CookieExhausted)));

        alloc.release(cookie(7));
        alloc.release(cookie(3));
        assert_eq!(alloc.allocate().unwrap(), cookie(3));
        assert_eq!(alloc.allocate().unwrap(), cookie(7));
        assert!(alloc.allocate().is_err());
    }
}
