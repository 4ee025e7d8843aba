//! Per-type and per-domain counters kept alongside the buffer.
//!
//! These live behind their own mutex so that readers holding the
//! buffer's shared lock can still account for what they observed.

use crate::log_entry::{LOG_TYPE_MAX, LogType};
use std::collections::HashMap;

/// Domains tracked individually.  Records of further domains only count
/// towards their type.
pub const MAX_DOMAIN_STATS: usize = 4096;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsInfo {
    /// Lines accepted into the buffer.
    pub lines: u64,
    /// Bytes accepted into the buffer.
    pub len: u64,
    /// Bytes observed by readers.
    pub print_len: u64,
    /// Bytes currently held in the buffer.
    pub cache_len: u64,
    /// Lines dropped by flow control.
    pub dropped: u64,
}

impl StatsInfo {
    fn clear(&mut self) {
        *self = StatsInfo {
            cache_len: self.cache_len,
            ..StatsInfo::default()
        };
    }
}

#[derive(Debug, Default)]
pub(crate) struct Statistics {
    by_type: [StatsInfo; LOG_TYPE_MAX],
    by_domain: HashMap<u32, StatsInfo>,
}

impl Statistics {
    fn domain_entry(&mut self, domain: u32) -> Option<&mut StatsInfo> {
        if self.by_domain.len() >= MAX_DOMAIN_STATS && !self.by_domain.contains_key(&domain) {
            return None;
        }
        Some(self.by_domain.entry(domain).or_default())
    }

    pub(crate) fn on_insert(&mut self, t: LogType, domain: u32, len: usize) {
        let total = &mut self.by_type[t.index()];
        total.lines += 1;
        total.len += len as u64;
        total.cache_len += len as u64;
        if let Some(s) = self.domain_entry(domain) {
            s.lines += 1;
            s.len += len as u64;
            s.cache_len += len as u64;
        }
    }

    pub(crate) fn on_evict(&mut self, t: LogType, domain: u32, len: usize) {
        let s = &mut self.by_type[t.index()];
        s.cache_len = s.cache_len.saturating_sub(len as u64);
        if let Some(s) = self.by_domain.get_mut(&domain) {
            s.cache_len = s.cache_len.saturating_sub(len as u64);
        }
    }

    pub(crate) fn on_observe(&mut self, t: LogType, domain: u32, len: usize) {
        self.by_type[t.index()].print_len += len as u64;
        if let Some(s) = self.domain_entry(domain) {
            s.print_len += len as u64;
        }
    }

    pub(crate) fn on_dropped(&mut self, t: LogType, domain: u32, lines: u64) {
        self.by_type[t.index()].dropped += lines;
        if let Some(s) = self.domain_entry(domain) {
            s.dropped += lines;
        }
    }

    pub(crate) fn by_type(&self, t: LogType) -> StatsInfo {
        self.by_type[t.index()]
    }

    pub(crate) fn by_domain(&self, domain: u32) -> StatsInfo {
        self.by_domain.get(&domain).copied().unwrap_or_default()
    }

    pub(crate) fn clear_type(&mut self, t: LogType) {
        self.by_type[t.index()].clear();
    }

    /// Reset a domain's counters.  A domain with nothing left in the
    /// buffer is forgotten.
    pub(crate) fn clear_domain(&mut self, domain: u32) {
        if let Some(s) = self.by_domain.get_mut(&domain) {
            s.clear();
            if s.cache_len == 0 {
                self.by_domain.remove(&domain);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn domain_count(&self) -> usize {
        self.by_domain.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_evict_observe() {
        let mut s = Statistics::default();
        s.on_insert(LogType::Core, 7, 100);
        s.on_insert(LogType::Core, 7, 50);
        s.on_observe(LogType::Core, 7, 100);
        s.on_evict(LogType::Core, 7, 100);

        let t = s.by_type(LogType::Core);
        assert_eq!(t.lines, 2);
        assert_eq!(t.len, 150);
        assert_eq!(t.print_len, 100);
        assert_eq!(t.cache_len, 50);
        assert_eq!(s.by_domain(7), t);
        assert_eq!(s.by_domain(8), StatsInfo::default());
    }

    #[test]
    fn test_clear_keeps_cache_len() {
        let mut s = Statistics::default();
        s.on_insert(LogType::App, 1, 40);
        s.on_dropped(LogType::App, 1, 3);
        s.clear_type(LogType::App);
        s.clear_domain(1);
        let t = s.by_type(LogType::App);
        assert_eq!(t.lines, 0);
        assert_eq!(t.dropped, 0);
        assert_eq!(t.cache_len, 40);
        assert_eq!(s.by_domain(1).cache_len, 40);
    }

    #[test]
    fn test_domain_map_is_bounded() {
        let mut s = Statistics::default();
        for d in 0..(MAX_DOMAIN_STATS as u32 + 100) {
            s.on_insert(LogType::Core, d, 10);
            s.on_observe(LogType::Core, d, 10);
        }
        assert_eq!(s.domain_count(), MAX_DOMAIN_STATS);
        assert_eq!(s.by_type(LogType::Core).lines, MAX_DOMAIN_STATS as u64 + 100);
        assert_eq!(s.by_domain(MAX_DOMAIN_STATS as u32 + 1), StatsInfo::default());

        s.on_evict(LogType::Core, 0, 10);
        s.clear_domain(0);
        s.clear_domain(1);
        assert_eq!(s.domain_count(), MAX_DOMAIN_STATS - 1);
        assert_eq!(s.by_domain(1).cache_len, 10);

        s.on_insert(LogType::Core, 0xFFFF_0000, 10);
        assert_eq!(s.by_domain(0xFFFF_0000).lines, 1);
    }
}
