//! Query conditions and the record matching rule.

use crate::error::LogError;
use crate::log_entry::{LogEntry, LogType, all_levels_mask, all_types_mask};

/// Filter domains at or above this value must match a record exactly.
pub const DOMAIN_STRICT_MASK: u32 = 0xD00_0000;
/// Filter domains at or below this value match the record's domain with
/// the module byte shifted off.
pub const DOMAIN_FUZZY_MASK: u32 = 0xD_FFFF;
pub const DOMAIN_MODULE_BITS: u32 = 8;

pub const MAX_PIDS: usize = 5;
pub const MAX_DOMAINS: usize = 5;
pub const MAX_TAGS: usize = 10;

/// What a reader wants to see.  Masks are `1 << LogType` and
/// `1 << LogLevel`; empty lists mean "any".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryCondition {
    pub types: u16,
    pub levels: u8,
    pub pids: Vec<u32>,
    pub domains: Vec<u32>,
    pub tags: Vec<String>,

    pub no_types: u16,
    pub no_levels: u8,
    pub no_pids: Vec<u32>,
    pub no_domains: Vec<u32>,
    pub no_tags: Vec<String>,
}

impl QueryCondition {
    /// Everything except kernel messages, which live in their own queue.
    pub fn all() -> Self {
        QueryCondition {
            types: all_types_mask() & !LogType::Kmsg.mask(),
            levels: all_levels_mask(),
            ..Default::default()
        }
    }

    pub fn with_types(types: u16, levels: u8) -> Self {
        QueryCondition {
            types,
            levels,
            ..Default::default()
        }
    }

    /// Whether a reader with this condition consumes the kernel queue.
    pub fn wants_kmsg_queue(&self) -> bool {
        self.types == LogType::Kmsg.mask()
    }

    pub fn validate(&self) -> Result<(), LogError> {
        if self.types & !all_types_mask() != 0 || self.no_types & !all_types_mask() != 0 {
            return Err(LogError::InvalidLogType);
        }
        if self.levels & !all_levels_mask() != 0 || self.no_levels & !all_levels_mask() != 0 {
            return Err(LogError::InvalidLogLevel);
        }
        if self.pids.len() > MAX_PIDS || self.no_pids.len() > MAX_PIDS {
            return Err(LogError::InvalidPid);
        }
        if self.domains.len() > MAX_DOMAINS || self.no_domains.len() > MAX_DOMAINS {
            return Err(LogError::InvalidDomain);
        }
        if self.tags.len() > MAX_TAGS || self.no_tags.len() > MAX_TAGS {
            return Err(LogError::InvalidTag);
        }
        Ok(())
    }
}

fn domain_matches(filter: u32, domain: u32) -> bool {
    if filter >= DOMAIN_STRICT_MASK {
        filter == domain
    } else if filter <= DOMAIN_FUZZY_MASK {
        filter == domain >> DOMAIN_MODULE_BITS
    } else {
        false
    }
}

/// Decide whether `entry` passes `filter`.
///
/// Inclusions are evaluated first, then exclusions; an exclusion always
/// wins over a matching inclusion.
pub fn log_match_filter(filter: &QueryCondition, entry: &LogEntry) -> bool {
    if filter.types & entry.log_type.mask() == 0 || filter.levels & entry.level.mask() == 0 {
        return false;
    }
    if !filter.pids.is_empty() && !filter.pids.contains(&entry.pid) {
        return false;
    }
    if !filter.domains.is_empty()
        && !filter.domains.iter().any(|&d| domain_matches(d, entry.domain))
    {
        return false;
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| *t == entry.tag) {
        return false;
    }

    if filter.no_pids.contains(&entry.pid) {
        return false;
    }
    if filter
        .no_domains
        .iter()
        .any(|&d| domain_matches(d, entry.domain))
    {
        return false;
    }
    if filter.no_tags.iter().any(|t| *t == entry.tag) {
        return false;
    }
    if filter.no_types & entry.log_type.mask() != 0 || filter.no_levels & entry.level.mask() != 0 {
        return false;
    }
    true
}
