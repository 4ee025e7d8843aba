//! Log record data model.
//!
//! A [`LogEntry`] is one record as stored in the buffer: the fixed
//! metadata every producer sends (type, level, pid, tid, domain,
//! timestamps) plus a short tag and the message content.  Content may
//! contain embedded newlines; [`LogEntry::format_lines`] splits it into
//! one display line per source line.

use crate::error::LogError;
use chrono::{Local, TimeZone};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound on an encoded record (header + tag + content).
pub const MAX_LOG_LEN: usize = 1024;

/// Upper bound on the tag, terminating NUL included.
pub const MAX_TAG_LEN: usize = 32;

/// Size of the fixed record header on the wire and in length accounting.
pub const RECORD_HEADER_LEN: usize = 28;

// ---------------------------------------------------------------------------
// Log type
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogType {
    App = 0,
    Init = 1,
    Core = 3,
    Kmsg = 4,
    OnlyPrerelease = 5,
}

/// Number of slots needed for arrays indexed by `LogType as usize`.
pub const LOG_TYPE_MAX: usize = 6;

impl LogType {
    pub const ALL: [LogType; 5] = [
        LogType::App,
        LogType::Init,
        LogType::Core,
        LogType::Kmsg,
        LogType::OnlyPrerelease,
    ];

    pub fn from_u8(v: u8) -> Option<LogType> {
        match v {
            0 => Some(LogType::App),
            1 => Some(LogType::Init),
            3 => Some(LogType::Core),
            4 => Some(LogType::Kmsg),
            5 => Some(LogType::OnlyPrerelease),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit of this type inside a type mask.
    pub fn mask(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(self) -> &'static str {
        match self {
            LogType::App => "app",
            LogType::Init => "init",
            LogType::Core => "core",
            LogType::Kmsg => "kmsg",
            LogType::OnlyPrerelease => "only_prerelease",
        }
    }

    pub fn from_name(s: &str) -> Option<LogType> {
        LogType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
    }

    /// Single-letter prefix used in front of the domain when formatting.
    fn letter(self) -> char {
        match self {
            LogType::App => 'A',
            LogType::Init => 'I',
            LogType::Core => 'C',
            LogType::Kmsg => 'K',
            LogType::OnlyPrerelease => 'P',
        }
    }

    /// All types set in `mask`.
    pub fn from_mask(mask: u16) -> Vec<LogType> {
        LogType::ALL
            .into_iter()
            .filter(|t| mask & t.mask() != 0)
            .collect()
    }
}

impl TryFrom<u8> for LogType {
    type Error = LogError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        LogType::from_u8(v).ok_or(LogError::InvalidLogType)
    }
}

/// Mask with every valid type bit set.
pub fn all_types_mask() -> u16 {
    LogType::ALL.iter().fold(0, |m, t| m | t.mask())
}

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 3,
    Info = 4,
    Warn = 5,
    Error = 6,
    Fatal = 7,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    pub fn from_u8(v: u8) -> Option<LogLevel> {
        match v {
            3 => Some(LogLevel::Debug),
            4 => Some(LogLevel::Info),
            5 => Some(LogLevel::Warn),
            6 => Some(LogLevel::Error),
            7 => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }

    pub fn letter(self) -> char {
        match self {
            LogLevel::Debug => 'D',
            LogLevel::Info => 'I',
            LogLevel::Warn => 'W',
            LogLevel::Error => 'E',
            LogLevel::Fatal => 'F',
        }
    }

    /// Parse a level from its letter or full name (`D`, `debug`, `4`, ...).
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "d" | "debug" | "3" => Some(LogLevel::Debug),
            "i" | "info" | "4" => Some(LogLevel::Info),
            "w" | "warn" | "warning" | "5" => Some(LogLevel::Warn),
            "e" | "error" | "6" => Some(LogLevel::Error),
            "f" | "fatal" | "7" => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Map a syslog priority (0=emerg .. 7=debug) to a level.
    pub fn from_syslog_priority(pri: u8) -> LogLevel {
        match pri {
            0..=2 => LogLevel::Fatal,
            3 => LogLevel::Error,
            4 => LogLevel::Warn,
            5 | 6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

/// Mask with every valid level bit set.
pub fn all_levels_mask() -> u8 {
    LogLevel::ALL.iter().fold(0, |m, l| m | l.mask())
}

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub log_type: LogType,
    pub level: LogLevel,
    pub pid: u32,
    pub tid: u32,
    /// 32-bit subsystem identifier.
    pub domain: u32,
    /// Realtime seconds.
    pub tv_sec: u32,
    /// Realtime nanoseconds.
    pub tv_nsec: u32,
    /// Monotonic seconds since boot.
    pub mono_sec: u32,
    pub tag: String,
    pub content: String,
}

impl LogEntry {
    /// Create an entry stamped with the current wall clock.
    pub fn new(
        log_type: LogType,
        level: LogLevel,
        domain: u32,
        tag: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        LogEntry {
            log_type,
            level,
            pid: std::process::id(),
            tid: 0,
            domain,
            tv_sec: now.as_secs() as u32,
            tv_nsec: now.subsec_nanos(),
            mono_sec: monotonic_sec_now(),
            tag: tag.into(),
            content: content.into(),
        }
    }

    /// Encoded length: header, tag and content, each string NUL-terminated.
    pub fn len(&self) -> usize {
        RECORD_HEADER_LEN + self.tag.len() + 1 + self.content.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether tag and total length are within protocol limits.
    pub fn is_valid(&self) -> bool {
        self.tag.len() < MAX_TAG_LEN && self.len() <= MAX_LOG_LEN
    }

    /// Render the entry as display text, one line per line of content,
    /// each terminated by `\n` and carrying the full prefix.
    pub fn format_lines(&self) -> String {
        let prefix = self.format_prefix();
        let mut out = String::with_capacity(self.content.len() + prefix.len() + 2);
        for line in self.content.split('\n') {
            out.push_str(&prefix);
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn format_prefix(&self) -> String {
        let time = Local
            .timestamp_opt(self.tv_sec as i64, self.tv_nsec)
            .single()
            .map(|t| t.format("%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "00-00 00:00:00".to_string());
        format!(
            "{}.{:03} {:>5} {:>5} {} {}{:05x}/{}: ",
            time,
            self.tv_nsec / 1_000_000,
            self.pid,
            self.tid,
            self.level.letter(),
            self.log_type.letter(),
            self.domain & 0xFFFFF,
            self.tag
        )
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_lines().trim_end_matches('\n'))
    }
}

/// Monotonic clock in whole seconds.
pub fn monotonic_sec_now() -> u32 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u32
}
