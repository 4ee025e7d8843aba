//! System property access.
//!
//! The daemon reads its runtime switches and level thresholds from a
//! key/value store.  [`PropertyStore`] is the narrow get/set seam; the
//! daemon uses [`MemoryPropertyStore`] seeded from a parameter file.
//!
//! [`Properties`] is the typed view on top.  Level lookups happen for
//! every incoming record, so they are cached: a shared lock checks the
//! cache, and only a miss takes the exclusive lock, checks again, and reads
//! through to the store.

use crate::error::LogError;
use crate::lock_ext::RwLockExt;
use crate::log_entry::{LogLevel, LogType};
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub const KEY_GLOBAL_LEVEL: &str = "hilog.loggable.global";
pub const KEY_DOMAIN_LEVEL_PREFIX: &str = "hilog.loggable.domain.";
pub const KEY_TAG_LEVEL_PREFIX: &str = "hilog.loggable.tag.";
pub const KEY_DEBUG: &str = "hilog.debug.on";
pub const KEY_FLOWCTRL_PROCESS: &str = "hilog.flowctrl.proc.on";
pub const KEY_FLOWCTRL_DOMAIN: &str = "hilog.flowctrl.domain.on";
pub const KEY_KMSG: &str = "hilog.kmsg.on";
pub const KEY_BUFFER_SIZE_PREFIX: &str = "hilog.buffersize.";

pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), LogError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` lines; `#` starts a comment line.
    pub fn parse(text: &str) -> Self {
        let store = MemoryPropertyStore::new();
        {
            let mut values = store.values.write_poisoned();
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match line.split_once('=') {
                    Some((k, v)) => {
                        values.insert(k.trim().to_string(), v.trim().to_string());
                    }
                    None => log::warn!("Ignoring malformed parameter line: {}", line),
                }
            }
        }
        store
    }

    pub fn load_file(path: &Path) -> Result<Self, LogError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn len(&self) -> usize {
        self.values.read_poisoned().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read_poisoned().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LogError> {
        self.values
            .write_poisoned()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Typed view
// ---------------------------------------------------------------------------

fn parse_switch(value: &str) -> Result<bool, LogError> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(LogError::InvalidSwitchValue),
    }
}

/// Read-through cache with double-checked insertion.
struct LevelCache<K> {
    map: RwLock<HashMap<K, Option<LogLevel>>>,
}

impl<K: Eq + Hash + Clone> LevelCache<K> {
    fn new() -> Self {
        LevelCache {
            map: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_load(&self, key: &K, load: impl FnOnce() -> Option<LogLevel>) -> Option<LogLevel> {
        if let Some(level) = self.map.read_poisoned().get(key) {
            return *level;
        }
        let mut map = self.map.write_poisoned();
        if let Some(level) = map.get(key) {
            return *level;
        }
        let level = load();
        map.insert(key.clone(), level);
        level
    }

    fn put(&self, key: K, level: Option<LogLevel>) {
        self.map.write_poisoned().insert(key, level);
    }
}

pub struct Properties {
    store: Arc<dyn PropertyStore>,
    global: LevelCache<()>,
    domains: LevelCache<u32>,
    tags: LevelCache<String>,
}

impl Properties {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Properties {
            store,
            global: LevelCache::new(),
            domains: LevelCache::new(),
            tags: LevelCache::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PropertyStore> {
        &self.store
    }

    fn level_of(&self, key: &str) -> Option<LogLevel> {
        self.store.get(key).and_then(|v| LogLevel::parse(&v))
    }

    fn switch(&self, key: &str, default: bool) -> bool {
        match self.store.get(key) {
            Some(v) => parse_switch(&v).unwrap_or_else(|_| {
                log::warn!("Invalid switch value {:?} for {}", v, key);
                default
            }),
            None => default,
        }
    }

    fn set_switch(&self, key: &str, on: bool) -> Result<(), LogError> {
        self.store.set(key, if on { "true" } else { "false" })
    }

    // -- levels --------------------------------------------------------

    pub fn global_level(&self) -> Option<LogLevel> {
        self.global
            .get_or_load(&(), || self.level_of(KEY_GLOBAL_LEVEL))
    }

    pub fn domain_level(&self, domain: u32) -> Option<LogLevel> {
        self.domains.get_or_load(&domain, || {
            self.level_of(&format!("{}{:x}", KEY_DOMAIN_LEVEL_PREFIX, domain))
        })
    }

    pub fn tag_level(&self, tag: &str) -> Option<LogLevel> {
        self.tags.get_or_load(&tag.to_string(), || {
            self.level_of(&format!("{}{}", KEY_TAG_LEVEL_PREFIX, tag))
        })
    }

    pub fn set_global_level(&self, level: LogLevel) -> Result<(), LogError> {
        self.store
            .set(KEY_GLOBAL_LEVEL, &level.letter().to_string())?;
        self.global.put((), Some(level));
        Ok(())
    }

    pub fn set_domain_level(&self, domain: u32, level: LogLevel) -> Result<(), LogError> {
        self.store.set(
            &format!("{}{:x}", KEY_DOMAIN_LEVEL_PREFIX, domain),
            &level.letter().to_string(),
        )?;
        self.domains.put(domain, Some(level));
        Ok(())
    }

    pub fn set_tag_level(&self, tag: &str, level: LogLevel) -> Result<(), LogError> {
        self.store.set(
            &format!("{}{}", KEY_TAG_LEVEL_PREFIX, tag),
            &level.letter().to_string(),
        )?;
        self.tags.put(tag.to_string(), Some(level));
        Ok(())
    }

    /// Whether a record at `level` should be kept.  The most specific
    /// configured threshold wins: tag, then domain, then global.
    pub fn is_loggable(&self, domain: u32, tag: &str, level: LogLevel) -> bool {
        let threshold = self
            .tag_level(tag)
            .or_else(|| self.domain_level(domain))
            .or_else(|| self.global_level())
            .unwrap_or(LogLevel::Debug);
        level >= threshold
    }

    // -- switches ------------------------------------------------------

    pub fn is_debug_on(&self) -> bool {
        self.switch(KEY_DEBUG, false)
    }

    pub fn is_process_flowctrl_on(&self) -> bool {
        self.switch(KEY_FLOWCTRL_PROCESS, true)
    }

    pub fn is_domain_flowctrl_on(&self) -> bool {
        self.switch(KEY_FLOWCTRL_DOMAIN, false)
    }

    pub fn is_kmsg_on(&self) -> bool {
        self.switch(KEY_KMSG, true)
    }

    pub fn set_debug(&self, on: bool) -> Result<(), LogError> {
        self.set_switch(KEY_DEBUG, on)
    }

    pub fn set_process_flowctrl(&self, on: bool) -> Result<(), LogError> {
        self.set_switch(KEY_FLOWCTRL_PROCESS, on)
    }

    pub fn set_domain_flowctrl(&self, on: bool) -> Result<(), LogError> {
        self.set_switch(KEY_FLOWCTRL_DOMAIN, on)
    }

    pub fn set_kmsg(&self, on: bool) -> Result<(), LogError> {
        self.set_switch(KEY_KMSG, on)
    }

    // -- buffer sizes --------------------------------------------------

    pub fn buffer_size(&self, t: LogType) -> Option<usize> {
        let key = format!("{}{}", KEY_BUFFER_SIZE_PREFIX, t.name());
        let value = self.store.get(&key)?;
        match crate::config::parse_size(&value) {
            Some(n) => Some(n as usize),
            None => {
                log::warn!("Invalid buffer size {:?} for {}", value, key);
                None
            }
        }
    }

    pub fn set_buffer_size(&self, t: LogType, size: usize) -> Result<(), LogError> {
        self.store.set(
            &format!("{}{}", KEY_BUFFER_SIZE_PREFIX, t.name()),
            &size.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(text: &str) -> Properties {
        Properties::new(Arc::new(MemoryPropertyStore::parse(text)))
    }

    #[test]
    fn test_parse_store() {
        let s = MemoryPropertyStore::parse("# c\na = 1\nb=two\n\nbroken\n");
        assert_eq!(s.get("a").as_deref(), Some("1"));
        assert_eq!(s.get("b").as_deref(), Some("two"));
        assert_eq!(s.len(), 2);
        s.set("c", "3").unwrap();
        assert_eq!(s.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_loggable_defaults_to_debug() {
        let p = props("");
        assert!(p.is_loggable(0xD001100, "T", LogLevel::Debug));
    }

    #[test]
    fn test_loggable_precedence() {
        let p = props(
            "hilog.loggable.global=E\n\
             hilog.loggable.domain.d001100=W\n\
             hilog.loggable.tag.chatty=D\n",
        );
        assert!(!p.is_loggable(0xD002200, "x", LogLevel::Warn));
        assert!(p.is_loggable(0xD002200, "x", LogLevel::Error));
        assert!(p.is_loggable(0xD001100, "x", LogLevel::Warn));
        assert!(!p.is_loggable(0xD001100, "x", LogLevel::Info));
        assert!(p.is_loggable(0xD001100, "chatty", LogLevel::Debug));
    }

    #[test]
    fn test_set_level_updates_cache() {
        let p = props("");
        assert!(p.is_loggable(1, "t", LogLevel::Info));
        p.set_global_level(LogLevel::Error).unwrap();
        assert!(!p.is_loggable(1, "t", LogLevel::Info));
        p.set_domain_level(1, LogLevel::Info).unwrap();
        assert!(p.is_loggable(1, "t", LogLevel::Info));
        p.set_tag_level("t", LogLevel::Fatal).unwrap();
        assert!(!p.is_loggable(1, "t", LogLevel::Error));
        assert_eq!(
            p.store().get("hilog.loggable.tag.t").as_deref(),
            Some("F")
        );
    }

    #[test]
    fn test_switches() {
        let p = props("hilog.debug.on=on\nhilog.kmsg.on=garbage\n");
        assert!(p.is_debug_on());
        assert!(p.is_kmsg_on());
        assert!(p.is_process_flowctrl_on());
        assert!(!p.is_domain_flowctrl_on());
        p.set_process_flowctrl(false).unwrap();
        assert!(!p.is_process_flowctrl_on());
        assert_eq!(parse_switch("maybe"), Err(LogError::InvalidSwitchValue));
    }

    #[test]
    fn test_buffer_size() {
        let p = props("hilog.buffersize.core=512K\nhilog.buffersize.app=bogus\n");
        assert_eq!(p.buffer_size(LogType::Core), Some(512 * 1024));
        assert_eq!(p.buffer_size(LogType::App), None);
        assert_eq!(p.buffer_size(LogType::Init), None);
        p.set_buffer_size(LogType::Init, 65536).unwrap();
        assert_eq!(p.buffer_size(LogType::Init), Some(65536));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params");
        fs::write(&path, "hilog.debug.on=true\n").unwrap();
        let s = MemoryPropertyStore::load_file(&path).unwrap();
        assert_eq!(s.get(KEY_DEBUG).as_deref(), Some("true"));
        assert_eq!(
            MemoryPropertyStore::load_file(&dir.path().join("missing")).err(),
            Some(LogError::PersistFilePathInvalid)
        );
    }
}
