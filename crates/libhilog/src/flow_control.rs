//! Admission control for incoming records.
//!
//! Two gates share the same one-second window algorithm:
//!
//! - the process gate, one window per producing pid, with a byte quota
//!   looked up by program name (default [`DEFAULT_PROCESS_QUOTA`]);
//! - the domain gate, one window per subsystem id, for the subsystems
//!   listed in the domain quota file.
//!
//! A window admits records while the bytes seen in it stay within the
//! quota; everything past that is dropped and counted.  The first record
//! admitted after a rollover carries the number of lines the previous
//! window(s) dropped, so the collector can insert a single marker.
//!
//! [`FlowControl`] is an owned context built once at startup and shared by
//! reference.  Nothing here is global.

use crate::error::LogError;
use crate::log_entry::{LogEntry, LogType};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

pub const FLOW_WINDOW: Duration = Duration::from_secs(1);
pub const DEFAULT_PROCESS_QUOTA: u64 = 13050;
/// Process windows idle for longer than this are dropped by [`FlowControl::gc`].
pub const FLOW_GC_MAX_AGE: Duration = Duration::from_secs(600);

pub const DEFAULT_PROCESS_QUOTA_FILE: &str = "/system/etc/hilog_process_quota.conf";
pub const DEFAULT_DOMAIN_QUOTA_FILE: &str = "/system/etc/hilog_domain_quota.conf";

const DOMAIN_ID_MASK: u32 = 0x000F_FF00;
const DOMAIN_ID_SHIFT: u32 = 8;

/// Subsystem id used to key domain quotas.
pub fn domain_id(domain: u32) -> u32 {
    (domain & DOMAIN_ID_MASK) >> DOMAIN_ID_SHIFT
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowVerdict {
    /// Store the record.  `dropped` lines were lost in earlier windows and
    /// have not been reported yet.
    Admit { dropped: u64 },
    Drop,
}

impl FlowVerdict {
    fn merge(self, other: FlowVerdict) -> FlowVerdict {
        match (self, other) {
            (FlowVerdict::Admit { dropped: a }, FlowVerdict::Admit { dropped: b }) => {
                FlowVerdict::Admit { dropped: a + b }
            }
            _ => FlowVerdict::Drop,
        }
    }
}

// ---------------------------------------------------------------------------
// Window gate
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WindowGate {
    quota: u64,
    window_start: Option<Instant>,
    sum: u64,
    dropped: u64,
    /// Drops from finished windows waiting for the next admitted record.
    unreported: u64,
}

impl WindowGate {
    pub fn new(quota: u64) -> Self {
        WindowGate {
            quota,
            window_start: None,
            sum: 0,
            dropped: 0,
            unreported: 0,
        }
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Lines dropped so far in the current window.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// True when the current window started more than `max_age` before `now`.
    pub fn idle_at(&self, now: Instant, max_age: Duration) -> bool {
        match self.window_start {
            Some(start) => now.saturating_duration_since(start) >= max_age,
            None => true,
        }
    }

    pub fn check(&mut self, len: usize) -> FlowVerdict {
        self.check_at(len, Instant::now())
    }

    pub fn check_at(&mut self, len: usize, now: Instant) -> FlowVerdict {
        let expired = match self.window_start {
            Some(start) => now.saturating_duration_since(start) >= FLOW_WINDOW,
            None => true,
        };
        if expired {
            self.unreported += self.dropped;
            self.window_start = Some(now);
            self.sum = 0;
            self.dropped = 0;
        }

        self.sum += len as u64;
        if self.sum <= self.quota {
            let dropped = std::mem::take(&mut self.unreported);
            FlowVerdict::Admit { dropped }
        } else {
            self.dropped += 1;
            FlowVerdict::Drop
        }
    }
}

// ---------------------------------------------------------------------------
// Quota files
// ---------------------------------------------------------------------------

fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).ok()
}

/// Parse `<program-name> <bytes-per-second>` lines.
pub fn parse_process_quotas(text: &str) -> HashMap<String, u64> {
    let mut quotas = HashMap::new();
    for line in content_lines(text) {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next().and_then(|q| q.parse().ok())) {
            (Some(name), Some(quota)) => {
                quotas.insert(name.to_string(), quota);
            }
            _ => log::warn!("Ignoring malformed process quota line: {}", line),
        }
    }
    quotas
}

/// Parse `<0xDOMAIN> <name> <bytes-per-second>` lines, keyed by subsystem id.
pub fn parse_domain_quotas(text: &str) -> HashMap<u32, u64> {
    let mut quotas = HashMap::new();
    for line in content_lines(text) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let parsed = match parts.as_slice() {
            [domain, _name, quota] => parse_hex(domain).zip(quota.parse::<u64>().ok()),
            _ => None,
        };
        match parsed {
            Some((domain, quota)) => {
                quotas.insert(domain_id(domain), quota);
            }
            None => log::warn!("Ignoring malformed domain quota line: {}", line),
        }
    }
    quotas
}

fn read_quota_file(path: &Path) -> Result<String, LogError> {
    fs::read_to_string(path).map_err(|e| {
        log::warn!(
            "Failed to open flow control config {}: {}, using defaults",
            path.display(),
            e
        );
        LogError::FlowControlConfigOpenFailed
    })
}

// ---------------------------------------------------------------------------
// FlowControl
// ---------------------------------------------------------------------------

/// Runtime switches read per record from the property store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowSwitches {
    pub process: bool,
    pub domain: bool,
    pub debug: bool,
}

pub struct FlowControl {
    default_quota: u64,
    process_quotas: HashMap<String, u64>,
    /// Per-pid windows, created on first use.
    process_gates: RwLock<HashMap<u32, Mutex<WindowGate>>>,
    /// Per-subsystem windows, fixed after construction.
    domain_gates: HashMap<u32, Mutex<WindowGate>>,
}

impl Default for FlowControl {
    fn default() -> Self {
        FlowControl::new(HashMap::new(), HashMap::new())
    }
}

impl FlowControl {
    pub fn new(process_quotas: HashMap<String, u64>, domain_quotas: HashMap<u32, u64>) -> Self {
        FlowControl {
            default_quota: DEFAULT_PROCESS_QUOTA,
            process_quotas,
            process_gates: RwLock::new(HashMap::new()),
            domain_gates: domain_quotas
                .into_iter()
                .map(|(id, q)| (id, Mutex::new(WindowGate::new(q))))
                .collect(),
        }
    }

    /// Load both quota files.  A missing file leaves that gate on defaults.
    pub fn load(process_file: &Path, domain_file: &Path) -> Self {
        let process = read_quota_file(process_file)
            .map(|t| parse_process_quotas(&t))
            .unwrap_or_default();
        let domain = read_quota_file(domain_file)
            .map(|t| parse_domain_quotas(&t))
            .unwrap_or_default();
        log::info!(
            "Flow control loaded: {} process quotas, {} domain quotas",
            process.len(),
            domain.len()
        );
        FlowControl::new(process, domain)
    }

    pub fn with_default_quota(mut self, quota: u64) -> Self {
        self.default_quota = quota;
        self
    }

    /// Decide whether `entry` may enter the buffer.
    pub fn check(&self, entry: &LogEntry, switches: FlowSwitches) -> FlowVerdict {
        self.check_at(entry, switches, Instant::now())
    }

    pub fn check_at(&self, entry: &LogEntry, switches: FlowSwitches, now: Instant) -> FlowVerdict {
        let admit = FlowVerdict::Admit { dropped: 0 };
        if entry.log_type == LogType::App || switches.debug {
            return admit;
        }
        let len = entry.len();
        let mut verdict = admit;
        if switches.process {
            verdict = verdict.merge(self.check_process(entry.pid, len, now));
        }
        if switches.domain && verdict != FlowVerdict::Drop {
            verdict = verdict.merge(self.check_domain(entry.domain, len, now));
        }
        verdict
    }

    fn check_process(&self, pid: u32, len: usize, now: Instant) -> FlowVerdict {
        {
            let gates = self.process_gates.read();
            if let Some(gate) = gates.get(&pid) {
                return gate.lock().check_at(len, now);
            }
        }
        let quota = self.quota_for_pid(pid);
        let mut gates = self.process_gates.write();
        gates
            .entry(pid)
            .or_insert_with(|| Mutex::new(WindowGate::new(quota)))
            .get_mut()
            .check_at(len, now)
    }

    fn check_domain(&self, domain: u32, len: usize, now: Instant) -> FlowVerdict {
        match self.domain_gates.get(&domain_id(domain)) {
            Some(gate) => gate.lock().check_at(len, now),
            None => FlowVerdict::Admit { dropped: 0 },
        }
    }

    fn quota_for_pid(&self, pid: u32) -> u64 {
        process_name(pid)
            .and_then(|name| self.process_quotas.get(&name).copied())
            .unwrap_or(self.default_quota)
    }

    /// Drop process windows that have been idle for `max_age`.  A pid
    /// seen again later gets a fresh window and a fresh quota lookup.
    pub fn gc(&self, max_age: Duration) -> usize {
        self.gc_at(Instant::now(), max_age)
    }

    pub fn gc_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut gates = self.process_gates.write();
        let before = gates.len();
        gates.retain(|_, gate| !gate.get_mut().idle_at(now, max_age));
        let removed = before - gates.len();
        if removed > 0 {
            log::debug!("Flow control dropped {} idle process windows", removed);
        }
        removed
    }

    pub fn process_gate_count(&self) -> usize {
        self.process_gates.read().len()
    }
}

fn process_name(pid: u32) -> Option<String> {
    fs::read_to_string(format!("/proc/{}/comm", pid))
        .ok()
        .map(|s| s.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_entry::LogLevel;
    use std::io::Write;

    const ON: FlowSwitches = FlowSwitches {
        process: true,
        domain: true,
        debug: false,
    };

    fn core(pid: u32, domain: u32, content: &str) -> LogEntry {
        let mut e = LogEntry::new(LogType::Core, LogLevel::Info, domain, "T", content);
        e.pid = pid;
        e
    }

    #[test]
    fn test_window_rollover_reports_once() {
        let mut gate = WindowGate::new(100);
        let t0 = Instant::now();
        assert_eq!(gate.check_at(60, t0), FlowVerdict::Admit { dropped: 0 });
        assert_eq!(gate.check_at(40, t0), FlowVerdict::Admit { dropped: 0 });
        // quota + 1 bytes in the same window
        assert_eq!(gate.check_at(1, t0), FlowVerdict::Drop);
        assert_eq!(gate.check_at(10, t0), FlowVerdict::Drop);
        assert_eq!(gate.dropped(), 2);

        let t1 = t0 + FLOW_WINDOW;
        assert_eq!(gate.check_at(10, t1), FlowVerdict::Admit { dropped: 2 });
        assert_eq!(gate.check_at(10, t1), FlowVerdict::Admit { dropped: 0 });
    }

    #[test]
    fn test_report_survives_dropped_first_record() {
        let mut gate = WindowGate::new(50);
        let t0 = Instant::now();
        gate.check_at(50, t0);
        assert_eq!(gate.check_at(1, t0), FlowVerdict::Drop);
        let t1 = t0 + FLOW_WINDOW;
        assert_eq!(gate.check_at(80, t1), FlowVerdict::Drop);
        assert_eq!(gate.check_at(10, t1 + FLOW_WINDOW), FlowVerdict::Admit { dropped: 2 });
    }

    #[test]
    fn test_app_and_debug_bypass() {
        let fc = FlowControl::default().with_default_quota(0);
        let mut app = core(1, 0, "x");
        app.log_type = LogType::App;
        assert_eq!(fc.check(&app, ON), FlowVerdict::Admit { dropped: 0 });

        let debug = FlowSwitches { debug: true, ..ON };
        assert_eq!(fc.check(&core(1, 0, "x"), debug), FlowVerdict::Admit { dropped: 0 });
        assert_eq!(fc.check(&core(1, 0, "x"), ON), FlowVerdict::Drop);
    }

    #[test]
    fn test_switches_disable_gates() {
        let fc = FlowControl::default().with_default_quota(0);
        let off = FlowSwitches::default();
        assert_eq!(fc.check(&core(1, 0, "x"), off), FlowVerdict::Admit { dropped: 0 });
    }

    #[test]
    fn test_process_gates_are_per_pid() {
        let fc = FlowControl::default().with_default_quota(100);
        let t0 = Instant::now();
        let e = core(u32::MAX - 1, 0, &"x".repeat(40));
        let len = e.len() as u64;
        let fits = 100 / len;
        for _ in 0..fits {
            assert!(matches!(fc.check_at(&e, ON, t0), FlowVerdict::Admit { .. }));
        }
        assert_eq!(fc.check_at(&e, ON, t0), FlowVerdict::Drop);

        let other = core(u32::MAX - 2, 0, &"x".repeat(40));
        assert!(matches!(fc.check_at(&other, ON, t0), FlowVerdict::Admit { .. }));
    }

    #[test]
    fn test_gc_drops_idle_process_gates() {
        let fc = FlowControl::default();
        let t0 = Instant::now();
        for i in 1..=1000 {
            fc.check_at(&core(u32::MAX - i, 0, "x"), ON, t0);
        }
        assert_eq!(fc.process_gate_count(), 1000);

        let later = t0 + Duration::from_secs(3600);
        let busy = core(u32::MAX - 5000, 0, "x");
        fc.check_at(&busy, ON, later);
        assert_eq!(fc.gc_at(later, FLOW_GC_MAX_AGE), 1000);
        assert_eq!(fc.process_gate_count(), 1);

        assert_eq!(fc.gc_at(later + Duration::from_secs(1), FLOW_GC_MAX_AGE), 0);
        assert_eq!(fc.process_gate_count(), 1);
    }

    #[test]
    fn test_domain_gate() {
        let mut quotas = HashMap::new();
        quotas.insert(domain_id(0xD002D00), 60);
        let fc = FlowControl::new(HashMap::new(), quotas);
        let only_domain = FlowSwitches {
            domain: true,
            ..Default::default()
        };
        let t0 = Instant::now();
        let e = core(1, 0xD002D01, &"x".repeat(20));
        assert!(matches!(fc.check_at(&e, only_domain, t0), FlowVerdict::Admit { .. }));
        assert_eq!(fc.check_at(&e, only_domain, t0), FlowVerdict::Drop);

        // Unlisted subsystems are not limited.
        let free = core(1, 0xD003300, &"x".repeat(20));
        for _ in 0..10 {
            assert!(matches!(fc.check_at(&free, only_domain, t0), FlowVerdict::Admit { .. }));
        }
        assert_eq!(
            fc.check_at(&e, only_domain, t0 + FLOW_WINDOW),
            FlowVerdict::Admit { dropped: 1 }
        );
    }

    #[test]
    fn test_parse_quota_files() {
        let p = parse_process_quotas("# comment\nfoundation 20000\n\nbad\nrender 500\n");
        assert_eq!(p.get("foundation"), Some(&20000));
        assert_eq!(p.get("render"), Some(&500));
        assert_eq!(p.len(), 2);

        let d = parse_domain_quotas("0xD002D00 Ability 3000\n0xD001100 Net 100\nnope\n");
        assert_eq!(d.get(&0x02D), Some(&3000));
        assert_eq!(d.get(&0x011), Some(&100));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_load_missing_files_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let fc = FlowControl::load(&dir.path().join("nope"), &dir.path().join("nope2"));
        assert!(fc.process_quotas.is_empty());
        assert!(fc.domain_gates.is_empty());
        assert_eq!(fc.default_quota, DEFAULT_PROCESS_QUOTA);

        let path = dir.path().join("domain.conf");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "0xD002D00 Ability 3000").unwrap();
        let fc = FlowControl::load(&dir.path().join("nope"), &path);
        assert_eq!(fc.domain_gates.len(), 1);
        assert_eq!(fc.domain_gates[&0x02D].lock().quota(), 3000);
    }
}
