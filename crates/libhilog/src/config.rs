//! Daemon configuration.
//!
//! Read from `/etc/hilogd.conf` plus drop-ins in `/etc/hilogd.conf.d/*.conf`
//! (sorted, later files override earlier ones).  Only the `[Daemon]`
//! section is interpreted; unknown keys are ignored.
//!
//! ```ini
//! [Daemon]
//! BufferSize=256K
//! KmsgBufferSize=128K
//! InputSocket=/dev/unix/socket/hilogInput
//! ControlSocket=/dev/unix/socket/hilogControl
//! PersistMetaDir=/data/log/hilog
//! Kmsg=yes
//! ```

use crate::buffer::DEFAULT_BUFFER_SIZE;
use crate::flow_control::{DEFAULT_DOMAIN_QUOTA_FILE, DEFAULT_PROCESS_QUOTA_FILE};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hilogd.conf";
pub const INPUT_SOCKET_NAME: &str = "hilogInput";
pub const CONTROL_SOCKET_NAME: &str = "hilogControl";
const DEFAULT_SOCKET_DIR: &str = "/dev/unix/socket";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Capacity for each non-kernel log type.
    pub buffer_size: u64,
    /// Capacity for kernel messages.
    pub kmsg_buffer_size: u64,
    pub input_socket: PathBuf,
    pub control_socket: PathBuf,
    /// Where persist jobs keep their staging and recovery files.
    pub persist_meta_dir: PathBuf,
    pub process_quota_file: PathBuf,
    pub domain_quota_file: PathBuf,
    /// `key=value` defaults loaded into the property store.
    pub parameter_file: PathBuf,
    pub kmsg: bool,
    pub kmsg_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            buffer_size: DEFAULT_BUFFER_SIZE as u64,
            kmsg_buffer_size: DEFAULT_BUFFER_SIZE as u64,
            input_socket: Path::new(DEFAULT_SOCKET_DIR).join(INPUT_SOCKET_NAME),
            control_socket: Path::new(DEFAULT_SOCKET_DIR).join(CONTROL_SOCKET_NAME),
            persist_meta_dir: PathBuf::from("/data/log/hilog"),
            process_quota_file: PathBuf::from(DEFAULT_PROCESS_QUOTA_FILE),
            domain_quota_file: PathBuf::from(DEFAULT_DOMAIN_QUOTA_FILE),
            parameter_file: PathBuf::from("/etc/hilog.para"),
            kmsg: true,
            kmsg_path: PathBuf::from("/dev/kmsg"),
        }
    }
}

impl DaemonConfig {
    /// Load `path` and its `.d` drop-in directory on top of the defaults.
    /// Unreadable files are skipped.
    pub fn load(path: &Path) -> Self {
        let mut config = DaemonConfig::default();

        match fs::read_to_string(path) {
            Ok(contents) => config.parse_config(&contents),
            Err(e) => log::debug!("No config at {}: {}", path.display(), e),
        }

        let mut dropin_dir = path.as_os_str().to_owned();
        dropin_dir.push(".d");
        if let Ok(entries) = fs::read_dir(PathBuf::from(dropin_dir)) {
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "conf"))
                .collect();
            files.sort();
            for path in files {
                if let Ok(contents) = fs::read_to_string(&path) {
                    config.parse_config(&contents);
                }
            }
        }

        config
    }

    pub fn parse_config(&mut self, contents: &str) {
        let mut in_daemon_section = false;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') {
                in_daemon_section = line == "[Daemon]";
                continue;
            }
            if !in_daemon_section {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "BufferSize" => {
                    if let Some(bytes) = parse_size(value) {
                        self.buffer_size = bytes;
                    }
                }
                "KmsgBufferSize" => {
                    if let Some(bytes) = parse_size(value) {
                        self.kmsg_buffer_size = bytes;
                    }
                }
                "InputSocket" => self.input_socket = PathBuf::from(value),
                "ControlSocket" => self.control_socket = PathBuf::from(value),
                "PersistMetaDir" => self.persist_meta_dir = PathBuf::from(value),
                "ProcessQuotaFile" => self.process_quota_file = PathBuf::from(value),
                "DomainQuotaFile" => self.domain_quota_file = PathBuf::from(value),
                "ParameterFile" => self.parameter_file = PathBuf::from(value),
                "Kmsg" => self.kmsg = parse_bool(value),
                "KmsgPath" => self.kmsg_path = PathBuf::from(value),
                other => log::debug!("Ignoring unknown config key {}", other),
            }
        }
    }

    /// Place both sockets inside `dir`.
    pub fn with_socket_dir(mut self, dir: &Path) -> Self {
        self.input_socket = dir.join(INPUT_SOCKET_NAME);
        self.control_socket = dir.join(CONTROL_SOCKET_NAME);
        self
    }
}

pub fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "yes" | "true" | "1" | "on" | "y")
}

/// Parse a byte count with an optional binary (`K`, `MiB`) or decimal
/// (`KB`, `MB`) suffix.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let suffixes: &[(&str, u64)] = &[
        ("GiB", 1024 * 1024 * 1024),
        ("MiB", 1024 * 1024),
        ("KiB", 1024),
        ("GB", 1_000_000_000),
        ("MB", 1_000_000),
        ("KB", 1_000),
        ("G", 1024 * 1024 * 1024),
        ("M", 1024 * 1024),
        ("K", 1024),
        ("B", 1),
    ];

    for &(suffix, multiplier) in suffixes {
        if let Some(num_str) = s.strip_suffix(suffix) {
            if let Ok(n) = num_str.trim().parse::<u64>() {
                return n.checked_mul(multiplier);
            }
        }
    }

    s.parse::<u64>().ok()
}
