//! Kernel ring buffer ingestion.
//!
//! `/dev/kmsg` yields one record per read in the form
//! `PRIORITY,SEQNUM,TIMESTAMP,FLAGS;MESSAGE`, optionally followed by
//! continuation lines starting with a space that carry `KEY=value`
//! dictionary pairs.  Continuation lines are ignored.

use crate::buffer::LogBuffer;
use crate::log_entry::{LogEntry, LogLevel, LogType};
use crate::properties::Properties;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub const KMSG_TAG: &str = "kmsg";

/// How long to sleep when the device has nothing to read.
const KMSG_IDLE: Duration = Duration::from_millis(100);

/// Parse a `/dev/kmsg` line into a kernel record.
pub fn parse_kmsg_line(line: &str) -> Option<LogEntry> {
    if line.starts_with(' ') {
        return None;
    }
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }

    let mut entry = LogEntry::new(LogType::Kmsg, LogLevel::Info, 0, KMSG_TAG, line);
    entry.pid = 0;

    let Some((header, message)) = line.split_once(';') else {
        return Some(entry);
    };
    entry.content = message.to_string();

    // "priority,seqnum,timestamp,flags"
    let mut parts = header.split(',');
    if let Some(pri) = parts.next().and_then(|p| p.parse::<u32>().ok()) {
        entry.level = LogLevel::from_syslog_priority((pri & 7) as u8);
    }
    if let Some(usec) = parts.nth(1).and_then(|t| t.parse::<u64>().ok()) {
        entry.mono_sec = (usec / 1_000_000) as u32;
    }

    Some(entry)
}

pub struct KmsgReader {
    path: PathBuf,
    buffer: Arc<LogBuffer>,
    props: Arc<Properties>,
    stop: Arc<AtomicBool>,
}

impl KmsgReader {
    pub fn new(
        path: &Path,
        buffer: Arc<LogBuffer>,
        props: Arc<Properties>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        KmsgReader {
            path: path.to_path_buf(),
            buffer,
            props,
            stop,
        }
    }

    fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
    }

    /// Read until the stop flag is set.  Returns the number of records
    /// inserted.
    pub fn run(&self) -> u64 {
        let file = match self.open() {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Failed to open {}: {}", self.path.display(), e);
                return 0;
            }
        };
        log::info!("Reading kernel messages from {}", self.path.display());

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut inserted = 0;
        while !self.stop.load(Ordering::Acquire) {
            match reader.read_line(&mut line) {
                Ok(0) => {
                    thread::sleep(KMSG_IDLE);
                    continue;
                }
                Ok(_) if !line.ends_with('\n') => continue,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(KMSG_IDLE);
                    continue;
                }
                // EPIPE: the ring buffer wrapped past our position.
                Err(e) if e.raw_os_error() == Some(libc::EPIPE) => {
                    log::debug!("Kernel messages were overwritten before being read");
                    line.clear();
                    continue;
                }
                Err(e) => {
                    log::error!("kmsg read error: {}", e);
                    break;
                }
            }

            if self.props.is_kmsg_on()
                && let Some(entry) = parse_kmsg_line(&line)
            {
                self.buffer.insert(entry);
                inserted += 1;
            }
            line.clear();
        }
        log::debug!("Kmsg reader stopped after {} records", inserted);
        inserted
    }
}
